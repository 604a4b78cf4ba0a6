// notify-backed default file watcher
//
// Translates notify events into WatchEvents and hands them to the sink.
// The sink runs on notify's thread; it must only enqueue.

use crate::collaborators::{FileWatcher, WatchEvent, WatchEventKind, WatchSink};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::Path;
use tracing::{debug, info, warn};

pub struct NotifyWatcher {
    watcher: Option<notify::RecommendedWatcher>,
}

/// Start watching `root` recursively, delivering translated events into
/// `sink`. This is the default watcher factory.
pub fn spawn_notify_watcher(root: &Path, sink: WatchSink) -> Result<Box<dyn FileWatcher>> {
    info!("Starting file watcher for {}", root.display());

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for translated in translate_event(event) {
                sink(translated);
            }
        }
        Err(e) => {
            warn!("File watcher error: {}", e);
        }
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .context("Failed to start watching project root")?;

    Ok(Box::new(NotifyWatcher {
        watcher: Some(watcher),
    }))
}

fn translate_event(event: Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Create,
        EventKind::Modify(_) => WatchEventKind::Update,
        EventKind::Remove(_) => WatchEventKind::Delete,
        other => {
            debug!("Ignoring event kind: {:?}", other);
            return Vec::new();
        }
    };

    event
        .paths
        .into_iter()
        .map(|path| WatchEvent { path, kind })
        .collect()
}

impl FileWatcher for NotifyWatcher {
    fn close(&mut self) -> Result<()> {
        if self.watcher.take().is_some() {
            debug!("File watcher stopped");
        }
        Ok(())
    }
}
