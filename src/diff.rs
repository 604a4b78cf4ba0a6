// Symbol-set diffing
//
// Symbols are keyed by (name, file_path); a changed fingerprint marks a
// modification. Equal fingerprints, including both-absent, mean
// unchanged.

use crate::database::SymbolRecord;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolModification {
    pub before: SymbolRecord,
    pub after: SymbolRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolDiff {
    pub added: Vec<SymbolRecord>,
    pub removed: Vec<SymbolRecord>,
    pub modified: Vec<SymbolModification>,
}

pub fn diff_symbols(before: &[SymbolRecord], after: &[SymbolRecord]) -> SymbolDiff {
    let before_by_key: HashMap<(&str, &str), &SymbolRecord> = before
        .iter()
        .map(|s| ((s.name.as_str(), s.file_path.as_str()), s))
        .collect();
    let after_by_key: HashMap<(&str, &str), &SymbolRecord> = after
        .iter()
        .map(|s| ((s.name.as_str(), s.file_path.as_str()), s))
        .collect();

    let mut diff = SymbolDiff::default();

    for symbol in after {
        let key = (symbol.name.as_str(), symbol.file_path.as_str());
        match before_by_key.get(&key) {
            None => diff.added.push(symbol.clone()),
            Some(previous) if previous.fingerprint != symbol.fingerprint => {
                diff.modified.push(SymbolModification {
                    before: (*previous).clone(),
                    after: symbol.clone(),
                });
            }
            Some(_) => {}
        }
    }

    for symbol in before {
        let key = (symbol.name.as_str(), symbol.file_path.as_str());
        if !after_by_key.contains_key(&key) {
            diff.removed.push(symbol.clone());
        }
    }

    diff
}
