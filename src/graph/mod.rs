// In-memory dependency graph
//
// Built on demand from the persisted `imports` relations of one project.
// Forward and reverse adjacency are kept as maps of ordered sets so every
// traversal is deterministic. Graphs are throwaway snapshots: the context
// caches one per project and drops it on every index batch.

use crate::database::{RelationRecord, RelationType};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

pub const DEFAULT_MAX_CYCLES: usize = 100;

/// Fan-in/fan-out counts for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanMetrics {
    pub file_path: String,
    pub fan_in: usize,
    pub fan_out: usize,
}

/// Snapshot of the import edges of one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    adj: HashMap<String, BTreeSet<String>>,
    radj: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build from relation rows; anything that is not an `imports`
    /// relation is ignored.
    pub fn from_relations(relations: &[RelationRecord]) -> Self {
        let mut graph = Self::default();
        for relation in relations {
            if relation.kind != RelationType::Imports {
                continue;
            }
            graph.add_edge(&relation.src_file_path, &relation.dst_file_path);
        }
        graph
    }

    fn add_edge(&mut self, src: &str, dst: &str) {
        self.adj
            .entry(src.to_string())
            .or_default()
            .insert(dst.to_string());
        self.radj
            .entry(dst.to_string())
            .or_default()
            .insert(src.to_string());
        // Make sure both endpoints appear as nodes.
        self.adj.entry(dst.to_string()).or_default();
        self.radj.entry(src.to_string()).or_default();
    }

    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adj.values().map(|targets| targets.len()).sum()
    }

    /// Direct dependencies of `file`. Unknown files yield an empty list.
    pub fn get_dependencies(&self, file: &str) -> Vec<String> {
        self.adj
            .get(file)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `file`. Unknown files yield an empty list.
    pub fn get_dependents(&self, file: &str) -> Vec<String> {
        self.radj
            .get(file)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Everything that transitively imports `file`, in BFS order,
    /// excluding `file` itself.
    pub fn get_transitive_dependents(&self, file: &str) -> Vec<String> {
        self.bfs(file, &self.radj)
    }

    /// Everything `file` transitively imports, in BFS order, excluding
    /// `file` itself.
    pub fn get_transitive_dependencies(&self, file: &str) -> Vec<String> {
        self.bfs(file, &self.adj)
    }

    fn bfs(&self, start: &str, edges: &HashMap<String, BTreeSet<String>>) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        seen.insert(start);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = edges.get(current) {
                for neighbor in neighbors {
                    if seen.insert(neighbor.as_str()) {
                        order.push(neighbor.clone());
                        queue.push_back(neighbor.as_str());
                    }
                }
            }
        }

        order
    }

    /// Union of the transitive dependents of every input file,
    /// deduplicated and sorted. An empty input yields an empty union.
    pub fn get_affected_by_change(&self, files: &[String]) -> Vec<String> {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        for file in files {
            affected.extend(self.get_transitive_dependents(file));
        }
        affected.into_iter().collect()
    }

    /// True when any import cycle exists. Iterative DFS with the
    /// two-marker scheme: `visited` survives the walk, `in_path` tracks
    /// the current stack, and the first back-edge decides.
    pub fn has_cycle(&self) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_path: HashSet<&str> = HashSet::new();

        let mut roots: Vec<&String> = self.adj.keys().collect();
        roots.sort();

        for root in roots {
            if visited.contains(root.as_str()) {
                continue;
            }

            let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
            visited.insert(root.as_str());
            in_path.insert(root.as_str());
            stack.push((root.as_str(), self.sorted_neighbors(root), 0));

            while !stack.is_empty() {
                let next_neighbor = {
                    let top = stack.last_mut().unwrap();
                    if top.2 < top.1.len() {
                        let neighbor = top.1[top.2];
                        top.2 += 1;
                        Some(neighbor)
                    } else {
                        None
                    }
                };

                match next_neighbor {
                    Some(neighbor) => {
                        if in_path.contains(neighbor) {
                            return true;
                        }
                        if visited.insert(neighbor) {
                            in_path.insert(neighbor);
                            stack.push((neighbor, self.sorted_neighbors(neighbor), 0));
                        }
                    }
                    None => {
                        let (node, _, _) = stack.pop().unwrap();
                        in_path.remove(node);
                    }
                }
            }
        }

        false
    }

    fn sorted_neighbors(&self, node: &str) -> Vec<&str> {
        self.adj
            .get(node)
            .map(|targets| targets.iter().map(|t| t.as_str()).collect())
            .unwrap_or_default()
    }

    /// Enumerate up to `max_cycles` simple cycles as node-path arrays.
    /// Cycles are searched per strongly-connected component, rooted at
    /// each component's smallest node first, so the output is
    /// deterministic.
    pub fn get_cycle_paths(&self, max_cycles: Option<usize>) -> Vec<Vec<String>> {
        let max_cycles = max_cycles.unwrap_or(DEFAULT_MAX_CYCLES);
        let mut cycles: Vec<Vec<String>> = Vec::new();
        if max_cycles == 0 {
            return cycles;
        }

        for component in self.strongly_connected_components() {
            let has_self_loop = component.len() == 1
                && self
                    .adj
                    .get(&component[0])
                    .is_some_and(|t| t.contains(&component[0]));
            if component.len() < 2 && !has_self_loop {
                continue;
            }

            let members: BTreeSet<&str> = component.iter().map(|n| n.as_str()).collect();
            let ordered: Vec<&str> = members.iter().copied().collect();

            for (start_index, &start) in ordered.iter().enumerate() {
                if cycles.len() >= max_cycles {
                    return cycles;
                }
                // Only visit nodes ranked >= start so each cycle is
                // reported exactly once, anchored at its smallest node.
                let allowed: HashSet<&str> = ordered[start_index..].iter().copied().collect();
                let mut path: Vec<&str> = vec![start];
                let mut on_path: HashSet<&str> = HashSet::from([start]);
                self.collect_cycles(start, start, &allowed, &mut path, &mut on_path, &mut cycles, max_cycles);
            }
        }

        cycles
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_cycles<'a>(
        &'a self,
        start: &'a str,
        current: &'a str,
        allowed: &HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        on_path: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
        max_cycles: usize,
    ) {
        for neighbor in self.sorted_neighbors(current) {
            if cycles.len() >= max_cycles {
                return;
            }
            if neighbor == start {
                cycles.push(path.iter().map(|n| n.to_string()).collect());
                continue;
            }
            if !allowed.contains(neighbor) || on_path.contains(neighbor) {
                continue;
            }
            path.push(neighbor);
            on_path.insert(neighbor);
            self.collect_cycles(start, neighbor, allowed, path, on_path, cycles, max_cycles);
            on_path.remove(neighbor);
            path.pop();
        }
    }

    /// Kosaraju's two-pass SCC: forward post-order, then reverse-graph
    /// sweeps in reverse finishing order.
    fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        let mut finish_order: Vec<&str> = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();

        let mut roots: Vec<&String> = self.adj.keys().collect();
        roots.sort();

        for root in &roots {
            if visited.contains(root.as_str()) {
                continue;
            }
            let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
            visited.insert(root.as_str());
            stack.push((root.as_str(), self.sorted_neighbors(root), 0));

            while !stack.is_empty() {
                let next_neighbor = {
                    let top = stack.last_mut().unwrap();
                    if top.2 < top.1.len() {
                        let neighbor = top.1[top.2];
                        top.2 += 1;
                        Some(neighbor)
                    } else {
                        None
                    }
                };

                match next_neighbor {
                    Some(neighbor) => {
                        if visited.insert(neighbor) {
                            stack.push((neighbor, self.sorted_neighbors(neighbor), 0));
                        }
                    }
                    None => {
                        let (node, _, _) = stack.pop().unwrap();
                        finish_order.push(node);
                    }
                }
            }
        }

        let mut assigned: HashSet<&str> = HashSet::new();
        let mut components: Vec<Vec<String>> = Vec::new();

        for &node in finish_order.iter().rev() {
            if assigned.contains(node) {
                continue;
            }
            let mut component: Vec<String> = Vec::new();
            let mut queue: VecDeque<&str> = VecDeque::new();
            assigned.insert(node);
            queue.push_back(node);

            while let Some(current) = queue.pop_front() {
                component.push(current.to_string());
                if let Some(sources) = self.radj.get(current) {
                    for source in sources {
                        if assigned.insert(source.as_str()) {
                            queue.push_back(source.as_str());
                        }
                    }
                }
            }

            component.sort();
            components.push(component);
        }

        components
    }

    pub fn get_fan_metrics(&self, file: &str) -> FanMetrics {
        FanMetrics {
            file_path: file.to_string(),
            fan_in: self.radj.get(file).map(|s| s.len()).unwrap_or(0),
            fan_out: self.adj.get(file).map(|s| s.len()).unwrap_or(0),
        }
    }

    /// Flat snapshot of nodes and edges, both sorted.
    pub fn to_import_graph(&self) -> ImportGraph {
        let mut nodes: Vec<String> = self.adj.keys().cloned().collect();
        nodes.sort();

        let mut edges: Vec<(String, String)> = self
            .adj
            .iter()
            .flat_map(|(src, targets)| {
                targets
                    .iter()
                    .map(move |dst| (src.clone(), dst.clone()))
            })
            .collect();
        edges.sort();

        ImportGraph { nodes, edges }
    }
}
