//! The nested stats tree (spec.md §3 "Stats tree", §4.4).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::SystemTime;

use serde_json::{json, Value};

use super::event::StatsEvent;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counter {
    pub success: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StatsNode {
    pub counters: BTreeMap<String, Counter>,
    pub timers: BTreeMap<String, Vec<(String, SystemTime)>>,
    pub attributes: BTreeMap<String, Vec<String>>,
    pub children: BTreeMap<String, StatsNode>,
}

impl StatsNode {
    fn child_mut(&mut self, name: &str) -> &mut StatsNode {
        self.children.entry(name.to_string()).or_default()
    }

    fn node_at_path<'a>(&'a mut self, path: &[String]) -> &'a mut StatsNode {
        let mut node = self;
        for segment in path {
            node = node.child_mut(segment);
        }
        node
    }

    fn apply_local(&mut self, name: &str, op: LocalOp) {
        match op {
            LocalOp::Counter(delta) => {
                let counter = self.counters.entry(name.to_string()).or_default();
                if delta > 0 {
                    counter.success += delta as u64;
                } else if delta < 0 {
                    counter.failures += (-delta) as u64;
                }
            }
            LocalOp::SetCounter(value) => {
                let counter = self.counters.entry(name.to_string()).or_default();
                if value > 0 {
                    counter.success = value as u64;
                } else if value < 0 {
                    counter.failures = (-value) as u64;
                } else {
                    counter.success = 0;
                    counter.failures = 0;
                }
            }
            LocalOp::Timer(milestone, at) => {
                self.timers.entry(name.to_string()).or_default().push((milestone, at));
            }
            LocalOp::Attribute(value) => {
                self.attributes.entry(name.to_string()).or_default().push(value);
            }
        }
    }

    fn to_json(&self) -> Value {
        let counters: serde_json::Map<String, Value> = self
            .counters
            .iter()
            .map(|(name, c)| (name.clone(), json!({ "success": c.success, "failures": c.failures })))
            .collect();

        let timers: serde_json::Map<String, Value> = self
            .timers
            .iter()
            .map(|(name, entries)| {
                let arr: Vec<Value> = entries
                    .iter()
                    .map(|(milestone, at)| {
                        let epoch = at.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
                        json!({ "milestone": milestone, "at": epoch.as_secs_f64() })
                    })
                    .collect();
                (name.clone(), Value::Array(arr))
            })
            .collect();

        let attributes: serde_json::Map<String, Value> = self
            .attributes
            .iter()
            .map(|(name, values)| (name.clone(), json!(values)))
            .collect();

        let children: serde_json::Map<String, Value> =
            self.children.iter().map(|(name, node)| (name.clone(), node.to_json())).collect();

        json!({
            "counters": counters,
            "timers": timers,
            "attributes": attributes,
            "children": children,
        })
    }

    fn write_plain(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        for (name, counter) in &self.counters {
            let _ = writeln!(out, "{}counter {} = {} ok, {} failed", pad, name, counter.success, counter.failures);
        }
        for (name, entries) in &self.timers {
            let _ = writeln!(out, "{}timer {} = {} milestone(s)", pad, name, entries.len());
            for (milestone, at) in entries {
                let epoch = at.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
                let _ = writeln!(out, "{}  {} @ {:.3}", pad, milestone, epoch.as_secs_f64());
            }
        }
        for (name, values) in &self.attributes {
            let _ = writeln!(out, "{}attribute {} = {:?}", pad, name, values);
        }
        for (name, child) in &self.children {
            let _ = writeln!(out, "{}{}:", pad, name);
            child.write_plain(out, indent + 1);
        }
    }
}

enum LocalOp {
    Counter(i64),
    SetCounter(i64),
    Timer(String, SystemTime),
    Attribute(String),
}

/// Root of the stats tree. Owned exclusively by the consumer thread
/// (spec.md §4.4 "Consumer side (single thread)").
#[derive(Debug, Clone, Default)]
pub struct StatsTree {
    root: StatsNode,
}

impl StatsTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the event's path, creating intermediate nodes on demand, and
    /// apply it (spec.md §4.4 "Consumer side").
    pub fn apply(&mut self, event: StatsEvent) {
        match event {
            StatsEvent::Counter { path, name, delta } => {
                self.root.node_at_path(&path).apply_local(&name, LocalOp::Counter(delta));
            }
            StatsEvent::SetCounter { path, name, value } => {
                self.root.node_at_path(&path).apply_local(&name, LocalOp::SetCounter(value));
            }
            StatsEvent::Timer { path, name, milestone, at } => {
                self.root.node_at_path(&path).apply_local(&name, LocalOp::Timer(milestone, at));
            }
            StatsEvent::Attribute { path, name, value } => {
                self.root.node_at_path(&path).apply_local(&name, LocalOp::Attribute(value));
            }
        }
    }

    /// Read a counter for tests/driver summaries, e.g. the top-level
    /// `recovered_keys` counter.
    pub fn counter(&self, path: &[String], name: &str) -> Counter {
        let mut node = &self.root;
        for segment in path {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return Counter::default(),
            }
        }
        node.counters.get(name).cloned().unwrap_or_default()
    }

    pub fn to_json_string(&self) -> String {
        self.root.to_json().to_string()
    }

    pub fn to_plain_string(&self) -> String {
        let mut out = String::new();
        self.root.write_plain(&mut out, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn counter_success_and_failure_are_independent() {
        let mut tree = StatsTree::new();
        tree.apply(StatsEvent::Counter { path: path(&["a"]), name: "x".into(), delta: 1 });
        tree.apply(StatsEvent::Counter { path: path(&["a"]), name: "x".into(), delta: -1 });
        tree.apply(StatsEvent::Counter { path: path(&["a"]), name: "x".into(), delta: 1 });
        let c = tree.counter(&path(&["a"]), "x");
        assert_eq!(c.success, 2);
        assert_eq!(c.failures, 1);
    }

    #[test]
    fn set_counter_zero_clears_both() {
        let mut tree = StatsTree::new();
        tree.apply(StatsEvent::Counter { path: path(&["a"]), name: "x".into(), delta: 5 });
        tree.apply(StatsEvent::SetCounter { path: path(&["a"]), name: "x".into(), value: 0 });
        let c = tree.counter(&path(&["a"]), "x");
        assert_eq!(c, Counter::default());
    }

    #[test]
    fn json_and_plain_dumps_are_parseable() {
        let mut tree = StatsTree::new();
        tree.apply(StatsEvent::Counter { path: path(&["recovery"]), name: "recovered_keys".into(), delta: 1 });
        let json = tree.to_json_string();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert!(value["children"]["recovery"]["counters"]["recovered_keys"]["success"].as_u64().unwrap() == 1);

        let plain = tree.to_plain_string();
        assert!(plain.contains("recovery"));
        assert!(plain.contains("recovered_keys"));
    }
}
