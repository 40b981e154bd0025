//! Broadcasting log calls to several sinks.

use std::error::Error as StdError;
use std::sync::Arc;

use serde_json::Value;

use crate::traits::LogSink;

/// A sink that forwards every call, unchanged, to each of its leaves.
#[derive(Clone, Default)]
pub struct Fanout {
    leaves: Vec<Arc<dyn LogSink>>,
}

impl Fanout {
    /// Creates a fanout over the given leaves.
    #[must_use]
    pub fn new(leaves: Vec<Arc<dyn LogSink>>) -> Self {
        Self { leaves }
    }

    /// Returns the leaves, in dispatch order.
    #[must_use]
    pub fn leaves(&self) -> &[Arc<dyn LogSink>] {
        &self.leaves
    }

    fn map(&self, derive: impl Fn(&dyn LogSink) -> Arc<dyn LogSink>) -> Arc<dyn LogSink> {
        Arc::new(Self {
            leaves: self.leaves.iter().map(|leaf| derive(leaf.as_ref())).collect(),
        })
    }
}

impl LogSink for Fanout {
    // leaves filter on their own
    fn enabled(&self, _level: u8) -> bool {
        true
    }

    fn info(&self, level: u8, msg: &str, kv: &[Value]) {
        for leaf in &self.leaves {
            if leaf.enabled(level) {
                leaf.info(level, msg, kv);
            }
        }
    }

    fn error(&self, err: Option<&(dyn StdError + 'static)>, msg: &str, kv: &[Value]) {
        for leaf in &self.leaves {
            leaf.error(err, msg, kv);
        }
    }

    fn with_name(&self, name: &str) -> Arc<dyn LogSink> {
        self.map(|leaf| leaf.with_name(name))
    }

    fn with_values(&self, kv: &[Value]) -> Arc<dyn LogSink> {
        self.map(|leaf| leaf.with_values(kv))
    }

    fn with_call_depth(&self, depth: usize) -> Arc<dyn LogSink> {
        self.map(|leaf| leaf.with_call_depth(depth))
    }
}

/// Returns a sink broadcasting to all of `leaves`.
#[must_use]
pub fn chain(leaves: Vec<Arc<dyn LogSink>>) -> Arc<dyn LogSink> {
    Arc::new(Fanout::new(leaves))
}

/// Returns `primary`, teed into `secondary` when one is given.
#[must_use]
pub fn tee(primary: Arc<dyn LogSink>, secondary: Option<Arc<dyn LogSink>>) -> Arc<dyn LogSink> {
    match secondary {
        Some(secondary) => chain(vec![secondary, primary]),
        None => primary,
    }
}
