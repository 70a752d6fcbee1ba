use std::cell::RefCell;
use std::fmt;

use rustc_hash::FxHashSet;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Don't collect any diagnostics.
    Off,
    /// Report only unsuccessful simplifications.
    Warn,
    /// Report all simplifications.
    Info,
}

/// A message about a simplification that was or was not performed.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,

    /// Path of the graph containing the node, eg. `main/loop_1.body`.
    pub graph: String,

    /// Display name of the node the message is about.
    pub node: String,

    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: node \"{}\": {}", self.graph, self.node, self.message)
    }
}

/// Diagnostic reporter for graph optimizations.
///
/// Messages are logged and also collected, so callers can inspect them
/// without installing a `tracing` subscriber.
pub struct Diagnostics {
    /// Nodes against which diagnostics have been reported at the `Warn` level
    /// or higher, as `(graph, node)` pairs.
    warned_nodes: RefCell<FxHashSet<(String, String)>>,
    messages: RefCell<Vec<Diagnostic>>,
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self {
            warned_nodes: RefCell::new(FxHashSet::default()),
            messages: RefCell::new(Vec::new()),
            level,
        }
    }

    /// Return true if diagnostic messages are enabled at a given level.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        self.level >= level
    }

    /// Report a message at the [`Info`](DiagnosticLevel::Info) level.
    pub fn info(&self, graph: &str, node: &str, message: fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Info) {
            return;
        }
        info!("{}: node \"{}\": {}", graph, node, message);
        self.push(DiagnosticLevel::Info, graph, node, message);
    }

    /// Report a message at the [`Warn`](DiagnosticLevel::Warn) level.
    ///
    /// Only the first warning for each node is kept.
    pub fn warn(&self, graph: &str, node: &str, message: fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Warn) {
            return;
        }
        let key = (graph.to_string(), node.to_string());
        if !self.warned_nodes.borrow_mut().insert(key) {
            return;
        }
        warn!("{}: node \"{}\": {}", graph, node, message);
        self.push(DiagnosticLevel::Warn, graph, node, message);
    }

    fn push(&self, level: DiagnosticLevel, graph: &str, node: &str, message: fmt::Arguments<'_>) {
        self.messages.borrow_mut().push(Diagnostic {
            level,
            graph: graph.to_string(),
            node: node.to_string(),
            message: message.to_string(),
        });
    }

    /// Return the collected messages.
    pub fn into_messages(self) -> Vec<Diagnostic> {
        self.messages.into_inner()
    }
}
