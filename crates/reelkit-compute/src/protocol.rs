//! Typed request/response protocol between callers and the compute dispatcher.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use reelkit_core::{Bitmap, ReelkitResult};

use crate::graph::{GraphNode, SynapseEdge};

/// Correlation key for one submitted task. Ids are unique and increase
/// monotonically for the lifetime of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// The caller needs the result for the current frame.
    #[default]
    High,
    /// Speculative work such as preloading upcoming assets.
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Decode,
    Graph,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Decode => write!(f, "decode"),
            TaskKind::Graph => write!(f, "graph"),
        }
    }
}

/// What a caller asks the worker to do.
#[derive(Debug, Clone)]
pub enum TaskRequest {
    /// Decode an encoded image. The task takes ownership of the bytes.
    Decode { bytes: Arc<[u8]> },
    /// Build synapse edges over a projected node set.
    Graph {
        nodes: Vec<GraphNode>,
        focused: Option<String>,
    },
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Decode { .. } => TaskKind::Decode,
            TaskRequest::Graph { .. } => TaskKind::Graph,
        }
    }

    /// Low-priority decodes are the only gated work; graph tasks always run immediately.
    pub(crate) fn is_gated(&self, priority: Priority) -> bool {
        self.kind() == TaskKind::Decode && priority == Priority::Low
    }
}

/// What the worker sends back.
#[derive(Debug, Clone)]
pub enum TaskResponse {
    Bitmap(Bitmap),
    Synapses(Vec<SynapseEdge>),
}

impl TaskResponse {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskResponse::Bitmap(_) => TaskKind::Decode,
            TaskResponse::Synapses(_) => TaskKind::Graph,
        }
    }
}

/// A task owned by the dispatcher until it is resolved or rejected.
#[derive(Debug)]
pub(crate) struct ComputeTask {
    pub id: TaskId,
    pub priority: Priority,
    pub request: TaskRequest,
}

/// A finished task on its way back to the dispatcher.
#[derive(Debug)]
pub(crate) struct TaskCompletion {
    pub id: TaskId,
    /// Whether the task occupied the low-priority lane.
    pub gated: bool,
    pub result: ReelkitResult<TaskResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_low_priority_decodes_are_gated() {
        let decode = TaskRequest::Decode {
            bytes: Arc::from(vec![0u8; 4]),
        };
        let graph = TaskRequest::Graph {
            nodes: Vec::new(),
            focused: None,
        };
        assert!(decode.is_gated(Priority::Low));
        assert!(!decode.is_gated(Priority::High));
        assert!(!graph.is_gated(Priority::Low));
        assert_eq!(graph.kind(), TaskKind::Graph);
    }

    #[test]
    fn test_priority_serde() {
        let p: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(p, Priority::Low);
        assert_eq!(TaskId(7).to_string(), "task#7");
    }
}
