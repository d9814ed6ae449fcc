//! # reelkit-compute
//!
//! Runs CPU-bound work (bitmap decoding and the O(n²) synapse graph) away
//! from the render path. Requests and responses form a typed protocol and
//! are matched strictly by task id; low-priority decodes share a single lane.

pub mod decode;
pub mod graph;
pub mod protocol;
pub mod service;
pub mod worker;

pub use decode::{BitmapDecoder, ImageCrateDecoder};
pub use graph::{calculate_synapses, CanvasAsset, GraphNode, GraphParams, SynapseEdge};
pub use protocol::{Priority, TaskId, TaskKind, TaskRequest, TaskResponse};
pub use service::ComputeService;
pub use worker::WorkerContext;
