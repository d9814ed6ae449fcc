//! # reelkit-core
//!
//! Core types and primitives for the reelkit media pipeline.
//! This crate contains the foundational types shared by the compute service,
//! the asset loader and the transition compositor: frame buffers, bitmaps,
//! colors, asset references, transition kinds, configuration and error types.

pub mod asset;
pub mod bitmap;
pub mod color;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod hash;
pub mod math;
pub mod transition;

pub use config::*;

pub use asset::{AssetId, AssetRef, MediaType};
pub use bitmap::{Bitmap, BitmapId};
pub use color::Color;
pub use diagnostics::{DiagnosticEvent, DiagnosticsSink, Severity, TracingDiagnostics};
pub use error::{ReelkitError, ReelkitResult};
pub use hash::{hash_bytes, hash_frame, ContentHash};
pub use frame::{FrameBuffer, PixelFormat};
pub use math::{FocalPoint, Point2D};
pub use transition::{TransitionKind, UnknownTransition};
