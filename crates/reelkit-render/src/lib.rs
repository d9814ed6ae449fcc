//! # reelkit-render
//!
//! The transition compositor. Blends a previous and a current source into
//! one frame for a given progress, using one of eleven transition programs
//! with per-source Ken-Burns zoom and focal points.
//!
//! Programs run on a [`GraphicsBackend`]: the CPU [`SoftwareBackend`] by
//! default, or wgpu with the `gpu` feature.

pub mod backend;
pub mod compositor;
pub mod fragment;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod params;
pub mod shaders;

pub use backend::{GraphicsBackend, ProgramId, SoftwareBackend, TextureId};
pub use compositor::TransitionCompositor;
#[cfg(feature = "gpu")]
pub use gpu::{GpuBackend, GpuContext};
pub use params::{FrameUniforms, KenBurns, TransitionParams};
