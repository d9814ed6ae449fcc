//! Graphics backends: where textures live and transition programs run.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use reelkit_core::frame::{FrameBuffer, PixelFormat};
use reelkit_core::{ReelkitError, ReelkitResult, TransitionKind};

use crate::fragment::{self, Texture};
use crate::params::FrameUniforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

/// Owner of GPU-side (or GPU-like) resources for the compositor.
///
/// Every `upload_texture`/`build_program` must be paired with exactly one
/// release. Releasing an unknown id is a no-op.
pub trait GraphicsBackend: Send {
    fn name(&self) -> &'static str;

    /// Compile and link the program for `kind`. A failure is
    /// [`ReelkitError::ShaderBuildFailed`].
    fn build_program(&mut self, kind: TransitionKind) -> ReelkitResult<ProgramId>;

    fn release_program(&mut self, program: ProgramId);

    fn upload_texture(&mut self, frame: &FrameBuffer) -> ReelkitResult<TextureId>;

    /// Replace a texture's contents, e.g. with the next video frame.
    fn update_texture(&mut self, texture: TextureId, frame: &FrameBuffer) -> ReelkitResult<()>;

    fn release_texture(&mut self, texture: TextureId);

    /// Run `program` over a `width`x`height` target with `a`/`b` bound.
    fn draw(
        &mut self,
        program: ProgramId,
        a: TextureId,
        b: TextureId,
        uniforms: &FrameUniforms,
        width: u32,
        height: u32,
    ) -> ReelkitResult<FrameBuffer>;

    fn live_textures(&self) -> usize;

    fn live_programs(&self) -> usize;
}

/// Runs the CPU fragment programs across rows on the rayon pool.
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    next_id: u64,
    textures: HashMap<TextureId, Arc<FrameBuffer>>,
    programs: HashMap<ProgramId, TransitionKind>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn texture(&self, id: TextureId) -> ReelkitResult<Arc<FrameBuffer>> {
        self.textures
            .get(&id)
            .cloned()
            .ok_or_else(|| ReelkitError::InvalidArgument(format!("unknown texture {}", id.0)))
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn build_program(&mut self, kind: TransitionKind) -> ReelkitResult<ProgramId> {
        let id = ProgramId(self.next());
        self.programs.insert(id, kind);
        debug!(program = id.0, %kind, "built software program");
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn upload_texture(&mut self, frame: &FrameBuffer) -> ReelkitResult<TextureId> {
        let id = TextureId(self.next());
        self.textures.insert(id, Arc::new(frame.to_rgba8()));
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, frame: &FrameBuffer) -> ReelkitResult<()> {
        let slot = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| ReelkitError::InvalidArgument(format!("unknown texture {}", texture.0)))?;
        *slot = Arc::new(frame.to_rgba8());
        Ok(())
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn draw(
        &mut self,
        program: ProgramId,
        a: TextureId,
        b: TextureId,
        uniforms: &FrameUniforms,
        width: u32,
        height: u32,
    ) -> ReelkitResult<FrameBuffer> {
        let kind = *self
            .programs
            .get(&program)
            .ok_or_else(|| ReelkitError::InvalidArgument(format!("unknown program {}", program.0)))?;
        let frame_a = self.texture(a)?;
        let frame_b = self.texture(b)?;
        let (ta, tb) = (Texture::new(&frame_a), Texture::new(&frame_b));

        let mut out = FrameBuffer::new(width, height, PixelFormat::Rgba8);
        let row_bytes = width as usize * 4;
        if row_bytes == 0 {
            return Ok(out);
        }
        out.data
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| {
                let v = (y as f32 + 0.5) / height as f32;
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let uv = [(x as f32 + 0.5) / width as f32, v];
                    let color = fragment::shade(kind, uv, uniforms, ta, tb);
                    px.copy_from_slice(&fragment::to_rgba8(color));
                }
            });
        Ok(out)
    }

    fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }
}
