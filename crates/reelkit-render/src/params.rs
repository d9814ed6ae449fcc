//! Per-pair transition parameters and the per-frame uniform block.

use reelkit_core::config::{KenBurnsConfig, RenderConfig};
use reelkit_core::FocalPoint;

/// Zoom range applied to the current source over `duration_secs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KenBurns {
    pub start: f32,
    pub end: f32,
}

impl KenBurns {
    /// No zoom at all; both sources sample 1:1.
    pub const NONE: KenBurns = KenBurns {
        start: 1.0,
        end: 1.0,
    };

    /// Zoom of the current source after `elapsed` of `duration` seconds.
    pub fn current_zoom(&self, elapsed: f32, duration: f32) -> f32 {
        let t = if duration > 0.0 {
            (elapsed.max(0.0) / duration).min(1.0)
        } else {
            1.0
        };
        self.start + (self.end - self.start) * t
    }

    /// The previous source has already played out its zoom.
    pub fn previous_zoom(&self) -> f32 {
        self.end
    }
}

impl Default for KenBurns {
    fn default() -> Self {
        KenBurnsConfig::default().into()
    }
}

impl From<KenBurnsConfig> for KenBurns {
    fn from(c: KenBurnsConfig) -> Self {
        Self {
            start: c.start,
            end: c.end,
        }
    }
}

/// Everything the playback driver can tune besides progress and time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionParams {
    pub ken_burns: KenBurns,
    pub duration_secs: f32,
    pub focal_prev: FocalPoint,
    pub focal_curr: FocalPoint,
}

impl TransitionParams {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            ken_burns: config.ken_burns.into(),
            duration_secs: config.duration_secs,
            focal_prev: FocalPoint::CENTER,
            focal_curr: FocalPoint::CENTER,
        }
    }

    pub fn with_ken_burns(mut self, ken_burns: KenBurns) -> Self {
        self.ken_burns = ken_burns;
        self
    }

    pub fn with_focal_points(mut self, prev: FocalPoint, curr: FocalPoint) -> Self {
        self.focal_prev = prev;
        self.focal_curr = curr;
        self
    }

    /// Uniforms for one frame. Slot A is the previous source, slot B the current.
    /// Without a previous source slot A samples the current one, so it
    /// takes the current zoom and focal point too.
    pub fn uniforms(&self, progress: f32, elapsed: f32, has_prev: bool) -> FrameUniforms {
        let zoom_curr = self.ken_burns.current_zoom(elapsed, self.duration_secs);
        let (zoom_a, focal_a) = if has_prev {
            (self.ken_burns.previous_zoom(), self.focal_prev)
        } else {
            (zoom_curr, self.focal_curr)
        };
        FrameUniforms {
            progress: progress.clamp(0.0, 1.0),
            zoom_a,
            zoom_b: zoom_curr,
            _pad: 0.0,
            focal_a: focal_a.as_array(),
            focal_b: self.focal_curr.as_array(),
        }
    }
}

impl Default for TransitionParams {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

/// Uniform block shared by the CPU programs and the WGSL programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "gpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct FrameUniforms {
    pub progress: f32,
    pub zoom_a: f32,
    pub zoom_b: f32,
    pub _pad: f32,
    pub focal_a: [f32; 2],
    pub focal_b: [f32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_zoom_clamps_at_end() {
        let kb = KenBurns {
            start: 1.0,
            end: 1.2,
        };
        assert_eq!(kb.current_zoom(0.0, 5.0), 1.0);
        assert!((kb.current_zoom(2.5, 5.0) - 1.1).abs() < 1e-6);
        assert!((kb.current_zoom(50.0, 5.0) - 1.2).abs() < 1e-6);
        assert!((kb.current_zoom(1.0, 0.0) - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_previous_pinned_to_end() {
        let params = TransitionParams::default();
        let u = params.uniforms(0.3, 0.0, true);
        assert!((u.zoom_a - 1.15).abs() < 1e-6);
        assert_eq!(u.zoom_b, 1.0);
    }

    #[test]
    fn test_absent_previous_mirrors_current() {
        let params = TransitionParams::default()
            .with_focal_points(FocalPoint::new(0.1, 0.1), FocalPoint::new(0.7, 0.2));
        let u = params.uniforms(0.0, 1.0, false);
        assert_eq!(u.zoom_a, u.zoom_b);
        assert_eq!(u.focal_a, [0.7, 0.2]);
    }

    #[test]
    fn test_uniform_block_is_32_bytes() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 32);
    }
}
