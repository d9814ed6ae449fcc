//! CPU fragment programs, one per transition kind.
//!
//! Each program maps a normalized output coordinate (`y = 0` is the top row)
//! to an RGBA color in `[0, 1]`. The math mirrors the WGSL programs in
//! [`crate::shaders`] so both backends render the same fixed point for a
//! given progress.

use std::f32::consts::PI;

use reelkit_core::frame::FrameBuffer;
use reelkit_core::TransitionKind;

use crate::params::FrameUniforms;

pub type Rgba = [f32; 4];

const WHITE: Rgba = [1.0; 4];
const ZOOM_BLUR_TAPS: usize = 8;

/// Sub-texel offsets smaller than this are snapped so 1:1 sampling is exact.
const SNAP_EPSILON: f32 = 1e-3;

/// Bilinear, clamp-to-edge view over an RGBA8 frame.
#[derive(Clone, Copy)]
pub struct Texture<'a> {
    frame: &'a FrameBuffer,
}

impl<'a> Texture<'a> {
    pub fn new(frame: &'a FrameBuffer) -> Self {
        Self { frame }
    }

    fn texel(&self, x: i64, y: i64) -> Rgba {
        let w = self.frame.width as i64;
        let h = self.frame.height as i64;
        if w == 0 || h == 0 {
            return [0.0; 4];
        }
        let x = x.clamp(0, w - 1) as usize;
        let y = y.clamp(0, h - 1) as usize;
        let i = (y * w as usize + x) * 4;
        match self.frame.data.get(i..i + 4) {
            Some(px) => [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
                px[3] as f32 / 255.0,
            ],
            None => [0.0; 4],
        }
    }

    pub fn sample(&self, uv: [f32; 2]) -> Rgba {
        let fx = snap(uv[0] * self.frame.width as f32 - 0.5);
        let fy = snap(uv[1] * self.frame.height as f32 - 0.5);
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = mix(self.texel(x0, y0), self.texel(x0 + 1, y0), tx);
        let bottom = mix(self.texel(x0, y0 + 1), self.texel(x0 + 1, y0 + 1), tx);
        mix(top, bottom, ty)
    }
}

fn snap(v: f32) -> f32 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPSILON {
        r
    } else {
        v
    }
}

/// `a * (1 - t) + b * t`, exact at both ends.
pub fn mix(a: Rgba, b: Rgba, t: f32) -> Rgba {
    let s = 1.0 - t;
    [
        a[0] * s + b[0] * t,
        a[1] * s + b[1] * t,
        a[2] * s + b[2] * t,
        a[3] * s + b[3] * t,
    ]
}

/// Per-pixel hash noise in `[0, 1)`.
pub fn rand(co: [f32; 2]) -> f32 {
    let v = (co[0] * 12.9898 + co[1] * 78.233).sin() * 43758.5453;
    v - v.floor()
}

/// Zoom `uv` by `zoom` around `center`.
pub fn get_uv(uv: [f32; 2], zoom: f32, center: [f32; 2]) -> [f32; 2] {
    [
        (uv[0] - center[0]) / zoom + center[0],
        (uv[1] - center[1]) / zoom + center[1],
    ]
}

fn step(edge: f32, x: f32) -> f32 {
    if x < edge {
        0.0
    } else {
        1.0
    }
}

/// GLSL `mod`: result has the sign of `y`.
fn glsl_mod(x: f32, y: f32) -> f32 {
    x - y * (x / y).floor()
}

/// Both sources sampled through their own zoom and focal point at `uv`.
struct Pair<'a> {
    a: Texture<'a>,
    b: Texture<'a>,
    u: &'a FrameUniforms,
}

impl Pair<'_> {
    fn sample_a(&self, uv: [f32; 2]) -> Rgba {
        self.a.sample(get_uv(uv, self.u.zoom_a, self.u.focal_a))
    }

    fn sample_b(&self, uv: [f32; 2]) -> Rgba {
        self.b.sample(get_uv(uv, self.u.zoom_b, self.u.focal_b))
    }

    fn blend(&self, uv: [f32; 2], t: f32) -> Rgba {
        mix(self.sample_a(uv), self.sample_b(uv), t)
    }
}

/// Run the `kind` program for one output coordinate.
pub fn shade(
    kind: TransitionKind,
    uv: [f32; 2],
    u: &FrameUniforms,
    a: Texture<'_>,
    b: Texture<'_>,
) -> Rgba {
    let pair = Pair { a, b, u };
    let p = u.progress;
    match kind {
        TransitionKind::Fade => pair.blend(uv, p),
        TransitionKind::Cut => {
            if p > 0.5 {
                pair.sample_b(uv)
            } else {
                pair.sample_a(uv)
            }
        }
        TransitionKind::Dissolve => {
            if rand(uv) > p {
                pair.sample_a(uv)
            } else {
                pair.sample_b(uv)
            }
        }
        TransitionKind::Slide => {
            let c1 = pair.sample_a([uv[0] + p, uv[1]]);
            let c2 = pair.sample_b([uv[0] - (1.0 - p), uv[1]]);
            mix(c1, c2, step(1.0 - p, uv[0]))
        }
        TransitionKind::Liquid => {
            let p2 = ((p - uv[1] * 0.2) / 0.8).clamp(0.0, 1.0);
            let distortion = (uv[1] * 10.0 + p * 5.0).sin() * 0.02 * (1.0 - p2) * p2;
            pair.blend([uv[0] + distortion, uv[1]], p2)
        }
        TransitionKind::Glitch => {
            let mut uv1 = get_uv(uv, u.zoom_a, u.focal_a);
            let mut uv2 = get_uv(uv, u.zoom_b, u.focal_b);
            let noise = rand([(uv[1] * 20.0).floor(), p]);
            if noise > 0.9 && p > 0.1 && p < 0.9 {
                let jitter = (rand([p, p]) - 0.5) * 0.1;
                uv1[0] += jitter;
                uv2[0] += jitter;
            }
            if rand(uv) > p {
                a.sample(uv1)
            } else {
                b.sample(uv2)
            }
        }
        TransitionKind::Pixelate => {
            let squares = 1000.0 + (15.0 - 1000.0) * (p * PI).sin();
            let block = [
                (uv[0] * squares).floor() / squares,
                (uv[1] * squares).floor() / squares,
            ];
            pair.blend(block, p)
        }
        TransitionKind::Swirl => {
            let angle = 10.0 * (p * PI).sin();
            let mut tc = [uv[0] - 0.5, uv[1] - 0.5];
            let dist = (tc[0] * tc[0] + tc[1] * tc[1]).sqrt();
            if dist < 1.0 {
                let percent = 1.0 - dist;
                let theta = percent * percent * angle;
                let (s, c) = theta.sin_cos();
                tc = [tc[0] * c - tc[1] * s, tc[0] * s + tc[1] * c];
            }
            pair.blend([tc[0] + 0.5, tc[1] + 0.5], p)
        }
        TransitionKind::Flash => {
            let tex = pair.blend(uv, step(0.5, p));
            mix(tex, WHITE, (p * PI).sin() * 0.9)
        }
        TransitionKind::ZoomBlur => {
            let dir = [uv[0] - 0.5, uv[1] - 0.5];
            let strength = (p * PI).sin() * 0.1;
            let mut acc = [0.0f32; 4];
            for i in 0..ZOOM_BLUR_TAPS {
                let t = i as f32 / ZOOM_BLUR_TAPS as f32;
                let tap = [uv[0] - dir[0] * strength * t, uv[1] - dir[1] * strength * t];
                let c = pair.blend(tap, p);
                for (acc, c) in acc.iter_mut().zip(c) {
                    *acc += c;
                }
            }
            acc.map(|c| c / ZOOM_BLUR_TAPS as f32)
        }
        TransitionKind::Kaleido => {
            let tc = [uv[0] - 0.5, uv[1] - 0.5];
            let radius = (tc[0] * tc[0] + tc[1] * tc[1]).sqrt();
            let segments = 6.0 + (p * PI).sin() * 4.0;
            let mut angle = tc[1].atan2(tc[0]);
            angle = glsl_mod(angle, PI * 2.0 / segments);
            angle = (angle - PI / segments).abs();
            pair.blend([0.5 + angle.cos() * radius, 0.5 + angle.sin() * radius], p)
        }
    }
}

/// Clamp to `[0, 1]` and quantize to 8 bits.
pub fn to_rgba8(c: Rgba) -> [u8; 4] {
    c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_core::Color;

    fn uniforms(p: f32) -> FrameUniforms {
        FrameUniforms {
            progress: p,
            zoom_a: 1.0,
            zoom_b: 1.0,
            _pad: 0.0,
            focal_a: [0.5, 0.5],
            focal_b: [0.5, 0.5],
        }
    }

    fn red() -> FrameBuffer {
        FrameBuffer::solid(4, 4, &Color::rgb(1.0, 0.0, 0.0))
    }

    fn blue() -> FrameBuffer {
        FrameBuffer::solid(4, 4, &Color::rgb(0.0, 0.0, 1.0))
    }

    #[test]
    fn test_rand_is_unit_interval() {
        for i in 0..200 {
            let v = rand([i as f32 * 0.013, 0.77]);
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_get_uv_zooms_about_center() {
        assert_eq!(get_uv([0.5, 0.5], 2.0, [0.5, 0.5]), [0.5, 0.5]);
        assert_eq!(get_uv([1.0, 0.0], 2.0, [0.5, 0.5]), [0.75, 0.25]);
        // focal point stays fixed under any zoom
        assert_eq!(get_uv([0.2, 0.8], 3.0, [0.2, 0.8]), [0.2, 0.8]);
    }

    #[test]
    fn test_sample_is_exact_at_texel_centers() {
        let mut frame = FrameBuffer::checkerboard(4, 4, 1);
        frame.set_pixel(2, 1, [10, 200, 30, 255]);
        let tex = Texture::new(&frame);
        let c = tex.sample([2.5 / 4.0, 1.5 / 4.0]);
        assert_eq!(to_rgba8(c), [10, 200, 30, 255]);
    }

    #[test]
    fn test_sample_clamps_to_edge() {
        let frame = red();
        let tex = Texture::new(&frame);
        assert_eq!(to_rgba8(tex.sample([-3.0, 7.0])), [255, 0, 0, 255]);
    }

    #[test]
    fn test_glsl_mod_sign() {
        assert!((glsl_mod(-1.0, 3.0) - 2.0).abs() < 1e-6);
        assert!((glsl_mod(4.0, 3.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_every_kind_shows_a_at_zero_and_b_at_one() {
        let (a, b) = (red(), blue());
        for kind in TransitionKind::ALL {
            let at = |p: f32| {
                to_rgba8(shade(kind, [0.375, 0.625], &uniforms(p), Texture::new(&a), Texture::new(&b)))
            };
            assert_eq!(at(0.0), [255, 0, 0, 255], "{kind} at 0");
            assert_eq!(at(1.0), [0, 0, 255, 255], "{kind} at 1");
        }
    }

    #[test]
    fn test_cut_switches_hard() {
        let (a, b) = (red(), blue());
        let at = |p: f32| {
            to_rgba8(shade(TransitionKind::Cut, [0.5, 0.5], &uniforms(p), Texture::new(&a), Texture::new(&b)))
        };
        assert_eq!(at(0.5), [255, 0, 0, 255]);
        assert_eq!(at(0.500_1), [0, 0, 255, 255]);
    }

    #[test]
    fn test_slide_boundary_tracks_progress() {
        let (a, b) = (red(), blue());
        let at = |x: f32| {
            to_rgba8(shade(TransitionKind::Slide, [x, 0.5], &uniforms(0.25), Texture::new(&a), Texture::new(&b)))
        };
        // boundary at 1 - p = 0.75
        assert_eq!(at(0.7), [255, 0, 0, 255]);
        assert_eq!(at(0.8), [0, 0, 255, 255]);
    }

    /// 256x256 with red = column and green = row, so a sample reads back its
    /// own texel coordinate.
    fn coords() -> FrameBuffer {
        let mut frame = FrameBuffer::new(256, 256, reelkit_core::PixelFormat::Rgba8);
        for y in 0..256 {
            for x in 0..256 {
                frame.set_pixel(x, y, [x as u8, y as u8, 0, 255]);
            }
        }
        frame
    }

    /// The texel coordinate a shaded `coords()` pixel was sampled from.
    fn sampled_at(kind: TransitionKind, uv: [f32; 2], p: f32, frame: &FrameBuffer) -> [f32; 2] {
        let tex = Texture::new(frame);
        let c = shade(kind, uv, &uniforms(p), tex, tex);
        [c[0] * 255.0, c[1] * 255.0]
    }

    fn assert_near(got: [f32; 2], want: [f32; 2]) {
        assert!(
            (got[0] - want[0]).abs() < 0.05 && (got[1] - want[1]).abs() < 0.05,
            "sampled {got:?}, expected {want:?}"
        );
    }

    #[test]
    fn test_liquid_lower_rows_lag_behind() {
        let (a, b) = (red(), blue());
        let at = |y: f32, p: f32| {
            to_rgba8(shade(TransitionKind::Liquid, [0.5, y], &uniforms(p), Texture::new(&a), Texture::new(&b)))
        };
        // row progress is (p - 0.2y) / 0.8: 0.625 at the top, 0.375 at the bottom
        assert_eq!(at(0.0, 0.5), [96, 0, 159, 255]);
        assert_eq!(at(1.0, 0.5), [159, 0, 96, 255]);
        // the bottom row has not started yet
        assert_eq!(at(1.0, 0.2), [255, 0, 0, 255]);
    }

    #[test]
    fn test_glitch_picks_whole_pixels_by_noise() {
        let (a, b) = (red(), blue());
        let mut from_b = 0;
        for y in 0..64 {
            for x in 0..64 {
                let uv = [(x as f32 + 0.5) / 64.0, (y as f32 + 0.5) / 64.0];
                let c = to_rgba8(shade(TransitionKind::Glitch, uv, &uniforms(0.3), Texture::new(&a), Texture::new(&b)));
                let expected = if rand(uv) > 0.3 { [255, 0, 0, 255] } else { [0, 0, 255, 255] };
                assert_eq!(c, expected, "at {uv:?}");
                if c[2] == 255 {
                    from_b += 1;
                }
            }
        }
        let share = from_b as f32 / 4096.0;
        assert!((0.2..0.4).contains(&share), "{share} of pixels from b");
    }

    #[test]
    fn test_pixelate_peaks_at_fifteen_blocks() {
        let frame = coords();
        // 15 blocks per axis at p = 0.5: [0, 1/15) collapses to its corner
        let first = sampled_at(TransitionKind::Pixelate, [0.01, 0.01], 0.5, &frame);
        assert_eq!(first, sampled_at(TransitionKind::Pixelate, [0.06, 0.06], 0.5, &frame));
        assert_ne!(first, sampled_at(TransitionKind::Pixelate, [0.07, 0.01], 0.5, &frame));
        let second = sampled_at(TransitionKind::Pixelate, [0.1, 0.5], 0.5, &frame);
        assert_near(second, [256.0 / 15.0 - 0.5, 7.0 * 256.0 / 15.0 - 0.5]);
        // near the ends the blocks are a fraction of a texel
        assert_ne!(
            sampled_at(TransitionKind::Pixelate, [0.01, 0.01], 0.0, &frame),
            sampled_at(TransitionKind::Pixelate, [0.06, 0.06], 0.0, &frame)
        );
    }

    #[test]
    fn test_swirl_rotates_by_distance_from_center() {
        let frame = coords();
        // angle 10 rad at p = 0.5; a quarter out from the center turns by
        // (1 - 0.25)^2 * 10 rad
        assert_near(sampled_at(TransitionKind::Swirl, [0.75, 0.5], 0.5, &frame), [178.13, 88.35]);
        assert_near(sampled_at(TransitionKind::Swirl, [0.5, 0.5], 0.5, &frame), [127.5, 127.5]);
        // no rotation at the ends
        assert_near(sampled_at(TransitionKind::Swirl, [0.75, 0.5], 0.0, &frame), [191.5, 127.5]);
    }

    #[test]
    fn test_zoom_blur_smears_toward_center() {
        let frame = coords();
        // eight taps pulled in by up to 0.1 * 7/8 of the offset from the center
        assert_near(sampled_at(TransitionKind::ZoomBlur, [0.95, 0.5], 0.5, &frame), [237.66, 127.5]);
        // the center has nothing to smear
        assert_near(sampled_at(TransitionKind::ZoomBlur, [0.5, 0.5], 0.5, &frame), [127.5, 127.5]);
        assert_near(sampled_at(TransitionKind::ZoomBlur, [0.95, 0.5], 0.0, &frame), [242.7, 127.5]);
    }

    #[test]
    fn test_kaleido_mirrors_segments() {
        let frame = coords();
        let polar = |angle: f32| [0.5 + 0.2 * angle.cos(), 0.5 + 0.2 * angle.sin()];
        // ten segments at p = 0.5
        let segment = PI * 2.0 / 10.0;
        let base = sampled_at(TransitionKind::Kaleido, polar(0.2), 0.5, &frame);
        assert_near(base, [178.37, 133.33]);
        assert_near(sampled_at(TransitionKind::Kaleido, polar(-0.2), 0.5, &frame), base);
        assert_near(sampled_at(TransitionKind::Kaleido, polar(0.2 + segment), 0.5, &frame), base);
        assert_near(sampled_at(TransitionKind::Kaleido, polar(0.2 + 3.0 * segment), 0.5, &frame), base);
    }

    #[test]
    fn test_flash_peaks_near_white() {
        let (a, b) = (red(), blue());
        let c = shade(TransitionKind::Flash, [0.5, 0.5], &uniforms(0.5), Texture::new(&a), Texture::new(&b));
        assert!(c.iter().all(|&v| v > 0.89));
    }
}
