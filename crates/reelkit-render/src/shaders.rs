//! WGSL sources for the transition programs.
//!
//! Every program shares [`PRELUDE`] (uniform block, bindings, full-screen
//! triangle, `rand` and `get_uv`) and adds one `fs_main`.

use reelkit_core::TransitionKind;

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

pub const PRELUDE: &str = r#"
struct Uniforms {
    progress: f32,
    zoom_a: f32,
    zoom_b: f32,
    _pad: f32,
    focal_a: vec2<f32>,
    focal_b: vec2<f32>,
};

@group(0) @binding(0) var tex_a: texture_2d<f32>;
@group(0) @binding(1) var tex_b: texture_2d<f32>;
@group(0) @binding(2) var samp: sampler;
@group(0) @binding(3) var<uniform> u: Uniforms;

const PI: f32 = 3.14159265;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VsOut {
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    var out: VsOut;
    out.position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}

fn rand(co: vec2<f32>) -> f32 {
    return fract(sin(dot(co, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}

fn get_uv(uv: vec2<f32>, zoom: f32, center: vec2<f32>) -> vec2<f32> {
    return (uv - center) / zoom + center;
}

fn sample_a(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(tex_a, samp, get_uv(uv, u.zoom_a, u.focal_a), 0.0);
}

fn sample_b(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(tex_b, samp, get_uv(uv, u.zoom_b, u.focal_b), 0.0);
}

fn blend(uv: vec2<f32>, t: f32) -> vec4<f32> {
    return mix(sample_a(uv), sample_b(uv), t);
}

fn glsl_mod(x: f32, y: f32) -> f32 {
    return x - y * floor(x / y);
}
"#;

const FADE: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return blend(in.uv, u.progress);
}
"#;

const CUT: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    if (u.progress > 0.5) {
        return sample_b(in.uv);
    }
    return sample_a(in.uv);
}
"#;

const DISSOLVE: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let a = sample_a(in.uv);
    let b = sample_b(in.uv);
    return select(b, a, rand(in.uv) > u.progress);
}
"#;

const SLIDE: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let p = u.progress;
    let c1 = sample_a(in.uv + vec2<f32>(p, 0.0));
    let c2 = sample_b(in.uv - vec2<f32>(1.0 - p, 0.0));
    return mix(c1, c2, step(1.0 - p, in.uv.x));
}
"#;

const LIQUID: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let uv = in.uv;
    let p = clamp((u.progress - uv.y * 0.2) / 0.8, 0.0, 1.0);
    let distortion = sin(uv.y * 10.0 + u.progress * 5.0) * 0.02 * (1.0 - p) * p;
    return blend(uv + vec2<f32>(distortion, 0.0), p);
}
"#;

const GLITCH: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let uv = in.uv;
    let p = u.progress;
    var uv1 = get_uv(uv, u.zoom_a, u.focal_a);
    var uv2 = get_uv(uv, u.zoom_b, u.focal_b);
    let noise = rand(vec2<f32>(floor(uv.y * 20.0), p));
    if (noise > 0.9 && p > 0.1 && p < 0.9) {
        let jitter = (rand(vec2<f32>(p, p)) - 0.5) * 0.1;
        uv1.x += jitter;
        uv2.x += jitter;
    }
    let a = textureSampleLevel(tex_a, samp, uv1, 0.0);
    let b = textureSampleLevel(tex_b, samp, uv2, 0.0);
    return select(b, a, rand(uv) > p);
}
"#;

const PIXELATE: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let p = u.progress;
    let squares = mix(1000.0, 15.0, sin(p * PI));
    return blend(floor(in.uv * squares) / squares, p);
}
"#;

const SWIRL: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let p = u.progress;
    let angle = 10.0 * sin(p * PI);
    var tc = in.uv - vec2<f32>(0.5, 0.5);
    let dist = length(tc);
    if (dist < 1.0) {
        let percent = 1.0 - dist;
        let theta = percent * percent * angle;
        let s = sin(theta);
        let c = cos(theta);
        tc = vec2<f32>(dot(tc, vec2<f32>(c, -s)), dot(tc, vec2<f32>(s, c)));
    }
    return blend(tc + vec2<f32>(0.5, 0.5), p);
}
"#;

const FLASH: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let p = u.progress;
    let tex = blend(in.uv, step(0.5, p));
    return mix(tex, vec4<f32>(1.0), sin(p * PI) * 0.9);
}
"#;

const ZOOM_BLUR: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let p = u.progress;
    let dir = in.uv - vec2<f32>(0.5, 0.5);
    let strength = sin(p * PI) * 0.1;
    var color = vec4<f32>(0.0);
    for (var i = 0; i < 8; i++) {
        let t = f32(i) / 8.0;
        color += blend(in.uv - dir * strength * t, p);
    }
    return color / 8.0;
}
"#;

const KALEIDO: &str = r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let p = u.progress;
    let tc = in.uv - vec2<f32>(0.5, 0.5);
    let radius = length(tc);
    let segments = 6.0 + sin(p * PI) * 4.0;
    var angle = atan2(tc.y, tc.x);
    angle = glsl_mod(angle, PI * 2.0 / segments);
    angle = abs(angle - PI / segments);
    return blend(vec2<f32>(0.5, 0.5) + vec2<f32>(cos(angle), sin(angle)) * radius, p);
}
"#;

fn fragment_body(kind: TransitionKind) -> &'static str {
    match kind {
        TransitionKind::Fade => FADE,
        TransitionKind::Cut => CUT,
        TransitionKind::Dissolve => DISSOLVE,
        TransitionKind::Slide => SLIDE,
        TransitionKind::Liquid => LIQUID,
        TransitionKind::Glitch => GLITCH,
        TransitionKind::Pixelate => PIXELATE,
        TransitionKind::Swirl => SWIRL,
        TransitionKind::Flash => FLASH,
        TransitionKind::ZoomBlur => ZOOM_BLUR,
        TransitionKind::Kaleido => KALEIDO,
    }
}

/// Complete WGSL module for `kind`.
pub fn program_source(kind: TransitionKind) -> String {
    format!("{}{}", PRELUDE, fragment_body(kind))
}

/// Label used for the program's GPU objects and in build errors.
pub fn program_label(kind: TransitionKind) -> String {
    format!("transition_{}", kind.name().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_one_fragment_entry() {
        for kind in TransitionKind::ALL {
            let src = program_source(kind);
            assert_eq!(src.matches("fn fs_main").count(), 1, "{kind}");
            assert_eq!(src.matches("fn vs_main").count(), 1, "{kind}");
        }
    }

    #[test]
    fn test_programs_are_distinct() {
        let mut bodies: Vec<&str> = TransitionKind::ALL.iter().map(|k| fragment_body(*k)).collect();
        bodies.sort_unstable();
        bodies.dedup();
        assert_eq!(bodies.len(), TransitionKind::ALL.len());
    }

    #[test]
    fn test_program_label() {
        assert_eq!(program_label(TransitionKind::ZoomBlur), "transition_zoom_blur");
    }
}
