//! WGSL sources for the batch and cover programs.
//!
//! The batch program is generated per texture-unit count: one
//! `texture_2d` binding per slot and a `switch` in the fragment stage picking
//! the slot named by the vertex. Cover programs are a fixed header plus a
//! filter fragment (see [`crate::filter`]).

use std::fmt::Write as _;

use super::error::BackendError;

/// Bind group 0, binding index of slot 0 in the batch program.
pub(crate) const BATCH_FIRST_TEXTURE_BINDING: u32 = 2;

const BATCH_HEADER: &str = r#"
struct Globals {
    projection: vec4<f32>,
}

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) @interpolate(flat) slot: u32,
    @location(2) alpha: f32,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var tex_sampler: sampler;
"#;

const BATCH_VERTEX: &str = r#"
@vertex
fn vs_main(
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) slot: f32,
    @location(3) alpha: f32,
) -> VsOut {
    var o: VsOut;
    o.position = vec4<f32>(position * globals.projection.xy + globals.projection.zw, 0.0, 1.0);
    o.uv = uv;
    o.slot = u32(max(slot, 0.0) + 0.5);
    o.alpha = alpha;
    return o;
}
"#;

/// Batch program sampling `units` texture slots.
pub fn batch_program_source(units: u32) -> String {
    let mut src = String::with_capacity(1024 + units as usize * 160);
    src.push_str(BATCH_HEADER);
    for i in 0..units {
        let _ = writeln!(
            src,
            "@group(0) @binding({}) var tex{i}: texture_2d<f32>;",
            BATCH_FIRST_TEXTURE_BINDING + i
        );
    }
    src.push_str(BATCH_VERTEX);

    src.push_str(
        "\n@fragment\nfn fs_main(v: VsOut) -> @location(0) vec4<f32> {\n    var color = vec4<f32>(0.0);\n    switch v.slot {\n",
    );
    for i in 0..units {
        let _ = writeln!(
            src,
            "        case {i}u: {{ color = textureSampleLevel(tex{i}, tex_sampler, v.uv, 0.0); }}"
        );
    }
    src.push_str("        default: { }\n    }\n    return color * v.alpha;\n}\n");
    src
}

// ── cover ─────────────────────────────────────────────────────────────────

/// Size of the per-draw globals of cover programs.
pub(crate) const COVER_GLOBALS_SIZE: u64 = 16;

const COVER_HEADER: &str = r#"
struct CoverGlobals {
    texel: vec2<f32>,
    alpha: f32,
    _pad: f32,
}

struct CoverOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;
@group(0) @binding(2) var<uniform> cover: CoverGlobals;
@group(1) @binding(0) var<uniform> params: FilterParams;

fn sample_src(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(src_tex, src_sampler, uv, 0.0);
}

fn texel_size() -> vec2<f32> {
    return cover.texel;
}

@vertex
fn vs_cover(@builtin(vertex_index) index: u32) -> CoverOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let c = corners[index % 6u];
    var o: CoverOut;
    o.position = vec4<f32>(c.x * 2.0 - 1.0, 1.0 - c.y * 2.0, 0.0, 1.0);
    o.uv = c;
    return o;
}

@fragment
fn fs_cover(v: CoverOut) -> @location(0) vec4<f32> {
    return filter_main(v.uv) * cover.alpha;
}
"#;

/// Straight copy of the source; used to composite filtered output.
pub const COPY_FRAGMENT: &str = r#"
struct FilterParams {
    unused: vec4<f32>,
}

fn filter_main(uv: vec2<f32>) -> vec4<f32> {
    return sample_src(uv);
}
"#;

/// Full cover program for a filter fragment.
pub fn cover_program_source(fragment: &str) -> String {
    let mut src = String::with_capacity(COVER_HEADER.len() + fragment.len());
    src.push_str(COVER_HEADER);
    src.push_str(fragment);
    src
}

// ── validation ────────────────────────────────────────────────────────────

/// Parses and validates WGSL, reporting failures as shader compile errors.
pub fn validate_wgsl(source: &str) -> Result<naga::Module, BackendError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| BackendError::ShaderCompile(e.emit_to_string(source)))?;
    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| BackendError::ShaderCompile(format!("{e:?}")))?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{BoxBlurFilter, ColorFilter, ColorMatrixFilter, Filter};

    #[test]
    fn batch_programs_validate() {
        for units in [1, 4, 8, 16] {
            let src = batch_program_source(units);
            validate_wgsl(&src).unwrap_or_else(|e| panic!("{units} units: {e}"));
            assert_eq!(src.matches("texture_2d<f32>").count(), units as usize);
        }
    }

    #[test]
    fn copy_program_validates() {
        validate_wgsl(&cover_program_source(COPY_FRAGMENT)).unwrap();
    }

    #[test]
    fn filter_programs_validate() {
        let filters: Vec<Box<dyn Filter>> = vec![
            Box::new(BoxBlurFilter::new(4.0, 2.0, 2)),
            Box::new(ColorFilter::multiply(0.5, 1.0, 1.0, 1.0)),
            Box::new(ColorMatrixFilter::saturation(0.2)),
        ];
        for f in &filters {
            for pass in 0..f.pass_count() {
                let src = cover_program_source(&f.fragment_source(pass));
                validate_wgsl(&src).unwrap_or_else(|e| panic!("{} pass {pass}: {e}", f.name()));
            }
        }
    }

    #[test]
    fn broken_source_is_a_compile_error() {
        assert!(matches!(
            validate_wgsl("fn broken( {"),
            Err(BackendError::ShaderCompile(_))
        ));
    }
}
