use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::{RendererConfig, ShaderCompiler, ShaderLanguage, ShaderStage};

/// Outcome reported by the compiler front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Success,
    PreprocessFailed,
    ParseFailed,
    LinkFailed,
}

impl fmt::Display for CompileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileStatus::Success => f.write_str("success"),
            CompileStatus::PreprocessFailed => f.write_str("preprocessing failed"),
            CompileStatus::ParseFailed => f.write_str("parsing failed"),
            CompileStatus::LinkFailed => f.write_str("linking failed"),
        }
    }
}

/// A failed compile, carrying the diagnostic log for the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {status}\n{log}")]
pub struct CompileError {
    pub name: String,
    pub status: CompileStatus,
    pub log: String,
}

/// Source text plus everything the front end needs to turn it into SPIR-V.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub source: &'a str,
    /// Display name used in diagnostics, usually the file path.
    pub name: &'a str,
    pub stage: ShaderStage,
    pub language: ShaderLanguage,
    pub entry_point: &'a str,
}

/// Raw compiler result: status, byte-code (empty on failure) and log text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub status: CompileStatus,
    pub code: Vec<u32>,
    pub log: String,
}

impl CompileOutput {
    fn failed(status: CompileStatus, log: impl Into<String>) -> Self {
        Self {
            status,
            code: Vec::new(),
            log: log.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CompileStatus::Success
    }

    /// Returns the byte-code on success, or the diagnostics as an error.
    pub fn into_result(self, name: &str) -> Result<Vec<u32>, CompileError> {
        match self.status {
            CompileStatus::Success => Ok(self.code),
            status => Err(CompileError {
                name: name.to_string(),
                status,
                log: self.log,
            }),
        }
    }
}

/// Compiles one shader stage with the requested backend.
pub fn compile(compiler: ShaderCompiler, request: &CompileRequest<'_>) -> CompileOutput {
    tracing::debug!(
        name = request.name,
        stage = %request.stage,
        language = %request.language,
        %compiler,
        "compiling shader"
    );
    match compiler {
        ShaderCompiler::NagaGlsl => compile_naga(request),
        ShaderCompiler::Shaderc => compile_shaderc(request),
    }
}

/// Convenience wrapper turning a failed status into [`CompileError`].
pub fn compile_to_spirv(
    compiler: ShaderCompiler,
    request: &CompileRequest<'_>,
) -> Result<Vec<u32>, CompileError> {
    compile(compiler, request).into_result(request.name)
}

/// Reads a shader file and compiles it. The language is inferred from the
/// extension unless `language` forces one.
pub fn compile_file(
    compiler: ShaderCompiler,
    path: &Path,
    stage: ShaderStage,
    language: Option<ShaderLanguage>,
    entry_point: &str,
) -> Result<Vec<u32>> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read shader {}", path.display()))?;
    let name = path.display().to_string();
    let request = CompileRequest {
        source: &source,
        name: &name,
        stage,
        language: language.unwrap_or_else(|| ShaderLanguage::from_path(path)),
        entry_point,
    };
    Ok(compile_to_spirv(compiler, &request)?)
}

/// Compiles the built-in shader for `stage`.
pub fn compile_builtin(
    compiler: ShaderCompiler,
    stage: ShaderStage,
) -> Result<Vec<u32>, CompileError> {
    let (source, name) = match stage {
        ShaderStage::Vertex => (DEFAULT_VERTEX_GLSL, "<builtin vertex>"),
        ShaderStage::Fragment => (DEFAULT_FRAGMENT_GLSL, "<builtin fragment>"),
    };
    compile_to_spirv(
        compiler,
        &CompileRequest {
            source,
            name,
            stage,
            language: ShaderLanguage::Glsl,
            entry_point: "main",
        },
    )
}

/// Compiles whichever source the configuration names for `stage`, falling
/// back to the built-in shader when it names none.
pub fn compile_configured(config: &RendererConfig, stage: ShaderStage) -> Result<Vec<u32>> {
    let path = match stage {
        ShaderStage::Vertex => config.vertex_source.as_deref(),
        ShaderStage::Fragment => config.fragment_source.as_deref(),
    };
    match path {
        Some(path) => compile_file(
            config.shader_compiler,
            path,
            stage,
            config.language,
            &config.entry_point,
        ),
        None => Ok(compile_builtin(config.shader_compiler, stage)?),
    }
}

fn compile_naga(request: &CompileRequest<'_>) -> CompileOutput {
    use naga::back::spv;
    use naga::front::glsl;
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    if request.language != ShaderLanguage::Glsl {
        return CompileOutput::failed(
            CompileStatus::ParseFailed,
            "naga only accepts GLSL; rebuild with the `shaderc` feature for HLSL",
        );
    }

    let stage = match request.stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let mut frontend = glsl::Frontend::default();
    let module = match frontend.parse(&glsl::Options::from(stage), request.source) {
        Ok(module) => module,
        Err(errors) => {
            let preprocess = errors
                .errors
                .iter()
                .any(|error| matches!(error.kind, glsl::ErrorKind::PreprocessorError(_)));
            let status = if preprocess {
                CompileStatus::PreprocessFailed
            } else {
                CompileStatus::ParseFailed
            };
            let log = describe_glsl_errors(&errors.errors, request.name, request.source);
            return CompileOutput::failed(status, log);
        }
    };

    let info = match Validator::new(ValidationFlags::all(), Capabilities::all()).validate(&module)
    {
        Ok(info) => info,
        Err(error) => {
            return CompileOutput::failed(CompileStatus::LinkFailed, error_chain(error.as_inner()))
        }
    };

    let mut options = spv::Options::default();
    options
        .flags
        .remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);
    let pipeline = spv::PipelineOptions {
        shader_stage: stage,
        entry_point: request.entry_point.to_string(),
    };
    match spv::write_vec(&module, &info, &options, Some(&pipeline)) {
        Ok(code) => CompileOutput {
            status: CompileStatus::Success,
            code,
            log: String::new(),
        },
        Err(error) => CompileOutput::failed(CompileStatus::LinkFailed, error.to_string()),
    }
}

fn describe_glsl_errors(errors: &[naga::front::glsl::Error], name: &str, source: &str) -> String {
    errors
        .iter()
        .map(|error| match error.meta.to_range() {
            Some(range) => {
                let line = source
                    .get(..range.start)
                    .map_or(0, |prefix| prefix.matches('\n').count())
                    + 1;
                format!("{name}:{line}: {}", error.kind)
            }
            None => format!("{name}: {}", error.kind),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut log = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        log.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    log
}

#[cfg(feature = "shaderc")]
fn compile_shaderc(request: &CompileRequest<'_>) -> CompileOutput {
    let compiler = match shaderc::Compiler::new() {
        Ok(compiler) => compiler,
        Err(err) => {
            return CompileOutput::failed(
                CompileStatus::ParseFailed,
                format!("shaderc unavailable: {err}"),
            )
        }
    };
    let mut options = match shaderc::CompileOptions::new() {
        Ok(options) => options,
        Err(err) => {
            return CompileOutput::failed(
                CompileStatus::ParseFailed,
                format!("shaderc options unavailable: {err}"),
            )
        }
    };
    options.set_source_language(match request.language {
        ShaderLanguage::Glsl => shaderc::SourceLanguage::GLSL,
        ShaderLanguage::Hlsl => shaderc::SourceLanguage::HLSL,
    });
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    options.set_auto_bind_uniforms(true);
    options.set_generate_debug_info();

    let kind = match request.stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
    };

    if let Err(err) = compiler.preprocess(
        request.source,
        request.name,
        request.entry_point,
        Some(&options),
    ) {
        return CompileOutput::failed(CompileStatus::PreprocessFailed, err.to_string());
    }

    match compiler.compile_into_spirv(
        request.source,
        kind,
        request.name,
        request.entry_point,
        Some(&options),
    ) {
        Ok(artifact) => CompileOutput {
            status: CompileStatus::Success,
            code: artifact.as_binary().to_vec(),
            log: artifact.get_warning_messages(),
        },
        Err(shaderc::Error::CompilationError(_, log)) if log.contains("link") => {
            CompileOutput::failed(CompileStatus::LinkFailed, log)
        }
        Err(err) => CompileOutput::failed(CompileStatus::ParseFailed, err.to_string()),
    }
}

#[cfg(not(feature = "shaderc"))]
fn compile_shaderc(_request: &CompileRequest<'_>) -> CompileOutput {
    CompileOutput::failed(
        CompileStatus::ParseFailed,
        "shaderc support is not enabled in this build",
    )
}

/// Fullscreen triangle; `v_uv` spans 0..1 across the viewport.
pub const DEFAULT_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

void main() {
    int index = gl_VertexIndex;
    v_uv = vec2(float((index << 1) & 2), float(index & 2));
    gl_Position = vec4(v_uv * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Shown until the user's shader compiles.
///
/// Binding 0 matches [`crate::FrameUniforms`]; binding 1 pairs a texture with a
/// sampler so it reflects as one combined image sampler under either compiler.
pub const DEFAULT_FRAGMENT_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;

layout(set = 0, binding = 0) uniform FrameUniforms {
    vec4 resolution;
    vec4 mouse;
    vec4 date;
    float time;
    float time_delta;
    float frame_index;
    float padding;
} frame;

layout(set = 0, binding = 1) uniform texture2D channel0_texture;
layout(set = 0, binding = 1) uniform sampler channel0_sampler;

void main() {
    vec2 uv = v_uv;
    vec3 wave = 0.5 + 0.5 * cos(frame.time + uv.xyx + vec3(0.0, 2.0, 4.0));
    vec3 texel = texture(sampler2D(channel0_texture, channel0_sampler), uv * 4.0).rgb;
    out_color = vec4(mix(wave, texel, 0.15), 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect;
    use crate::types::{Binding, BindingKind};

    fn request(source: &str, stage: ShaderStage) -> CompileRequest<'_> {
        CompileRequest {
            source,
            name: "test.glsl",
            stage,
            language: ShaderLanguage::Glsl,
            entry_point: "main",
        }
    }

    #[test]
    fn naga_compiles_uniform_block_fragment() {
        let source = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;
layout(set = 0, binding = 0) uniform Params {
    vec4 tint;
    float time;
} params;
void main() {
    out_color = params.tint * (v_uv.x + params.time);
}
";
        let output = compile(
            ShaderCompiler::NagaGlsl,
            &request(source, ShaderStage::Fragment),
        );
        assert!(output.is_success(), "{}", output.log);

        let reflection = reflect::reflect(&output.code).unwrap();
        assert_eq!(reflection.stage, ShaderStage::Fragment);
        assert_eq!(reflection.bindings.len(), 1);
        let Binding {
            index,
            kind,
            byte_size,
            ..
        } = &reflection.bindings[0];
        assert_eq!(*index, 0);
        assert_eq!(*kind, BindingKind::UniformBuffer);
        assert_eq!(*byte_size, Some(32));
    }

    #[test]
    fn naga_compiles_default_vertex_shader() {
        let output = compile(
            ShaderCompiler::NagaGlsl,
            &request(DEFAULT_VERTEX_GLSL, ShaderStage::Vertex),
        );
        assert!(output.is_success(), "{}", output.log);
        assert!(reflect::extract(&output.code).unwrap().is_empty());
    }

    #[test]
    fn syntax_errors_surface_as_parse_failures() {
        let source = "#version 450\nvoid main() { this is not glsl }\n";
        let err = compile_to_spirv(
            ShaderCompiler::NagaGlsl,
            &request(source, ShaderStage::Fragment),
        )
        .unwrap_err();
        assert_eq!(err.status, CompileStatus::ParseFailed);
        assert!(!err.log.is_empty());
        assert!(err.to_string().starts_with("test.glsl: parsing failed"));
    }

    #[test]
    fn builtin_fragment_exposes_frame_block_and_texture() {
        let code = compile_builtin(ShaderCompiler::NagaGlsl, ShaderStage::Fragment).unwrap();
        let bindings = reflect::extract(&code).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].kind, BindingKind::UniformBuffer);
        assert_eq!(
            bindings[0].byte_size,
            Some(std::mem::size_of::<crate::FrameUniforms>() as u32)
        );
        assert_eq!(bindings[1].kind, BindingKind::CombinedImageSampler);
    }

    #[test]
    fn configured_file_is_read_and_compiled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.frag");
        fs::write(
            &path,
            "#version 450\nlayout(location = 0) out vec4 c;\nvoid main() { c = vec4(1.0); }\n",
        )
        .unwrap();
        let config = RendererConfig {
            fragment_source: Some(path),
            shader_compiler: ShaderCompiler::NagaGlsl,
            ..RendererConfig::default()
        };
        let code = compile_configured(&config, ShaderStage::Fragment).unwrap();
        assert_eq!(reflect::reflect(&code).unwrap().stage, ShaderStage::Fragment);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = compile_file(
            ShaderCompiler::NagaGlsl,
            Path::new("/nonexistent/shader.frag"),
            ShaderStage::Fragment,
            None,
            "main",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/shader.frag"));
    }

    #[test]
    fn naga_rejects_hlsl() {
        let mut req = request("float4 main() : SV_Target { return 1; }", ShaderStage::Fragment);
        req.language = ShaderLanguage::Hlsl;
        let output = compile(ShaderCompiler::NagaGlsl, &req);
        assert_eq!(output.status, CompileStatus::ParseFailed);
        assert!(output.code.is_empty());
    }
}
