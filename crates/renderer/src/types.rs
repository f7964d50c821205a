use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Pipeline stage a shader module (and its bindings) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Source language handed to the compiler collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderLanguage {
    #[default]
    Glsl,
    Hlsl,
}

impl ShaderLanguage {
    /// Picks a language from a file extension; anything but `.hlsl` is GLSL.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("hlsl") => ShaderLanguage::Hlsl,
            _ => ShaderLanguage::Glsl,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ShaderLanguage::Glsl => "glsl",
            ShaderLanguage::Hlsl => "hlsl",
        }
    }
}

impl fmt::Display for ShaderLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Shader compilation backend requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderCompiler {
    /// Compile GLSL or HLSL through shaderc into SPIR-V.
    Shaderc,
    /// Hand GLSL to naga's frontend and write SPIR-V with its backend.
    NagaGlsl,
}

impl Default for ShaderCompiler {
    fn default() -> Self {
        if cfg!(feature = "shaderc") {
            ShaderCompiler::Shaderc
        } else {
            ShaderCompiler::NagaGlsl
        }
    }
}

impl fmt::Display for ShaderCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderCompiler::Shaderc => f.write_str("shaderc"),
            ShaderCompiler::NagaGlsl => f.write_str("naga"),
        }
    }
}

/// Descriptor kinds the engine knows how to back with resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::UniformBuffer => f.write_str("uniform buffer"),
            BindingKind::CombinedImageSampler => f.write_str("combined image sampler"),
        }
    }
}

/// A resource slot declared by a compiled shader.
///
/// Produced fresh by reflection on every successful compile. Slots are matched
/// positionally against the previous list; `name` is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub index: u32,
    pub kind: BindingKind,
    pub stage: ShaderStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Binding {
    pub fn uniform_buffer(index: u32, stage: ShaderStage, byte_size: u32) -> Self {
        Self {
            index,
            kind: BindingKind::UniformBuffer,
            stage,
            byte_size: Some(byte_size),
            name: None,
        }
    }

    pub fn combined_image_sampler(index: u32, stage: ShaderStage) -> Self {
        Self {
            index,
            kind: BindingKind::CombinedImageSampler,
            stage,
            byte_size: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
    MirrorClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplerBorderColor {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

/// Sampling parameters for a combined image sampler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SamplerInfo {
    pub mag_filter: SamplerFilter,
    pub min_filter: SamplerFilter,
    pub address_u: SamplerAddressMode,
    pub address_v: SamplerAddressMode,
    pub address_w: SamplerAddressMode,
    pub border_color: SamplerBorderColor,
}

/// Surface or image size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero-sized surface; nothing can be built for it.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Presentation mode preference; falls back to FIFO when unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentModePreference {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

/// Texture assigned to a binding slot from configuration or the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureBinding {
    pub binding: u32,
    pub path: PathBuf,
    pub sampler: SamplerInfo,
}

/// Immutable configuration passed to the renderer at start-up.
///
/// `RendererConfig` mirrors CLI flags and the session file: which shaders to
/// compile, how large the window should be, and how to present.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Initial window size in physical pixels.
    pub surface_size: (u32, u32),
    pub title: String,
    /// Fragment shader to watch; `None` renders the built-in default.
    pub fragment_source: Option<PathBuf>,
    /// Optional vertex shader replacing the fullscreen triangle.
    pub vertex_source: Option<PathBuf>,
    /// Forces a source language instead of inferring it from the extension.
    pub language: Option<ShaderLanguage>,
    pub entry_point: String,
    pub shader_compiler: ShaderCompiler,
    pub present_mode: PresentModePreference,
    /// How often the watcher polls the shader file for modifications.
    pub poll_interval: Duration,
    pub textures: Vec<TextureBinding>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            surface_size: (1280, 720),
            title: "livesh".to_string(),
            fragment_source: None,
            vertex_source: None,
            language: None,
            entry_point: "main".to_string(),
            shader_compiler: ShaderCompiler::default(),
            present_mode: PresentModePreference::default(),
            poll_interval: Duration::from_millis(250),
            textures: Vec::new(),
        }
    }
}
