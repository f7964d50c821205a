use std::time::Duration;

use anyhow::{bail, Context, Result};
use renderer::{
    compile_file, reflect, PresentModePreference, Renderer, RendererConfig, SamplerAddressMode,
    SamplerBorderColor, SamplerFilter, SamplerInfo, ShaderCompiler, ShaderLanguage,
    TextureBinding,
};
use sessionconfig::{
    AddressModeSetting, BorderColorSetting, CompilerSetting, FilterSetting, LanguageSetting,
    PresentModeSetting, SamplerSection, SessionConfig,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{RunArgs, ShaderArgs};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let session = load_session(&args, &paths)?;
    let config = build_config(&args, session.as_ref())?;
    tracing::debug!(?config, "resolved renderer configuration");
    Renderer::new(config).run()
}

/// Loads the session named on the command line, or the default session file
/// when one exists.
fn load_session(args: &RunArgs, paths: &AppPaths) -> Result<Option<SessionConfig>> {
    if let Some(path) = &args.config {
        let session = SessionConfig::load(path)
            .with_context(|| format!("failed to load session {}", path.display()))?;
        return Ok(Some(session));
    }
    let default = paths.config_file();
    if !default.is_file() {
        return Ok(None);
    }
    tracing::debug!(path = %default.display(), "using default session file");
    let session = SessionConfig::load(&default)
        .with_context(|| format!("failed to load session {}", default.display()))?;
    Ok(Some(session))
}

/// Merges the session file (if any) with command-line overrides.
pub fn build_config(args: &RunArgs, session: Option<&SessionConfig>) -> Result<RendererConfig> {
    let mut config = RendererConfig::default();

    if let Some(session) = session {
        config.surface_size = (session.window.width, session.window.height);
        config.title = session.window.title.clone();
        config.present_mode = present_mode(session.window.present_mode);
        config.fragment_source = session.shader.fragment.clone();
        config.vertex_source = session.shader.vertex.clone();
        config.language = session.shader.language.map(language);
        config.entry_point = session.shader.entry_point.clone();
        if let Some(setting) = session.shader.compiler {
            config.shader_compiler = compiler(setting)?;
        }
        config.poll_interval = session.shader.poll_interval;
        config.textures = session
            .textures
            .iter()
            .map(|entry| TextureBinding {
                binding: entry.binding,
                path: entry.path.clone(),
                sampler: sampler(&entry.sampler),
            })
            .collect();
    }

    if let Some(fragment) = &args.fragment {
        config.fragment_source = Some(fragment.clone());
    }
    if let Some(vertex) = &args.vertex {
        config.vertex_source = Some(vertex.clone());
    }
    if let Some(size) = args.size {
        config.surface_size = size;
    }
    if let Some(title) = &args.title {
        config.title = title.clone();
    }
    if let Some(compiler) = args.compiler {
        config.shader_compiler = compiler;
    }
    if let Some(language) = args.language {
        config.language = Some(language);
    }
    if let Some(entry_point) = &args.entry_point {
        config.entry_point = entry_point.clone();
    }
    if let Some(mode) = args.present_mode {
        config.present_mode = mode;
    }
    if let Some(ms) = args.poll_ms {
        if ms == 0 {
            bail!("--poll-ms must be greater than zero");
        }
        config.poll_interval = Duration::from_millis(ms);
    }
    for texture in &args.textures {
        config.textures.retain(|existing| existing.binding != texture.binding);
        config.textures.push(TextureBinding {
            binding: texture.binding,
            path: texture.path.clone(),
            sampler: SamplerInfo::default(),
        });
    }

    Ok(config)
}

/// `livesh compile`: diagnostics go to stderr, the exit status carries the
/// result.
pub fn compile_only(args: &ShaderArgs) -> Result<()> {
    let code = compile_shader(args)?;
    println!(
        "{}: compiled {} stage ({} words)",
        args.file.display(),
        args.stage(),
        code.len()
    );
    Ok(())
}

/// `livesh reflect`: prints the reflected binding list as JSON.
pub fn reflect_only(args: &ShaderArgs) -> Result<()> {
    let code = compile_shader(args)?;
    let reflection = reflect(&code)
        .with_context(|| format!("failed to reflect {}", args.file.display()))?;
    println!("{}", serde_json::to_string_pretty(&reflection)?);
    Ok(())
}

fn compile_shader(args: &ShaderArgs) -> Result<Vec<u32>> {
    compile_file(
        args.compiler.unwrap_or_default(),
        &args.file,
        args.stage(),
        args.language,
        &args.entry_point,
    )
}

fn present_mode(setting: PresentModeSetting) -> PresentModePreference {
    match setting {
        PresentModeSetting::Fifo => PresentModePreference::Fifo,
        PresentModeSetting::Mailbox => PresentModePreference::Mailbox,
        PresentModeSetting::Immediate => PresentModePreference::Immediate,
    }
}

fn language(setting: LanguageSetting) -> ShaderLanguage {
    match setting {
        LanguageSetting::Glsl => ShaderLanguage::Glsl,
        LanguageSetting::Hlsl => ShaderLanguage::Hlsl,
    }
}

fn compiler(setting: CompilerSetting) -> Result<ShaderCompiler> {
    match setting {
        CompilerSetting::Naga => Ok(ShaderCompiler::NagaGlsl),
        CompilerSetting::Shaderc if cfg!(feature = "shaderc") => Ok(ShaderCompiler::Shaderc),
        CompilerSetting::Shaderc => bail!("session requests shaderc but this build lacks it"),
    }
}

fn sampler(section: &SamplerSection) -> SamplerInfo {
    let filter = |setting| match setting {
        FilterSetting::Nearest => SamplerFilter::Nearest,
        FilterSetting::Linear => SamplerFilter::Linear,
    };
    let address = |setting| match setting {
        AddressModeSetting::Repeat => SamplerAddressMode::Repeat,
        AddressModeSetting::MirroredRepeat => SamplerAddressMode::MirroredRepeat,
        AddressModeSetting::ClampToEdge => SamplerAddressMode::ClampToEdge,
        AddressModeSetting::ClampToBorder => SamplerAddressMode::ClampToBorder,
        AddressModeSetting::MirrorClampToEdge => SamplerAddressMode::MirrorClampToEdge,
    };
    SamplerInfo {
        mag_filter: filter(section.mag_filter),
        min_filter: filter(section.min_filter),
        address_u: address(section.address_u),
        address_v: address(section.address_v),
        address_w: address(section.address_w),
        border_color: match section.border_color {
            BorderColorSetting::TransparentBlack => SamplerBorderColor::TransparentBlack,
            BorderColorSetting::OpaqueBlack => SamplerBorderColor::OpaqueBlack,
            BorderColorSetting::OpaqueWhite => SamplerBorderColor::OpaqueWhite,
        },
    }
}
