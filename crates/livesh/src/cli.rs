use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use renderer::{PresentModePreference, ShaderCompiler, ShaderLanguage, ShaderStage};

#[derive(Parser, Debug)]
#[command(
    name = "livesh",
    author,
    version,
    about = "Live shader editor: edit a fragment shader and watch it hot-reload",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Fragment shader to watch; the built-in shader is used when omitted.
    #[arg(value_name = "FRAGMENT")]
    pub fragment: Option<PathBuf>,

    /// Session file; defaults to `livesh.toml` in the config directory.
    #[arg(long, value_name = "FILE", env = "LIVESH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Vertex shader replacing the built-in fullscreen triangle.
    #[arg(long, value_name = "FILE")]
    pub vertex: Option<PathBuf>,

    /// Initial window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// Window title.
    #[arg(long)]
    pub title: Option<String>,

    /// Shader compiler backend: `shaderc` or `naga`.
    #[arg(long, value_name = "COMPILER", value_parser = parse_shader_compiler)]
    pub compiler: Option<ShaderCompiler>,

    /// Source language; inferred from the file extension when omitted.
    #[arg(long, value_name = "LANG", value_parser = parse_language)]
    pub language: Option<ShaderLanguage>,

    /// Shader entry point passed to the compiler.
    #[arg(long, value_name = "NAME")]
    pub entry_point: Option<String>,

    /// Presentation mode: `fifo`, `mailbox` or `immediate`.
    #[arg(long, value_name = "MODE", value_parser = parse_present_mode)]
    pub present_mode: Option<PresentModePreference>,

    /// Bind an image to a sampler slot (repeatable).
    #[arg(long = "texture", value_name = "BINDING=PATH", value_parser = parse_texture)]
    pub textures: Vec<TextureArg>,

    /// How often to poll the shader files for changes, in milliseconds.
    #[arg(long, value_name = "MILLISECONDS")]
    pub poll_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureArg {
    pub binding: u32,
    pub path: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a shader and report diagnostics without opening a window.
    Compile(ShaderArgs),
    /// Compile a shader and print its reflected bindings as JSON.
    Reflect(ShaderArgs),
    /// Print the configuration directory and session file location.
    Where,
}

#[derive(Args, Debug)]
pub struct ShaderArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Shader stage; `.vert`/`.vs` files default to vertex, others to fragment.
    #[arg(long, value_name = "STAGE", value_parser = parse_stage)]
    pub stage: Option<ShaderStage>,

    #[arg(long, value_name = "COMPILER", value_parser = parse_shader_compiler)]
    pub compiler: Option<ShaderCompiler>,

    #[arg(long, value_name = "LANG", value_parser = parse_language)]
    pub language: Option<ShaderLanguage>,

    #[arg(long, value_name = "NAME", default_value = "main")]
    pub entry_point: String,
}

impl ShaderArgs {
    pub fn stage(&self) -> ShaderStage {
        self.stage.unwrap_or_else(|| stage_from_path(&self.file))
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn stage_from_path(path: &Path) -> ShaderStage {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("vert" | "vs") => ShaderStage::Vertex,
        _ => ShaderStage::Fragment,
    }
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WxH format, e.g. 1280x720".to_string())?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in window size".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in window size".to_string())?;
    if width == 0 || height == 0 {
        return Err("window dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_shader_compiler(value: &str) -> Result<ShaderCompiler, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("shader compiler must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "shaderc" => {
            if cfg!(feature = "shaderc") {
                Ok(ShaderCompiler::Shaderc)
            } else {
                Err("shaderc support is not enabled in this build".to_string())
            }
        }
        "naga" | "naga-glsl" => Ok(ShaderCompiler::NagaGlsl),
        _ => Err("unknown shader compiler (expected shaderc or naga)".to_string()),
    }
}

pub fn parse_language(value: &str) -> Result<ShaderLanguage, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "glsl" => Ok(ShaderLanguage::Glsl),
        "hlsl" => Ok(ShaderLanguage::Hlsl),
        other => Err(format!("unknown shader language '{other}'; expected glsl or hlsl")),
    }
}

pub fn parse_present_mode(value: &str) -> Result<PresentModePreference, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fifo" | "vsync" => Ok(PresentModePreference::Fifo),
        "mailbox" => Ok(PresentModePreference::Mailbox),
        "immediate" => Ok(PresentModePreference::Immediate),
        other => Err(format!(
            "unknown present mode '{other}'; expected fifo, mailbox, or immediate"
        )),
    }
}

pub fn parse_stage(value: &str) -> Result<ShaderStage, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "vertex" | "vert" => Ok(ShaderStage::Vertex),
        "fragment" | "frag" => Ok(ShaderStage::Fragment),
        other => Err(format!("unknown stage '{other}'; expected vertex or fragment")),
    }
}

pub fn parse_texture(value: &str) -> Result<TextureArg, String> {
    let (binding, path) = value
        .split_once('=')
        .ok_or_else(|| "expected BINDING=PATH, e.g. 1=noise.png".to_string())?;
    let binding = binding
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid binding index '{}'", binding.trim()))?;
    let path = path.trim();
    if path.is_empty() {
        return Err("texture path must not be empty".to_string());
    }
    Ok(TextureArg {
        binding,
        path: PathBuf::from(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_surface_size() {
        assert_eq!(parse_surface_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_surface_size(" 640 X 480 ").unwrap(), (640, 480));
        assert!(parse_surface_size("0x720").is_err());
        assert!(parse_surface_size("1280").is_err());
    }

    #[test]
    fn parses_texture_assignments() {
        assert_eq!(
            parse_texture("1=textures/noise.png").unwrap(),
            TextureArg {
                binding: 1,
                path: PathBuf::from("textures/noise.png"),
            }
        );
        assert!(parse_texture("one=noise.png").is_err());
        assert!(parse_texture("1=").is_err());
        assert!(parse_texture("noise.png").is_err());
    }

    #[test]
    fn parses_enums() {
        assert_eq!(parse_shader_compiler("NAGA").unwrap(), ShaderCompiler::NagaGlsl);
        assert!(parse_shader_compiler("glslang").is_err());
        assert_eq!(parse_language("hlsl").unwrap(), ShaderLanguage::Hlsl);
        assert_eq!(
            parse_present_mode("mailbox").unwrap(),
            PresentModePreference::Mailbox
        );
        assert!(parse_present_mode("adaptive").is_err());
        assert_eq!(parse_stage("vert").unwrap(), ShaderStage::Vertex);
    }

    #[test]
    fn infers_stage_from_extension() {
        assert_eq!(stage_from_path(Path::new("quad.vert")), ShaderStage::Vertex);
        assert_eq!(stage_from_path(Path::new("plasma.frag")), ShaderStage::Fragment);
        assert_eq!(stage_from_path(Path::new("pixel.hlsl")), ShaderStage::Fragment);
    }

    #[test]
    fn cli_parses_run_and_subcommands() {
        let cli = Cli::try_parse_from([
            "livesh",
            "plasma.frag",
            "--size",
            "800x600",
            "--texture",
            "1=a.png",
            "--texture",
            "2=b.png",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.fragment, Some(PathBuf::from("plasma.frag")));
        assert_eq!(cli.run.size, Some((800, 600)));
        assert_eq!(cli.run.textures.len(), 2);

        let cli = Cli::try_parse_from(["livesh", "reflect", "plasma.frag"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Reflect(_))));
    }
}
