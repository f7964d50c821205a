//! Session file for the live shader editor.
//!
//! A session names the shaders to watch, the window to open and the textures
//! to bind. Relative paths are resolved against the directory holding the
//! file.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub version: u32,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub shader: ShaderSection,
    #[serde(default)]
    pub textures: Vec<TextureEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WindowSection {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            present_mode: PresentModeSetting::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShaderSection {
    pub fragment: Option<PathBuf>,
    pub vertex: Option<PathBuf>,
    pub language: Option<LanguageSetting>,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    pub compiler: Option<CompilerSetting>,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,
}

impl Default for ShaderSection {
    fn default() -> Self {
        Self {
            fragment: None,
            vertex: None,
            language: None,
            entry_point: default_entry_point(),
            compiler: None,
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TextureEntry {
    pub binding: u32,
    pub path: PathBuf,
    #[serde(default)]
    pub sampler: SamplerSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerSection {
    #[serde(default)]
    pub mag_filter: FilterSetting,
    #[serde(default)]
    pub min_filter: FilterSetting,
    #[serde(default)]
    pub address_u: AddressModeSetting,
    #[serde(default)]
    pub address_v: AddressModeSetting,
    #[serde(default)]
    pub address_w: AddressModeSetting,
    #[serde(default)]
    pub border_color: BorderColorSetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageSetting {
    Glsl,
    Hlsl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerSetting {
    Naga,
    Shaderc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterSetting {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressModeSetting {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
    MirrorClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BorderColorSetting {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_title() -> String {
    "livesh".to_string()
}

fn default_entry_point() -> String {
    "main".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

/// Accepts a humantime string (`"250ms"`) or a number of seconds.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() || v.is_infinite() {
                return Err(E::custom("duration must be a finite non-negative number"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SessionConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads, validates and anchors relative paths at the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    pub fn resolve_relative(&mut self, base: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(path) = self.shader.fragment.as_mut() {
            anchor(path);
        }
        if let Some(path) = self.shader.vertex.as_mut() {
            anchor(path);
        }
        for texture in &mut self.textures {
            anchor(&mut texture.path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size {}x{} must be non-zero",
                self.window.width, self.window.height
            )));
        }

        if self.shader.entry_point.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "shader.entry_point may not be empty".into(),
            ));
        }

        if self.shader.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "shader.poll_interval must be greater than zero".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for texture in &self.textures {
            if !seen.insert(texture.binding) {
                return Err(ConfigError::Invalid(format!(
                    "binding {} is assigned more than one texture",
                    texture.binding
                )));
            }
            if texture.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "texture for binding {} has an empty path",
                    texture.binding
                )));
            }
        }

        Ok(())
    }
}
