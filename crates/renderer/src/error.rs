use std::path::PathBuf;

use ash::vk;

use crate::reflect::ReflectionError;
use crate::types::BindingKind;

/// An underlying graphics API call failed.
///
/// Treated as fatal: it indicates driver or state corruption rather than
/// something the render loop can recover from locally.
#[derive(Debug, thiserror::Error)]
pub enum GraphicsApiError {
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("no {0} satisfies the renderer's requirements")]
    Unsupported(&'static str),
    #[error("{0}")]
    Invalid(String),
}

impl GraphicsApiError {
    pub(crate) fn vulkan(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| GraphicsApiError::Vulkan { call, result }
    }
}

/// Failure of a shader swap or a chain-dependent rebuild.
///
/// Reflection and capacity failures are raised before anything is torn down,
/// so the previously working shader keeps rendering.
#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    #[error(transparent)]
    Reflection(#[from] ReflectionError),
    #[error(
        "shader declares {count} {kind} bindings but descriptor pools hold at most {limit} per image"
    )]
    TooManyDescriptors {
        kind: BindingKind,
        count: usize,
        limit: u32,
    },
    #[error(transparent)]
    Graphics(#[from] GraphicsApiError),
}

impl RebuildError {
    /// True when the error left the previous shader state untouched.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RebuildError::Graphics(_))
    }
}

/// Failure of an explicit slot operation (texture, sampler, uniform write).
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("binding slot {slot} is out of range (table holds {len} slots)")]
    OutOfRange { slot: usize, len: usize },
    #[error("binding slot {slot} holds a {found}, expected a {expected}")]
    KindMismatch {
        slot: usize,
        found: BindingKind,
        expected: BindingKind,
    },
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error(transparent)]
    Graphics(#[from] GraphicsApiError),
}

/// An image file could not be turned into texture pixels.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("failed to load image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {path} is empty")]
    Empty { path: PathBuf },
}
