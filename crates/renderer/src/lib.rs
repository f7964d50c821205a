//! Live shader reload engine.
//!
//! A fragment shader is compiled, reflected and swapped into a running Vulkan
//! pipeline without restarting. The flow on each event:
//!
//! ```text
//!   shader saved ──▶ compile ──▶ reflect ──▶ ResourceReconciler ──▶ DescriptorResourceSet
//!                                                                      │
//!                                                                      ▼
//!   window resized ──▶ FramePresentationEngine::recreate ──────▶ PipelineManager
//!
//!   every tick: acquire ──▶ flush uniforms ──▶ record ──▶ submit ──▶ present
//! ```
//!
//! [`FrameOrchestrator`] owns the pieces and sequences them. Every GPU call
//! goes through [`Backend`]; [`VulkanBackend`] is the real one. [`Renderer`]
//! opens a window and drives the whole loop for the `livesh` binary.

use anyhow::Result;

pub mod backend;
pub mod compile;
pub mod descriptors;
pub mod error;
mod gpu;
#[cfg(test)]
mod mock;
pub mod orchestrator;
pub mod pipeline;
pub mod presentation;
pub mod reflect;
pub mod resources;
pub mod runtime;
pub mod textures;
pub mod types;
mod watch;
mod window;

pub use backend::{Backend, PresentableChain};
pub use compile::{
    compile, compile_builtin, compile_configured, compile_file, compile_to_spirv, CompileError,
    CompileOutput, CompileRequest, CompileStatus,
};
pub use descriptors::{DescriptorResourceSet, MAX_DESCRIPTORS_PER_KIND};
pub use error::{GraphicsApiError, RebuildError, SlotError, TextureError};
pub use gpu::VulkanBackend;
pub use orchestrator::{FrameOrchestrator, FrameStatus};
pub use pipeline::{PipelineManager, ShaderProgram};
pub use presentation::{EngineState, FramePresentationEngine, MAX_FRAMES_IN_FLIGHT};
pub use reflect::{extract, reflect, ReflectionError, ShaderReflection};
pub use resources::{Descriptor, Resource, ResourceReconciler};
pub use runtime::{FrameUniforms, TimeSample};
pub use types::*;

/// High-level entry point that owns the chosen configuration.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Opens the preview window and renders until it is closed.
    ///
    /// Returns an error when the window or the Vulkan device cannot be
    /// created, or when a graphics call fails mid-session.
    pub fn run(self) -> Result<()> {
        tracing::info!(
            fragment = ?self.config.fragment_source,
            compiler = %self.config.shader_compiler,
            "starting live session"
        );
        window::run_window(self.config)
    }
}
