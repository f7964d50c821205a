use crate::backend::Backend;
use crate::error::GraphicsApiError;

/// A compiled shader module plus the entry point the pipeline invokes.
pub struct ShaderProgram<B: Backend> {
    pub module: B::ShaderModule,
    pub entry_point: String,
}

impl<B: Backend> ShaderProgram<B> {
    pub fn new(module: B::ShaderModule, entry_point: impl Into<String>) -> Self {
        Self {
            module,
            entry_point: entry_point.into(),
        }
    }
}

/// Owns the graphics pipeline and the shader programs it was built from.
///
/// There is no incremental update: every rebuild drops the old pipeline and
/// creates a new one. Callers must have waited for the device to go idle
/// before asking for a rebuild or release.
pub struct PipelineManager<B: Backend> {
    pipeline: Option<B::Pipeline>,
    fragment: Option<ShaderProgram<B>>,
    vertex: ShaderProgram<B>,
}

impl<B: Backend> PipelineManager<B> {
    pub fn new(vertex: ShaderProgram<B>) -> Self {
        Self {
            pipeline: None,
            fragment: None,
            vertex,
        }
    }

    /// Swaps in a new fragment program; the next rebuild picks it up.
    pub fn set_fragment(&mut self, fragment: ShaderProgram<B>) {
        self.pipeline = None;
        self.fragment = Some(fragment);
    }

    pub fn rebuild(
        &mut self,
        backend: &B,
        layout: &B::DescriptorLayout,
        chain: &B::Chain,
    ) -> Result<(), GraphicsApiError> {
        self.pipeline = None;
        let fragment = self
            .fragment
            .as_ref()
            .ok_or_else(|| GraphicsApiError::Invalid("no fragment shader loaded".into()))?;
        let pipeline = backend.create_pipeline(&self.vertex, fragment, layout, chain)?;
        self.pipeline = Some(pipeline);
        tracing::debug!(
            vertex = %self.vertex.entry_point,
            fragment = %fragment.entry_point,
            "rebuilt graphics pipeline"
        );
        Ok(())
    }

    pub fn release(&mut self) {
        self.pipeline = None;
    }

    pub fn current(&self) -> Option<&B::Pipeline> {
        self.pipeline.as_ref()
    }

    pub fn has_fragment(&self) -> bool {
        self.fragment.is_some()
    }
}
