//! Top-level driver tying reconciliation, descriptor sets, the pipeline and
//! presentation together.
//!
//! Shader swaps and resizes arrive on the render thread one at a time, so
//! none of this needs locking. A shader swap validates everything it can
//! (reflection, capacity, module creation) before the first teardown; a
//! failure at that stage leaves the previous shader rendering.

use crate::backend::{Backend, DrawCommand, PresentableChain};
use crate::descriptors::DescriptorResourceSet;
use crate::error::{GraphicsApiError, RebuildError, SlotError};
use crate::pipeline::{PipelineManager, ShaderProgram};
use crate::presentation::{
    Acquired, ChainDependents, EngineState, FramePresentationEngine, Presented, RecreateOutcome,
};
use crate::reflect::{self, ReflectionError, ShaderReflection};
use crate::resources::{Descriptor, ResourceReconciler};
use crate::textures::ImagePixels;
use crate::types::{Binding, SamplerInfo, ShaderStage};

/// What a call to [`FrameOrchestrator::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The chain was recreated instead of drawing.
    Skipped,
    /// The surface has no area; nothing was drawn or rebuilt.
    Deferred,
}

pub struct FrameOrchestrator<B: Backend> {
    engine: FramePresentationEngine<B>,
    pipeline: PipelineManager<B>,
    descriptors: Option<DescriptorResourceSet<B>>,
    reconciler: ResourceReconciler<B>,
    torn_down: bool,
    backend: B,
}

/// Borrowed view of everything rebuilt alongside the chain.
struct Dependents<'a, B: Backend> {
    pipeline: &'a mut PipelineManager<B>,
    descriptors: &'a mut Option<DescriptorResourceSet<B>>,
    reconciler: &'a mut ResourceReconciler<B>,
}

impl<B: Backend> ChainDependents<B> for Dependents<'_, B> {
    fn release(&mut self) {
        self.pipeline.release();
        *self.descriptors = None;
    }

    fn rebuild(&mut self, backend: &B, chain: &B::Chain) -> Result<(), GraphicsApiError> {
        let image_count = chain.image_count();
        self.reconciler.resize_uniform_buffers(backend, image_count)?;
        let descriptors =
            DescriptorResourceSet::rebuild(backend, self.reconciler.table(), image_count)?;
        if self.pipeline.has_fragment() {
            self.pipeline.rebuild(backend, descriptors.layout(), chain)?;
        }
        *self.descriptors = Some(descriptors);
        Ok(())
    }
}

impl<B: Backend> FrameOrchestrator<B> {
    /// Builds the engine around an initial vertex and fragment shader.
    ///
    /// Entry points are taken from each module. The presentable chain is created immediately unless the surface has no
    /// area yet, in which case the first rendered frame creates it.
    pub fn new(
        backend: B,
        vertex_code: &[u32],
        fragment_code: &[u32],
    ) -> Result<Self, RebuildError> {
        let reflection = expect_stage(vertex_code, ShaderStage::Vertex)?;
        let vertex = ShaderProgram::new(
            backend.create_shader_module(vertex_code)?,
            reflection.entry_point,
        );
        let engine = FramePresentationEngine::new(&backend)?;
        let reconciler = ResourceReconciler::new(&backend)?;
        let mut orchestrator = Self {
            engine,
            pipeline: PipelineManager::new(vertex),
            descriptors: None,
            reconciler,
            torn_down: false,
            backend,
        };
        orchestrator.on_shader_recompiled(fragment_code)?;
        orchestrator.recreate()?;
        Ok(orchestrator)
    }

    /// Swaps in a freshly compiled fragment shader.
    ///
    /// On `Err` with [`RebuildError::is_recoverable`] the previous shader,
    /// pipeline and descriptor sets are untouched.
    pub fn on_shader_recompiled(&mut self, code: &[u32]) -> Result<(), RebuildError> {
        let ShaderReflection {
            entry_point,
            bindings,
            ..
        } = expect_stage(code, ShaderStage::Fragment)?;
        DescriptorResourceSet::<B>::check_capacity(&bindings)?;
        let module = self.backend.create_shader_module(code)?;

        self.backend.wait_idle()?;
        self.descriptors = None;
        self.pipeline.release();

        let image_count = self.engine.image_count();
        self.reconciler
            .reconcile(&self.backend, &bindings, image_count)?;
        self.pipeline
            .set_fragment(ShaderProgram::new(module, entry_point));

        if let Some(chain) = self.engine.chain() {
            let descriptors =
                DescriptorResourceSet::rebuild(&self.backend, self.reconciler.table(), image_count)?;
            self.pipeline
                .rebuild(&self.backend, descriptors.layout(), chain)?;
            self.descriptors = Some(descriptors);
        }
        tracing::info!(bindings = bindings.len(), "fragment shader swapped in");
        Ok(())
    }

    /// Marks the presentable chain stale; it is rebuilt on the next frame.
    pub fn on_surface_resized(&mut self) {
        self.engine.mark_stale();
    }

    /// Runs one acquire, record, present cycle.
    pub fn render_frame(&mut self) -> Result<FrameStatus, GraphicsApiError> {
        if self.engine.state() != EngineState::Ready {
            return self.recreate();
        }
        let image_index = match self.engine.acquire_next_image(&self.backend)? {
            Acquired::Image(index) => index,
            Acquired::NeedsRecreate => return self.recreate(),
        };

        let backend = &self.backend;
        let reconciler = &self.reconciler;
        let pipeline = &self.pipeline;
        let descriptors = self.descriptors.as_ref();
        let presented = self
            .engine
            .present(backend, image_index, |command_buffer, chain| {
                let index = image_index as usize;
                let pipeline = pipeline
                    .current()
                    .ok_or_else(|| GraphicsApiError::Invalid("no pipeline to draw with".into()))?;
                let descriptor_set = descriptors
                    .and_then(|descriptors| descriptors.set(index))
                    .ok_or_else(|| {
                        GraphicsApiError::Invalid(format!("no descriptor set for image {index}"))
                    })?;
                reconciler.flush_uniforms(backend, index)?;
                backend.record_draw(
                    command_buffer,
                    &DrawCommand {
                        chain,
                        image_index,
                        pipeline,
                        descriptor_set,
                    },
                )
            })?;
        if presented == Presented::NeedsRecreate {
            tracing::debug!(image_index, "chain goes stale after this frame");
        }
        Ok(FrameStatus::Presented)
    }

    fn recreate(&mut self) -> Result<FrameStatus, GraphicsApiError> {
        let mut dependents = Dependents {
            pipeline: &mut self.pipeline,
            descriptors: &mut self.descriptors,
            reconciler: &mut self.reconciler,
        };
        match self.engine.recreate(&self.backend, &mut dependents)? {
            RecreateOutcome::Ready => Ok(FrameStatus::Skipped),
            RecreateOutcome::Deferred => Ok(FrameStatus::Deferred),
        }
    }

    /// Binds decoded pixels to a sampler slot.
    pub fn update_image(
        &mut self,
        slot: usize,
        pixels: &ImagePixels,
        source: impl Into<String>,
    ) -> Result<(), SlotError> {
        self.backend.wait_idle()?;
        self.reconciler
            .update_image(&self.backend, slot, pixels, source)?;
        self.rewrite_descriptors()
    }

    /// Returns a sampler slot to the shared default image.
    pub fn reset_image(&mut self, slot: usize) -> Result<(), SlotError> {
        if self.reconciler.uses_default_image(slot) {
            return Ok(());
        }
        self.backend.wait_idle()?;
        self.reconciler.reset_image(slot)?;
        self.rewrite_descriptors()
    }

    pub fn update_sampler(&mut self, slot: usize, info: SamplerInfo) -> Result<(), SlotError> {
        self.backend.wait_idle()?;
        self.reconciler.update_sampler(&self.backend, slot, info)?;
        self.rewrite_descriptors()
    }

    /// Stages uniform bytes; each image picks them up when it is next drawn.
    pub fn write_uniform(&mut self, slot: usize, data: &[u8]) -> Result<usize, SlotError> {
        self.reconciler.write_uniform(slot, data)
    }

    /// Stages per-frame values into the first uniform slot, truncated to its
    /// block size. Returns the staged byte count, or `None` when the shader
    /// declares no uniform block.
    pub fn write_frame_uniforms(&mut self, data: &[u8]) -> Option<usize> {
        let slot = self
            .reconciler
            .table()
            .iter()
            .position(|descriptor| descriptor.resource.as_uniform().is_some())?;
        self.reconciler.write_uniform(slot, data).ok()
    }

    fn rewrite_descriptors(&mut self) -> Result<(), SlotError> {
        if let Some(descriptors) = &self.descriptors {
            descriptors.write_all(&self.backend, self.reconciler.table())?;
        }
        Ok(())
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.reconciler.bindings()
    }

    pub fn descriptors(&self) -> &[Descriptor<B>] {
        self.reconciler.table()
    }

    pub fn slot_of(&self, binding: u32) -> Option<usize> {
        self.reconciler.slot_of(binding)
    }

    pub fn uses_default_image(&self, slot: usize) -> bool {
        self.reconciler.uses_default_image(slot)
    }

    pub fn image_count(&self) -> usize {
        self.engine.image_count()
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Waits for the device to go idle and releases everything in reverse
    /// creation order.
    pub fn shutdown(mut self) -> Result<(), GraphicsApiError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), GraphicsApiError> {
        if std::mem::replace(&mut self.torn_down, true) {
            return Ok(());
        }
        self.backend.wait_idle()?;
        self.pipeline.release();
        self.descriptors = None;
        self.engine.release();
        tracing::debug!("frame orchestrator torn down");
        Ok(())
    }
}

impl<B: Backend> Drop for FrameOrchestrator<B> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::error!(error = %err, "failed to wait for the device during teardown");
        }
    }
}

fn expect_stage(code: &[u32], expected: ShaderStage) -> Result<ShaderReflection, ReflectionError> {
    let reflection = reflect::reflect(code)?;
    if reflection.stage != expected {
        return Err(ReflectionError::UnexpectedStage {
            expected,
            found: reflection.stage,
        });
    }
    Ok(reflection)
}
