//! Graphics API seam used by the engine core.
//!
//! Every handle the trait hands out is an owned value that releases its GPU
//! object when dropped, so teardown order is expressed by the order in which
//! values go out of scope. The Vulkan implementation lives in [`crate::gpu`];
//! tests drive the same engine code through a recording mock.

use crate::error::GraphicsApiError;
use crate::pipeline::ShaderProgram;
use crate::textures::ImagePixels;
use crate::types::{Binding, Extent, SamplerInfo};

/// A presentable image chain as seen by the engine.
pub trait PresentableChain {
    fn image_count(&self) -> usize;
    fn extent(&self) -> Extent;
}

/// Result of asking the surface for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Descriptor counts a pool is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    pub uniform_buffers: u32,
    pub combined_image_samplers: u32,
    pub max_sets: u32,
}

/// One resource written into a descriptor set.
pub enum DescriptorWrite<'a, B: Backend> {
    UniformBuffer {
        binding: u32,
        buffer: &'a B::Buffer,
        range: u64,
    },
    CombinedImageSampler {
        binding: u32,
        image: &'a B::Image,
        sampler: &'a B::Sampler,
    },
}

/// Everything needed to record the fullscreen draw for one image.
pub struct DrawCommand<'a, B: Backend> {
    pub chain: &'a B::Chain,
    pub image_index: u32,
    pub pipeline: &'a B::Pipeline,
    pub descriptor_set: &'a B::DescriptorSet,
}

pub trait Backend: Sized {
    type Buffer;
    type Image;
    type Sampler;
    type ShaderModule;
    type DescriptorLayout;
    type DescriptorPool;
    type DescriptorSet;
    type Pipeline;
    type Chain: PresentableChain;
    type CommandBuffer;
    type Semaphore;
    type Fence;

    /// Host-visible buffer of `size` bytes for per-frame uniform data.
    fn create_uniform_buffer(&self, size: u64) -> Result<Self::Buffer, GraphicsApiError>;
    fn write_uniform_buffer(&self, buffer: &Self::Buffer, data: &[u8])
        -> Result<(), GraphicsApiError>;
    /// Uploads RGBA8 pixels into a sampled image.
    fn create_image(&self, pixels: &ImagePixels) -> Result<Self::Image, GraphicsApiError>;
    fn create_sampler(&self, info: &SamplerInfo) -> Result<Self::Sampler, GraphicsApiError>;
    fn create_shader_module(&self, code: &[u32]) -> Result<Self::ShaderModule, GraphicsApiError>;

    fn create_descriptor_layout(
        &self,
        bindings: &[Binding],
    ) -> Result<Self::DescriptorLayout, GraphicsApiError>;
    fn create_descriptor_pool(
        &self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<Self::DescriptorPool, GraphicsApiError>;
    /// Sets are freed together with the pool; they must not outlive it.
    fn allocate_descriptor_sets(
        &self,
        pool: &Self::DescriptorPool,
        layout: &Self::DescriptorLayout,
        count: usize,
    ) -> Result<Vec<Self::DescriptorSet>, GraphicsApiError>;
    fn update_descriptor_set(
        &self,
        set: &Self::DescriptorSet,
        writes: &[DescriptorWrite<'_, Self>],
    ) -> Result<(), GraphicsApiError>;

    fn create_pipeline(
        &self,
        vertex: &ShaderProgram<Self>,
        fragment: &ShaderProgram<Self>,
        layout: &Self::DescriptorLayout,
        chain: &Self::Chain,
    ) -> Result<Self::Pipeline, GraphicsApiError>;

    /// Size the next chain would be created with; empty while minimised.
    fn surface_extent(&self) -> Result<Extent, GraphicsApiError>;
    fn create_chain(&self) -> Result<Self::Chain, GraphicsApiError>;
    fn create_command_buffers(
        &self,
        count: usize,
    ) -> Result<Vec<Self::CommandBuffer>, GraphicsApiError>;

    fn create_semaphore(&self) -> Result<Self::Semaphore, GraphicsApiError>;
    fn create_fence(&self, signaled: bool) -> Result<Self::Fence, GraphicsApiError>;
    /// Blocks the calling thread until the fence is signaled.
    fn wait_for_fence(&self, fence: &Self::Fence) -> Result<(), GraphicsApiError>;
    fn reset_fence(&self, fence: &Self::Fence) -> Result<(), GraphicsApiError>;

    fn acquire_next_image(
        &self,
        chain: &Self::Chain,
        signal: &Self::Semaphore,
    ) -> Result<AcquireOutcome, GraphicsApiError>;
    fn record_draw(
        &self,
        command_buffer: &Self::CommandBuffer,
        draw: &DrawCommand<'_, Self>,
    ) -> Result<(), GraphicsApiError>;
    fn submit(
        &self,
        command_buffer: &Self::CommandBuffer,
        wait: &Self::Semaphore,
        signal: &Self::Semaphore,
        fence: &Self::Fence,
    ) -> Result<(), GraphicsApiError>;
    fn present(
        &self,
        chain: &Self::Chain,
        image_index: u32,
        wait: &Self::Semaphore,
    ) -> Result<PresentOutcome, GraphicsApiError>;
    /// Waits until the device has finished all submitted work.
    fn wait_idle(&self) -> Result<(), GraphicsApiError>;
}
