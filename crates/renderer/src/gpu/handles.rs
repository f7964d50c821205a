//! Owned Vulkan objects. Each keeps the device context alive and destroys its
//! handle on drop.

use std::rc::Rc;

use ash::vk;

use super::context::DeviceContext;
use crate::error::GraphicsApiError;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $destroy:ident) => {
        $(#[$meta])*
        pub struct $name {
            ctx: Rc<DeviceContext>,
            raw: $raw,
        }

        impl $name {
            pub(crate) fn new(ctx: &Rc<DeviceContext>, raw: $raw) -> Self {
                Self {
                    ctx: Rc::clone(ctx),
                    raw,
                }
            }

            pub fn raw(&self) -> $raw {
                self.raw
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                unsafe { self.ctx.device.$destroy(self.raw, None) };
            }
        }
    };
}

device_handle!(Sampler, vk::Sampler, destroy_sampler);
device_handle!(ShaderModule, vk::ShaderModule, destroy_shader_module);
device_handle!(DescriptorLayout, vk::DescriptorSetLayout, destroy_descriptor_set_layout);
device_handle!(
    /// Destroying the pool frees every set allocated from it.
    DescriptorPool,
    vk::DescriptorPool,
    destroy_descriptor_pool
);
device_handle!(Semaphore, vk::Semaphore, destroy_semaphore);
device_handle!(Fence, vk::Fence, destroy_fence);
device_handle!(PipelineLayout, vk::PipelineLayout, destroy_pipeline_layout);

/// Allocated from a pool and released with it.
pub struct DescriptorSet {
    pub(crate) raw: vk::DescriptorSet,
}

pub struct Pipeline {
    ctx: Rc<DeviceContext>,
    pub(crate) raw: vk::Pipeline,
    pub(crate) layout: PipelineLayout,
}

impl Pipeline {
    pub(crate) fn new(ctx: &Rc<DeviceContext>, raw: vk::Pipeline, layout: PipelineLayout) -> Self {
        Self {
            ctx: Rc::clone(ctx),
            raw,
            layout,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_pipeline(self.raw, None) };
    }
}

pub struct CommandBuffer {
    ctx: Rc<DeviceContext>,
    pub(crate) raw: vk::CommandBuffer,
}

impl CommandBuffer {
    pub(crate) fn allocate(
        ctx: &Rc<DeviceContext>,
        count: usize,
    ) -> Result<Vec<Self>, GraphicsApiError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(ctx.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let raw = unsafe { ctx.device.allocate_command_buffers(&info) }
            .map_err(GraphicsApiError::vulkan("vkAllocateCommandBuffers"))?;
        Ok(raw
            .into_iter()
            .map(|raw| Self {
                ctx: Rc::clone(ctx),
                raw,
            })
            .collect())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device
                .free_command_buffers(self.ctx.command_pool, &[self.raw])
        };
    }
}

/// Device memory plus the object bound to it.
struct Allocation {
    ctx: Rc<DeviceContext>,
    memory: vk::DeviceMemory,
}

impl Allocation {
    fn new(
        ctx: &Rc<DeviceContext>,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<Self, GraphicsApiError> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(ctx.find_memory_type(requirements.memory_type_bits, flags)?);
        let memory = unsafe { ctx.device.allocate_memory(&info, None) }
            .map_err(GraphicsApiError::vulkan("vkAllocateMemory"))?;
        Ok(Self {
            ctx: Rc::clone(ctx),
            memory,
        })
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        unsafe { self.ctx.device.free_memory(self.memory, None) };
    }
}

/// Host-visible, persistently mapped buffer.
pub struct Buffer {
    pub(crate) raw: vk::Buffer,
    pub(crate) size: u64,
    mapped: *mut u8,
    memory: Allocation,
}

impl Buffer {
    pub(crate) fn host_visible(
        ctx: &Rc<DeviceContext>,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, GraphicsApiError> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { ctx.device.create_buffer(&info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateBuffer"))?;
        let requirements = unsafe { ctx.device.get_buffer_memory_requirements(raw) };
        let memory = match Allocation::new(
            ctx,
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { ctx.device.destroy_buffer(raw, None) };
                return Err(err);
            }
        };
        let mapped = unsafe {
            ctx.device
                .bind_buffer_memory(raw, memory.memory, 0)
                .and_then(|()| {
                    ctx.device
                        .map_memory(memory.memory, 0, size, vk::MemoryMapFlags::empty())
                })
        };
        let mapped = match mapped {
            Ok(pointer) => pointer.cast::<u8>(),
            Err(result) => {
                unsafe { ctx.device.destroy_buffer(raw, None) };
                return Err(GraphicsApiError::Vulkan {
                    call: "vkMapMemory",
                    result,
                });
            }
        };
        Ok(Self {
            raw,
            size,
            mapped,
            memory,
        })
    }

    /// Copies `data` into the mapping; bytes past the buffer end are dropped.
    pub(crate) fn write(&self, data: &[u8]) {
        let len = data.len().min(self.size as usize);
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped, len) };
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let device = &self.memory.ctx.device;
        unsafe {
            device.unmap_memory(self.memory.memory);
            device.destroy_buffer(self.raw, None);
        }
    }
}

/// Sampled RGBA8 image with its view.
pub struct Image {
    pub(crate) view: vk::ImageView,
    pub(crate) raw: vk::Image,
    memory: Allocation,
}

impl Image {
    pub(crate) fn create(
        ctx: &Rc<DeviceContext>,
        width: u32,
        height: u32,
    ) -> Result<Self, GraphicsApiError> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { ctx.device.create_image(&info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateImage"))?;
        let requirements = unsafe { ctx.device.get_image_memory_requirements(raw) };
        let memory = Allocation::new(ctx, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory| {
                unsafe { ctx.device.bind_image_memory(raw, memory.memory, 0) }
                    .map_err(GraphicsApiError::vulkan("vkBindImageMemory"))?;
                Ok(memory)
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { ctx.device.destroy_image(raw, None) };
                return Err(err);
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(COLOR_RANGE);
        let view = match unsafe { ctx.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(result) => {
                unsafe { ctx.device.destroy_image(raw, None) };
                return Err(GraphicsApiError::Vulkan {
                    call: "vkCreateImageView",
                    result,
                });
            }
        };
        Ok(Self { view, raw, memory })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let device = &self.memory.ctx.device;
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.raw, None);
        }
    }
}

pub(crate) const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub(crate) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};
