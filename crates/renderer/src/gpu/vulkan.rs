use std::ffi::CString;
use std::rc::Rc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::chain::SwapchainChain;
use super::context::DeviceContext;
use super::handles::{
    Buffer, CommandBuffer, DescriptorLayout, DescriptorPool, DescriptorSet, Fence, Image,
    Pipeline, PipelineLayout, Sampler, Semaphore, ShaderModule, COLOR_RANGE,
};
use crate::backend::{
    AcquireOutcome, Backend, DescriptorPoolSizes, DescriptorWrite, DrawCommand, PresentOutcome,
};
use crate::error::GraphicsApiError;
use crate::pipeline::ShaderProgram;
use crate::textures::ImagePixels;
use crate::types::{
    Binding, BindingKind, Extent, PresentModePreference, SamplerAddressMode, SamplerBorderColor,
    SamplerFilter, SamplerInfo, ShaderStage,
};

/// [`Backend`] implementation on top of raw Vulkan through `ash`.
pub struct VulkanBackend {
    ctx: Rc<DeviceContext>,
}

impl VulkanBackend {
    pub fn new<T>(
        target: &T,
        initial_size: Extent,
        present_mode: PresentModePreference,
    ) -> Result<Self, GraphicsApiError>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        Ok(Self {
            ctx: Rc::new(DeviceContext::new(target, initial_size, present_mode)?),
        })
    }

    /// Records the window size for surfaces that let the swapchain pick it.
    pub fn set_window_extent(&self, extent: Extent) {
        self.ctx.window_extent.set(extent);
    }

    fn upload_image(&self, image: &Image, pixels: &ImagePixels) -> Result<(), GraphicsApiError> {
        let staging = Buffer::host_visible(
            &self.ctx,
            pixels.byte_len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write(&pixels.rgba);

        let device = &self.ctx.device;
        let mut command_buffers = CommandBuffer::allocate(&self.ctx, 1)?;
        let command_buffer = command_buffers
            .pop()
            .ok_or_else(|| GraphicsApiError::Invalid("no upload command buffer".into()))?;
        let cmd = command_buffer.raw;
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(cmd, &begin)
                .map_err(GraphicsApiError::vulkan("vkBeginCommandBuffer"))?;
            transition(
                device,
                cmd,
                image.raw,
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
                (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER),
            );
            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width: pixels.width,
                    height: pixels.height,
                    depth: 1,
                });
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.raw,
                image.raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            transition(
                device,
                cmd,
                image.raw,
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
                (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
                (
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                ),
            );
            device
                .end_command_buffer(cmd)
                .map_err(GraphicsApiError::vulkan("vkEndCommandBuffer"))?;

            let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&cmd));
            device
                .queue_submit(self.ctx.queue, &[submit], vk::Fence::null())
                .map_err(GraphicsApiError::vulkan("vkQueueSubmit"))?;
            device
                .queue_wait_idle(self.ctx.queue)
                .map_err(GraphicsApiError::vulkan("vkQueueWaitIdle"))?;
        }
        Ok(())
    }
}

unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    (src_access, dst_access): (vk::AccessFlags, vk::AccessFlags),
    (src_stage, dst_stage): (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

fn filter(filter: SamplerFilter) -> vk::Filter {
    match filter {
        SamplerFilter::Nearest => vk::Filter::NEAREST,
        SamplerFilter::Linear => vk::Filter::LINEAR,
    }
}

fn address_mode(mode: SamplerAddressMode) -> vk::SamplerAddressMode {
    match mode {
        SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        SamplerAddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        SamplerAddressMode::MirrorClampToEdge => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
    }
}

fn border_color(color: SamplerBorderColor) -> vk::BorderColor {
    match color {
        SamplerBorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        SamplerBorderColor::OpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        SamplerBorderColor::OpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
    }
}

fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
    }
}

fn descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

fn entry_name(program: &ShaderProgram<VulkanBackend>) -> Result<CString, GraphicsApiError> {
    CString::new(program.entry_point.as_str()).map_err(|_| {
        GraphicsApiError::Invalid(format!(
            "entry point {:?} contains a NUL byte",
            program.entry_point
        ))
    })
}

impl Backend for VulkanBackend {
    type Buffer = Buffer;
    type Image = Image;
    type Sampler = Sampler;
    type ShaderModule = ShaderModule;
    type DescriptorLayout = DescriptorLayout;
    type DescriptorPool = DescriptorPool;
    type DescriptorSet = DescriptorSet;
    type Pipeline = Pipeline;
    type Chain = SwapchainChain;
    type CommandBuffer = CommandBuffer;
    type Semaphore = Semaphore;
    type Fence = Fence;

    fn create_uniform_buffer(&self, size: u64) -> Result<Buffer, GraphicsApiError> {
        Buffer::host_visible(&self.ctx, size, vk::BufferUsageFlags::UNIFORM_BUFFER)
    }

    fn write_uniform_buffer(&self, buffer: &Buffer, data: &[u8]) -> Result<(), GraphicsApiError> {
        buffer.write(data);
        Ok(())
    }

    fn create_image(&self, pixels: &ImagePixels) -> Result<Image, GraphicsApiError> {
        let image = Image::create(&self.ctx, pixels.width, pixels.height)?;
        self.upload_image(&image, pixels)?;
        Ok(image)
    }

    fn create_sampler(&self, info: &SamplerInfo) -> Result<Sampler, GraphicsApiError> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter(info.mag_filter))
            .min_filter(filter(info.min_filter))
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode(info.address_u))
            .address_mode_v(address_mode(info.address_v))
            .address_mode_w(address_mode(info.address_w))
            .border_color(border_color(info.border_color))
            .max_lod(0.0);
        let raw = unsafe { self.ctx.device.create_sampler(&create_info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateSampler"))?;
        Ok(Sampler::new(&self.ctx, raw))
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModule, GraphicsApiError> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        let raw = unsafe { self.ctx.device.create_shader_module(&info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateShaderModule"))?;
        Ok(ShaderModule::new(&self.ctx, raw))
    }

    fn create_descriptor_layout(
        &self,
        bindings: &[Binding],
    ) -> Result<DescriptorLayout, GraphicsApiError> {
        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.index)
                    .descriptor_type(descriptor_type(binding.kind))
                    .descriptor_count(1)
                    .stage_flags(stage_flags(binding.stage))
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        let raw = unsafe { self.ctx.device.create_descriptor_set_layout(&info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateDescriptorSetLayout"))?;
        Ok(DescriptorLayout::new(&self.ctx, raw))
    }

    fn create_descriptor_pool(
        &self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<DescriptorPool, GraphicsApiError> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: sizes.uniform_buffers.max(1),
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: sizes.combined_image_samplers.max(1),
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(sizes.max_sets.max(1))
            .pool_sizes(&pool_sizes);
        let raw = unsafe { self.ctx.device.create_descriptor_pool(&info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateDescriptorPool"))?;
        Ok(DescriptorPool::new(&self.ctx, raw))
    }

    fn allocate_descriptor_sets(
        &self,
        pool: &DescriptorPool,
        layout: &DescriptorLayout,
        count: usize,
    ) -> Result<Vec<DescriptorSet>, GraphicsApiError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let layouts = vec![layout.raw(); count];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.raw())
            .set_layouts(&layouts);
        let sets = unsafe { self.ctx.device.allocate_descriptor_sets(&info) }
            .map_err(GraphicsApiError::vulkan("vkAllocateDescriptorSets"))?;
        Ok(sets.into_iter().map(|raw| DescriptorSet { raw }).collect())
    }

    fn update_descriptor_set(
        &self,
        set: &DescriptorSet,
        writes: &[DescriptorWrite<'_, Self>],
    ) -> Result<(), GraphicsApiError> {
        for write in writes {
            match write {
                DescriptorWrite::UniformBuffer {
                    binding,
                    buffer,
                    range,
                } => {
                    let info = vk::DescriptorBufferInfo::default()
                        .buffer(buffer.raw)
                        .offset(0)
                        .range(*range);
                    let write = vk::WriteDescriptorSet::default()
                        .dst_set(set.raw)
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(&info));
                    unsafe { self.ctx.device.update_descriptor_sets(&[write], &[]) };
                }
                DescriptorWrite::CombinedImageSampler {
                    binding,
                    image,
                    sampler,
                } => {
                    let info = vk::DescriptorImageInfo::default()
                        .sampler(sampler.raw())
                        .image_view(image.view)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                    let write = vk::WriteDescriptorSet::default()
                        .dst_set(set.raw)
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(&info));
                    unsafe { self.ctx.device.update_descriptor_sets(&[write], &[]) };
                }
            }
        }
        Ok(())
    }

    fn create_pipeline(
        &self,
        vertex: &ShaderProgram<Self>,
        fragment: &ShaderProgram<Self>,
        layout: &DescriptorLayout,
        chain: &SwapchainChain,
    ) -> Result<Pipeline, GraphicsApiError> {
        let device = &self.ctx.device;
        let set_layouts = [layout.raw()];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreatePipelineLayout"))?;
        let pipeline_layout = PipelineLayout::new(&self.ctx, pipeline_layout);

        let vertex_entry = entry_name(vertex)?;
        let fragment_entry = entry_name(fragment)?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.module.raw())
                .name(&vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.module.raw())
                .name(&fragment_entry),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: chain.extent.width as f32,
            height: chain.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: chain.extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(std::slice::from_ref(&viewport))
            .scissors(std::slice::from_ref(&scissor));
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false);
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(std::slice::from_ref(&blend_attachment));

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .layout(pipeline_layout.raw())
            .render_pass(chain.render_pass)
            .subpass(0);
        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, result)| GraphicsApiError::Vulkan {
            call: "vkCreateGraphicsPipelines",
            result,
        })?;
        let raw = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GraphicsApiError::Invalid("driver returned no pipeline".into()))?;
        Ok(Pipeline::new(&self.ctx, raw, pipeline_layout))
    }

    fn surface_extent(&self) -> Result<Extent, GraphicsApiError> {
        self.ctx.surface_extent()
    }

    fn create_chain(&self) -> Result<SwapchainChain, GraphicsApiError> {
        SwapchainChain::create(&self.ctx)
    }

    fn create_command_buffers(&self, count: usize) -> Result<Vec<CommandBuffer>, GraphicsApiError> {
        CommandBuffer::allocate(&self.ctx, count)
    }

    fn create_semaphore(&self) -> Result<Semaphore, GraphicsApiError> {
        let raw = unsafe {
            self.ctx
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(GraphicsApiError::vulkan("vkCreateSemaphore"))?;
        Ok(Semaphore::new(&self.ctx, raw))
    }

    fn create_fence(&self, signaled: bool) -> Result<Fence, GraphicsApiError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let raw = unsafe {
            self.ctx
                .device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(GraphicsApiError::vulkan("vkCreateFence"))?;
        Ok(Fence::new(&self.ctx, raw))
    }

    fn wait_for_fence(&self, fence: &Fence) -> Result<(), GraphicsApiError> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence.raw()], true, u64::MAX)
        }
        .map_err(GraphicsApiError::vulkan("vkWaitForFences"))
    }

    fn reset_fence(&self, fence: &Fence) -> Result<(), GraphicsApiError> {
        unsafe { self.ctx.device.reset_fences(&[fence.raw()]) }
            .map_err(GraphicsApiError::vulkan("vkResetFences"))
    }

    fn acquire_next_image(
        &self,
        chain: &SwapchainChain,
        signal: &Semaphore,
    ) -> Result<AcquireOutcome, GraphicsApiError> {
        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                chain.swapchain,
                u64::MAX,
                signal.raw(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(GraphicsApiError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn record_draw(
        &self,
        command_buffer: &CommandBuffer,
        draw: &DrawCommand<'_, Self>,
    ) -> Result<(), GraphicsApiError> {
        let device = &self.ctx.device;
        let cmd = command_buffer.raw;
        let framebuffer = *draw
            .chain
            .framebuffers
            .get(draw.image_index as usize)
            .ok_or_else(|| {
                GraphicsApiError::Invalid(format!("no framebuffer for image {}", draw.image_index))
            })?;
        let clear = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }];
        let pass = vk::RenderPassBeginInfo::default()
            .render_pass(draw.chain.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: draw.chain.extent,
            })
            .clear_values(&clear);
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(GraphicsApiError::vulkan("vkResetCommandBuffer"))?;
            device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .map_err(GraphicsApiError::vulkan("vkBeginCommandBuffer"))?;
            device.cmd_begin_render_pass(cmd, &pass, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline.raw);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline.layout.raw(),
                0,
                &[draw.descriptor_set.raw],
                &[],
            );
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .map_err(GraphicsApiError::vulkan("vkEndCommandBuffer"))?;
        }
        Ok(())
    }

    fn submit(
        &self,
        command_buffer: &CommandBuffer,
        wait: &Semaphore,
        signal: &Semaphore,
        fence: &Fence,
    ) -> Result<(), GraphicsApiError> {
        let wait_semaphores = [wait.raw()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer.raw];
        let signal_semaphores = [signal.raw()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.queue, &[submit], fence.raw())
        }
        .map_err(GraphicsApiError::vulkan("vkQueueSubmit"))
    }

    fn present(
        &self,
        chain: &SwapchainChain,
        image_index: u32,
        wait: &Semaphore,
    ) -> Result<PresentOutcome, GraphicsApiError> {
        let wait_semaphores = [wait.raw()];
        let swapchains = [chain.swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.queue, &info)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(GraphicsApiError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn wait_idle(&self) -> Result<(), GraphicsApiError> {
        unsafe { self.ctx.device.device_wait_idle() }
            .map_err(GraphicsApiError::vulkan("vkDeviceWaitIdle"))
    }
}
