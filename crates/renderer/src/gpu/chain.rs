use std::rc::Rc;

use ash::vk;

use super::context::DeviceContext;
use super::handles::COLOR_RANGE;
use crate::backend::PresentableChain;
use crate::error::GraphicsApiError;
use crate::types::Extent;

/// Swapchain plus the views, render pass and framebuffers built on it.
///
/// Created and destroyed as a unit; nothing in here is patched in place.
pub struct SwapchainChain {
    ctx: Rc<DeviceContext>,
    pub(crate) swapchain: vk::SwapchainKHR,
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) framebuffers: Vec<vk::Framebuffer>,
    views: Vec<vk::ImageView>,
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
}

impl SwapchainChain {
    pub(crate) fn create(ctx: &Rc<DeviceContext>) -> Result<Self, GraphicsApiError> {
        let caps = ctx.surface_capabilities()?;
        let extent = ctx.surface_extent()?;
        if extent.is_empty() {
            return Err(GraphicsApiError::Invalid(
                "cannot build a swapchain for a zero-sized surface".into(),
            ));
        }
        let surface_format = ctx.choose_surface_format()?;
        let present_mode = ctx.choose_present_mode()?;

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count != 0 {
            image_count = image_count.min(caps.max_image_count);
        }
        let extent = vk::Extent2D {
            width: extent.width,
            height: extent.height,
        };
        let transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(composite_alpha(caps.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true);
        let swapchain = unsafe { ctx.swapchain_loader.create_swapchain(&info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateSwapchainKHR"))?;

        // From here on, partially built state is released by Drop.
        let mut chain = Self {
            ctx: Rc::clone(ctx),
            swapchain,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            views: Vec::new(),
            format: surface_format.format,
            extent,
        };

        let images = unsafe { ctx.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(GraphicsApiError::vulkan("vkGetSwapchainImagesKHR"))?;
        for image in images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(chain.format)
                .subresource_range(COLOR_RANGE);
            let view = unsafe { ctx.device.create_image_view(&view_info, None) }
                .map_err(GraphicsApiError::vulkan("vkCreateImageView"))?;
            chain.views.push(view);
        }

        chain.render_pass = create_render_pass(ctx, chain.format)?;
        for view in &chain.views {
            let attachments = [*view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(chain.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { ctx.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(GraphicsApiError::vulkan("vkCreateFramebuffer"))?;
            chain.framebuffers.push(framebuffer);
        }

        tracing::debug!(
            format = ?chain.format,
            ?present_mode,
            images = chain.views.len(),
            width = extent.width,
            height = extent.height,
            "created swapchain"
        );
        Ok(chain)
    }
}

/// First supported mode in preference order; opaque when the surface reports
/// nothing usable.
fn composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

fn create_render_pass(
    ctx: &DeviceContext,
    format: vk::Format,
) -> Result<vk::RenderPass, GraphicsApiError> {
    let attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);
    let color_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref));
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    let info = vk::RenderPassCreateInfo::default()
        .attachments(std::slice::from_ref(&attachment))
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));
    unsafe { ctx.device.create_render_pass(&info, None) }
        .map_err(GraphicsApiError::vulkan("vkCreateRenderPass"))
}

impl PresentableChain for SwapchainChain {
    fn image_count(&self) -> usize {
        self.framebuffers.len()
    }

    fn extent(&self) -> Extent {
        Extent::new(self.extent.width, self.extent.height)
    }
}

impl Drop for SwapchainChain {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            self.ctx
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}
