//! Vulkan implementation of [`Backend`](crate::backend::Backend) on `ash`.
//!
//! - `context` owns the instance, surface, device and queue.
//! - `handles` wraps individual objects so they are destroyed on drop.
//! - `chain` builds the swapchain with its views, render pass and framebuffers.
//! - `vulkan` maps the backend operations onto those pieces.

mod chain;
mod context;
mod handles;
mod vulkan;

pub use vulkan::VulkanBackend;
