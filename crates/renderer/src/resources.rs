//! Live descriptor table and the minimal-churn reconciliation policy.
//!
//! Slots are matched positionally against each new binding list. A slot keeps
//! its GPU allocation whenever the kind (and, for uniform blocks, the byte
//! size) is unchanged; otherwise the old allocation is dropped before the
//! replacement is created. Sampler slots without an explicit image share one
//! reference-counted default image that reconciliation never frees.

use std::rc::Rc;

use crate::backend::Backend;
use crate::error::{GraphicsApiError, SlotError};
use crate::textures::{default_image_pixels, ImagePixels};
use crate::types::{Binding, BindingKind, SamplerInfo};

/// Smallest uniform allocation; also used when reflection reports no size.
pub const MIN_UNIFORM_SIZE: u32 = 16;

/// One buffer per presentable image plus the CPU-side bytes copied into them.
pub struct UniformBufferResource<B: Backend> {
    pub buffers: Vec<B::Buffer>,
    pub byte_size: u32,
    staging: Vec<u8>,
}

impl<B: Backend> UniformBufferResource<B> {
    fn allocate(backend: &B, byte_size: u32, image_count: usize) -> Result<Self, GraphicsApiError> {
        Ok(Self {
            buffers: allocate_buffers(backend, byte_size, image_count)?,
            byte_size,
            staging: vec![0; byte_size as usize],
        })
    }

    pub fn staging(&self) -> &[u8] {
        &self.staging
    }
}

fn allocate_buffers<B: Backend>(
    backend: &B,
    byte_size: u32,
    image_count: usize,
) -> Result<Vec<B::Buffer>, GraphicsApiError> {
    (0..image_count)
        .map(|_| backend.create_uniform_buffer(u64::from(byte_size)))
        .collect()
}

pub enum ImageResource<B: Backend> {
    /// Shared placeholder; dropping this only releases the reference.
    Default(Rc<B::Image>),
    Owned { image: B::Image, source: String },
}

impl<B: Backend> ImageResource<B> {
    pub fn handle(&self) -> &B::Image {
        match self {
            ImageResource::Default(image) => image,
            ImageResource::Owned { image, .. } => image,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ImageResource::Default(_))
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            ImageResource::Default(_) => None,
            ImageResource::Owned { source, .. } => Some(source),
        }
    }
}

pub struct SamplerResource<B: Backend> {
    pub sampler: B::Sampler,
    pub info: SamplerInfo,
}

pub struct TextureResource<B: Backend> {
    pub image: ImageResource<B>,
    pub sampler: SamplerResource<B>,
}

/// GPU allocation backing one descriptor slot.
pub enum Resource<B: Backend> {
    UniformBuffer(UniformBufferResource<B>),
    CombinedImageSampler(TextureResource<B>),
}

impl<B: Backend> Resource<B> {
    pub fn kind(&self) -> BindingKind {
        match self {
            Resource::UniformBuffer(_) => BindingKind::UniformBuffer,
            Resource::CombinedImageSampler(_) => BindingKind::CombinedImageSampler,
        }
    }

    pub fn as_uniform(&self) -> Option<&UniformBufferResource<B>> {
        match self {
            Resource::UniformBuffer(uniform) => Some(uniform),
            Resource::CombinedImageSampler(_) => None,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureResource<B>> {
        match self {
            Resource::CombinedImageSampler(texture) => Some(texture),
            Resource::UniformBuffer(_) => None,
        }
    }

    /// True when this allocation can back `binding` untouched.
    fn fits(&self, binding: &Binding, image_count: usize) -> bool {
        match (self, binding.kind) {
            (Resource::UniformBuffer(uniform), BindingKind::UniformBuffer) => {
                uniform.byte_size == uniform_size(binding) && uniform.buffers.len() == image_count
            }
            (Resource::CombinedImageSampler(_), BindingKind::CombinedImageSampler) => true,
            _ => false,
        }
    }
}

/// A binding paired with the resource that currently backs it.
pub struct Descriptor<B: Backend> {
    pub binding: Binding,
    pub resource: Resource<B>,
}

fn uniform_size(binding: &Binding) -> u32 {
    binding.byte_size.unwrap_or(0).max(MIN_UNIFORM_SIZE)
}

fn allocate<B: Backend>(
    backend: &B,
    default_image: &Rc<B::Image>,
    binding: &Binding,
    image_count: usize,
) -> Result<Resource<B>, GraphicsApiError> {
    match binding.kind {
        BindingKind::UniformBuffer => Ok(Resource::UniformBuffer(UniformBufferResource::allocate(
            backend,
            uniform_size(binding),
            image_count,
        )?)),
        BindingKind::CombinedImageSampler => {
            let info = SamplerInfo::default();
            Ok(Resource::CombinedImageSampler(TextureResource {
                image: ImageResource::Default(Rc::clone(default_image)),
                sampler: SamplerResource {
                    sampler: backend.create_sampler(&info)?,
                    info,
                },
            }))
        }
    }
}

/// Owns the descriptor table (slots `0..N`) and the shared default image.
pub struct ResourceReconciler<B: Backend> {
    table: Vec<Descriptor<B>>,
    default_image: Rc<B::Image>,
}

impl<B: Backend> ResourceReconciler<B> {
    pub fn new(backend: &B) -> Result<Self, GraphicsApiError> {
        Ok(Self {
            table: Vec::new(),
            default_image: Rc::new(backend.create_image(&default_image_pixels())?),
        })
    }

    pub fn table(&self) -> &[Descriptor<B>] {
        &self.table
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.table.iter().map(|descriptor| descriptor.binding.clone()).collect()
    }

    pub fn default_image(&self) -> &Rc<B::Image> {
        &self.default_image
    }

    /// Brings the table in line with `bindings`, one slot per binding.
    ///
    /// Trailing slots are dropped first. A slot whose resource no longer fits
    /// is released before its replacement is allocated, so a slot never holds
    /// two private allocations at once.
    pub fn reconcile(
        &mut self,
        backend: &B,
        bindings: &[Binding],
        image_count: usize,
    ) -> Result<(), GraphicsApiError> {
        let mut previous = std::mem::take(&mut self.table);
        let removed = previous.len().saturating_sub(bindings.len());
        previous.truncate(bindings.len());

        let (mut kept, mut replaced, mut added) = (0usize, 0usize, 0usize);
        let mut previous = previous.into_iter();
        self.table.reserve(bindings.len());
        for binding in bindings {
            let resource = match previous.next() {
                Some(existing) if existing.resource.fits(binding, image_count) => {
                    kept += 1;
                    existing.resource
                }
                Some(existing) => {
                    tracing::debug!(
                        index = binding.index,
                        from = %existing.resource.kind(),
                        to = %binding.kind,
                        "reallocating descriptor slot"
                    );
                    drop(existing);
                    replaced += 1;
                    allocate(backend, &self.default_image, binding, image_count)?
                }
                None => {
                    added += 1;
                    allocate(backend, &self.default_image, binding, image_count)?
                }
            };
            self.table.push(Descriptor {
                binding: binding.clone(),
                resource,
            });
        }

        tracing::debug!(
            slots = self.table.len(),
            kept,
            replaced,
            added,
            removed,
            "reconciled descriptor table"
        );
        Ok(())
    }

    /// Reallocates uniform buffer arrays whose length no longer matches the
    /// presentable image count. Staged uniform bytes are preserved.
    pub fn resize_uniform_buffers(
        &mut self,
        backend: &B,
        image_count: usize,
    ) -> Result<(), GraphicsApiError> {
        for descriptor in &mut self.table {
            if let Resource::UniformBuffer(uniform) = &mut descriptor.resource {
                if uniform.buffers.len() != image_count {
                    uniform.buffers.clear();
                    uniform.buffers = allocate_buffers(backend, uniform.byte_size, image_count)?;
                }
            }
        }
        Ok(())
    }

    /// Binds an owned image to a sampler slot, releasing any previous one.
    ///
    /// The caller must ensure no submitted work still samples the old image.
    pub fn update_image(
        &mut self,
        backend: &B,
        slot: usize,
        pixels: &ImagePixels,
        source: impl Into<String>,
    ) -> Result<(), SlotError> {
        let texture = self.texture_mut(slot)?;
        let image = backend.create_image(pixels)?;
        texture.image = ImageResource::Owned {
            image,
            source: source.into(),
        };
        Ok(())
    }

    /// Points a sampler slot back at the shared default image.
    pub fn reset_image(&mut self, slot: usize) -> Result<(), SlotError> {
        let default_image = Rc::clone(&self.default_image);
        let texture = self.texture_mut(slot)?;
        texture.image = ImageResource::Default(default_image);
        Ok(())
    }

    pub fn update_sampler(
        &mut self,
        backend: &B,
        slot: usize,
        info: SamplerInfo,
    ) -> Result<(), SlotError> {
        let texture = self.texture_mut(slot)?;
        if texture.sampler.info == info {
            return Ok(());
        }
        texture.sampler = SamplerResource {
            sampler: backend.create_sampler(&info)?,
            info,
        };
        Ok(())
    }

    /// Stages bytes for a uniform slot; excess bytes are dropped.
    ///
    /// Returns how many bytes were staged. The data reaches the GPU on the
    /// next [`flush_uniforms`](Self::flush_uniforms) for each image.
    pub fn write_uniform(&mut self, slot: usize, data: &[u8]) -> Result<usize, SlotError> {
        let len = self.table.len();
        let descriptor = self
            .table
            .get_mut(slot)
            .ok_or(SlotError::OutOfRange { slot, len })?;
        match &mut descriptor.resource {
            Resource::UniformBuffer(uniform) => {
                let count = data.len().min(uniform.staging.len());
                uniform.staging[..count].copy_from_slice(&data[..count]);
                Ok(count)
            }
            other => Err(SlotError::KindMismatch {
                slot,
                found: other.kind(),
                expected: BindingKind::UniformBuffer,
            }),
        }
    }

    /// Copies staged uniform bytes into the buffers owned by `image_index`.
    pub fn flush_uniforms(&self, backend: &B, image_index: usize) -> Result<(), GraphicsApiError> {
        for descriptor in &self.table {
            if let Resource::UniformBuffer(uniform) = &descriptor.resource {
                if let Some(buffer) = uniform.buffers.get(image_index) {
                    backend.write_uniform_buffer(buffer, &uniform.staging)?;
                }
            }
        }
        Ok(())
    }

    pub fn uses_default_image(&self, slot: usize) -> bool {
        self.table
            .get(slot)
            .and_then(|descriptor| descriptor.resource.as_texture())
            .is_some_and(|texture| texture.image.is_default())
    }

    /// Slot position of the binding declared at `index`.
    pub fn slot_of(&self, index: u32) -> Option<usize> {
        self.table
            .iter()
            .position(|descriptor| descriptor.binding.index == index)
    }

    fn texture_mut(&mut self, slot: usize) -> Result<&mut TextureResource<B>, SlotError> {
        let len = self.table.len();
        let descriptor = self
            .table
            .get_mut(slot)
            .ok_or(SlotError::OutOfRange { slot, len })?;
        match &mut descriptor.resource {
            Resource::CombinedImageSampler(texture) => Ok(texture),
            other => Err(SlotError::KindMismatch {
                slot,
                found: other.kind(),
                expected: BindingKind::CombinedImageSampler,
            }),
        }
    }
}
