use crate::backend::{Backend, DescriptorPoolSizes, DescriptorWrite};
use crate::error::{GraphicsApiError, RebuildError};
use crate::resources::{Descriptor, Resource};
use crate::types::{Binding, BindingKind};

/// Per-kind descriptor head-room reserved for every presentable image.
///
/// Pools are sized for this bound rather than the current shader so rapid
/// edits never have to grow them.
pub const MAX_DESCRIPTORS_PER_KIND: u32 = 128;

/// Layout, pool and one descriptor set per presentable image.
///
/// Always rebuilt wholesale. Fields drop in declaration order: sets before the
/// pool they were allocated from, the layout last.
pub struct DescriptorResourceSet<B: Backend> {
    sets: Vec<B::DescriptorSet>,
    pool: B::DescriptorPool,
    layout: B::DescriptorLayout,
}

impl<B: Backend> DescriptorResourceSet<B> {
    /// Rejects binding lists the pool could never hold.
    ///
    /// Runs before any teardown so an oversized shader leaves the current
    /// state intact.
    pub fn check_capacity(bindings: &[Binding]) -> Result<(), RebuildError> {
        for kind in [BindingKind::UniformBuffer, BindingKind::CombinedImageSampler] {
            let count = bindings.iter().filter(|binding| binding.kind == kind).count();
            if count > MAX_DESCRIPTORS_PER_KIND as usize {
                return Err(RebuildError::TooManyDescriptors {
                    kind,
                    count,
                    limit: MAX_DESCRIPTORS_PER_KIND,
                });
            }
        }
        Ok(())
    }

    pub fn rebuild(
        backend: &B,
        table: &[Descriptor<B>],
        image_count: usize,
    ) -> Result<Self, GraphicsApiError> {
        let bindings: Vec<Binding> = table
            .iter()
            .map(|descriptor| descriptor.binding.clone())
            .collect();
        let layout = backend.create_descriptor_layout(&bindings)?;

        let max_sets = u32::try_from(image_count.max(1))
            .map_err(|_| GraphicsApiError::Invalid(format!("{image_count} images")))?;
        let per_kind = MAX_DESCRIPTORS_PER_KIND.saturating_mul(max_sets);
        let pool = backend.create_descriptor_pool(&DescriptorPoolSizes {
            uniform_buffers: per_kind,
            combined_image_samplers: per_kind,
            max_sets,
        })?;
        let sets = backend.allocate_descriptor_sets(&pool, &layout, image_count)?;

        let resource_set = Self { sets, pool, layout };
        resource_set.write_all(backend, table)?;
        tracing::debug!(
            bindings = bindings.len(),
            sets = resource_set.sets.len(),
            "rebuilt descriptor sets"
        );
        Ok(resource_set)
    }

    /// Points every set at the table's current resources.
    ///
    /// Set `i` receives uniform buffer `i` of each uniform slot. No submitted
    /// work may be using the sets while they are rewritten.
    pub fn write_all(&self, backend: &B, table: &[Descriptor<B>]) -> Result<(), GraphicsApiError> {
        for (image, set) in self.sets.iter().enumerate() {
            let mut writes = Vec::with_capacity(table.len());
            for descriptor in table {
                let binding = descriptor.binding.index;
                match &descriptor.resource {
                    Resource::UniformBuffer(uniform) => {
                        let buffer = uniform.buffers.get(image).ok_or_else(|| {
                            GraphicsApiError::Invalid(format!(
                                "binding {binding} has {} uniform buffers, image {image} needs one",
                                uniform.buffers.len()
                            ))
                        })?;
                        writes.push(DescriptorWrite::UniformBuffer {
                            binding,
                            buffer,
                            range: u64::from(uniform.byte_size),
                        });
                    }
                    Resource::CombinedImageSampler(texture) => {
                        writes.push(DescriptorWrite::CombinedImageSampler {
                            binding,
                            image: texture.image.handle(),
                            sampler: &texture.sampler.sampler,
                        });
                    }
                }
            }
            backend.update_descriptor_set(set, &writes)?;
        }
        Ok(())
    }

    pub fn layout(&self) -> &B::DescriptorLayout {
        &self.layout
    }

    pub fn set(&self, image_index: usize) -> Option<&B::DescriptorSet> {
        self.sets.get(image_index)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Event, Kind, MockBackend};
    use crate::resources::ResourceReconciler;
    use crate::types::ShaderStage;

    #[test]
    fn one_set_per_image_with_every_slot_written() {
        let backend = MockBackend::new(3);
        let mut reconciler = ResourceReconciler::new(&backend).unwrap();
        let bindings = vec![
            Binding::uniform_buffer(0, ShaderStage::Fragment, 64),
            Binding::combined_image_sampler(1, ShaderStage::Fragment),
        ];
        reconciler.reconcile(&backend, &bindings, 3).unwrap();
        backend.journal.clear();

        let set = DescriptorResourceSet::rebuild(&backend, reconciler.table(), 3).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(backend.journal.created(Kind::DescriptorLayout), 1);
        assert_eq!(backend.journal.created(Kind::DescriptorPool), 1);
        assert_eq!(
            backend
                .journal
                .count(|event| matches!(event, Event::DescriptorWrite { writes: 2, .. })),
            3
        );
    }

    #[test]
    fn empty_tables_still_get_sets() {
        let backend = MockBackend::new(2);
        let reconciler = ResourceReconciler::new(&backend).unwrap();
        let set = DescriptorResourceSet::rebuild(&backend, reconciler.table(), 2).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.set(1).is_some());
        assert!(set.set(2).is_none());
    }

    #[test]
    fn dropping_releases_sets_before_pool_and_layout() {
        let backend = MockBackend::new(2);
        let reconciler = ResourceReconciler::new(&backend).unwrap();
        let set = DescriptorResourceSet::rebuild(&backend, reconciler.table(), 2).unwrap();
        backend.journal.clear();
        drop(set);

        let kinds: Vec<Kind> = backend
            .journal
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Destroyed(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                Kind::DescriptorSet,
                Kind::DescriptorSet,
                Kind::DescriptorPool,
                Kind::DescriptorLayout
            ]
        );
    }

    #[test]
    fn oversized_shaders_are_rejected_up_front() {
        let bindings: Vec<Binding> = (0..=MAX_DESCRIPTORS_PER_KIND)
            .map(|index| Binding::combined_image_sampler(index, ShaderStage::Fragment))
            .collect();
        let err = DescriptorResourceSet::<MockBackend>::check_capacity(&bindings).unwrap_err();
        assert!(matches!(
            err,
            RebuildError::TooManyDescriptors {
                kind: BindingKind::CombinedImageSampler,
                count: 129,
                ..
            }
        ));
        assert!(DescriptorResourceSet::<MockBackend>::check_capacity(&bindings[..4]).is_ok());
    }
}
