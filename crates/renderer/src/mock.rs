//! Recording backend used by the engine tests.
//!
//! Every handle logs its creation and destruction into a shared journal so
//! tests can assert on churn and teardown order without a GPU. Submitted work
//! completes immediately: `submit` signals its fence.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::backend::{
    AcquireOutcome, Backend, DescriptorPoolSizes, DescriptorWrite, DrawCommand, PresentOutcome,
    PresentableChain,
};
use crate::error::GraphicsApiError;
use crate::pipeline::ShaderProgram;
use crate::textures::ImagePixels;
use crate::types::{Binding, Extent, SamplerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Buffer,
    Image,
    Sampler,
    ShaderModule,
    DescriptorLayout,
    DescriptorPool,
    DescriptorSet,
    Pipeline,
    Chain,
    CommandBuffer,
    Semaphore,
    Fence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Created(Kind, u32),
    Destroyed(Kind, u32),
    WaitFence(u32),
    ResetFence(u32),
    Acquire { semaphore: u32 },
    Draw { image: u32, set: u32 },
    Submit { fence: u32 },
    Present { image: u32 },
    DescriptorWrite { set: u32, writes: usize },
    WaitIdle,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Rc<RefCell<Vec<Event>>>);

impl Journal {
    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.0.borrow().iter().filter(|event| predicate(event)).count()
    }

    pub(crate) fn created(&self, kind: Kind) -> usize {
        self.count(|event| matches!(event, Event::Created(k, _) if *k == kind))
    }

    pub(crate) fn destroyed(&self, kind: Kind) -> usize {
        self.count(|event| matches!(event, Event::Destroyed(k, _) if *k == kind))
    }

    pub(crate) fn was_destroyed(&self, id: u32) -> bool {
        self.count(|event| matches!(event, Event::Destroyed(_, i) if *i == id)) > 0
    }

    /// Allocations plus deallocations of GPU objects.
    pub(crate) fn churn(&self) -> usize {
        self.count(|event| matches!(event, Event::Created(..) | Event::Destroyed(..)))
    }
}

#[derive(Debug)]
pub(crate) struct MockHandle {
    pub id: u32,
    kind: Kind,
    journal: Journal,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.journal.push(Event::Destroyed(self.kind, self.id));
    }
}

#[derive(Debug)]
pub(crate) struct MockBuffer {
    pub handle: MockHandle,
    pub size: u64,
    pub contents: RefCell<Vec<u8>>,
}

#[derive(Debug)]
pub(crate) struct MockChain {
    pub handle: MockHandle,
    image_count: usize,
    extent: Extent,
}

impl PresentableChain for MockChain {
    fn image_count(&self) -> usize {
        self.image_count
    }

    fn extent(&self) -> Extent {
        self.extent
    }
}

#[derive(Debug)]
pub(crate) struct MockFence {
    pub handle: MockHandle,
    signaled: Cell<bool>,
}

pub(crate) struct MockBackend {
    pub journal: Journal,
    next_id: Cell<u32>,
    next_image: Cell<u32>,
    pub image_count: Cell<usize>,
    pub extent: Cell<Extent>,
    acquire_script: RefCell<VecDeque<AcquireOutcome>>,
    present_script: RefCell<VecDeque<PresentOutcome>>,
}

impl MockBackend {
    pub(crate) fn new(image_count: usize) -> Self {
        Self {
            journal: Journal::default(),
            next_id: Cell::new(1),
            next_image: Cell::new(0),
            image_count: Cell::new(image_count),
            extent: Cell::new(Extent::new(640, 480)),
            acquire_script: RefCell::default(),
            present_script: RefCell::default(),
        }
    }

    /// Queues the outcome of a future acquire; unscripted acquires cycle images.
    pub(crate) fn script_acquire(&self, outcome: AcquireOutcome) {
        self.acquire_script.borrow_mut().push_back(outcome);
    }

    pub(crate) fn script_present(&self, outcome: PresentOutcome) {
        self.present_script.borrow_mut().push_back(outcome);
    }

    fn handle(&self, kind: Kind) -> MockHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.journal.push(Event::Created(kind, id));
        MockHandle {
            id,
            kind,
            journal: self.journal.clone(),
        }
    }
}

impl Backend for MockBackend {
    type Buffer = MockBuffer;
    type Image = MockHandle;
    type Sampler = MockHandle;
    type ShaderModule = MockHandle;
    type DescriptorLayout = MockHandle;
    type DescriptorPool = MockHandle;
    type DescriptorSet = MockHandle;
    type Pipeline = MockHandle;
    type Chain = MockChain;
    type CommandBuffer = MockHandle;
    type Semaphore = MockHandle;
    type Fence = MockFence;

    fn create_uniform_buffer(&self, size: u64) -> Result<MockBuffer, GraphicsApiError> {
        Ok(MockBuffer {
            handle: self.handle(Kind::Buffer),
            size,
            contents: RefCell::new(vec![0; size as usize]),
        })
    }

    fn write_uniform_buffer(&self, buffer: &MockBuffer, data: &[u8]) -> Result<(), GraphicsApiError> {
        let mut contents = buffer.contents.borrow_mut();
        let len = data.len().min(contents.len());
        contents[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    fn create_image(&self, _pixels: &ImagePixels) -> Result<MockHandle, GraphicsApiError> {
        Ok(self.handle(Kind::Image))
    }

    fn create_sampler(&self, _info: &SamplerInfo) -> Result<MockHandle, GraphicsApiError> {
        Ok(self.handle(Kind::Sampler))
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<MockHandle, GraphicsApiError> {
        if code.is_empty() {
            return Err(GraphicsApiError::Invalid("empty shader module".into()));
        }
        Ok(self.handle(Kind::ShaderModule))
    }

    fn create_descriptor_layout(&self, _bindings: &[Binding]) -> Result<MockHandle, GraphicsApiError> {
        Ok(self.handle(Kind::DescriptorLayout))
    }

    fn create_descriptor_pool(
        &self,
        _sizes: &DescriptorPoolSizes,
    ) -> Result<MockHandle, GraphicsApiError> {
        Ok(self.handle(Kind::DescriptorPool))
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: &MockHandle,
        _layout: &MockHandle,
        count: usize,
    ) -> Result<Vec<MockHandle>, GraphicsApiError> {
        Ok((0..count).map(|_| self.handle(Kind::DescriptorSet)).collect())
    }

    fn update_descriptor_set(
        &self,
        set: &MockHandle,
        writes: &[DescriptorWrite<'_, Self>],
    ) -> Result<(), GraphicsApiError> {
        self.journal.push(Event::DescriptorWrite {
            set: set.id,
            writes: writes.len(),
        });
        Ok(())
    }

    fn create_pipeline(
        &self,
        _vertex: &ShaderProgram<Self>,
        _fragment: &ShaderProgram<Self>,
        _layout: &MockHandle,
        _chain: &MockChain,
    ) -> Result<MockHandle, GraphicsApiError> {
        Ok(self.handle(Kind::Pipeline))
    }

    fn surface_extent(&self) -> Result<Extent, GraphicsApiError> {
        Ok(self.extent.get())
    }

    fn create_chain(&self) -> Result<MockChain, GraphicsApiError> {
        self.next_image.set(0);
        Ok(MockChain {
            handle: self.handle(Kind::Chain),
            image_count: self.image_count.get(),
            extent: self.extent.get(),
        })
    }

    fn create_command_buffers(&self, count: usize) -> Result<Vec<MockHandle>, GraphicsApiError> {
        Ok((0..count).map(|_| self.handle(Kind::CommandBuffer)).collect())
    }

    fn create_semaphore(&self) -> Result<MockHandle, GraphicsApiError> {
        Ok(self.handle(Kind::Semaphore))
    }

    fn create_fence(&self, signaled: bool) -> Result<MockFence, GraphicsApiError> {
        Ok(MockFence {
            handle: self.handle(Kind::Fence),
            signaled: Cell::new(signaled),
        })
    }

    fn wait_for_fence(&self, fence: &MockFence) -> Result<(), GraphicsApiError> {
        self.journal.push(Event::WaitFence(fence.handle.id));
        if fence.signaled.get() {
            Ok(())
        } else {
            Err(GraphicsApiError::Invalid(format!(
                "fence {} would never signal",
                fence.handle.id
            )))
        }
    }

    fn reset_fence(&self, fence: &MockFence) -> Result<(), GraphicsApiError> {
        self.journal.push(Event::ResetFence(fence.handle.id));
        fence.signaled.set(false);
        Ok(())
    }

    fn acquire_next_image(
        &self,
        chain: &MockChain,
        signal: &MockHandle,
    ) -> Result<AcquireOutcome, GraphicsApiError> {
        self.journal.push(Event::Acquire {
            semaphore: signal.id,
        });
        if let Some(outcome) = self.acquire_script.borrow_mut().pop_front() {
            return Ok(outcome);
        }
        let index = self.next_image.get();
        self.next_image
            .set((index + 1) % chain.image_count.max(1) as u32);
        Ok(AcquireOutcome::Acquired {
            index,
            suboptimal: false,
        })
    }

    fn record_draw(
        &self,
        _command_buffer: &MockHandle,
        draw: &DrawCommand<'_, Self>,
    ) -> Result<(), GraphicsApiError> {
        self.journal.push(Event::Draw {
            image: draw.image_index,
            set: draw.descriptor_set.id,
        });
        Ok(())
    }

    fn submit(
        &self,
        _command_buffer: &MockHandle,
        _wait: &MockHandle,
        _signal: &MockHandle,
        fence: &MockFence,
    ) -> Result<(), GraphicsApiError> {
        self.journal.push(Event::Submit {
            fence: fence.handle.id,
        });
        fence.signaled.set(true);
        Ok(())
    }

    fn present(
        &self,
        _chain: &MockChain,
        image_index: u32,
        _wait: &MockHandle,
    ) -> Result<PresentOutcome, GraphicsApiError> {
        self.journal.push(Event::Present { image: image_index });
        Ok(self
            .present_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn wait_idle(&self) -> Result<(), GraphicsApiError> {
        self.journal.push(Event::WaitIdle);
        Ok(())
    }
}
