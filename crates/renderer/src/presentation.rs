//! Double-buffered acquire, submit and present loop.
//!
//! ```text
//!            mark_stale / out-of-date / suboptimal
//!   Ready ───────────────────────────────────────▶ NeedsRecreate
//!     ▲                                                  │ recreate()
//!     └──────────────────── Recreating ◀─────────────────┘
//! ```
//!
//! The CPU may run at most [`MAX_FRAMES_IN_FLIGHT`] frames ahead of the GPU.
//! Each frame slot owns its own semaphores and fence; the image-in-flight
//! table remembers which slot last rendered to each presentable image because
//! the image count rarely equals the slot count.

use crate::backend::{AcquireOutcome, Backend, PresentOutcome, PresentableChain};
use crate::error::GraphicsApiError;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    NeedsRecreate,
    Recreating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image(u32),
    NeedsRecreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Ok,
    NeedsRecreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    Ready,
    /// The surface has no area (minimised window); try again later.
    Deferred,
}

/// Objects built against a particular chain that must follow it through
/// recreation.
pub trait ChainDependents<B: Backend> {
    fn release(&mut self);
    fn rebuild(&mut self, backend: &B, chain: &B::Chain) -> Result<(), GraphicsApiError>;
}

struct FrameSlot<B: Backend> {
    image_available: B::Semaphore,
    render_finished: B::Semaphore,
    in_flight: B::Fence,
}

impl<B: Backend> FrameSlot<B> {
    fn new(backend: &B) -> Result<Self, GraphicsApiError> {
        Ok(Self {
            image_available: backend.create_semaphore()?,
            render_finished: backend.create_semaphore()?,
            in_flight: backend.create_fence(true)?,
        })
    }
}

pub struct FramePresentationEngine<B: Backend> {
    command_buffers: Vec<B::CommandBuffer>,
    chain: Option<B::Chain>,
    slots: Vec<FrameSlot<B>>,
    /// Frame slot that last submitted work for each presentable image.
    images_in_flight: Vec<Option<usize>>,
    current_frame: usize,
    state: EngineState,
    stale: bool,
}

impl<B: Backend> FramePresentationEngine<B> {
    /// Creates the frame slots. No chain exists until the first [`recreate`].
    ///
    /// [`recreate`]: Self::recreate
    pub fn new(backend: &B) -> Result<Self, GraphicsApiError> {
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSlot::new(backend))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            command_buffers: Vec::new(),
            chain: None,
            slots,
            images_in_flight: Vec::new(),
            current_frame: 0,
            state: EngineState::NeedsRecreate,
            stale: false,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn chain(&self) -> Option<&B::Chain> {
        self.chain.as_ref()
    }

    pub fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, |chain| chain.image_count())
    }

    pub fn images_in_flight(&self) -> &[Option<usize>] {
        &self.images_in_flight
    }

    /// Flags the chain as stale; the next tick recreates it.
    pub fn mark_stale(&mut self) {
        if self.state == EngineState::Ready {
            self.state = EngineState::NeedsRecreate;
        }
    }

    /// Waits for the current slot's fence, then acquires an image.
    ///
    /// An out-of-date surface is reported as [`Acquired::NeedsRecreate`],
    /// never as an error.
    pub fn acquire_next_image(&mut self, backend: &B) -> Result<Acquired, GraphicsApiError> {
        if self.state != EngineState::Ready {
            return Ok(Acquired::NeedsRecreate);
        }
        let Some(chain) = self.chain.as_ref() else {
            self.state = EngineState::NeedsRecreate;
            return Ok(Acquired::NeedsRecreate);
        };
        let slot = &self.slots[self.current_frame];
        backend.wait_for_fence(&slot.in_flight)?;
        match backend.acquire_next_image(chain, &slot.image_available)? {
            AcquireOutcome::Acquired { index, suboptimal } => {
                if suboptimal {
                    tracing::debug!(index, "acquired image from a suboptimal surface");
                    self.stale = true;
                }
                Ok(Acquired::Image(index))
            }
            AcquireOutcome::OutOfDate => {
                tracing::debug!("surface out of date on acquire");
                self.state = EngineState::NeedsRecreate;
                Ok(Acquired::NeedsRecreate)
            }
        }
    }

    /// Records, submits and presents `image_index` from the current slot.
    ///
    /// `record` receives the image's command buffer after any earlier frame
    /// still rendering to that image has completed.
    pub fn present<F>(
        &mut self,
        backend: &B,
        image_index: u32,
        record: F,
    ) -> Result<Presented, GraphicsApiError>
    where
        F: FnOnce(&B::CommandBuffer, &B::Chain) -> Result<(), GraphicsApiError>,
    {
        let chain = self
            .chain
            .as_ref()
            .ok_or_else(|| GraphicsApiError::Invalid("present without a chain".into()))?;
        let index = image_index as usize;
        let command_buffer = self.command_buffers.get(index).ok_or_else(|| {
            GraphicsApiError::Invalid(format!(
                "image {index} is outside a chain of {} images",
                self.command_buffers.len()
            ))
        })?;

        if let Some(previous) = self.images_in_flight[index] {
            if previous != self.current_frame {
                backend.wait_for_fence(&self.slots[previous].in_flight)?;
            }
        }
        self.images_in_flight[index] = Some(self.current_frame);

        record(command_buffer, chain)?;

        let slot = &self.slots[self.current_frame];
        backend.reset_fence(&slot.in_flight)?;
        backend.submit(
            command_buffer,
            &slot.image_available,
            &slot.render_finished,
            &slot.in_flight,
        )?;
        let outcome = backend.present(chain, image_index, &slot.render_finished)?;
        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;

        let stale = std::mem::take(&mut self.stale);
        match outcome {
            PresentOutcome::Presented if !stale => Ok(Presented::Ok),
            outcome => {
                tracing::debug!(?outcome, "surface needs recreation after present");
                self.state = EngineState::NeedsRecreate;
                Ok(Presented::NeedsRecreate)
            }
        }
    }

    /// Rebuilds the chain and everything built against it.
    ///
    /// Waits for the device to go idle, drops the chain, then the dependents,
    /// then the command buffers, and builds them back in reverse.
    pub fn recreate<D>(
        &mut self,
        backend: &B,
        dependents: &mut D,
    ) -> Result<RecreateOutcome, GraphicsApiError>
    where
        D: ChainDependents<B>,
    {
        let extent = backend.surface_extent()?;
        if extent.is_empty() {
            tracing::debug!(%extent, "surface has no area; deferring recreation");
            self.state = EngineState::NeedsRecreate;
            return Ok(RecreateOutcome::Deferred);
        }

        self.state = EngineState::Recreating;
        match self.rebuild_chain(backend, dependents) {
            Ok(()) => {
                self.state = EngineState::Ready;
                Ok(RecreateOutcome::Ready)
            }
            Err(err) => {
                self.state = EngineState::NeedsRecreate;
                Err(err)
            }
        }
    }

    fn rebuild_chain<D>(&mut self, backend: &B, dependents: &mut D) -> Result<(), GraphicsApiError>
    where
        D: ChainDependents<B>,
    {
        backend.wait_idle()?;
        self.chain = None;
        dependents.release();
        self.command_buffers.clear();

        let chain = backend.create_chain()?;
        let image_count = chain.image_count();
        self.command_buffers = backend.create_command_buffers(image_count)?;
        self.images_in_flight = vec![None; image_count];
        self.stale = false;
        dependents.rebuild(backend, &chain)?;
        tracing::info!(
            extent = %chain.extent(),
            images = image_count,
            "presentable chain ready"
        );
        self.chain = Some(chain);
        Ok(())
    }

    /// Drops the chain and per-image command buffers. The device must be idle.
    pub fn release(&mut self) {
        self.chain = None;
        self.command_buffers.clear();
        self.images_in_flight.clear();
        self.state = EngineState::NeedsRecreate;
    }
}
