use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use tracing::{error, info, warn};

use crate::compile::{compile_builtin, compile_configured};
use crate::error::SlotError;
use crate::gpu::VulkanBackend;
use crate::orchestrator::{FrameOrchestrator, FrameStatus};
use crate::reflect;
use crate::runtime::{BoxedTimeSource, FrameUniforms, SystemTimeSource};
use crate::textures::load_image;
use crate::types::{Extent, RendererConfig, ShaderStage, TextureBinding};
use crate::watch::SourceWatcher;

/// Everything the render thread reacts to between frames.
///
/// Window callbacks and the file watcher post these; the loop drains them
/// before drawing, so GPU state only changes on the render thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoopEvent {
    SourceChanged(PathBuf),
    Resized(Extent),
    Reload,
}

/// Window, GPU engine and per-frame inputs for one editing session.
struct LiveSession {
    // Declared before `window`: the surface must go before the window does.
    orchestrator: Option<FrameOrchestrator<VulkanBackend>>,
    window: Window,
    config: RendererConfig,
    events: Receiver<LoopEvent>,
    time: BoxedTimeSource,
    uniforms: FrameUniforms,
    mouse: MouseState,
}

impl LiveSession {
    fn new(window: Window, config: RendererConfig, events: Receiver<LoopEvent>) -> Result<Self> {
        let size = window.inner_size();
        let backend = VulkanBackend::new(
            &window,
            Extent::new(size.width, size.height),
            config.present_mode,
        )
        .context("failed to initialise Vulkan")?;

        let vertex = compile_configured(&config, ShaderStage::Vertex)
            .context("failed to compile the vertex shader")?;
        let fragment = match checked_fragment(&config) {
            Ok(code) => code,
            Err(err) => {
                error!("{err:#}");
                warn!("starting with the built-in fragment shader");
                compile_builtin(config.shader_compiler, ShaderStage::Fragment)?
            }
        };
        let orchestrator = FrameOrchestrator::new(backend, &vertex, &fragment)
            .context("failed to build the render pipeline")?;

        let mut session = Self {
            orchestrator: Some(orchestrator),
            window,
            uniforms: FrameUniforms::new(size.width, size.height),
            config,
            events,
            time: Box::new(SystemTimeSource::new()),
            mouse: MouseState::default(),
        };
        session.apply_textures(false)?;
        Ok(session)
    }

    /// The vertex stage is compiled once at start-up; only the fragment
    /// source is hot-reloaded.
    fn watched_paths(&self) -> Vec<PathBuf> {
        self.config.fragment_source.iter().cloned().collect()
    }

    /// Applies every resolved event in arrival order.
    fn drain_events(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            match event {
                LoopEvent::Resized(extent) => {
                    tracing::debug!(%extent, "surface resized");
                    if let Some(orchestrator) = self.orchestrator.as_mut() {
                        orchestrator.on_surface_resized();
                    }
                }
                LoopEvent::SourceChanged(path) => {
                    info!(path = %path.display(), "shader source changed; reloading");
                    self.reload()?;
                }
                LoopEvent::Reload => {
                    info!("reload requested");
                    self.reload()?;
                }
            }
        }
        Ok(())
    }

    /// Recompiles the fragment shader and swaps it in.
    ///
    /// Compile and reflection failures are logged and the running shader keeps
    /// drawing; only graphics failures propagate.
    fn reload(&mut self) -> Result<()> {
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return Ok(());
        };
        let code = match compile_configured(&self.config, ShaderStage::Fragment) {
            Ok(code) => code,
            Err(err) => {
                error!("{err:#}");
                return Ok(());
            }
        };
        match orchestrator.on_shader_recompiled(&code) {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "shader rejected; keeping the previous version");
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to swap in the new shader"),
        }
        self.time.reset();
        self.apply_textures(true)
    }

    /// Binds configured textures to their sampler slots.
    ///
    /// With `only_defaults` set, slots already holding a user image are left
    /// alone; after a reload this restores images to slots that came back as
    /// the placeholder.
    fn apply_textures(&mut self, only_defaults: bool) -> Result<()> {
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return Ok(());
        };
        for texture in &self.config.textures {
            match apply_texture(orchestrator, texture, only_defaults) {
                Ok(()) => {}
                Err(SlotError::Graphics(err)) => {
                    return Err(err).context("failed to upload texture");
                }
                Err(err) => {
                    warn!(binding = texture.binding, error = %err, "texture not applied");
                }
            }
        }
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return Ok(FrameStatus::Deferred);
        };
        let size = self.window.inner_size();
        self.uniforms.set_resolution(size.width, size.height);
        self.uniforms
            .set_mouse(self.mouse.as_uniform(size.height.max(1) as f32));
        self.uniforms.apply_time(self.time.sample());
        self.uniforms.refresh_date();
        orchestrator.write_frame_uniforms(self.uniforms.as_bytes());

        let status = orchestrator.render_frame()?;
        tracing::trace!(?status, "frame");
        Ok(status)
    }

    fn resized(&mut self, size: PhysicalSize<u32>, events: &Sender<LoopEvent>) {
        let extent = Extent::new(size.width, size.height);
        if let Some(orchestrator) = self.orchestrator.as_ref() {
            orchestrator.backend().set_window_extent(extent);
        }
        let _ = events.send(LoopEvent::Resized(extent));
    }

    fn shutdown(&mut self) {
        if let Some(orchestrator) = self.orchestrator.take() {
            match orchestrator.shutdown() {
                Ok(()) => info!("renderer shut down"),
                Err(err) => error!(error = %err, "renderer shutdown failed"),
            }
        }
    }
}

fn checked_fragment(config: &RendererConfig) -> Result<Vec<u32>> {
    let code = compile_configured(config, ShaderStage::Fragment)?;
    reflect::reflect(&code).context("fragment shader failed reflection")?;
    Ok(code)
}

fn apply_texture(
    orchestrator: &mut FrameOrchestrator<VulkanBackend>,
    texture: &TextureBinding,
    only_defaults: bool,
) -> Result<(), SlotError> {
    let Some(slot) = orchestrator.slot_of(texture.binding) else {
        tracing::debug!(binding = texture.binding, "shader has no slot for texture");
        return Ok(());
    };
    if only_defaults && !orchestrator.uses_default_image(slot) {
        return Ok(());
    }
    let pixels = load_image(&texture.path)?;
    orchestrator.update_image(slot, &pixels, texture.path.display().to_string())?;
    orchestrator.update_sampler(slot, texture.sampler)?;
    info!(
        binding = texture.binding,
        path = %texture.path.display(),
        "texture applied"
    );
    Ok(())
}

/// Opens the preview window and runs the live-reload loop until the window is
/// closed or Escape is pressed.
pub(crate) fn run_window(config: RendererConfig) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(config.title.clone())
        .with_inner_size(PhysicalSize::new(
            config.surface_size.0,
            config.surface_size.1,
        ))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;

    let poll_interval = config.poll_interval;
    let (events_tx, events_rx) = unbounded();
    let mut session = LiveSession::new(window, config, events_rx)?;
    let _watcher = match session.watched_paths() {
        paths if paths.is_empty() => None,
        paths => Some(SourceWatcher::spawn(paths, poll_interval, events_tx.clone())?),
    };

    let mut failure: Option<anyhow::Error> = None;
    let fatal = &mut failure;
    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == session.window.id() => {
            match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                WindowEvent::KeyboardInput { event, .. } => match key_action(&event) {
                    Some(KeyAction::Exit) => elwt.exit(),
                    Some(KeyAction::Reload) => {
                        let _ = events_tx.send(LoopEvent::Reload);
                    }
                    None => {}
                },
                WindowEvent::CursorMoved { position, .. } => {
                    session.mouse.handle_cursor_moved(position);
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => session.mouse.handle_button(state),
                WindowEvent::Resized(size) => session.resized(size, &events_tx),
                WindowEvent::RedrawRequested => match session.render() {
                    Ok(FrameStatus::Deferred) => {
                        elwt.set_control_flow(ControlFlow::WaitUntil(
                            Instant::now() + poll_interval.min(Duration::from_millis(100)),
                        ));
                    }
                    Ok(_) => elwt.set_control_flow(ControlFlow::Poll),
                    Err(err) => {
                        error!("{err:#}");
                        *fatal = Some(err);
                        elwt.exit();
                    }
                },
                _ => {}
            }
        }
        Event::AboutToWait => {
            if let Err(err) = session.drain_events() {
                error!("{err:#}");
                *fatal = Some(err);
                elwt.exit();
                return;
            }
            session.window.request_redraw();
        }
        Event::LoopExiting => session.shutdown(),
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))?;
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Exit,
    Reload,
}

fn key_action(event: &KeyEvent) -> Option<KeyAction> {
    if event.state != ElementState::Pressed || event.repeat {
        return None;
    }
    match event.logical_key {
        Key::Named(NamedKey::Escape) => Some(KeyAction::Exit),
        Key::Named(NamedKey::F5) => Some(KeyAction::Reload),
        _ => None,
    }
}

#[derive(Default)]
struct MouseState {
    position: Option<PhysicalPosition<f64>>,
    pressed_anchor: Option<PhysicalPosition<f64>>,
    is_pressed: bool,
}

impl MouseState {
    fn handle_cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        self.position = Some(position);
        if self.is_pressed {
            self.pressed_anchor.get_or_insert(position);
        }
    }

    fn handle_button(&mut self, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.is_pressed = true;
                self.pressed_anchor = self.position;
            }
            ElementState::Released => {
                self.is_pressed = false;
                self.pressed_anchor = None;
            }
        }
    }

    /// Cursor in `xy` and click anchor in `zw`, flipped so y grows upwards.
    fn as_uniform(&self, height: f32) -> [f32; 4] {
        let mut data = [0.0; 4];
        if let Some(pos) = self.position {
            data[0] = pos.x as f32;
            data[1] = height - pos.y as f32;
        }
        if let Some(anchor) = self.pressed_anchor {
            data[2] = anchor.x as f32;
            data[3] = height - anchor.y as f32;
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_uniform_flips_y_and_tracks_clicks() {
        let mut mouse = MouseState::default();
        assert_eq!(mouse.as_uniform(100.0), [0.0; 4]);

        mouse.handle_cursor_moved(PhysicalPosition::new(10.0, 30.0));
        assert_eq!(mouse.as_uniform(100.0), [10.0, 70.0, 0.0, 0.0]);

        mouse.handle_button(ElementState::Pressed);
        mouse.handle_cursor_moved(PhysicalPosition::new(20.0, 40.0));
        assert_eq!(mouse.as_uniform(100.0), [20.0, 60.0, 10.0, 70.0]);

        mouse.handle_button(ElementState::Released);
        assert_eq!(mouse.as_uniform(100.0)[2..], [0.0, 0.0]);
    }
}
