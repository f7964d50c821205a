use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use chrono::{Datelike, Local, Timelike};

/// Snapshot of the time state supplied to the shader uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Seconds since the previous sample.
    pub delta: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(seconds: f32, delta: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            delta,
            frame_index,
        }
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    last: f32,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            last: 0.0,
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn sample(&mut self) -> TimeSample {
        let seconds = self.origin.elapsed().as_secs_f32();
        let sample = TimeSample::new(seconds, (seconds - self.last).max(0.0), self.frame);
        self.last = seconds;
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Time source that always reports a fixed timestamp; only the frame counter
/// advances.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    time: f32,
    frame: u64,
}

impl FixedTimeSource {
    pub fn new(time: f32) -> Self {
        Self { time, frame: 0 }
    }

    pub fn time(&self) -> f32 {
        self.time
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.time, 0.0, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Per-frame values written into the first uniform block of the fragment
/// shader. Laid out to match a std140 block of three `vec4`s followed by four
/// `float`s.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// Surface width and height in pixels; `z` is the pixel aspect (always 1).
    pub resolution: [f32; 4],
    /// Cursor position in `xy`, last click position in `zw` (origin bottom-left).
    pub mouse: [f32; 4],
    /// Year, month (0-based), day, seconds since midnight.
    pub date: [f32; 4],
    pub time: f32,
    pub time_delta: f32,
    pub frame_index: f32,
    pub padding: f32,
}

impl FrameUniforms {
    pub fn new(width: u32, height: u32) -> Self {
        let mut uniforms = Self::zeroed();
        uniforms.set_resolution(width, height);
        uniforms.refresh_date();
        uniforms
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = [width as f32, height as f32, 1.0, 0.0];
    }

    pub fn set_mouse(&mut self, mouse: [f32; 4]) {
        self.mouse = mouse;
    }

    pub fn apply_time(&mut self, sample: TimeSample) {
        self.time = sample.seconds;
        self.time_delta = sample.delta;
        self.frame_index = sample.frame_index as f32;
    }

    pub fn refresh_date(&mut self) {
        let now = Local::now();
        let seconds = now.num_seconds_from_midnight() as f32
            + now.timestamp_subsec_nanos() as f32 / 1_000_000_000.0;
        self.date = [
            now.year() as f32,
            now.month0() as f32,
            now.day() as f32,
            seconds,
        ];
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
