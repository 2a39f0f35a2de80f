//! Scripted capture provider
//!
//! Synthesizes frames and audio energy from a shared [`ScriptedFeed`], so a
//! simulation or test can move the "candidate" in and out of view while the
//! controller owns the provider.

use super::{poll_until_ready, CaptureError, CaptureHandle, CaptureProvider, Frame};
use crate::error::DeviceError;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;

/// Warm background the presence heuristics read as bright
const BACKGROUND: [u8; 3] = [150, 140, 135];
/// Skin-like patch standing in for a face
const FACE: [u8; 3] = [205, 150, 120];
/// Covered lens
const COVERED: [u8; 3] = [8, 8, 10];

#[derive(Debug, Default)]
struct FeedState {
    present: bool,
    energy: f64,
    /// Reads that fail before the next one succeeds
    failing_reads: u32,
    acquire_failure: Option<DeviceError>,
    /// Readiness polls before the first frame is readable
    warmup_polls: u32,
    acquire_calls: u32,
    release_calls: u32,
    live: Option<CaptureHandle>,
}

/// Shared control surface for a [`ScriptedCapture`]
#[derive(Debug, Clone, Default)]
pub struct ScriptedFeed {
    state: Arc<Mutex<FeedState>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        let feed = Self::default();
        feed.lock().present = true;
        feed
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_present(&self, present: bool) {
        self.lock().present = present;
    }

    pub fn set_energy(&self, energy: f64) {
        self.lock().energy = energy;
    }

    /// Make the next `count` frame/energy reads fail
    pub fn fail_reads(&self, count: u32) {
        self.lock().failing_reads = count;
    }

    /// Make every `acquire` fail with `error` (None restores success)
    pub fn fail_acquire(&self, error: Option<DeviceError>) {
        self.lock().acquire_failure = error;
    }

    pub fn set_warmup_polls(&self, polls: u32) {
        self.lock().warmup_polls = polls;
    }

    pub fn acquire_calls(&self) -> u32 {
        self.lock().acquire_calls
    }

    /// Releases that actually freed a live handle
    pub fn release_calls(&self) -> u32 {
        self.lock().release_calls
    }

    pub fn is_live(&self) -> bool {
        self.lock().live.is_some()
    }
}

/// Capture provider backed by a [`ScriptedFeed`]
#[derive(Debug, Clone)]
pub struct ScriptedCapture {
    feed: ScriptedFeed,
}

impl ScriptedCapture {
    pub fn new(feed: ScriptedFeed) -> Self {
        Self { feed }
    }

    fn check_handle(state: &FeedState, handle: &CaptureHandle) -> Result<(), CaptureError> {
        match &state.live {
            Some(live) if live == handle => Ok(()),
            _ => Err(CaptureError::Released),
        }
    }

    fn synthesize(present: bool) -> Frame {
        if present {
            let mut frame = Frame::solid(FRAME_WIDTH, FRAME_HEIGHT, BACKGROUND);
            frame.fill_rect(20, 8, 24, 30, FACE);
            frame
        } else {
            Frame::solid(FRAME_WIDTH, FRAME_HEIGHT, COVERED)
        }
    }
}

impl CaptureProvider for ScriptedCapture {
    fn acquire(&mut self) -> Result<CaptureHandle, DeviceError> {
        {
            let mut state = self.feed.lock();
            state.acquire_calls += 1;
            if let Some(err) = state.acquire_failure.clone() {
                return Err(err);
            }
        }

        let polls = poll_until_ready(
            || {
                let mut state = self.feed.lock();
                if state.warmup_polls == 0 {
                    Ok(true)
                } else {
                    state.warmup_polls -= 1;
                    Ok(false)
                }
            },
            || {},
        )?;

        let handle = CaptureHandle::new("scripted-camera");
        debug!(polls, handle = %handle.id, "scripted capture ready");
        self.feed.lock().live = Some(handle.clone());
        Ok(handle)
    }

    fn release(&mut self, handle: &CaptureHandle) {
        let mut state = self.feed.lock();
        if state.live.as_ref() == Some(handle) {
            state.live = None;
            state.release_calls += 1;
        }
    }

    fn read_frame(&mut self, handle: &CaptureHandle) -> Result<Frame, CaptureError> {
        let mut state = self.feed.lock();
        Self::check_handle(&state, handle)?;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(CaptureError::NotReady);
        }
        Ok(Self::synthesize(state.present))
    }

    fn sample_energy(&mut self, handle: &CaptureHandle) -> Result<f64, CaptureError> {
        let mut state = self.feed.lock();
        Self::check_handle(&state, handle)?;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(CaptureError::NotReady);
        }
        Ok(state.energy)
    }
}
