// =============================================================================
// WINDOW - winit window creation, key state tracking, FPS counter
// =============================================================================
//
// The engine itself only sees raw window/display handles. This module is the
// thin winit layer the binary uses to get them.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use winit::dpi::PhysicalSize;
use winit::error::OsError;
use winit::event::{ElementState, KeyEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes};

/// Used when a whole-monitor window is requested but no monitor is reported.
pub const FALLBACK_SIZE: (u32, u32) = (1280, 720);

/// Window size as asked for on the command line or in config.toml.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl WindowRequest {
    /// A zero in either dimension means "cover the monitor"; such a window
    /// is not resizable.
    pub fn resolve(&self, monitor_size: (u32, u32)) -> ResolvedWindow {
        if self.width == 0 || self.height == 0 {
            ResolvedWindow {
                width: monitor_size.0,
                height: monitor_size.1,
                resizable: false,
            }
        } else {
            ResolvedWindow {
                width: self.width,
                height: self.height,
                resizable: true,
            }
        }
    }
}

/// Attributes for `request`. A whole-monitor window is created maximized so
/// the window manager fits it to the work area, leaving panels visible.
pub fn window_attributes(request: &WindowRequest, monitor_size: (u32, u32)) -> WindowAttributes {
    let resolved = request.resolve(monitor_size);
    Window::default_attributes()
        .with_title(request.title.clone())
        .with_inner_size(PhysicalSize::new(resolved.width, resolved.height))
        .with_resizable(resolved.resizable)
        .with_maximized(!resolved.resizable)
}

/// Create the window on the primary monitor.
///
/// The final size of a maximized window is only known afterwards; callers
/// read it back with `Window::inner_size`.
pub fn create_window(
    event_loop: &ActiveEventLoop,
    request: &WindowRequest,
) -> Result<Window, OsError> {
    let monitor_size = event_loop
        .primary_monitor()
        .map(|m| (m.size().width, m.size().height))
        .unwrap_or(FALLBACK_SIZE);
    let attributes = window_attributes(request, monitor_size);

    log::info!(
        "Creating window '{}' (requested {}x{}, maximized: {})",
        request.title,
        request.width,
        request.height,
        attributes.maximized
    );

    let window = event_loop.create_window(attributes)?;
    let size = window.inner_size();
    log::info!("Window created with {}x{} drawable", size.width, size.height);
    Ok(window)
}

// =============================================================================
// KEY STATES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
    Held,
}

/// Latest state per key.
///
/// Filled from window events and read by the strategy's input hook. After
/// the hook runs the engine calls `end_frame`: released keys are dropped and
/// pressed keys become held until their release event arrives.
#[derive(Debug, Default)]
pub struct KeyStates {
    states: HashMap<KeyCode, KeyState>,
}

impl KeyStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: KeyCode, pressed: bool, repeat: bool) {
        let state = match (pressed, repeat) {
            (true, true) => KeyState::Held,
            (true, false) => KeyState::Pressed,
            (false, _) => KeyState::Released,
        };
        self.states.insert(key, state);
    }

    /// Feed a winit key event. Keys without a physical code are ignored.
    pub fn handle_event(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(key) = event.physical_key {
            self.record(key, event.state == ElementState::Pressed, event.repeat);
        }
    }

    pub fn get(&self, key: KeyCode) -> Option<KeyState> {
        self.states.get(&key).copied()
    }

    /// Read a key and mark it consumed.
    pub fn take(&mut self, key: KeyCode) -> Option<KeyState> {
        self.states.remove(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn end_frame(&mut self) {
        self.states.retain(|_, state| match state {
            KeyState::Released => false,
            KeyState::Pressed => {
                *state = KeyState::Held;
                true
            }
            KeyState::Held => true,
        });
    }
}

// =============================================================================
// FPS COUNTER
// =============================================================================

/// Counts frames and reports the rate roughly once per interval.
#[derive(Debug)]
pub struct FpsCounter {
    interval: Duration,
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, Duration::from_secs(1))
    }

    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self {
            interval,
            frames: 0,
            window_start: now,
        }
    }

    /// Count a frame; returns the average FPS whenever an interval has passed.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}
