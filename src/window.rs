// Window - winit driven by polling
//
// The frame loop owns control flow, so the event loop is pumped once per
// iteration instead of handing control to `run_app`. Resizing is disabled:
// the swapchain is never recreated.

use anyhow::{Context, Result};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{WindowAttributes, WindowId},
};

use crate::error::Stage;
use crate::frame::EventSource;

/// Pumps allowed for the platform to deliver `resumed` at startup
const STARTUP_PUMPS: u32 = 1000;

struct WindowState {
    attributes: WindowAttributes,
    window: Option<winit::window::Window>,
    create_error: Option<OsError>,
    /// Set once creation was attempted; the window may since have moved out
    created: bool,
    closed: bool,
}

impl WindowState {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes,
            window: None,
            create_error: None,
            created: false,
            closed: false,
        }
    }

    /// Only the first `resumed` creates a window. Later ones (suspend/resume
    /// on mobile) keep the one already handed out.
    fn should_create(&mut self) -> bool {
        !std::mem::replace(&mut self.created, true)
    }
}

impl ApplicationHandler for WindowState {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !self.should_create() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                self.create_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.closed = true;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.closed = true;
                }
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{} (ignored)", size.width, size.height);
            }

            _ => {}
        }
    }
}

pub struct Window {
    // Dropped before the event loop that created it
    inner: winit::window::Window,
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl Window {
    pub fn create(title: &str, width: u32, height: u32) -> Result<Self> {
        log::info!("Creating window: {} ({}x{})", title, width, height);

        let mut event_loop = EventLoop::new().context(Stage::WindowCreate)?;

        let attributes = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(false);

        let mut state = WindowState::new(attributes);

        for _ in 0..STARTUP_PUMPS {
            let status = event_loop.pump_app_events(Some(Duration::ZERO), &mut state);

            if let Some(e) = state.create_error.take() {
                return Err(e).context(Stage::WindowCreate);
            }

            if let Some(inner) = state.window.take() {
                return Ok(Self {
                    inner,
                    state,
                    event_loop,
                });
            }

            if let PumpStatus::Exit(code) = status {
                return Err(anyhow::Error::new(Stage::WindowCreate))
                    .with_context(|| format!("Event loop exited during startup ({})", code));
            }
        }

        Err(anyhow::Error::new(Stage::WindowCreate)).context("Platform never resumed the application")
    }

    /// The platform window, for surface creation
    pub fn raw(&self) -> &winit::window::Window {
        &self.inner
    }
}

impl EventSource for Window {
    fn is_closed(&self) -> bool {
        self.state.closed
    }

    fn update(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);

        if let PumpStatus::Exit(_) = status {
            self.state.closed = true;
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        log::info!("Destroying window");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_resume_creates() {
        let mut state = WindowState::new(WindowAttributes::default());
        assert!(state.should_create());

        // The window has been handed to Window by now, so `window` is empty
        assert!(state.window.is_none());
        assert!(!state.should_create());
        assert!(!state.should_create());
    }
}
