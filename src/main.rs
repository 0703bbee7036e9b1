//! MaskCam - Main Entry Point
//!
//! A webcam toy that tracks glasses and crown masks to your face.
//! Click anywhere to switch to a new random mask.

use std::sync::Arc;
use std::time::{Duration, Instant};

use maskcam::config::AppConfig;
use maskcam::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "MaskCam";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Application state machine
enum AppState {
    /// Initial state before the window is created
    Uninitialized,
    /// Window and graphics context are ready
    Running { window: Arc<Window>, app: App },
}

struct MaskCamApp {
    config: AppConfig,
    state: AppState,
    next_redraw_at: Instant,
}

impl MaskCamApp {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: AppState::Uninitialized,
            next_redraw_at: Instant::now(),
        }
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000u64 / self.config.target_fps.max(1) as u64)
    }
}

impl ApplicationHandler for MaskCamApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let AppState::Uninitialized = &self.state {
            log::info!("Creating window...");

            let window_attributes = WindowAttributes::default()
                .with_title(WINDOW_TITLE)
                .with_inner_size(LogicalSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));

            let window = Arc::new(
                event_loop
                    .create_window(window_attributes)
                    .expect("Failed to create window"),
            );

            log::info!("Initializing wgpu and egui...");
            let mut app = pollster::block_on(App::new(window.clone(), self.config.clone()));

            // Start with a random mask, like a first click
            app.switch_mask();

            log::info!("MaskCam ready! Click to switch masks, ESC to exit, F11 for fullscreen");
            self.state = AppState::Running { window, app };
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        // Let egui handle the event first
        let egui_consumed = app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                event_loop.exit();
            }

            // Click/tap anywhere (outside the UI) switches the mask
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } if !egui_consumed => {
                app.switch_mask();
            }

            WindowEvent::Touch(touch)
                if touch.phase == winit::event::TouchPhase::Started && !egui_consumed =>
            {
                app.switch_mask();
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } if !egui_consumed => match key_code {
                KeyCode::Escape => {
                    log::info!("Escape pressed, exiting...");
                    event_loop.exit();
                }
                KeyCode::F11 => {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                        log::info!("Exiting fullscreen");
                    } else {
                        window.set_fullscreen(Some(winit::window::Fullscreen::Borderless(None)));
                        log::info!("Entering fullscreen");
                    }
                }
                KeyCode::Space => {
                    // Space works as a click for keyboard users
                    app.switch_mask();
                }
                _ => {}
            },

            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
            }

            WindowEvent::RedrawRequested => {
                app.update();

                match app.render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => {
                        log::warn!("Surface lost, reconfiguring...");
                        app.resize(app.size());
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("Out of GPU memory!");
                        event_loop.exit();
                    }
                    Err(e) => {
                        log::warn!("Surface error: {:?}", e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, .. } = &self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Drive redraws at the configured FPS; a missed deadline resets
        // rather than trying to catch up
        let frame_duration = self.frame_duration();
        let now = Instant::now();

        if now >= self.next_redraw_at {
            window.request_redraw();
            self.next_redraw_at += frame_duration;
            if now > self.next_redraw_at + frame_duration * 2 {
                self.next_redraw_at = now + frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_redraw_at));
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("MaskCam v{}", env!("CARGO_PKG_VERSION"));

    let cwd = std::env::current_dir().expect("Failed to get current directory");
    let config = match AppConfig::load_or_default(&cwd) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = MaskCamApp::new(config);
    event_loop.run_app(&mut app).expect("Event loop error");
}
