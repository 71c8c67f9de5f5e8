// =============================================================================
// VK-FRAME-ENGINE - demo binary
// =============================================================================
//
// Usage: vk-frame-engine <title> [width] [height]
//
// FRAME FLOW:
// 1. winit delivers window and key events
// 2. RedrawRequested -> Engine::draw_frame (wait, acquire, record, submit, present)
// 3. about_to_wait requests the next redraw
//
// Any engine error stops the event loop and is returned from main.
// =============================================================================

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Instant;
use vk_frame_engine::config::Config;
use vk_frame_engine::scene::CubeScene;
use vk_frame_engine::window::{self, FpsCounter, KeyStates};
use vk_frame_engine::Engine;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

/// Must match the `objects[]` array size in shaders/cube.vert
const DEMO_CUBES: u32 = 10;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let mut config = Config::load();
    config
        .apply_args(std::env::args().skip(1))
        .context("Invalid command line, expected: <title> [width] [height]")?;
    config.validate()?;

    init_logging(&config)?;
    log::info!("Starting vk-frame-engine");
    log::info!(
        "Window: '{}' {}x{}, {} frame(s) in flight",
        config.window.title,
        config.window.width,
        config.window.height,
        config.graphics.frames_in_flight
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(err) => Err(err),
        None => {
            log::info!("Clean shutdown");
            Ok(())
        }
    }
}

/// Initialize logging, optionally writing to the configured log file
/// instead of stderr. `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_env(Env::default());

    if config.debug.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the engine (and its surface) must go
/// before the window it presents to.
struct App {
    engine: Option<Engine<CubeScene>>,
    window: Option<Arc<Window>>,
    config: Config,
    keys: KeyStates,
    fps: FpsCounter,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            engine: None,
            window: None,
            config,
            keys: KeyStates::new(),
            fps: FpsCounter::new(Instant::now()),
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Arc::new(
            window::create_window(event_loop, &self.config.window_request())
                .context("Failed to create window")?,
        );
        let size = window.inner_size();

        let scene = CubeScene::new(
            self.config.shaders.vertex.clone(),
            self.config.shaders.fragment.clone(),
            DEMO_CUBES,
        );
        let engine = Engine::new(
            window.as_ref(),
            (size.width, size.height),
            &self.config.engine_settings(),
            scene,
        )
        .context("Failed to initialize engine")?;

        self.engine = Some(engine);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{:#}", err);
        self.error = Some(err);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        if let Err(err) = engine.draw_frame(&mut self.keys) {
            self.fail(event_loop, anyhow::Error::new(err).context("Frame failed"));
            return;
        }

        if let Some(fps) = self.fps.tick(Instant::now()) {
            if self.config.debug.show_fps {
                if let Some(window) = &self.window {
                    window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
                }
            }
            log::debug!("FPS: {:.1}", fps);
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() || self.error.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(engine) = &self.engine {
                    if let Err(err) = engine.wait_idle() {
                        log::error!("{err}");
                    }
                }
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                    return;
                }
                self.keys.handle_event(&event);
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    /// Keep rendering continuously
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
