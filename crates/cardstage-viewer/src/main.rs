//! Sprite-field viewer for the cardstage compositor.
//!
//! ```text
//! cardstage-viewer [--count N] [--headless FRAMES [--gpu]]
//! ```
//!
//! Windowed mode draws through wgpu. `--headless` renders offscreen and logs
//! the stats of the last frame, on the CPU backend unless `--gpu` is given.

mod field;

use anyhow::{Context, Result};
use clap::Parser;
use cardstage_engine::core::{App, AppControl, FrameCtx};
use cardstage_engine::device::{GpuInit, HeadlessGpu, HeadlessInit};
use cardstage_engine::logging::{init_logging, LoggingConfig};
use cardstage_engine::render::{GpuBackend, RendererConfig, SoftBackend, Stage, WgpuBackend, WgpuBackendOptions};
use cardstage_engine::time::Interval;
use cardstage_engine::window::{Runtime, RuntimeConfig};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use field::Field;

#[derive(Debug, Parser)]
#[command(name = "cardstage-viewer", about = "Sprite-field viewer for the cardstage compositor")]
struct Cli {
    /// Number of sprites in the field
    #[arg(long, default_value_t = 2000)]
    count: usize,
    /// Render this many frames offscreen and exit
    #[arg(long, value_name = "FRAMES")]
    headless: Option<u32>,
    /// Use wgpu for headless rendering instead of the CPU backend
    #[arg(long, requires = "headless")]
    gpu: bool,
}

fn log_efficiency<B: GpuBackend>(stage: &Stage<B>, fps: Option<u32>) {
    let s = stage.stats();
    let ratio = s.batch_id as f64 / s.draw_id.max(1) as f64;
    log::info!(
        "draw {} fps {} | {} batches, {} cards ({:.0}/batch) | batch/draw {ratio:.2} | flush v{} t{} c{} | uploads {}",
        s.draw_id,
        fps.map_or_else(|| "-".to_string(), |f| f.to_string()),
        s.batches,
        s.cards,
        s.cards_per_batch(),
        s.flushes.vertex_overflow,
        s.flushes.texture_overflow,
        s.flushes.cache_pass,
        s.uploads,
    );
}

struct Viewer {
    field: Field,
    cached: bool,
    every: Interval,
}

impl App for Viewer {
    fn on_window_event(&mut self, _id: WindowId, event: &WindowEvent) -> AppControl {
        match event {
            WindowEvent::KeyboardInput {
                event: KeyEvent { physical_key: PhysicalKey::Code(KeyCode::Escape), state: ElementState::Pressed, .. },
                ..
            } => AppControl::Exit,
            _ => AppControl::Continue,
        }
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        if !self.cached {
            if let Err(e) = self.field.cache_badge(&mut *ctx.stage, 1.0) {
                log::warn!("badge stays uncached: {e:#}");
            }
            self.cached = true;
        }

        let (w, h) = ctx.window.physical_size();
        self.field.resize(w as f32, h as f32);
        self.field.step(ctx.time.dt);

        let control = ctx.render(&mut self.field.scene);
        if let Some(frames) = self.every.step(ctx.time.dt) {
            log_efficiency(&*ctx.stage, Some(frames));
            let s = ctx.stage.stats();
            ctx.window.set_title(&format!("cardstage viewer | {frames} fps | {} batches, {} cards", s.batches, s.cards));
        }
        control
    }
}

const HEADLESS_SIZE: (u32, u32) = (640, 360);

/// Steps the field `frames` times; `before_frame` runs ahead of each render.
fn run_frames<B: GpuBackend>(
    mut stage: Stage<B>,
    count: usize,
    frames: u32,
    mut before_frame: impl FnMut(&mut Stage<B>),
) -> Result<Stage<B>> {
    let (w, h) = HEADLESS_SIZE;
    stage.update_viewport(w, h);
    let mut field = Field::new(count, w as f32, h as f32)?;
    field.cache_badge(&mut stage, 1.0)?;

    for _ in 0..frames {
        field.step(1.0 / 60.0);
        before_frame(&mut stage);
        stage.render_frame(&mut field.scene)?;
    }
    log_efficiency(&stage, None);
    Ok(stage)
}

fn run_headless(count: usize, frames: u32) -> Result<()> {
    let (w, h) = HEADLESS_SIZE;
    let stage = Stage::new(SoftBackend::new(w, h), RendererConfig::default())?;
    let stage = run_frames(stage, count, frames, |_| {})?;
    let soft = stage.backend().stats();
    log::info!("soft backend: {} draw calls, {} cover draws, {} uploads", soft.draw_calls, soft.cover_draws, soft.uploads);
    Ok(())
}

fn run_headless_gpu(count: usize, frames: u32) -> Result<()> {
    let (w, h) = HEADLESS_SIZE;
    let gpu = HeadlessGpu::new_blocking(HeadlessInit::default())?;
    let backend = WgpuBackend::new(gpu.device().clone(), gpu.queue().clone(), WgpuBackendOptions::default());
    let stage = Stage::new(backend, RendererConfig::default()).context("failed to create the stage")?;
    let target = gpu.create_target(w, h);
    let stage = run_frames(stage, count, frames, |stage| {
        stage.backend_mut().set_surface(target.clone(), HeadlessGpu::TARGET_FORMAT);
    })?;
    log::info!("wgpu backend: {} bytes of textures", stage.backend().memory_used());
    Ok(())
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let opts = Cli::parse();

    if let Some(frames) = opts.headless {
        return if opts.gpu { run_headless_gpu(opts.count, frames) } else { run_headless(opts.count, frames) };
    }

    let config = RuntimeConfig {
        title: "cardstage viewer".to_string(),
        renderer: RendererConfig::default().with_clear_color(cardstage_engine::coords::Color::from_rgba_u32(0x1b1b1fff)),
        ..RuntimeConfig::default()
    };
    let app = Viewer {
        field: Field::new(opts.count, config.initial_size.width as f32, config.initial_size.height as f32)?,
        cached: false,
        every: Interval::new(1.0),
    };
    Runtime::run(config, GpuInit::default(), app)
}
