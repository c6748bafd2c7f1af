use winit::window::{Window, WindowId};

use crate::coords::Viewport;
use crate::device::{Gpu, SurfaceErrorAction};
use crate::render::{Stage, WgpuBackend};
use crate::scene::Scene;
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

use super::app::AppControl;

/// Per-window handles and immutable window metadata.
pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl<'a> WindowCtx<'a> {
    /// Drawable size in physical pixels.
    pub fn physical_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }
}

/// Per-frame context passed to `core::App::on_frame`.
///
/// Lifetimes:
/// - `'a` is the duration of the callback invocation
/// - `'w` is the window-borrow lifetime carried by `Gpu<'w>`
pub struct FrameCtx<'a, 'w> {
    pub window: WindowCtx<'a>,
    pub gpu: &'a mut Gpu<'w>,
    /// Stage bound to this window's device.
    pub stage: &'a mut Stage<WgpuBackend>,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
}

impl<'a, 'w> FrameCtx<'a, 'w> {
    /// Acquires the surface texture, renders `scene` into it and presents.
    ///
    /// Surface errors skip the frame (or exit when fatal). Frame-fatal stage
    /// errors are logged and end the app; per-node errors never reach here.
    pub fn render(&mut self, scene: &mut Scene) -> AppControl {
        let frame = match self.gpu.begin_frame() {
            Ok(f) => f,
            Err(err) => {
                return match self.gpu.handle_surface_error(err) {
                    SurfaceErrorAction::Fatal => AppControl::Exit,
                    SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame => AppControl::Continue,
                };
            }
        };

        let (width, height) = frame.size();
        if self.stage.viewport() != Viewport::new(width, height) {
            self.stage.update_viewport(width, height);
        }

        let format = self.gpu.surface_format();
        self.stage.backend_mut().set_surface(frame.view.clone(), format);
        let result = self.stage.render_frame(scene);
        self.stage.backend_mut().clear_surface();

        self.window.window.pre_present_notify();
        self.gpu.present(frame);

        match result {
            Ok(()) => AppControl::Continue,
            Err(e) => {
                log::error!("frame {} aborted: {e}", self.stage.draw_id());
                AppControl::Exit
            }
        }
    }
}
