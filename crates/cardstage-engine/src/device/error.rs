/// What the frame loop should do after `Gpu::begin_frame` fails.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface was reconfigured; the stage can draw again next frame.
    Reconfigured,
    /// Transient error; drop this frame without touching the stage.
    SkipFrame,
    /// Out of memory; stop the runtime.
    Fatal,
}
