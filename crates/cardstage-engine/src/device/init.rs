/// Initialization parameters for the surface-bound GPU layer.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Prefer an sRGB surface format when available.
    ///
    /// Card textures are uploaded as `Rgba8Unorm` and blended in that space; an
    /// sRGB surface only affects the final encode.
    pub prefer_srgb: bool,

    /// Present mode (swap behavior).
    pub present_mode: wgpu::PresentMode,

    /// Optional alpha mode preference for the surface.
    ///
    /// If provided but unsupported on the current surface, a supported mode is selected.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    /// Required wgpu features.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    ///
    /// `None` requests the adapter's own limits so the batch program can use
    /// every sampled-texture unit the hardware reports.
    pub required_limits: Option<wgpu::Limits>,

    /// Desired maximum frame latency for the surface.
    pub desired_maximum_frame_latency: u32,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            prefer_srgb: false,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: None,
            required_features: wgpu::Features::empty(),
            required_limits: None,
            desired_maximum_frame_latency: 2,
        }
    }
}

/// Initialization parameters for an offscreen device.
#[derive(Debug, Clone)]
pub struct HeadlessInit {
    pub power_preference: wgpu::PowerPreference,
    /// Fall back to a software adapter (e.g. lavapipe / WARP) when set.
    pub force_fallback_adapter: bool,
    pub required_limits: Option<wgpu::Limits>,
}

impl Default for HeadlessInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_limits: None,
        }
    }
}
