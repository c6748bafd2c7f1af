use winit::dpi::PhysicalSize;

use super::SurfaceErrorAction;

/// Swapchain format and alpha mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct SurfacePlan {
    pub format: wgpu::TextureFormat,
    pub alpha_mode: wgpu::CompositeAlphaMode,
}

impl SurfacePlan {
    /// Picks an 8-bit BGRA/RGBA format in the requested colour space, then any
    /// 8-bit format, then whatever the surface lists first.
    ///
    /// Premultiplied compositing is preferred since every stage target holds
    /// premultiplied colour. `None` when the surface reports no formats.
    pub(crate) fn choose(
        caps: &wgpu::SurfaceCapabilities,
        prefer_srgb: bool,
        requested_alpha: Option<wgpu::CompositeAlphaMode>,
    ) -> Option<Self> {
        let eight_bit = |f: &&wgpu::TextureFormat| {
            matches!(
                f.remove_srgb_suffix(),
                wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Rgba8Unorm
            )
        };
        let format = caps
            .formats
            .iter()
            .filter(eight_bit)
            .find(|f| f.is_srgb() == prefer_srgb)
            .or_else(|| caps.formats.iter().find(eight_bit))
            .or_else(|| caps.formats.first())
            .copied()?;

        let supported = |m: &wgpu::CompositeAlphaMode| caps.alpha_modes.contains(m);
        let alpha_mode = requested_alpha
            .filter(supported)
            .or_else(|| Some(wgpu::CompositeAlphaMode::PreMultiplied).filter(supported))
            .or_else(|| caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        Some(Self { format, alpha_mode })
    }
}

/// Records `new_size` and reconfigures the surface. Zero-sized surfaces are
/// left unconfigured until a real size arrives.
pub(crate) fn reconfigure(
    surface: &wgpu::Surface,
    device: &wgpu::Device,
    config: &mut wgpu::SurfaceConfiguration,
    size: &mut PhysicalSize<u32>,
    new_size: PhysicalSize<u32>,
) {
    *size = new_size;
    if new_size.width == 0 || new_size.height == 0 {
        return;
    }
    config.width = new_size.width;
    config.height = new_size.height;
    surface.configure(device, config);
}

/// Recovers from a failed frame acquisition where possible.
pub(crate) fn recover(
    surface: &wgpu::Surface,
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    err: wgpu::SurfaceError,
) -> SurfaceErrorAction {
    let action = classify(&err);
    if action == SurfaceErrorAction::Reconfigured && size.width > 0 && size.height > 0 {
        surface.configure(device, config);
    }
    log::debug!("surface error {err:?}: {action:?}");
    action
}

fn classify(err: &wgpu::SurfaceError) -> SurfaceErrorAction {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfaceErrorAction::Reconfigured,
        wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::Fatal,
        wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other => SurfaceErrorAction::SkipFrame,
    }
}
