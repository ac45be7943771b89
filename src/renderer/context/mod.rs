//! The render context: the single owner of the device and of everything
//! currently bound to it.
//!
//! Operations are grouped by concern in the submodules; all of them are
//! methods on [`RenderContext`].

mod buffers;
mod compute;
mod shaders;
mod state;
mod targets;
mod textures;

pub use targets::{ColorTarget, DepthTarget, RenderTargetBindings};

use crate::renderer::config::{MAX_TEXTURE_SLOTS, MAX_UAV_SLOTS, RenderConfig};
use crate::renderer::device::{Device, SamplerId, Viewport};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::format::{Format, FormatInfo, FormatTable};
use crate::renderer::resources::texture::{Texture, TextureDesc, WrapMode};

use state::BindingState;

pub const SWAPCHAIN_DEPTH_FORMAT: Format = Format::D32Float;

pub struct RenderContext<D: Device> {
    device: D,
    config: RenderConfig,
    formats: FormatTable,
    state: BindingState,
    /// One sampler per wrap mode, indexed by `WrapMode::index`
    samplers: Vec<SamplerId>,
    /// Depth buffer paired with the swapchain, always the same size
    swapchain_depth: Texture,
}

impl<D: Device> RenderContext<D> {
    pub fn new(mut device: D, config: RenderConfig) -> Result<Self> {
        let formats = FormatTable::new()?;

        let samplers = WrapMode::ALL
            .iter()
            .map(|&wrap| device.create_sampler(wrap))
            .collect::<Result<Vec<_>>>()?;

        let (width, height) = device.swapchain_size();
        device.set_viewport(&Viewport::from_size(width, height));

        log::info!(
            "Render context on {} device, swapchain {}x{}",
            device.name(),
            width,
            height
        );

        let mut context = Self {
            device,
            config,
            formats,
            state: BindingState::new((width, height)),
            samplers,
            swapchain_depth: Texture::default(),
        };
        context.swapchain_depth = context.create_texture(&swapchain_depth_desc(width, height))?;
        Ok(context)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn get_format_info(&self, format: Format) -> FormatInfo {
        self.formats.get_format_info(format)
    }

    pub fn swap_chain_size(&self) -> (u32, u32) {
        self.state.swapchain_size
    }

    pub fn swapchain_depth(&self) -> &Texture {
        &self.swapchain_depth
    }

    /// Resizes the swapchain and its depth buffer together. A no-op when the
    /// size is unchanged or either dimension is zero (minimized window).
    pub fn ensure_swap_chain_size(&mut self, width: u32, height: u32) -> Result<()> {
        if self.state.swapchain_size == (width, height) {
            return Ok(());
        }
        if width == 0 || height == 0 {
            log::debug!("Ignoring swapchain resize to {}x{}", width, height);
            return Ok(());
        }
        if self.state.render_targets_bound() {
            return Err(RenderError::usage(
                "cannot resize the swapchain while render targets are bound",
            ));
        }

        log::debug!("Resizing swapchain to {}x{}", width, height);
        self.device.resize_swapchain(width, height)?;

        let mut depth = std::mem::take(&mut self.swapchain_depth);
        let resized = self.ensure_texture_size(&mut depth, width, height);
        self.swapchain_depth = depth;
        resized?;

        self.state.swapchain_size = (width, height);
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.device.set_viewport(viewport);
    }

    pub fn present(&mut self, vsync: bool) -> Result<()> {
        if self.state.render_targets_bound() {
            return Err(RenderError::usage(
                "render targets must be unset before presenting",
            ));
        }
        self.device.present(vsync)
    }

    /// Releases every view, sampler and the swapchain depth buffer, and hands
    /// the device back.
    pub fn shutdown(mut self) -> D {
        if let Err(e) = self.unset_render_targets() {
            log::error!("Failed to unset render targets during shutdown: {}", e);
        }
        for slot in 0..MAX_TEXTURE_SLOTS {
            self.state.release_texture_slot(&mut self.device, slot);
        }
        for slot in 0..MAX_UAV_SLOTS {
            self.state.release_uav_slot(&mut self.device, slot);
        }

        let depth = std::mem::take(&mut self.swapchain_depth);
        self.destroy_texture(depth);

        for sampler in self.samplers.drain(..) {
            self.device.destroy_sampler(sampler);
        }

        log::info!("Render context shut down");
        self.device
    }

    fn sampler(&self, wrap: WrapMode) -> SamplerId {
        self.samplers[wrap.index()]
    }
}

fn swapchain_depth_desc(width: u32, height: u32) -> TextureDesc<'static> {
    TextureDesc::new_2d(width, height)
        .format(SWAPCHAIN_DEPTH_FORMAT)
        .render_target()
}

/// Returns the slot as an index, or an error if it is past `max`
fn slot_index(kind: &'static str, slot: u32, max: usize) -> Result<usize> {
    if (slot as usize) < max {
        Ok(slot as usize)
    } else {
        Err(RenderError::SlotOutOfRange {
            kind,
            slot,
            max: max as u32,
        })
    }
}
