use smallvec::SmallVec;

use crate::renderer::config::{MAX_RENDER_TARGETS, MAX_TEXTURE_SLOTS, MAX_UAV_SLOTS};
use crate::renderer::device::{Device, ImageId, ShaderId, ViewId};
use crate::renderer::error::Result;
use crate::renderer::format::Format;

/// A view owned by a binding slot, plus the image it looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotView {
    pub view: ViewId,
    pub image: ImageId,
}

/// Multisample dual to resolve into its primary image on unbind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingResolve {
    pub src: ImageId,
    pub dst: ImageId,
    pub format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoundColor {
    pub target: SlotView,
    pub resolve: Option<PendingResolve>,
}

/// What is currently installed on the device.
///
/// Every `ViewId` in here is owned by exactly one slot and is destroyed when
/// that slot is cleared or rebound. `colors` is indexed by output slot and
/// keeps empty slots as `None`.
#[derive(Debug)]
pub(crate) struct BindingState {
    pub textures: [Option<SlotView>; MAX_TEXTURE_SLOTS],
    pub uavs: [Option<SlotView>; MAX_UAV_SLOTS],
    pub colors: SmallVec<[Option<BoundColor>; MAX_RENDER_TARGETS]>,
    pub depth: Option<SlotView>,
    pub swapchain_size: (u32, u32),
    pub vertex_shader: Option<ShaderId>,
    pub compute_shader: Option<ShaderId>,
}

impl BindingState {
    pub fn new(swapchain_size: (u32, u32)) -> Self {
        Self {
            textures: [None; MAX_TEXTURE_SLOTS],
            uavs: [None; MAX_UAV_SLOTS],
            colors: SmallVec::new(),
            depth: None,
            swapchain_size,
            vertex_shader: None,
            compute_shader: None,
        }
    }

    pub fn render_targets_bound(&self) -> bool {
        !self.colors.is_empty() || self.depth.is_some()
    }

    pub fn release_texture_slot(&mut self, device: &mut impl Device, slot: usize) {
        if let Some(previous) = self.textures[slot].take() {
            device.set_shader_resource(slot as u32, None);
            device.destroy_view(previous.view);
        }
    }

    pub fn release_uav_slot(&mut self, device: &mut impl Device, slot: usize) {
        if let Some(previous) = self.uavs[slot].take() {
            device.set_unordered_access(slot as u32, None);
            device.destroy_view(previous.view);
        }
    }

    /// Clears every slot holding a view over `image`
    pub fn release_image(&mut self, device: &mut impl Device, image: ImageId) -> Result<()> {
        for slot in 0..MAX_TEXTURE_SLOTS {
            if self.textures[slot].is_some_and(|bound| bound.image == image) {
                self.release_texture_slot(device, slot);
            }
        }
        for slot in 0..MAX_UAV_SLOTS {
            if self.uavs[slot].is_some_and(|bound| bound.image == image) {
                self.release_uav_slot(device, slot);
            }
        }

        let targets_image = self.colors.iter().flatten().any(|color| {
            color.target.image == image || color.resolve.is_some_and(|r| r.dst == image)
        }) || self.depth.is_some_and(|depth| depth.image == image);
        if targets_image {
            log::warn!("Destroyed a bound render target; unbinding without resolve");
            return self.release_render_targets(device, false);
        }
        Ok(())
    }

    /// Unbinds the output set. With `resolve`, multisample duals are resolved
    /// into their primary images in slot order before their views go away.
    ///
    /// Every view is released even if a device call fails; the first error is
    /// returned.
    pub fn release_render_targets(&mut self, device: &mut impl Device, resolve: bool) -> Result<()> {
        let mut result = device.set_render_targets(&[], None);
        for color in self.colors.drain(..).flatten() {
            if let (true, Some(pending)) = (resolve, color.resolve) {
                result = result.and(device.resolve_image(pending.dst, pending.src, pending.format));
            }
            device.destroy_view(color.target.view);
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_view(depth.view);
        }
        result
    }
}
