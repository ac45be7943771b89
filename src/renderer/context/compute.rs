use crate::renderer::config::MAX_UAV_SLOTS;
use crate::renderer::context::state::SlotView;
use crate::renderer::context::{RenderContext, slot_index};
use crate::renderer::device::{Device, ViewDesc, ViewKind};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::resources::texture::{Texture, TextureShape};

impl<D: Device> RenderContext<D> {
    /// Installs an unordered-access view of `texture` at `slot`. An invalid
    /// texture clears the slot.
    pub fn bind_compute_uav(&mut self, texture: &Texture, slot: u32) -> Result<()> {
        let index = slot_index("UAV", slot, MAX_UAV_SLOTS)?;

        let Some(inner) = &texture.inner else {
            self.state.release_uav_slot(&mut self.device, index);
            return Ok(());
        };
        let info = inner.info;
        if info.format.is_depth() {
            return Err(RenderError::usage(format!(
                "depth texture {:?} cannot be bound as a UAV",
                info.format
            )));
        }
        if info.shape == TextureShape::Cubemap {
            return Err(RenderError::UnsupportedCubemapUav);
        }
        if !info.uav {
            return Err(RenderError::usage("texture was not created with uav"));
        }

        self.state.release_uav_slot(&mut self.device, index);

        let image = inner.kind.image();
        let view = self.device.create_view(
            image,
            &ViewDesc {
                kind: ViewKind::UnorderedAccess,
                dimension: info.view_dimension(),
                format: info.format,
            },
        )?;
        self.device.set_unordered_access(slot, Some(view));
        self.state.uavs[index] = Some(SlotView { view, image });

        log::trace!("Bound {:?} UAV to slot {}", info.shape, slot);
        Ok(())
    }

    pub fn unbind_all_compute_uavs(&mut self) {
        for slot in 0..MAX_UAV_SLOTS {
            self.state.release_uav_slot(&mut self.device, slot);
        }
    }

    pub fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if self.state.compute_shader.is_none() {
            return Err(RenderError::usage("dispatch issued with no compute shader bound"));
        }
        self.device.dispatch(x, y, z)
    }
}
