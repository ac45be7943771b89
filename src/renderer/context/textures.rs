use crate::renderer::config::MAX_TEXTURE_SLOTS;
use crate::renderer::context::state::SlotView;
use crate::renderer::context::{RenderContext, slot_index};
use crate::renderer::device::{Device, ImageData, ImageDesc, MappedImage, ViewDesc, ViewKind};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::resources::texture::{
    Texture, TextureDesc, TextureInfo, TextureKind, TextureShape,
};

impl<D: Device> RenderContext<D> {
    /// Creates a texture from a partial description.
    ///
    /// Shader-resource and unordered-access views are not created here; they
    /// are made on demand by the bind calls.
    pub fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<Texture> {
        let info = desc.resolve(self.config.default_color_format);
        self.create_texture_from_info(info, desc.data)
    }

    fn create_texture_from_info(&mut self, info: TextureInfo, data: Option<&[u8]>) -> Result<Texture> {
        info.validate()?;

        let layers = match info.shape {
            TextureShape::ThreeD => info.depth,
            shape => shape.layer_count(),
        };
        let image_desc = ImageDesc {
            dimension: info.image_dimension(),
            width: info.width,
            height: info.height,
            depth_or_layers: layers,
            format: info.format,
            samples: 1,
            usage: info.usage(),
            cube_compatible: info.shape == TextureShape::Cubemap,
        };

        let upload = match data {
            Some(bytes) => {
                let layouts = info.mip_layouts(self.formats.get_format_info(info.format));
                let needed = layouts[0].slice_pitch * layers as u64;
                if (bytes.len() as u64) < needed {
                    return Err(RenderError::usage(format!(
                        "texture payload has {} bytes, level 0 needs {}",
                        bytes.len(),
                        needed
                    )));
                }
                Some(ImageData {
                    bytes,
                    layout: layouts[0],
                })
            }
            None => None,
        };

        let image = self.device.create_image(&image_desc, upload)?;

        let multisample = if info.is_multisampled() {
            let dual_desc = ImageDesc {
                samples: info.sample_count,
                usage: info.multisample_usage(),
                ..image_desc
            };
            match self.device.create_image(&dual_desc, None) {
                Ok(dual) => Some(dual),
                Err(e) => {
                    self.device.destroy_image(image);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let kind = match info.shape {
            TextureShape::TwoD => TextureKind::TwoD { image, multisample },
            TextureShape::ThreeD => TextureKind::ThreeD { image },
            TextureShape::Cubemap => TextureKind::Cubemap { image, multisample },
        };

        log::debug!(
            "Created {:?} texture {}x{}x{} {:?} ({} samples)",
            info.shape,
            info.width,
            info.height,
            info.depth,
            info.format,
            info.sample_count
        );
        Ok(Texture::new(info, kind))
    }

    /// Releases the texture's images and any slot still holding a view of them.
    /// Invalid textures are ignored.
    pub fn destroy_texture(&mut self, mut texture: Texture) {
        let Some(inner) = texture.inner.take() else {
            return;
        };

        let images = [Some(inner.kind.image()), inner.kind.multisample()];
        for image in images.into_iter().flatten() {
            if let Err(e) = self.state.release_image(&mut self.device, image) {
                log::error!("Failed to unbind a destroyed texture: {}", e);
            }
            self.device.destroy_image(image);
        }

        log::debug!(
            "Destroyed {:?} texture {}x{}",
            inner.info.shape,
            inner.info.width,
            inner.info.height
        );
    }

    /// Recreates the texture in place if its size differs, keeping every
    /// other property. Initial contents are not carried over.
    pub fn ensure_texture_size(&mut self, texture: &mut Texture, width: u32, height: u32) -> Result<()> {
        let Some(info) = texture.info().copied() else {
            return Err(RenderError::usage("cannot resize an invalid texture"));
        };
        if (info.width, info.height) == (width, height) {
            return Ok(());
        }

        let old = std::mem::take(texture);
        self.destroy_texture(old);
        *texture = self.create_texture_from_info(
            TextureInfo {
                width,
                height,
                ..info
            },
            None,
        )?;
        Ok(())
    }

    /// Installs a shader-resource view of `texture` at `slot`, replacing the
    /// previous occupant. An invalid texture just clears the slot.
    pub fn bind_texture(&mut self, texture: &Texture, slot: u32) -> Result<()> {
        let index = slot_index("texture", slot, MAX_TEXTURE_SLOTS)?;

        let Some(inner) = &texture.inner else {
            self.state.release_texture_slot(&mut self.device, index);
            return Ok(());
        };
        let info = inner.info;
        if info.format.is_depth() {
            return Err(RenderError::usage(format!(
                "depth texture {:?} cannot be bound as a shader resource",
                info.format
            )));
        }
        if info.cpu_read {
            return Err(RenderError::usage(
                "CPU-read textures cannot be bound as shader resources",
            ));
        }

        self.state.release_texture_slot(&mut self.device, index);

        let image = inner.kind.image();
        let view = self.device.create_view(
            image,
            &ViewDesc {
                kind: ViewKind::ShaderResource,
                dimension: info.view_dimension(),
                format: info.format,
            },
        )?;
        let sampler = self.sampler(info.wrap);
        self.device.set_shader_resource(slot, Some((view, sampler)));
        self.state.textures[index] = Some(SlotView { view, image });

        log::trace!("Bound {:?} texture to slot {}", info.shape, slot);
        Ok(())
    }

    /// Clears every texture slot. Needed before a sampled texture can be used
    /// as a render target.
    pub fn unbind_all_textures(&mut self) {
        for slot in 0..MAX_TEXTURE_SLOTS {
            self.state.release_texture_slot(&mut self.device, slot);
        }
    }

    /// Copies `src` into `dst`. A multisampled source is resolved instead.
    pub fn copy_texture(&mut self, dst: &Texture, src: &Texture) -> Result<()> {
        let (Some(dst), Some(src)) = (&dst.inner, &src.inner) else {
            return Err(RenderError::usage("cannot copy to or from an invalid texture"));
        };
        if dst.info.format != src.info.format {
            return Err(RenderError::FormatMismatch {
                dst: dst.info.format,
                src: src.info.format,
            });
        }
        if (dst.info.width, dst.info.height, dst.info.depth)
            != (src.info.width, src.info.height, src.info.depth)
        {
            return Err(RenderError::usage(format!(
                "copy size mismatch: {}x{} into {}x{}",
                src.info.width, src.info.height, dst.info.width, dst.info.height
            )));
        }

        match src.kind.multisample() {
            Some(dual) => self
                .device
                .resolve_image(dst.kind.image(), dual, src.info.format),
            None => self.device.copy_image(dst.kind.image(), src.kind.image()),
        }
    }

    /// Read-only access to the pixels of a CPU-read texture
    pub fn map_texture(&mut self, texture: &Texture) -> Result<MappedImage<'_>> {
        match &texture.inner {
            Some(inner) if inner.info.cpu_read => self.device.map_image(inner.kind.image()),
            Some(_) => Err(RenderError::usage(
                "only textures created with cpu_read can be mapped",
            )),
            None => Err(RenderError::usage("cannot map an invalid texture")),
        }
    }

    pub fn unmap_texture(&mut self, texture: &Texture) {
        if let Some(inner) = &texture.inner {
            self.device.unmap_image(inner.kind.image());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::renderer::config::RenderConfig;
    use crate::renderer::context::RenderContext;
    use crate::renderer::device::null::{DeviceCall, NullDevice};
    use crate::renderer::format::Format;
    use crate::renderer::resources::texture::{TextureDesc, TextureShape};

    fn context() -> RenderContext<NullDevice> {
        RenderContext::new(NullDevice::new(64, 64).unwrap(), RenderConfig::default()).unwrap()
    }

    #[test]
    fn short_payload_is_rejected() {
        let mut ctx = context();
        let pixels = [0u8; 15];
        let desc = TextureDesc::new_2d(2, 2).data(&pixels);
        assert!(ctx.create_texture(&desc).is_err());
    }

    #[test]
    fn cubemap_payload_covers_six_faces() {
        let mut ctx = context();
        let pixels = vec![7u8; 4 * 4 * 4 * 6];
        let texture = ctx
            .create_texture(&TextureDesc::new_cubemap(4).data(&pixels))
            .unwrap();
        let desc = ctx.device().calls().iter().rev().find_map(|call| match call {
            DeviceCall::CreateImage { desc, initialized, .. } => Some((*desc, *initialized)),
            _ => None,
        });
        let (desc, initialized) = desc.unwrap();
        assert!(initialized);
        assert!(desc.cube_compatible);
        assert_eq!(desc.depth_or_layers, 6);
        assert_eq!(texture.info().unwrap().shape, TextureShape::Cubemap);
        ctx.destroy_texture(texture);
    }

    #[test]
    fn resize_keeps_properties() {
        let mut ctx = context();
        let mut texture = ctx
            .create_texture(&TextureDesc::new_2d(16, 16).format(Format::R16G16B16A16Float).render_target())
            .unwrap();
        ctx.ensure_texture_size(&mut texture, 32, 8).unwrap();
        let info = *texture.info().unwrap();
        assert_eq!((info.width, info.height), (32, 8));
        assert_eq!(info.format, Format::R16G16B16A16Float);
        assert!(info.render_target);
        ctx.destroy_texture(texture);
        assert_eq!(ctx.device().live_counts().images, 1);
    }

    #[test]
    fn destroy_clears_slots_viewing_the_texture() {
        let mut ctx = context();
        let texture = ctx.create_texture(&TextureDesc::new_2d(4, 4)).unwrap();
        ctx.bind_texture(&texture, 3).unwrap();
        assert_eq!(ctx.device().live_counts().views, 1);
        ctx.destroy_texture(texture);
        assert_eq!(ctx.device().live_counts().views, 0);
    }

    #[test]
    fn slots_past_the_limit_are_rejected() {
        let mut ctx = context();
        let texture = ctx.create_texture(&TextureDesc::new_2d(4, 4)).unwrap();
        assert!(ctx.bind_texture(&texture, 12).is_err());
        ctx.destroy_texture(texture);
    }
}
