//! Image files to textures.
//!
//! Decoding failures are content errors: they are logged and produce an
//! invalid texture that the caller checks with `Texture::is_valid`.

use std::path::Path;

use crate::renderer::context::RenderContext;
use crate::renderer::device::Device;
use crate::renderer::error::Result;
use crate::renderer::format::Format;
use crate::renderer::resources::texture::{Texture, TextureDesc};

/// Decodes an image file into an RGBA8 texture.
///
/// `desc` supplies everything but the size and pixels; its format must be an
/// RGBA8 format or unset.
pub fn load_texture<D: Device>(
    ctx: &mut RenderContext<D>,
    path: impl AsRef<Path>,
    desc: TextureDesc<'_>,
) -> Result<Texture> {
    let path = path.as_ref();
    let Some(image) = decode_rgba8(path) else {
        return Ok(Texture::default());
    };
    let (width, height) = image.dimensions();

    let desc = TextureDesc {
        width,
        height,
        format: Some(rgba8_format(desc.format)),
        data: Some(image.as_raw().as_slice()),
        ..desc
    };
    let texture = ctx.create_texture(&desc)?;
    log::debug!("Loaded {} ({}x{})", path.display(), width, height);
    Ok(texture)
}

/// Decodes six square faces (+X, -X, +Y, -Y, +Z, -Z) into a cubemap
pub fn load_cubemap<D: Device>(
    ctx: &mut RenderContext<D>,
    faces: [&Path; 6],
    desc: TextureDesc<'_>,
) -> Result<Texture> {
    let mut size: Option<(u32, u32)> = None;
    let mut pixels = Vec::new();
    for face in faces {
        let Some(image) = decode_rgba8(face) else {
            return Ok(Texture::default());
        };
        let dimensions = image.dimensions();
        if dimensions.0 != dimensions.1 || size.is_some_and(|size| size != dimensions) {
            log::error!(
                "Cubemap face {} is {}x{}; faces must be square and equal in size",
                face.display(),
                dimensions.0,
                dimensions.1
            );
            return Ok(Texture::default());
        }
        size = Some(dimensions);
        pixels.extend_from_slice(image.as_raw());
    }

    let Some((edge, _)) = size else {
        return Ok(Texture::default());
    };
    let desc = TextureDesc {
        format: Some(rgba8_format(desc.format)),
        data: Some(pixels.as_slice()),
        ..TextureDesc::new_cubemap(edge)
    }
    .wrap(desc.wrap.unwrap_or_default());
    ctx.create_texture(&desc)
}

fn decode_rgba8(path: &Path) -> Option<image::RgbaImage> {
    match image::open(path) {
        Ok(image) => Some(image.into_rgba8()),
        Err(e) => {
            log::error!("Could not load image {}: {}", path.display(), e);
            None
        }
    }
}

fn rgba8_format(requested: Option<Format>) -> Format {
    match requested {
        Some(Format::R8G8B8A8Srgb) => Format::R8G8B8A8Srgb,
        Some(Format::R8G8B8A8Unorm) | None => Format::R8G8B8A8Unorm,
        Some(other) => {
            log::warn!("Decoded images are RGBA8; ignoring requested format {:?}", other);
            Format::R8G8B8A8Unorm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::config::RenderConfig;
    use crate::renderer::device::null::NullDevice;

    #[test]
    fn missing_file_gives_invalid_texture() {
        let mut ctx = RenderContext::new(NullDevice::new(16, 16).unwrap(), RenderConfig::default()).unwrap();
        let path = std::env::temp_dir().join("ember-missing-image.png");
        let texture = load_texture(&mut ctx, &path, TextureDesc::default()).unwrap();
        assert!(!texture.is_valid());
    }

    #[test]
    fn decoded_png_becomes_texture() {
        let mut ctx = RenderContext::new(NullDevice::new(16, 16).unwrap(), RenderConfig::default()).unwrap();
        let path = std::env::temp_dir().join(format!("ember-load-{}.png", std::process::id()));
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let texture = load_texture(&mut ctx, &path, TextureDesc::default()).unwrap();
        assert_eq!(texture.size(), Some((3, 2)));
        ctx.destroy_texture(texture);
        std::fs::remove_file(&path).unwrap();
    }
}
