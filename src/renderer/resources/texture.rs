use crate::renderer::config::ESTIMATED_MIP_LEVELS;
use crate::renderer::device::{ImageDimension, ImageId, ImageUsage, SubresourceLayout, ViewDimension};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::format::{Format, FormatInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureShape {
    #[default]
    TwoD,
    ThreeD,
    Cubemap,
}

impl TextureShape {
    pub fn layer_count(self) -> u32 {
        match self {
            TextureShape::Cubemap => 6,
            _ => 1,
        }
    }
}

/// Addressing and filtering used when a texture is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampNearest,
    ClampLinear,
    RepeatNearest,
    RepeatLinear,
}

impl WrapMode {
    pub const ALL: &'static [WrapMode] = &[
        WrapMode::ClampNearest,
        WrapMode::ClampLinear,
        WrapMode::RepeatNearest,
        WrapMode::RepeatLinear,
    ];

    pub fn is_linear(self) -> bool {
        matches!(self, WrapMode::ClampLinear | WrapMode::RepeatLinear)
    }

    pub fn is_repeat(self) -> bool {
        matches!(self, WrapMode::RepeatNearest | WrapMode::RepeatLinear)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Partial texture description. Unset fields are filled in by [`TextureDesc::resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: Option<Format>,
    pub shape: Option<TextureShape>,
    pub wrap: Option<WrapMode>,
    pub sample_count: Option<u32>,
    pub mip_count: Option<u32>,
    pub render_target: bool,
    pub uav: bool,
    pub cpu_read: bool,
    /// Level 0 pixels; cubemap faces are packed one after another
    pub data: Option<&'a [u8]>,
}

impl<'a> TextureDesc<'a> {
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
            shape: Some(TextureShape::ThreeD),
            ..Default::default()
        }
    }

    pub fn new_cubemap(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            shape: Some(TextureShape::Cubemap),
            ..Default::default()
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = Some(wrap);
        self
    }

    pub fn samples(mut self, sample_count: u32) -> Self {
        self.sample_count = Some(sample_count);
        self
    }

    pub fn mips(mut self, mip_count: u32) -> Self {
        self.mip_count = Some(mip_count);
        self
    }

    pub fn render_target(mut self) -> Self {
        self.render_target = true;
        self
    }

    pub fn uav(mut self) -> Self {
        self.uav = true;
        self
    }

    pub fn cpu_read(mut self) -> Self {
        self.cpu_read = true;
        self
    }

    pub fn data(mut self, data: &'a [u8]) -> Self {
        self.data = Some(data);
        self
    }

    /// Fills every unset field with its default. Does not validate.
    pub fn resolve(&self, default_format: Format) -> TextureInfo {
        let shape = self.shape.unwrap_or_default();
        TextureInfo {
            width: self.width,
            height: self.height,
            depth: match shape {
                TextureShape::ThreeD => self.depth.max(1),
                _ => 1,
            },
            format: self.format.unwrap_or(default_format),
            shape,
            wrap: self.wrap.unwrap_or_default(),
            sample_count: self.sample_count.unwrap_or(1),
            mip_count: self.mip_count.unwrap_or(1),
            render_target: self.render_target,
            uav: self.uav,
            cpu_read: self.cpu_read,
        }
    }
}

/// Complete texture description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: Format,
    pub shape: TextureShape,
    pub wrap: WrapMode,
    pub sample_count: u32,
    pub mip_count: u32,
    pub render_target: bool,
    pub uav: bool,
    pub cpu_read: bool,
}

impl TextureInfo {
    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.mip_count > 1 {
            return Err(RenderError::UnsupportedMipCount(self.mip_count));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::usage(format!(
                "texture size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.sample_count == 0 {
            return Err(RenderError::usage("sample count must be at least 1"));
        }
        if self.format.is_depth() && self.uav {
            return Err(RenderError::usage(format!(
                "UAV requested on depth format {:?}",
                self.format
            )));
        }
        if self.format.is_depth() && self.cpu_read {
            return Err(RenderError::usage("CPU read requested on a depth format"));
        }
        if self.is_multisampled() {
            if !self.render_target {
                return Err(RenderError::usage(
                    "multisampled textures must be render targets",
                ));
            }
            if self.uav || self.cpu_read {
                return Err(RenderError::usage(
                    "multisampled textures cannot be UAVs or CPU-read targets",
                ));
            }
            if self.shape == TextureShape::ThreeD {
                return Err(RenderError::usage("3D textures cannot be multisampled"));
            }
        }
        if self.shape == TextureShape::Cubemap && self.width != self.height {
            return Err(RenderError::usage(format!(
                "cubemap faces must be square, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Native usage of the primary (single-sample) resource
    pub fn usage(&self) -> ImageUsage {
        if self.format.is_depth() {
            return ImageUsage::DEPTH_TARGET;
        }

        let mut usage = if self.cpu_read {
            ImageUsage::CPU_READ
        } else {
            ImageUsage::SAMPLED
        };
        if self.uav {
            usage |= ImageUsage::STORAGE;
        }
        if self.render_target {
            usage |= ImageUsage::COLOR_TARGET;
        }
        usage
    }

    /// Native usage of the multisample dual
    pub fn multisample_usage(&self) -> ImageUsage {
        if self.format.is_depth() {
            ImageUsage::DEPTH_TARGET
        } else {
            ImageUsage::COLOR_TARGET
        }
    }

    pub fn image_dimension(&self) -> ImageDimension {
        match self.shape {
            TextureShape::ThreeD => ImageDimension::D3,
            _ => ImageDimension::D2,
        }
    }

    pub fn view_dimension(&self) -> ViewDimension {
        match self.shape {
            TextureShape::TwoD => ViewDimension::D2,
            TextureShape::ThreeD => ViewDimension::D3,
            TextureShape::Cubemap => ViewDimension::Cube,
        }
    }

    /// Pitch estimates for the first few levels of a full mip chain.
    /// Only level 0 is uploaded for now.
    pub fn mip_layouts(&self, format_info: FormatInfo) -> [SubresourceLayout; ESTIMATED_MIP_LEVELS] {
        std::array::from_fn(|level| {
            let width = (self.width >> level).max(1) as u64;
            let height = (self.height >> level).max(1) as u64;
            let row_pitch = width * format_info.pixel_size_in_bytes as u64;
            SubresourceLayout {
                row_pitch,
                slice_pitch: row_pitch * height,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextureKind {
    TwoD {
        image: ImageId,
        multisample: Option<ImageId>,
    },
    ThreeD {
        image: ImageId,
    },
    Cubemap {
        image: ImageId,
        multisample: Option<ImageId>,
    },
}

impl TextureKind {
    pub fn image(&self) -> ImageId {
        match *self {
            TextureKind::TwoD { image, .. }
            | TextureKind::ThreeD { image }
            | TextureKind::Cubemap { image, .. } => image,
        }
    }

    pub fn multisample(&self) -> Option<ImageId> {
        match *self {
            TextureKind::TwoD { multisample, .. }
            | TextureKind::Cubemap { multisample, .. } => multisample,
            TextureKind::ThreeD { .. } => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TextureInner {
    pub info: TextureInfo,
    pub kind: TextureKind,
}

/// A GPU texture.
///
/// `Texture::default()` is the "no texture" sentinel: binding it clears a slot,
/// and in a render-target set it selects the swapchain's images. Every valid
/// texture must be handed back to `destroy_texture` exactly once.
#[derive(Debug, Default)]
pub struct Texture {
    pub(crate) inner: Option<TextureInner>,
}

impl Texture {
    pub(crate) fn new(info: TextureInfo, kind: TextureKind) -> Self {
        Self {
            inner: Some(TextureInner { info, kind }),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn info(&self) -> Option<&TextureInfo> {
        self.inner.as_ref().map(|inner| &inner.info)
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.info().map(|info| (info.width, info.height))
    }

    pub fn has_multisample_dual(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.kind.multisample().is_some())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            log::warn!(
                "Texture {}x{} {:?} dropped without destroy_texture, leaking its GPU resources",
                inner.info.width,
                inner.info.height,
                inner.info.format,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::format::FormatTable;

    #[test]
    fn resolve_fills_defaults() {
        let info = TextureDesc::new_2d(64, 32).resolve(Format::R8G8B8A8Unorm);
        assert_eq!(info.shape, TextureShape::TwoD);
        assert_eq!(info.format, Format::R8G8B8A8Unorm);
        assert_eq!(info.wrap, WrapMode::ClampNearest);
        assert_eq!(info.sample_count, 1);
        assert_eq!(info.mip_count, 1);
        assert_eq!(info.depth, 1);
    }

    #[test]
    fn resolve_keeps_explicit_fields() {
        let info = TextureDesc::new_3d(8, 8, 4)
            .format(Format::R32Float)
            .wrap(WrapMode::RepeatLinear)
            .resolve(Format::R8G8B8A8Unorm);
        assert_eq!(info.shape, TextureShape::ThreeD);
        assert_eq!(info.depth, 4);
        assert_eq!(info.format, Format::R32Float);
        assert_eq!(info.wrap, WrapMode::RepeatLinear);
    }

    #[test]
    fn depth_is_ignored_for_2d() {
        let mut desc = TextureDesc::new_2d(4, 4);
        desc.depth = 9;
        assert_eq!(desc.resolve(Format::R8Unorm).depth, 1);
    }

    #[test]
    fn mip_count_above_one_is_rejected() {
        let info = TextureDesc::new_2d(4, 4).mips(3).resolve(Format::R8Unorm);
        assert!(matches!(info.validate(), Err(RenderError::UnsupportedMipCount(3))));
    }

    #[test]
    fn depth_uav_is_rejected() {
        let info = TextureDesc::new_2d(4, 4)
            .format(Format::D32Float)
            .render_target()
            .uav()
            .resolve(Format::R8Unorm);
        assert!(matches!(info.validate(), Err(RenderError::InvalidUsage(_))));
    }

    #[test]
    fn multisample_requires_render_target() {
        let info = TextureDesc::new_2d(4, 4).samples(4).resolve(Format::R8Unorm);
        assert!(info.validate().is_err());
        let info = TextureDesc::new_2d(4, 4)
            .samples(4)
            .render_target()
            .resolve(Format::R8Unorm);
        assert!(info.validate().is_ok());
    }

    #[test]
    fn usage_flags_follow_description() {
        let depth = TextureDesc::new_2d(4, 4)
            .format(Format::D32Float)
            .render_target()
            .resolve(Format::R8Unorm);
        assert_eq!(depth.usage(), ImageUsage::DEPTH_TARGET);

        let color = TextureDesc::new_2d(4, 4)
            .render_target()
            .uav()
            .resolve(Format::R8Unorm);
        assert_eq!(
            color.usage(),
            ImageUsage::SAMPLED | ImageUsage::STORAGE | ImageUsage::COLOR_TARGET
        );

        let staging = TextureDesc::new_2d(4, 4)
            .cpu_read()
            .render_target()
            .resolve(Format::R8Unorm);
        assert!(!staging.usage().contains(ImageUsage::SAMPLED));
        assert!(staging.usage().contains(ImageUsage::CPU_READ));
    }

    #[test]
    fn mip_layouts_halve_per_level() {
        let table = FormatTable::new().unwrap();
        let info = TextureDesc::new_2d(64, 16).resolve(Format::R8G8B8A8Unorm);
        let layouts = info.mip_layouts(table.get_format_info(info.format));
        assert_eq!(layouts[0].row_pitch, 256);
        assert_eq!(layouts[0].slice_pitch, 256 * 16);
        assert_eq!(layouts[1].row_pitch, 128);
        assert_eq!(layouts[5].row_pitch, 8);
        assert_eq!(layouts[5].slice_pitch, 8);
    }

    #[test]
    fn default_texture_is_invalid() {
        let texture = Texture::default();
        assert!(!texture.is_valid());
        assert!(texture.info().is_none());
    }
}
