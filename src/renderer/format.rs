use crate::renderer::error::{RenderError, Result};

/// Backend-independent pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8Unorm,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R16Float,
    R16G16Float,
    R16G16B16A16Float,
    R32Float,
    R32G32Float,
    R32G32B32A32Float,
    R32Uint,
    R11G11B10Float,
    R10G10B10A2Unorm,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
}

impl Format {
    pub const ALL: &'static [Format] = &[
        Format::R8Unorm,
        Format::R8G8Unorm,
        Format::R8G8B8A8Unorm,
        Format::R8G8B8A8Srgb,
        Format::B8G8R8A8Unorm,
        Format::B8G8R8A8Srgb,
        Format::R16Float,
        Format::R16G16Float,
        Format::R16G16B16A16Float,
        Format::R32Float,
        Format::R32G32Float,
        Format::R32G32B32A32Float,
        Format::R32Uint,
        Format::R11G11B10Float,
        Format::R10G10B10A2Unorm,
        Format::D16Unorm,
        Format::D24UnormS8Uint,
        Format::D32Float,
    ];

    pub const COUNT: usize = Self::ALL.len();

    fn index(self) -> usize {
        self as usize
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::D16Unorm | Format::D24UnormS8Uint | Format::D32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub pixel_size_in_bytes: u32,
    pub channel_count: u32,
    pub is_depth_format: bool,
}

/// Per-format metadata, built once when the render context starts up
pub struct FormatTable {
    entries: [Option<FormatInfo>; Format::COUNT],
}

impl FormatTable {
    pub fn new() -> Result<Self> {
        Self::from_lookup(describe)
    }

    fn from_lookup(lookup: impl Fn(Format) -> Option<FormatInfo>) -> Result<Self> {
        let mut entries = [None; Format::COUNT];
        for &format in Format::ALL {
            let info = lookup(format)
                .filter(|info| info.pixel_size_in_bytes > 0 && info.channel_count > 0)
                .ok_or(RenderError::MissingFormatEntry(format))?;
            entries[format.index()] = Some(info);
        }
        log::debug!("Format table initialized with {} entries", Format::COUNT);
        Ok(Self { entries })
    }

    pub fn get_format_info(&self, format: Format) -> FormatInfo {
        // Every slot is checked in `from_lookup`
        self.entries[format.index()].unwrap_or_else(|| {
            unreachable!("format table was validated at startup")
        })
    }
}

fn describe(format: Format) -> Option<FormatInfo> {
    let (pixel_size_in_bytes, channel_count) = match format {
        Format::R8Unorm => (1, 1),
        Format::R8G8Unorm => (2, 2),
        Format::R8G8B8A8Unorm
        | Format::R8G8B8A8Srgb
        | Format::B8G8R8A8Unorm
        | Format::B8G8R8A8Srgb => (4, 4),
        Format::R16Float => (2, 1),
        Format::R16G16Float => (4, 2),
        Format::R16G16B16A16Float => (8, 4),
        Format::R32Float => (4, 1),
        Format::R32G32Float => (8, 2),
        Format::R32G32B32A32Float => (16, 4),
        Format::R32Uint => (4, 1),
        Format::R11G11B10Float => (4, 3),
        Format::R10G10B10A2Unorm => (4, 4),
        Format::D16Unorm => (2, 1),
        Format::D24UnormS8Uint => (4, 2),
        Format::D32Float => (4, 1),
    };
    Some(FormatInfo {
        pixel_size_in_bytes,
        channel_count,
        is_depth_format: format.is_depth(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_has_a_nonzero_pixel_size() {
        let table = FormatTable::new().unwrap();
        for &format in Format::ALL {
            assert!(table.get_format_info(format).pixel_size_in_bytes > 0, "{format:?}");
        }
    }

    #[test]
    fn all_list_matches_discriminants() {
        for (i, &format) in Format::ALL.iter().enumerate() {
            assert_eq!(format.index(), i);
        }
    }

    #[test]
    fn depth_formats_are_flagged() {
        let table = FormatTable::new().unwrap();
        assert!(table.get_format_info(Format::D32Float).is_depth_format);
        assert!(table.get_format_info(Format::D24UnormS8Uint).is_depth_format);
        assert!(!table.get_format_info(Format::R8G8B8A8Unorm).is_depth_format);
    }

    #[test]
    fn missing_entry_is_fatal() {
        let result = FormatTable::from_lookup(|format| {
            if format == Format::R11G11B10Float {
                None
            } else {
                describe(format)
            }
        });
        assert!(matches!(
            result,
            Err(RenderError::MissingFormatEntry(Format::R11G11B10Float))
        ));
    }
}
