use crate::renderer::format::Format;

pub const MAX_TEXTURE_SLOTS: usize = 12;
pub const MAX_UAV_SLOTS: usize = 8;
pub const MAX_RENDER_TARGETS: usize = 8;
pub const MAX_VERTEX_BUFFER_SLOTS: usize = 8;
pub const MAX_CONSTANT_BUFFER_SLOTS: usize = 8;
pub const MAX_VERTEX_FIELDS: usize = 32;

/// Number of mip levels the upload path estimates pitches for
pub const ESTIMATED_MIP_LEVELS: usize = 6;

/// Contains configuration options for the renderer like validation, vsync, and defaults
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub app_name: String,
    pub validation: bool,
    pub vsync: bool,
    /// Used for textures whose description leaves the format unset
    pub default_color_format: Format,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            app_name: "ember".into(),
            validation: cfg!(debug_assertions),
            vsync: true,
            default_color_format: Format::R8G8B8A8Unorm,
        }
    }
}
