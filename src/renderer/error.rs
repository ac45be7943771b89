use thiserror::Error;

use crate::renderer::format::Format;

pub type Result<T> = std::result::Result<T, RenderError>;

/// Everything the render layer can fail with.
///
/// Apart from the driver variants these all describe programming errors: the
/// caller is expected to propagate them up and abort rather than recover.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Format {0:?} has no entry in the format table")]
    MissingFormatEntry(Format),

    #[error("Mip generation is not implemented (requested {0} mip levels)")]
    UnsupportedMipCount(u32),

    #[error("Vertex format has {count} fields, the maximum is {max}")]
    TooManyVertexFields { count: usize, max: usize },

    #[error("Unordered access views over cubemaps are not implemented")]
    UnsupportedCubemapUav,

    #[error("Render targets are already bound; call unset_render_targets first")]
    RenderTargetsAlreadyBound,

    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    #[error("{kind} slot {slot} is out of range (max {max})")]
    SlotOutOfRange { kind: &'static str, slot: u32, max: u32 },

    #[error("Wrote {len} bytes into a buffer of {capacity} bytes")]
    BufferOverflow { len: u64, capacity: u64 },

    #[error("Format mismatch: {dst:?} vs {src:?}")]
    FormatMismatch { dst: Format, src: Format },

    #[error("Failed to compile shader {name}: {message}")]
    ShaderCompile { name: String, message: String },

    #[error("Vertex format does not match the shader input signature: {0}")]
    InputSignatureMismatch(String),

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Window handle error: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("Device error: {0}")]
    Device(String),
}

impl RenderError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::InvalidUsage(message.into())
    }
}
