pub mod assets;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod resources;
pub mod shader_compiler;
pub mod vk;

pub use config::RenderConfig;
pub use context::{ColorTarget, DepthTarget, RenderContext, RenderTargetBindings};
pub use device::Device;
pub use device::null::{DeviceCall, NullDevice};
pub use error::{RenderError, Result};
pub use format::{Format, FormatInfo};
pub use resources::buffer::{Buffer, BufferKind, IndexFormat, VertexBufferBinding};
pub use resources::shader::{ComputeShader, PixelShader, VertexShader};
pub use resources::texture::{Texture, TextureDesc, TextureShape, WrapMode};
pub use resources::vertex::{VertexField, VertexFieldType, VertexFormat};
pub use vk::VulkanDevice;
