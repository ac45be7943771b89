/// "Resources" refers to the value types handed out by the render context.
/// They are owned by the caller and must be returned to the context that created them.

pub mod buffer;
pub mod shader;
pub mod texture;
pub mod vertex;
