use crate::renderer::device::BufferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    U16,
    #[default]
    U32,
}

impl IndexFormat {
    pub fn size(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// A fixed-size GPU buffer. Contents are replaced wholesale with `update_buffer`.
#[derive(Debug)]
pub struct Buffer {
    pub(crate) id: Option<BufferId>,
    kind: BufferKind,
    size: u64,
}

impl Buffer {
    pub(crate) fn new(id: BufferId, kind: BufferKind, size: u64) -> Self {
        Self {
            id: Some(id),
            kind,
            size,
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn id(&self) -> Option<BufferId> {
        self.id
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.id.is_some() {
            log::warn!(
                "{:?} buffer of {} bytes dropped without destroy_buffer, leaking it",
                self.kind,
                self.size,
            );
        }
    }
}

/// One vertex-buffer slot assignment
#[derive(Debug, Clone, Copy)]
pub struct VertexBufferBinding<'a> {
    pub buffer: &'a Buffer,
    pub stride: u32,
    pub offset: u64,
}

impl<'a> VertexBufferBinding<'a> {
    pub fn new(buffer: &'a Buffer, stride: u32) -> Self {
        Self {
            buffer,
            stride,
            offset: 0,
        }
    }
}
