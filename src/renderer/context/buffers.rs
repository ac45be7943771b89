use smallvec::SmallVec;

use crate::renderer::config::{MAX_CONSTANT_BUFFER_SLOTS, MAX_VERTEX_BUFFER_SLOTS};
use crate::renderer::context::RenderContext;
use crate::renderer::device::{BufferId, Device, VertexBufferView};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::resources::buffer::{Buffer, BufferKind, IndexFormat, VertexBufferBinding};

impl<D: Device> RenderContext<D> {
    /// Allocates a buffer of `size` bytes, optionally filled from `data`
    pub fn create_buffer(&mut self, kind: BufferKind, data: Option<&[u8]>, size: u64) -> Result<Buffer> {
        if size == 0 {
            return Err(RenderError::usage("buffers must not be empty"));
        }
        if let Some(data) = data {
            check_fits(data, size)?;
        }

        let id = self.device.create_buffer(kind, size, data)?;
        log::debug!("Created {:?} buffer of {} bytes", kind, size);
        Ok(Buffer::new(id, kind, size))
    }

    /// Replaces the buffer's contents with `data`
    pub fn update_buffer(&mut self, buffer: &Buffer, data: &[u8]) -> Result<()> {
        let id = valid_id(buffer)?;
        check_fits(data, buffer.size())?;
        self.device.write_buffer(id, data)
    }

    pub fn destroy_buffer(&mut self, mut buffer: Buffer) {
        if let Some(id) = buffer.id.take() {
            self.device.destroy_buffer(id);
            log::debug!("Destroyed {:?} buffer", buffer.kind());
        }
    }

    pub fn bind_vertex_buffers(&mut self, first_slot: u32, bindings: &[VertexBufferBinding<'_>]) -> Result<()> {
        check_range("vertex buffer", first_slot, bindings.len(), MAX_VERTEX_BUFFER_SLOTS)?;

        let views = bindings
            .iter()
            .map(|binding| {
                Ok(VertexBufferView {
                    buffer: typed_id(binding.buffer, BufferKind::Vertex)?,
                    stride: binding.stride,
                    offset: binding.offset,
                })
            })
            .collect::<Result<SmallVec<[_; MAX_VERTEX_BUFFER_SLOTS]>>>()?;

        self.device.set_vertex_buffers(first_slot, &views);
        Ok(())
    }

    /// `offset` must be a multiple of the index size and lie inside the buffer
    pub fn bind_index_buffer(&mut self, buffer: &Buffer, format: IndexFormat, offset: u64) -> Result<()> {
        let id = typed_id(buffer, BufferKind::Index)?;
        let index_size = format.size() as u64;
        if offset % index_size != 0 || offset >= buffer.size() {
            return Err(RenderError::usage(format!(
                "index buffer offset {} is not a {}-byte aligned offset into {} bytes",
                offset,
                index_size,
                buffer.size()
            )));
        }
        self.device.set_index_buffer(Some(id), format, offset);
        Ok(())
    }

    /// Binds a contiguous run of constant buffers to every shader stage
    pub fn bind_constant_buffers(&mut self, first_slot: u32, buffers: &[&Buffer]) -> Result<()> {
        check_range("constant buffer", first_slot, buffers.len(), MAX_CONSTANT_BUFFER_SLOTS)?;

        let ids = buffers
            .iter()
            .map(|buffer| typed_id(buffer, BufferKind::Constant))
            .collect::<Result<SmallVec<[_; MAX_CONSTANT_BUFFER_SLOTS]>>>()?;

        self.device.set_constant_buffers(first_slot, &ids);
        Ok(())
    }
}

fn check_fits(data: &[u8], capacity: u64) -> Result<()> {
    if data.len() as u64 > capacity {
        return Err(RenderError::BufferOverflow {
            len: data.len() as u64,
            capacity,
        });
    }
    Ok(())
}

fn check_range(kind: &'static str, first_slot: u32, count: usize, max: usize) -> Result<()> {
    let end = first_slot as usize + count;
    if end > max {
        return Err(RenderError::SlotOutOfRange {
            kind,
            slot: end as u32 - 1,
            max: max as u32,
        });
    }
    Ok(())
}

fn valid_id(buffer: &Buffer) -> Result<BufferId> {
    buffer
        .id()
        .ok_or_else(|| RenderError::usage("buffer has already been destroyed"))
}

fn typed_id(buffer: &Buffer, kind: BufferKind) -> Result<BufferId> {
    if buffer.kind() != kind {
        return Err(RenderError::usage(format!(
            "{:?} buffer bound where a {:?} buffer is expected",
            buffer.kind(),
            kind
        )));
    }
    valid_id(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::config::RenderConfig;
    use crate::renderer::device::null::{DeviceCall, NullDevice};

    fn context() -> RenderContext<NullDevice> {
        RenderContext::new(NullDevice::new(64, 64).unwrap(), RenderConfig::default()).unwrap()
    }

    #[test]
    fn oversized_update_is_rejected() {
        let mut ctx = context();
        let buffer = ctx.create_buffer(BufferKind::Constant, None, 16).unwrap();
        let result = ctx.update_buffer(&buffer, &[0; 17]);
        assert!(matches!(result, Err(RenderError::BufferOverflow { len: 17, capacity: 16 })));
        ctx.destroy_buffer(buffer);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let mut ctx = context();
        let buffer = ctx.create_buffer(BufferKind::Index, None, 12).unwrap();
        let result = ctx.bind_vertex_buffers(0, &[VertexBufferBinding::new(&buffer, 12)]);
        assert!(result.is_err());
        ctx.bind_index_buffer(&buffer, IndexFormat::U16, 0).unwrap();
        ctx.destroy_buffer(buffer);
    }

    #[test]
    fn index_offset_must_be_aligned_and_in_range() {
        let mut ctx = context();
        let buffer = ctx.create_buffer(BufferKind::Index, None, 12).unwrap();
        assert!(ctx.bind_index_buffer(&buffer, IndexFormat::U32, 2).is_err());
        assert!(ctx.bind_index_buffer(&buffer, IndexFormat::U32, 12).is_err());
        ctx.bind_index_buffer(&buffer, IndexFormat::U16, 2).unwrap();
        assert_eq!(
            ctx.device().calls().last(),
            Some(&DeviceCall::SetIndexBuffer {
                buffer: buffer.id(),
                format: IndexFormat::U16,
                offset: 2,
            })
        );
        ctx.destroy_buffer(buffer);
    }

    #[test]
    fn constant_buffers_bind_as_one_range() {
        let mut ctx = context();
        let a = ctx.create_buffer(BufferKind::Constant, None, 64).unwrap();
        let b = ctx.create_buffer(BufferKind::Constant, None, 64).unwrap();
        ctx.bind_constant_buffers(2, &[&a, &b]).unwrap();
        let last = ctx.device().calls().last().cloned();
        assert_eq!(
            last,
            Some(DeviceCall::SetConstantBuffers {
                first_slot: 2,
                buffers: vec![a.id().unwrap(), b.id().unwrap()],
            })
        );
        assert!(ctx.bind_constant_buffers(7, &[&a, &b]).is_err());
        ctx.destroy_buffer(a);
        ctx.destroy_buffer(b);
    }
}
