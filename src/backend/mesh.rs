// Drawable meshes in device-local memory
//
// Vertices and indices share one host-visible staging buffer; two
// single-time copies on the transfer queue move them into place.

use ash::vk;
use std::sync::Arc;

use super::command::CommandInfrastructure;
use super::memory::{AllocatedBuffer, MemoryAllocator};
use super::pipeline::Vertex;
use super::registry::DrawableBuffers;
use crate::error::EngineResult;

pub struct Mesh {
    pub vertex_buffer: AllocatedBuffer,
    pub index_buffer: AllocatedBuffer,
    pub index_count: u32,
}

impl Mesh {
    pub fn upload(
        allocator: &Arc<MemoryAllocator>,
        commands: &CommandInfrastructure,
        vertices: &[Vertex],
        indices: &[u32],
        name: &str,
    ) -> EngineResult<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let vertex_size = vertex_bytes.len() as vk::DeviceSize;
        let index_size = index_bytes.len() as vk::DeviceSize;

        let mut staging = allocator.create_buffer(
            vertex_size + index_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &format!("{name} staging"),
        )?;
        staging.write_bytes(0, vertex_bytes)?;
        staging.write_bytes(vertex_bytes.len(), index_bytes)?;

        let vertex_buffer = allocator.create_buffer(
            vertex_size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &format!("{name} vertices"),
        )?;
        let index_buffer = allocator.create_buffer(
            index_size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &format!("{name} indices"),
        )?;

        commands.copy_buffer(staging.handle(), vertex_buffer.handle(), vertex_size, 0)?;
        commands.copy_buffer(
            staging.handle(),
            index_buffer.handle(),
            index_size,
            vertex_size,
        )?;

        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} indices)",
            name,
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }
}

impl DrawableBuffers for Mesh {
    fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }
}
