//! Buffer allocation and management.
//!
//! Traits describing the buffer allocator the presentation core renders into
//! and scans out from.
//!
//! Allocators provided:
//! - Gbm Buffers through [`::gbm::Device`] (feature `backend_gbm`)
//!
//! An allocator hands out [`AllocatorSurface`]s, a small ring of buffers the gpu renders into.
//! After a frame is finished the most recently rendered buffer is locked, scanned out and
//! eventually released back to the surface again.
//!
//! Every buffer carries a [`BufferId`] that stays stable for the lifetime of the buffer,
//! which allows consumers to keep their own per-buffer state in side tables.
//! Once a buffer is destroyed by the allocator, its id is reported through
//! [`BufferAllocator::take_freed`].

use std::io;

#[cfg(feature = "backend_gbm")]
pub mod gbm;

pub use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier, UnrecognizedFourcc};

bitflags::bitflags! {
    /// Intended usage of a buffer
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer will be scanned out by a crtc
        const SCANOUT   = 0b00000001;
        /// Buffer will be rendered into by the gpu
        const RENDERING = 0b00000010;
        /// Buffer will be used as a hardware cursor image
        const CURSOR    = 0b00000100;
        /// Buffer contents will be written by the cpu
        const WRITE     = 0b00001000;
        /// Buffer has to use a linear layout
        const LINEAR    = 0b00010000;
    }
}

/// Allocator-assigned identity of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    /// Wraps a raw allocator id
    #[inline]
    pub fn from_raw(id: u64) -> BufferId {
        BufferId(id)
    }

    /// Returns the raw allocator id
    #[inline]
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// A buffer locked from an [`AllocatorSurface`]
pub trait AllocatedBuffer: drm::buffer::Buffer {
    /// Stable identity of the buffer
    fn id(&self) -> BufferId;
}

/// A cpu-writable buffer for the hardware cursor
pub trait CursorBuffer: drm::buffer::Buffer {
    /// Replaces the buffer contents with `data`, which uses the buffer's pitch as stride
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

/// A ring of buffers the gpu renders into
pub trait AllocatorSurface {
    /// Buffer type handed out by [`lock_front_buffer`](AllocatorSurface::lock_front_buffer)
    type Buffer: AllocatedBuffer;

    /// Size of the buffers of this surface
    fn size(&self) -> (u32, u32);
    /// Locks the most recently rendered buffer, so it is not rendered into again
    fn lock_front_buffer(&mut self) -> io::Result<Self::Buffer>;
    /// Releases a locked buffer back to the surface
    fn release_buffer(&mut self, buffer: Self::Buffer);
}

/// Interface to create surfaces and cursor buffers
pub trait BufferAllocator {
    /// Surface type created by this allocator
    type Surface: AllocatorSurface;
    /// Cursor buffer type created by this allocator
    type CursorBuffer: CursorBuffer;

    /// Returns if buffers of the given format and usage can be allocated
    fn is_format_supported(&self, format: Fourcc, usage: BufferUsage) -> bool;
    /// Creates a new surface
    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferUsage,
    ) -> io::Result<Self::Surface>;
    /// Destroys a surface and every buffer still owned by it
    fn destroy_surface(&mut self, surface: Self::Surface);
    /// Creates a standalone buffer for the hardware cursor
    fn create_cursor_buffer(
        &mut self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferUsage,
    ) -> io::Result<Self::CursorBuffer>;
    /// Drains the ids of all buffers destroyed since the last call
    fn take_freed(&mut self) -> Vec<BufferId>;
}
