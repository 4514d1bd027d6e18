//! Gpu context abstraction
//!
//! The presentation core does not load any graphics api itself. Instead it drives a
//! [`GpuContext`], usually backed by egl, that renders into the surfaces of a
//! [`BufferAllocator`](crate::backend::allocator::BufferAllocator) and provides
//! explicit synchronization primitives.
//!
//! Fences follow the semantics of `EGL_KHR_fence_sync` and `EGL_ANDROID_native_fence_sync`:
//! a fence inserted into the command stream can be exported as a sync file descriptor
//! and a sync file descriptor handed out by the kernel can be imported as a fence again.

use std::os::unix::io::OwnedFd;
use std::time::Duration;

use crate::backend::allocator::AllocatorSurface;

/// Optional features of a [`GpuContext`], queried once after creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuCapabilities {
    /// Fences can be exported to and imported from native sync file descriptors
    pub native_fence_sync: bool,
}

/// A rendering context able to draw into surfaces of type `S`
pub trait GpuContext<S: AllocatorSurface> {
    /// Gpu surface bound to an allocator surface
    type Surface;
    /// Fence object
    type Fence;
    /// Error type returned by the context
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the capabilities of this context
    fn capabilities(&self) -> GpuCapabilities;

    /// Creates a gpu surface rendering into the buffers of `native`
    fn create_surface(&mut self, native: &S) -> Result<Self::Surface, Self::Error>;
    /// Destroys a gpu surface
    fn destroy_surface(&mut self, surface: Self::Surface);
    /// Returns if the context can currently be made current
    fn has_context(&self) -> bool;
    /// Binds the context to a surface, or releases the current binding for `None`
    fn make_current(&mut self, surface: Option<&Self::Surface>) -> Result<(), Self::Error>;
    /// Finishes the current frame, marking the next buffer of the allocator surface
    fn swap_buffers(&mut self, surface: &Self::Surface) -> Result<(), Self::Error>;

    /// Inserts a fence into the command stream
    fn create_fence(&mut self) -> Result<Self::Fence, Self::Error>;
    /// Exports a fence as a sync file descriptor
    fn export_fence(&mut self, fence: &Self::Fence) -> Result<OwnedFd, Self::Error>;
    /// Imports a sync file descriptor as a fence
    fn import_fence(&mut self, fd: OwnedFd) -> Result<Self::Fence, Self::Error>;
    /// Makes the gpu wait for the fence before executing further commands
    fn wait_fence(&mut self, fence: &Self::Fence) -> Result<(), Self::Error>;
    /// Blocks the calling thread until the fence is signaled or the timeout elapsed
    ///
    /// Returns `false` on timeout.
    fn client_wait_fence(&mut self, fence: &Self::Fence, timeout: Option<Duration>) -> Result<bool, Self::Error>;
    /// Destroys a fence
    fn destroy_fence(&mut self, fence: Self::Fence);
}
