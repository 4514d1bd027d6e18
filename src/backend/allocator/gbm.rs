//! Buffer allocation through [libgbm](gbm).
//!
//! [`GbmBufferAllocator`] hands out [`gbm::Surface`]s to render into and a linear buffer
//! object for the hardware cursor. Buffers of a surface are tagged with a [`BufferId`] on
//! their first lock. The tag reports the id back to the allocator once gbm destroys the
//! buffer, which is how framebuffers of destroyed buffers get cleaned up.

use std::io;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc, Arc,
};

use drm::buffer::Buffer as DrmBuffer;
use gbm::{BufferObject, DeviceDestroyedError};
pub use gbm::{BufferObjectFlags as GbmBufferFlags, Device as GbmDevice};
use tracing::{instrument, trace};

use super::{AllocatedBuffer, AllocatorSurface, BufferAllocator, BufferId, BufferUsage, CursorBuffer, Fourcc};
use crate::backend::drm::DrmDeviceFd;

impl From<BufferUsage> for GbmBufferFlags {
    fn from(usage: BufferUsage) -> Self {
        let mut flags = GbmBufferFlags::empty();
        if usage.contains(BufferUsage::SCANOUT) {
            flags |= GbmBufferFlags::SCANOUT;
        }
        if usage.contains(BufferUsage::RENDERING) {
            flags |= GbmBufferFlags::RENDERING;
        }
        if usage.contains(BufferUsage::CURSOR) {
            flags |= GbmBufferFlags::CURSOR;
        }
        if usage.contains(BufferUsage::WRITE) {
            flags |= GbmBufferFlags::WRITE;
        }
        if usage.contains(BufferUsage::LINEAR) {
            flags |= GbmBufferFlags::LINEAR;
        }
        flags
    }
}

fn device_destroyed(err: DeviceDestroyedError) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, err)
}

/// User data attached to every buffer object of a [`GbmBufferSurface`]
///
/// Reports the id of the buffer once gbm destroys it.
#[derive(Debug)]
pub struct BufferGuard {
    id: BufferId,
    freed: mpsc::Sender<BufferId>,
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        trace!(id = ?self.id, "Buffer object destroyed");
        // the allocator is gone as well, if nobody listens anymore
        let _ = self.freed.send(self.id);
    }
}

/// Buffer locked from a [`GbmBufferSurface`]
///
/// Dropping it hands it back to the surface.
#[derive(Debug)]
pub struct GbmScanoutBuffer {
    bo: BufferObject<BufferGuard>,
    id: BufferId,
}

impl DrmBuffer for GbmScanoutBuffer {
    #[inline]
    fn size(&self) -> (u32, u32) {
        DrmBuffer::size(&self.bo)
    }

    #[inline]
    fn format(&self) -> Fourcc {
        DrmBuffer::format(&self.bo)
    }

    #[inline]
    fn pitch(&self) -> u32 {
        DrmBuffer::pitch(&self.bo)
    }

    #[inline]
    fn handle(&self) -> drm::buffer::Handle {
        DrmBuffer::handle(&self.bo)
    }
}

impl AllocatedBuffer for GbmScanoutBuffer {
    #[inline]
    fn id(&self) -> BufferId {
        self.id
    }
}

/// Scanout surface created by a [`GbmBufferAllocator`]
#[derive(Debug)]
pub struct GbmBufferSurface {
    surface: gbm::Surface<BufferGuard>,
    size: (u32, u32),
    ids: Arc<AtomicU64>,
    freed: mpsc::Sender<BufferId>,
}

impl GbmBufferSurface {
    /// Returns the underlying gbm surface, e.g. to create an egl window surface from it
    pub fn gbm_surface(&self) -> &gbm::Surface<BufferGuard> {
        &self.surface
    }
}

impl AllocatorSurface for GbmBufferSurface {
    type Buffer = GbmScanoutBuffer;

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn lock_front_buffer(&mut self) -> io::Result<GbmScanoutBuffer> {
        // SAFETY: callers lock only after swapping buffers on the gpu surface
        let mut bo = unsafe { self.surface.lock_front_buffer() }
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        let known = bo.userdata().map_err(device_destroyed)?.map(|guard| guard.id);
        let id = match known {
            Some(id) => id,
            None => {
                let id = BufferId::from_raw(self.ids.fetch_add(1, Ordering::Relaxed));
                trace!(?id, "Tagging new buffer object");
                bo.set_userdata(BufferGuard {
                    id,
                    freed: self.freed.clone(),
                })
                .map_err(device_destroyed)?;
                id
            }
        };
        Ok(GbmScanoutBuffer { bo, id })
    }

    fn release_buffer(&mut self, buffer: GbmScanoutBuffer) {
        // releasing happens when the buffer object drops
        drop(buffer);
    }
}

/// Linear buffer object backing the hardware cursor
#[derive(Debug)]
pub struct GbmCursorBuffer(BufferObject<()>);

impl DrmBuffer for GbmCursorBuffer {
    #[inline]
    fn size(&self) -> (u32, u32) {
        DrmBuffer::size(&self.0)
    }

    #[inline]
    fn format(&self) -> Fourcc {
        DrmBuffer::format(&self.0)
    }

    #[inline]
    fn pitch(&self) -> u32 {
        DrmBuffer::pitch(&self.0)
    }

    #[inline]
    fn handle(&self) -> drm::buffer::Handle {
        DrmBuffer::handle(&self.0)
    }
}

impl CursorBuffer for GbmCursorBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.write(data).map_err(device_destroyed)?
    }
}

/// [`BufferAllocator`] backed by a gbm device
#[derive(Debug)]
pub struct GbmBufferAllocator {
    device: GbmDevice<DrmDeviceFd>,
    ids: Arc<AtomicU64>,
    freed_tx: mpsc::Sender<BufferId>,
    freed_rx: mpsc::Receiver<BufferId>,
}

impl GbmBufferAllocator {
    /// Creates a gbm device on top of an open drm device
    pub fn new(fd: DrmDeviceFd) -> io::Result<GbmBufferAllocator> {
        let device = GbmDevice::new(fd)?;
        let (freed_tx, freed_rx) = mpsc::channel();
        Ok(GbmBufferAllocator {
            device,
            ids: Arc::new(AtomicU64::new(1)),
            freed_tx,
            freed_rx,
        })
    }

    /// Returns the gbm device, e.g. to create an egl display from it
    pub fn device(&self) -> &GbmDevice<DrmDeviceFd> {
        &self.device
    }
}

impl BufferAllocator for GbmBufferAllocator {
    type Surface = GbmBufferSurface;
    type CursorBuffer = GbmCursorBuffer;

    fn is_format_supported(&self, format: Fourcc, usage: BufferUsage) -> bool {
        self.device.is_format_supported(format, usage.into())
    }

    #[instrument(level = "trace", skip(self), err)]
    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferUsage,
    ) -> io::Result<GbmBufferSurface> {
        let surface = self
            .device
            .create_surface::<BufferGuard>(width, height, format, usage.into())?;
        Ok(GbmBufferSurface {
            surface,
            size: (width, height),
            ids: self.ids.clone(),
            freed: self.freed_tx.clone(),
        })
    }

    fn destroy_surface(&mut self, surface: GbmBufferSurface) {
        // gbm destroys the buffer objects with the surface, their guards report them
        drop(surface);
    }

    #[instrument(level = "trace", skip(self), err)]
    fn create_cursor_buffer(
        &mut self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferUsage,
    ) -> io::Result<GbmCursorBuffer> {
        self.device
            .create_buffer_object::<()>(width, height, format, usage.into())
            .map(GbmCursorBuffer)
    }

    fn take_freed(&mut self) -> Vec<BufferId> {
        self.freed_rx.try_iter().collect()
    }
}
