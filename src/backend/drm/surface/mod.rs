//! Per-window scanout surfaces and the device state they are created from

use drm::control::{connector, crtc, framebuffer, plane, Mode};
use tracing::{debug, error, info, trace, warn};

use super::{flip::wait_for_flip, framebuffer_cache::FramebufferCache, Error, KmsDevice, PresentConfig};
use crate::backend::allocator::{AllocatorSurface, BufferAllocator, BufferUsage, Fourcc};
use crate::backend::egl::{GpuCapabilities, GpuContext};
use crate::backend::Platform;
use crate::utils::{Buffer, Physical, Rectangle};

pub(crate) mod atomic;
pub(crate) mod legacy;

pub(crate) type AllocSurface<P> = <<P as Platform>::Allocator as BufferAllocator>::Surface;
pub(crate) type ScanoutBuffer<P> = <AllocSurface<P> as AllocatorSurface>::Buffer;
pub(crate) type GpuSurface<P> = <<P as Platform>::Gpu as GpuContext<AllocSurface<P>>>::Surface;
pub(crate) type GpuFence<P> = <<P as Platform>::Gpu as GpuContext<AllocSurface<P>>>::Fence;
pub(crate) type CursorBufferOf<P> = <<P as Platform>::Allocator as BufferAllocator>::CursorBuffer;

/// Part of a framebuffer that is scanned out and where it ends up on the crtc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Source rectangle in the framebuffer
    pub src: Rectangle<u32, Buffer>,
    /// Destination rectangle on the crtc
    pub dst: Rectangle<i32, Physical>,
}

impl Viewport {
    /// Computes the viewport of a surface of `size` on a crtc running `mode`.
    ///
    /// Fullscreen surfaces cover the mode exactly. Other surfaces are scaled to the height of
    /// the mode keeping their aspect ratio and centered horizontally.
    pub fn new(mode: &Mode, size: (u32, u32), fullscreen: bool) -> Viewport {
        let (hdisplay, vdisplay) = mode.size();
        let (hdisplay, vdisplay) = (hdisplay as i32, vdisplay as i32);
        if fullscreen || size.1 == 0 {
            return Viewport {
                src: Rectangle::from_size((hdisplay as u32, vdisplay as u32)),
                dst: Rectangle::from_size((hdisplay, vdisplay)),
            };
        }

        let width = (vdisplay as u64 * size.0 as u64 / size.1 as u64) as i32;
        Viewport {
            src: Rectangle::from_size(size),
            dst: Rectangle::from_loc_and_size(((hdisplay - width) / 2, 0), (width, vdisplay)),
        }
    }
}

/// Mode-setting capabilities queried on every open of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeviceCapabilities {
    pub atomic: bool,
    pub async_page_flip: bool,
    pub cursor_size: (u32, u32),
    pub gpu: GpuCapabilities,
}

/// Display pipe state shared by every window
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Output {
    pub connector: connector::Handle,
    pub crtc: crtc::Handle,
    pub primary_plane: Option<plane::Handle>,
    pub original_mode: Mode,
    pub original_framebuffer: Option<framebuffer::Handle>,
    pub current_mode: Mode,
    pub modeset_pending: bool,
    pub connector_modes: Vec<Mode>,
}

impl Output {
    /// Puts the pre-session mode and framebuffer back on the crtc
    pub fn restore<D: KmsDevice>(&self, device: &D) {
        debug!(crtc = ?self.crtc, mode = ?self.original_mode.size(), "Restoring original crtc state");
        if let Err(err) = device.set_crtc(
            self.crtc,
            self.original_framebuffer,
            &[self.connector],
            Some(self.original_mode),
        ) {
            warn!(crtc = ?self.crtc, "Failed to restore crtc: {}", err);
        }
    }
}

/// Everything created from an open device
///
/// Fields drop in declaration order, so objects go away in reverse order of creation.
pub(crate) struct OpenDevice<P: Platform> {
    pub kms_fence: Option<GpuFence<P>>,
    pub cursor_buffer: Option<CursorBufferOf<P>>,
    pub gpu: P::Gpu,
    pub allocator: P::Allocator,
    pub device: P::Device,
    pub capabilities: DeviceCapabilities,
    pub framebuffers: FramebufferCache,
}

impl<P: Platform> OpenDevice<P> {
    /// Opens the device node and brings up allocator and gpu context
    pub fn open(platform: &mut P, config: &PresentConfig) -> Result<OpenDevice<P>, Error> {
        let mut device = platform.open_device()?;

        let atomic = !config.disable_atomic && device.enable_atomic();
        let async_page_flip = device.supports_async_page_flip();
        let cursor_size = device.cursor_size().unwrap_or_else(|err| {
            warn!("Unable to query cursor size: {}", err);
            (0, 0)
        });

        let mut allocator = platform.create_allocator(&device)?;
        let gpu = platform.create_gpu_context(&allocator)?;
        let capabilities = DeviceCapabilities {
            atomic,
            async_page_flip,
            cursor_size,
            gpu: gpu.capabilities(),
        };
        info!(?capabilities, "Device opened");

        let cursor_usage = BufferUsage::CURSOR | BufferUsage::WRITE | BufferUsage::LINEAR;
        let cursor_buffer = if cursor_size.0 == 0 || cursor_size.1 == 0 {
            None
        } else if !allocator.is_format_supported(Fourcc::Argb8888, BufferUsage::CURSOR | BufferUsage::WRITE) {
            debug!("Allocator does not support argb8888 cursor buffers");
            None
        } else {
            allocator
                .create_cursor_buffer(cursor_size.0, cursor_size.1, Fourcc::Argb8888, cursor_usage)
                .map_err(|err| warn!("Failed to create cursor buffer: {}", err))
                .ok()
        };

        Ok(OpenDevice {
            kms_fence: None,
            cursor_buffer,
            gpu,
            allocator,
            device,
            capabilities,
            framebuffers: FramebufferCache::default(),
        })
    }

    /// Blocks until the last fenced commit completed and drops its fence
    pub fn retire_kms_fence(&mut self) {
        if let Some(fence) = self.kms_fence.take() {
            trace!("Waiting for previous commit");
            if let Err(err) = self.gpu.client_wait_fence(&fence, None) {
                error!("Failed to wait for kms fence: {}", err);
            }
            self.gpu.destroy_fence(fence);
        }
    }

    /// Removes the framebuffers of buffers the allocator destroyed
    pub fn reap(&mut self) {
        let freed = self.allocator.take_freed();
        self.framebuffers.reap(&self.device, freed);
    }

    /// Releases everything created from the device, in reverse order
    pub fn close(mut self) {
        self.retire_kms_fence();
        self.cursor_buffer = None;
        self.reap();
        self.framebuffers.clear(&self.device);
        debug!("Closing device");
    }
}

/// Allocator and gpu surface of a window and the buffers locked from it
pub(crate) struct WindowSurfaces<P: Platform> {
    pub allocator_surface: AllocSurface<P>,
    pub gpu_surface: GpuSurface<P>,
    /// Buffer currently scanned out
    pub front: Option<ScanoutBuffer<P>>,
    /// Buffer of the outstanding flip
    pub next: Option<ScanoutBuffer<P>>,
    /// Previous front of a commit no fence guards, possibly still scanned out
    pub held: Option<ScanoutBuffer<P>>,
    pub flip_outstanding: bool,
    pub size: (u32, u32),
    pub viewport: Viewport,
}

impl<P: Platform> std::fmt::Debug for WindowSurfaces<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowSurfaces")
            .field("size", &self.size)
            .field("viewport", &self.viewport)
            .field("front", &self.front.is_some())
            .field("next", &self.next.is_some())
            .field("held", &self.held.is_some())
            .field("flip_outstanding", &self.flip_outstanding)
            .finish()
    }
}

impl<P: Platform> WindowSurfaces<P> {
    /// Creates the surfaces of a window
    ///
    /// Fullscreen windows use the size of the current mode, others their requested size.
    pub fn create(
        dev: &mut OpenDevice<P>,
        output: &Output,
        requested: (u32, u32),
        fullscreen: bool,
    ) -> Result<WindowSurfaces<P>, Error> {
        let size = if fullscreen {
            let (w, h) = output.current_mode.size();
            (w as u32, h as u32)
        } else {
            requested
        };

        let allocator_surface = dev
            .allocator
            .create_surface(
                size.0,
                size.1,
                Fourcc::Argb8888,
                BufferUsage::SCANOUT | BufferUsage::RENDERING,
            )
            .map_err(|source| Error::Allocation {
                errmsg: "Failed to create scanout surface",
                source,
            })?;

        let gpu_surface = match dev.gpu.create_surface(&allocator_surface) {
            Ok(surface) => surface,
            Err(err) => {
                dev.allocator.destroy_surface(allocator_surface);
                return Err(Error::Gpu {
                    errmsg: "Failed to create gpu surface",
                    source: Box::new(err),
                });
            }
        };

        if dev.gpu.has_context() {
            if let Err(err) = dev.gpu.make_current(Some(&gpu_surface)) {
                dev.gpu.destroy_surface(gpu_surface);
                dev.allocator.destroy_surface(allocator_surface);
                return Err(Error::Gpu {
                    errmsg: "Failed to make gpu surface current",
                    source: Box::new(err),
                });
            }
        }

        let viewport = Viewport::new(&output.current_mode, size, fullscreen);
        debug!(?size, ?viewport, "Created window surfaces");
        Ok(WindowSurfaces {
            allocator_surface,
            gpu_surface,
            front: None,
            next: None,
            held: None,
            flip_outstanding: false,
            size,
            viewport,
        })
    }

    /// Tears the surfaces down after every outstanding flip and fence completed
    pub fn destroy(mut self, dev: &mut OpenDevice<P>, output: &Output) {
        if let Err(err) = self.settle_flip(&dev.device, output.crtc) {
            error!("Failed to wait for outstanding flip: {}", err);
            self.flip_outstanding = false;
        }
        dev.retire_kms_fence();

        output.restore(&dev.device);

        if let Err(err) = dev.gpu.make_current(None) {
            warn!("Failed to release gpu surface: {}", err);
        }
        dev.gpu.destroy_surface(self.gpu_surface);

        for buffer in self
            .front
            .take()
            .into_iter()
            .chain(self.next.take())
            .chain(self.held.take())
        {
            self.allocator_surface.release_buffer(buffer);
        }
        dev.allocator.destroy_surface(self.allocator_surface);
        dev.reap();
        debug!(size = ?self.size, "Destroyed window surfaces");
    }

    /// Makes `buffer` the front buffer, releasing the previous one
    ///
    /// Only valid once the commit of `buffer` was accepted, which implies every earlier
    /// commit completed.
    pub fn advance(&mut self, buffer: ScanoutBuffer<P>) {
        for old in self.held.take().into_iter().chain(self.front.replace(buffer)) {
            self.allocator_surface.release_buffer(old);
        }
    }

    /// Makes `buffer` the front buffer, keeping the previous one locked
    ///
    /// Used when nothing guarantees the previous front left the screen. It is released
    /// by the next accepted commit.
    pub fn hold(&mut self, buffer: ScanoutBuffer<P>) {
        if let Some(stale) = self.held.take() {
            self.allocator_surface.release_buffer(stale);
        }
        self.held = self.front.replace(buffer);
    }

    /// Waits for the outstanding flip, if any, and promotes its buffer to the front
    pub fn settle_flip<D: KmsDevice>(&mut self, device: &D, crtc: crtc::Handle) -> Result<(), Error> {
        if !self.flip_outstanding {
            return Ok(());
        }
        wait_for_flip(device, crtc)?;
        self.flip_outstanding = false;
        if let Some(next) = self.next.take() {
            self.advance(next);
        }
        Ok(())
    }
}
