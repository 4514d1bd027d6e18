//! Per-frame presentation pipeline

use drm::control::PageFlipFlags;
use tracing::{debug, instrument, trace};

use super::surface::{atomic, legacy, DeviceCapabilities, OpenDevice, Output, WindowSurfaces};
use super::{Error, PresentConfig, SwapInterval};
use crate::backend::allocator::AllocatorSurface;
use crate::backend::egl::GpuContext;
use crate::backend::Platform;

/// Way frames of a window are put on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// No frame was presented yet
    #[default]
    Unselected,
    /// Legacy page flips, completion is awaited on the device file descriptor
    Legacy,
    /// Blocking atomic commits
    DoubleBufferedAtomic,
    /// Non-blocking atomic commits synchronized through gpu and kernel fences
    FencedAtomic,
}

impl Strategy {
    /// Picks the strategy for a window on its first frame
    ///
    /// Atomic strategies need atomic support on the device and a primary plane for our crtc.
    /// The fenced strategy additionally requires native fence support of the gpu and is
    /// never chosen, if `double_buffer` forces synchronous presentation.
    pub(crate) fn select(capabilities: &DeviceCapabilities, has_primary_plane: bool, config: &PresentConfig) -> Strategy {
        if !capabilities.atomic || !has_primary_plane {
            Strategy::Legacy
        } else if config.double_buffer || !capabilities.gpu.native_fence_sync {
            Strategy::DoubleBufferedAtomic
        } else {
            Strategy::FencedAtomic
        }
    }
}

/// Result of a commit step
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The buffer is on screen, the previous front buffer may be reused
    Shown,
    /// A flip to the buffer is outstanding
    Queued,
    /// A flip to the buffer is outstanding, but waiting for it failed
    Pending(Error),
    /// The buffer was committed, but no fence guards the previous front buffer
    Unguarded(Error),
}

fn flip_flags(capabilities: &DeviceCapabilities, config: &PresentConfig, interval: SwapInterval) -> PageFlipFlags {
    if interval == SwapInterval::Immediate && capabilities.async_page_flip && config.allow_async_flip {
        PageFlipFlags::EVENT | PageFlipFlags::ASYNC
    } else {
        PageFlipFlags::EVENT
    }
}

/// Puts the frame just rendered into `surfaces` on screen
///
/// On failure the locked buffer goes back to the allocator and the previous front buffer
/// stays on screen.
///
/// # Panics
///
/// With [`Strategy::FencedAtomic`] the gpu advertised native fence support.
/// Failing to create or export a fence afterwards is treated as a broken driver contract.
/// Presenting anything but the first frame with [`Strategy::Unselected`], or with an atomic
/// strategy on an output without primary plane, panics as well.
#[instrument(level = "trace", skip(dev, output, surfaces, config))]
#[profiling::function]
pub(crate) fn present_frame<P: Platform>(
    dev: &mut OpenDevice<P>,
    output: &mut Output,
    surfaces: &mut WindowSurfaces<P>,
    strategy: Strategy,
    config: &PresentConfig,
    interval: SwapInterval,
) -> Result<(), Error> {
    let bootstrap = surfaces.front.is_none() && surfaces.next.is_none();

    let render_fence = if strategy == Strategy::FencedAtomic && !bootstrap {
        match dev.gpu.create_fence() {
            Ok(fence) => Some(fence),
            Err(err) => panic!("Failed to create native fence despite driver support: {}", err),
        }
    } else {
        None
    };

    if let Err(err) = dev.gpu.swap_buffers(&surfaces.gpu_surface) {
        if let Some(fence) = render_fence {
            dev.gpu.destroy_fence(fence);
        }
        return Err(Error::Gpu {
            errmsg: "Failed to swap buffers",
            source: Box::new(err),
        });
    }

    let in_fence = match render_fence {
        Some(fence) => {
            let fd = match dev.gpu.export_fence(&fence) {
                Ok(fd) => fd,
                Err(err) => panic!("Failed to export native fence despite driver support: {}", err),
            };
            dev.gpu.destroy_fence(fence);
            Some(fd)
        }
        None => None,
    };

    let buffer = surfaces
        .allocator_surface
        .lock_front_buffer()
        .map_err(|source| Error::Allocation {
            errmsg: "Failed to lock front buffer",
            source,
        })?;
    let fb = match dev.framebuffers.framebuffer_for(&dev.device, &buffer) {
        Ok(fb) => fb,
        Err(err) => {
            surfaces.allocator_surface.release_buffer(buffer);
            return Err(err);
        }
    };

    let result = if bootstrap {
        debug!(?fb, "Presenting first frame");
        legacy::set_crtc(&dev.device, output, fb).map(|_| Outcome::Shown)
    } else {
        match (strategy, output.primary_plane, in_fence) {
            (Strategy::Legacy, _, _) => {
                let flags = flip_flags(&dev.capabilities, config, interval);
                legacy::flip(dev, output, surfaces, fb, flags, config.double_buffer)
            }
            (Strategy::DoubleBufferedAtomic, Some(plane), _) => {
                atomic::commit_blocking(dev, output, plane, surfaces.viewport, fb)
            }
            (Strategy::FencedAtomic, Some(plane), Some(in_fence)) => {
                atomic::commit_fenced(dev, output, plane, surfaces.viewport, fb, in_fence)
            }
            (Strategy::Unselected, _, _) => unreachable!("Presenting without a selected strategy"),
            (_, None, _) => unreachable!("Atomic strategy selected without a primary plane"),
            (Strategy::FencedAtomic, Some(_), None) => unreachable!("Fenced commit without a render fence"),
        }
    };

    match result {
        Ok(Outcome::Shown) => {
            surfaces.advance(buffer);
            Ok(())
        }
        Ok(Outcome::Queued) => {
            surfaces.next = Some(buffer);
            surfaces.flip_outstanding = true;
            Ok(())
        }
        Ok(Outcome::Pending(error)) => {
            surfaces.next = Some(buffer);
            surfaces.flip_outstanding = true;
            Err(error)
        }
        Ok(Outcome::Unguarded(error)) => {
            surfaces.hold(buffer);
            Err(error)
        }
        Err(err) => {
            trace!("Commit failed, releasing buffer");
            surfaces.allocator_surface.release_buffer(buffer);
            Err(err)
        }
    }
}
