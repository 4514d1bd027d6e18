use drm::control::{framebuffer, PageFlipFlags};
use tracing::{debug, instrument, trace};

use super::{OpenDevice, Output, WindowSurfaces};
use crate::backend::drm::{flip::wait_for_flip, present::Outcome, Error, KmsDevice};
use crate::backend::Platform;

/// Programs the crtc synchronously with `fb`, the current mode and our connector
///
/// Establishes the crtc binding every later commit builds upon.
#[instrument(level = "debug", skip(device, output))]
pub(crate) fn set_crtc<D: KmsDevice>(device: &D, output: &mut Output, fb: framebuffer::Handle) -> Result<(), Error> {
    device.set_crtc(
        output.crtc,
        Some(fb),
        &[output.connector],
        Some(output.current_mode),
    )?;
    if output.modeset_pending {
        debug!(mode = ?output.current_mode.size(), "Mode applied");
    }
    output.modeset_pending = false;
    Ok(())
}

/// Queues a page flip to `fb`
///
/// An outstanding flip is waited out first, so at most one flip per crtc is queued at any time.
/// With `double_buffer` set the new flip is waited out as well before returning.
#[instrument(level = "trace", skip(dev, output, surfaces))]
#[profiling::function]
pub(crate) fn flip<P: Platform>(
    dev: &OpenDevice<P>,
    output: &mut Output,
    surfaces: &mut WindowSurfaces<P>,
    fb: framebuffer::Handle,
    flags: PageFlipFlags,
    double_buffer: bool,
) -> Result<Outcome, Error> {
    surfaces.settle_flip(&dev.device, output.crtc)?;

    if output.modeset_pending {
        set_crtc(&dev.device, output, fb)?;
        return Ok(Outcome::Shown);
    }

    dev.device.page_flip(output.crtc, fb, flags)?;
    trace!("Page flip queued");

    if !double_buffer {
        return Ok(Outcome::Queued);
    }
    match wait_for_flip(&dev.device, output.crtc) {
        Ok(()) => Ok(Outcome::Shown),
        Err(error) => Ok(Outcome::Pending(error)),
    }
}
