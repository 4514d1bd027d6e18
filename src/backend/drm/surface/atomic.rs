use std::os::unix::io::{AsFd, OwnedFd};

use drm::control::{framebuffer, plane, AtomicCommitFlags};
use tracing::{instrument, trace, warn};

use super::{OpenDevice, Output, Viewport};
use crate::backend::drm::{
    present::Outcome, AtomicRequest, Error, KmsDevice, ModesetConfig, PlaneConfig,
};
use crate::backend::egl::GpuContext;
use crate::backend::Platform;

fn modeset(output: &Output) -> Option<ModesetConfig> {
    output.modeset_pending.then_some(ModesetConfig {
        connector: output.connector,
        crtc: output.crtc,
        mode: output.current_mode,
    })
}

fn flags(base: AtomicCommitFlags, modeset: &Option<ModesetConfig>) -> AtomicCommitFlags {
    if modeset.is_some() {
        base | AtomicCommitFlags::ALLOW_MODESET
    } else {
        base
    }
}

/// Commits `fb` on the primary plane and blocks until it is on screen
#[instrument(level = "trace", skip(dev, output))]
#[profiling::function]
pub(crate) fn commit_blocking<P: Platform>(
    dev: &OpenDevice<P>,
    output: &mut Output,
    plane: plane::Handle,
    viewport: Viewport,
    fb: framebuffer::Handle,
) -> Result<Outcome, Error> {
    let modeset = modeset(output);
    let request = AtomicRequest {
        plane: PlaneConfig {
            plane,
            crtc: output.crtc,
            framebuffer: fb,
            viewport,
            in_fence: None,
        },
        modeset,
        out_fence: false,
    };
    dev.device
        .atomic_commit(&request, flags(AtomicCommitFlags::empty(), &modeset))?;
    output.modeset_pending = false;
    Ok(Outcome::Shown)
}

/// Commits `fb` on the primary plane without blocking
///
/// The kernel waits for `in_fence` before scanning out and returns a fence signaling
/// the completion of the commit, which the gpu has to wait for before touching the
/// previous front buffer again.
#[instrument(level = "trace", skip(dev, output, in_fence))]
#[profiling::function]
pub(crate) fn commit_fenced<P: Platform>(
    dev: &mut OpenDevice<P>,
    output: &mut Output,
    plane: plane::Handle,
    viewport: Viewport,
    fb: framebuffer::Handle,
    in_fence: OwnedFd,
) -> Result<Outcome, Error> {
    // at most one commit in flight
    dev.retire_kms_fence();

    let modeset = modeset(output);
    let request = AtomicRequest {
        plane: PlaneConfig {
            plane,
            crtc: output.crtc,
            framebuffer: fb,
            viewport,
            in_fence: Some(in_fence.as_fd()),
        },
        modeset,
        out_fence: true,
    };
    let out_fence = dev
        .device
        .atomic_commit(&request, flags(AtomicCommitFlags::NONBLOCK, &modeset))?;
    drop(in_fence);
    output.modeset_pending = false;

    let Some(out_fence) = out_fence else {
        warn!(crtc = ?output.crtc, "Commit returned no out-fence");
        return Ok(Outcome::Unguarded(Error::MissingOutFence(output.crtc)));
    };

    let fence = match dev.gpu.import_fence(out_fence) {
        Ok(fence) => fence,
        Err(err) => {
            return Ok(Outcome::Unguarded(Error::Gpu {
                errmsg: "Failed to import kms fence",
                source: Box::new(err),
            }))
        }
    };
    if let Err(err) = dev.gpu.wait_fence(&fence) {
        dev.gpu.destroy_fence(fence);
        return Ok(Outcome::Unguarded(Error::Gpu {
            errmsg: "Failed to wait for kms fence",
            source: Box::new(err),
        }));
    }
    trace!("Fenced commit submitted");
    dev.kms_fence = Some(fence);
    Ok(Outcome::Shown)
}
