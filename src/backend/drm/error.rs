use drm::control::{connector, crtc, encoder, RawResourceHandle};
use std::{io, path::PathBuf};

use super::WindowId;

/// Errors thrown by the [`KmsDisplay`](super::KmsDisplay) and the devices backing it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device encountered an access error
    #[error(transparent)]
    Access(#[from] AccessError),
    /// No connector is connected or none of the connected ones advertises a mode
    #[error("No currently active connector found")]
    NoConnector,
    /// Neither the bound encoder nor any supported one could be loaded
    #[error("No encoder found for connector `{0:?}`")]
    NoEncoder(connector::Handle),
    /// The encoder is not bound and cannot drive any crtc
    #[error("No crtc found for encoder `{0:?}`")]
    NoCrtc(encoder::Handle),
    /// Neither the crtc nor the connector provide a usable mode
    #[error("Couldn't get a valid mode for connector `{0:?}`")]
    NoValidMode(connector::Handle),
    /// The device is missing a required property
    #[error("The DrmDevice is missing a required property '{name}' for handle ({handle:?})")]
    UnknownProperty {
        /// Property handle
        handle: RawResourceHandle,
        /// Property name
        name: &'static str,
    },
    /// The buffer allocator failed to provide a buffer or surface
    #[error("Buffer allocation failed: {errmsg}")]
    Allocation {
        /// Error message associated to the failure
        errmsg: &'static str,
        /// Underlying allocator error
        #[source]
        source: io::Error,
    },
    /// The kernel refused to create a framebuffer for a buffer
    #[error("Failed to export buffer as framebuffer on device `{dev:?}`")]
    FramebufferExport {
        /// Device on which the error was generated
        dev: Option<PathBuf>,
        /// Underlying device error
        #[source]
        source: io::Error,
    },
    /// Waiting for a page flip failed
    #[error("Failed to wait for page flip on crtc `{crtc:?}`")]
    FlipWait {
        /// Crtc the flip was queued on
        crtc: crtc::Handle,
        /// Underlying poll or event error
        #[source]
        source: io::Error,
    },
    /// The gpu context rejected an operation
    #[error("GPU context error: {errmsg}")]
    Gpu {
        /// Error message associated to the failure
        errmsg: &'static str,
        /// Underlying context error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A fenced commit succeeded without handing back an out-fence
    #[error("Atomic commit on crtc `{0:?}` returned no out-fence")]
    MissingOutFence(crtc::Handle),
    /// Only swap intervals of 0 and 1 can be expressed with page flips
    #[error("Only swap intervals of 0 or 1 are supported, got {0}")]
    InvalidSwapInterval(i32),
    /// Cursor image does not fit into the hardware cursor
    #[error("Cursor image of {width}x{height} exceeds the hardware cursor size {max_width}x{max_height}")]
    CursorTooLarge {
        /// Width of the image
        width: u32,
        /// Height of the image
        height: u32,
        /// Maximum cursor width of the device
        max_width: u32,
        /// Maximum cursor height of the device
        max_height: u32,
    },
    /// Pixel data does not match the given cursor dimensions
    #[error("Cursor pixel data has {len} pixels, expected {expected}")]
    InvalidCursorImage {
        /// Number of pixels provided
        len: usize,
        /// Number of pixels required by the dimensions
        expected: usize,
    },
    /// The allocator cannot create cursor buffers of the required format
    #[error("Unsupported pixel format for cursor")]
    UnsupportedCursorFormat,
    /// The device reports a zero cursor size
    #[error("The device does not support hardware cursors")]
    NoCursorSupport,
    /// The device is closed, because no window is using it
    #[error("Device is currently closed, operation rejected")]
    DeviceInactive,
    /// The window is not known to this display
    #[error("Unknown window {0:?}")]
    UnknownWindow(WindowId),
}

impl Error {
    /// Returns whether the failure only affected the current operation.
    ///
    /// A failed [`present`](super::KmsDisplay::present) with a recoverable error leaves the
    /// previous frame on screen and the window ready for the next one.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Access(_)
                | Error::Allocation { .. }
                | Error::FramebufferExport { .. }
                | Error::FlipWait { .. }
                | Error::Gpu { .. }
                | Error::MissingOutFence(_)
        )
    }
}

/// DRM access error
#[derive(Debug, thiserror::Error)]
#[error("DRM access error: {errmsg} on device `{dev:?}` ({source:})")]
pub struct AccessError {
    /// Error message associated to the access error
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    #[source]
    pub source: io::Error,
}
