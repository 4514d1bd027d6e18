//! Drm/Kms presentation
//!
//! This module drives a single display pipe (connector, encoder and crtc) of a drm device
//! and puts frames rendered by a gpu onto it, without any windowing system in between.
//!
//! The entry point is [`KmsDisplay`], created from a [`Platform`](crate::backend::Platform)
//! that knows how to open the device node, how to create a [`BufferAllocator`] on top of it
//! and how to bring up a [`GpuContext`] for that allocator.
//!
//! ## Device ownership
//!
//! The device node is only kept open while at least one window exists.
//! [`KmsDisplay::new`] opens it once to discover the display pipe and closes it again,
//! so other consumers of the same node (e.g. a vulkan swapchain) may use it in the meantime.
//!
//! ## Presentation strategies
//!
//! Every window picks one of three ways to present its frames on its first
//! [`present`](KmsDisplay::present) call and keeps it for its lifetime:
//!
//! - [`Strategy::Legacy`] queues page flips through the legacy api and waits for their completion
//!   on the device file descriptor.
//! - [`Strategy::DoubleBufferedAtomic`] issues blocking atomic commits.
//! - [`Strategy::FencedAtomic`] hands the rendering fence to the kernel and the kernel's out-fence
//!   back to the gpu, so neither side has to block the cpu.
//!
//! The very first frame of every window is always put on screen with a legacy `set_crtc` call,
//! which establishes the crtc, connector and mode binding later commits build upon.
//!
//! ```rust,ignore
//! use smithay_kms_present::backend::drm::{KmsDisplay, PresentConfig};
//!
//! let mut display = KmsDisplay::new(platform, PresentConfig::from_env())?;
//! let window = display.create_window((1280, 720), false)?;
//! loop {
//!     // ... render into the current gpu surface ...
//!     display.present(window)?;
//! }
//! ```
//!
//! [`BufferAllocator`]: crate::backend::allocator::BufferAllocator
//! [`GpuContext`]: crate::backend::egl::GpuContext

use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use drm::buffer::Buffer as DrmBuffer;
use drm::control::{connector, crtc, encoder, framebuffer, plane, AtomicCommitFlags, Mode, PageFlipFlags};

mod config;
pub(crate) mod cursor;
pub mod device;
pub(crate) mod discovery;
mod display;
mod error;
pub(crate) mod flip;
pub(crate) mod framebuffer_cache;
#[cfg(feature = "backend_gbm")]
mod node;
pub(crate) mod present;
pub(crate) mod surface;

#[cfg(test)]
pub(crate) mod test_utils;

pub use self::config::{PresentConfig, SwapInterval};
pub use self::cursor::Cursor;
pub use self::device::{DrmDevice, DrmDeviceFd};
pub use self::discovery::{discover, Discovered};
pub use self::display::{KmsDisplay, WindowId};
pub use self::error::{AccessError, Error};
#[cfg(feature = "backend_gbm")]
pub use self::node::{find_kms_node, DrmNode};
pub use self::present::Strategy;
pub use self::surface::Viewport;

pub use drm::control::PlaneType;

/// Resource handles of a drm device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// Connectors in kernel order
    pub connectors: Vec<connector::Handle>,
    /// Encoders in kernel order
    pub encoders: Vec<encoder::Handle>,
    /// Crtcs in kernel order
    pub crtcs: Vec<crtc::Handle>,
}

/// State of a connector
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorInfo {
    /// Handle of the connector
    pub handle: connector::Handle,
    /// Whether a sink is attached
    pub connected: bool,
    /// Modes advertised by the sink, preferred mode first
    pub modes: Vec<Mode>,
    /// Encoder currently driving the connector
    pub current_encoder: Option<encoder::Handle>,
    /// Encoders able to drive the connector
    pub encoders: Vec<encoder::Handle>,
}

impl ConnectorInfo {
    /// Whether a sink is attached that advertises at least one mode
    pub fn drives_display(&self) -> bool {
        self.connected && !self.modes.is_empty()
    }
}

/// State of an encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// Handle of the encoder
    pub handle: encoder::Handle,
    /// Crtc currently feeding the encoder
    pub crtc: Option<crtc::Handle>,
    /// Crtcs able to feed the encoder, in kernel order
    pub possible_crtcs: Vec<crtc::Handle>,
}

/// State of a crtc
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrtcInfo {
    /// Handle of the crtc
    pub handle: crtc::Handle,
    /// Currently programmed mode
    pub mode: Option<Mode>,
    /// Currently scanned out framebuffer
    pub framebuffer: Option<framebuffer::Handle>,
}

/// State of a plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Handle of the plane
    pub handle: plane::Handle,
    /// Type of the plane
    pub kind: PlaneType,
    /// Crtcs the plane may be attached to
    pub possible_crtcs: Vec<crtc::Handle>,
}

/// Events read from a device file descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsEvent {
    /// A queued page flip was completed
    PageFlip {
        /// Crtc the flip was queued on, used to correlate it with the request
        crtc: crtc::Handle,
        /// Frame counter at completion
        frame: u32,
        /// Timestamp of the completion
        duration: Duration,
    },
    /// A vblank happened
    Vblank {
        /// Crtc the vblank belongs to
        crtc: crtc::Handle,
        /// Frame counter of the vblank
        frame: u32,
    },
    /// Any other event
    Unknown,
}

/// Configuration of the scanout plane for an atomic commit
#[derive(Debug, Clone, Copy)]
pub struct PlaneConfig<'a> {
    /// Plane to update
    pub plane: plane::Handle,
    /// Crtc the plane is attached to
    pub crtc: crtc::Handle,
    /// Framebuffer to scan out
    pub framebuffer: framebuffer::Handle,
    /// Viewport of the framebuffer and its placement on the crtc
    pub viewport: Viewport,
    /// Fence the kernel has to wait for before scanning out the framebuffer
    pub in_fence: Option<BorrowedFd<'a>>,
}

/// Mode change to be included in an atomic commit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModesetConfig {
    /// Connector to bind to the crtc
    pub connector: connector::Handle,
    /// Crtc to program
    pub crtc: crtc::Handle,
    /// New mode of the crtc
    pub mode: Mode,
}

/// A single atomic transaction
#[derive(Debug, Clone, Copy)]
pub struct AtomicRequest<'a> {
    /// Scanout plane update
    pub plane: PlaneConfig<'a>,
    /// Pending mode change, if any
    pub modeset: Option<ModesetConfig>,
    /// Whether the kernel should return a fence signaling the completion of the commit
    pub out_fence: bool,
}

/// Mode-setting capabilities consumed by the presentation core.
///
/// Implemented by [`DrmDevice`] for real drm nodes.
pub trait KmsDevice: AsFd {
    /// Tries to switch the device to the atomic interface, returning if it is usable
    fn enable_atomic(&mut self) -> bool;
    /// Returns if the device accepts asynchronous (tearing) page flips
    fn supports_async_page_flip(&self) -> bool;
    /// Returns the maximum hardware cursor size
    fn cursor_size(&self) -> Result<(u32, u32), Error>;

    /// Lists the mode-setting resources of the device
    fn resources(&self) -> Result<Resources, Error>;
    /// Loads the state of a connector
    fn connector(&self, handle: connector::Handle) -> Result<ConnectorInfo, Error>;
    /// Loads the state of an encoder
    fn encoder(&self, handle: encoder::Handle) -> Result<EncoderInfo, Error>;
    /// Loads the state of a crtc
    fn crtc(&self, handle: crtc::Handle) -> Result<CrtcInfo, Error>;
    /// Lists all planes of the device
    fn planes(&self) -> Result<Vec<PlaneInfo>, Error>;

    /// Exports a buffer as a framebuffer
    fn add_framebuffer<B: DrmBuffer + ?Sized>(&self, buffer: &B) -> Result<framebuffer::Handle, Error>;
    /// Removes a framebuffer again
    fn destroy_framebuffer(&self, framebuffer: framebuffer::Handle) -> Result<(), Error>;

    /// Programs a crtc synchronously through the legacy api
    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> Result<(), Error>;
    /// Queues a page flip through the legacy api
    fn page_flip(
        &self,
        crtc: crtc::Handle,
        framebuffer: framebuffer::Handle,
        flags: PageFlipFlags,
    ) -> Result<(), Error>;
    /// Commits an atomic transaction, returning the out-fence if one was requested
    fn atomic_commit(
        &self,
        request: &AtomicRequest<'_>,
        flags: AtomicCommitFlags,
    ) -> Result<Option<OwnedFd>, Error>;
    /// Reads and decodes all pending events of the device
    fn receive_events(&self) -> Result<Vec<KmsEvent>, Error>;

    /// Sets or clears the hardware cursor image of a crtc
    ///
    /// A `hotspot` selects the hotspot-aware variant of the call.
    fn set_cursor<B: DrmBuffer + ?Sized>(
        &self,
        crtc: crtc::Handle,
        buffer: Option<&B>,
        hotspot: Option<(i32, i32)>,
    ) -> Result<(), Error>;
    /// Moves the hardware cursor of a crtc
    fn move_cursor(&self, crtc: crtc::Handle, position: (i32, i32)) -> Result<(), Error>;
}
