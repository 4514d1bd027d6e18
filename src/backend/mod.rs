//! Backend helpers
//!
//! The presentation core is generic over the three capabilities it consumes:
//!
//! - a mode-setting device ([`drm::KmsDevice`])
//! - a buffer allocator ([`allocator::BufferAllocator`])
//! - a gpu context ([`egl::GpuContext`])
//!
//! A [`Platform`] ties them together and tells the [`KmsDisplay`](drm::KmsDisplay)
//! how to bring them up whenever the device node has to be (re)opened.

pub mod allocator;
pub mod drm;
pub mod egl;

use self::allocator::BufferAllocator;
use self::drm::{Error, KmsDevice};
use self::egl::GpuContext;

/// Factory for the capabilities backing a [`KmsDisplay`](drm::KmsDisplay)
///
/// The display opens the device node lazily and drops everything created from it,
/// once no window needs it anymore. Objects are dropped in reverse creation order.
pub trait Platform {
    /// Mode-setting device
    type Device: KmsDevice;
    /// Buffer allocator created on top of the device
    type Allocator: BufferAllocator;
    /// Gpu context rendering into surfaces of the allocator
    type Gpu: GpuContext<<Self::Allocator as BufferAllocator>::Surface>;

    /// Opens the device node
    fn open_device(&mut self) -> Result<Self::Device, Error>;
    /// Creates a buffer allocator for an open device
    fn create_allocator(&mut self, device: &Self::Device) -> Result<Self::Allocator, Error>;
    /// Creates a gpu context for an allocator
    fn create_gpu_context(&mut self, allocator: &Self::Allocator) -> Result<Self::Gpu, Error>;
}
