use drm::control::framebuffer;
use indexmap::IndexMap;
use tracing::{trace, warn};

use super::{Error, KmsDevice};
use crate::backend::allocator::{AllocatedBuffer, BufferId};

/// Side table exporting every buffer exactly once as a framebuffer
///
/// Framebuffers are removed again, once the allocator reports their buffer as freed.
#[derive(Debug, Default)]
pub struct FramebufferCache {
    framebuffers: IndexMap<BufferId, framebuffer::Handle>,
}

impl FramebufferCache {
    /// Returns the framebuffer of `buffer`, exporting it on first use
    #[profiling::function]
    pub fn framebuffer_for<D, B>(&mut self, device: &D, buffer: &B) -> Result<framebuffer::Handle, Error>
    where
        D: KmsDevice,
        B: AllocatedBuffer,
    {
        let id = buffer.id();
        if let Some(fb) = self.framebuffers.get(&id) {
            return Ok(*fb);
        }

        let fb = device.add_framebuffer(buffer)?;
        trace!(buffer = ?id, ?fb, "Exported buffer as framebuffer");
        self.framebuffers.insert(id, fb);
        Ok(fb)
    }

    /// Removes the framebuffers of all freed buffers
    pub fn reap<D: KmsDevice>(&mut self, device: &D, freed: impl IntoIterator<Item = BufferId>) {
        for id in freed {
            if let Some(fb) = self.framebuffers.shift_remove(&id) {
                trace!(buffer = ?id, ?fb, "Buffer freed, removing framebuffer");
                if let Err(err) = device.destroy_framebuffer(fb) {
                    warn!(?fb, "Failed to remove framebuffer: {}", err);
                }
            }
        }
    }

    /// Removes every remaining framebuffer
    pub fn clear<D: KmsDevice>(&mut self, device: &D) {
        for (_, fb) in self.framebuffers.drain(..) {
            if let Err(err) = device.destroy_framebuffer(fb) {
                warn!(?fb, "Failed to remove framebuffer: {}", err);
            }
        }
    }

    /// Number of live framebuffers
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    /// Returns if no framebuffer is alive
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}
