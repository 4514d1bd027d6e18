use std::sync::Arc;

use drm::control::crtc;
use tracing::trace;

use super::{Error, KmsDevice};
use crate::backend::allocator::CursorBuffer;

#[derive(Debug, PartialEq, Eq)]
struct CursorImage {
    width: u32,
    height: u32,
    hotspot: (i32, i32),
    // premultiplied argb8888
    pixels: Vec<u32>,
}

/// Hardware cursor image
///
/// Created through [`KmsDisplay::create_cursor`](super::KmsDisplay::create_cursor).
/// Clones refer to the same image.
#[derive(Debug, Clone)]
pub struct Cursor(Arc<CursorImage>);

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Cursor {}

impl Cursor {
    /// Creates a cursor from straight-alpha argb8888 pixels (`0xAARRGGBB`), row by row.
    pub(crate) fn new(
        pixels: &[u32],
        width: u32,
        height: u32,
        hotspot: (i32, i32),
        max_size: (u32, u32),
    ) -> Result<Cursor, Error> {
        let (max_width, max_height) = max_size;
        if max_width == 0 || max_height == 0 {
            return Err(Error::NoCursorSupport);
        }
        if width > max_width || height > max_height {
            return Err(Error::CursorTooLarge {
                width,
                height,
                max_width,
                max_height,
            });
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(Error::InvalidCursorImage {
                len: pixels.len(),
                expected,
            });
        }

        Ok(Cursor(Arc::new(CursorImage {
            width,
            height,
            hotspot,
            pixels: pixels.iter().copied().map(premultiply).collect(),
        })))
    }

    /// Size of the image
    pub fn size(&self) -> (u32, u32) {
        (self.0.width, self.0.height)
    }

    /// Hotspot of the image
    pub fn hotspot(&self) -> (i32, i32) {
        self.0.hotspot
    }

    /// Lays the image out for a buffer with the given stride (in bytes) and number of rows.
    ///
    /// The area not covered by the image stays transparent.
    fn pack(&self, stride: u32, rows: u32) -> Vec<u8> {
        let stride = stride as usize;
        let mut data = vec![0u8; stride * rows as usize];
        for (row, line) in self
            .0
            .pixels
            .chunks(self.0.width as usize)
            .take(rows as usize)
            .enumerate()
        {
            let start = row * stride;
            for (col, pixel) in line.iter().enumerate() {
                let offset = start + col * 4;
                if offset + 4 > start + stride {
                    break;
                }
                data[offset..offset + 4].copy_from_slice(&pixel.to_le_bytes());
            }
        }
        data
    }
}

fn premultiply(pixel: u32) -> u32 {
    let alpha = pixel >> 24;
    let channel = |shift: u32| (((pixel >> shift) & 0xff) * alpha + 127) / 255;
    (alpha << 24) | (channel(16) << 16) | (channel(8) << 8) | channel(0)
}

/// Uploads `cursor` into `buffer` and shows it on `crtc`
#[profiling::function]
pub(crate) fn upload<D, C>(device: &D, crtc: crtc::Handle, buffer: &mut C, cursor: &Cursor) -> Result<(), Error>
where
    D: KmsDevice,
    C: CursorBuffer,
{
    let (_, rows) = buffer.size();
    let data = cursor.pack(buffer.pitch(), rows);
    buffer.write(&data).map_err(|source| Error::Allocation {
        errmsg: "Failed to write cursor buffer",
        source,
    })?;

    let hotspot = Some(cursor.hotspot()).filter(|hotspot| *hotspot != (0, 0));
    trace!(?crtc, size = ?cursor.size(), ?hotspot, "Setting cursor image");
    device.set_cursor(crtc, Some(&*buffer), hotspot)
}

/// Removes the cursor from `crtc`
pub(crate) fn hide<D, C>(device: &D, crtc: crtc::Handle) -> Result<(), Error>
where
    D: KmsDevice,
    C: CursorBuffer,
{
    device.set_cursor::<C>(crtc, None, None)
}
