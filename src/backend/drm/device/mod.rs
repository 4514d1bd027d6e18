//! [`KmsDevice`] implementation on top of the `drm` crate

use std::io;
use std::os::unix::io::{AsFd, BorrowedFd, FromRawFd, OwnedFd};

use drm::buffer::Buffer as DrmBuffer;
use drm::control::{
    connector, crtc, encoder, framebuffer, plane, property, AtomicCommitFlags, Device as ControlDevice, Event,
    Mode, PageFlipFlags, PlaneType,
};
use drm::{ClientCapability, Device as BasicDevice, DriverCapability};
use tracing::{debug, info, info_span, instrument, trace, warn};

mod atomic;
mod fd;

pub use self::fd::DrmDeviceFd;
use self::atomic::{build_request, map_props, PropMapping};
use super::error::AccessError;
use super::{
    AtomicRequest, ConnectorInfo, CrtcInfo, EncoderInfo, Error, KmsDevice, KmsEvent, PlaneInfo, Resources,
};
use crate::backend::allocator::Fourcc;
use crate::utils::DevPath;

/// An open drm device
#[derive(Debug)]
pub struct DrmDevice {
    fd: DrmDeviceFd,
    atomic: bool,
    prop_mapping: PropMapping,
    span: tracing::Span,
}

impl AsFd for DrmDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// (depth, bpp) for `add_framebuffer`
fn depth_and_bpp(format: Fourcc) -> Option<(u32, u32)> {
    match format {
        Fourcc::Argb8888 | Fourcc::Abgr8888 => Some((32, 32)),
        Fourcc::Xrgb8888 | Fourcc::Xbgr8888 => Some((24, 32)),
        Fourcc::Rgb565 => Some((16, 16)),
        _ => None,
    }
}

impl DrmDevice {
    /// Create a new [`DrmDevice`] from an open drm node
    ///
    /// Universal planes are requested right away, the atomic api only through
    /// [`KmsDevice::enable_atomic`].
    pub fn new(fd: DrmDeviceFd) -> DrmDevice {
        let span = info_span!("drm", device = ?fd.dev_path());
        let _guard = span.enter();
        info!("DrmDevice initializing");

        if let Err(err) = fd.set_client_capability(ClientCapability::UniversalPlanes, true) {
            warn!("Unable to request universal planes: {}", err);
        }

        drop(_guard);
        DrmDevice {
            fd,
            atomic: false,
            prop_mapping: PropMapping::default(),
            span,
        }
    }

    /// Returns the underlying file descriptor
    pub fn device_fd(&self) -> &DrmDeviceFd {
        &self.fd
    }

    /// Returns if the atomic api is in use
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    fn access(&self, errmsg: &'static str) -> impl FnOnce(io::Error) -> Error + '_ {
        move |source| {
            Error::Access(AccessError {
                errmsg,
                dev: self.fd.dev_path(),
                source,
            })
        }
    }

    fn map_all_props(&self) -> Result<PropMapping, Error> {
        let resources = self
            .fd
            .resource_handles()
            .map_err(self.access("Error loading drm resources"))?;
        let planes = self.fd.plane_handles().map_err(self.access("Error loading planes"))?;

        let mut mapping = PropMapping::default();
        map_props(&self.fd, resources.connectors(), &mut mapping.connectors)?;
        map_props(&self.fd, resources.crtcs(), &mut mapping.crtcs)?;
        map_props(&self.fd, &planes, &mut mapping.planes)?;
        Ok(mapping)
    }

    fn plane_type(&self, plane: plane::Handle) -> Result<PlaneType, Error> {
        let props = self
            .fd
            .get_properties(plane)
            .map_err(self.access("Error reading plane properties"))?;
        let (ids, vals) = props.as_props_and_values();
        for (&id, &val) in ids.iter().zip(vals.iter()) {
            let info = self.fd.get_property(id).map_err(self.access("Error reading property"))?;
            if info.name().to_str().map(|x| x == "type").unwrap_or(false) {
                return Ok(match val as u32 {
                    x if x == PlaneType::Primary as u32 => PlaneType::Primary,
                    x if x == PlaneType::Cursor as u32 => PlaneType::Cursor,
                    _ => PlaneType::Overlay,
                });
            }
        }
        Err(Error::UnknownProperty {
            handle: plane.into(),
            name: "type",
        })
    }
}

impl KmsDevice for DrmDevice {
    fn enable_atomic(&mut self) -> bool {
        let _guard = self.span.enter();
        if self.atomic {
            return true;
        }
        if let Err(err) = self.fd.set_client_capability(ClientCapability::Atomic, true) {
            info!("Atomic api unavailable: {}", err);
            return false;
        }
        match self.map_all_props() {
            Ok(mapping) => {
                trace!("Mapping: {:#?}", mapping);
                self.prop_mapping = mapping;
                self.atomic = true;
                true
            }
            Err(err) => {
                warn!("Failed to map properties, falling back to legacy api: {}", err);
                false
            }
        }
    }

    fn supports_async_page_flip(&self) -> bool {
        self.fd
            .get_driver_capability(DriverCapability::ASyncPageFlip)
            .map(|cap| cap == 1)
            .unwrap_or(false)
    }

    fn cursor_size(&self) -> Result<(u32, u32), Error> {
        let width = self
            .fd
            .get_driver_capability(DriverCapability::CursorWidth)
            .map_err(self.access("Error querying cursor width"))?;
        let height = self
            .fd
            .get_driver_capability(DriverCapability::CursorHeight)
            .map_err(self.access("Error querying cursor height"))?;
        Ok((width as u32, height as u32))
    }

    fn resources(&self) -> Result<Resources, Error> {
        let handles = self
            .fd
            .resource_handles()
            .map_err(self.access("Error loading drm resources"))?;
        Ok(Resources {
            connectors: handles.connectors().to_vec(),
            encoders: handles.encoders().to_vec(),
            crtcs: handles.crtcs().to_vec(),
        })
    }

    fn connector(&self, handle: connector::Handle) -> Result<ConnectorInfo, Error> {
        let info = self
            .fd
            .get_connector(handle, false)
            .map_err(self.access("Error loading connector info"))?;
        Ok(ConnectorInfo {
            handle,
            connected: info.state() == connector::State::Connected,
            modes: info.modes().to_vec(),
            current_encoder: info.current_encoder(),
            encoders: info.encoders().to_vec(),
        })
    }

    fn encoder(&self, handle: encoder::Handle) -> Result<EncoderInfo, Error> {
        let info = self
            .fd
            .get_encoder(handle)
            .map_err(self.access("Error loading encoder info"))?;
        let resources = self
            .fd
            .resource_handles()
            .map_err(self.access("Error loading drm resources"))?;
        Ok(EncoderInfo {
            handle,
            crtc: info.crtc(),
            possible_crtcs: resources.filter_crtcs(info.possible_crtcs()),
        })
    }

    fn crtc(&self, handle: crtc::Handle) -> Result<CrtcInfo, Error> {
        let info = self
            .fd
            .get_crtc(handle)
            .map_err(self.access("Error loading crtc info"))?;
        Ok(CrtcInfo {
            handle,
            mode: info.mode(),
            framebuffer: info.framebuffer(),
        })
    }

    fn planes(&self) -> Result<Vec<PlaneInfo>, Error> {
        let resources = self
            .fd
            .resource_handles()
            .map_err(self.access("Error loading drm resources"))?;
        let planes = self.fd.plane_handles().map_err(self.access("Error loading planes"))?;
        planes
            .iter()
            .map(|handle| {
                let info = self
                    .fd
                    .get_plane(*handle)
                    .map_err(self.access("Error loading plane info"))?;
                Ok(PlaneInfo {
                    handle: *handle,
                    kind: self.plane_type(*handle)?,
                    possible_crtcs: resources.filter_crtcs(info.possible_crtcs()),
                })
            })
            .collect()
    }

    fn add_framebuffer<B: DrmBuffer + ?Sized>(&self, buffer: &B) -> Result<framebuffer::Handle, Error> {
        let (depth, bpp) = depth_and_bpp(buffer.format()).ok_or_else(|| Error::FramebufferExport {
            dev: self.fd.dev_path(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unsupported scanout format {:?}", buffer.format()),
            ),
        })?;
        self.fd
            .add_framebuffer(buffer, depth, bpp)
            .map_err(|source| Error::FramebufferExport {
                dev: self.fd.dev_path(),
                source,
            })
    }

    fn destroy_framebuffer(&self, framebuffer: framebuffer::Handle) -> Result<(), Error> {
        self.fd
            .destroy_framebuffer(framebuffer)
            .map_err(self.access("Error destroying framebuffer"))
    }

    #[instrument(level = "debug", parent = &self.span, skip(self))]
    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> Result<(), Error> {
        self.fd
            .set_crtc(crtc, framebuffer, (0, 0), connectors, mode)
            .map_err(self.access("Error setting crtc"))
    }

    #[instrument(level = "trace", parent = &self.span, skip(self))]
    fn page_flip(&self, crtc: crtc::Handle, framebuffer: framebuffer::Handle, flags: PageFlipFlags) -> Result<(), Error> {
        self.fd
            .page_flip(crtc, framebuffer, flags, None)
            .map_err(self.access("Failed to queue page flip"))
    }

    #[instrument(level = "trace", parent = &self.span, skip(self, request))]
    fn atomic_commit(&self, request: &AtomicRequest<'_>, flags: AtomicCommitFlags) -> Result<Option<OwnedFd>, Error> {
        let mode_blob = match request.modeset {
            Some(modeset) => Some(
                self.fd
                    .create_property_blob(&modeset.mode)
                    .map_err(self.access("Failed to create mode blob"))?,
            ),
            None => None,
        };
        let blob_id = match mode_blob {
            Some(property::Value::Blob(id)) => Some(id),
            _ => None,
        };

        let mut out_fence: i32 = -1;
        let result = build_request(&self.prop_mapping, request, mode_blob, &mut out_fence).and_then(|req| {
            self.fd
                .atomic_commit(flags, req)
                .map_err(self.access("Atomic commit failed"))
        });

        if let Some(blob) = blob_id {
            if let Err(err) = self.fd.destroy_property_blob(blob) {
                debug!("Failed to destroy mode blob: {}", err);
            }
        }
        result?;

        if request.out_fence && out_fence >= 0 {
            // SAFETY: the kernel handed us a new fence descriptor
            Ok(Some(unsafe { OwnedFd::from_raw_fd(out_fence) }))
        } else {
            Ok(None)
        }
    }

    fn receive_events(&self) -> Result<Vec<KmsEvent>, Error> {
        let events = self
            .fd
            .receive_events()
            .map_err(self.access("Error processing drm events"))?;
        Ok(events
            .map(|event| match event {
                Event::PageFlip(event) => KmsEvent::PageFlip {
                    crtc: event.crtc,
                    frame: event.frame,
                    duration: event.duration,
                },
                Event::Vblank(event) => KmsEvent::Vblank {
                    crtc: event.crtc,
                    frame: event.frame,
                },
                Event::Unknown(event) => {
                    trace!(len = event.len(), "Got unknown drm event");
                    KmsEvent::Unknown
                }
            })
            .collect())
    }

    #[allow(deprecated)]
    fn set_cursor<B: DrmBuffer + ?Sized>(
        &self,
        crtc: crtc::Handle,
        buffer: Option<&B>,
        hotspot: Option<(i32, i32)>,
    ) -> Result<(), Error> {
        match hotspot {
            Some(hotspot) => self.fd.set_cursor2(crtc, buffer, hotspot),
            None => self.fd.set_cursor(crtc, buffer),
        }
        .map_err(self.access("Failed to set cursor"))
    }

    #[allow(deprecated)]
    fn move_cursor(&self, crtc: crtc::Handle, position: (i32, i32)) -> Result<(), Error> {
        self.fd
            .move_cursor(crtc, position)
            .map_err(self.access("Failed to move cursor"))
    }
}
