//! Selection of the display pipe driven by a [`KmsDisplay`](super::KmsDisplay)

use drm::control::{connector, crtc, encoder, framebuffer, plane, Mode};
use tracing::{debug, info, trace, warn};

use super::{ConnectorInfo, EncoderInfo, Error, KmsDevice, PlaneType};

/// Display pipe found on a device
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered {
    /// First connected connector advertising at least one mode
    pub connector: connector::Handle,
    /// Encoder driving the connector
    pub encoder: encoder::Handle,
    /// Crtc feeding the encoder
    pub crtc: crtc::Handle,
    /// Mode the crtc is programmed with, or the preferred mode of the connector
    pub mode: Mode,
    /// All modes advertised by the connector
    pub connector_modes: Vec<Mode>,
    /// Framebuffer scanned out before we touched the crtc
    pub original_framebuffer: Option<framebuffer::Handle>,
    /// Primary plane of the crtc, if the device exposes planes
    pub primary_plane: Option<plane::Handle>,
}

/// Finds a usable connector, encoder, crtc and mode on a device.
///
/// - The connector is the first connected one with at least one mode.
/// - The encoder is the one currently bound to the connector, or else the first one the
///   connector supports that can be loaded.
/// - The crtc is the one currently bound to the encoder, or else the first one the encoder
///   could drive.
/// - The mode is the current mode of the crtc, if it is valid, or else the first mode of the
///   connector.
pub fn discover<D: KmsDevice>(device: &D) -> Result<Discovered, Error> {
    let resources = device.resources()?;
    trace!(?resources, "Enumerated drm resources");

    let connector = resources
        .connectors
        .iter()
        .filter_map(|handle| match device.connector(*handle) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(?handle, "Failed to load connector: {}", err);
                None
            }
        })
        .find(ConnectorInfo::drives_display)
        .ok_or(Error::NoConnector)?;
    debug!(connector = ?connector.handle, modes = connector.modes.len(), "Found connected connector");

    let encoder = find_encoder(device, &connector)?;
    let crtc = encoder
        .crtc
        .or_else(|| {
            encoder
                .possible_crtcs
                .iter()
                .find(|crtc| resources.crtcs.contains(crtc))
                .copied()
        })
        .ok_or(Error::NoCrtc(encoder.handle))?;
    let crtc_info = device.crtc(crtc)?;

    let mode = match crtc_info.mode.filter(|mode| mode.size().0 != 0 && mode.size().1 != 0) {
        Some(mode) => mode,
        None => *connector
            .modes
            .first()
            .ok_or(Error::NoValidMode(connector.handle))?,
    };

    // the hardware cursor goes through the cursor ioctls, which pick the cursor plane themselves
    let primary_plane = match device.planes() {
        Ok(planes) => planes
            .iter()
            .find(|plane| plane.kind == PlaneType::Primary && plane.possible_crtcs.contains(&crtc))
            .map(|plane| plane.handle),
        Err(err) => {
            debug!("Unable to enumerate planes: {}", err);
            None
        }
    };

    info!(
        connector = ?connector.handle,
        encoder = ?encoder.handle,
        ?crtc,
        mode = ?mode.size(),
        ?primary_plane,
        "Selected display pipe"
    );

    Ok(Discovered {
        connector: connector.handle,
        encoder: encoder.handle,
        crtc,
        mode,
        connector_modes: connector.modes,
        original_framebuffer: crtc_info.framebuffer,
        primary_plane,
    })
}

fn find_encoder<D: KmsDevice>(device: &D, connector: &ConnectorInfo) -> Result<EncoderInfo, Error> {
    if let Some(current) = connector.current_encoder {
        match device.encoder(current) {
            Ok(info) => return Ok(info),
            Err(err) => debug!(encoder = ?current, "Bound encoder unavailable: {}", err),
        }
    }

    connector
        .encoders
        .iter()
        .find_map(|handle| device.encoder(*handle).ok())
        .ok_or(Error::NoEncoder(connector.handle))
}
