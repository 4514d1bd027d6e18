use std::collections::HashMap;
use std::os::unix::io::AsRawFd;

use drm::control::atomic::AtomicModeReq;
use drm::control::{connector, crtc, plane, property, Device as ControlDevice, ResourceHandle};

use crate::backend::drm::error::{AccessError, Error};
use crate::backend::drm::AtomicRequest;
use crate::utils::DevPath;

/// Property name to handle lookup for every object touched by our commits
#[derive(Clone, Debug, Default)]
pub struct PropMapping {
    pub connectors: HashMap<connector::Handle, HashMap<String, property::Handle>>,
    pub crtcs: HashMap<crtc::Handle, HashMap<String, property::Handle>>,
    pub planes: HashMap<plane::Handle, HashMap<String, property::Handle>>,
}

fn lookup<T: ResourceHandle + Eq + std::hash::Hash>(
    mapping: &HashMap<T, HashMap<String, property::Handle>>,
    handle: T,
    name: &'static str,
) -> Result<property::Handle, Error> {
    mapping
        .get(&handle)
        .and_then(|props| props.get(name))
        .copied()
        .ok_or_else(|| Error::UnknownProperty {
            handle: handle.into(),
            name,
        })
}

impl PropMapping {
    pub(crate) fn conn_prop_handle(
        &self,
        handle: connector::Handle,
        name: &'static str,
    ) -> Result<property::Handle, Error> {
        lookup(&self.connectors, handle, name)
    }

    pub(crate) fn crtc_prop_handle(&self, handle: crtc::Handle, name: &'static str) -> Result<property::Handle, Error> {
        lookup(&self.crtcs, handle, name)
    }

    pub(crate) fn plane_prop_handle(
        &self,
        handle: plane::Handle,
        name: &'static str,
    ) -> Result<property::Handle, Error> {
        lookup(&self.planes, handle, name)
    }
}

/// Create a mapping of property names and handles for given handles of a given drm resource type.
pub(super) fn map_props<D, T>(
    fd: &D,
    handles: &[T],
    mapping: &mut HashMap<T, HashMap<String, property::Handle>>,
) -> Result<(), Error>
where
    D: DevPath + ControlDevice,
    T: ResourceHandle + Eq + std::hash::Hash,
{
    handles
        .iter()
        .map(|x| (x, fd.get_properties(*x)))
        .try_for_each(|(handle, props)| {
            let mut map = HashMap::new();
            match props {
                Ok(props) => {
                    let (prop_handles, _) = props.as_props_and_values();
                    for prop in prop_handles {
                        if let Ok(info) = fd.get_property(*prop) {
                            let name = info.name().to_string_lossy().into_owned();
                            map.insert(name, *prop);
                        }
                    }
                    mapping.insert(*handle, map);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
        .map_err(|source| {
            Error::Access(AccessError {
                errmsg: "Error reading properties",
                dev: fd.dev_path(),
                source,
            })
        })
}

// 16.16 fixed point
fn to_fixed(n: f64) -> u64 {
    f64::round(n * (1 << 16) as f64) as u64
}

/// Translates a request into property updates
///
/// `mode_blob` has to hold the mode of `request.modeset`, if there is one.
/// With `request.out_fence` set the kernel writes the out-fence descriptor to `out_fence`,
/// which therefore has to stay alive until the commit returned.
pub(super) fn build_request(
    mapping: &PropMapping,
    request: &AtomicRequest<'_>,
    mode_blob: Option<property::Value<'static>>,
    out_fence: &mut i32,
) -> Result<AtomicModeReq, Error> {
    let mut req = AtomicModeReq::new();
    let plane = &request.plane;
    let handle = plane.plane;
    let src = plane.viewport.src.to_f64();
    let dst = plane.viewport.dst;

    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "CRTC_ID")?,
        property::Value::CRTC(Some(plane.crtc)),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "FB_ID")?,
        property::Value::Framebuffer(Some(plane.framebuffer)),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "SRC_X")?,
        property::Value::UnsignedRange(to_fixed(src.loc.x)),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "SRC_Y")?,
        property::Value::UnsignedRange(to_fixed(src.loc.y)),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "SRC_W")?,
        property::Value::UnsignedRange(to_fixed(src.size.w)),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "SRC_H")?,
        property::Value::UnsignedRange(to_fixed(src.size.h)),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "CRTC_X")?,
        property::Value::SignedRange(dst.loc.x as i64),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "CRTC_Y")?,
        property::Value::SignedRange(dst.loc.y as i64),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "CRTC_W")?,
        property::Value::UnsignedRange(dst.size.w as u64),
    );
    req.add_property(
        handle,
        mapping.plane_prop_handle(handle, "CRTC_H")?,
        property::Value::UnsignedRange(dst.size.h as u64),
    );
    if let Some(fence) = plane.in_fence {
        req.add_property(
            handle,
            mapping.plane_prop_handle(handle, "IN_FENCE_FD")?,
            property::Value::SignedRange(fence.as_raw_fd() as i64),
        );
    }

    if let Some(modeset) = request.modeset {
        let Some(blob) = mode_blob else {
            return Err(Error::UnknownProperty {
                handle: modeset.crtc.into(),
                name: "MODE_ID",
            });
        };
        req.add_property(
            modeset.connector,
            mapping.conn_prop_handle(modeset.connector, "CRTC_ID")?,
            property::Value::CRTC(Some(modeset.crtc)),
        );
        req.add_property(
            modeset.crtc,
            mapping.crtc_prop_handle(modeset.crtc, "MODE_ID")?,
            blob,
        );
        req.add_property(
            modeset.crtc,
            mapping.crtc_prop_handle(modeset.crtc, "ACTIVE")?,
            property::Value::Boolean(true),
        );
    }

    if request.out_fence {
        *out_fence = -1;
        req.add_property(
            plane.crtc,
            mapping.crtc_prop_handle(plane.crtc, "OUT_FENCE_PTR")?,
            property::Value::UnsignedRange(out_fence as *mut i32 as u64),
        );
    }

    Ok(req)
}
