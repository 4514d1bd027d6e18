//! Device node backed [`Platform`]

use std::{
    fmt, io,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use rustix::fs::{Mode, OFlags};
use tracing::{debug, info, warn};

use super::{AccessError, DrmDevice, DrmDeviceFd, Error, KmsDevice};
use crate::backend::allocator::gbm::{GbmBufferAllocator, GbmBufferSurface};
use crate::backend::egl::GpuContext;
use crate::backend::Platform;
use crate::utils::DeviceFd;

const DRI_DIR: &str = "/dev/dri";
const DEVICE_OVERRIDE: &str = "SMITHAY_DRM_DEVICE";

/// [`Platform`] driving a drm device node through gbm
///
/// The gpu context is created by a caller-supplied factory, which receives the
/// [`GbmBufferAllocator`] to create its display from.
pub struct DrmNode<G, F> {
    path: PathBuf,
    gpu_factory: F,
    _gpu: PhantomData<fn() -> G>,
}

impl<G, F> fmt::Debug for DrmNode<G, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmNode").field("path", &self.path).finish_non_exhaustive()
    }
}

impl<G, F> DrmNode<G, F>
where
    G: GpuContext<GbmBufferSurface>,
    F: FnMut(&GbmBufferAllocator) -> Result<G, Error>,
{
    /// Creates a platform for the device node at `path`
    pub fn new(path: impl Into<PathBuf>, gpu_factory: F) -> Self {
        DrmNode {
            path: path.into(),
            gpu_factory,
            _gpu: PhantomData,
        }
    }

    /// Creates a platform for the node returned by [`find_kms_node`]
    pub fn find(gpu_factory: F) -> Result<Self, Error> {
        find_kms_node().map(|path| DrmNode::new(path, gpu_factory))
    }

    /// Path of the device node
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<G, F> Platform for DrmNode<G, F>
where
    G: GpuContext<GbmBufferSurface>,
    F: FnMut(&GbmBufferAllocator) -> Result<G, Error>,
{
    type Device = DrmDevice;
    type Allocator = GbmBufferAllocator;
    type Gpu = G;

    fn open_device(&mut self) -> Result<DrmDevice, Error> {
        open_node(&self.path).map(DrmDevice::new)
    }

    fn create_allocator(&mut self, device: &DrmDevice) -> Result<GbmBufferAllocator, Error> {
        GbmBufferAllocator::new(device.device_fd().clone()).map_err(|source| Error::Allocation {
            errmsg: "Failed to create gbm device",
            source,
        })
    }

    fn create_gpu_context(&mut self, allocator: &GbmBufferAllocator) -> Result<G, Error> {
        (self.gpu_factory)(allocator)
    }
}

fn open_node(path: &Path) -> Result<DrmDeviceFd, Error> {
    let fd = rustix::fs::open(
        path,
        OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY | OFlags::NONBLOCK,
        Mode::empty(),
    )
    .map_err(|errno| {
        Error::Access(AccessError {
            errmsg: "Failed to open device node",
            dev: Some(path.to_path_buf()),
            source: io::Error::from(errno),
        })
    })?;
    Ok(DrmDeviceFd::new(DeviceFd::from(fd)))
}

fn card_index(name: &str) -> Option<u32> {
    name.strip_prefix("card")?.parse().ok()
}

fn card_nodes(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut nodes = std::fs::read_dir(dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let index = card_index(entry.file_name().to_str()?)?;
            Some((index, entry.path()))
        })
        .collect::<Vec<_>>();
    nodes.sort_by_key(|(index, _)| *index);
    Ok(nodes.into_iter().map(|(_, path)| path).collect())
}

fn is_kms_capable(path: &Path) -> bool {
    match open_node(path) {
        Ok(fd) => drives_display(&DrmDevice::new(fd), path),
        Err(err) => {
            debug!(?path, "Skipping node: {}", err);
            false
        }
    }
}

fn drives_display<D: KmsDevice>(device: &D, path: &Path) -> bool {
    let res = match device.resources() {
        Ok(res) => res,
        Err(err) => {
            debug!(?path, "Skipping node without resources: {}", err);
            return false;
        }
    };
    if res.encoders.is_empty() || res.crtcs.is_empty() {
        debug!(?path, "Skipping node without encoders or crtcs");
        return false;
    }
    let found = res.connectors.iter().any(|handle| match device.connector(*handle) {
        Ok(info) => info.drives_display(),
        Err(err) => {
            debug!(?path, ?handle, "Failed to load connector: {}", err);
            false
        }
    });
    if !found {
        debug!(?path, "Skipping node without a connected display");
    }
    found
}

/// Returns the first primary node of `/dev/dri` able to drive a display
///
/// A node qualifies if it exposes at least one encoder and crtc, and a connected connector
/// advertising at least one mode.
/// The `SMITHAY_DRM_DEVICE` environment variable overrides the search.
pub fn find_kms_node() -> Result<PathBuf, Error> {
    if let Some(path) = std::env::var_os(DEVICE_OVERRIDE) {
        let path = PathBuf::from(path);
        info!(?path, "Using device node from {}", DEVICE_OVERRIDE);
        return Ok(path);
    }

    let nodes = card_nodes(Path::new(DRI_DIR)).map_err(|source| {
        Error::Access(AccessError {
            errmsg: "Failed to list device nodes",
            dev: Some(PathBuf::from(DRI_DIR)),
            source,
        })
    })?;
    match nodes.into_iter().find(|path| is_kms_capable(path)) {
        Some(path) => {
            info!(?path, "Found kms capable device node");
            Ok(path)
        }
        None => {
            warn!("No kms capable device node found");
            Err(Error::NoConnector)
        }
    }
}
