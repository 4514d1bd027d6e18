//! Scripted stand-ins for the device, allocator and gpu used by the tests of this module.
//!
//! All mocks share one [`MockState`] which holds the scripted device topology, failure switches
//! and a log of every call made through the capability traits.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drm::buffer::Buffer as DrmBuffer;
use drm::control::{
    connector, crtc, encoder, framebuffer, AtomicCommitFlags, Mode, PageFlipFlags, RawResourceHandle,
};

use super::{
    AccessError, AtomicRequest, ConnectorInfo, CrtcInfo, EncoderInfo, Error, KmsDevice, KmsEvent,
    PlaneInfo, PlaneType, Resources, Viewport,
};
use crate::backend::allocator::{
    AllocatedBuffer, AllocatorSurface, BufferAllocator, BufferId, BufferUsage, CursorBuffer, Fourcc,
};
use crate::backend::egl::{GpuCapabilities, GpuContext};
use crate::backend::Platform;

/// Creates a handle from its raw value
pub fn handle<T: From<RawResourceHandle>>(raw: u32) -> T {
    drm::control::from_u32(raw).unwrap()
}

/// Creates a mode of the given size
pub fn mode(width: u16, height: u16) -> Mode {
    Mode::from(drm_ffi::drm_mode_modeinfo {
        hdisplay: width,
        vdisplay: height,
        vrefresh: 60,
        ..unsafe { std::mem::zeroed() }
    })
}

fn busy(errmsg: &'static str) -> Error {
    Error::Access(AccessError {
        errmsg,
        dev: None,
        source: io::Error::from_raw_os_error(libc::EBUSY),
    })
}

fn invalid(errmsg: &'static str) -> Error {
    Error::Access(AccessError {
        errmsg,
        dev: None,
        source: io::Error::from_raw_os_error(libc::EINVAL),
    })
}

fn null_fd() -> OwnedFd {
    File::open("/dev/null").unwrap().into()
}

/// Recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    OpenDevice,
    CloseDevice,
    AddFramebuffer {
        buffer: u32,
        fb: framebuffer::Handle,
    },
    DestroyFramebuffer(framebuffer::Handle),
    SetCrtc {
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        connectors: Vec<connector::Handle>,
        mode: Option<Mode>,
    },
    PageFlip {
        crtc: crtc::Handle,
        fb: framebuffer::Handle,
        flags: PageFlipFlags,
    },
    FlipRejected(crtc::Handle),
    FlipCompleted(crtc::Handle),
    AtomicCommit {
        fb: framebuffer::Handle,
        flags: AtomicCommitFlags,
        in_fence: bool,
        out_fence: bool,
        modeset: Option<Mode>,
        viewport: Viewport,
    },
    SetCursor {
        crtc: crtc::Handle,
        buffer: Option<u32>,
        hotspot: Option<(i32, i32)>,
    },
    MoveCursor {
        crtc: crtc::Handle,
        position: (i32, i32),
    },
    CreateSurface {
        surface: u64,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferUsage,
    },
    DestroySurface {
        surface: u64,
        locked: usize,
    },
    LockBuffer(BufferId),
    ReleaseBuffer(BufferId),
    CreateCursorBuffer {
        width: u32,
        height: u32,
        usage: BufferUsage,
    },
    WriteCursor {
        len: usize,
    },
    GpuCreateSurface(u64),
    GpuDestroySurface(u64),
    MakeCurrent(Option<u64>),
    SwapBuffers(u64),
    CreateFence(u64),
    ExportFence(u64),
    ImportFence(u64),
    WaitFence(u64),
    ClientWaitFence(u64),
    DestroyFence(u64),
}

/// Scripted device topology, failure switches and call log
#[derive(Debug)]
pub struct MockState {
    pub ops: Vec<Op>,

    pub connector_connected: bool,
    pub connector_modes: Vec<Mode>,
    pub connector_current_encoder: Option<encoder::Handle>,
    pub connector_encoders: Vec<encoder::Handle>,
    pub encoder_crtc: Option<crtc::Handle>,
    pub encoder_possible_crtcs: Vec<crtc::Handle>,
    pub crtc_mode: Option<Mode>,
    pub planes: Vec<PlaneInfo>,
    pub planes_unsupported: bool,

    pub atomic: bool,
    pub async_flip: bool,
    pub cursor_size: (u32, u32),
    pub native_fences: bool,
    pub cursor_format_supported: bool,

    pub fail_open: bool,
    pub fail_set_crtc: bool,
    pub fail_page_flip: bool,
    pub fail_commit: bool,
    pub fail_add_framebuffer: bool,
    pub fail_lock: bool,
    pub fail_gpu_surface: bool,
    pub fail_create_fence: bool,
    pub omit_out_fence: bool,
    /// Events delivered ahead of every page flip completion
    pub noise_events: Vec<KmsEvent>,

    pub pending_flips: Vec<crtc::Handle>,
    pub events: VecDeque<KmsEvent>,
    pub live_framebuffers: HashMap<framebuffer::Handle, u32>,
    pub live_buffers: Vec<BufferId>,
    pub freed: Vec<BufferId>,
    pub live_fences: Vec<u64>,
    pub cursor_data: Vec<u8>,
    pub open_devices: usize,

    next_fb: u32,
    next_buffer: u64,
    next_surface: u64,
    next_fence: u64,
}

impl MockState {
    pub const DISCONNECTED: u32 = 1;
    pub const CONNECTED: u32 = 2;
    pub const ENCODER: u32 = 10;
    pub const CRTC: u32 = 20;
    pub const OTHER_CRTC: u32 = 21;
    pub const PRIMARY_PLANE: u32 = 30;
    pub const CURSOR_PLANE: u32 = 31;
    pub const OVERLAY_PLANE: u32 = 32;
    pub const ORIGINAL_FB: u32 = 99;

    /// Atomic capable device with a 1920x1080 connector driven by a single crtc
    pub fn shared() -> Arc<Mutex<MockState>> {
        Arc::new(Mutex::new(MockState {
            ops: Vec::new(),
            connector_connected: true,
            connector_modes: vec![mode(1920, 1080), mode(1280, 720)],
            connector_current_encoder: Some(handle(Self::ENCODER)),
            connector_encoders: vec![handle(Self::ENCODER)],
            encoder_crtc: Some(handle(Self::CRTC)),
            encoder_possible_crtcs: vec![handle(Self::CRTC), handle(Self::OTHER_CRTC)],
            crtc_mode: Some(mode(1920, 1080)),
            planes: vec![
                PlaneInfo {
                    handle: handle(Self::PRIMARY_PLANE),
                    kind: PlaneType::Primary,
                    possible_crtcs: vec![handle(Self::CRTC)],
                },
                PlaneInfo {
                    handle: handle(Self::CURSOR_PLANE),
                    kind: PlaneType::Cursor,
                    possible_crtcs: vec![handle(Self::CRTC)],
                },
                PlaneInfo {
                    handle: handle(Self::OVERLAY_PLANE),
                    kind: PlaneType::Overlay,
                    possible_crtcs: vec![handle(Self::CRTC)],
                },
            ],
            planes_unsupported: false,
            atomic: true,
            async_flip: true,
            cursor_size: (64, 64),
            native_fences: true,
            cursor_format_supported: true,
            fail_open: false,
            fail_set_crtc: false,
            fail_page_flip: false,
            fail_commit: false,
            fail_add_framebuffer: false,
            fail_lock: false,
            fail_gpu_surface: false,
            fail_create_fence: false,
            omit_out_fence: false,
            noise_events: Vec::new(),
            pending_flips: Vec::new(),
            events: VecDeque::new(),
            live_framebuffers: HashMap::new(),
            live_buffers: Vec::new(),
            freed: Vec::new(),
            live_fences: Vec::new(),
            cursor_data: Vec::new(),
            open_devices: 0,
            next_fb: 100,
            next_buffer: 1,
            next_surface: 1,
            next_fence: 1,
        }))
    }

    /// Index of the first recorded call matching `pred`
    pub fn position(&self, pred: impl Fn(&Op) -> bool) -> Option<usize> {
        self.ops.iter().position(pred)
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    /// Last recorded call matching `pred`
    pub fn last(&self, pred: impl Fn(&Op) -> bool) -> Option<&Op> {
        self.ops.iter().rev().find(|op| pred(op))
    }
}

/// Mode-setting device backed by [`MockState`]
///
/// Page flip completions are delivered through a socket pair, so the device can be polled.
#[derive(Debug)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    rx: UnixStream,
    tx: UnixStream,
}

impl MockDevice {
    pub fn new(state: &Arc<Mutex<MockState>>) -> MockDevice {
        let (rx, tx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();
        let mut guard = state.lock().unwrap();
        guard.ops.push(Op::OpenDevice);
        guard.open_devices += 1;
        drop(guard);
        MockDevice {
            state: state.clone(),
            rx,
            tx,
        }
    }

    /// Shuts the event channel down, as if the device vanished
    pub fn hang_up(&self) {
        self.tx.shutdown(std::net::Shutdown::Both).unwrap();
    }

    fn queue_event(&self, state: &mut MockState, event: KmsEvent) {
        state.events.push_back(event);
        (&self.tx).write_all(&[0]).unwrap();
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::CloseDevice);
        state.open_devices -= 1;
    }
}

impl AsFd for MockDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.rx.as_fd()
    }
}

impl KmsDevice for MockDevice {
    fn enable_atomic(&mut self) -> bool {
        self.state.lock().unwrap().atomic
    }

    fn supports_async_page_flip(&self) -> bool {
        self.state.lock().unwrap().async_flip
    }

    fn cursor_size(&self) -> Result<(u32, u32), Error> {
        Ok(self.state.lock().unwrap().cursor_size)
    }

    fn resources(&self) -> Result<Resources, Error> {
        Ok(Resources {
            connectors: vec![handle(MockState::DISCONNECTED), handle(MockState::CONNECTED)],
            encoders: vec![handle(MockState::ENCODER)],
            crtcs: vec![handle(MockState::CRTC), handle(MockState::OTHER_CRTC)],
        })
    }

    fn connector(&self, conn: connector::Handle) -> Result<ConnectorInfo, Error> {
        let state = self.state.lock().unwrap();
        if conn == handle(MockState::CONNECTED) {
            Ok(ConnectorInfo {
                handle: conn,
                connected: state.connector_connected,
                modes: state.connector_modes.clone(),
                current_encoder: state.connector_current_encoder,
                encoders: state.connector_encoders.clone(),
            })
        } else {
            Ok(ConnectorInfo {
                handle: conn,
                connected: false,
                modes: Vec::new(),
                current_encoder: None,
                encoders: Vec::new(),
            })
        }
    }

    fn encoder(&self, enc: encoder::Handle) -> Result<EncoderInfo, Error> {
        let state = self.state.lock().unwrap();
        if enc != handle(MockState::ENCODER) {
            return Err(invalid("Unknown encoder"));
        }
        Ok(EncoderInfo {
            handle: enc,
            crtc: state.encoder_crtc,
            possible_crtcs: state.encoder_possible_crtcs.clone(),
        })
    }

    fn crtc(&self, crtc: crtc::Handle) -> Result<CrtcInfo, Error> {
        let state = self.state.lock().unwrap();
        Ok(CrtcInfo {
            handle: crtc,
            mode: state.crtc_mode,
            framebuffer: Some(handle(MockState::ORIGINAL_FB)),
        })
    }

    fn planes(&self) -> Result<Vec<PlaneInfo>, Error> {
        let state = self.state.lock().unwrap();
        if state.planes_unsupported {
            return Err(invalid("Error loading planes"));
        }
        Ok(state.planes.clone())
    }

    fn add_framebuffer<B: DrmBuffer + ?Sized>(&self, buffer: &B) -> Result<framebuffer::Handle, Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_add_framebuffer {
            return Err(Error::FramebufferExport {
                dev: None,
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }
        let fb: framebuffer::Handle = handle(state.next_fb);
        state.next_fb += 1;
        let raw = u32::from(buffer.handle());
        state.live_framebuffers.insert(fb, raw);
        state.ops.push(Op::AddFramebuffer { buffer: raw, fb });
        Ok(fb)
    }

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::DestroyFramebuffer(fb));
        match state.live_framebuffers.remove(&fb) {
            Some(_) => Ok(()),
            None => Err(invalid("Unknown framebuffer")),
        }
    }

    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        fb: Option<framebuffer::Handle>,
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::SetCrtc {
            crtc,
            fb,
            connectors: connectors.to_vec(),
            mode,
        });
        if state.fail_set_crtc {
            return Err(invalid("Error setting crtc"));
        }
        Ok(())
    }

    fn page_flip(&self, crtc: crtc::Handle, fb: framebuffer::Handle, flags: PageFlipFlags) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_page_flip {
            return Err(invalid("Failed to queue page flip"));
        }
        if state.pending_flips.contains(&crtc) {
            state.ops.push(Op::FlipRejected(crtc));
            return Err(busy("Failed to queue page flip"));
        }
        state.pending_flips.push(crtc);
        state.ops.push(Op::PageFlip { crtc, fb, flags });
        for event in state.noise_events.clone() {
            self.queue_event(&mut state, event);
        }
        self.queue_event(
            &mut state,
            KmsEvent::PageFlip {
                crtc,
                frame: 1,
                duration: Duration::from_millis(16),
            },
        );
        Ok(())
    }

    fn atomic_commit(
        &self,
        request: &AtomicRequest<'_>,
        flags: AtomicCommitFlags,
    ) -> Result<Option<OwnedFd>, Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commit {
            return Err(invalid("Atomic commit failed"));
        }
        state.ops.push(Op::AtomicCommit {
            fb: request.plane.framebuffer,
            flags,
            in_fence: request.plane.in_fence.is_some(),
            out_fence: request.out_fence,
            modeset: request.modeset.map(|modeset| modeset.mode),
            viewport: request.plane.viewport,
        });
        if request.out_fence && !state.omit_out_fence {
            Ok(Some(null_fd()))
        } else {
            Ok(None)
        }
    }

    fn receive_events(&self) -> Result<Vec<KmsEvent>, Error> {
        let mut byte = [0u8; 1];
        match (&self.rx).read(&mut byte) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
            Err(source) => {
                return Err(Error::Access(AccessError {
                    errmsg: "Error reading events",
                    dev: None,
                    source,
                }))
            }
        }
        let mut state = self.state.lock().unwrap();
        let event = match state.events.pop_front() {
            Some(event) => event,
            None => return Ok(Vec::new()),
        };
        if let KmsEvent::PageFlip { crtc, .. } = event {
            state.pending_flips.retain(|pending| *pending != crtc);
            state.ops.push(Op::FlipCompleted(crtc));
        }
        Ok(vec![event])
    }

    fn set_cursor<B: DrmBuffer + ?Sized>(
        &self,
        crtc: crtc::Handle,
        buffer: Option<&B>,
        hotspot: Option<(i32, i32)>,
    ) -> Result<(), Error> {
        self.state.lock().unwrap().ops.push(Op::SetCursor {
            crtc,
            buffer: buffer.map(|buffer| u32::from(buffer.handle())),
            hotspot,
        });
        Ok(())
    }

    fn move_cursor(&self, crtc: crtc::Handle, position: (i32, i32)) -> Result<(), Error> {
        self.state
            .lock()
            .unwrap()
            .ops
            .push(Op::MoveCursor { crtc, position });
        Ok(())
    }
}

/// Buffer of a [`MockSurface`]
#[derive(Debug, PartialEq, Eq)]
pub struct MockBuffer {
    id: BufferId,
    size: (u32, u32),
}

impl DrmBuffer for MockBuffer {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> Fourcc {
        Fourcc::Argb8888
    }

    fn pitch(&self) -> u32 {
        self.size.0 * 4
    }

    fn handle(&self) -> drm::buffer::Handle {
        handle(self.id.as_raw() as u32)
    }
}

impl AllocatedBuffer for MockBuffer {
    fn id(&self) -> BufferId {
        self.id
    }
}

/// Ring of three buffers
#[derive(Debug)]
pub struct MockSurface {
    pub id: u64,
    size: (u32, u32),
    pool: Vec<(BufferId, bool)>,
    cursor: usize,
    state: Arc<Mutex<MockState>>,
}

impl AllocatorSurface for MockSurface {
    type Buffer = MockBuffer;

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn lock_front_buffer(&mut self) -> io::Result<MockBuffer> {
        let mut state = self.state.lock().unwrap();
        if state.fail_lock {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted lock failure"));
        }
        for offset in 0..self.pool.len() {
            let idx = (self.cursor + offset) % self.pool.len();
            if !self.pool[idx].1 {
                self.pool[idx].1 = true;
                self.cursor = (idx + 1) % self.pool.len();
                let id = self.pool[idx].0;
                state.ops.push(Op::LockBuffer(id));
                return Ok(MockBuffer { id, size: self.size });
            }
        }
        Err(io::Error::new(io::ErrorKind::Other, "no free buffers left"))
    }

    fn release_buffer(&mut self, buffer: MockBuffer) {
        let entry = self
            .pool
            .iter_mut()
            .find(|(id, _)| *id == buffer.id)
            .expect("released a foreign buffer");
        assert!(entry.1, "released a buffer twice");
        entry.1 = false;
        self.state.lock().unwrap().ops.push(Op::ReleaseBuffer(buffer.id));
    }
}

/// Cursor buffer of a [`MockAllocator`]
#[derive(Debug)]
pub struct MockCursorBuffer {
    size: (u32, u32),
    state: Arc<Mutex<MockState>>,
}

impl MockCursorBuffer {
    pub const HANDLE: u32 = 7;
    /// Stride of cursor buffers, padded beyond the row size
    pub fn pitch_for(width: u32) -> u32 {
        width * 4 + 64
    }
}

impl DrmBuffer for MockCursorBuffer {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> Fourcc {
        Fourcc::Argb8888
    }

    fn pitch(&self) -> u32 {
        MockCursorBuffer::pitch_for(self.size.0)
    }

    fn handle(&self) -> drm::buffer::Handle {
        handle(MockCursorBuffer::HANDLE)
    }
}

impl CursorBuffer for MockCursorBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::WriteCursor { len: data.len() });
        state.cursor_data = data.to_vec();
        Ok(())
    }
}

/// Allocator handing out [`MockSurface`]s
#[derive(Debug)]
pub struct MockAllocator {
    state: Arc<Mutex<MockState>>,
}

impl MockAllocator {
    pub fn new(state: &Arc<Mutex<MockState>>) -> MockAllocator {
        MockAllocator { state: state.clone() }
    }
}

impl BufferAllocator for MockAllocator {
    type Surface = MockSurface;
    type CursorBuffer = MockCursorBuffer;

    fn is_format_supported(&self, _format: Fourcc, usage: BufferUsage) -> bool {
        !usage.contains(BufferUsage::CURSOR) || self.state.lock().unwrap().cursor_format_supported
    }

    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
        format: Fourcc,
        usage: BufferUsage,
    ) -> io::Result<MockSurface> {
        let mut state = self.state.lock().unwrap();
        let surface = state.next_surface;
        state.next_surface += 1;
        let mut pool = Vec::new();
        for _ in 0..3 {
            let id = BufferId::from_raw(state.next_buffer);
            state.next_buffer += 1;
            state.live_buffers.push(id);
            pool.push((id, false));
        }
        state.ops.push(Op::CreateSurface {
            surface,
            width,
            height,
            format,
            usage,
        });
        Ok(MockSurface {
            id: surface,
            size: (width, height),
            pool,
            cursor: 0,
            state: self.state.clone(),
        })
    }

    fn destroy_surface(&mut self, surface: MockSurface) {
        let mut state = self.state.lock().unwrap();
        let locked = surface.pool.iter().filter(|(_, locked)| *locked).count();
        state.ops.push(Op::DestroySurface {
            surface: surface.id,
            locked,
        });
        for (id, _) in &surface.pool {
            state.live_buffers.retain(|live| live != id);
            state.freed.push(*id);
        }
    }

    fn create_cursor_buffer(
        &mut self,
        width: u32,
        height: u32,
        _format: Fourcc,
        usage: BufferUsage,
    ) -> io::Result<MockCursorBuffer> {
        self.state.lock().unwrap().ops.push(Op::CreateCursorBuffer {
            width,
            height,
            usage,
        });
        Ok(MockCursorBuffer {
            size: (width, height),
            state: self.state.clone(),
        })
    }

    fn take_freed(&mut self) -> Vec<BufferId> {
        std::mem::take(&mut self.state.lock().unwrap().freed)
    }
}

/// Error returned by the scripted gpu
#[derive(Debug, thiserror::Error)]
#[error("scripted gpu failure: {0}")]
pub struct MockGpuError(&'static str);

#[derive(Debug, PartialEq, Eq)]
pub struct MockGpuSurface(u64);

#[derive(Debug, PartialEq, Eq)]
pub struct MockFence(u64);

/// Gpu context rendering into [`MockSurface`]s
#[derive(Debug)]
pub struct MockGpu {
    state: Arc<Mutex<MockState>>,
    capabilities: GpuCapabilities,
}

impl MockGpu {
    pub fn new(state: &Arc<Mutex<MockState>>) -> MockGpu {
        let capabilities = GpuCapabilities {
            native_fence_sync: state.lock().unwrap().native_fences,
        };
        MockGpu {
            state: state.clone(),
            capabilities,
        }
    }

    fn new_fence(&mut self) -> MockFence {
        let mut state = self.state.lock().unwrap();
        let id = state.next_fence;
        state.next_fence += 1;
        state.live_fences.push(id);
        MockFence(id)
    }
}

impl GpuContext<MockSurface> for MockGpu {
    type Surface = MockGpuSurface;
    type Fence = MockFence;
    type Error = MockGpuError;

    fn capabilities(&self) -> GpuCapabilities {
        self.capabilities
    }

    fn create_surface(&mut self, native: &MockSurface) -> Result<MockGpuSurface, MockGpuError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_gpu_surface {
            return Err(MockGpuError("surface creation"));
        }
        state.ops.push(Op::GpuCreateSurface(native.id));
        Ok(MockGpuSurface(native.id))
    }

    fn destroy_surface(&mut self, surface: MockGpuSurface) {
        self.state.lock().unwrap().ops.push(Op::GpuDestroySurface(surface.0));
    }

    fn has_context(&self) -> bool {
        true
    }

    fn make_current(&mut self, surface: Option<&MockGpuSurface>) -> Result<(), MockGpuError> {
        self.state
            .lock()
            .unwrap()
            .ops
            .push(Op::MakeCurrent(surface.map(|surface| surface.0)));
        Ok(())
    }

    fn swap_buffers(&mut self, surface: &MockGpuSurface) -> Result<(), MockGpuError> {
        self.state.lock().unwrap().ops.push(Op::SwapBuffers(surface.0));
        Ok(())
    }

    fn create_fence(&mut self) -> Result<MockFence, MockGpuError> {
        if self.state.lock().unwrap().fail_create_fence {
            return Err(MockGpuError("fence creation"));
        }
        let fence = self.new_fence();
        self.state.lock().unwrap().ops.push(Op::CreateFence(fence.0));
        Ok(fence)
    }

    fn export_fence(&mut self, fence: &MockFence) -> Result<OwnedFd, MockGpuError> {
        self.state.lock().unwrap().ops.push(Op::ExportFence(fence.0));
        Ok(null_fd())
    }

    fn import_fence(&mut self, _fd: OwnedFd) -> Result<MockFence, MockGpuError> {
        let fence = self.new_fence();
        self.state.lock().unwrap().ops.push(Op::ImportFence(fence.0));
        Ok(fence)
    }

    fn wait_fence(&mut self, fence: &MockFence) -> Result<(), MockGpuError> {
        self.state.lock().unwrap().ops.push(Op::WaitFence(fence.0));
        Ok(())
    }

    fn client_wait_fence(&mut self, fence: &MockFence, _timeout: Option<Duration>) -> Result<bool, MockGpuError> {
        self.state.lock().unwrap().ops.push(Op::ClientWaitFence(fence.0));
        Ok(true)
    }

    fn destroy_fence(&mut self, fence: MockFence) {
        let mut state = self.state.lock().unwrap();
        state.live_fences.retain(|live| *live != fence.0);
        state.ops.push(Op::DestroyFence(fence.0));
    }
}

/// Platform bringing up the mocks above
#[derive(Debug, Clone)]
pub struct MockPlatform {
    pub state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> MockPlatform {
        MockPlatform {
            state: MockState::shared(),
        }
    }

    /// Applies `f` to the scripted state
    pub fn script(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock().unwrap())
    }

    /// Runs `f` on the scripted state
    pub fn inspect<R>(&self, f: impl FnOnce(&MockState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }
}

impl Platform for MockPlatform {
    type Device = MockDevice;
    type Allocator = MockAllocator;
    type Gpu = MockGpu;

    fn open_device(&mut self) -> Result<MockDevice, Error> {
        if self.state.lock().unwrap().fail_open {
            return Err(Error::Access(AccessError {
                errmsg: "Failed to open device",
                dev: None,
                source: io::Error::from_raw_os_error(libc::ENOENT),
            }));
        }
        Ok(MockDevice::new(&self.state))
    }

    fn create_allocator(&mut self, _device: &MockDevice) -> Result<MockAllocator, Error> {
        Ok(MockAllocator::new(&self.state))
    }

    fn create_gpu_context(&mut self, _allocator: &MockAllocator) -> Result<MockGpu, Error> {
        Ok(MockGpu::new(&self.state))
    }
}
