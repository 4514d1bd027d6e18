use std::convert::TryFrom;
use std::fmt;

use drm::control::Mode;
use indexmap::IndexMap;
use tracing::{debug, info, info_span, instrument, trace, warn};

use super::cursor::{self, Cursor};
use super::discovery::discover;
use super::present::{present_frame, Strategy};
use super::surface::{CursorBufferOf, OpenDevice, Output, WindowSurfaces};
use super::{Error, KmsDevice, PresentConfig, SwapInterval};
use crate::backend::allocator::{BufferAllocator, BufferUsage, Fourcc};
use crate::backend::Platform;
use crate::utils::DevPath;

/// Identifier of a window of a [`KmsDisplay`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

struct Window<P: Platform> {
    size: (u32, u32),
    fullscreen: bool,
    strategy: Strategy,
    surfaces: Option<WindowSurfaces<P>>,
    dirty: bool,
    span: tracing::Span,
}

impl<P: Platform> Window<P> {
    fn rebuild(&mut self, dev: &mut OpenDevice<P>, output: &Output) -> Result<(), Error> {
        let _guard = self.span.enter();
        if let Some(surfaces) = self.surfaces.take() {
            surfaces.destroy(dev, output);
        }
        match WindowSurfaces::create(dev, output, self.size, self.fullscreen) {
            Ok(surfaces) => {
                self.surfaces = Some(surfaces);
                self.dirty = false;
                Ok(())
            }
            Err(err) => {
                self.dirty = true;
                Err(err)
            }
        }
    }

    fn teardown(&mut self, dev: &mut OpenDevice<P>, output: &Output) {
        let _guard = self.span.enter();
        if let Some(surfaces) = self.surfaces.take() {
            surfaces.destroy(dev, output);
        }
    }
}

/// Display presenting gpu rendered windows directly through kernel mode-setting
///
/// The display drives a single connector through a single crtc, both selected on creation.
/// The device is only kept open while at least one window exists, leaving the node to other
/// users otherwise. On drop every window is torn down and the original crtc state restored.
pub struct KmsDisplay<P: Platform> {
    windows: IndexMap<WindowId, Window<P>>,
    dev: Option<OpenDevice<P>>,
    platform: P,
    config: PresentConfig,
    swap_interval: SwapInterval,
    output: Output,
    cursor_size: (u32, u32),
    cursor: Option<Cursor>,
    next_window: u64,
    span: tracing::Span,
}

impl<P: Platform> fmt::Debug for KmsDisplay<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsDisplay")
            .field("config", &self.config)
            .field("swap_interval", &self.swap_interval)
            .field("output", &self.output)
            .field("active", &self.dev.is_some())
            .field("windows", &self.windows.keys().collect::<Vec<_>>())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl<P: Platform> KmsDisplay<P> {
    /// Creates a new display
    ///
    /// The device is opened once to find a connected connector and the crtc driving it,
    /// and closed again before returning.
    pub fn new(mut platform: P, config: PresentConfig) -> Result<Self, Error> {
        let device = platform.open_device()?;
        let span = info_span!("kms_present", device = ?device.dev_path());
        let _guard = span.enter();

        let found = discover(&device)?;
        let cursor_size = device.cursor_size().unwrap_or_else(|err| {
            warn!("Unable to query cursor size: {}", err);
            (0, 0)
        });
        drop(device);

        info!(
            connector = ?found.connector,
            crtc = ?found.crtc,
            mode = ?found.mode.size(),
            "Display initialized"
        );
        let output = Output {
            connector: found.connector,
            crtc: found.crtc,
            primary_plane: found.primary_plane,
            original_mode: found.mode,
            original_framebuffer: found.original_framebuffer,
            current_mode: found.mode,
            modeset_pending: false,
            connector_modes: found.connector_modes,
        };

        drop(_guard);
        Ok(KmsDisplay {
            windows: IndexMap::new(),
            dev: None,
            platform,
            swap_interval: config.swap_interval,
            config,
            output,
            cursor_size,
            cursor: None,
            next_window: 1,
            span,
        })
    }

    /// Returns if the device is currently open
    pub fn is_active(&self) -> bool {
        self.dev.is_some()
    }

    /// Mode the crtc was programmed with before the display was created
    pub fn original_mode(&self) -> Mode {
        self.output.original_mode
    }

    /// Mode the crtc is (or will be, on the next frame) programmed with
    pub fn current_mode(&self) -> Mode {
        self.output.current_mode
    }

    /// Modes advertised by the connector
    pub fn connector_modes(&self) -> &[Mode] {
        &self.output.connector_modes
    }

    /// Current swap interval
    pub fn swap_interval(&self) -> SwapInterval {
        self.swap_interval
    }

    /// Sets the swap interval, only `0` and `1` are valid
    pub fn set_swap_interval(&mut self, interval: i32) -> Result<(), Error> {
        self.swap_interval = SwapInterval::try_from(interval)?;
        debug!(parent: &self.span, interval = ?self.swap_interval, "Swap interval changed");
        Ok(())
    }

    /// Presentation strategy of a window, [`Strategy::Unselected`] until its first frame
    pub fn strategy(&self, window: WindowId) -> Option<Strategy> {
        self.windows.get(&window).map(|window| window.strategy)
    }

    /// Requested size of a window
    pub fn window_size(&self, window: WindowId) -> Option<(u32, u32)> {
        self.windows.get(&window).map(|window| window.size)
    }

    fn open(&mut self) -> Result<(), Error> {
        if self.dev.is_some() {
            return Ok(());
        }
        let _guard = self.span.enter();
        let mut dev = OpenDevice::open(&mut self.platform, &self.config)?;
        if let Some(cursor) = self.cursor.as_ref() {
            if let Err(err) = upload_cursor(&mut dev, &self.output, cursor) {
                warn!("Failed to restore cursor: {}", err);
                self.cursor = None;
            }
        }
        self.dev = Some(dev);
        Ok(())
    }

    fn close(&mut self) {
        let Some(dev) = self.dev.take() else {
            return;
        };
        let _guard = self.span.enter();
        if self.cursor.is_some() {
            if let Err(err) = cursor::hide::<_, CursorBufferOf<P>>(&dev.device, self.output.crtc) {
                warn!("Failed to hide cursor: {}", err);
            }
        }
        dev.close();
    }

    /// Creates a new window
    ///
    /// Opens the device, if this is the first window. Fullscreen windows are rendered at the
    /// size of the current mode.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn create_window(&mut self, size: (u32, u32), fullscreen: bool) -> Result<WindowId, Error> {
        self.open()?;
        let id = WindowId(self.next_window);
        let mut window = Window {
            size,
            fullscreen,
            strategy: Strategy::Unselected,
            surfaces: None,
            dirty: true,
            span: info_span!(parent: &self.span, "window", id = id.0),
        };

        let result = match self.dev.as_mut() {
            Some(dev) => window.rebuild(dev, &self.output),
            None => Err(Error::DeviceInactive),
        };
        if let Err(err) = result {
            if self.windows.is_empty() {
                self.close();
            }
            return Err(err);
        }

        self.next_window += 1;
        self.windows.insert(id, window);
        Ok(id)
    }

    /// Destroys a window
    ///
    /// Closes the device, if this was the last window.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn destroy_window(&mut self, window: WindowId) -> Result<(), Error> {
        let mut window = self
            .windows
            .shift_remove(&window)
            .ok_or(Error::UnknownWindow(window))?;
        if let Some(dev) = self.dev.as_mut() {
            window.teardown(dev, &self.output);
        }
        if self.windows.is_empty() {
            self.close();
        }
        Ok(())
    }

    /// Resizes a window
    ///
    /// Switches the display to a connector mode of exactly the requested size, if there is
    /// one, or back to the original mode otherwise.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn set_window_size(&mut self, window: WindowId, width: u32, height: u32) -> Result<(), Error> {
        if !self.windows.contains_key(&window) {
            return Err(Error::UnknownWindow(window));
        }

        let mode = self
            .output
            .connector_modes
            .iter()
            .find(|mode| {
                let (w, h) = mode.size();
                (w as u32, h as u32) == (width, height)
            })
            .copied()
            .unwrap_or(self.output.original_mode);
        if mode != self.output.current_mode {
            self.set_display_mode(mode);
        }

        let dev = self.dev.as_mut().ok_or(Error::DeviceInactive)?;
        let window = self
            .windows
            .get_mut(&window)
            .ok_or(Error::UnknownWindow(window))?;
        window.size = (width, height);
        window.rebuild(dev, &self.output)
    }

    /// Enters or leaves fullscreen
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn set_window_fullscreen(&mut self, window: WindowId, fullscreen: bool) -> Result<(), Error> {
        let dev = self.dev.as_mut().ok_or(Error::DeviceInactive)?;
        let window = self
            .windows
            .get_mut(&window)
            .ok_or(Error::UnknownWindow(window))?;
        if window.fullscreen == fullscreen && !window.dirty {
            return Ok(());
        }
        window.fullscreen = fullscreen;
        window.rebuild(dev, &self.output)
    }

    /// Switches the display to `mode`
    ///
    /// The mode is applied with the next presented frame. Every window is rebuilt before it
    /// renders its next frame.
    pub fn set_display_mode(&mut self, mode: Mode) {
        info!(parent: &self.span, mode = ?mode.size(), "Changing display mode");
        self.output.current_mode = mode;
        self.output.modeset_pending = true;
        for window in self.windows.values_mut() {
            window.dirty = true;
        }
    }

    /// Puts the last frame rendered into a window on screen
    ///
    /// Until the first frame of a window is presented, the gpu must not render into it.
    /// A failed presentation leaves the previous frame on screen.
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    #[profiling::function]
    pub fn present(&mut self, window: WindowId) -> Result<(), Error> {
        let dev = self.dev.as_mut().ok_or(Error::DeviceInactive)?;
        let window = self
            .windows
            .get_mut(&window)
            .ok_or(Error::UnknownWindow(window))?;

        dev.reap();
        if window.dirty || window.surfaces.is_none() {
            window.rebuild(dev, &self.output)?;
        }

        let _guard = window.span.enter();
        if window.strategy == Strategy::Unselected {
            window.strategy =
                Strategy::select(&dev.capabilities, self.output.primary_plane.is_some(), &self.config);
            info!(strategy = ?window.strategy, "Presentation strategy selected");
        }

        let Some(surfaces) = window.surfaces.as_mut() else {
            return Err(Error::DeviceInactive);
        };
        present_frame(
            dev,
            &mut self.output,
            surfaces,
            window.strategy,
            &self.config,
            self.swap_interval,
        )
    }

    /// Creates a cursor from straight-alpha argb8888 pixels (`0xAARRGGBB`), row by row
    ///
    /// Images larger than the hardware cursor are rejected.
    pub fn create_cursor(
        &self,
        pixels: &[u32],
        width: u32,
        height: u32,
        hotspot: (i32, i32),
    ) -> Result<Cursor, Error> {
        Cursor::new(pixels, width, height, hotspot, self.cursor_size)
    }

    /// Shows `cursor`, or hides the cursor for `None`
    ///
    /// Showing the cursor that is already visible does not touch the hardware.
    #[instrument(level = "trace", parent = &self.span, skip(self, cursor))]
    pub fn show_cursor(&mut self, cursor: Option<&Cursor>) -> Result<(), Error> {
        let dev = self.dev.as_mut().ok_or(Error::DeviceInactive)?;
        match cursor {
            // reopening the device re-uploads the visible cursor
            Some(cursor) if self.cursor.as_ref() == Some(cursor) => {}
            Some(cursor) => {
                upload_cursor(dev, &self.output, cursor)?;
                self.cursor = Some(cursor.clone());
            }
            None => {
                cursor::hide::<_, CursorBufferOf<P>>(&dev.device, self.output.crtc)?;
                self.cursor = None;
            }
        }
        Ok(())
    }

    /// Replaces the cursor image
    pub fn set_cursor_image(
        &mut self,
        pixels: &[u32],
        width: u32,
        height: u32,
        hot_x: i32,
        hot_y: i32,
    ) -> Result<Cursor, Error> {
        if self.dev.is_none() {
            return Err(Error::DeviceInactive);
        }
        let cursor = self.create_cursor(pixels, width, height, (hot_x, hot_y))?;
        self.show_cursor(Some(&cursor))?;
        Ok(cursor)
    }

    /// Hides the cursor
    pub fn hide_cursor(&mut self) -> Result<(), Error> {
        self.show_cursor(None)
    }

    /// Moves the cursor hotspot to `position` on the crtc
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn move_cursor(&mut self, position: (i32, i32)) -> Result<(), Error> {
        let dev = self.dev.as_ref().ok_or(Error::DeviceInactive)?;
        dev.device.move_cursor(self.output.crtc, position)
    }

    /// Drops a cursor, hiding it first if it is shown
    pub fn free_cursor(&mut self, cursor: Cursor) -> Result<(), Error> {
        if self.cursor.as_ref() != Some(&cursor) {
            return Ok(());
        }
        if self.dev.is_some() {
            self.show_cursor(None)
        } else {
            self.cursor = None;
            Ok(())
        }
    }

    fn shutdown(&mut self) {
        if let Some(dev) = self.dev.as_mut() {
            for (_, mut window) in self.windows.drain(..) {
                window.teardown(dev, &self.output);
            }
        }
        self.windows.clear();
        self.close();
    }
}

fn upload_cursor<P: Platform>(dev: &mut OpenDevice<P>, output: &Output, cursor: &Cursor) -> Result<(), Error> {
    let (width, height) = dev.capabilities.cursor_size;
    if width == 0 || height == 0 {
        return Err(Error::NoCursorSupport);
    }
    if !dev
        .allocator
        .is_format_supported(Fourcc::Argb8888, BufferUsage::CURSOR | BufferUsage::WRITE)
    {
        return Err(Error::UnsupportedCursorFormat);
    }
    if dev.cursor_buffer.is_none() {
        trace!("Recreating cursor buffer");
        let buffer = dev
            .allocator
            .create_cursor_buffer(
                width,
                height,
                Fourcc::Argb8888,
                BufferUsage::CURSOR | BufferUsage::WRITE | BufferUsage::LINEAR,
            )
            .map_err(|source| Error::Allocation {
                errmsg: "Failed to create cursor buffer",
                source,
            })?;
        dev.cursor_buffer = Some(buffer);
    }
    let Some(buffer) = dev.cursor_buffer.as_mut() else {
        return Err(Error::NoCursorSupport);
    };
    cursor::upload(&dev.device, output.crtc, buffer, cursor)
}

impl<P: Platform> Drop for KmsDisplay<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
