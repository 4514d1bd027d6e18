//! Various utilities functions and types

mod fd;
mod geometry;

pub use self::fd::{DevPath, DeviceFd};
pub use self::geometry::{Buffer, Physical, Point, Rectangle, Size};
