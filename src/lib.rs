#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like EGL
#![allow(clippy::upper_case_acronyms)]

//! # smithay-kms-present: frames on a display, without a display server
//!
//! This crate puts frames rendered by a gpu onto a monitor by talking to the kernel's
//! mode-setting interface (drm/kms) directly. It is meant for fullscreen applications
//! running on a bare console, where no compositor is around to present their frames.
//!
//! ## Structure of the crate
//!
//! Everything lives in [`backend`]:
//!
//! - [`backend::drm`] discovers the display pipe, owns the windows and presents frames
//!   through [`KmsDisplay`](backend::drm::KmsDisplay).
//! - [`backend::allocator`] describes the buffers frames are rendered into and provides a
//!   gbm implementation.
//! - [`backend::egl`] describes the gpu context rendering into those buffers.
//!
//! [`utils`] contains the geometry types and file descriptor helpers shared by them.
//!
//! ### Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging. Every
//! [`KmsDisplay`](backend::drm::KmsDisplay) opens a `kms_present` span naming its device
//! node and each window a `window` span below it.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod utils;

pub mod reexports;
