//! emuout - emulator output adapter
//!
//! Turns per-frame audio and video callbacks from an emulation core into
//! aligned device periods and host framebuffer writes.

pub mod audio;
pub mod config;
pub mod driver;
pub mod error;
pub mod video;

pub use error::{EmuoutError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
