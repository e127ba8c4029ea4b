//! Unified error types for emuout

use thiserror::Error;

/// Main error type for emuout operations
#[derive(Error, Debug)]
pub enum EmuoutError {
    /// Staging buffer allocation failed
    #[error("Failed to allocate {role} buffer ({size} bytes, aligned to {align})")]
    AllocationFailed {
        role: &'static str,
        size: usize,
        align: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Source and device channel counts have no conversion path
    #[error("No channel conversion from {source_channels} source channel(s) to {device_channels} device channel(s)")]
    UnsupportedChannelConversion {
        source_channels: u16,
        device_channels: u16,
    },

    /// Source pixel buffer does not match its declared dimensions
    #[error("Source image is {width}x{height} but holds {actual} pixels")]
    SourceSizeMismatch {
        width: usize,
        height: usize,
        actual: usize,
    },

    /// Destination framebuffer is smaller than the write region
    #[error("Destination too small: need {required_width}x{required_height} pixels, have stride {stride} and height {height}")]
    GeometryTooSmall {
        required_width: usize,
        required_height: usize,
        stride: usize,
        height: usize,
    },

    /// Audio device did not release a buffer in time
    #[error("Audio device did not release a buffer within {waited_ms}ms")]
    DeviceTimeout { waited_ms: u64 },

    /// Audio or video device operation error
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Thread communication error
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// I/O error from a host output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for emuout operations
pub type Result<T> = std::result::Result<T, EmuoutError>;

impl EmuoutError {
    /// Create a device error
    pub fn device_error(message: impl Into<String>) -> Self {
        Self::DeviceError(message.into())
    }

    /// Check if this error is recoverable (the session can keep running)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EmuoutError::DeviceTimeout { .. }
                | EmuoutError::DeviceError(_)
                | EmuoutError::ChannelError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(EmuoutError::DeviceTimeout { waited_ms: 10 }.is_recoverable());
        assert!(EmuoutError::device_error("gone").is_recoverable());
        assert!(!EmuoutError::InvalidConfig("x".into()).is_recoverable());
        assert!(!EmuoutError::AllocationFailed {
            role: "work",
            size: 8192,
            align: 4096
        }
        .is_recoverable());
    }

    #[test]
    fn test_timeout_message() {
        let err = EmuoutError::DeviceTimeout { waited_ms: 250 };
        assert_eq!(
            err.to_string(),
            "Audio device did not release a buffer within 250ms"
        );
    }

    #[test]
    fn test_geometry_message() {
        let err = EmuoutError::GeometryTooSmall {
            required_width: 160,
            required_height: 144,
            stride: 120,
            height: 144,
        };
        assert!(err.to_string().contains("stride 120"));
    }
}
