// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Typed errors for the library. Application code wraps these in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration problems. Always fatal for the component that owns
/// the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("camera {camera}: zone #{index} is invalid: {reason}")]
    InvalidZone {
        camera: String,
        index: usize,
        reason: String,
    },

    #[error("camera {camera}: unknown direction token {token:?} (expected up, down or any)")]
    UnknownDirection { camera: String, token: String },

    #[error("unknown object class {0:?}")]
    UnknownClass(String),

    #[error("unsupported source {0:?}")]
    UnsupportedSource(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Frame source failures. `Unavailable` at startup is fatal for that camera;
/// everything else is treated as transient by the ingestor.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("source is not connected")]
    NotConnected,
}

/// Output side failures (video writers, violation log).
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("violation log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("video encoding failed: {0}")]
    Encode(String),

    #[error("frame size {got:?} does not match writer size {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        got: (u32, u32),
    },
}
