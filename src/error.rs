//! Error types for the renderer.
//!
//! Everything fallible returns [`Result<T>`]. Setup failures (missing shaders,
//! a second viewport) are meant to stop startup; capture failures abort only
//! the capture and leave interactive rendering running.

use std::path::PathBuf;

use thiserror::Error;

use crate::gpu::Extent;

/// The main error type for the renderer.
#[derive(Error, Debug)]
pub enum RenderError {
    // ========================================================================
    // Setup
    // ========================================================================
    /// A virtual shader path did not resolve to a readable program.
    #[error("shader not found: {path} (resolved to {resolved:?})")]
    ShaderNotFound { path: String, resolved: PathBuf },

    /// The backend rejected a compute program or pipeline.
    #[error("failed to build pipeline '{name}': {reason}")]
    PipelineCreation { name: String, reason: String },

    /// Only one viewport can be driven by a frame controller.
    #[error("only one viewport is supported")]
    MultipleViewports,

    /// An operation needed a live viewport but none was initialized.
    #[error("no viewport has been initialized")]
    NoViewport,

    /// No compatible GPU adapter was found.
    #[error("failed to request GPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// The GPU device could not be created.
    #[error("failed to create GPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// The window surface could not be created.
    #[error("failed to create surface: {0}")]
    SurfaceCreateFailed(#[from] wgpu::CreateSurfaceError),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    // ========================================================================
    // Per-frame / resources
    // ========================================================================
    /// A sized resource could not be (re)created.
    #[error("failed to create '{label}' at {extent:?}: {reason}")]
    ResourceCreation {
        label: String,
        extent: Extent,
        reason: String,
    },

    /// A handle did not refer to a live object on the device.
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    /// A buffer write did not fit inside the buffer.
    #[error("write of {len} bytes at offset {offset} overflows '{label}' ({size} bytes)")]
    BufferOverflow {
        label: String,
        offset: u64,
        len: usize,
        size: u64,
    },

    /// The swapchain image could not be acquired.
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    /// Mapping the readback buffer failed.
    #[error("readback failed: {0}")]
    Readback(String),

    // ========================================================================
    // Capture output and configuration
    // ========================================================================
    /// File I/O error while writing a capture or reading a config.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PNG encoding of a capture failed.
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    /// A configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A capture container did not have the expected layout.
    #[error("invalid capture container: {0}")]
    InvalidContainer(String),

    /// An offline capture aborted. The live state was restored.
    #[error("capture aborted: {0}")]
    Capture(#[source] Box<RenderError>),
}

impl RenderError {
    /// The error a failed capture wrapped, or `self`.
    pub fn root(&self) -> &RenderError {
        match self {
            RenderError::Capture(inner) => inner.root(),
            other => other,
        }
    }
}

/// Alias for `std::result::Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
