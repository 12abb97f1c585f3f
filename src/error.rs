use thiserror::Error;

use crate::request::RequestId;

/// Errors produced by the terrain core.
///
/// Everything except the GPU variants is local to a single meshing request;
/// the scheduler logs them and keeps running.
#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("invalid scalar grid: {0}")]
    InvalidGrid(String),

    #[error("meshing request {0} has no field source")]
    MissingField(RequestId),

    #[error("attachment target is no longer part of the scene")]
    InvalidAttachment,

    #[error("no suitable GPU adapter found")]
    GpuUnavailable,

    #[error("GPU device creation failed: {0}")]
    GpuDevice(String),

    #[error("GPU buffer mapping failed: {0}")]
    GpuMapping(String),

    #[error("meshing request {0} is already in flight")]
    DuplicateRequest(RequestId),

    #[error("meshing scheduler is shut down")]
    SchedulerClosed,

    #[error("meshing worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TerrainError>;
