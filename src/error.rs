//! Error types for the driverkit pipeline

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for driverkit operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid user input (flags, config file, unsupported combinations)
    #[error("validation error: {0}")]
    Validation(String),

    /// Kernel release string rejected by the parser
    #[error("invalid kernel release: {0}")]
    KernelRelease(String),

    /// Requested target tag is not in the registry
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// No candidate kernel headers URL survived probing
    #[error("kernel headers not found for {target} {kernel_release}")]
    HeadersNotFound {
        /// Target tag the headers were derived for
        target: String,
        /// Kernel release string the headers were derived for
        kernel_release: String,
    },

    /// The image catalog has no entry close enough to the requested toolchain
    #[error("no builder image for target {target} gcc {gcc}")]
    NoBuilderImage {
        /// Target tag the image was looked up for
        target: String,
        /// Requested GCC version
        gcc: String,
    },

    /// The build script exited non-zero
    #[error("build failed: {message}\n{log_tail}")]
    BuildFailed {
        /// Short description of the failing step
        message: String,
        /// Last lines of the build log, for diagnosis
        log_tail: String,
    },

    /// The build script succeeded but a requested artifact is missing
    #[error("build succeeded but artifact {0} not produced")]
    ArtifactMissing(PathBuf),

    /// No locally discovered compiler produced the kernel module
    #[error("failed to find kernel module .ko file")]
    ModuleNotFound,

    /// The build was canceled by a signal
    #[error("interrupted")]
    Interrupted,

    /// The build did not complete within the configured deadline
    #[error("build timed out after {0:?}")]
    Timeout(Duration),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Pod watch stream error
    #[error("watch error: {0}")]
    Watch(String),

    /// Background task join error
    #[error("task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Container daemon error
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// HTTP client error during headers discovery
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Script or ancillary file template error
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local filesystem or subprocess I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Package database query error (Amazon Linux headers lookup)
    #[error("package database error: {0}")]
    PackageDb(#[from] rusqlite::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a kernel release parse error for the given release string
    pub fn kernel_release(release: impl Into<String>) -> Self {
        Self::KernelRelease(release.into())
    }

    /// Create a headers-not-found error for the given target and release
    pub fn headers_not_found(target: impl Into<String>, kernel_release: impl Into<String>) -> Self {
        Self::HeadersNotFound {
            target: target.into(),
            kernel_release: kernel_release.into(),
        }
    }

    /// Create a no-builder-image error for the given target and GCC version
    pub fn no_builder_image(target: impl Into<String>, gcc: impl Into<String>) -> Self {
        Self::NoBuilderImage {
            target: target.into(),
            gcc: gcc.into(),
        }
    }

    /// Create a build-failed error carrying the tail of the build log
    pub fn build_failed(message: impl Into<String>, log_tail: impl Into<String>) -> Self {
        Self::BuildFailed {
            message: message.into(),
            log_tail: log_tail.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}
