//! Driverkit - kernel module and eBPF probe builder for the Falco driver
//!
//! Driverkit compiles the Falco kernel artifacts (a loadable `.ko` module and
//! an eBPF `probe.o` object) against an arbitrary target kernel, described by
//! its release string, secondary version, and optional kernel configuration.
//! It locates the matching kernel headers, selects a builder toolchain, and
//! drives the compilation inside a container, a Kubernetes pod, or directly
//! on the local machine.
//!
//! # Pipeline
//!
//! Every build follows the same path:
//! - the release string is parsed into a [`kernelrelease::KernelRelease`]
//! - the [`target`] registry derives candidate kernel headers URLs
//! - the [`resolver`] keeps the candidates that actually exist
//! - the [`script`] generator renders the target's build script
//! - a [`processor`] executes the script and extracts the artifacts
//!
//! # Modules
//!
//! - [`arch`] - build architectures (amd64, arm64) and their spellings
//! - [`build`] - the build request and its derived configuration view
//! - [`cli`] - command-line surface, config file, option merging
//! - [`error`] - error types for the whole pipeline
//! - [`images`] - builder image catalog and toolchain selection
//! - [`kernelrelease`] - kernel release string parser and support checks
//! - [`processor`] - docker, kubernetes, and local build processors
//! - [`resolver`] - HEAD-probing URL resolver
//! - [`script`] - build script generation from per-target templates
//! - [`signals`] - SIGINT/SIGTERM handling and build cancellation
//! - [`target`] - supported distributions and their headers policies

#![deny(missing_docs)]

pub mod arch;
pub mod build;
pub mod cli;
pub mod error;
pub mod images;
pub mod kernelrelease;
pub mod processor;
pub mod resolver;
pub mod script;
pub mod signals;
pub mod target;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the defaults shared by the CLI, the config file
// loader, and test fixtures.

/// Default GitHub organization the driver sources are fetched from
pub const DEFAULT_DRIVER_REPO_ORG: &str = "falcosecurity";

/// Default repository name the driver sources are fetched from
pub const DEFAULT_DRIVER_REPO_NAME: &str = "libs";

/// Default driver version (a git reference in the driver repository)
pub const DEFAULT_DRIVER_VERSION: &str = "master";

/// Default kernel module name, also used for the `.ko` file name
pub const DEFAULT_MODULE_DRIVER_NAME: &str = "falco";

/// Default device name the driver registers at runtime
pub const DEFAULT_MODULE_DEVICE_NAME: &str = "falco";

/// Default secondary kernel version when the target does not carry one
pub const DEFAULT_KERNEL_VERSION: &str = "1";

/// Default overall build timeout, in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Lowest accepted build timeout, in seconds
pub const MINIMUM_TIMEOUT_SECONDS: u64 = 30;

/// Default builder image index consulted when no `--builderrepo` is given
pub const DEFAULT_IMAGE_INDEX_URL: &str =
    "https://falcosecurity.github.io/driverkit/index.yaml";
