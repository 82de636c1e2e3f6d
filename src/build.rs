//! The build request and its derived configuration view
//!
//! A [`Build`] carries everything the user asked for. It is constructed by
//! the CLI (or directly by library callers), validated once, handed to a
//! single build processor, and consumed read-only from then on.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use semver::Version;

use crate::arch::Architecture;
use crate::kernelrelease::KernelRelease;
use crate::target::TargetId;
use crate::{Error, Result};

/// A single build request
#[derive(Debug, Clone)]
pub struct Build {
    /// Distribution the kernel belongs to
    pub target: TargetId,
    /// Kernel release string as printed by `uname -r` on the target machine
    pub kernel_release: String,
    /// Distribution-specific secondary version (e.g. the Ubuntu ABI number)
    pub kernel_version: String,
    /// Base64-encoded kernel configuration, empty when not supplied
    pub kernel_config_data: String,
    /// Architecture the artifacts are built for
    pub architecture: Architecture,
    /// Git reference of the driver sources to build
    pub driver_version: String,
    /// Host path the kernel module is written to; `None` skips the module
    pub module_file_path: Option<PathBuf>,
    /// Host path the eBPF probe is written to; `None` skips the probe
    pub probe_file_path: Option<PathBuf>,
    /// Kernel module name, also the `.ko` base name
    pub module_driver_name: String,
    /// Device name the driver registers
    pub module_device_name: String,
    /// Explicit builder image, bypassing the catalog
    pub custom_builder_image: Option<String>,
    /// Explicit kernel headers URLs, bypassing target derivation
    pub kernel_urls: Vec<String>,
    /// Explicit GCC version, bypassing target and default selection
    pub gcc_version: Option<Version>,
    /// GitHub organization the driver sources are fetched from
    pub repo_org: String,
    /// GitHub repository the driver sources are fetched from
    pub repo_name: String,
}

impl Default for Build {
    fn default() -> Self {
        Build {
            target: TargetId::Vanilla,
            kernel_release: String::new(),
            kernel_version: crate::DEFAULT_KERNEL_VERSION.to_owned(),
            kernel_config_data: String::new(),
            architecture: Architecture::host(),
            driver_version: crate::DEFAULT_DRIVER_VERSION.to_owned(),
            module_file_path: None,
            probe_file_path: None,
            module_driver_name: crate::DEFAULT_MODULE_DRIVER_NAME.to_owned(),
            module_device_name: crate::DEFAULT_MODULE_DEVICE_NAME.to_owned(),
            custom_builder_image: None,
            kernel_urls: Vec::new(),
            gcc_version: None,
            repo_org: crate::DEFAULT_DRIVER_REPO_ORG.to_owned(),
            repo_name: crate::DEFAULT_DRIVER_REPO_NAME.to_owned(),
        }
    }
}

impl Build {
    /// Whether the kernel module artifact was requested
    pub fn has_module(&self) -> bool {
        self.module_file_path.is_some()
    }

    /// Whether the eBPF probe artifact was requested
    pub fn has_probe(&self) -> bool {
        self.probe_file_path.is_some()
    }

    /// Parse the release string against the requested architecture
    pub fn parsed_kernel_release(&self) -> Result<KernelRelease> {
        KernelRelease::parse(&self.kernel_release, self.architecture)
    }

    /// Decode the base64 kernel configuration; empty input decodes to empty
    pub fn decoded_kernel_config(&self) -> Result<Vec<u8>> {
        if self.kernel_config_data.is_empty() {
            return Ok(Vec::new());
        }
        BASE64
            .decode(self.kernel_config_data.trim())
            .map_err(|_| Error::validation("kernelconfigdata is not valid base64"))
    }

    /// Validate the request before any network or subprocess work
    ///
    /// Checks the release parses, at least one artifact is requested, the
    /// kernel config decodes, and the kernel can actually carry each
    /// requested artifact on the requested architecture.
    pub fn validate(&self) -> Result<KernelRelease> {
        if !self.has_module() && !self.has_probe() {
            return Err(Error::validation(
                "nothing to do: no module or probe output path given",
            ));
        }
        let kr = self.parsed_kernel_release()?;
        self.decoded_kernel_config()?;
        if self.has_module() && !kr.supports_module() {
            return Err(Error::validation(format!(
                "kernel module not supported on {} ({})",
                kr, self.architecture
            )));
        }
        if self.has_probe() && !kr.supports_probe() {
            return Err(Error::validation(format!(
                "eBPF probe not supported on {} ({})",
                kr, self.architecture
            )));
        }
        Ok(kr)
    }
}

/// Derived, read-only view over a [`Build`] shared by targets and templates
#[derive(Debug)]
pub struct Config<'a> {
    /// Kernel module name, also the `.ko` base name
    pub driver_name: &'a str,
    /// Device name the driver registers
    pub device_name: &'a str,
    /// Driver source archive base URL, without the trailing `/<ref>.tar.gz`
    pub download_base_url: String,
    /// The underlying request
    pub build: &'a Build,
}

impl<'a> From<&'a Build> for Config<'a> {
    fn from(build: &'a Build) -> Self {
        Config {
            driver_name: &build.module_driver_name,
            device_name: &build.module_device_name,
            download_base_url: format!(
                "https://github.com/{}/{}/archive",
                build.repo_org, build.repo_name
            ),
            build,
        }
    }
}

impl Config<'_> {
    /// Full URL of the driver source archive for this build's git reference
    pub fn module_download_url(&self) -> String {
        format!("{}/{}.tar.gz", self.download_base_url, self.build.driver_version)
    }
}
