//! Build processors: execute a generated script and collect the artifacts
//!
//! A processor takes one [`Build`], generates the build script for it, runs
//! the script inside its environment, and places the requested artifacts at
//! the paths the build names. Three environments are supported:
//!
//! - [`docker`] - a container on the local container daemon
//! - [`kubernetes`] - a pod on a cluster, artifacts streamed out over exec
//! - [`local`] - the current host, looping over installed GCC versions
//!
//! All three share the same lifecycle: a single cancellation token and a
//! single deadline bound every blocking call, transient resources (container,
//! pod + configmap, working directory) are torn down on every exit path, and
//! build-script output is forwarded line by line to the logger in order.

pub mod docker;
pub mod kubernetes;
pub mod local;

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use async_trait::async_trait;

use crate::build::Build;
use crate::script::{self, GeneratedScript};
use crate::Result;

/// File name of the staged kernel configuration
pub const KERNEL_CONFIG_FILE: &str = "kernel.config";

/// File name of the staged kernel-module Makefile
pub const MAKEFILE_FILE: &str = "module-Makefile";

/// File name of the staged `driver_config.h` header
pub const DRIVER_CONFIG_FILE: &str = "module-driver-config.h";

/// Lines of build output kept for failure reports
pub const LOG_TAIL_LINES: usize = 40;

/// One build execution environment
///
/// `start` runs a single build to completion: script generation, execution,
/// artifact collection, and cleanup. Implementations are independent per
/// invocation; running two builds concurrently on two processors shares
/// nothing mutable.
#[async_trait]
pub trait BuildProcessor {
    /// Processor name for logs and diagnostics
    fn name(&self) -> &'static str;

    /// Run one build, placing artifacts at the paths the build names
    async fn start(&self, build: &Build) -> Result<()>;
}

/// The file set staged into the build environment next to the script
///
/// Every processor ships the same four files; only the staging directory
/// and the script file name differ per environment.
#[derive(Debug, Clone)]
pub struct BuildFiles {
    /// The generated build script
    pub script: String,
    /// Decoded kernel configuration, empty when the build carries none
    pub kernel_config: Vec<u8>,
    /// Rendered kernel-module Makefile
    pub makefile: String,
    /// Rendered `driver_config.h` header
    pub driver_config: String,
}

impl BuildFiles {
    /// Assemble the staged file set for one build
    pub fn assemble(build: &Build, generated: &GeneratedScript) -> Result<Self> {
        Ok(BuildFiles {
            script: generated.script.clone(),
            kernel_config: build.decoded_kernel_config()?,
            makefile: script::module_makefile(build)?,
            driver_config: script::driver_config_header(build)?,
        })
    }
}

/// Ring buffer over the last [`LOG_TAIL_LINES`] build-output lines
///
/// Build scripts emit thousands of lines; failure reports carry only the
/// tail, which is where compilers and package managers put the reason.
#[derive(Debug, Default)]
pub struct LogTail {
    lines: VecDeque<String>,
}

impl LogTail {
    /// Create an empty tail buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one output line, evicting the oldest once full
    pub fn push(&mut self, line: &str) {
        if self.lines.len() == LOG_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_owned());
    }

    /// The retained lines joined with newlines
    pub fn tail(&self) -> String {
        let lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        lines.join("\n")
    }
}

/// Unique per-invocation name for transient build resources
///
/// Short lowercase hex keeps the name a valid DNS label, which cluster
/// objects require; the container daemon is satisfied by anything.
pub(crate) fn invocation_name() -> String {
    format!("driverkit-{:08x}", rand::random::<u32>())
}

/// Write one artifact to the caller's path
///
/// Missing parent directories are created with mode `0755`; the artifact
/// itself is written with mode `0644`. An existing file at the path is
/// overwritten.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)?;
    }
    fs::write(path, bytes)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::target::TargetId;
    use base64::Engine;
    use std::path::PathBuf;

    // ==========================================================================
    // Staged file assembly
    // ==========================================================================

    fn generated(script: &str) -> GeneratedScript {
        GeneratedScript {
            script: script.to_owned(),
            builder_image: "docker.io/example/builder:latest".to_owned(),
            gcc_version: semver::Version::new(12, 0, 0),
            network_mode: None,
            kernel_release: crate::kernelrelease::KernelRelease::parse(
                "5.10.0",
                Architecture::Amd64,
            )
            .unwrap(),
        }
    }

    #[test]
    fn staged_files_carry_the_script_and_both_ancillary_templates() {
        let build = Build {
            target: TargetId::Vanilla,
            kernel_release: "5.10.0".to_owned(),
            module_driver_name: "falco".to_owned(),
            module_device_name: "falco0".to_owned(),
            driver_version: "a1b2c3".to_owned(),
            ..Build::default()
        };
        let files = BuildFiles::assemble(&build, &generated("#!/bin/bash\nset -e\n")).unwrap();

        assert!(files.script.starts_with("#!/bin/bash"));
        assert!(files.kernel_config.is_empty());
        assert!(files.makefile.contains("obj-m += falco.o"));
        assert!(files.driver_config.contains(r#"#define DRIVER_VERSION "a1b2c3""#));
        assert!(files.driver_config.contains(r#"#define DRIVER_DEVICE_NAME "falco0""#));
    }

    #[test]
    fn staged_kernel_config_is_the_decoded_user_data() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("CONFIG_BPF=y\n");
        let build = Build {
            target: TargetId::Vanilla,
            kernel_release: "5.10.0".to_owned(),
            kernel_config_data: encoded,
            ..Build::default()
        };
        let files = BuildFiles::assemble(&build, &generated("#!/bin/bash\n")).unwrap();
        assert_eq!(files.kernel_config, b"CONFIG_BPF=y\n");
    }

    // ==========================================================================
    // Log tail ring buffer
    // ==========================================================================

    #[test]
    fn log_tail_keeps_only_the_newest_lines() {
        let mut tail = LogTail::new();
        for n in 0..(LOG_TAIL_LINES + 5) {
            tail.push(&format!("line {n}"));
        }
        let rendered = tail.tail();
        assert!(!rendered.contains("line 4\n"));
        assert!(rendered.starts_with("line 5"));
        assert!(rendered.ends_with(&format!("line {}", LOG_TAIL_LINES + 4)));
        assert_eq!(rendered.lines().count(), LOG_TAIL_LINES);
    }

    #[test]
    fn log_tail_of_a_short_build_is_complete() {
        let mut tail = LogTail::new();
        tail.push("configuring");
        tail.push("compiling");
        assert_eq!(tail.tail(), "configuring\ncompiling");
    }

    // ==========================================================================
    // Artifact writing
    // ==========================================================================

    #[test]
    fn artifacts_land_with_created_parents_and_expected_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/output/falco.ko");

        write_artifact(&path, b"\x7fELF").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"\x7fELF");
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o644);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o755);
    }

    #[test]
    fn artifacts_overwrite_previous_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("falco.ko");
        write_artifact(&path, b"old").unwrap();
        write_artifact(&path, b"new contents").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new contents");
    }

    #[test]
    fn bare_relative_paths_need_no_parent_creation() {
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = write_artifact(&PathBuf::from("probe.o"), b"obj");
        std::env::set_current_dir(prev).unwrap();
        result.unwrap();
    }

    // ==========================================================================
    // Invocation names
    // ==========================================================================

    #[test]
    fn invocation_names_are_dns_label_safe_and_distinct() {
        let name = invocation_name();
        assert!(name.starts_with("driverkit-"));
        assert_eq!(name.len(), "driverkit-".len() + 8);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));

        let other = invocation_name();
        assert_ne!(name, other, "two invocations must not collide");
    }
}
