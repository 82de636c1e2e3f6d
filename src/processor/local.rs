//! Local build processor
//!
//! Runs the generated script directly on this machine. There is no builder
//! image, so the toolchain is whatever the host carries: the processor
//! enumerates installed GCC binaries and retries the build with each one
//! until a kernel module appears. The eBPF probe is compiler-independent
//! and is collected from whichever attempt produced it first.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{write_artifact, BuildProcessor, DRIVER_CONFIG_FILE, KERNEL_CONFIG_FILE, MAKEFILE_FILE};
use crate::build::Build;
use crate::kernelrelease::KernelRelease;
use crate::script::{self, CommonTemplateData};
use crate::target;
use crate::{Error, Result};

/// Local build options from the `local` subcommand
#[derive(Debug, Clone, Default)]
pub struct LocalOptions {
    /// Build the module through DKMS instead of invoking make directly
    pub use_dkms: bool,
    /// Download and extract kernel headers before building
    pub download_headers: bool,
    /// Existing driver source directory, skipping the source download
    pub src_dir: Option<PathBuf>,
    /// Environment entries overlaid on the inherited environment
    pub env: Vec<(String, String)>,
}

/// Build processor executing on the current host
pub struct LocalProcessor {
    http: reqwest::Client,
    options: LocalOptions,
    timeout: Duration,
    token: CancellationToken,
}

impl LocalProcessor {
    /// Create a processor bounded by the given timeout and cancellation token
    pub fn new(
        http: reqwest::Client,
        options: LocalOptions,
        timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            http,
            options,
            timeout,
            token,
        }
    }

    async fn run(&self, build: &Build) -> Result<()> {
        let kr = build.validate()?;
        let target = target::by_id(build.target);

        // Dropped on every exit path, taking the staged files with it.
        let workdir = tempfile::tempdir()?;
        std::fs::write(
            workdir.path().join(MAKEFILE_FILE),
            script::module_makefile(build)?,
        )?;
        std::fs::write(
            workdir.path().join(DRIVER_CONFIG_FILE),
            script::driver_config_header(build)?,
        )?;
        std::fs::write(
            workdir.path().join(KERNEL_CONFIG_FILE),
            build.decoded_kernel_config()?,
        )?;

        let urls = if self.options.download_headers {
            script::resolved_urls(build, target, &kr, &self.http).await?
        } else {
            Vec::new()
        };
        let gcc_version = script::effective_gcc(build, target, &kr, &self.http).await;

        let gccs = if build.has_module() {
            let found = discover_gccs()?;
            if found.is_empty() {
                warn!("no gcc compiler driver found on this host");
            }
            found
        } else {
            // The probe needs no particular GCC; run the loop exactly once.
            vec![PathBuf::from("gcc")]
        };

        let driver_build_dir = match &self.options.src_dir {
            Some(dir) => dir.to_string_lossy().into_owned(),
            None => script::DRIVER_BUILD_DIR.to_owned(),
        };

        let mut module_done = !build.has_module();
        let mut probe_pending = build.has_probe();

        for gcc in &gccs {
            let gcc_bin = gcc.to_string_lossy().into_owned();
            info!(gcc = %gcc_bin, "running local build");

            let script_text = render_script(
                build,
                &kr,
                &gcc_version,
                &gcc_bin,
                workdir.path(),
                &driver_build_dir,
                &urls,
                &self.options,
            )?;
            let status = self.run_script(&script_text).await?;

            if probe_pending {
                if let Some(dest) = &build.probe_file_path {
                    let source = Path::new(&driver_build_dir).join("bpf").join("probe.o");
                    if source.is_file() {
                        write_artifact(dest, &std::fs::read(&source)?)?;
                        info!(artifact = %dest.display(), "eBPF probe ready");
                        probe_pending = false;
                    }
                }
            }

            if !module_done {
                if let Some(dest) = &build.module_file_path {
                    let found = module_candidates(build, &kr, &driver_build_dir, self.options.use_dkms)
                        .into_iter()
                        .find(|candidate| candidate.is_file());
                    if let Some(source) = found {
                        write_artifact(dest, &std::fs::read(&source)?)?;
                        info!(artifact = %dest.display(), gcc = %gcc_bin, "kernel module ready");
                        module_done = true;
                    } else {
                        debug!(gcc = %gcc_bin, status, "no kernel module after this attempt");
                    }
                }
            }

            if module_done && !probe_pending {
                break;
            }
        }

        if !module_done {
            return Err(Error::ModuleNotFound);
        }
        if probe_pending {
            return Err(Error::ArtifactMissing(
                build.probe_file_path.clone().unwrap_or_default(),
            ));
        }
        Ok(())
    }

    async fn run_script(&self, script_text: &str) -> Result<i32> {
        let mut command = Command::new("/bin/bash");
        command
            .arg("-c")
            .arg(script_text)
            .envs(self.options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let out_task = tokio::spawn(forward_output(child.stdout.take()));
        let err_task = tokio::spawn(forward_output(child.stderr.take()));

        let status = child.wait().await?;
        out_task.await?;
        err_task.await?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[async_trait]
impl BuildProcessor for LocalProcessor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn start(&self, build: &Build) -> Result<()> {
        tokio::select! {
            result = self.run(build) => result,
            _ = self.token.cancelled() => Err(Error::Interrupted),
            _ = tokio::time::sleep(self.timeout) => Err(Error::Timeout(self.timeout)),
        }
    }
}

/// Render the local build script for one GCC candidate
#[allow(clippy::too_many_arguments)]
fn render_script(
    build: &Build,
    kr: &KernelRelease,
    gcc_version: &semver::Version,
    gcc_bin: &str,
    workdir: &Path,
    driver_build_dir: &str,
    urls: &[String],
    options: &LocalOptions,
) -> Result<String> {
    let common = CommonTemplateData::new(build, kr, gcc_version, gcc_bin, workdir.to_string_lossy());
    let specific = serde_json::json!({
        // With --src-dir the caller's tree is the build dir and the
        // source download is skipped entirely.
        "driver_build_dir": driver_build_dir,
        "download_src": options.src_dir.is_none(),
        "download_headers": options.download_headers,
        "use_dkms": options.use_dkms,
        "kernel_download_urls": urls,
    });
    script::render("local.sh", &common, specific)
}

/// Forward one output stream to the logger, line by line
async fn forward_output<R>(reader: Option<R>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.is_empty() {
            info!("{line}");
        }
    }
}

/// GCC binaries installed next to the one `which gcc` finds
///
/// The listing picks up companion tools (gcc-ar, gcc-nm, gcc-ranlib);
/// only entries that answer `-print-search-dirs` are compiler drivers.
fn discover_gccs() -> Result<Vec<PathBuf>> {
    let Ok(gcc) = which::which("gcc") else {
        return Ok(Vec::new());
    };
    let Some(bin_dir) = gcc.parent() else {
        return Ok(Vec::new());
    };

    let mut found = Vec::new();
    for entry in std::fs::read_dir(bin_dir)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with("gcc") {
            continue;
        }
        let path = entry.path();
        if is_compiler_driver(&path) {
            found.push(path);
        }
    }
    found.sort_by_key(|path| gcc_order(path));
    Ok(found)
}

/// Sort key putting the bare `gcc` first, then versioned entries newest
/// first
fn gcc_order(path: &Path) -> (u8, Reverse<u32>) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let major = name
        .strip_prefix("gcc-")
        .and_then(|rest| rest.split('.').next())
        .and_then(|major| major.parse::<u32>().ok());
    match major {
        Some(major) => (1, Reverse(major)),
        None => (0, Reverse(0)),
    }
}

fn is_compiler_driver(path: &Path) -> bool {
    std::process::Command::new(path)
        .arg("-print-search-dirs")
        .output()
        .map(|out| out.status.success() && out.stdout.starts_with(b"install:"))
        .unwrap_or(false)
}

/// Paths a finished kernel module may land at
///
/// Plain make leaves it in the build directory; dkms installs it under
/// `/var/lib/dkms` with the kernel release and architecture in the path.
fn module_candidates(
    build: &Build,
    kr: &KernelRelease,
    driver_build_dir: &str,
    use_dkms: bool,
) -> Vec<PathBuf> {
    let name = &build.module_driver_name;
    let mut candidates = vec![Path::new(driver_build_dir).join(format!("{name}.ko"))];
    if use_dkms {
        candidates.push(PathBuf::from(format!(
            "/var/lib/dkms/{name}/{version}/{release}/{arch}/module/{name}.ko",
            version = build.driver_version,
            release = build.kernel_release,
            arch = kr.architecture.to_non_deb(),
        )));
    }
    candidates
}
