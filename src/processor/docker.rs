//! Container-daemon build processor
//!
//! Runs the generated script inside a builder container on the local
//! container daemon. The container is created with a `sleep` entrypoint so
//! the daemon itself bounds its lifetime to the build timeout; the script
//! runs as an attached exec so stdout and stderr stream back line by line.

use std::env;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    write_artifact, BuildFiles, BuildProcessor, LogTail, DRIVER_CONFIG_FILE, KERNEL_CONFIG_FILE,
    MAKEFILE_FILE,
};
use crate::build::Build;
use crate::images::ImageCatalog;
use crate::script;
use crate::{Error, Result};

/// Directory the build files are staged in inside the container
pub const BUILDER_DIR: &str = "/driverkit";

/// File name of the staged build script
pub const SCRIPT_FILE: &str = "driverkit.sh";

/// Build processor backed by the local container daemon
pub struct DockerProcessor {
    catalog: ImageCatalog,
    http: reqwest::Client,
    timeout: Duration,
    token: CancellationToken,
}

impl DockerProcessor {
    /// Create a processor bounded by the given timeout and cancellation token
    pub fn new(
        catalog: ImageCatalog,
        http: reqwest::Client,
        timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            http,
            timeout,
            token,
        }
    }

    async fn run(
        &self,
        build: &Build,
        docker: &Docker,
        container_id: &mut Option<String>,
    ) -> Result<()> {
        let generated = script::generate(build, &self.catalog, BUILDER_DIR, &self.http).await?;
        let files = BuildFiles::assemble(build, &generated)?;

        self.pull_image(docker, &generated.builder_image).await?;

        let name = super::invocation_name();
        let config = ContainerConfig {
            image: Some(generated.builder_image.clone()),
            // The exec carries the real workload; sleep keeps PID 1 alive
            // for at most the build timeout.
            entrypoint: Some(vec![
                "sleep".to_owned(),
                self.timeout.as_secs().to_string(),
            ]),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                network_mode: generated.network_mode.map(str::to_owned),
                ..Default::default()
            }),
            ..Default::default()
        };
        let created = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    ..Default::default()
                }),
                config,
            )
            .await?;
        *container_id = Some(created.id.clone());
        docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        debug!(container = %name, "staging build files");
        docker
            .upload_to_container(
                &created.id,
                Some(UploadToContainerOptions {
                    path: "/".to_owned(),
                    ..Default::default()
                }),
                build_context_tar(&files)?.into(),
            )
            .await?;

        self.exec_script(docker, &created.id).await?;

        if let Some(path) = &build.module_file_path {
            let source = script::module_full_path(&build.module_driver_name);
            copy_out(docker, &created.id, &source, path).await?;
            info!(artifact = %path.display(), "kernel module ready");
        }
        if let Some(path) = &build.probe_file_path {
            copy_out(docker, &created.id, script::PROBE_FULL_PATH, path).await?;
            info!(artifact = %path.display(), "eBPF probe ready");
        }
        Ok(())
    }

    async fn pull_image(&self, docker: &Docker, image: &str) -> Result<()> {
        info!(image = %image, "pulling builder image");
        let options = CreateImageOptions {
            from_image: image.to_owned(),
            ..Default::default()
        };
        let mut pull = docker.create_image(Some(options), None, registry_credentials());
        while let Some(progress) = pull.try_next().await? {
            if let Some(status) = progress.status {
                debug!(image = %image, "{status}");
            }
        }
        Ok(())
    }

    async fn exec_script(&self, docker: &Docker, id: &str) -> Result<()> {
        let exec = docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "/bin/bash".to_owned(),
                        format!("{BUILDER_DIR}/{SCRIPT_FILE}"),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut tail = LogTail::new();
        if let StartExecResults::Attached { mut output, .. } =
            docker.start_exec(&exec.id, None).await?
        {
            let mut pending = String::new();
            while let Some(chunk) = output.try_next().await? {
                match chunk {
                    LogOutput::StdOut { message }
                    | LogOutput::StdErr { message }
                    | LogOutput::Console { message } => {
                        pending.push_str(&String::from_utf8_lossy(&message));
                        forward_lines(&mut pending, &mut tail);
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
            let rest = pending.trim_end();
            if !rest.is_empty() {
                info!("{rest}");
                tail.push(rest);
            }
        }

        let inspect = docker.inspect_exec(&exec.id).await?;
        match inspect.exit_code {
            Some(0) => Ok(()),
            code => Err(Error::build_failed(
                format!("build script exited with status {}", code.unwrap_or(-1)),
                tail.tail(),
            )),
        }
    }
}

#[async_trait]
impl BuildProcessor for DockerProcessor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start(&self, build: &Build) -> Result<()> {
        let docker = Docker::connect_with_local_defaults()?;

        let mut container_id = None;
        let result = tokio::select! {
            result = self.run(build, &docker, &mut container_id) => result,
            _ = self.token.cancelled() => Err(Error::Interrupted),
            _ = tokio::time::sleep(self.timeout) => Err(Error::Timeout(self.timeout)),
        };
        if let Some(id) = &container_id {
            cleanup(&docker, id).await;
        }
        result
    }
}

/// Registry credentials from the standard environment, when present
fn registry_credentials() -> Option<DockerCredentials> {
    let username = env::var("DOCKER_USERNAME").ok()?;
    Some(DockerCredentials {
        username: Some(username),
        password: env::var("DOCKER_PASSWORD").ok(),
        ..Default::default()
    })
}

/// Emit every complete line in `pending`, keeping any unterminated rest
fn forward_lines(pending: &mut String, tail: &mut LogTail) {
    while let Some(pos) = pending.find('\n') {
        let line: String = pending.drain(..=pos).collect();
        let line = line.trim_end_matches(['\n', '\r']);
        if !line.is_empty() {
            info!("{line}");
            tail.push(line);
        }
    }
}

/// Tar archive staging the four build files under [`BUILDER_DIR`]
///
/// The archive is unpacked at the container root, so entry paths are
/// relative to `/`.
fn build_context_tar(files: &BuildFiles) -> Result<Vec<u8>> {
    let root = BUILDER_DIR.trim_start_matches('/');
    let mut builder = tar::Builder::new(Vec::new());
    append_entry(
        &mut builder,
        &format!("{root}/{SCRIPT_FILE}"),
        files.script.as_bytes(),
        0o755,
    )?;
    append_entry(
        &mut builder,
        &format!("{root}/{KERNEL_CONFIG_FILE}"),
        &files.kernel_config,
        0o644,
    )?;
    append_entry(
        &mut builder,
        &format!("{root}/{MAKEFILE_FILE}"),
        files.makefile.as_bytes(),
        0o644,
    )?;
    append_entry(
        &mut builder,
        &format!("{root}/{DRIVER_CONFIG_FILE}"),
        files.driver_config.as_bytes(),
        0o644,
    )?;
    Ok(builder.into_inner()?)
}

fn append_entry(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    bytes: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append_data(&mut header, path, bytes)?;
    Ok(())
}

/// Copy one file out of the container to the host path
///
/// The daemon hands back a tar stream holding the single requested file.
async fn copy_out(docker: &Docker, id: &str, source: &str, dest: &Path) -> Result<()> {
    let options = DownloadFromContainerOptions {
        path: source.to_owned(),
    };
    let mut stream = docker.download_from_container(id, Some(options));
    let mut archive = Vec::new();
    while let Some(chunk) = stream.try_next().await? {
        archive.extend_from_slice(&chunk);
    }

    let mut entries = tar::Archive::new(archive.as_slice());
    for entry in entries.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            return write_artifact(dest, &bytes);
        }
    }
    Err(Error::ArtifactMissing(dest.to_owned()))
}

/// Stop and remove the build container
///
/// Failures are routine: auto-remove may have collected the container
/// already, or the sleep entrypoint may have expired.
async fn cleanup(docker: &Docker, id: &str) {
    if let Err(error) = docker
        .stop_container(id, Some(StopContainerOptions { t: 1 }))
        .await
    {
        debug!(container = %id, %error, "container stop failed");
    }
    if let Err(error) = docker
        .remove_container(
            id,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        debug!(container = %id, %error, "container remove failed");
    }
}
