//! Cluster-pod build processor
//!
//! Runs the generated script inside a builder pod. The staged files travel
//! as a ConfigMap mounted at [`BUILDER_DIR`]; artifacts come back over
//! remote-exec sessions running a small downloader script, because pods
//! have no equivalent of a filesystem copy-out.
//!
//! The build script gets a keep-alive tail appended: after the build it
//! touches a lock file and loops until the lock disappears. PID 1 therefore
//! survives until every artifact has been streamed out and the caller
//! releases the lock.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, LocalObjectReference, Pod, PodSpec,
    ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::ByteString;
use kube::api::{Api, AttachParams, DeleteParams, LogParams, ObjectMeta, PostParams};
use kube::runtime::wait::{await_condition, Condition};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use super::{
    invocation_name, write_artifact, BuildFiles, BuildProcessor, LogTail, DRIVER_CONFIG_FILE,
    KERNEL_CONFIG_FILE, MAKEFILE_FILE,
};
use crate::build::Build;
use crate::images::ImageCatalog;
use crate::script;
use crate::{Error, Result};

/// Directory the ConfigMap is mounted at inside the builder pod
pub const BUILDER_DIR: &str = "/module-builder";

/// File name of the staged build script
pub const SCRIPT_FILE: &str = "module-builder.sh";

/// File name of the artifact downloader staged next to the script
pub const DOWNLOADER_FILE: &str = "module-downloader.sh";

/// Lock file the keep-alive tail waits on before letting PID 1 exit
const DOWNLOAD_LOCK: &str = "/tmp/download.lock";

/// Label selecting the builder pod of one invocation
const BUILD_LABEL: &str = "driverkit/build";

const DOWNLOADER: &str = include_str!("../script/assets/module-downloader.sh");

/// Pod placement options from the cluster subcommands
#[derive(Debug, Clone)]
pub struct PodOptions {
    /// Namespace the pod and configmap are created in
    pub namespace: String,
    /// UID the builder container runs as
    pub run_as_user: Option<i64>,
    /// Name of an image pull secret in the namespace
    pub image_pull_secret: Option<String>,
}

impl Default for PodOptions {
    fn default() -> Self {
        Self {
            namespace: "default".to_owned(),
            run_as_user: None,
            image_pull_secret: None,
        }
    }
}

/// Build processor backed by a Kubernetes cluster
pub struct KubernetesProcessor {
    client: kube::Client,
    catalog: ImageCatalog,
    http: reqwest::Client,
    options: PodOptions,
    timeout: Duration,
    token: CancellationToken,
}

impl KubernetesProcessor {
    /// Create a processor bounded by the given timeout and cancellation token
    pub fn new(
        client: kube::Client,
        catalog: ImageCatalog,
        http: reqwest::Client,
        options: PodOptions,
        timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            catalog,
            http,
            options,
            timeout,
            token,
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.options.namespace)
    }

    fn configmaps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.options.namespace)
    }

    async fn run(&self, build: &Build, name: &str) -> Result<()> {
        let generated = script::generate(build, &self.catalog, BUILDER_DIR, &self.http).await?;
        let mut files = BuildFiles::assemble(build, &generated)?;
        files.script.push_str(&keep_alive_tail());

        let pods = self.pods();
        self.configmaps()
            .create(
                &PostParams::default(),
                &build_configmap(&self.options, name, &files),
            )
            .await?;
        info!(
            pod = %name,
            namespace = %self.options.namespace,
            image = %generated.builder_image,
            "creating builder pod"
        );
        pods.create(
            &PostParams::default(),
            &build_pod(&self.options, name, &generated.builder_image, self.timeout),
        )
        .await?;

        let settled = await_condition(pods.clone(), name, pod_settled())
            .await
            .map_err(|err| Error::Watch(err.to_string()))?;
        let phase = pod_phase(settled.as_ref());
        if phase.as_deref() != Some("Running") {
            let log_tail = static_log_tail(&pods, name).await;
            return Err(Error::build_failed(
                format!(
                    "builder pod entered phase {} before the build could start",
                    phase.as_deref().unwrap_or("Unknown")
                ),
                log_tail,
            ));
        }

        let tail = Arc::new(Mutex::new(LogTail::new()));
        let _follower = AbortOnDropHandle::new(tokio::spawn(follow_logs(
            pods.clone(),
            name.to_owned(),
            Arc::clone(&tail),
        )));

        if let Some(path) = &build.module_file_path {
            let source = script::module_full_path(&build.module_driver_name);
            self.download(&pods, name, &source, path, &tail).await?;
            info!(artifact = %path.display(), "kernel module ready");
        }
        if let Some(path) = &build.probe_file_path {
            self.download(&pods, name, script::PROBE_FULL_PATH, path, &tail)
                .await?;
            info!(artifact = %path.display(), "eBPF probe ready");
        }

        // Release the lock so PID 1 can exit before the pod is deleted.
        match pods
            .exec(
                name,
                vec!["rm", "-f", DOWNLOAD_LOCK],
                &AttachParams::default(),
            )
            .await
        {
            Ok(released) => {
                let _ = released.join().await;
            }
            Err(error) => debug!(pod = %name, %error, "download lock release failed"),
        }
        Ok(())
    }

    async fn download(
        &self,
        pods: &Api<Pod>,
        name: &str,
        source: &str,
        dest: &Path,
        tail: &Arc<Mutex<LogTail>>,
    ) -> Result<()> {
        debug!(pod = %name, source = %source, "downloading artifact");
        let params = AttachParams::default().stdout(true).stderr(false);
        let mut attached = pods
            .exec(
                name,
                vec![
                    "/bin/bash".to_owned(),
                    format!("{BUILDER_DIR}/{DOWNLOADER_FILE}"),
                    source.to_owned(),
                ],
                &params,
            )
            .await?;

        let mut bytes = Vec::new();
        if let Some(mut stdout) = attached.stdout() {
            // The downloader blocks until the artifact exists; the read
            // ends once the whole file streamed or the pod died under us.
            let _ = stdout.read_to_end(&mut bytes).await;
        }
        let _ = attached.join().await;

        if bytes.is_empty() {
            // A failing build script exits PID 1, which kills the exec
            // session without any payload.
            let phase = pods.get(name).await.ok().and_then(|pod| pod_phase(Some(&pod)));
            if phase.as_deref() != Some("Running") {
                let log_tail = tail.lock().map(|t| t.tail()).unwrap_or_default();
                return Err(Error::build_failed(
                    "build script failed inside the builder pod",
                    log_tail,
                ));
            }
            return Err(Error::ArtifactMissing(dest.to_owned()));
        }
        write_artifact(dest, &bytes)
    }

    /// Delete the builder pod and its configmap
    ///
    /// Both deletes tolerate the resource already being gone.
    async fn cleanup(&self, name: &str) {
        let params = DeleteParams {
            grace_period_seconds: Some(1),
            ..Default::default()
        };
        if let Err(error) = self.pods().delete(name, &params).await {
            if !is_not_found(&error) {
                warn!(pod = %name, %error, "builder pod delete failed");
            }
        }
        if let Err(error) = self.configmaps().delete(name, &DeleteParams::default()).await {
            if !is_not_found(&error) {
                warn!(configmap = %name, %error, "configmap delete failed");
            }
        }
    }
}

#[async_trait]
impl BuildProcessor for KubernetesProcessor {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn start(&self, build: &Build) -> Result<()> {
        let name = invocation_name();
        let result = tokio::select! {
            result = self.run(build, &name) => result,
            _ = self.token.cancelled() => Err(Error::Interrupted),
            _ = tokio::time::sleep(self.timeout) => Err(Error::Timeout(self.timeout)),
        };
        self.cleanup(&name).await;
        result
    }
}

/// Script suffix keeping PID 1 alive until the caller releases the lock
///
/// Without it the pod completes the moment the build does, and the
/// artifacts are gone before any exec session can stream them out.
fn keep_alive_tail() -> String {
    format!("\ntouch {DOWNLOAD_LOCK}\nwhile [ -f {DOWNLOAD_LOCK} ]; do\n    sleep 1\ndone\n")
}

fn object_meta(options: &PodOptions, name: &str) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(BUILD_LABEL.to_owned(), name.to_owned());
    ObjectMeta {
        name: Some(name.to_owned()),
        namespace: Some(options.namespace.clone()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// The ConfigMap carrying the staged build files plus the downloader
fn build_configmap(options: &PodOptions, name: &str, files: &BuildFiles) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(SCRIPT_FILE.to_owned(), files.script.clone());
    data.insert(MAKEFILE_FILE.to_owned(), files.makefile.clone());
    data.insert(DRIVER_CONFIG_FILE.to_owned(), files.driver_config.clone());
    data.insert(DOWNLOADER_FILE.to_owned(), DOWNLOADER.to_owned());

    // Caller-supplied config bytes are not guaranteed to be UTF-8.
    let mut binary_data = BTreeMap::new();
    binary_data.insert(
        KERNEL_CONFIG_FILE.to_owned(),
        ByteString(files.kernel_config.clone()),
    );

    ConfigMap {
        metadata: object_meta(options, name),
        data: Some(data),
        binary_data: Some(binary_data),
        ..Default::default()
    }
}

/// The builder pod: one container, the ConfigMap mounted read-only
fn build_pod(options: &PodOptions, name: &str, image: &str, timeout: Duration) -> Pod {
    let quantities = |cpu: &str, memory: &str| {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_owned(), Quantity(cpu.to_owned()));
        map.insert("memory".to_owned(), Quantity(memory.to_owned()));
        map
    };

    Pod {
        metadata: object_meta(options, name),
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_owned()),
            active_deadline_seconds: Some(timeout.as_secs() as i64),
            image_pull_secrets: options.image_pull_secret.as_ref().map(|secret| {
                vec![LocalObjectReference {
                    name: Some(secret.clone()),
                }]
            }),
            containers: vec![Container {
                name: "module-builder".to_owned(),
                image: Some(image.to_owned()),
                command: Some(vec![
                    "/bin/bash".to_owned(),
                    format!("{BUILDER_DIR}/{SCRIPT_FILE}"),
                ]),
                resources: Some(ResourceRequirements {
                    requests: Some(quantities("1", "2Gi")),
                    limits: Some(quantities("4", "4Gi")),
                    ..Default::default()
                }),
                security_context: options.run_as_user.map(|uid| SecurityContext {
                    run_as_user: Some(uid),
                    ..Default::default()
                }),
                volume_mounts: Some(vec![VolumeMount {
                    name: "module-builder".to_owned(),
                    mount_path: BUILDER_DIR.to_owned(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "module-builder".to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(name.to_owned()),
                    default_mode: Some(0o555),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Condition matching a pod that reached Running or a terminal phase
fn pod_settled() -> impl Condition<Pod> {
    |obj: Option<&Pod>| {
        matches!(
            pod_phase(obj).as_deref(),
            Some("Running" | "Succeeded" | "Failed")
        )
    }
}

fn pod_phase(pod: Option<&Pod>) -> Option<String> {
    pod.and_then(|pod| pod.status.as_ref())
        .and_then(|status| status.phase.clone())
}

/// Forward pod log lines to the logger while recording the tail
async fn follow_logs(pods: Api<Pod>, name: String, tail: Arc<Mutex<LogTail>>) {
    let params = LogParams {
        follow: true,
        ..Default::default()
    };
    let stream = match pods.log_stream(&name, &params).await {
        Ok(stream) => stream,
        Err(error) => {
            debug!(pod = %name, %error, "log stream unavailable");
            return;
        }
    };
    let mut lines = stream.lines();
    while let Ok(Some(line)) = lines.try_next().await {
        if !line.is_empty() {
            info!("{line}");
            if let Ok(mut tail) = tail.lock() {
                tail.push(&line);
            }
        }
    }
}

/// One-shot log tail for pods that never reached Running
async fn static_log_tail(pods: &Api<Pod>, name: &str) -> String {
    let params = LogParams {
        tail_lines: Some(super::LOG_TAIL_LINES as i64),
        ..Default::default()
    };
    match pods.logs(name, &params).await {
        Ok(logs) => logs,
        Err(error) => {
            debug!(pod = %name, %error, "pod logs unavailable");
            String::new()
        }
    }
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}
