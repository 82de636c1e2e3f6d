//! Command-line surface, config file, and option merging
//!
//! Option values are layered: a command-line flag beats its `DRIVERKIT_*`
//! environment variable, which beats the YAML config file, which beats the
//! built-in default. clap resolves the flag and environment layers;
//! [`Settings`] applies the config file and the defaults on top. Build
//! validation runs before any network or subprocess work.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::arch::Architecture;
use crate::build::Build;
use crate::images::{parse_gcc, ImageCatalog};
use crate::processor::docker::DockerProcessor;
use crate::processor::kubernetes::{KubernetesProcessor, PodOptions};
use crate::processor::local::{LocalOptions, LocalProcessor};
use crate::processor::BuildProcessor;
use crate::signals;
use crate::target::TargetId;
use crate::{Error, Result};

/// Top-level command line of the driverkit binary
#[derive(Debug, Parser)]
#[command(
    name = "driverkit",
    version,
    about = "Build the Falco kernel module and eBPF probe against arbitrary kernel releases",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    opts: RootOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build inside a container through the local container daemon
    Docker,

    /// Build inside a Kubernetes pod, connecting from outside the cluster
    #[command(alias = "k8s")]
    Kubernetes(ClusterArgs),

    /// Build inside a Kubernetes pod, connecting from within the cluster
    #[command(alias = "k8s-ic")]
    KubernetesInCluster(ClusterArgs),

    /// Build directly on this machine
    Local(LocalArgs),

    /// List the builder images available for the selected architecture
    Images,

    /// Print a shell completion script
    Completion {
        /// Shell dialect to emit
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

/// Flags shared by every subcommand
///
/// All of them are also readable from `DRIVERKIT_*` environment variables
/// and from the config file; fields are optional here so the later layers
/// can tell "unset" from "set to the default".
#[derive(Debug, Args)]
struct RootOpts {
    /// Path the kernel module is written to
    #[arg(long, env = "DRIVERKIT_OUTPUT_MODULE", global = true, value_name = "PATH")]
    output_module: Option<PathBuf>,

    /// Path the eBPF probe is written to
    #[arg(long, env = "DRIVERKIT_OUTPUT_PROBE", global = true, value_name = "PATH")]
    output_probe: Option<PathBuf>,

    /// Driver version to build, a git reference of the driver repository
    #[arg(
        long = "moduleversion",
        env = "DRIVERKIT_MODULEVERSION",
        global = true,
        value_name = "REF"
    )]
    module_version: Option<String>,

    /// Target-specific secondary kernel version (the Ubuntu ABI number, for example)
    #[arg(
        long = "kernelversion",
        env = "DRIVERKIT_KERNELVERSION",
        global = true,
        value_name = "N"
    )]
    kernel_version: Option<String>,

    /// Kernel release to build for, as printed by uname -r on the target machine
    #[arg(
        long = "kernelrelease",
        env = "DRIVERKIT_KERNELRELEASE",
        global = true,
        value_name = "RELEASE"
    )]
    kernel_release: Option<String>,

    /// Distribution the kernel belongs to
    #[arg(long, env = "DRIVERKIT_TARGET", global = true, value_name = "TARGET")]
    target: Option<String>,

    /// Base64-encoded kernel configuration data
    #[arg(
        long = "kernelconfigdata",
        env = "DRIVERKIT_KERNELCONFIGDATA",
        global = true,
        value_name = "BASE64"
    )]
    kernel_config_data: Option<String>,

    /// Architecture to build for, amd64 or arm64
    #[arg(long, env = "DRIVERKIT_ARCHITECTURE", global = true, value_name = "ARCH")]
    architecture: Option<String>,

    /// GCC version the builder must use, bypassing the per-target default
    #[arg(
        long = "gccversion",
        env = "DRIVERKIT_GCCVERSION",
        global = true,
        value_name = "VERSION"
    )]
    gcc_version: Option<String>,

    /// Kernel headers URLs, bypassing target discovery
    #[arg(
        long = "kernelurls",
        env = "DRIVERKIT_KERNELURLS",
        global = true,
        value_delimiter = ',',
        value_name = "URLS"
    )]
    kernel_urls: Vec<String>,

    /// Builder image to use, bypassing the image catalog
    #[arg(
        long = "builderimage",
        env = "DRIVERKIT_BUILDERIMAGE",
        global = true,
        value_name = "IMAGE"
    )]
    builder_image: Option<String>,

    /// Builder image index, a local path or URL; repeatable, searched in order
    #[arg(
        long = "builderrepo",
        env = "DRIVERKIT_BUILDERREPO",
        global = true,
        value_delimiter = ',',
        value_name = "REPO"
    )]
    builder_repos: Vec<String>,

    /// GitHub organization the driver sources are fetched from
    #[arg(long, env = "DRIVERKIT_REPO_ORG", global = true, value_name = "ORG")]
    repo_org: Option<String>,

    /// GitHub repository the driver sources are fetched from
    #[arg(long, env = "DRIVERKIT_REPO_NAME", global = true, value_name = "NAME")]
    repo_name: Option<String>,

    /// Kernel module name, also the .ko base name
    #[arg(
        long = "moduledrivername",
        env = "DRIVERKIT_MODULEDRIVERNAME",
        global = true,
        value_name = "NAME"
    )]
    module_driver_name: Option<String>,

    /// Device name the driver registers
    #[arg(
        long = "moduledevicename",
        env = "DRIVERKIT_MODULEDEVICENAME",
        global = true,
        value_name = "NAME"
    )]
    module_device_name: Option<String>,

    /// Proxy for headers probing and index downloads
    #[arg(long, env = "DRIVERKIT_PROXY", global = true, value_name = "URL")]
    proxy: Option<String>,

    /// Build timeout in seconds
    #[arg(
        short = 't',
        long,
        env = "DRIVERKIT_TIMEOUT",
        global = true,
        value_name = "SECONDS"
    )]
    timeout: Option<u64>,

    /// Log level: trace, debug, info, warn, or error
    #[arg(
        short = 'l',
        long = "loglevel",
        env = "DRIVERKIT_LOGLEVEL",
        global = true,
        value_name = "LEVEL"
    )]
    log_level: Option<String>,

    /// Config file path, ~/.driverkit.yaml by default when present
    #[arg(
        short = 'c',
        long,
        env = "DRIVERKIT_CONFIG",
        global = true,
        value_name = "PATH"
    )]
    config: Option<PathBuf>,
}

/// Flags of the two cluster subcommands
#[derive(Debug, Args)]
struct ClusterArgs {
    /// Namespace the builder pod and its configmap are created in
    #[arg(long, env = "DRIVERKIT_NAMESPACE", default_value = "default")]
    namespace: String,

    /// UID the builder container runs as
    #[arg(long, env = "DRIVERKIT_RUN_AS_USER", value_name = "UID")]
    run_as_user: Option<i64>,

    /// Image pull secret for the builder pod
    #[arg(long, env = "DRIVERKIT_IMAGE_PULL_SECRET", value_name = "NAME")]
    image_pull_secret: Option<String>,
}

impl ClusterArgs {
    fn pod_options(&self) -> PodOptions {
        PodOptions {
            namespace: self.namespace.clone(),
            run_as_user: self.run_as_user,
            image_pull_secret: self.image_pull_secret.clone(),
        }
    }
}

/// Flags of the local subcommand
#[derive(Debug, Args)]
struct LocalArgs {
    /// Build the kernel module through DKMS
    #[arg(long, env = "DRIVERKIT_DKMS")]
    dkms: bool,

    /// Download and extract the kernel headers before building
    #[arg(long, env = "DRIVERKIT_DOWNLOAD_HEADERS")]
    download_headers: bool,

    /// Existing driver source directory, skipping the source download
    #[arg(long, env = "DRIVERKIT_SRC_DIR", value_name = "DIR")]
    src_dir: Option<PathBuf>,

    /// KEY=VALUE pair overlaid on the build script environment; repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_entry)]
    env: Vec<(String, String)>,
}

impl LocalArgs {
    fn local_options(self) -> LocalOptions {
        LocalOptions {
            use_dkms: self.dkms,
            download_headers: self.download_headers,
            src_dir: self.src_dir,
            env: self.env,
        }
    }
}

/// Shell dialects the completion subcommand can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

impl From<CompletionShell> for clap_complete::Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => clap_complete::Shell::Bash,
            CompletionShell::Zsh => clap_complete::Shell::Zsh,
            CompletionShell::Fish => clap_complete::Shell::Fish,
        }
    }
}

fn parse_env_entry(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

impl Cli {
    /// Resolve the layered settings for this invocation
    ///
    /// Reads the config file named by `--config` (or `~/.driverkit.yaml`
    /// when it exists) and fills every option the command line and the
    /// environment left unset, then applies the built-in defaults.
    pub fn settings(&self) -> Result<Settings> {
        let file = FileConfig::load(self.opts.config.as_deref())?;
        self.opts.layered(file)
    }

    /// Execute the selected subcommand
    pub async fn run(self, settings: Settings) -> Result<()> {
        match self.command {
            Command::Docker => {
                let BuildContext { build, timeout, http } = settings.build_context()?;
                let catalog = settings.catalog(&http).await;
                let processor =
                    DockerProcessor::new(catalog, http, timeout, signals::cancellation_token());
                start_build(&processor, &build).await
            }
            Command::Kubernetes(args) => {
                let BuildContext { build, timeout, http } = settings.build_context()?;
                let client = kube_client_external().await?;
                let catalog = settings.catalog(&http).await;
                let processor = KubernetesProcessor::new(
                    client,
                    catalog,
                    http,
                    args.pod_options(),
                    timeout,
                    signals::cancellation_token(),
                );
                start_build(&processor, &build).await
            }
            Command::KubernetesInCluster(args) => {
                let BuildContext { build, timeout, http } = settings.build_context()?;
                let client = kube_client_in_cluster()?;
                let catalog = settings.catalog(&http).await;
                let processor = KubernetesProcessor::new(
                    client,
                    catalog,
                    http,
                    args.pod_options(),
                    timeout,
                    signals::cancellation_token(),
                );
                start_build(&processor, &build).await
            }
            Command::Local(args) => {
                let BuildContext { build, timeout, http } = settings.build_context()?;
                let processor = LocalProcessor::new(
                    http,
                    args.local_options(),
                    timeout,
                    signals::cancellation_token(),
                );
                start_build(&processor, &build).await
            }
            Command::Images => {
                let http = settings.http_client()?;
                let catalog =
                    ImageCatalog::load(&settings.builder_repos, settings.architecture, &http).await;
                print!("{}", images_table(&catalog));
                Ok(())
            }
            Command::Completion { shell } => {
                let mut command = Cli::command();
                clap_complete::generate(
                    clap_complete::Shell::from(shell),
                    &mut command,
                    "driverkit",
                    &mut io::stdout(),
                );
                Ok(())
            }
        }
    }
}

async fn start_build(processor: &dyn BuildProcessor, build: &Build) -> Result<()> {
    tracing::info!(
        processor = processor.name(),
        target = %build.target,
        kernel_release = %build.kernel_release,
        architecture = %build.architecture,
        driver_version = %build.driver_version,
        "starting build"
    );
    processor.start(build).await?;
    tracing::info!("build completed");
    Ok(())
}

async fn kube_client_external() -> Result<kube::Client> {
    let config = kube::Config::infer()
        .await
        .map_err(|err| Error::validation(format!("kubernetes configuration: {err}")))?;
    Ok(kube::Client::try_from(config)?)
}

fn kube_client_in_cluster() -> Result<kube::Client> {
    let config = kube::Config::incluster()
        .map_err(|err| Error::validation(format!("in-cluster kubernetes configuration: {err}")))?;
    Ok(kube::Client::try_from(config)?)
}

fn images_table(catalog: &ImageCatalog) -> String {
    let mut table = format!("{:<18} {:<10} {}\n", "TARGET", "GCC", "IMAGE");
    for image in catalog.iter() {
        table.push_str(&format!(
            "{:<18} {:<10} {}\n",
            image.target.name(),
            image.gcc_version.to_string(),
            image.name
        ));
    }
    table
}

/// Option values after layering flags, environment, config file, and defaults
///
/// Produced by [`Cli::settings`]; the subcommands consume everything from
/// here rather than from the raw flags.
#[derive(Debug, Clone)]
pub struct Settings {
    output_module: Option<PathBuf>,
    output_probe: Option<PathBuf>,
    module_version: String,
    kernel_version: String,
    kernel_release: Option<String>,
    target: Option<String>,
    kernel_config_data: String,
    architecture: Architecture,
    gcc_version: Option<String>,
    kernel_urls: Vec<String>,
    builder_image: Option<String>,
    builder_repos: Vec<String>,
    repo_org: String,
    repo_name: String,
    module_driver_name: String,
    module_device_name: String,
    proxy: Option<String>,
    timeout_seconds: u64,
    log_level: String,
}

/// Everything a build subcommand needs beyond its own flags
struct BuildContext {
    build: Build,
    timeout: Duration,
    http: reqwest::Client,
}

impl Settings {
    /// The resolved log level, consumed by the tracing setup in `main`
    pub fn loglevel(&self) -> &str {
        &self.log_level
    }

    fn timeout(&self) -> Result<Duration> {
        if self.timeout_seconds < crate::MINIMUM_TIMEOUT_SECONDS {
            return Err(Error::validation(format!(
                "timeout {}s is below the {}s minimum",
                self.timeout_seconds,
                crate::MINIMUM_TIMEOUT_SECONDS
            )));
        }
        Ok(Duration::from_secs(self.timeout_seconds))
    }

    fn build_request(&self) -> Result<Build> {
        let target: TargetId = self
            .target
            .as_deref()
            .ok_or_else(|| Error::validation("target is required for a build"))?
            .parse()?;
        let kernel_release = self
            .kernel_release
            .clone()
            .ok_or_else(|| Error::validation("kernelrelease is required for a build"))?;
        let gcc_version = match self.gcc_version.as_deref() {
            Some(raw) => Some(
                parse_gcc(raw)
                    .ok_or_else(|| Error::validation(format!("invalid gcc version: {raw}")))?,
            ),
            None => None,
        };
        Ok(Build {
            target,
            kernel_release,
            kernel_version: self.kernel_version.clone(),
            kernel_config_data: self.kernel_config_data.clone(),
            architecture: self.architecture,
            driver_version: self.module_version.clone(),
            module_file_path: self.output_module.clone(),
            probe_file_path: self.output_probe.clone(),
            module_driver_name: self.module_driver_name.clone(),
            module_device_name: self.module_device_name.clone(),
            custom_builder_image: self.builder_image.clone(),
            kernel_urls: self.kernel_urls.clone(),
            gcc_version,
            repo_org: self.repo_org.clone(),
            repo_name: self.repo_name.clone(),
        })
    }

    fn build_context(&self) -> Result<BuildContext> {
        let build = self.build_request()?;
        build.validate()?;
        Ok(BuildContext {
            build,
            timeout: self.timeout()?,
            http: self.http_client()?,
        })
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(url) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(url.as_str())?);
        }
        Ok(builder.build()?)
    }

    /// The image catalog for this invocation; `--builderimage` short-circuits
    /// selection, so no index is fetched then
    async fn catalog(&self, http: &reqwest::Client) -> ImageCatalog {
        if self.builder_image.is_some() {
            return ImageCatalog::empty();
        }
        ImageCatalog::load(&self.builder_repos, self.architecture, http).await
    }
}

/// Config file fields; keys are the long flag names
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(rename = "output-module")]
    output_module: Option<PathBuf>,
    #[serde(rename = "output-probe")]
    output_probe: Option<PathBuf>,
    #[serde(rename = "moduleversion")]
    module_version: Option<String>,
    #[serde(rename = "kernelversion")]
    kernel_version: Option<String>,
    #[serde(rename = "kernelrelease")]
    kernel_release: Option<String>,
    target: Option<String>,
    #[serde(rename = "kernelconfigdata")]
    kernel_config_data: Option<String>,
    architecture: Option<String>,
    #[serde(rename = "gccversion")]
    gcc_version: Option<String>,
    #[serde(rename = "kernelurls")]
    kernel_urls: Vec<String>,
    #[serde(rename = "builderimage")]
    builder_image: Option<String>,
    #[serde(rename = "builderrepo")]
    builder_repos: Vec<String>,
    #[serde(rename = "repo-org")]
    repo_org: Option<String>,
    #[serde(rename = "repo-name")]
    repo_name: Option<String>,
    #[serde(rename = "moduledrivername")]
    module_driver_name: Option<String>,
    #[serde(rename = "moduledevicename")]
    module_device_name: Option<String>,
    proxy: Option<String>,
    timeout: Option<u64>,
    #[serde(rename = "loglevel")]
    log_level: Option<String>,
}

impl FileConfig {
    /// Read the named config file, or the default one, or nothing
    ///
    /// An explicit `--config` path must be readable; the default path is
    /// only consulted when it exists.
    fn load(explicit: Option<&Path>) -> Result<FileConfig> {
        let path = match explicit {
            Some(path) => path.to_owned(),
            None => match dirs::home_dir().map(|home| home.join(".driverkit.yaml")) {
                Some(path) if path.is_file() => path,
                _ => return Ok(FileConfig::default()),
            },
        };
        let text = std::fs::read_to_string(&path).map_err(|err| {
            Error::validation(format!("cannot read config file {}: {err}", path.display()))
        })?;
        serde_yaml::from_str(&text)
            .map_err(|err| Error::serialization(format!("config file {}: {err}", path.display())))
    }
}

impl RootOpts {
    fn layered(&self, file: FileConfig) -> Result<Settings> {
        let architecture = match self.architecture.clone().or(file.architecture) {
            Some(spelled) => spelled.parse::<Architecture>()?,
            None => Architecture::host(),
        };
        let builder_repos = {
            let repos = first_non_empty(self.builder_repos.clone(), file.builder_repos);
            if repos.is_empty() {
                vec![crate::DEFAULT_IMAGE_INDEX_URL.to_owned()]
            } else {
                repos
            }
        };
        Ok(Settings {
            output_module: self.output_module.clone().or(file.output_module),
            output_probe: self.output_probe.clone().or(file.output_probe),
            module_version: self
                .module_version
                .clone()
                .or(file.module_version)
                .unwrap_or_else(|| crate::DEFAULT_DRIVER_VERSION.to_owned()),
            kernel_version: self
                .kernel_version
                .clone()
                .or(file.kernel_version)
                .unwrap_or_else(|| crate::DEFAULT_KERNEL_VERSION.to_owned()),
            kernel_release: self.kernel_release.clone().or(file.kernel_release),
            target: self.target.clone().or(file.target),
            kernel_config_data: self
                .kernel_config_data
                .clone()
                .or(file.kernel_config_data)
                .unwrap_or_default(),
            architecture,
            gcc_version: self.gcc_version.clone().or(file.gcc_version),
            kernel_urls: first_non_empty(self.kernel_urls.clone(), file.kernel_urls),
            builder_image: self.builder_image.clone().or(file.builder_image),
            builder_repos,
            repo_org: self
                .repo_org
                .clone()
                .or(file.repo_org)
                .unwrap_or_else(|| crate::DEFAULT_DRIVER_REPO_ORG.to_owned()),
            repo_name: self
                .repo_name
                .clone()
                .or(file.repo_name)
                .unwrap_or_else(|| crate::DEFAULT_DRIVER_REPO_NAME.to_owned()),
            module_driver_name: self
                .module_driver_name
                .clone()
                .or(file.module_driver_name)
                .unwrap_or_else(|| crate::DEFAULT_MODULE_DRIVER_NAME.to_owned()),
            module_device_name: self
                .module_device_name
                .clone()
                .or(file.module_device_name)
                .unwrap_or_else(|| crate::DEFAULT_MODULE_DEVICE_NAME.to_owned()),
            proxy: self.proxy.clone().or(file.proxy),
            timeout_seconds: self.timeout.or(file.timeout).unwrap_or(crate::DEFAULT_TIMEOUT_SECONDS),
            log_level: self
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_owned()),
        })
    }
}

// A list flag is either given (possibly several times) or absent; absent
// falls through to the config file.
fn first_non_empty(flag: Vec<String>, file: Vec<String>) -> Vec<String> {
    if flag.is_empty() {
        file
    } else {
        flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use semver::Version;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    // Settings resolved without touching the real home directory.
    fn bare_settings(args: &[&str]) -> Settings {
        parse(args).opts.layered(FileConfig::default()).unwrap()
    }

    #[test]
    fn global_flags_parse_before_and_after_the_subcommand() {
        let before = parse(&["driverkit", "--kernelrelease", "5.10.0", "docker"]);
        let after = parse(&["driverkit", "docker", "--kernelrelease", "5.10.0"]);
        assert_eq!(before.opts.kernel_release.as_deref(), Some("5.10.0"));
        assert_eq!(after.opts.kernel_release.as_deref(), Some("5.10.0"));
    }

    #[test]
    fn subcommand_aliases_resolve_to_the_cluster_processors() {
        let cli = parse(&["driverkit", "k8s"]);
        assert!(matches!(cli.command, Command::Kubernetes(_)));

        let cli = parse(&["driverkit", "k8s-ic"]);
        assert!(matches!(cli.command, Command::KubernetesInCluster(_)));

        let cli = parse(&["driverkit", "kubernetes-in-cluster"]);
        assert!(matches!(cli.command, Command::KubernetesInCluster(_)));
    }

    #[test]
    fn cluster_flags_map_onto_pod_options() {
        let cli = parse(&[
            "driverkit",
            "kubernetes",
            "--namespace",
            "builders",
            "--run-as-user",
            "1000",
            "--image-pull-secret",
            "regcred",
        ]);
        let Command::Kubernetes(args) = cli.command else {
            panic!("expected the kubernetes subcommand");
        };
        let options = args.pod_options();
        assert_eq!(options.namespace, "builders");
        assert_eq!(options.run_as_user, Some(1000));
        assert_eq!(options.image_pull_secret.as_deref(), Some("regcred"));

        // Namespace falls back without any flag.
        let cli = parse(&["driverkit", "kubernetes"]);
        let Command::Kubernetes(args) = cli.command else {
            panic!("expected the kubernetes subcommand");
        };
        assert_eq!(args.pod_options().namespace, "default");
    }

    #[test]
    fn local_flags_map_onto_local_options() {
        let cli = parse(&[
            "driverkit",
            "local",
            "--dkms",
            "--download-headers",
            "--src-dir",
            "/src/libs",
            "--env",
            "KBUILD_EXTRA_CFLAGS=-g",
            "--env",
            "HTTPS_PROXY=http://proxy:3128",
        ]);
        let Command::Local(args) = cli.command else {
            panic!("expected the local subcommand");
        };
        let options = args.local_options();
        assert!(options.use_dkms);
        assert!(options.download_headers);
        assert_eq!(options.src_dir.as_deref(), Some(Path::new("/src/libs")));
        assert_eq!(
            options.env,
            vec![
                ("KBUILD_EXTRA_CFLAGS".to_owned(), "-g".to_owned()),
                ("HTTPS_PROXY".to_owned(), "http://proxy:3128".to_owned()),
            ]
        );
    }

    #[test]
    fn env_entries_must_be_key_value_pairs() {
        assert_eq!(
            parse_env_entry("FOO=bar").unwrap(),
            ("FOO".to_owned(), "bar".to_owned())
        );
        // Only the first equals sign splits.
        assert_eq!(
            parse_env_entry("FOO=a=b").unwrap(),
            ("FOO".to_owned(), "a=b".to_owned())
        );
        assert!(parse_env_entry("FOO").is_err());
        assert!(parse_env_entry("=value").is_err());
        assert!(Cli::try_parse_from(["driverkit", "local", "--env", "broken"]).is_err());
    }

    #[test]
    fn defaults_fill_everything_the_user_left_unset() {
        let settings = bare_settings(&["driverkit", "images"]);
        assert_eq!(settings.module_version, "master");
        assert_eq!(settings.kernel_version, "1");
        assert_eq!(settings.repo_org, "falcosecurity");
        assert_eq!(settings.repo_name, "libs");
        assert_eq!(settings.module_driver_name, "falco");
        assert_eq!(settings.module_device_name, "falco");
        assert_eq!(settings.architecture, Architecture::host());
        assert_eq!(settings.builder_repos, vec![crate::DEFAULT_IMAGE_INDEX_URL]);
        assert_eq!(settings.timeout_seconds, crate::DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(settings.loglevel(), "info");
        assert!(settings.kernel_release.is_none());
        assert!(settings.builder_image.is_none());
        assert!(settings.kernel_urls.is_empty());
    }

    #[test]
    fn config_file_fills_only_what_flags_left_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driverkit.yaml");
        std::fs::write(
            &path,
            r#"
kernelrelease: 5.10.0
target: centos
timeout: 90
output-module: /tmp/from-file.ko
"#,
        )
        .unwrap();

        let cli = parse(&[
            "driverkit",
            "docker",
            "--config",
            path.to_str().unwrap(),
            "--kernelrelease",
            "6.1.0-13-amd64",
        ]);
        let settings = cli.settings().unwrap();

        // The flag wins over the file; the file fills the rest.
        assert_eq!(settings.kernel_release.as_deref(), Some("6.1.0-13-amd64"));
        assert_eq!(settings.target.as_deref(), Some("centos"));
        assert_eq!(settings.timeout_seconds, 90);
        assert_eq!(
            settings.output_module.as_deref(),
            Some(Path::new("/tmp/from-file.ko"))
        );
    }

    #[test]
    fn explicit_config_file_must_be_readable() {
        let cli = parse(&["driverkit", "images", "--config", "/nonexistent/driverkit.yaml"]);
        let err = cli.settings().unwrap_err();
        assert!(err.to_string().contains("cannot read config file"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "kernelrelease: [not, a, string").unwrap();
        let cli = parse(&["driverkit", "images", "--config", path.to_str().unwrap()]);
        let err = cli.settings().unwrap_err();
        assert!(err.to_string().contains("config file"));
    }

    #[test]
    fn config_file_keys_are_the_long_flag_names() {
        let file: FileConfig = serde_yaml::from_str(
            r#"
output-module: /tmp/falco.ko
output-probe: /tmp/probe.o
moduleversion: 17f5df52a7d9ed6bb12d3b1768460def8439936d
kernelversion: "81"
kernelrelease: 4.15.0-72-generic
target: ubuntu
kernelconfigdata: Q09ORklHX0JQRj15Cg==
architecture: arm64
gccversion: "8"
kernelurls:
  - https://example.com/headers.deb
builderimage: registry.example.com/builder:pinned
builderrepo:
  - https://example.com/index.yaml
  - /etc/driverkit/index.yaml
repo-org: falcosecurity
repo-name: libs
moduledrivername: falco
moduledevicename: falco
proxy: http://proxy:3128
timeout: 300
loglevel: debug
"#,
        )
        .unwrap();

        assert_eq!(file.output_module.as_deref(), Some(Path::new("/tmp/falco.ko")));
        assert_eq!(file.output_probe.as_deref(), Some(Path::new("/tmp/probe.o")));
        assert_eq!(
            file.module_version.as_deref(),
            Some("17f5df52a7d9ed6bb12d3b1768460def8439936d")
        );
        assert_eq!(file.kernel_version.as_deref(), Some("81"));
        assert_eq!(file.kernel_release.as_deref(), Some("4.15.0-72-generic"));
        assert_eq!(file.target.as_deref(), Some("ubuntu"));
        assert_eq!(file.kernel_config_data.as_deref(), Some("Q09ORklHX0JQRj15Cg=="));
        assert_eq!(file.architecture.as_deref(), Some("arm64"));
        assert_eq!(file.gcc_version.as_deref(), Some("8"));
        assert_eq!(file.kernel_urls, vec!["https://example.com/headers.deb"]);
        assert_eq!(
            file.builder_image.as_deref(),
            Some("registry.example.com/builder:pinned")
        );
        assert_eq!(file.builder_repos.len(), 2);
        assert_eq!(file.proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(file.timeout, Some(300));
        assert_eq!(file.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn build_requests_require_a_target_and_a_release() {
        let settings = bare_settings(&["driverkit", "docker"]);
        let err = settings.build_request().unwrap_err();
        assert!(err.to_string().contains("target is required"));

        let settings = bare_settings(&["driverkit", "docker", "--target", "centos"]);
        let err = settings.build_request().unwrap_err();
        assert!(err.to_string().contains("kernelrelease is required"));
    }

    #[test]
    fn unknown_targets_and_gcc_versions_are_rejected() {
        let settings = bare_settings(&[
            "driverkit",
            "docker",
            "--target",
            "gentoo",
            "--kernelrelease",
            "5.10.0",
        ]);
        let err = settings.build_request().unwrap_err();
        assert_eq!(err.to_string(), "target not found: gentoo");

        let settings = bare_settings(&[
            "driverkit",
            "docker",
            "--target",
            "centos",
            "--kernelrelease",
            "5.10.0",
            "--gccversion",
            "not-a-version",
        ]);
        let err = settings.build_request().unwrap_err();
        assert!(err.to_string().contains("invalid gcc version"));
    }

    #[test]
    fn a_full_flag_set_reaches_the_build_request() {
        let settings = bare_settings(&[
            "driverkit",
            "docker",
            "--target",
            "ubuntu",
            "--kernelrelease",
            "4.15.0-72-generic",
            "--kernelversion",
            "81",
            "--architecture",
            "amd64",
            "--output-module",
            "/tmp/falco.ko",
            "--output-probe",
            "/tmp/probe.o",
            "--moduleversion",
            "master",
            "--gccversion",
            "8",
            "--builderimage",
            "registry.example.com/builder:pinned",
            "--moduledrivername",
            "falco",
            "--moduledevicename",
            "falco",
        ]);
        let build = settings.build_request().unwrap();
        assert_eq!(build.target, TargetId::Ubuntu);
        assert_eq!(build.kernel_release, "4.15.0-72-generic");
        assert_eq!(build.kernel_version, "81");
        assert_eq!(build.architecture, Architecture::Amd64);
        assert_eq!(build.module_file_path.as_deref(), Some(Path::new("/tmp/falco.ko")));
        assert_eq!(build.probe_file_path.as_deref(), Some(Path::new("/tmp/probe.o")));
        assert_eq!(build.gcc_version, Some(Version::new(8, 0, 0)));
        assert_eq!(
            build.custom_builder_image.as_deref(),
            Some("registry.example.com/builder:pinned")
        );
        build.validate().unwrap();
    }

    #[test]
    fn timeouts_below_the_minimum_are_rejected() {
        let settings = bare_settings(&["driverkit", "docker", "--timeout", "10"]);
        let err = settings.timeout().unwrap_err();
        assert!(err.to_string().contains("below the"));

        let settings = bare_settings(&["driverkit", "docker", "--timeout", "30"]);
        assert_eq!(settings.timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn kernel_urls_and_builder_repos_accept_commas_and_repeats() {
        let settings = bare_settings(&[
            "driverkit",
            "docker",
            "--kernelurls",
            "https://a.example/h.deb,https://b.example/h.deb",
            "--builderrepo",
            "https://first.example/index.yaml",
            "--builderrepo",
            "/etc/driverkit/index.yaml",
        ]);
        assert_eq!(
            settings.kernel_urls,
            vec!["https://a.example/h.deb", "https://b.example/h.deb"]
        );
        assert_eq!(
            settings.builder_repos,
            vec!["https://first.example/index.yaml", "/etc/driverkit/index.yaml"]
        );
    }

    #[test]
    fn completion_accepts_exactly_bash_zsh_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let cli = parse(&["driverkit", "completion", shell]);
            assert!(matches!(cli.command, Command::Completion { .. }));
        }
        assert!(Cli::try_parse_from(["driverkit", "completion", "powershell"]).is_err());
        assert!(Cli::try_parse_from(["driverkit", "completion"]).is_err());
    }

    #[test]
    fn images_table_renders_target_gcc_image_rows() {
        let catalog = ImageCatalog::parse(
            r#"
images:
  - name: docker.io/falcosecurity/driverkit-builder-centos
    target: centos
    gcc_versions: [4.8.5]
"#,
            Architecture::host(),
        );
        let table = images_table(&catalog);
        let mut lines = table.lines();
        assert!(lines.next().unwrap().starts_with("TARGET"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("centos"));
        assert!(row.contains("4.8.5"));
        assert!(row.ends_with("docker.io/falcosecurity/driverkit-builder-centos:latest"));
        assert!(lines.next().is_none());
    }

    #[tokio::test]
    async fn the_builder_image_override_skips_index_fetching() {
        let settings = bare_settings(&[
            "driverkit",
            "docker",
            "--builderimage",
            "registry.example.com/builder:pinned",
            // An unloadable index proves nothing is fetched.
            "--builderrepo",
            "/nonexistent/index.yaml",
        ]);
        let client = reqwest::Client::new();
        let catalog = settings.catalog(&client).await;
        assert!(catalog.is_empty());
    }
}
