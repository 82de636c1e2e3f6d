//! Build script generation from per-target templates
//!
//! A build script is a self-contained bash program: it fetches the driver
//! sources, obtains kernel headers the way its distribution publishes them,
//! and compiles the requested artifacts at fixed paths. The generator picks
//! the target's template asset, assembles the data record, and renders —
//! everything distribution-specific lives in the [`crate::target`] modules
//! and the assets, nothing here branches on the target.

use std::sync::OnceLock;

use minijinja::{Environment, UndefinedBehavior};
use semver::Version;
use serde::Serialize;

use crate::build::{Build, Config};
use crate::images::ImageCatalog;
use crate::kernelrelease::KernelRelease;
use crate::resolver::UrlResolver;
use crate::target::{self, Target};
use crate::{Error, Result};

/// Directory the driver sources are unpacked and compiled in
pub const DRIVER_BUILD_DIR: &str = "/tmp/driver";

/// Directory the finished kernel module is moved to
pub const MODULE_OUTPUT_DIR: &str = "/tmp/module";

/// Path of the compiled eBPF probe inside the build environment
pub const PROBE_FULL_PATH: &str = "/tmp/driver/bpf/probe.o";

/// Path of the compiled kernel module inside the build environment
pub fn module_full_path(driver_name: &str) -> String {
    format!("{MODULE_OUTPUT_DIR}/{driver_name}.ko")
}

/// Template assets, keyed by the names targets return from
/// [`Target::template_script`]
const ASSETS: &[(&str, &str)] = &[
    ("vanilla.sh", include_str!("assets/vanilla.sh")),
    ("rpm.sh", include_str!("assets/rpm.sh")),
    ("ubuntu.sh", include_str!("assets/ubuntu.sh")),
    ("debian.sh", include_str!("assets/debian.sh")),
    ("archlinux.sh", include_str!("assets/archlinux.sh")),
    ("flatcar.sh", include_str!("assets/flatcar.sh")),
    ("opensuse.sh", include_str!("assets/opensuse.sh")),
    ("redhat.sh", include_str!("assets/redhat.sh")),
    ("sles.sh", include_str!("assets/sles.sh")),
    ("local.sh", include_str!("assets/local.sh")),
    ("module-Makefile", include_str!("assets/module-Makefile")),
    ("module-driver-config.h", include_str!("assets/module-driver-config.h")),
];

fn environment() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        // A template referencing a field the data record does not carry is
        // a bug in a target, not a runtime condition.
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for (name, source) in ASSETS {
            env.add_template(name, source)
                .expect("embedded template parses");
        }
        env
    })
}

/// The preamble every target template sees, merged under the per-target record
#[derive(Debug, Clone, Serialize)]
pub struct CommonTemplateData {
    /// Directory the driver sources are unpacked and compiled in
    pub driver_build_dir: String,
    /// Full URL of the driver source archive
    pub module_download_url: String,
    /// Kernel module name, also the `.ko` base name
    pub module_driver_name: String,
    /// Path the compiled module is moved to inside the build environment
    pub module_full_path: String,
    /// Path the compiled probe ends up at inside the build environment
    pub probe_full_path: String,
    /// Whether the kernel module artifact was requested
    pub build_module: bool,
    /// Whether the eBPF probe artifact was requested
    pub build_probe: bool,
    /// Effective GCC version, full semver
    pub gcc_version: String,
    /// Compiler command: `gcc` inside builders, an absolute path locally
    pub gcc_bin: String,
    /// LLVM/clang major for eBPF builds
    pub llvm_version: String,
    /// Architecture in kernel spelling (`x86_64` / `aarch64`)
    pub arch: String,
    /// The kernel release string as the target machine reports it
    pub kernel_release: String,
    /// Git reference of the driver sources
    pub driver_version: String,
    /// Directory the processor staged the ancillary files in
    pub module_builder_dir: String,
}

impl CommonTemplateData {
    /// Assemble the preamble for one build
    pub fn new(
        build: &Build,
        kr: &KernelRelease,
        gcc_version: &Version,
        gcc_bin: impl Into<String>,
        module_builder_dir: impl Into<String>,
    ) -> Self {
        let cfg = Config::from(build);
        CommonTemplateData {
            driver_build_dir: DRIVER_BUILD_DIR.to_owned(),
            module_download_url: cfg.module_download_url(),
            module_driver_name: build.module_driver_name.clone(),
            module_full_path: module_full_path(&build.module_driver_name),
            probe_full_path: PROBE_FULL_PATH.to_owned(),
            build_module: build.has_module(),
            build_probe: build.has_probe(),
            gcc_version: gcc_version.to_string(),
            gcc_bin: gcc_bin.into(),
            llvm_version: target::llvm_version(kr).to_owned(),
            arch: build.architecture.to_non_deb().to_owned(),
            kernel_release: build.kernel_release.clone(),
            driver_version: build.driver_version.clone(),
            module_builder_dir: module_builder_dir.into(),
        }
    }
}

/// Everything a container-based processor needs to run one build
#[derive(Debug)]
pub struct GeneratedScript {
    /// The rendered build script
    pub script: String,
    /// Builder image reference to execute it in
    pub builder_image: String,
    /// Effective GCC version the image was picked for
    pub gcc_version: Version,
    /// Container network mode override from the target
    pub network_mode: Option<&'static str>,
    /// The parsed kernel release
    pub kernel_release: KernelRelease,
}

/// The user's GCC override, then the target's, then the global default
pub async fn effective_gcc(
    build: &Build,
    target: &dyn Target,
    kr: &KernelRelease,
    client: &reqwest::Client,
) -> Version {
    if let Some(gcc) = &build.gcc_version {
        return gcc.clone();
    }
    if let Some(gcc) = target.gcc_version(kr, client).await {
        return gcc;
    }
    target::default_gcc(kr)
}

/// Candidate URLs from the user override or the target, resolved and
/// checked against the target's minimum
pub async fn resolved_urls(
    build: &Build,
    target: &dyn Target,
    kr: &KernelRelease,
    client: &reqwest::Client,
) -> Result<Vec<String>> {
    let cfg = Config::from(build);
    let candidates = if build.kernel_urls.is_empty() {
        target.urls(&cfg, kr, client).await?
    } else {
        build.kernel_urls.clone()
    };
    UrlResolver::new(client)
        .resolve_with_minimum(
            &candidates,
            target.minimum_urls(),
            target.name(),
            &build.kernel_release,
        )
        .await
}

/// Generate the build script and pick the builder image for one build
///
/// Validation runs first: an artifact the kernel cannot carry fails the
/// request before any network work. `module_builder_dir` is where the
/// calling processor will stage `kernel.config`, `module-Makefile`, and
/// `module-driver-config.h` next to the script.
pub async fn generate(
    build: &Build,
    catalog: &ImageCatalog,
    module_builder_dir: &str,
    client: &reqwest::Client,
) -> Result<GeneratedScript> {
    let kr = build.validate()?;
    let target = target::by_id(build.target);

    let urls = resolved_urls(build, target, &kr, client).await?;
    let gcc_version = effective_gcc(build, target, &kr, client).await;

    let builder_image = match &build.custom_builder_image {
        Some(image) => image.clone(),
        None => catalog.pick(build.target, &gcc_version)?.name.clone(),
    };

    let common = CommonTemplateData::new(build, &kr, &gcc_version, "gcc", module_builder_dir);
    let cfg = Config::from(build);
    let specific = target.template_data(&cfg, &kr, &urls)?;
    let script = render(target.template_script(), &common, specific)?;

    tracing::debug!(
        target = %target.name(),
        image = %builder_image,
        gcc = %gcc_version,
        urls = urls.len(),
        "build script generated"
    );

    Ok(GeneratedScript {
        script,
        builder_image,
        gcc_version,
        network_mode: target.builder_image_net_mode(),
        kernel_release: kr,
    })
}

/// Render a named asset against the common record merged with a
/// target-specific one; specific fields shadow common ones
pub fn render(
    asset: &str,
    common: &CommonTemplateData,
    specific: serde_json::Value,
) -> Result<String> {
    let mut context = serde_json::to_value(common)
        .map_err(|err| Error::serialization(format!("template data: {err}")))?;
    if let (serde_json::Value::Object(base), serde_json::Value::Object(extra)) =
        (&mut context, specific)
    {
        base.extend(extra);
    }
    let template = environment().get_template(asset)?;
    Ok(template.render(minijinja::Value::from_serialize(&context))?)
}

/// Render the kernel-module Makefile shipped next to the driver sources
pub fn module_makefile(build: &Build) -> Result<String> {
    let template = environment().get_template("module-Makefile")?;
    Ok(template.render(minijinja::context! {
        module_driver_name => build.module_driver_name,
    })?)
}

/// Render the `driver_config.h` header shipped next to the driver sources
///
/// Carries the version/name/device macros; the PPM API and schema macro
/// blocks are appended by the build script from the `API_VERSION` and
/// `SCHEMA_VERSION` files of the extracted source archive.
pub fn driver_config_header(build: &Build) -> Result<String> {
    let template = environment().get_template("module-driver-config.h")?;
    Ok(template.render(minijinja::context! {
        driver_version => build.driver_version,
        driver_name => build.module_driver_name,
        device_name => build.module_device_name,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::target::TargetId;
    use std::path::PathBuf;

    fn vanilla_build(server_url: &str) -> Build {
        Build {
            target: TargetId::Vanilla,
            kernel_release: "5.10.0".to_owned(),
            architecture: Architecture::Amd64,
            module_file_path: Some(PathBuf::from("/tmp/falco.ko")),
            probe_file_path: Some(PathBuf::from("/tmp/probe.o")),
            kernel_urls: vec![format!("{server_url}/linux-5.10.tar.xz")],
            custom_builder_image: Some("docker.io/example/builder:latest".to_owned()),
            ..Build::default()
        }
    }

    async fn tarball_server() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/linux-5.10.tar.xz")
            .with_status(200)
            .expect_at_least(1)
            .create_async()
            .await;
        server
    }

    // ==========================================================================
    // Generation pipeline
    // ==========================================================================

    #[tokio::test]
    async fn generation_is_deterministic_for_fixed_inputs() {
        let server = tarball_server().await;
        let build = vanilla_build(&server.url());
        let catalog = ImageCatalog::empty();
        let client = reqwest::Client::new();

        let first = generate(&build, &catalog, "/driverkit", &client).await.unwrap();
        let second = generate(&build, &catalog, "/driverkit", &client).await.unwrap();
        assert_eq!(first.script, second.script);
        assert!(!first.script.is_empty());
    }

    #[tokio::test]
    async fn generated_script_references_the_resolved_url_and_paths() {
        let server = tarball_server().await;
        let build = vanilla_build(&server.url());
        let catalog = ImageCatalog::empty();
        let client = reqwest::Client::new();

        let generated = generate(&build, &catalog, "/driverkit", &client).await.unwrap();
        assert!(generated.script.contains(&format!("{}/linux-5.10.tar.xz", server.url())));
        assert!(generated.script.contains("/tmp/driver"));
        assert!(generated.script.contains("/tmp/module/falco.ko"));
        assert!(generated.script.contains("/driverkit/module-Makefile"));
        assert_eq!(generated.builder_image, "docker.io/example/builder:latest");
        assert_eq!(generated.network_mode, None);
    }

    #[tokio::test]
    async fn skipped_artifacts_are_absent_from_the_script() {
        let server = tarball_server().await;
        let mut build = vanilla_build(&server.url());
        build.probe_file_path = None;
        let catalog = ImageCatalog::empty();
        let client = reqwest::Client::new();

        let generated = generate(&build, &catalog, "/driverkit", &client).await.unwrap();
        assert!(generated.script.contains("/tmp/module/falco.ko"));
        assert!(!generated.script.contains("probe.o"));
    }

    #[tokio::test]
    async fn unsupported_module_fails_before_any_network_work() {
        // The kernel URL points nowhere routable; validation must reject the
        // request before the resolver would ever probe it.
        let build = Build {
            target: TargetId::Vanilla,
            kernel_release: "2.5.0".to_owned(),
            architecture: Architecture::Amd64,
            module_file_path: Some(PathBuf::from("/tmp/falco.ko")),
            kernel_urls: vec!["http://127.0.0.1:9/never-touched".to_owned()],
            ..Build::default()
        };
        let catalog = ImageCatalog::empty();
        let client = reqwest::Client::new();

        let err = generate(&build, &catalog, "/driverkit", &client).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("kernel module not supported"));
    }

    #[tokio::test]
    async fn catalog_miss_surfaces_no_builder_image() {
        let server = tarball_server().await;
        let mut build = vanilla_build(&server.url());
        build.custom_builder_image = None;
        build.gcc_version = Some(Version::new(10, 0, 0));
        let catalog = ImageCatalog::empty();
        let client = reqwest::Client::new();

        let err = generate(&build, &catalog, "/driverkit", &client).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "no builder image for target vanilla gcc 10.0.0"
        );
    }

    // ==========================================================================
    // Ancillary templates
    // ==========================================================================

    #[test]
    fn makefile_builds_the_named_module() {
        let makefile = module_makefile(&Build::default()).unwrap();
        assert!(makefile.contains("obj-m += falco.o"));
        assert!(makefile.contains("falco-y +="));
        assert!(makefile.contains("KERNELDIR"));
    }

    #[test]
    fn driver_config_header_carries_the_identity_macros() {
        let build = Build {
            driver_version: "a1b2c3".to_owned(),
            module_driver_name: "falco".to_owned(),
            module_device_name: "falco0".to_owned(),
            ..Build::default()
        };
        let header = driver_config_header(&build).unwrap();
        assert!(header.contains(r#"#define DRIVER_VERSION "a1b2c3""#));
        assert!(header.contains(r#"#define DRIVER_NAME "falco""#));
        assert!(header.contains(r#"#define DRIVER_DEVICE_NAME "falco0""#));
    }

    #[test]
    fn specific_fields_shadow_common_ones_when_rendering() {
        let build = Build {
            kernel_release: "5.10.0".to_owned(),
            module_file_path: Some(PathBuf::from("/tmp/falco.ko")),
            ..Build::default()
        };
        let kr = build.parsed_kernel_release().unwrap();
        let common = CommonTemplateData::new(&build, &kr, &Version::new(12, 0, 0), "gcc", "/driverkit");
        let script = render(
            "vanilla.sh",
            &common,
            serde_json::json!({
                "kernel_download_url": "http://mirror.invalid/linux.tar.xz",
                "kernel_local_version": "",
                "has_kernel_config": false,
            }),
        )
        .unwrap();
        assert!(script.contains("http://mirror.invalid/linux.tar.xz"));
    }
}
