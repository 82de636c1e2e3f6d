//! Flatcar Container Linux, resolved through the release channels
//!
//! The user passes the Flatcar release (`3033.2.0`), not a kernel
//! version. The channel package manifest for that release names both the
//! kernel the image ships and the GCC it was built with; the kernel
//! sources then come from kernel.org like a vanilla build, configured
//! with the `-flatcar` local version.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use semver::Version;
use serde_json::json;
use tracing::debug;

use super::{Target, TargetId};
use crate::build::Config;
use crate::images;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const CHANNELS: &[&str] = &["stable", "beta", "alpha"];

/// Flatcar Container Linux target
pub struct Flatcar;

fn manifest_url(channel: &str, kr: &KernelRelease) -> String {
    format!(
        "https://{channel}.release.flatcar-linux.net/{}-usr/{}/flatcar_production_image_packages.txt",
        kr.architecture, kr.fullversion
    )
}

/// The channels are probed in promotion order; a release that reached
/// stable is also present in beta and alpha, so the first hit wins.
async fn fetch_manifest(kr: &KernelRelease, client: &reqwest::Client) -> Option<String> {
    let urls: Vec<String> = CHANNELS
        .iter()
        .map(|channel| manifest_url(channel, kr))
        .collect();
    fetch_manifest_from(&urls, client).await
}

async fn fetch_manifest_from(urls: &[String], client: &reqwest::Client) -> Option<String> {
    for url in urls {
        match client.get(url.as_str()).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => return Some(body),
                Err(error) => debug!(%url, %error, "failed reading package manifest"),
            },
            Ok(response) => {
                debug!(%url, status = %response.status(), "release not on this channel");
            }
            Err(error) => debug!(%url, %error, "failed fetching package manifest"),
        }
    }
    None
}

fn kernel_version(manifest: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"sys-kernel/coreos-kernel-([0-9]+(?:\.[0-9]+)*)").expect("pattern is well formed")
    });
    Some(pattern.captures(manifest)?[1].to_owned())
}

fn gcc_version(manifest: &str) -> Option<Version> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"sys-devel/gcc-([0-9]+(?:\.[0-9]+)*)").expect("pattern is well formed")
    });
    let image_gcc = images::parse_gcc(&pattern.captures(manifest)?[1])?;
    // The builder images do not carry every GCC the images were built
    // with; map to the nearest one that exists
    match image_gcc.major {
        7 => Some(Version::new(6, 0, 0)),
        8.. => Some(Version::new(8, 0, 0)),
        _ => None,
    }
}

#[async_trait]
impl Target for Flatcar {
    fn name(&self) -> &'static str {
        TargetId::Flatcar.name()
    }

    fn template_script(&self) -> &'static str {
        "flatcar.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        let Some(manifest) = fetch_manifest(kr, client).await else {
            return Ok(Vec::new());
        };
        let Some(kernel) = kernel_version(&manifest) else {
            return Ok(Vec::new());
        };
        let major = kernel.split('.').next().unwrap_or_default();
        Ok(vec![format!(
            "https://cdn.kernel.org/pub/linux/kernel/v{major}.x/linux-{kernel}.tar.xz"
        )])
    }

    fn template_data(
        &self,
        cfg: &Config<'_>,
        _kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({
            "kernel_download_url": urls.first().cloned().unwrap_or_default(),
            "kernel_local_version": "-flatcar",
            "has_kernel_config": !cfg.build.kernel_config_data.is_empty(),
        }))
    }

    async fn gcc_version(
        &self,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Option<Version> {
        let manifest = fetch_manifest(kr, client).await?;
        gcc_version(&manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    const MANIFEST: &str = "\
app-shells/bash-5.1_p16::portage-stable
sys-devel/gcc-7.3.0-r2::coreos
sys-kernel/coreos-kernel-4.14.44::coreos
sys-kernel/coreos-modules-4.14.44::coreos
";

    #[test]
    fn the_manifest_names_the_shipped_kernel() {
        assert_eq!(kernel_version(MANIFEST).as_deref(), Some("4.14.44"));
    }

    #[test]
    fn image_gcc_maps_to_a_builder_gcc() {
        assert_eq!(gcc_version(MANIFEST), Some(Version::new(6, 0, 0)));
        let newer = MANIFEST.replace("gcc-7.3.0", "gcc-9.3.0");
        assert_eq!(gcc_version(&newer), Some(Version::new(8, 0, 0)));
    }

    #[test]
    fn release_strings_parse_with_an_empty_extra() {
        let kr = KernelRelease::parse("3033.2.0", Architecture::Amd64).unwrap();
        assert!(kr.fullextraversion.is_empty());
        assert_eq!(
            manifest_url("stable", &kr),
            "https://stable.release.flatcar-linux.net/amd64-usr/3033.2.0/flatcar_production_image_packages.txt"
        );
    }

    #[tokio::test]
    async fn channels_fall_through_until_the_release_is_found() {
        let mut server = mockito::Server::new_async().await;
        let stable = server
            .mock("GET", "/stable.txt")
            .with_status(404)
            .create_async()
            .await;
        let beta = server
            .mock("GET", "/beta.txt")
            .with_status(200)
            .with_body(MANIFEST)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let urls = vec![
            format!("{}/stable.txt", server.url()),
            format!("{}/beta.txt", server.url()),
        ];
        let manifest = fetch_manifest_from(&urls, &client).await.unwrap();

        stable.assert_async().await;
        beta.assert_async().await;
        let kernel = kernel_version(&manifest).unwrap();
        assert_eq!(
            format!(
                "https://cdn.kernel.org/pub/linux/kernel/v{}.x/linux-{kernel}.tar.xz",
                kernel.split('.').next().unwrap()
            ),
            "https://cdn.kernel.org/pub/linux/kernel/v4.x/linux-4.14.44.tar.xz"
        );
    }
}
