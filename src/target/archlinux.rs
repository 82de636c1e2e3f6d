//! Arch Linux kernel headers from the package archive
//!
//! The archive keeps every built package forever under a stable scheme,
//! so the URL is fully derivable: the pacman package version is the
//! release string with the first extra separator flattened to a dot.
//! Newer packages are zstd-compressed, older ones xz; both are probed.

use async_trait::async_trait;
use serde_json::json;

use super::{Target, TargetId};
use crate::arch::Architecture;
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const ARCHIVE: &str = "https://archive.archlinux.org/packages/l";

/// Arch Linux target; the archive only carries x86_64 packages
pub struct ArchLinux;

/// Headers package for the release's kernel variant
fn headers_package(kr: &KernelRelease) -> &'static str {
    if kr.fullextraversion.contains("hardened") {
        "linux-hardened-headers"
    } else if kr.fullextraversion.contains("lts") {
        "linux-lts-headers"
    } else if kr.fullextraversion.contains("zen") {
        "linux-zen-headers"
    } else {
        "linux-headers"
    }
}

/// Pacman package version (`5.5.2-arch1-1` installs as `5.5.2.arch1-1`)
fn package_version(kr: &KernelRelease) -> String {
    let extra = match kr.fullextraversion.strip_prefix('-') {
        Some(rest) => format!(".{rest}"),
        None => kr.fullextraversion.clone(),
    };
    format!("{}{}", kr.fullversion, extra)
}

fn candidate_urls(kr: &KernelRelease) -> Vec<String> {
    if kr.architecture != Architecture::Amd64 {
        return Vec::new();
    }
    let package = headers_package(kr);
    let version = package_version(kr);
    ["zst", "xz"]
        .into_iter()
        .map(|compression| {
            format!("{ARCHIVE}/{package}/{package}-{version}-x86_64.pkg.tar.{compression}")
        })
        .collect()
}

#[async_trait]
impl Target for ArchLinux {
    fn name(&self) -> &'static str {
        TargetId::ArchLinux.name()
    }

    fn template_script(&self) -> &'static str {
        "archlinux.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        kr: &KernelRelease,
        _client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        Ok(candidate_urls(kr))
    }

    fn template_data(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({
            "kernel_download_url": urls.first().cloned().unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    #[test]
    fn dashed_extras_flatten_into_the_package_version() {
        let kr = KernelRelease::parse("5.5.2-arch1-1", Architecture::Amd64).unwrap();
        assert_eq!(package_version(&kr), "5.5.2.arch1-1");
        assert_eq!(
            candidate_urls(&kr)[0],
            format!("{ARCHIVE}/linux-headers/linux-headers-5.5.2.arch1-1-x86_64.pkg.tar.zst")
        );
    }

    #[test]
    fn dotted_extras_pass_through() {
        let kr = KernelRelease::parse("5.19.3.arch1-1", Architecture::Amd64).unwrap();
        assert_eq!(package_version(&kr), "5.19.3.arch1-1");
    }

    #[test]
    fn variant_kernels_pick_their_own_headers_package() {
        let kr = KernelRelease::parse("6.1.71-1-lts", Architecture::Amd64).unwrap();
        assert_eq!(headers_package(&kr), "linux-lts-headers");
        let kr = KernelRelease::parse("6.5.9-hardened1-1-hardened", Architecture::Amd64).unwrap();
        assert_eq!(headers_package(&kr), "linux-hardened-headers");
    }

    #[test]
    fn arm64_releases_get_no_candidates() {
        let kr = KernelRelease::parse("6.1.71-1-lts", Architecture::Arm64).unwrap();
        assert!(candidate_urls(&kr).is_empty());
    }
}
