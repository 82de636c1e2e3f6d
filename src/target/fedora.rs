//! Fedora kernel headers come as `kernel-devel` RPMs
//!
//! The Fedora release number rides in the extraversion (`300.fc38`), which
//! pins the grid to one release across the live mirrors and the archive.

use async_trait::async_trait;
use serde_json::json;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const MIRRORS: &[&str] = &[
    "https://mirrors.edge.kernel.org/fedora",
    "https://dl.fedoraproject.org/pub/fedora/linux",
    "https://archives.fedoraproject.org/pub/archive/fedora/linux",
];

/// Fedora target
pub struct Fedora;

/// The `fcN` token of the release string
fn fedora_release(kr: &KernelRelease) -> Option<u64> {
    kr.fullextraversion
        .split(['.', '-'])
        .find_map(|token| token.strip_prefix("fc"))
        .and_then(|rest| rest.parse().ok())
}

fn candidate_urls(kr: &KernelRelease) -> Vec<String> {
    let Some(release) = fedora_release(kr) else {
        return Vec::new();
    };
    let rpm = format!("kernel-devel-{}{}.rpm", kr.fullversion, kr.fullextraversion);
    let arch = kr.architecture.to_non_deb();

    let mut urls = Vec::new();
    for mirror in MIRRORS {
        urls.push(format!(
            "{mirror}/releases/{release}/Everything/{arch}/os/Packages/k/{rpm}"
        ));
        urls.push(format!(
            "{mirror}/updates/{release}/Everything/{arch}/Packages/k/{rpm}"
        ));
    }
    urls
}

#[async_trait]
impl Target for Fedora {
    fn name(&self) -> &'static str {
        TargetId::Fedora.name()
    }

    fn template_script(&self) -> &'static str {
        "rpm.sh"
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
            "kernel_download_urls": urls.first().cloned().into_iter().collect::<Vec<_>>(),
        }))
    }
}
