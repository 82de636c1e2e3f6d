//! Rocky Linux kernel headers come as `kernel-devel` RPMs
//!
//! Current releases live on the download mirror, end-of-life point
//! releases in the vault. The 9 line moved `kernel-devel` to AppStream
//! and added a package-letter subdirectory, so both layouts are probed.

use async_trait::async_trait;
use serde_json::json;

use super::{el_major, Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const MIRRORS: &[&str] = &[
    "https://download.rockylinux.org/pub/rocky",
    "https://dl.rockylinux.org/vault/rocky",
];

/// Rocky Linux target
pub struct Rocky;

fn candidate_urls(kr: &KernelRelease) -> Vec<String> {
    let rpm = format!("kernel-devel-{}{}.rpm", kr.fullversion, kr.fullextraversion);
    let arch = kr.architecture.to_non_deb();
    let majors: Vec<u64> = match el_major(kr) {
        Some(major) => vec![major],
        None => vec![8, 9],
    };

    let mut urls = Vec::new();
    for major in majors {
        for mirror in MIRRORS {
            for repo in ["BaseOS", "AppStream"] {
                urls.push(format!("{mirror}/{major}/{repo}/{arch}/os/Packages/k/{rpm}"));
                urls.push(format!("{mirror}/{major}/{repo}/{arch}/os/Packages/{rpm}"));
            }
        }
    }
    urls
}

#[async_trait]
impl Target for Rocky {
    fn name(&self) -> &'static str {
        TargetId::Rocky.name()
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
