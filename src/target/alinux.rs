//! Alibaba Cloud Linux kernel headers from the Aliyun mirrors
//!
//! Two registry tags cover the 2.1903 and 3 product lines; they differ
//! only in the repo paths under the shared mirror.

use async_trait::async_trait;
use serde_json::json;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const MIRROR: &str = "https://mirrors.aliyun.com/alinux";

/// Alibaba Cloud Linux 2 target
pub struct AliyunLinux2;

/// Alibaba Cloud Linux 3 target
pub struct AliyunLinux3;

fn candidate_urls(kr: &KernelRelease, release: &str, repos: &[&str]) -> Vec<String> {
    let rpm = format!("kernel-devel-{}{}.rpm", kr.fullversion, kr.fullextraversion);
    let arch = kr.architecture.to_non_deb();
    repos
        .iter()
        .map(|repo| format!("{MIRROR}/{release}/{repo}/{arch}/Packages/{rpm}"))
        .collect()
}

#[async_trait]
impl Target for AliyunLinux2 {
    fn name(&self) -> &'static str {
        TargetId::AliyunLinux2.name()
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
        Ok(candidate_urls(kr, "2.1903", &["os", "updates"]))
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

#[async_trait]
impl Target for AliyunLinux3 {
    fn name(&self) -> &'static str {
        TargetId::AliyunLinux3.name()
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
        Ok(candidate_urls(kr, "3", &["os", "updates", "plus"]))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    #[test]
    fn the_two_lines_probe_their_own_repos() {
        let kr = KernelRelease::parse("4.19.91-26.al7.x86_64", Architecture::Amd64).unwrap();
        let urls = candidate_urls(&kr, "2.1903", &["os", "updates"]);
        assert_eq!(
            urls[0],
            format!("{MIRROR}/2.1903/os/x86_64/Packages/kernel-devel-4.19.91-26.al7.x86_64.rpm")
        );

        let kr = KernelRelease::parse("5.10.134-13.al8.x86_64", Architecture::Amd64).unwrap();
        let urls = candidate_urls(&kr, "3", &["os", "updates", "plus"]);
        assert_eq!(urls.len(), 3);
        assert!(urls.iter().all(|u| u.contains("/alinux/3/")));
    }
}
