//! Photon OS kernel headers come from the VMware package mirrors
//!
//! Release strings carry a `phN` token (`5.10.103-1.ph4`) naming the OS
//! release; unlike the EL family the architecture is not part of the
//! release string, so the RPM name appends it.

use async_trait::async_trait;
use serde_json::json;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const MIRROR: &str = "https://packages.vmware.com/photon";

const RELEASES: &[(u64, &str)] = &[(3, "3.0"), (4, "4.0"), (5, "5.0")];

/// Photon OS target
pub struct Photon;

fn photon_release(kr: &KernelRelease) -> Option<u64> {
    kr.fullextraversion
        .split(['.', '-'])
        .find_map(|token| token.strip_prefix("ph"))
        .and_then(|rest| rest.parse().ok())
}

fn candidate_urls(kr: &KernelRelease) -> Vec<String> {
    let arch = kr.architecture.to_non_deb();
    let rpm = format!(
        "kernel-devel-{}{}.{arch}.rpm",
        kr.fullversion, kr.fullextraversion
    );
    let marker = photon_release(kr);
    let releases = RELEASES
        .iter()
        .filter(|(major, _)| marker.map_or(true, |m| m == *major));

    let mut urls = Vec::new();
    for (_, release) in releases {
        for repo in ["photon_release", "photon_updates"] {
            urls.push(format!(
                "{MIRROR}/{release}/{repo}_{release}_{arch}/{arch}/{rpm}"
            ));
        }
    }
    urls
}

#[async_trait]
impl Target for Photon {
    fn name(&self) -> &'static str {
        TargetId::Photon.name()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    #[test]
    fn the_ph_token_picks_the_release() {
        let kr = KernelRelease::parse("5.10.103-1.ph4", Architecture::Amd64).unwrap();
        let urls = candidate_urls(&kr);
        assert_eq!(
            urls,
            vec![
                format!(
                    "{MIRROR}/4.0/photon_release_4.0_x86_64/x86_64/kernel-devel-5.10.103-1.ph4.x86_64.rpm"
                ),
                format!(
                    "{MIRROR}/4.0/photon_updates_4.0_x86_64/x86_64/kernel-devel-5.10.103-1.ph4.x86_64.rpm"
                ),
            ]
        );
    }

    #[test]
    fn unmarked_releases_probe_every_release() {
        let kr = KernelRelease::parse("5.10.103-1", Architecture::Arm64).unwrap();
        let urls = candidate_urls(&kr);
        assert_eq!(urls.len(), RELEASES.len() * 2);
        assert!(urls.iter().all(|u| u.contains("aarch64")));
    }
}
