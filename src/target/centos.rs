//! CentOS kernel headers come as `kernel-devel` RPMs
//!
//! Current point releases are served from the kernel.org edge mirror,
//! end-of-life ones from the CentOS vault, and Stream releases from the
//! Stream mirror. The candidate grid covers all three; the HEAD probe
//! sorts out which one actually hosts the requested release.

use async_trait::async_trait;
use semver::Version;
use serde_json::json;

use super::{el_major, Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const EDGE: &str = "https://mirrors.edge.kernel.org/centos";
const VAULT: &str = "https://vault.centos.org";
const STREAM: &str = "https://mirror.stream.centos.org";

/// Point releases still worth probing, per major line
const POINT_RELEASES_6: &[&str] = &[
    "6.10", "6.9", "6.8", "6.7", "6.6", "6.5", "6.4", "6.3", "6.2", "6.1", "6.0",
];
const POINT_RELEASES_7: &[&str] = &[
    "7.9.2009", "7.8.2003", "7.7.1908", "7.6.1810", "7.5.1804", "7.4.1708", "7.3.1611",
    "7.2.1511", "7.1.1503", "7.0.1406",
];
const POINT_RELEASES_8: &[&str] = &[
    "8.5.2111", "8.4.2105", "8.3.2011", "8.2.2004", "8.1.1911", "8.0.1905",
];

/// CentOS target
pub struct Centos;

fn candidate_urls(kr: &KernelRelease) -> Vec<String> {
    let rpm = format!("kernel-devel-{}{}.rpm", kr.fullversion, kr.fullextraversion);
    let arch = kr.architecture.to_non_deb();
    let majors: Vec<u64> = match el_major(kr) {
        Some(major) => vec![major],
        None => vec![6, 7, 8, 9],
    };

    let mut urls = Vec::new();
    for major in majors {
        match major {
            6 | 7 => {
                let points = if major == 6 {
                    POINT_RELEASES_6
                } else {
                    POINT_RELEASES_7
                };
                for point in points {
                    for repo in ["os", "updates"] {
                        for base in [EDGE, VAULT] {
                            urls.push(format!("{base}/{point}/{repo}/{arch}/Packages/{rpm}"));
                        }
                    }
                }
            }
            8 => {
                for point in POINT_RELEASES_8 {
                    for base in [EDGE, VAULT] {
                        urls.push(format!("{base}/{point}/BaseOS/{arch}/os/Packages/{rpm}"));
                    }
                }
                urls.push(format!("{STREAM}/8-stream/BaseOS/{arch}/os/Packages/{rpm}"));
            }
            _ => {
                // kernel-devel moved from BaseOS to AppStream in the 9 line
                for repo in ["BaseOS", "AppStream"] {
                    urls.push(format!(
                        "{STREAM}/{major}-stream/{repo}/{arch}/os/Packages/{rpm}"
                    ));
                }
            }
        }
    }
    urls
}

#[async_trait]
impl Target for Centos {
    fn name(&self) -> &'static str {
        TargetId::Centos.name()
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

    /// The el6/el7 kernels predate the strictness of modern GCC
    async fn gcc_version(
        &self,
        kr: &KernelRelease,
        _client: &reqwest::Client,
    ) -> Option<Version> {
        match kr.major {
            2 | 3 => Some(Version::new(4, 8, 5)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    #[test]
    fn el7_releases_probe_only_the_seven_line() {
        let kr = KernelRelease::parse("3.10.0-957.12.2.el7.x86_64", Architecture::Amd64).unwrap();
        let urls = candidate_urls(&kr);
        assert!(!urls.is_empty());
        assert!(urls.iter().all(|u| u.contains("/7.")));
        assert!(urls
            .iter()
            .any(|u| u.ends_with("Packages/kernel-devel-3.10.0-957.12.2.el7.x86_64.rpm")));
        assert!(urls.iter().any(|u| u.starts_with(VAULT)));
        assert!(urls.iter().any(|u| u.starts_with(EDGE)));
    }

    #[test]
    fn stream_releases_probe_the_stream_mirror() {
        let kr = KernelRelease::parse("5.14.0-570.el9.x86_64", Architecture::Amd64).unwrap();
        let urls = candidate_urls(&kr);
        assert_eq!(
            urls,
            vec![
                format!(
                    "{STREAM}/9-stream/BaseOS/x86_64/os/Packages/kernel-devel-5.14.0-570.el9.x86_64.rpm"
                ),
                format!(
                    "{STREAM}/9-stream/AppStream/x86_64/os/Packages/kernel-devel-5.14.0-570.el9.x86_64.rpm"
                ),
            ]
        );
    }

    #[test]
    fn unmarked_releases_probe_every_line() {
        let kr = KernelRelease::parse("4.18.0-80", Architecture::Amd64).unwrap();
        let urls = candidate_urls(&kr);
        assert!(urls.iter().any(|u| u.contains("/6.")));
        assert!(urls.iter().any(|u| u.contains("/7.")));
        assert!(urls.iter().any(|u| u.contains("/8.")));
        assert!(urls.iter().any(|u| u.contains("9-stream")));
    }

    #[tokio::test]
    async fn old_kernels_build_with_the_el_toolchain() {
        let client = reqwest::Client::new();
        let kr = KernelRelease::parse("3.10.0-957.12.2.el7.x86_64", Architecture::Amd64).unwrap();
        assert_eq!(
            Centos.gcc_version(&kr, &client).await,
            Some(Version::new(4, 8, 5))
        );
        let kr = KernelRelease::parse("4.18.0-80.el8", Architecture::Amd64).unwrap();
        assert_eq!(Centos.gcc_version(&kr, &client).await, None);
    }
}
