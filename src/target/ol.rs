//! Oracle Linux kernel headers, both the RHEL-compatible kernel and UEK
//!
//! A `uek` marker in the release string switches the package name to
//! `kernel-uek-devel` and the repos to the UEK release channels; which
//! channel carries a given kernel is not derivable from the release, so
//! all of them are probed.

use async_trait::async_trait;
use serde_json::json;

use super::{el_major, Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const MIRROR: &str = "https://yum.oracle.com/repo/OracleLinux";

const UEK_CHANNELS: &[&str] = &["UEKR7", "UEKR6", "UEKR5", "UEKR4", "UEKR3"];

/// Oracle Linux target
pub struct OracleLinux;

fn candidate_urls(kr: &KernelRelease) -> Vec<String> {
    let arch = kr.architecture.to_non_deb();
    let majors: Vec<u64> = match el_major(kr) {
        Some(major) => vec![major],
        None => vec![7, 8, 9],
    };
    let uek = kr.fullextraversion.contains("uek");

    let mut urls = Vec::new();
    for major in majors {
        if uek {
            let rpm = format!(
                "kernel-uek-devel-{}{}.rpm",
                kr.fullversion, kr.fullextraversion
            );
            for channel in UEK_CHANNELS {
                urls.push(format!(
                    "{MIRROR}/OL{major}/{channel}/{arch}/getPackage/{rpm}"
                ));
            }
        } else {
            let rpm = format!("kernel-devel-{}{}.rpm", kr.fullversion, kr.fullextraversion);
            if major >= 8 {
                urls.push(format!(
                    "{MIRROR}/OL{major}/baseos/latest/{arch}/getPackage/{rpm}"
                ));
                urls.push(format!(
                    "{MIRROR}/OL{major}/appstream/{arch}/getPackage/{rpm}"
                ));
            } else {
                urls.push(format!("{MIRROR}/OL{major}/latest/{arch}/getPackage/{rpm}"));
                urls.push(format!(
                    "{MIRROR}/OL{major}/UEK/latest/{arch}/getPackage/{rpm}"
                ));
            }
        }
    }
    urls
}

#[async_trait]
impl Target for OracleLinux {
    fn name(&self) -> &'static str {
        TargetId::OracleLinux.name()
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
