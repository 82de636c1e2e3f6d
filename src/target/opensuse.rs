//! openSUSE kernel headers, split across two devel packages
//!
//! The devel content comes as a pair: `kernel-default-devel` carries the
//! generated objects, `kernel-devel` the sources. The build script merges
//! whichever of the two resolve. Leap releases carry an `lpNNN` token in
//! the extraversion; without one the Tumbleweed repos are probed.

use async_trait::async_trait;
use serde_json::json;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const MIRRORS: &[&str] = &[
    "https://download.opensuse.org",
    "https://mirrors.edge.kernel.org/opensuse",
];

/// openSUSE target
pub struct Opensuse;

/// RPM package version of a SUSE kernel release
///
/// The trailing flavor of the release string (`-default`, `-azure`) names
/// the installed kernel variant and is not part of the package version.
pub(super) fn package_version(kr: &KernelRelease) -> String {
    let full = format!("{}{}", kr.fullversion, kr.fullextraversion);
    match full.rsplit_once('-') {
        Some((version, flavor)) if flavor.chars().all(|c| c.is_ascii_alphabetic()) => {
            version.to_owned()
        }
        _ => full,
    }
}

/// The Leap release named by the `lpNNN` token (`lp152` reads as 15.2)
fn leap_release(kr: &KernelRelease) -> Option<String> {
    let digits = kr
        .fullextraversion
        .split(['.', '-'])
        .find_map(|token| token.strip_prefix("lp"))?;
    if digits.len() < 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (major, minor) = digits.split_at(2);
    Some(format!("{major}.{minor}"))
}

fn candidate_urls(kr: &KernelRelease) -> Vec<String> {
    let version = package_version(kr);
    let arch = kr.architecture.to_non_deb();
    let default_devel = format!("kernel-default-devel-{version}.{arch}.rpm");
    let devel = format!("kernel-devel-{version}.noarch.rpm");

    let paths = match leap_release(kr) {
        Some(leap) => vec![
            format!("distribution/leap/{leap}/repo/oss/{arch}/{default_devel}"),
            format!("update/leap/{leap}/oss/{arch}/{default_devel}"),
            format!("distribution/leap/{leap}/repo/oss/noarch/{devel}"),
            format!("update/leap/{leap}/oss/noarch/{devel}"),
        ],
        None => vec![
            format!("tumbleweed/repo/oss/{arch}/{default_devel}"),
            format!("tumbleweed/repo/oss/noarch/{devel}"),
        ],
    };

    let mut urls = Vec::new();
    for mirror in MIRRORS {
        for path in &paths {
            urls.push(format!("{mirror}/{path}"));
        }
    }
    urls
}

#[async_trait]
impl Target for Opensuse {
    fn name(&self) -> &'static str {
        TargetId::Opensuse.name()
    }

    fn template_script(&self) -> &'static str {
        "opensuse.sh"
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
        Ok(json!({ "kernel_download_urls": urls }))
    }
}
