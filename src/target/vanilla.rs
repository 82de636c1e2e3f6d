//! Mainline kernels built straight from kernel.org sources
//!
//! Several container-centric distributions (Bottlerocket, Minikube, Talos)
//! ship unpatched mainline kernels and delegate here wholesale: the sources
//! are fetched from kernel.org and configured with the kernel config the
//! caller supplies.

use async_trait::async_trait;
use serde_json::json;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

/// Mainline kernel target
pub struct Vanilla;

/// Source tarball URL for a parsed mainline release
///
/// Release candidates live on git.kernel.org until they graduate to the CDN.
pub(super) fn source_tarball_url(kr: &KernelRelease) -> String {
    if kr.fullextraversion.contains("-rc") {
        format!(
            "https://git.kernel.org/torvalds/t/linux-{}{}.tar.gz",
            kr.fullversion, kr.fullextraversion
        )
    } else {
        format!(
            "https://cdn.kernel.org/pub/linux/kernel/v{}.x/linux-{}{}.tar.xz",
            kr.major, kr.fullversion, kr.fullextraversion
        )
    }
}

/// Template record shared by vanilla and the targets delegating to it
pub(super) fn template_data(
    cfg: &Config<'_>,
    kr: &KernelRelease,
    urls: &[String],
) -> serde_json::Value {
    json!({
        "kernel_download_url": urls.first().cloned().unwrap_or_default(),
        "kernel_local_version": kr.fullextraversion,
        "has_kernel_config": !cfg.build.kernel_config_data.is_empty(),
    })
}

#[async_trait]
impl Target for Vanilla {
    fn name(&self) -> &'static str {
        TargetId::Vanilla.name()
    }

    fn template_script(&self) -> &'static str {
        "vanilla.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        kr: &KernelRelease,
        _client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        Ok(vec![source_tarball_url(kr)])
    }

    fn template_data(
        &self,
        cfg: &Config<'_>,
        kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(template_data(cfg, kr, urls))
    }
}
