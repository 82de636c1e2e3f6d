//! Red Hat Enterprise Linux headers come from the entitled repos
//!
//! The builder image is expected to be a subscribed UBI; the build script
//! installs `kernel-devel` at the exact release from inside it, so no
//! candidate URLs exist for the resolver to probe.

use async_trait::async_trait;
use serde_json::json;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

/// Red Hat Enterprise Linux target
pub struct RedHat;

#[async_trait]
impl Target for RedHat {
    fn name(&self) -> &'static str {
        TargetId::RedHat.name()
    }

    fn template_script(&self) -> &'static str {
        "redhat.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        _client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn template_data(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        _urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({}))
    }

    fn minimum_urls(&self) -> usize {
        0
    }
}
