//! SUSE Linux Enterprise kernel headers come from the entitled SCC repos
//!
//! No public mirror carries them, so no candidate URLs exist: the build
//! script registers against the SUSE Customer Center from inside the
//! builder (which needs host networking) and installs
//! `kernel-default-devel` at the exact package version.

use async_trait::async_trait;
use serde_json::json;

use super::{opensuse, Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

/// SUSE Linux Enterprise target
pub struct Sle;

/// SUSE Linux Enterprise Server target; same policy as [`Sle`] under the
/// tag historical configurations use
pub struct Sles;

fn template_data(kr: &KernelRelease) -> serde_json::Value {
    json!({ "kernel_package_version": opensuse::package_version(kr) })
}

#[async_trait]
impl Target for Sle {
    fn name(&self) -> &'static str {
        TargetId::Sle.name()
    }

    fn template_script(&self) -> &'static str {
        "sles.sh"
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
        kr: &KernelRelease,
        _urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(template_data(kr))
    }

    fn minimum_urls(&self) -> usize {
        0
    }

    fn builder_image_net_mode(&self) -> Option<&'static str> {
        Some("host")
    }
}

#[async_trait]
impl Target for Sles {
    fn name(&self) -> &'static str {
        TargetId::Sles.name()
    }

    fn template_script(&self) -> &'static str {
        "sles.sh"
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
        kr: &KernelRelease,
        _urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(template_data(kr))
    }

    fn minimum_urls(&self) -> usize {
        0
    }

    fn builder_image_net_mode(&self) -> Option<&'static str> {
        Some("host")
    }
}
