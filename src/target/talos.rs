//! Talos ships a mainline kernel; builds delegate to [`vanilla`]
//!
//! Talos release strings carry their own suffix (`-talos`), which the
//! parser already turns into the local version the build needs.
//!
//! [`vanilla`]: super::vanilla

use async_trait::async_trait;

use super::{vanilla, Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

/// Talos target, a vanilla delegate
pub struct Talos;

#[async_trait]
impl Target for Talos {
    fn name(&self) -> &'static str {
        TargetId::Talos.name()
    }

    fn template_script(&self) -> &'static str {
        vanilla::Vanilla.template_script()
    }

    async fn urls(
        &self,
        cfg: &Config<'_>,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        vanilla::Vanilla.urls(cfg, kr, client).await
    }

    fn template_data(
        &self,
        cfg: &Config<'_>,
        kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        vanilla::Vanilla.template_data(cfg, kr, urls)
    }
}
