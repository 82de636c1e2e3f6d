//! Minikube ISO kernels are mainline; builds delegate to [`vanilla`]
//!
//! The caller supplies the kernel config extracted from the ISO.
//!
//! [`vanilla`]: super::vanilla

use async_trait::async_trait;

use super::{vanilla, Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

/// Minikube target, a vanilla delegate
pub struct Minikube;

#[async_trait]
impl Target for Minikube {
    fn name(&self) -> &'static str {
        TargetId::Minikube.name()
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
