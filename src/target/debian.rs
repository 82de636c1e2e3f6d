//! Debian headers are discovered live from the archive pool indexes
//!
//! The binary package version is not derivable from the release string
//! (the source version trails the kernel version independently), so the
//! pool index pages are fetched and scanned for the three debs a build
//! needs: the arch headers, the common headers, and the matching kbuild.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::debug;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const POOL_INDEXES: &[&str] = &[
    "https://mirrors.edge.kernel.org/debian/pool/main/l/linux/",
    "http://security.debian.org/pool/updates/main/l/linux/",
];

/// Debian target
pub struct Debian;

/// The three filename patterns for a release, in the order the build
/// wants them: arch headers, common headers, kbuild
fn filename_patterns(kr: &KernelRelease) -> Vec<Regex> {
    let full = regex::escape(&kr.fullversion);
    let extra = regex::escape(&kr.extraversion);
    let abi: String = kr
        .extraversion
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let arch = kr.architecture;
    let common = if kr.extraversion.contains("rt") {
        "common-rt"
    } else {
        "common"
    };

    [
        format!("linux-headers-{full}-{extra}_[^_\"']+_{arch}\\.deb"),
        format!("linux-headers-{full}-{abi}-{common}_[^_\"']+_all\\.deb"),
        format!("linux-kbuild-{}\\.{}_[^_\"']+_{arch}\\.deb", kr.major, kr.minor),
    ]
    .into_iter()
    .map(|p| Regex::new(&p).expect("pattern is well formed"))
    .collect()
}

/// Scan one index page for the release's filenames, deduplicated, grouped
/// by pattern and in document order within each group
fn matching_filenames(body: &str, kr: &KernelRelease) -> Vec<String> {
    let mut found = Vec::new();
    for pattern in filename_patterns(kr) {
        for m in pattern.find_iter(body) {
            let name = m.as_str().to_owned();
            if !found.contains(&name) {
                found.push(name);
            }
        }
    }
    found
}

async fn discover_from(
    bases: &[String],
    kr: &KernelRelease,
    client: &reqwest::Client,
) -> Vec<String> {
    let mut urls = Vec::new();
    for base in bases {
        let body = match client.get(base.as_str()).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => body,
                Err(error) => {
                    debug!(%base, %error, "failed reading pool index");
                    continue;
                }
            },
            Ok(response) => {
                debug!(%base, status = %response.status(), "pool index not available");
                continue;
            }
            Err(error) => {
                debug!(%base, %error, "failed fetching pool index");
                continue;
            }
        };
        for name in matching_filenames(&body, kr) {
            let url = format!("{base}{name}");
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

#[async_trait]
impl Target for Debian {
    fn name(&self) -> &'static str {
        TargetId::Debian.name()
    }

    fn template_script(&self) -> &'static str {
        "debian.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        let bases: Vec<String> = POOL_INDEXES.iter().map(|b| (*b).to_owned()).collect();
        Ok(discover_from(&bases, kr, client).await)
    }

    fn template_data(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({ "kernel_download_urls": urls }))
    }

    /// Arch headers, common headers, and kbuild
    fn minimum_urls(&self) -> usize {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    const INDEX: &str = r#"
<a href="linux-headers-5.10.0-8-amd64_5.10.46-4_amd64.deb">linux-headers-5.10.0-8-amd64_5.10.46-4_amd64.deb</a>
<a href="linux-headers-5.10.0-8-arm64_5.10.46-4_arm64.deb">linux-headers-5.10.0-8-arm64_5.10.46-4_arm64.deb</a>
<a href="linux-headers-5.10.0-8-common_5.10.46-4_all.deb">linux-headers-5.10.0-8-common_5.10.46-4_all.deb</a>
<a href="linux-headers-5.10.0-8-common-rt_5.10.46-4_all.deb">linux-headers-5.10.0-8-common-rt_5.10.46-4_all.deb</a>
<a href="linux-kbuild-5.10_5.10.46-4_amd64.deb">linux-kbuild-5.10_5.10.46-4_amd64.deb</a>
<a href="linux-headers-5.10.0-9-amd64_5.10.70-1_amd64.deb">linux-headers-5.10.0-9-amd64_5.10.70-1_amd64.deb</a>
"#;

    #[test]
    fn the_three_debs_are_found_in_build_order() {
        let kr = KernelRelease::parse("5.10.0-8-amd64", Architecture::Amd64).unwrap();
        assert_eq!(
            matching_filenames(INDEX, &kr),
            vec![
                "linux-headers-5.10.0-8-amd64_5.10.46-4_amd64.deb",
                "linux-headers-5.10.0-8-common_5.10.46-4_all.deb",
                "linux-kbuild-5.10_5.10.46-4_amd64.deb",
            ]
        );
    }

    #[test]
    fn rt_kernels_take_the_rt_common_headers() {
        let kr = KernelRelease::parse("5.10.0-8-rt-amd64", Architecture::Amd64).unwrap();
        let index = INDEX.replace("8-amd64", "8-rt-amd64");
        let names = matching_filenames(&index, &kr);
        assert!(names.contains(&"linux-headers-5.10.0-8-common-rt_5.10.46-4_all.deb".to_owned()));
    }

    #[tokio::test]
    async fn unreachable_mirrors_are_skipped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pool/")
            .with_status(200)
            .with_body(INDEX)
            .create_async()
            .await;

        let kr = KernelRelease::parse("5.10.0-8-amd64", Architecture::Amd64).unwrap();
        let client = reqwest::Client::new();
        let bases = vec![
            // refused connection: must not poison the discovery
            "http://127.0.0.1:9/pool/".to_owned(),
            format!("{}/pool/", server.url()),
        ];
        let urls = discover_from(&bases, &kr, &client).await;

        mock.assert_async().await;
        assert_eq!(urls.len(), 3);
        assert!(urls[0].starts_with(&server.url()));
        assert!(urls[0].ends_with("linux-headers-5.10.0-8-amd64_5.10.46-4_amd64.deb"));
    }
}
