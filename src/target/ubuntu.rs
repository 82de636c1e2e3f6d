//! Ubuntu kernel headers live in the launchpad archive pools
//!
//! An Ubuntu release string names an ABI number and a flavor
//! (`5.15.0-1004-intel-iotg`). The flavor picks the source-package
//! directory under `pool/main/l/`, and each build needs two debs out of
//! it: the arch-specific headers and the flavor-common `_all` headers.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use semver::Version;
use serde_json::json;

use super::{Target, TargetId};
use crate::arch::Architecture;
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

const MIRRORS_AMD64: &[&str] = &[
    "https://mirrors.edge.kernel.org/ubuntu",
    "http://security.ubuntu.com/ubuntu",
    "http://archive.ubuntu.com/ubuntu",
];
const MIRRORS_ARM64: &[&str] = &["http://ports.ubuntu.com/ubuntu-ports"];

/// Ubuntu target
pub struct Ubuntu;

/// Parsed form of an Ubuntu extraversion
#[derive(Debug, PartialEq, Eq)]
struct Flavor {
    abi: String,
    flavor: String,
    /// Trailing `-5.15`-style suffix of HWE kernels; part of the source
    /// package name, never of the binary package names
    series: Option<String>,
}

fn flavor_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<abi>\d+)(?:-(?P<flavor>[a-zA-Z][0-9a-zA-Z]*(?:-[a-zA-Z][0-9a-zA-Z]*)*))?(?:-(?P<series>[0-9][0-9.]*))?$",
        )
        .expect("pattern is well formed")
    })
}

/// Split an extraversion into ABI and flavor
///
/// Flavor segments must start with a letter; a segment starting with a
/// digit is taken as an HWE series suffix instead, so a hypothetical
/// flavor with a leading digit would be misread. Forms the pattern does
/// not recognize fall back to `generic`.
fn parse_flavor(extra: &str) -> Flavor {
    match flavor_pattern().captures(extra) {
        Some(caps) => Flavor {
            abi: caps["abi"].to_owned(),
            flavor: caps
                .name("flavor")
                .map_or_else(|| "generic".to_owned(), |m| m.as_str().to_owned()),
            series: caps.name("series").map(|m| m.as_str().to_owned()),
        },
        None => Flavor {
            abi: extra.to_owned(),
            flavor: "generic".to_owned(),
            series: None,
        },
    }
}

/// Source-package directories worth probing, most specific first
fn pool_dirs(flavor: &Flavor, kr: &KernelRelease) -> Vec<String> {
    let hwe_series = format!("{}.{}", kr.major, kr.minor);
    let mut dirs = Vec::new();
    if flavor.flavor == "generic" {
        dirs.push("linux".to_owned());
        dirs.push(format!("linux-hwe-{hwe_series}"));
    } else {
        if let Some(series) = &flavor.series {
            dirs.push(format!("linux-{}-{}", flavor.flavor, series));
        }
        dirs.push(format!("linux-{}", flavor.flavor));
        let hwe_dir = format!("linux-{}-{}", flavor.flavor, hwe_series);
        if !dirs.contains(&hwe_dir) {
            dirs.push(hwe_dir);
        }
    }
    dirs
}

fn candidate_urls(cfg: &Config<'_>, kr: &KernelRelease) -> Vec<String> {
    let flavor = parse_flavor(kr.fullextraversion.trim_start_matches(['-', '.']));
    let deb_arch = kr.architecture.to_string();
    let mirrors = match kr.architecture {
        Architecture::Amd64 => MIRRORS_AMD64,
        Architecture::Arm64 => MIRRORS_ARM64,
    };
    let package_version = format!(
        "{}-{}.{}",
        kr.fullversion, flavor.abi, cfg.build.kernel_version
    );
    let headers_deb = format!(
        "linux-headers-{}-{}-{}_{}_{}.deb",
        kr.fullversion, flavor.abi, flavor.flavor, package_version, deb_arch
    );

    let mut urls = Vec::new();
    for mirror in mirrors {
        for dir in pool_dirs(&flavor, kr) {
            // The common headers package is named after the source package
            let all_deb = format!(
                "{}-headers-{}-{}_{}_all.deb",
                dir, kr.fullversion, flavor.abi, package_version
            );
            urls.push(format!("{mirror}/pool/main/l/{dir}/{headers_deb}"));
            urls.push(format!("{mirror}/pool/main/l/{dir}/{all_deb}"));
        }
    }
    urls
}

#[async_trait]
impl Target for Ubuntu {
    fn name(&self) -> &'static str {
        TargetId::Ubuntu.name()
    }

    fn template_script(&self) -> &'static str {
        "ubuntu.sh"
    }

    async fn urls(
        &self,
        cfg: &Config<'_>,
        kr: &KernelRelease,
        _client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        Ok(candidate_urls(cfg, kr))
    }

    fn template_data(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({ "kernel_download_urls": urls }))
    }

    /// Trusty-era kernels only build with the GCC they shipped with
    async fn gcc_version(
        &self,
        kr: &KernelRelease,
        _client: &reqwest::Client,
    ) -> Option<Version> {
        match kr.major {
            3 => Some(Version::new(4, 8, 0)),
            _ => None,
        }
    }

    /// Arch-specific headers plus the `_all` common headers
    fn minimum_urls(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavor_defaults_to_generic() {
        let flavor = parse_flavor("188");
        assert_eq!(flavor.abi, "188");
        assert_eq!(flavor.flavor, "generic");
        assert_eq!(flavor.series, None);
    }

    #[test]
    fn single_segment_flavors_parse() {
        let flavor = parse_flavor("1140-aws");
        assert_eq!(flavor.abi, "1140");
        assert_eq!(flavor.flavor, "aws");
        assert_eq!(flavor.series, None);
    }

    #[test]
    fn multi_segment_flavors_parse() {
        let flavor = parse_flavor("1004-intel-iotg");
        assert_eq!(flavor.abi, "1004");
        assert_eq!(flavor.flavor, "intel-iotg");
    }

    #[test]
    fn hwe_series_suffix_is_split_off() {
        let flavor = parse_flavor("24-lowlatency-hwe-5.15");
        assert_eq!(flavor.abi, "24");
        assert_eq!(flavor.flavor, "lowlatency-hwe");
        assert_eq!(flavor.series, Some("5.15".to_owned()));
    }

    #[test]
    fn unrecognized_forms_fall_back_to_generic() {
        let flavor = parse_flavor("arch1-1");
        assert_eq!(flavor.flavor, "generic");
    }

    #[test]
    fn aws_arm64_candidates_cover_both_debs_in_order() {
        let build = crate::build::Build {
            target: TargetId::Ubuntu,
            kernel_release: "4.15.0-1140-aws".to_owned(),
            kernel_version: "151".to_owned(),
            architecture: crate::arch::Architecture::Arm64,
            ..Default::default()
        };
        let cfg = Config::from(&build);
        let kr = build.parsed_kernel_release().unwrap();
        let urls = candidate_urls(&cfg, &kr);

        let headers = "http://ports.ubuntu.com/ubuntu-ports/pool/main/l/linux-aws/linux-headers-4.15.0-1140-aws_4.15.0-1140.151_arm64.deb";
        let all = "http://ports.ubuntu.com/ubuntu-ports/pool/main/l/linux-aws/linux-aws-headers-4.15.0-1140_4.15.0-1140.151_all.deb";
        let headers_at = urls.iter().position(|u| u == headers).unwrap();
        let all_at = urls.iter().position(|u| u == all).unwrap();
        assert!(headers_at < all_at);
    }

    #[test]
    fn generic_kernels_also_probe_the_hwe_pool() {
        let build = crate::build::Build {
            target: TargetId::Ubuntu,
            kernel_release: "5.15.0-91-generic".to_owned(),
            kernel_version: "101".to_owned(),
            ..Default::default()
        };
        let cfg = Config::from(&build);
        let kr = build.parsed_kernel_release().unwrap();
        let urls = candidate_urls(&cfg, &kr);
        assert!(urls.iter().any(|u| u.contains("/pool/main/l/linux/")));
        assert!(urls
            .iter()
            .any(|u| u.contains("/pool/main/l/linux-hwe-5.15/")));
        assert!(urls
            .iter()
            .any(|u| u.ends_with("linux-hwe-5.15-headers-5.15.0-91_5.15.0-91.101_all.deb")));
    }
}
