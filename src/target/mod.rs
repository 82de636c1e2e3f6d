//! Supported build targets and their headers policies
//!
//! A *target* is the distribution (or family of distributions) the kernel
//! artifacts are built for. Each target knows how to locate kernel headers
//! packages for a parsed release, which shell template builds the artifacts,
//! and which toolchain quirks apply. Targets are registered once into a
//! process-wide map and looked up by tag; the set is closed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use semver::Version;

use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::{Error, Result};

pub mod alinux;
pub mod almalinux;
pub mod amazonlinux;
pub mod archlinux;
pub mod bottlerocket;
pub mod centos;
pub mod debian;
pub mod fedora;
pub mod flatcar;
pub mod minikube;
pub mod ol;
pub mod opensuse;
pub mod photon;
pub mod redhat;
pub mod rocky;
pub mod sles;
pub mod talos;
pub mod ubuntu;
pub mod vanilla;

/// Tag identifying a supported distribution or family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum TargetId {
    AliyunLinux2,
    AliyunLinux3,
    AlmaLinux,
    AmazonLinux,
    AmazonLinux2,
    AmazonLinux2022,
    ArchLinux,
    Bottlerocket,
    Centos,
    Debian,
    Fedora,
    Flatcar,
    Minikube,
    OracleLinux,
    Opensuse,
    Photon,
    RedHat,
    Rocky,
    Sle,
    Sles,
    Talos,
    Ubuntu,
    Vanilla,
}

impl TargetId {
    /// Every registered target tag, in stable (alphabetical) order
    pub const ALL: [TargetId; 23] = [
        TargetId::AliyunLinux2,
        TargetId::AliyunLinux3,
        TargetId::AlmaLinux,
        TargetId::AmazonLinux,
        TargetId::AmazonLinux2,
        TargetId::AmazonLinux2022,
        TargetId::ArchLinux,
        TargetId::Bottlerocket,
        TargetId::Centos,
        TargetId::Debian,
        TargetId::Fedora,
        TargetId::Flatcar,
        TargetId::Minikube,
        TargetId::OracleLinux,
        TargetId::Opensuse,
        TargetId::Photon,
        TargetId::RedHat,
        TargetId::Rocky,
        TargetId::Sle,
        TargetId::Sles,
        TargetId::Talos,
        TargetId::Ubuntu,
        TargetId::Vanilla,
    ];

    /// The registry tag, as accepted on the command line
    pub fn name(self) -> &'static str {
        match self {
            TargetId::AliyunLinux2 => "aliyunlinux2",
            TargetId::AliyunLinux3 => "aliyunlinux3",
            TargetId::AlmaLinux => "almalinux",
            TargetId::AmazonLinux => "amazonlinux",
            TargetId::AmazonLinux2 => "amazonlinux2",
            TargetId::AmazonLinux2022 => "amazonlinux2022",
            TargetId::ArchLinux => "archlinux",
            TargetId::Bottlerocket => "bottlerocket",
            TargetId::Centos => "centos",
            TargetId::Debian => "debian",
            TargetId::Fedora => "fedora",
            TargetId::Flatcar => "flatcar",
            TargetId::Minikube => "minikube",
            TargetId::OracleLinux => "ol",
            TargetId::Opensuse => "opensuse",
            TargetId::Photon => "photon",
            TargetId::RedHat => "redhat",
            TargetId::Rocky => "rocky",
            TargetId::Sle => "sle",
            TargetId::Sles => "sles",
            TargetId::Talos => "talos",
            TargetId::Ubuntu => "ubuntu",
            TargetId::Vanilla => "vanilla",
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TargetId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| Error::TargetNotFound(s.to_owned()))
    }
}

/// Behavior each supported target implements
///
/// `urls` and `gcc_version` receive the shared HTTP client because some
/// targets discover their answers live (Amazon Linux walks mirror lists,
/// Flatcar reads the channel package manifest); static targets ignore it.
#[async_trait]
pub trait Target: Send + Sync {
    /// The registry tag
    fn name(&self) -> &'static str;

    /// Name of the shell template asset the build script is rendered from
    fn template_script(&self) -> &'static str;

    /// Candidate kernel headers URLs, in deterministic preference order
    async fn urls(
        &self,
        cfg: &Config<'_>,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Result<Vec<String>>;

    /// Per-target template record merged over the common template data
    fn template_data(
        &self,
        cfg: &Config<'_>,
        kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value>;

    /// Distribution-specific GCC override; `None` falls back to [`default_gcc`]
    async fn gcc_version(
        &self,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Option<Version> {
        let _ = (kr, client);
        None
    }

    /// How many resolved URLs a build needs; 0 for targets whose headers are
    /// installed from entitled repositories inside the builder
    fn minimum_urls(&self) -> usize {
        1
    }

    /// Container network mode override for the builder
    fn builder_image_net_mode(&self) -> Option<&'static str> {
        None
    }
}

fn registry() -> &'static BTreeMap<TargetId, Box<dyn Target>> {
    static REGISTRY: OnceLock<BTreeMap<TargetId, Box<dyn Target>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: BTreeMap<TargetId, Box<dyn Target>> = BTreeMap::new();
        map.insert(TargetId::AliyunLinux2, Box::new(alinux::AliyunLinux2));
        map.insert(TargetId::AliyunLinux3, Box::new(alinux::AliyunLinux3));
        map.insert(TargetId::AlmaLinux, Box::new(almalinux::AlmaLinux));
        map.insert(TargetId::AmazonLinux, Box::new(amazonlinux::AmazonLinux));
        map.insert(TargetId::AmazonLinux2, Box::new(amazonlinux::AmazonLinux2));
        map.insert(
            TargetId::AmazonLinux2022,
            Box::new(amazonlinux::AmazonLinux2022),
        );
        map.insert(TargetId::ArchLinux, Box::new(archlinux::ArchLinux));
        map.insert(TargetId::Bottlerocket, Box::new(bottlerocket::Bottlerocket));
        map.insert(TargetId::Centos, Box::new(centos::Centos));
        map.insert(TargetId::Debian, Box::new(debian::Debian));
        map.insert(TargetId::Fedora, Box::new(fedora::Fedora));
        map.insert(TargetId::Flatcar, Box::new(flatcar::Flatcar));
        map.insert(TargetId::Minikube, Box::new(minikube::Minikube));
        map.insert(TargetId::OracleLinux, Box::new(ol::OracleLinux));
        map.insert(TargetId::Opensuse, Box::new(opensuse::Opensuse));
        map.insert(TargetId::Photon, Box::new(photon::Photon));
        map.insert(TargetId::RedHat, Box::new(redhat::RedHat));
        map.insert(TargetId::Rocky, Box::new(rocky::Rocky));
        map.insert(TargetId::Sle, Box::new(sles::Sle));
        map.insert(TargetId::Sles, Box::new(sles::Sles));
        map.insert(TargetId::Talos, Box::new(talos::Talos));
        map.insert(TargetId::Ubuntu, Box::new(ubuntu::Ubuntu));
        map.insert(TargetId::Vanilla, Box::new(vanilla::Vanilla));
        map
    })
}

/// Look up a registered target by tag
pub fn by_id(id: TargetId) -> &'static dyn Target {
    registry()
        .get(&id)
        .map(|t| t.as_ref())
        .expect("every tag is registered")
}

/// Look up a registered target by its string tag
pub fn by_name(name: &str) -> Result<&'static dyn Target> {
    let id = TargetId::from_str(name)?;
    Ok(by_id(id))
}

/// The `elN` enterprise-line token of a release string, when present
///
/// The EL family embeds its line in the extraversion
/// (`3.10.0-957.el7.x86_64`, `5.15.0-3.60.5.1.el9uek.x86_64`); targets use
/// it to prune their candidate grids to the one line that can host the
/// release.
pub(super) fn el_major(kr: &KernelRelease) -> Option<u64> {
    kr.fullextraversion
        .split(['.', '-'])
        .find_map(|token| token.strip_prefix("el"))
        .and_then(|rest| {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
}

/// GCC version used when neither the user nor the target picks one
///
/// Keyed off the kernel version alone: older kernels fail to compile with
/// the strictness of modern GCC, newer kernels require features old GCC
/// lacks.
pub fn default_gcc(kr: &KernelRelease) -> Version {
    match kr.major {
        6.. => Version::new(12, 0, 0),
        5 => match kr.minor {
            0..=10 => Version::new(10, 0, 0),
            11..=14 => Version::new(11, 0, 0),
            _ => Version::new(12, 0, 0),
        },
        4 => Version::new(8, 0, 0),
        3 => Version::new(4, 9, 0),
        _ => Version::new(4, 8, 0),
    }
}

/// LLVM/clang major used for eBPF probe builds, keyed off the kernel major
pub fn llvm_version(kr: &KernelRelease) -> &'static str {
    match kr.major {
        4 => "7",
        _ => "12",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;

    fn kr(release: &str) -> KernelRelease {
        KernelRelease::parse(release, Architecture::Amd64).unwrap()
    }

    // ==========================================================================
    // Registry
    // ==========================================================================

    #[test]
    fn every_tag_resolves_to_a_target_with_the_same_name() {
        for id in TargetId::ALL {
            let target = by_id(id);
            assert_eq!(target.name(), id.name());
        }
    }

    #[test]
    fn lookup_by_name_round_trips_for_all_tags() {
        for id in TargetId::ALL {
            let target = by_name(id.name()).unwrap();
            assert_eq!(target.name(), id.name());
        }
    }

    #[test]
    fn unknown_tags_are_reported_not_found() {
        for bad in ["gentoo", "Ubuntu", "ubuntu ", ""] {
            assert!(matches!(by_name(bad), Err(Error::TargetNotFound(_))), "{bad:?}");
        }
    }

    #[test]
    fn oracle_linux_registers_under_the_ol_tag() {
        assert_eq!(by_name("ol").unwrap().name(), "ol");
        assert_eq!(TargetId::OracleLinux.name(), "ol");
    }

    // ==========================================================================
    // Toolchain heuristics
    // ==========================================================================

    #[test]
    fn default_gcc_anchor_table() {
        let cases = [
            ("3.13.0-100", Version::new(4, 9, 0)),
            ("4.15.0-188", Version::new(8, 0, 0)),
            ("5.15.0-1004-intel-iotg", Version::new(12, 0, 0)),
            ("5.18.0-1001-kvm", Version::new(12, 0, 0)),
        ];
        for (release, expected) in cases {
            assert_eq!(default_gcc(&kr(release)), expected, "{release}");
        }
    }

    #[test]
    fn default_gcc_covers_old_and_future_kernels() {
        assert_eq!(default_gcc(&kr("2.6.32-754.el6.x86_64")), Version::new(4, 8, 0));
        assert_eq!(default_gcc(&kr("5.4.0-100")), Version::new(10, 0, 0));
        assert_eq!(default_gcc(&kr("5.11.0-1022-aws")), Version::new(11, 0, 0));
        assert_eq!(default_gcc(&kr("6.5.0-9-generic")), Version::new(12, 0, 0));
    }

    #[test]
    fn llvm_version_follows_kernel_major() {
        assert_eq!(llvm_version(&kr("4.14.0")), "7");
        assert_eq!(llvm_version(&kr("5.10.0")), "12");
        assert_eq!(llvm_version(&kr("6.1.0")), "12");
    }
}
