//! Kernel release string parser and artifact support checks
//!
//! A kernel release string is what `uname -r` prints on the target machine:
//! a `major.minor.patch` triple, optionally followed by a distribution
//! extraversion (`-957.12.2.el7.x86_64`, `.arch1-1`, `-1140-aws`, ...) and
//! optionally build metadata after a `+`. Everything downstream — headers
//! URL derivation, package names, toolchain selection — keys off the parsed
//! fields, so the grammar is strict and anchored: a string either parses
//! completely or is rejected.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::arch::Architecture;
use crate::{Error, Result};

/// First kernel able to load the module on x86_64
const MODULE_SINCE_AMD64: (u64, u64, u64) = (2, 6, 0);
/// First kernel able to load the module on aarch64
const MODULE_SINCE_ARM64: (u64, u64, u64) = (3, 4, 0);
/// First kernel able to run the eBPF probe on x86_64
const PROBE_SINCE_AMD64: (u64, u64, u64) = (4, 14, 0);
/// First kernel able to run the eBPF probe on aarch64
const PROBE_SINCE_ARM64: (u64, u64, u64) = (4, 17, 0);

/// A parsed kernel release, together with the architecture it runs on
///
/// Immutable once constructed. `fullversion` is always the dotted triple,
/// and `fullversion + fullextraversion` reproduces the input (build
/// metadata after `+` excepted, which no headers package name carries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelRelease {
    /// Kernel major version
    pub major: u64,
    /// Kernel minor version
    pub minor: u64,
    /// Kernel patch (sublevel) version
    pub patch: u64,
    /// The `major.minor.patch` triple as a string
    pub fullversion: String,
    /// First extraversion token (`957`, `arch1-1`, `1140-aws`), empty if none
    pub extraversion: String,
    /// The whole extraversion with its leading separator, empty if none
    pub fullextraversion: String,
    /// Architecture this kernel runs on
    pub architecture: Architecture,
}

fn release_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<major>0|[1-9]\d*)\.(?P<minor>0|[1-9]\d*)\.(?P<patch>0|[1-9]\d*)(?P<fullextra>[-.](?P<extra>0|[1-9]\d*|\d*[A-Za-z-][0-9A-Za-z-]*)(\.(0|[1-9]\d*|\d*[A-Za-z-][0-9A-Za-z-_]*))*)?(\+[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?$",
        )
        .expect("release pattern is a valid regex")
    })
}

impl KernelRelease {
    /// Parse a release string for the given architecture
    ///
    /// Rejects anything the grammar does not cover with an
    /// [`Error::KernelRelease`] naming the offending string.
    pub fn parse(release: &str, architecture: Architecture) -> Result<KernelRelease> {
        let caps = release_pattern()
            .captures(release)
            .ok_or_else(|| Error::kernel_release(release))?;

        let number = |name: &str| -> Result<u64> {
            caps[name]
                .parse::<u64>()
                .map_err(|_| Error::kernel_release(release))
        };
        let major = number("major")?;
        let minor = number("minor")?;
        let patch = number("patch")?;

        Ok(KernelRelease {
            major,
            minor,
            patch,
            fullversion: format!("{major}.{minor}.{patch}"),
            extraversion: caps
                .name("extra")
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default(),
            fullextraversion: caps
                .name("fullextra")
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default(),
            architecture,
        })
    }

    fn triple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }

    /// Whether a loadable kernel module can be built for this kernel
    pub fn supports_module(&self) -> bool {
        match self.architecture {
            Architecture::Amd64 => self.triple() >= MODULE_SINCE_AMD64,
            Architecture::Arm64 => self.triple() >= MODULE_SINCE_ARM64,
        }
    }

    /// Whether an eBPF probe can be built for this kernel
    pub fn supports_probe(&self) -> bool {
        match self.architecture {
            Architecture::Amd64 => self.triple() >= PROBE_SINCE_AMD64,
            Architecture::Arm64 => self.triple() >= PROBE_SINCE_ARM64,
        }
    }
}

impl fmt::Display for KernelRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.fullversion, self.fullextraversion)
    }
}
