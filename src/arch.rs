//! Build architectures and their spellings
//!
//! Kernel artifacts are built for a closed set of architectures. Each one has
//! two spellings in the wild: the Debian one (`amd64`, `arm64`) used by the
//! CLI, the image catalog keys, and Debian-family package names, and the
//! kernel one (`x86_64`, `aarch64`) used by RPM package names, kernel.org
//! paths, and the toolchain triples inside the builder images.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A CPU architecture kernel artifacts can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// 64-bit x86, spelled `amd64` (Debian) or `x86_64` (kernel)
    Amd64,
    /// 64-bit ARM, spelled `arm64` (Debian) or `aarch64` (kernel)
    Arm64,
}

impl Architecture {
    /// Every supported architecture, in stable order
    pub const ALL: [Architecture; 2] = [Architecture::Amd64, Architecture::Arm64];

    /// The kernel spelling (`x86_64` / `aarch64`)
    pub fn to_non_deb(self) -> &'static str {
        match self {
            Architecture::Amd64 => "x86_64",
            Architecture::Arm64 => "aarch64",
        }
    }

    /// The architecture of the machine driverkit itself runs on
    ///
    /// Used as the default when the user does not pass one explicitly, so
    /// plain `driverkit local` builds for the machine it runs on.
    pub fn host() -> Architecture {
        if cfg!(target_arch = "aarch64") {
            Architecture::Arm64
        } else {
            Architecture::Amd64
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Amd64 => write!(f, "amd64"),
            Architecture::Arm64 => write!(f, "arm64"),
        }
    }
}

impl FromStr for Architecture {
    type Err = Error;

    /// Accepts both spellings; everything else is a validation error
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" | "x86_64" => Ok(Architecture::Amd64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            other => Err(Error::validation(format!(
                "unsupported architecture: {other} (expected amd64 or arm64)"
            ))),
        }
    }
}
