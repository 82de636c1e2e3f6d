//! Builder image catalog and toolchain selection
//!
//! Builder images are published per `(target, arch, gcc)` and described by a
//! YAML index with a top-level `images:` list. The catalog loads one or more
//! indexes (local files or URLs), filters out entries that cannot serve the
//! current architecture, and picks the image whose toolchain best matches
//! the requested GCC version.

use std::str::FromStr;

use semver::Version;
use serde::Deserialize;

use crate::arch::Architecture;
use crate::target::TargetId;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    images: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    arch: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    gcc_versions: Vec<String>,
}

/// One usable builder image for a `(target, gcc)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Target the image can build for
    pub target: TargetId,
    /// GCC version the image ships
    pub gcc_version: Version,
    /// Fully-qualified image reference, tag included
    pub name: String,
}

/// The filtered set of builder images for one architecture
#[derive(Debug, Default)]
pub struct ImageCatalog {
    images: Vec<Image>,
}

/// Parse a GCC version leniently: `8` and `4.8` pad out to full semver
pub fn parse_gcc(s: &str) -> Option<Version> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }
    let mut parts = s.splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some(Version::new(major, minor, patch))
}

impl ImageCatalog {
    /// An empty catalog; valid when `custom_builder_image` overrides it
    pub fn empty() -> Self {
        ImageCatalog::default()
    }

    /// Parse one YAML index for the given architecture
    ///
    /// Unparseable documents and malformed entries contribute nothing; an
    /// empty catalog is a legal outcome, not an error.
    pub fn parse(yaml: &str, arch: Architecture) -> Self {
        let file: CatalogFile = match serde_yaml::from_str(yaml) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(error = %err, "builder image index is not valid YAML, ignoring");
                return ImageCatalog::empty();
            }
        };

        let mut images = Vec::new();
        for entry in file.images {
            if entry.name.is_empty() || entry.gcc_versions.is_empty() {
                continue;
            }
            // An entry that does not say its arch is taken to be built for
            // the machine driverkit runs on.
            let entry_arch = match entry.arch.as_deref() {
                None => Architecture::host(),
                Some(spelled) => match Architecture::from_str(spelled) {
                    Ok(parsed) => parsed,
                    Err(_) => continue,
                },
            };
            if entry_arch != arch {
                continue;
            }
            let target = match TargetId::from_str(&entry.target) {
                Ok(target) => target,
                Err(_) => continue,
            };
            let name = full_reference(&entry.name, entry.tag.as_deref());
            for gcc in &entry.gcc_versions {
                match parse_gcc(gcc) {
                    Some(gcc_version) => images.push(Image {
                        target,
                        gcc_version,
                        name: name.clone(),
                    }),
                    None => {
                        tracing::debug!(image = %name, gcc = %gcc, "skipping unparseable GCC version");
                    }
                }
            }
        }
        ImageCatalog { images }
    }

    /// Load and concatenate indexes from local paths and URLs, in order
    pub async fn load(sources: &[String], arch: Architecture, client: &reqwest::Client) -> Self {
        let mut images = Vec::new();
        for source in sources {
            let text = if source.starts_with("http://") || source.starts_with("https://") {
                match fetch_index(client, source).await {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(source = %source, error = %err, "builder image index unavailable");
                        continue;
                    }
                }
            } else {
                match tokio::fs::read_to_string(source).await {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(source = %source, error = %err, "builder image index unreadable");
                        continue;
                    }
                }
            };
            images.extend(ImageCatalog::parse(&text, arch).images);
        }
        ImageCatalog { images }
    }

    /// Pick the image for `(target, gcc)` with proximity fallback
    ///
    /// Exact or next-lower GCC wins; otherwise the next-higher; a target
    /// with no images at all is an error.
    pub fn pick(&self, target: TargetId, gcc: &Version) -> Result<&Image> {
        let mut of_target: Vec<&Image> =
            self.images.iter().filter(|i| i.target == target).collect();
        of_target.sort_by(|a, b| a.gcc_version.cmp(&b.gcc_version));

        if let Some(image) = of_target.iter().rev().find(|i| i.gcc_version <= *gcc) {
            return Ok(image);
        }
        if let Some(image) = of_target.first() {
            return Ok(image);
        }
        Err(Error::no_builder_image(target.name(), gcc.to_string()))
    }

    /// All images, in load order
    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    /// Whether the catalog holds no image
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

async fn fetch_index(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

fn full_reference(name: &str, tag: Option<&str>) -> String {
    if let Some(tag) = tag.filter(|t| !t.is_empty()) {
        return format!("{name}:{tag}");
    }
    // A bare repository gets :latest; a name already carrying a tag is kept.
    let after_slash = name.rsplit('/').next().unwrap_or(name);
    if after_slash.contains(':') {
        name.to_owned()
    } else {
        format!("{name}:latest")
    }
}
