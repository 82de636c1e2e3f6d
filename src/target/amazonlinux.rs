//! Amazon Linux kernel headers, discovered through the yum repo metadata
//!
//! No predictable URL scheme here: the blob store paths are hashed. The
//! mirror list is walked, each mirror's `primary.sqlite.gz` package
//! database is fetched, and the `kernel-devel` row matching the release
//! is looked up to recover the real package path.

use std::io;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use rusqlite::Connection;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::debug;

use super::{Target, TargetId};
use crate::build::Config;
use crate::kernelrelease::KernelRelease;
use crate::Result;

/// The 2018.03-era product line
pub struct AmazonLinux;

/// Amazon Linux 2
pub struct AmazonLinux2;

/// Amazon Linux 2022
pub struct AmazonLinux2022;

/// RPM `version` and `release` fields for a parsed kernel release
///
/// The release string embeds both plus the architecture
/// (`4.14.171-136.231.amzn2.x86_64`); the package database stores the
/// release without the trailing architecture.
fn package_filters(kr: &KernelRelease) -> (String, String) {
    let version = kr.fullversion.clone();
    let mut release = kr
        .fullextraversion
        .trim_start_matches(['-', '.'])
        .to_owned();
    let arch_suffix = format!(".{}", kr.architecture.to_non_deb());
    if let Some(stripped) = release.strip_suffix(&arch_suffix) {
        release = stripped.to_owned();
    }
    (version, release)
}

fn query_hrefs(conn: &Connection, version: &str, release: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT location_href FROM packages \
         WHERE name LIKE 'kernel-devel%' AND version = ?1 AND release = ?2 \
         ORDER BY location_href",
    )?;
    let rows = stmt.query_map(rusqlite::params![version, release], |row| {
        row.get::<_, String>(0)
    })?;
    let mut hrefs = Vec::new();
    for href in rows {
        hrefs.push(href?);
    }
    Ok(hrefs)
}

fn hrefs_from_db(compressed: &[u8], version: &str, release: &str) -> Result<Vec<String>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut db = NamedTempFile::new()?;
    io::copy(&mut decoder, &mut db)?;
    let conn = Connection::open(db.path())?;
    query_hrefs(&conn, version, release)
}

async fn discover(
    mirror_lists: &[String],
    kr: &KernelRelease,
    client: &reqwest::Client,
) -> Vec<String> {
    let (version, release) = package_filters(kr);
    let mut urls = Vec::new();
    for list_url in mirror_lists {
        let body = match client.get(list_url.as_str()).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => body,
                Err(error) => {
                    debug!(%list_url, %error, "failed reading mirror list");
                    continue;
                }
            },
            Ok(response) => {
                debug!(%list_url, status = %response.status(), "mirror list not available");
                continue;
            }
            Err(error) => {
                debug!(%list_url, %error, "failed fetching mirror list");
                continue;
            }
        };
        for mirror in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let mirror = mirror.trim_end_matches('/');
            let db_url = format!("{mirror}/repodata/primary.sqlite.gz");
            let compressed = match client.get(&db_url).send().await {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        debug!(%db_url, %error, "failed reading package db");
                        continue;
                    }
                },
                _ => {
                    debug!(%db_url, "package db not available");
                    continue;
                }
            };
            match hrefs_from_db(&compressed, &version, &release) {
                Ok(hrefs) => {
                    for href in hrefs {
                        urls.push(format!("{mirror}/{}", href.trim_start_matches("../")));
                    }
                }
                Err(error) => {
                    debug!(%db_url, %error, "package db lookup failed");
                }
            }
        }
    }
    urls
}

#[async_trait]
impl Target for AmazonLinux {
    fn name(&self) -> &'static str {
        TargetId::AmazonLinux.name()
    }

    fn template_script(&self) -> &'static str {
        "rpm.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        let lists = vec![
            "http://repo.us-east-1.amazonaws.com/latest/main/mirror.list".to_owned(),
            "http://repo.us-east-1.amazonaws.com/latest/updates/mirror.list".to_owned(),
        ];
        Ok(discover(&lists, kr, client).await)
    }

    fn template_data(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({
            "kernel_download_urls": urls.first().cloned().into_iter().collect::<Vec<_>>(),
        }))
    }
}

#[async_trait]
impl Target for AmazonLinux2 {
    fn name(&self) -> &'static str {
        TargetId::AmazonLinux2.name()
    }

    fn template_script(&self) -> &'static str {
        "rpm.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        let lists = vec![format!(
            "http://amazonlinux.us-east-1.amazonaws.com/2/core/latest/{}/mirror.list",
            kr.architecture.to_non_deb()
        )];
        Ok(discover(&lists, kr, client).await)
    }

    fn template_data(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({
            "kernel_download_urls": urls.first().cloned().into_iter().collect::<Vec<_>>(),
        }))
    }
}

#[async_trait]
impl Target for AmazonLinux2022 {
    fn name(&self) -> &'static str {
        TargetId::AmazonLinux2022.name()
    }

    fn template_script(&self) -> &'static str {
        "rpm.sh"
    }

    async fn urls(
        &self,
        _cfg: &Config<'_>,
        kr: &KernelRelease,
        client: &reqwest::Client,
    ) -> Result<Vec<String>> {
        let lists = vec![format!(
            "https://al2022-repos-us-east-1-9761ab97.s3.dualstack.us-east-1.amazonaws.com/core/mirrors/2022.0.20220202/{}/mirror.list",
            kr.architecture.to_non_deb()
        )];
        Ok(discover(&lists, kr, client).await)
    }

    fn template_data(
        &self,
        _cfg: &Config<'_>,
        _kr: &KernelRelease,
        urls: &[String],
    ) -> Result<serde_json::Value> {
        Ok(json!({
            "kernel_download_urls": urls.first().cloned().into_iter().collect::<Vec<_>>(),
        }))
    }
}
