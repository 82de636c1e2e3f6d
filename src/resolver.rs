//! HEAD-probing URL resolver
//!
//! Targets emit *candidate* headers URLs covering every release line a
//! kernel might come from; most of them do not exist. The resolver probes
//! each candidate with an HTTP HEAD and keeps the ones answering 200, in
//! input order. Mirror fallback is achieved by listing more candidates, not
//! by retrying any single one.

use reqwest::StatusCode;

use crate::{Error, Result};

/// Probes candidate URLs against a shared HTTP client
pub struct UrlResolver<'a> {
    client: &'a reqwest::Client,
}

impl<'a> UrlResolver<'a> {
    /// Create a resolver borrowing the invocation-wide HTTP client
    pub fn new(client: &'a reqwest::Client) -> Self {
        UrlResolver { client }
    }

    /// Keep the candidates that answer HTTP 200, preserving input order
    ///
    /// Individual probe failures — 404s, refused connections, timeouts —
    /// only drop that candidate; they are logged at debug and never fail
    /// the call.
    pub async fn resolve(&self, candidates: &[String]) -> Vec<String> {
        let mut resolved = Vec::new();
        for url in candidates {
            match self.client.head(url).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    tracing::debug!(url = %url, "kernel headers URL resolved");
                    resolved.push(url.clone());
                }
                Ok(response) => {
                    tracing::debug!(
                        url = %url,
                        status = %response.status(),
                        "kernel headers URL dropped"
                    );
                }
                Err(err) => {
                    tracing::debug!(url = %url, error = %err, "kernel headers probe failed");
                }
            }
        }
        resolved
    }

    /// Resolve and enforce the target's minimum-URL threshold
    ///
    /// `minimum` 0 is legal (entitlement-based targets carry no URLs); the
    /// error names the target and release, since by the time a build fails
    /// here no individual mirror is to blame.
    pub async fn resolve_with_minimum(
        &self,
        candidates: &[String],
        minimum: usize,
        target: &str,
        kernel_release: &str,
    ) -> Result<Vec<String>> {
        let resolved = self.resolve(candidates).await;
        if resolved.len() < minimum {
            return Err(Error::headers_not_found(target, kernel_release));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn resolution_keeps_input_order_and_drops_misses() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("HEAD", "/missing.rpm")
            .with_status(404)
            .create_async()
            .await;
        let _first = server
            .mock("HEAD", "/first.rpm")
            .with_status(200)
            .create_async()
            .await;
        let _second = server
            .mock("HEAD", "/second.rpm")
            .with_status(200)
            .create_async()
            .await;

        let candidates = vec![
            format!("{}/missing.rpm", server.url()),
            format!("{}/first.rpm", server.url()),
            format!("{}/second.rpm", server.url()),
        ];
        let http = client();
        let resolved = UrlResolver::new(&http).resolve(&candidates).await;
        assert_eq!(resolved, &candidates[1..]);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("HEAD", "/a")
            .with_status(200)
            .expect_at_least(2)
            .create_async()
            .await;
        let _b = server
            .mock("HEAD", "/b")
            .with_status(403)
            .create_async()
            .await;

        let candidates = vec![
            format!("{}/a", server.url()),
            format!("{}/b", server.url()),
        ];
        let http = client();
        let resolver = UrlResolver::new(&http);
        let once = resolver.resolve(&candidates).await;
        let twice = resolver.resolve(&once).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn connection_failures_are_silent_per_candidate() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("HEAD", "/ok")
            .with_status(200)
            .create_async()
            .await;

        // Port 9 (discard) is not listening; the probe error must only drop
        // that candidate.
        let candidates = vec![
            "http://127.0.0.1:9/unreachable".to_owned(),
            format!("{}/ok", server.url()),
        ];
        let http = client();
        let resolved = UrlResolver::new(&http).resolve(&candidates).await;
        assert_eq!(resolved, vec![format!("{}/ok", server.url())]);
    }

    #[tokio::test]
    async fn empty_resolution_is_a_headers_not_found_error() {
        let mut server = mockito::Server::new_async().await;
        let _gone = server
            .mock("HEAD", "/gone")
            .with_status(404)
            .create_async()
            .await;

        let candidates = vec![format!("{}/gone", server.url())];
        let http = client();
        let err = UrlResolver::new(&http)
            .resolve_with_minimum(&candidates, 1, "centos", "3.10.0-957.el7.x86_64")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "kernel headers not found for centos 3.10.0-957.el7.x86_64"
        );
    }

    #[tokio::test]
    async fn minimum_overrides_the_empty_check() {
        let mut server = mockito::Server::new_async().await;
        let _arch = server
            .mock("HEAD", "/arch.deb")
            .with_status(200)
            .create_async()
            .await;
        let _all = server
            .mock("HEAD", "/all.deb")
            .with_status(404)
            .create_async()
            .await;

        let candidates = vec![
            format!("{}/arch.deb", server.url()),
            format!("{}/all.deb", server.url()),
        ];
        let http = client();
        let resolver = UrlResolver::new(&http);

        // One of two resolves; minimum 2 fails even though the list is not empty.
        let err = resolver
            .resolve_with_minimum(&candidates, 2, "ubuntu", "4.15.0-1140-aws")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HeadersNotFound { .. }));

        // Minimum 0 always succeeds, even with nothing resolvable.
        let none = resolver
            .resolve_with_minimum(&[], 0, "sles", "5.14.21-150400.24.63-default")
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
