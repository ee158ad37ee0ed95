//! Bounded-timeout URL existence checks.

use std::time::Duration;

use async_trait::async_trait;

/// Anything that can answer "does this URL exist for a human reader?".
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn is_reachable(&self, url: &str, timeout: Duration) -> bool;
}

/// `true` for statuses that mean the resource exists.
///
/// 403 and 405 are what bot protection answers for pages a browser can
/// open, so they count as reachable.
pub fn status_counts_as_reachable(status: u16) -> bool {
    (200..300).contains(&status) || status == 403 || status == 405
}

/// HTTP reachability check: HEAD first, GET as fallback.
#[derive(Debug, Clone)]
pub struct ReachabilityValidator {
    client: reqwest::Client,
}

impl ReachabilityValidator {
    pub fn new() -> inkflow_types::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                "Mozilla/5.0 (compatible; inkflow-linkcheck/",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| inkflow_types::FlowError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn probe(&self, method: reqwest::Method, url: &str, timeout: Duration) -> Option<u16> {
        match self
            .client
            .request(method.clone(), url)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(resp) => Some(resp.status().as_u16()),
            Err(e) => {
                tracing::debug!(url = %url, method = %method, error = %e, "Reachability probe failed");
                None
            }
        }
    }
}

#[async_trait]
impl ReachabilityCheck for ReachabilityValidator {
    async fn is_reachable(&self, url: &str, timeout: Duration) -> bool {
        if let Some(status) = self.probe(reqwest::Method::HEAD, url, timeout).await {
            if status_counts_as_reachable(status) {
                return true;
            }
            tracing::debug!(url = %url, status, "HEAD not accepted, falling back to GET");
        }
        let reachable = self
            .probe(reqwest::Method::GET, url, timeout)
            .await
            .is_some_and(status_counts_as_reachable);
        if !reachable {
            tracing::info!(url = %url, "URL is not reachable");
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    async fn check_status(status: usize) -> bool {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/page")
            .with_status(status)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/page")
            .with_status(status)
            .create_async()
            .await;
        let validator = ReachabilityValidator::new().unwrap();
        validator
            .is_reachable(&format!("{}/page", server.url()), TIMEOUT)
            .await
    }

    #[tokio::test]
    async fn status_200_is_reachable() {
        assert!(check_status(200).await);
    }

    #[tokio::test]
    async fn status_404_is_not_reachable() {
        assert!(!check_status(404).await);
    }

    #[tokio::test]
    async fn status_403_is_reachable() {
        assert!(check_status(403).await);
    }

    #[tokio::test]
    async fn status_405_is_reachable() {
        assert!(check_status(405).await);
    }

    #[tokio::test]
    async fn status_500_is_not_reachable() {
        assert!(!check_status(500).await);
    }

    #[tokio::test]
    async fn request_timeout_is_not_reachable() {
        // Accept connections but never answer.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let validator = ReachabilityValidator::new().unwrap();
        let started = std::time::Instant::now();
        let reachable = validator
            .is_reachable(&format!("http://{addr}/slow"), Duration::from_millis(200))
            .await;
        assert!(!reachable);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn get_fallback_when_head_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/article")
            .with_status(404)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/article")
            .with_status(200)
            .with_body("<html></html>")
            .create_async()
            .await;

        let validator = ReachabilityValidator::new().unwrap();
        assert!(
            validator
                .is_reachable(&format!("{}/article", server.url()), TIMEOUT)
                .await
        );
        get.assert_async().await;
    }

    #[tokio::test]
    async fn connection_refused_is_not_reachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let validator = ReachabilityValidator::new().unwrap();
        assert!(!validator.is_reachable(&format!("http://{addr}/"), TIMEOUT).await);
    }

    #[test]
    fn status_table() {
        assert!(status_counts_as_reachable(200));
        assert!(status_counts_as_reachable(204));
        assert!(status_counts_as_reachable(403));
        assert!(status_counts_as_reachable(405));
        assert!(!status_counts_as_reachable(301));
        assert!(!status_counts_as_reachable(404));
        assert!(!status_counts_as_reachable(429));
        assert!(!status_counts_as_reachable(500));
    }
}
