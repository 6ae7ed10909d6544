use crate::errors::DirectoryError;
use crate::metrics_defs::DIRECTORY_REFRESH_FAILURES;
use async_trait::async_trait;
use ingest::shutdown::{Shutdown, triggered};
use serde::de::DeserializeOwned;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A lookup table that can be reloaded from a remote source.
#[async_trait]
pub trait Refresh: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reloads the table, returning the number of entries now held.
    async fn refresh(&self, client: &reqwest::Client) -> Result<usize, DirectoryError>;
}

pub async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
) -> Result<T, DirectoryError> {
    let fetch_error = |source| DirectoryError::Fetch {
        url: url.to_string(),
        source,
    };

    client
        .get(url.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(fetch_error)?
        .json()
        .await
        .map_err(fetch_error)
}

/// Refreshes `target` immediately and then every `period` until shutdown.
/// A failed refresh keeps the previous contents.
pub async fn refresh_loop(
    target: Arc<dyn Refresh>,
    client: reqwest::Client,
    period: Duration,
    shutdown: Shutdown,
) {
    let mut interval = tokio::time::interval(period);
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = interval.tick() => {},
            _ = triggered(&mut stop) => return,
        }

        match target.refresh(&client).await {
            Ok(entries) => tracing::info!(directory = target.name(), entries, "refreshed"),
            Err(e) => {
                counter!(DIRECTORY_REFRESH_FAILURES, "directory" => target.name()).increment(1);
                tracing::warn!(directory = target.name(), "refresh failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Refresh for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn refresh(&self, _client: &reqwest::Client) -> Result<usize, DirectoryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 0 {
                Err(DirectoryError::Io {
                    path: "remote".into(),
                    source: std::io::Error::other("unreachable"),
                })
            } else {
                Ok(call)
            }
        }
    }

    #[tokio::test]
    async fn test_loop_survives_failures_and_stops() {
        let target = Arc::new(Flaky::default());
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(refresh_loop(
            target.clone(),
            reqwest::Client::new(),
            Duration::from_millis(5),
            shutdown.clone(),
        ));

        while target.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.trigger();
        handle.await.unwrap();
    }
}
