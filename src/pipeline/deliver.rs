use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::db::Repository;
use crate::error::Result;
use crate::models::Article;
use crate::services::Notifier;

/// Upper bound on a single wait between send attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Sends at most one pending article per call.
pub struct Deliverer<N> {
    notifier: N,
    config: DeliveryConfig,
}

impl<N: Notifier> Deliverer<N> {
    pub fn new(notifier: N, config: DeliveryConfig) -> Self {
        Self { notifier, config }
    }

    /// Pick the next pending article, send it and mark it delivered.
    ///
    /// Returns `Ok(None)` when nothing is pending. If the notifier still
    /// fails after the configured retries the error is returned and the
    /// article stays pending for the next cycle.
    pub async fn deliver_next(&self, repo: &Repository) -> Result<Option<Article>> {
        let Some(article) = repo.next_pending(self.config.order).await? else {
            tracing::debug!("No pending articles");
            return Ok(None);
        };

        self.send_with_retry(&article).await?;

        repo.mark_delivered(article.id).await?;
        tracing::info!(id = article.id, source = %article.source, url = %article.url, "Delivered article");
        Ok(Some(article))
    }

    async fn send_with_retry(&self, article: &Article) -> Result<()> {
        let body = article.message_body();
        let mut attempt = 0;

        loop {
            match self.notifier.send(&body).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 < self.config.max_attempts => {
                    let backoff = backoff_delay(self.config.retry_backoff_secs, attempt);
                    tracing::warn!(
                        id = article.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Send failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(id = article.id, url = %article.url, error = %e, "Giving up on article for this cycle");
                    return Err(e);
                }
            }
        }
    }
}

/// `base * 2^attempt` seconds, saturating and capped at [`MAX_BACKOFF`].
fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(base_secs.saturating_mul(factor)).min(MAX_BACKOFF)
}
