use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::{Config, ScheduleConfig};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::Article;
use crate::services::Notifier;

use super::{Deliverer, IngestReport, Ingestor};

/// Ingestion, delivery and the sleep between cycles.
pub struct Relay<N> {
    repository: Repository,
    ingestor: Ingestor,
    deliverer: Deliverer<N>,
    schedule: ScheduleConfig,
    exit_on_failure: bool,
}

impl<N: Notifier> Relay<N> {
    pub fn new(config: &Config, repository: Repository, notifier: N) -> Result<Self> {
        let ingestor = Ingestor::new(config)?;
        tracing::info!(sources = ?ingestor.source_names().collect::<Vec<_>>(), "Sources enabled");

        Ok(Self {
            repository,
            ingestor,
            deliverer: Deliverer::new(notifier, config.delivery.clone()),
            schedule: config.schedule.clone(),
            exit_on_failure: config.delivery.exit_on_failure,
        })
    }

    /// Ingest every source, then deliver at most one article.
    pub async fn run_cycle(&self) -> Result<(IngestReport, Option<Article>)> {
        let report = self.ingestor.run(&self.repository).await;
        tracing::info!(
            pages = report.pages_fetched,
            failed_pages = report.pages_failed,
            candidates = report.candidates,
            inserted = report.inserted,
            insert_failures = report.insert_failures,
            "Ingestion finished"
        );

        let delivered = self.deliverer.deliver_next(&self.repository).await?;
        Ok((report, delivered))
    }

    /// Cycle until Ctrl-C, sleeping a random interval between cycles.
    pub async fn run_forever(&self) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Cycle until `shutdown` resolves.
    ///
    /// The same `shutdown` future is watched during cycles and during the
    /// sleeps, so an interrupt is never missed. A cycle cut short leaves its
    /// article pending.
    pub async fn run_until<F: Future>(&self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        self.handle_cycle_error(e)?;
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Interrupted during cycle, shutting down");
                    return Ok(());
                }
            }

            let pause = sleep_duration(&self.schedule);
            tracing::info!("Next run in {:?}", pause);

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = &mut shutdown => {
                    tracing::info!("Interrupted, shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Decide whether a failed cycle stops the loop.
    ///
    /// Notifier failures are returned when `delivery.exit_on_failure` is
    /// set; everything else is logged and the next cycle tries again.
    fn handle_cycle_error(&self, e: AppError) -> Result<()> {
        if self.exit_on_failure && matches!(e, AppError::Notifier(_)) {
            return Err(e);
        }
        tracing::error!(error = %e, "Cycle failed");
        Ok(())
    }
}

/// Uniformly random whole seconds within the configured minute range.
pub fn sleep_duration(schedule: &ScheduleConfig) -> Duration {
    let min = schedule.min_sleep_minutes.saturating_mul(60);
    let max = schedule.max_sleep_minutes.saturating_mul(60).max(min);
    Duration::from_secs(rand::rng().random_range(min..=max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tokio::sync::oneshot;

    use crate::models::NewArticle;
    use crate::pipeline::deliver::tests::FakeNotifier;

    /// Fails every send and fires `interrupt` on the first one.
    struct InterruptingNotifier {
        interrupt: Mutex<Option<oneshot::Sender<()>>>,
    }

    impl Notifier for InterruptingNotifier {
        async fn send(&self, _text: &str) -> Result<()> {
            if let Some(tx) = self.interrupt.lock().unwrap().take() {
                let _ = tx.send(());
            }
            Err(AppError::Notifier("chat unreachable".to_string()))
        }
    }

    async fn relay_with_backlog<N: Notifier>(notifier: N, exit_on_failure: bool) -> Relay<N> {
        let mut config = Config::parse("[telegram]\nbot_token = \"t\"\nchat_id = 1\n").unwrap();
        config.sources.clear();
        config.delivery.retry_backoff_secs = 0;
        config.delivery.max_attempts = 1;
        config.delivery.exit_on_failure = exit_on_failure;

        let repository = Repository::in_memory().await.unwrap();
        repository
            .insert_if_absent(NewArticle {
                title: "Stuck story".to_string(),
                url: "https://x/1".to_string(),
                source: "siteA".to_string(),
                published_at: "2024-01-01".to_string(),
            })
            .await
            .unwrap();

        Relay::new(&config, repository, notifier).unwrap()
    }

    #[test]
    fn sleep_stays_within_range() {
        let schedule = ScheduleConfig {
            min_sleep_minutes: 1,
            max_sleep_minutes: 15,
        };
        for _ in 0..200 {
            let pause = sleep_duration(&schedule);
            assert!(pause >= Duration::from_secs(60));
            assert!(pause <= Duration::from_secs(15 * 60));
        }

        let fixed = ScheduleConfig {
            min_sleep_minutes: 2,
            max_sleep_minutes: 2,
        };
        assert_eq!(sleep_duration(&fixed), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn cycle_without_sources_delivers_backlog() {
        let mut config = Config::parse("[telegram]\nbot_token = \"t\"\nchat_id = 1\n").unwrap();
        config.sources.clear();
        config.delivery.retry_backoff_secs = 0;

        let repository = Repository::in_memory().await.unwrap();
        repository
            .insert_if_absent(NewArticle {
                title: "Backlog story".to_string(),
                url: "https://x/1".to_string(),
                source: "siteA".to_string(),
                published_at: "2024-01-01".to_string(),
            })
            .await
            .unwrap();

        let relay = Relay::new(&config, repository, FakeNotifier::default()).unwrap();

        let (report, delivered) = relay.run_cycle().await.unwrap();
        assert_eq!(report, IngestReport::default());
        assert_eq!(delivered.unwrap().url, "https://x/1");

        let (_, delivered) = relay.run_cycle().await.unwrap();
        assert!(delivered.is_none());
    }

    #[tokio::test]
    async fn failing_notifier_surfaces_from_cycle() {
        let mut config = Config::parse("[telegram]\nbot_token = \"t\"\nchat_id = 1\n").unwrap();
        config.sources.clear();
        config.delivery.retry_backoff_secs = 0;
        config.delivery.max_attempts = 1;

        let repository = Repository::in_memory().await.unwrap();
        repository
            .insert_if_absent(NewArticle {
                title: "Stuck story".to_string(),
                url: "https://x/1".to_string(),
                source: "siteA".to_string(),
                published_at: "2024-01-01".to_string(),
            })
            .await
            .unwrap();

        let relay = Relay::new(&config, repository, FakeNotifier::failing(usize::MAX)).unwrap();
        assert!(matches!(relay.run_cycle().await, Err(AppError::Notifier(_))));
        assert_eq!(relay.repository.pending_count().await.unwrap(), 1);
    }

    #[test]
    fn huge_sleep_range_saturates() {
        let schedule = ScheduleConfig {
            min_sleep_minutes: u64::MAX,
            max_sleep_minutes: u64::MAX,
        };
        assert_eq!(sleep_duration(&schedule), Duration::from_secs(u64::MAX));
    }

    #[tokio::test]
    async fn notifier_failure_is_fatal_only_when_configured() {
        let lenient = relay_with_backlog(FakeNotifier::default(), false).await;
        assert!(lenient
            .handle_cycle_error(AppError::Notifier("down".to_string()))
            .is_ok());

        let strict = relay_with_backlog(FakeNotifier::default(), true).await;
        assert!(matches!(
            strict.handle_cycle_error(AppError::Notifier("down".to_string())),
            Err(AppError::Notifier(_))
        ));
        // other failures never stop the loop
        assert!(strict
            .handle_cycle_error(AppError::Config("store hiccup".to_string()))
            .is_ok());
    }

    #[tokio::test]
    async fn loop_returns_notifier_error_when_exit_on_failure() {
        let relay = relay_with_backlog(FakeNotifier::failing(usize::MAX), true).await;

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            relay.run_until(std::future::pending::<()>()),
        )
        .await
        .expect("loop should stop on the first failed delivery");

        assert!(matches!(result, Err(AppError::Notifier(_))));
        assert_eq!(relay.repository.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn interrupt_during_cycle_stops_loop_and_keeps_article_pending() {
        let (tx, rx) = oneshot::channel();
        let notifier = InterruptingNotifier {
            interrupt: Mutex::new(Some(tx)),
        };
        let relay = relay_with_backlog(notifier, false).await;

        // the sleep between cycles is at least a minute, so finishing well
        // inside the timeout means the interrupt raised mid-cycle was seen
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            relay.run_until(async {
                let _ = rx.await;
            }),
        )
        .await
        .expect("interrupt raised during the cycle was lost");

        assert!(result.is_ok());
        assert_eq!(relay.repository.pending_count().await.unwrap(), 1);
    }
}
