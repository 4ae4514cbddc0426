use futures::stream::{self, StreamExt};
use url::Url;

use crate::config::Config;
use crate::date;
use crate::db::Repository;
use crate::error::Result;
use crate::models::Candidate;
use crate::source::{PageFetcher, SourceExtractor};

/// Totals for one ingestion pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub candidates: usize,
    pub inserted: usize,
    pub insert_failures: usize,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.pages_fetched += other.pages_fetched;
        self.pages_failed += other.pages_failed;
        self.candidates += other.candidates;
        self.inserted += other.inserted;
        self.insert_failures += other.insert_failures;
    }
}

/// Runs every enabled source over its seed pages and stores what it finds.
pub struct Ingestor {
    fetcher: PageFetcher,
    extractors: Vec<SourceExtractor>,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(config: &Config) -> Result<Self> {
        let extractors = config
            .enabled_sources()
            .map(SourceExtractor::from_rule)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            fetcher: PageFetcher::new(&config.fetch)?,
            extractors,
            concurrency: config.fetch.concurrency,
        })
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.extractors.iter().map(|e| e.name())
    }

    /// One pass over all seed pages.
    ///
    /// Pages are downloaded concurrently; inserts run afterwards one at a
    /// time in source then seed order. A page that fails to download is
    /// logged and skipped.
    pub async fn run(&self, repo: &Repository) -> IngestReport {
        let seeds: Vec<(&SourceExtractor, &Url)> = self
            .extractors
            .iter()
            .flat_map(|extractor| extractor.seed_urls().iter().map(move |url| (extractor, url)))
            .collect();

        let pages: Vec<_> = stream::iter(seeds)
            .map(|(extractor, url)| async move {
                let page = self.fetcher.fetch_page(url).await;
                (extractor, url, page)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = IngestReport::default();
        for (extractor, url, page) in pages {
            match page {
                Ok(html) => {
                    report.pages_fetched += 1;
                    let candidates = extractor.extract_page(&html, url);
                    tracing::debug!(
                        source = extractor.name(),
                        %url,
                        count = candidates.len(),
                        "Extracted candidates"
                    );
                    report.absorb(store_candidates(repo, extractor.name(), candidates).await);
                }
                Err(e) => {
                    report.pages_failed += 1;
                    tracing::warn!(source = extractor.name(), %url, error = %e, "Failed to fetch seed page");
                }
            }
        }

        report
    }
}

/// Normalize dates and insert, ignoring urls already stored.
///
/// Insert failures are logged and counted; the remaining candidates are
/// still attempted.
pub async fn store_candidates(
    repo: &Repository,
    source: &str,
    candidates: impl IntoIterator<Item = Candidate>,
) -> IngestReport {
    let mut report = IngestReport::default();

    for candidate in candidates {
        report.candidates += 1;
        let published_at = date::normalize(&candidate.raw_date);
        let url = candidate.url.clone();

        match repo
            .insert_if_absent(candidate.into_new_article(source, published_at))
            .await
        {
            Ok(true) => {
                report.inserted += 1;
                tracing::debug!(source, %url, "New article");
            }
            Ok(false) => {}
            Err(e) => {
                report.insert_failures += 1;
                tracing::error!(source, %url, error = %e, "Failed to insert article");
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryOrder;
    use crate::source::SourceRule;

    fn candidate(title: &str, url: &str, raw_date: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            url: url.to_string(),
            raw_date: raw_date.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_in_same_cycle_keeps_first_write() {
        let repo = Repository::in_memory().await.unwrap();

        let report = store_candidates(
            &repo,
            "siteA",
            vec![
                candidate("T1", "https://x/1", "1/1/2024"),
                candidate("T1 dup", "https://x/1", "2/1/2024"),
            ],
        )
        .await;

        assert_eq!(report.candidates, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.insert_failures, 0);
        assert_eq!(repo.pending_count().await.unwrap(), 1);

        let stored = repo.get_article_by_url("https://x/1").await.unwrap().unwrap();
        assert_eq!(stored.title, "T1");
        assert_eq!(stored.source, "siteA");
        assert_eq!(stored.published_at, "2024-01-01");
    }

    #[tokio::test]
    async fn second_cycle_inserts_only_new_urls() {
        let repo = Repository::in_memory().await.unwrap();
        store_candidates(&repo, "siteA", vec![candidate("Story one", "https://x/1", "")]).await;

        let report = store_candidates(
            &repo,
            "siteA",
            vec![
                candidate("Story one", "https://x/1", ""),
                candidate("Story two", "https://x/2", "9/10/2024"),
            ],
        )
        .await;
        assert_eq!(report.inserted, 1);

        let next = repo
            .next_pending(DeliveryOrder::NewestFirst)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.url, "https://x/2");
        assert_eq!(next.published_at, "2024-10-09");
    }

    #[tokio::test]
    async fn extracted_page_flows_into_store() {
        let repo = Repository::in_memory().await.unwrap();
        let rule = SourceRule {
            name: "siteA".to_string(),
            seed_urls: vec!["https://x/".to_string()],
            item_selector: "h3.title-news a".to_string(),
            date_selector: "span.date".to_string(),
            enabled: true,
        };
        let extractor = SourceExtractor::from_rule(&rule).unwrap();
        let page = Url::parse("https://x/").unwrap();
        let html = r#"
            <h3 class="title-news"><a href="/1">Story one</a><span class="date">1/1/2024</span></h3>
            <h3 class="title-news"><a href="/1">Story one again</a></h3>
            <h3 class="title-news"><a href="/2">abc</a></h3>
        "#;

        let report = store_candidates(&repo, extractor.name(), extractor.extract_page(html, &page)).await;

        assert_eq!(report.candidates, 2);
        assert_eq!(report.inserted, 1);
        let stored = repo.get_article_by_url("https://x/1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Story one");
        assert_eq!(stored.published_at, "2024-01-01");
        assert!(repo.get_article_by_url("https://x/2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_seed_does_not_abort_cycle() {
        let repo = Repository::in_memory().await.unwrap();
        let mut config = Config::parse("[telegram]\nbot_token = \"t\"\nchat_id = 1\n").unwrap();
        config.fetch.timeout_secs = 2;
        config.fetch.connect_timeout_secs = 1;
        config.sources = vec![SourceRule {
            name: "down".to_string(),
            // port 9 (discard) on localhost is expected to refuse connections
            seed_urls: vec![
                "http://127.0.0.1:9/a".to_string(),
                "http://127.0.0.1:9/b".to_string(),
            ],
            item_selector: "a".to_string(),
            date_selector: "span.date".to_string(),
            enabled: true,
        }];

        let ingestor = Ingestor::new(&config).unwrap();
        assert_eq!(ingestor.source_names().collect::<Vec<_>>(), vec!["down"]);

        let report = ingestor.run(&repo).await;
        assert_eq!(report.pages_failed, 2);
        assert_eq!(report.pages_fetched, 0);
        assert_eq!(repo.pending_count().await.unwrap(), 0);
    }
}
