//! Per-feed processing: fetch → parse → diff → deliver → persist.
//!
//! Feeds are processed one at a time, and the list is saved to disk after
//! each feed completes, so an interrupted run loses at most the in-flight
//! feed's progress. Failures are local to one feed and never abort the rest
//! of the run; only feed-list I/O failures are fatal.

use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::deliver::{DeliverError, Mailer};
use crate::feed::{self, FetchError, MissingId, ParseError};
use crate::store::{FeedList, FeedRecord, StoreError};

/// Why one feed was skipped (or cut short) this cycle.
///
/// None of these touch the stored watermark, except `Deliver`, which may have
/// advanced it through the entries that were delivered before the failure.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Deliver(#[from] DeliverError),
}

/// Result of one feed's processing pass.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Entries the diff engine classified as unseen.
    pub unseen: usize,
    /// Entries actually handed to the mail transport (0 in sync mode).
    pub delivered: usize,
    /// Whether the record's watermark moved this pass.
    pub watermark_advanced: bool,
}

/// Processes a single feed against its record.
///
/// In sync mode (`mailer` is `None`) the watermark advances over all unseen
/// entries without delivering anything. In run mode, entries are delivered
/// oldest-first and the watermark advances only through entries whose
/// delivery succeeded; a transport failure stops the loop and is returned
/// after the partial progress has been recorded.
///
/// If the entry the watermark would advance to has no usable identifier, the
/// previous watermark is kept and a warning is logged — persisting an empty
/// watermark would re-classify the whole feed as unseen next run.
pub async fn process_feed(
    client: &reqwest::Client,
    record: &mut FeedRecord,
    mailer: Option<&Mailer>,
    config: &Config,
) -> Result<ProcessOutcome, ProcessError> {
    let bytes = feed::fetch_document(
        client,
        &record.xml_url,
        Duration::from_secs(config.fetch_timeout_secs),
        config.max_feed_size,
    )
    .await?;

    let parsed = feed::parse(&bytes)?;
    let unseen = feed::unseen(&parsed, record.watermark());

    if unseen.is_empty() {
        return Ok(ProcessOutcome::default());
    }

    let Some(mailer) = mailer else {
        // Sync: record everything as seen without delivering.
        let advanced = advance_watermark(record, unseen);
        return Ok(ProcessOutcome {
            unseen: unseen.len(),
            delivered: 0,
            watermark_advanced: advanced,
        });
    };

    // Deliver oldest-first so that, if interrupted, the oldest remaining
    // entries are still pending rather than silently dropped.
    let mut delivered = 0usize;
    let mut failure = None;
    for entry in unseen.iter().rev() {
        match mailer.deliver(&record.title, entry).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let mut advanced = false;
    if delivered > 0 {
        // The newest delivered entry is the watermark candidate.
        let delivered_slice = &unseen[unseen.len() - delivered..];
        advanced = advance_watermark(record, delivered_slice);
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(ProcessOutcome {
            unseen: unseen.len(),
            delivered,
            watermark_advanced: advanced,
        }),
    }
}

fn advance_watermark(record: &mut FeedRecord, consumed: &[feed::Entry]) -> bool {
    match feed::next_watermark(consumed) {
        Ok(Some(id)) => {
            record.set_watermark(id.to_string());
            true
        }
        Ok(None) => false,
        Err(MissingId) => {
            tracing::warn!(
                feed = %record.title,
                "Newest entry has no usable identifier; keeping previous watermark \
                 (it will be reprocessed next run)"
            );
            false
        }
    }
}

/// Processes every feed in the list sequentially, saving after each one.
///
/// Per-feed failures are logged and processing continues; a save failure is
/// fatal because continuing would widen the window of lost progress.
pub async fn run_all(
    client: &reqwest::Client,
    list: &mut FeedList,
    mailer: Option<&Mailer>,
    config: &Config,
) -> Result<(), StoreError> {
    for index in 0..list.len() {
        let record = &mut list.records_mut()[index];
        let title = record.title.clone();

        match process_feed(client, record, mailer, config).await {
            Ok(outcome) if outcome.unseen == 0 => {
                tracing::info!(feed = %title, "Nothing new");
            }
            Ok(outcome) if mailer.is_some() => {
                tracing::info!(
                    feed = %title,
                    unseen = outcome.unseen,
                    delivered = outcome.delivered,
                    "Delivered new entries"
                );
            }
            Ok(outcome) => {
                tracing::info!(feed = %title, unseen = outcome.unseen, "Synced new entries");
            }
            Err(ProcessError::Deliver(e)) => {
                tracing::warn!(
                    feed = %title,
                    error = %e,
                    "Delivery interrupted; undelivered entries remain pending for next run"
                );
            }
            Err(e) => {
                tracing::warn!(feed = %title, error = %e, "Skipping feed this cycle");
            }
        }

        // Persist immediately after each feed, as the watermark may have
        // moved even on a partial delivery.
        list.save()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS_THREE_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item><guid>3</guid><title>Third</title></item>
  <item><guid>2</guid><title>Second</title></item>
  <item><guid>1</guid><title>First</title></item>
</channel></rss>"#;

    async fn serve(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&server)
            .await;
        server
    }

    fn record_for(server: &MockServer) -> FeedRecord {
        FeedRecord::new("Test Feed".to_string(), format!("{}/feed", server.uri()))
    }

    #[tokio::test]
    async fn test_sync_advances_watermark_to_newest() {
        let server = serve(RSS_THREE_ITEMS).await;
        let mut record = record_for(&server);
        let client = reqwest::Client::new();

        let outcome = process_feed(&client, &mut record, None, &Config::default())
            .await
            .unwrap();
        assert_eq!(outcome.unseen, 3);
        assert_eq!(outcome.delivered, 0);
        assert!(outcome.watermark_advanced);
        assert_eq!(record.watermark(), Some("3"));
    }

    #[tokio::test]
    async fn test_second_pass_sees_nothing_new() {
        let server = serve(RSS_THREE_ITEMS).await;
        let mut record = record_for(&server);
        let client = reqwest::Client::new();
        let config = Config::default();

        process_feed(&client, &mut record, None, &config)
            .await
            .unwrap();
        let outcome = process_feed(&client, &mut record, None, &config)
            .await
            .unwrap();
        assert_eq!(outcome.unseen, 0);
        assert!(!outcome.watermark_advanced);
        assert_eq!(record.watermark(), Some("3"));
    }

    #[tokio::test]
    async fn test_mid_feed_watermark_yields_prefix() {
        let server = serve(RSS_THREE_ITEMS).await;
        let mut record = record_for(&server);
        record.set_watermark("2".to_string());
        let client = reqwest::Client::new();

        let outcome = process_feed(&client, &mut record, None, &Config::default())
            .await
            .unwrap();
        assert_eq!(outcome.unseen, 1);
        assert_eq!(record.watermark(), Some("3"));
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_watermark_untouched() {
        let server = serve("<html><body>not a feed</body></html>").await;
        let mut record = record_for(&server);
        record.set_watermark("2".to_string());
        let client = reqwest::Client::new();

        let result = process_feed(&client, &mut record, None, &Config::default()).await;
        assert!(matches!(result, Err(ProcessError::Parse(_))));
        assert_eq!(record.watermark(), Some("2"));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_watermark_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let mut record = record_for(&server);
        record.set_watermark("2".to_string());
        let client = reqwest::Client::new();

        let result = process_feed(&client, &mut record, None, &Config::default()).await;
        assert!(matches!(
            result,
            Err(ProcessError::Fetch(FetchError::HttpStatus(500)))
        ));
        assert_eq!(record.watermark(), Some("2"));
    }

    #[tokio::test]
    async fn test_missing_id_blocks_watermark() {
        // The newest item has no id source at all; advancing past it would
        // persist an empty watermark.
        let body = r#"<rss version="2.0"><channel>
  <item></item>
  <item><guid>1</guid></item>
</channel></rss>"#;
        let server = serve(body).await;
        let mut record = record_for(&server);
        record.set_watermark("1".to_string());
        let client = reqwest::Client::new();

        let outcome = process_feed(&client, &mut record, None, &Config::default())
            .await
            .unwrap();
        assert_eq!(outcome.unseen, 1);
        assert!(!outcome.watermark_advanced);
        assert_eq!(record.watermark(), Some("1"));
    }

    #[tokio::test]
    async fn test_run_mode_delivers_and_advances() {
        let server = serve(RSS_THREE_ITEMS).await;
        let mut record = record_for(&server);
        let client = reqwest::Client::new();
        let mailer = Mailer::new("true", "Subject: {{article_title}}\n".to_string()).unwrap();

        let outcome = process_feed(&client, &mut record, Some(&mailer), &Config::default())
            .await
            .unwrap();
        assert_eq!(outcome.unseen, 3);
        assert_eq!(outcome.delivered, 3);
        assert_eq!(record.watermark(), Some("3"));
    }

    #[tokio::test]
    async fn test_partial_delivery_advances_to_last_delivered() {
        // Transport accepts the first (oldest) entry and rejects the rest:
        // the watermark must land on the delivered entry's id, and the
        // failure must still surface so the feed is retried next run.
        let server = serve(RSS_THREE_ITEMS).await;
        let mut record = record_for(&server);
        let client = reqwest::Client::new();

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("send-once.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             cat > /dev/null\n\
             marker=\"$(dirname \"$0\")/sent\"\n\
             [ -e \"$marker\" ] && exit 1\n\
             touch \"$marker\"\n",
        )
        .unwrap();
        let mailer = Mailer::new(
            &format!("sh {}", script.display()),
            "Subject: x\n".to_string(),
        )
        .unwrap();

        let result = process_feed(&client, &mut record, Some(&mailer), &Config::default()).await;
        assert!(matches!(result, Err(ProcessError::Deliver(_))));
        assert_eq!(record.watermark(), Some("1"));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_watermark_put() {
        // Every delivery fails immediately: no entry was delivered, so the
        // watermark must not move.
        let server = serve(RSS_THREE_ITEMS).await;
        let mut record = record_for(&server);
        let client = reqwest::Client::new();
        let mailer = Mailer::new("false", "Subject: x\n".to_string()).unwrap();

        let result = process_feed(&client, &mut record, Some(&mailer), &Config::default()).await;
        assert!(matches!(result, Err(ProcessError::Deliver(_))));
        assert_eq!(record.watermark(), None);
    }
}
