use thiserror::Error;

use crate::feed::model::{Entry, Feed};

/// The newest unseen entry carries no usable identifier, so the watermark
/// cannot advance without silently re-classifying the whole feed as unseen
/// on the next sync. Callers keep the previous watermark and surface this.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("newest unseen entry has no usable identifier; keeping previous watermark")]
pub struct MissingId;

/// Returns the entries not yet covered by `watermark`, in stored
/// (newest-first) order.
///
/// Scans the feed in document order and stops at the first entry whose
/// identifier equals the watermark; everything before it is unseen. If no
/// entry matches — including the first-ever sync, when `watermark` is `None`
/// — the whole feed is unseen. Entries without an identifier can never match.
///
/// The returned slice must be reversed before delivery so that consumers
/// process oldest-first; an interrupted delivery then leaves the oldest
/// remaining entries still pending rather than dropped.
pub fn unseen<'a>(feed: &'a Feed, watermark: Option<&str>) -> &'a [Entry] {
    let Some(watermark) = watermark else {
        return &feed.entries;
    };

    let cut = feed
        .entries
        .iter()
        .position(|entry| entry.id.as_deref() == Some(watermark))
        .unwrap_or(feed.entries.len());
    &feed.entries[..cut]
}

/// Computes the watermark to persist after a processing pass consumed
/// `unseen` (still in newest-first order).
///
/// - Empty sequence: `Ok(None)` — the watermark is left unchanged.
/// - Newest entry has an identifier: `Ok(Some(id))`.
/// - Newest entry has no identifier: `Err(MissingId)` — advancing would
///   persist an empty watermark, so the caller must keep the old one.
pub fn next_watermark(unseen: &[Entry]) -> Result<Option<&str>, MissingId> {
    match unseen.first() {
        None => Ok(None),
        Some(newest) => match newest.id.as_deref() {
            Some(id) => Ok(Some(id)),
            None => Err(MissingId),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: Option<&str>) -> Entry {
        Entry {
            title: id.map(|s| format!("title {}", s)),
            url: None,
            content: None,
            is_html: false,
            id: id.map(str::to_string),
        }
    }

    fn feed(ids: &[Option<&str>]) -> Feed {
        Feed {
            entries: ids.iter().map(|id| entry(*id)).collect(),
        }
    }

    #[test]
    fn test_no_watermark_returns_everything() {
        let feed = feed(&[Some("3"), Some("2"), Some("1")]);
        let result = unseen(&feed, None);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_stops_at_watermark() {
        let feed = feed(&[Some("5"), Some("4"), Some("3"), Some("2"), Some("1")]);
        let result = unseen(&feed, Some("3"));
        let ids: Vec<_> = result.iter().map(|e| e.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["5", "4"]);
    }

    #[test]
    fn test_watermark_on_newest_entry_yields_empty() {
        let feed = feed(&[Some("3"), Some("2"), Some("1")]);
        assert!(unseen(&feed, Some("3")).is_empty());
    }

    #[test]
    fn test_unknown_watermark_returns_everything() {
        // Watermark entry rotated out of the feed since the last run.
        let feed = feed(&[Some("9"), Some("8")]);
        assert_eq!(unseen(&feed, Some("1")).len(), 2);
    }

    #[test]
    fn test_entries_without_id_never_match() {
        let feed = feed(&[Some("3"), None, Some("1")]);
        let result = unseen(&feed, Some("1"));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_example_scenario_from_rss_guids() {
        // Items [3, 2, 1] newest-first with stored watermark "2":
        // unseen is ["3"], and the new watermark is "3".
        let feed = feed(&[Some("3"), Some("2"), Some("1")]);
        let result = unseen(&feed, Some("2"));
        let ids: Vec<_> = result.iter().map(|e| e.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["3"]);
        assert_eq!(next_watermark(result), Ok(Some("3")));
    }

    #[test]
    fn test_idempotent_after_advancing() {
        let f = feed(&[Some("3"), Some("2"), Some("1")]);
        let first = unseen(&f, None);
        let new_mark = next_watermark(first).unwrap().map(str::to_string);
        assert_eq!(new_mark.as_deref(), Some("3"));

        // Unchanged remote feed, freshly persisted watermark: nothing unseen.
        assert!(unseen(&f, new_mark.as_deref()).is_empty());
    }

    #[test]
    fn test_next_watermark_empty_is_unchanged() {
        assert_eq!(next_watermark(&[]), Ok(None));
    }

    #[test]
    fn test_next_watermark_missing_id_surfaces() {
        let entries = vec![entry(None), entry(Some("2"))];
        assert_eq!(next_watermark(&entries), Err(MissingId));
    }

    #[test]
    fn test_reversal_gives_oldest_first_delivery_order() {
        let feed = feed(&[Some("3"), Some("2"), Some("1")]);
        let result = unseen(&feed, None);
        let delivery: Vec<_> = result
            .iter()
            .rev()
            .map(|e| e.id.as_deref().unwrap())
            .collect();
        assert_eq!(delivery, vec!["1", "2", "3"]);
    }
}
