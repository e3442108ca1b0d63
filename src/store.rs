//! The OPML-backed feed list: the only state that crosses runs.
//!
//! Each subscription is an `<outline>` element carrying `title`/`text`,
//! `xmlUrl`, and a `lastSeen` attribute holding the watermark — the
//! identifier of the most recently processed entry. Records are loaded into
//! owned [`FeedRecord`] values at startup and written back wholesale on save;
//! the processing loop never touches the document representation directly.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::validate_url;

/// Errors that can occur loading or saving the feed list.
///
/// A load failure is fatal to the whole run (there is nothing to process
/// without the list); individual malformed outlines are skipped with a
/// warning instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File I/O error reading or writing the list.
    #[error("Feed list I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The OPML document is not valid XML.
    #[error("XML parse error in feed list: {0}")]
    XmlParse(String),
    /// The serialized list was not valid UTF-8 (should never happen).
    #[error("Generated OPML contains invalid UTF-8")]
    Encoding,
}

/// One feed subscription with its persisted sync state.
///
/// The watermark is read and written through accessors; the diff engine and
/// processing loop never manage this record's persistence — saving the list
/// is [`FeedList`]'s job.
#[derive(Debug, Clone)]
pub struct FeedRecord {
    /// Display title for the feed.
    pub title: String,
    /// URL of the RSS/Atom feed document.
    pub xml_url: String,
    watermark: Option<String>,
}

impl FeedRecord {
    pub fn new(title: String, xml_url: String) -> Self {
        Self {
            title,
            xml_url,
            watermark: None,
        }
    }

    /// Identifier of the most recently delivered entry, if any run has
    /// completed for this feed.
    pub fn watermark(&self) -> Option<&str> {
        self.watermark.as_deref()
    }

    pub fn set_watermark(&mut self, id: String) {
        self.watermark = Some(id);
    }
}

/// The ordered collection of feed subscriptions, bound to its OPML file.
pub struct FeedList {
    path: PathBuf,
    records: Vec<FeedRecord>,
}

impl FeedList {
    /// Creates an empty list bound to `path` without touching the disk.
    /// Used when subscribing to a first feed before any file exists.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            records: Vec::new(),
        }
    }

    /// Loads the feed list from an OPML file.
    ///
    /// Outlines missing an `xmlUrl`, or carrying an invalid one, are excluded
    /// from the record set entirely and reported; the rest of the list loads
    /// normally. An unreadable or malformed file is an error — that is fatal
    /// to the run, by design.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let records = parse_feed_list(&content)?;
        tracing::debug!(path = %path.display(), feeds = records.len(), "Loaded feed list");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Saves the list back to its OPML file atomically
    /// (write-temp, fsync, rename). Called after each feed's processing pass
    /// so an interrupted run loses at most the in-flight feed's progress.
    pub fn save(&self) -> Result<(), StoreError> {
        let content = render_feed_list(&self.records)?;
        write_atomic(&self.path, content.as_bytes())
    }

    pub fn records(&self) -> &[FeedRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [FeedRecord] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a new subscription at the end of the list.
    pub fn push(&mut self, record: FeedRecord) {
        self.records.push(record);
    }

    /// Removes the record at `index`, returning it if the index was valid.
    pub fn remove(&mut self, index: usize) -> Option<FeedRecord> {
        if index < self.records.len() {
            Some(self.records.remove(index))
        } else {
            None
        }
    }
}

/// Parses OPML content into feed records.
///
/// Any `<outline>` with an `xmlUrl` attribute is a subscription, regardless
/// of nesting; category outlines are traversed but not kept. Title falls
/// back from `title` to `text` to the URL itself.
fn parse_feed_list(content: &str) -> Result<Vec<FeedRecord>, StoreError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let mut xml_url = None;
                let mut title = None;
                let mut text = None;
                let mut watermark = None;
                let mut is_feed_outline = false;

                for attr_result in e.attributes() {
                    let attr = match attr_result {
                        Ok(attr) => attr,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed outline attribute");
                            continue;
                        }
                    };
                    let decoder = reader.decoder();
                    let value = attr
                        .decode_and_unescape_value(decoder)
                        .map_err(|e| StoreError::XmlParse(e.to_string()))?
                        .to_string();
                    match attr.key.as_ref() {
                        b"xmlUrl" => xml_url = Some(value),
                        b"title" => title = Some(value),
                        b"text" => text = Some(value),
                        b"type" if value == "rss" => is_feed_outline = true,
                        b"lastSeen" => watermark = Some(value),
                        _ => {}
                    }
                }

                match xml_url {
                    Some(url) => match validate_url(&url) {
                        Ok(_) => {
                            let title = title.or(text).unwrap_or_else(|| url.clone());
                            let mut record = FeedRecord::new(title, url);
                            record.watermark = watermark.filter(|w| !w.is_empty());
                            records.push(record);
                        }
                        Err(e) => {
                            tracing::warn!(url = %url, error = %e, "Skipping feed with invalid URL");
                        }
                    },
                    None if is_feed_outline => {
                        tracing::warn!(
                            title = title.or(text).as_deref().unwrap_or("<untitled>"),
                            "Skipping malformed feed outline without xmlUrl"
                        );
                    }
                    None => {} // Category/folder outline
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(StoreError::XmlParse(e.to_string())),
            Ok(_) => {}
        }
        buf.clear();
    }

    Ok(records)
}

/// Renders the records as an OPML 2.0 document.
fn render_feed_list(records: &[FeedRecord]) -> Result<String, StoreError> {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;
    use std::io::Cursor;

    fn xml<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::XmlParse(e.to_string())
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml)?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(opml)).map_err(xml)?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .map_err(xml)?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .map_err(xml)?;
    writer
        .write_event(Event::Text(BytesText::new("feedmail subscriptions")))
        .map_err(xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .map_err(xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .map_err(xml)?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .map_err(xml)?;

    for record in records {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", record.title.as_str()));
        outline.push_attribute(("title", record.title.as_str()));
        outline.push_attribute(("xmlUrl", record.xml_url.as_str()));
        if let Some(ref watermark) = record.watermark {
            outline.push_attribute(("lastSeen", watermark.as_str()));
        }
        writer.write_event(Event::Empty(outline)).map_err(xml)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .map_err(xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .map_err(xml)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|_| StoreError::Encoding)
}

/// Atomic file replacement: write to a randomized temp name in the same
/// directory, sync, then rename over the destination.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    // Randomized temp filename to prevent TOCTOU races on the temp path.
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;

    if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}
