use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::feed::guid;
use crate::feed::model::{Entry, Feed};

/// The Atom 1.0 namespace a `<feed>` root must declare to be treated as Atom.
const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Errors that can occur while parsing a feed document.
///
/// A parse failure skips the feed for this cycle; it never aborts the run and
/// never touches the stored watermark.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not valid UTF-8 text.
    #[error("feed document is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    /// The XML itself is malformed.
    #[error("XML parse error: {0}")]
    Xml(String),
    /// Well-formed XML, but the root element is neither `<rss>` nor an
    /// Atom-namespaced `<feed>`. Not every document is a feed.
    #[error("document root is not an RSS or Atom feed")]
    UnrecognizedRoot,
}

/// The syndication format variant governing field extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rss,
    Atom,
}

impl Dialect {
    /// Element name wrapping one entry in this dialect.
    fn entry_tag(self) -> &'static [u8] {
        match self {
            Dialect::Rss => b"item",
            Dialect::Atom => b"entry",
        }
    }
}

/// Child element of an entry currently being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    Guid,
    Id,
    Content,
    Summary,
}

/// Raw per-entry fields accumulated during the event walk, before the
/// dialect-specific extraction rules and identifier fallback are applied.
#[derive(Default)]
struct RawEntry {
    title: Option<String>,
    link_text: Option<String>,
    description: Option<String>,
    guid: Option<String>,
    id: Option<String>,
    content: Option<String>,
    content_type: Option<String>,
    summary: Option<String>,
    summary_type: Option<String>,
    alternate_href: Option<String>,
}

impl RawEntry {
    fn into_entry(self, dialect: Dialect) -> Entry {
        match dialect {
            Dialect::Rss => {
                // RSS descriptions are not marked up reliably, so content is
                // always treated as plain text.
                let id = guid::resolve(
                    self.guid.as_deref(),
                    self.link_text.as_deref(),
                    self.title.as_deref(),
                    self.description.as_deref(),
                );
                Entry {
                    title: self.title,
                    url: self.link_text,
                    content: self.description,
                    is_html: false,
                    id,
                }
            }
            Dialect::Atom => {
                let (content, type_attr) = if self.content.is_some() {
                    (self.content, self.content_type)
                } else {
                    (self.summary, self.summary_type)
                };
                let is_html = matches!(type_attr.as_deref(), Some("html") | Some("xhtml"));
                let id = guid::resolve(
                    self.id.as_deref(),
                    self.alternate_href.as_deref(),
                    self.title.as_deref(),
                    content.as_deref(),
                );
                Entry {
                    title: self.title,
                    url: self.alternate_href,
                    content,
                    is_html,
                    id,
                }
            }
        }
    }
}

/// Parses raw feed bytes into a [`Feed`].
///
/// Dialect detection follows the document root: an `<rss>` root is parsed as
/// RSS 2.0 (`channel` > `item`), a `<feed>` root declaring the Atom namespace
/// is parsed as Atom 1.0, and anything else is [`ParseError::UnrecognizedRoot`].
///
/// Entries are appended in source document order with no reordering; every
/// entry's identifier is resolved during construction so the result is
/// self-contained.
pub fn parse(bytes: &[u8]) -> Result<Feed, ParseError> {
    let document = std::str::from_utf8(bytes)?;
    parse_str(document)
}

fn parse_str(document: &str) -> Result<Feed, ParseError> {
    // SEC-002: XXE protection — quick-xml (0.37) never parses <!ENTITY>
    // declarations from DOCTYPE, and attribute/text unescaping only resolves
    // the 5 XML builtins. See the pinned version note in Cargo.toml.
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();

    let mut dialect: Option<Dialect> = None;
    let mut in_container = false;
    let mut current: Option<RawEntry> = None;
    let mut field: Option<Field> = None;
    // Depth of markup nested inside the captured field (e.g. xhtml content);
    // nested element tags are dropped, their text is kept.
    let mut field_depth: usize = 0;
    // Depth inside an unrecognized entry child (author, source, ...).
    // Fields are only extracted from an entry's direct children.
    let mut skip_depth: usize = 0;
    let mut text = String::new();
    let mut entries = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let Some(dialect) = dialect else {
                    dialect = Some(detect_dialect(&e, &reader)?);
                    if dialect == Some(Dialect::Atom) {
                        // Atom entries are direct children of the root.
                        in_container = true;
                    }
                    buf.clear();
                    continue;
                };

                if field.is_some() {
                    field_depth += 1;
                } else if let Some(entry) = current.as_mut() {
                    if skip_depth > 0 {
                        skip_depth += 1;
                    } else if let Some(f) = field_for(dialect, e.name().as_ref()) {
                        start_field(f, entry, &e, &reader)?;
                        field = Some(f);
                        text.clear();
                    } else {
                        if dialect == Dialect::Atom && e.name().as_ref() == b"link" {
                            record_atom_link(entry, &e, &reader)?;
                        }
                        skip_depth += 1;
                    }
                } else if in_container && e.name().as_ref() == dialect.entry_tag() {
                    current = Some(RawEntry::default());
                } else if dialect == Dialect::Rss && e.name().as_ref() == b"channel" {
                    in_container = true;
                }
            }
            Ok(Event::Empty(e)) => {
                if let (Some(Dialect::Atom), Some(entry), None) =
                    (dialect, current.as_mut(), field)
                {
                    if skip_depth == 0 && e.name().as_ref() == b"link" {
                        record_atom_link(entry, &e, &reader)?;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if current.is_some() && field.is_some() {
                    let unescaped = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(t)) => {
                if current.is_some() && field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(e)) => {
                if let Some(f) = field {
                    if field_depth > 0 {
                        field_depth -= 1;
                    } else {
                        if let Some(entry) = current.as_mut() {
                            commit_field(f, entry, &text);
                        }
                        field = None;
                        text.clear();
                    }
                } else if skip_depth > 0 {
                    skip_depth -= 1;
                } else if let Some(d) = dialect {
                    if current.is_some() && e.name().as_ref() == d.entry_tag() {
                        let raw = current.take().unwrap_or_default();
                        entries.push(raw.into_entry(d));
                    } else if d == Dialect::Rss && e.name().as_ref() == b"channel" {
                        in_container = false;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
        buf.clear();
    }

    if dialect.is_none() {
        // Document had no elements at all (empty or declaration-only).
        return Err(ParseError::UnrecognizedRoot);
    }

    Ok(Feed { entries })
}

/// Classifies the document root, or rejects documents that are not feeds.
fn detect_dialect(root: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Dialect, ParseError> {
    match root.name().as_ref() {
        b"rss" => Ok(Dialect::Rss),
        b"feed" => {
            // An Atom feed must declare the Atom namespace on its root.
            for attr in root.attributes() {
                let attr = match attr {
                    Ok(attr) => attr,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed root attribute");
                        continue;
                    }
                };
                if attr.key.as_ref() == b"xmlns" {
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|e| ParseError::Xml(e.to_string()))?;
                    if value == ATOM_NS {
                        return Ok(Dialect::Atom);
                    }
                }
            }
            Err(ParseError::UnrecognizedRoot)
        }
        _ => Err(ParseError::UnrecognizedRoot),
    }
}

/// Maps an entry child element to the field it populates in this dialect.
fn field_for(dialect: Dialect, name: &[u8]) -> Option<Field> {
    match (dialect, name) {
        (_, b"title") => Some(Field::Title),
        (Dialect::Rss, b"link") => Some(Field::Link),
        (Dialect::Rss, b"description") => Some(Field::Description),
        (Dialect::Rss, b"guid") => Some(Field::Guid),
        (Dialect::Atom, b"id") => Some(Field::Id),
        (Dialect::Atom, b"content") => Some(Field::Content),
        (Dialect::Atom, b"summary") => Some(Field::Summary),
        _ => None,
    }
}

/// Captures attributes that matter before the field's text arrives
/// (the `type` attribute on Atom content/summary elements).
fn start_field(
    field: Field,
    entry: &mut RawEntry,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<(), ParseError> {
    if !matches!(field, Field::Content | Field::Summary) {
        return Ok(());
    }
    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed entry attribute");
                continue;
            }
        };
        if attr.key.as_ref() == b"type" {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| ParseError::Xml(e.to_string()))?
                .to_string();
            match field {
                Field::Content => entry.content_type = Some(value),
                Field::Summary => entry.summary_type = Some(value),
                _ => unreachable!(),
            }
        }
    }
    Ok(())
}

fn commit_field(field: Field, entry: &mut RawEntry, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    let slot = match field {
        Field::Title => &mut entry.title,
        Field::Link => &mut entry.link_text,
        Field::Description => &mut entry.description,
        Field::Guid => &mut entry.guid,
        Field::Id => &mut entry.id,
        Field::Content => &mut entry.content,
        Field::Summary => &mut entry.summary,
    };
    if slot.is_none() {
        *slot = Some(text.to_string());
    }
}

/// Scans an Atom `<link>` element, keeping the first href whose `rel` is
/// absent or `"alternate"` — Atom's convention for the canonical article URL.
/// Other relations ("self", "enclosure", ...) are not article links.
fn record_atom_link(
    entry: &mut RawEntry,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<(), ParseError> {
    if entry.alternate_href.is_some() {
        return Ok(());
    }

    let mut href = None;
    let mut rel = None;
    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed link attribute");
                continue;
            }
        };
        let decoder = reader.decoder();
        match attr.key.as_ref() {
            b"href" => {
                href = Some(
                    attr.decode_and_unescape_value(decoder)
                        .map_err(|e| ParseError::Xml(e.to_string()))?
                        .to_string(),
                )
            }
            b"rel" => {
                rel = Some(
                    attr.decode_and_unescape_value(decoder)
                        .map_err(|e| ParseError::Xml(e.to_string()))?
                        .to_string(),
                )
            }
            _ => {}
        }
    }

    if matches!(rel.as_deref(), None | Some("alternate")) {
        entry.alternate_href = href;
    }
    Ok(())
}
