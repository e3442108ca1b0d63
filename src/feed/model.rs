/// One normalized feed item, immutable once constructed.
///
/// Field extraction is dialect-specific (see [`crate::feed::parser`]), but
/// every entry presents the same shape regardless of whether it came from an
/// RSS `<item>` or an Atom `<entry>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Entry headline, if the source provided one.
    pub title: Option<String>,
    /// Canonical link to the article.
    pub url: Option<String>,
    /// Article body or summary text.
    pub content: Option<String>,
    /// Whether `content` should be interpreted as HTML markup rather than
    /// plain text.
    pub is_html: bool,
    /// Stable identifier computed at parse time by [`crate::feed::guid`].
    /// `None` only when the entry had no explicit id, url, title, or content.
    pub id: Option<String>,
}

/// A freshly parsed feed: entries in source document order.
///
/// RSS/Atom convention lists entries newest-first; the diff engine's stopping
/// rule relies on that convention without verifying it. A `Feed` lives for
/// one fetch cycle and is never persisted.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    pub entries: Vec<Entry>,
}

impl Feed {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
