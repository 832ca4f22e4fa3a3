use crate::errors::{ExportError, ExportResult};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::Value;
use std::io;
use std::path::PathBuf;

/// What a run exports. Each kind fixes the row filter, the payload files
/// written per row and the manifest columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ExportKind {
    /// Page text scraped from the item URL, with an id/url/title manifest
    Texts,
    /// Summaries of the page text, with an id/title manifest
    Summaries,
    /// Summary, keyword and summary passage per item, with an id/title manifest
    Queries,
    /// Item text paired with its text passage
    TextPassages,
    /// Text passage (or summary passage as fallback) paired with its source content
    Passages,
}

impl ExportKind {
    /// SQL predicate selecting eligible rows
    pub fn filter_predicate(&self) -> &'static str {
        match self {
            ExportKind::Texts => "item_urls.text IS NOT NULL",
            ExportKind::Summaries => "item_urls.summary IS NOT NULL",
            ExportKind::Queries => "analyses.summary_passage IS NOT NULL",
            ExportKind::TextPassages => "analyses.text_passage IS NOT NULL",
            ExportKind::Passages => {
                "(analyses.text_passage IS NOT NULL OR analyses.summary_passage IS NOT NULL)"
            }
        }
    }

    /// Same predicate as `filter_predicate`, evaluated on a fetched row
    #[cfg(test)]
    pub fn matches(&self, row: &ExportRow) -> bool {
        match self {
            ExportKind::Texts => row.url_text.is_some(),
            ExportKind::Summaries => row.summary.is_some(),
            ExportKind::Queries => row.summary_passage.is_some(),
            ExportKind::TextPassages => row.text_passage.is_some(),
            ExportKind::Passages => row.text_passage.is_some() || row.summary_passage.is_some(),
        }
    }

    /// Subdirectory of the output directory holding payload files
    pub fn payload_dir(&self) -> Option<&'static str> {
        match self {
            ExportKind::Texts => Some("texts"),
            ExportKind::Summaries => Some("summaries"),
            ExportKind::Queries => Some("queries"),
            ExportKind::TextPassages | ExportKind::Passages => None,
        }
    }

    /// Columns of `items.csv`, or `None` when the kind writes no manifest
    pub fn manifest_columns(&self) -> Option<&'static [ManifestColumn]> {
        match self {
            ExportKind::Texts => Some(&[ManifestColumn::Id, ManifestColumn::Url, ManifestColumn::Title]),
            ExportKind::Summaries | ExportKind::Queries => {
                Some(&[ManifestColumn::Id, ManifestColumn::Title])
            }
            ExportKind::TextPassages | ExportKind::Passages => None,
        }
    }

    /// Map one row to the files it produces.
    ///
    /// Returns `Ok(None)` when the row carries nothing to export for this
    /// kind. All passage JSON is parsed here, before anything touches disk,
    /// so a malformed passage leaves no file behind for the row.
    pub fn render(&self, row: &ExportRow) -> ExportResult<Option<RenderedRow>> {
        let in_dir = |name: String| match self.payload_dir() {
            Some(dir) => PathBuf::from(dir).join(name),
            None => PathBuf::from(name),
        };

        let payloads = match self {
            ExportKind::Texts => {
                let Some(text) = &row.url_text else { return Ok(None) };
                vec![PayloadFile::new(in_dir(format!("{}.txt", row.id)), text.as_bytes().to_vec())]
            }
            ExportKind::Summaries => {
                let Some(summary) = &row.summary else { return Ok(None) };
                vec![PayloadFile::new(in_dir(format!("{}.txt", row.id)), summary.as_bytes().to_vec())]
            }
            ExportKind::Queries => {
                let Some(raw) = &row.summary_passage else { return Ok(None) };
                let passage = parse_passage(row.id, raw)?;
                let summary = line_or_empty(row.id, "summary", row.summary.as_deref());
                let keyword = line_or_empty(row.id, "keyword", row.keyword.as_deref());
                vec![
                    PayloadFile::new(in_dir(format!("summary_{}.txt", row.id)), summary.into_bytes()),
                    PayloadFile::new(in_dir(format!("keyword_{}.txt", row.id)), keyword.into_bytes()),
                    PayloadFile::new(in_dir(format!("passage_{}.json", row.id)), to_pretty_json(&passage)?),
                ]
            }
            ExportKind::TextPassages => {
                let Some(raw) = &row.text_passage else { return Ok(None) };
                let document = TextPassageDocument {
                    text: row.text.as_deref(),
                    passage: parse_passage(row.id, raw)?,
                };
                vec![PayloadFile::new(in_dir(format!("{}.json", row.id)), to_pretty_json(&document)?)]
            }
            ExportKind::Passages => {
                let (content, raw) = match (&row.text_passage, &row.summary_passage) {
                    (Some(raw), _) => (row.text.as_deref(), raw),
                    (None, Some(raw)) => (row.summary.as_deref(), raw),
                    (None, None) => return Ok(None),
                };
                let document = PassageDocument {
                    content,
                    passage: parse_passage(row.id, raw)?,
                };
                vec![PayloadFile::new(in_dir(format!("{}.json", row.id)), to_pretty_json(&document)?)]
            }
        };

        let manifest = self
            .manifest_columns()
            .map(|columns| columns.iter().map(|c| c.value(row)).collect());

        Ok(Some(RenderedRow { manifest, payloads }))
    }
}

/// How successive pages are addressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PaginationMode {
    /// `id < last seen id`; stable under concurrent inserts and deletes
    #[default]
    Keyset,
    /// `OFFSET page_index * page_size`
    Offset,
}

/// Position of the next page to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    /// First page
    Start,
    /// Skip this many matching rows
    Offset(i64),
    /// Only rows with an id strictly below this one
    Before(i32),
}

impl PageCursor {
    /// Cursor for the page following `page`, which was fetched at `self`
    pub fn advance(&self, mode: PaginationMode, page: &[ExportRow]) -> PageCursor {
        match mode {
            PaginationMode::Keyset => match page.last() {
                Some(row) => PageCursor::Before(row.id),
                None => *self,
            },
            PaginationMode::Offset => {
                let consumed = match self {
                    PageCursor::Offset(offset) => *offset,
                    _ => 0,
                };
                PageCursor::Offset(consumed + page.len() as i64)
            }
        }
    }
}

/// One item joined with its URL record and analysis, as fetched for export.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct ExportRow {
    pub id: i32,
    pub url: Option<String>,
    pub title: Option<String>,
    /// `items.text`
    pub text: Option<String>,
    /// `item_urls.text`
    pub url_text: Option<String>,
    pub summary: Option<String>,
    pub keyword: Option<String>,
    pub text_passage: Option<String>,
    pub summary_passage: Option<String>,
}

/// Manifest column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestColumn {
    Id,
    Url,
    Title,
}

impl ManifestColumn {
    pub fn header(&self) -> &'static str {
        match self {
            ManifestColumn::Id => "id",
            ManifestColumn::Url => "url",
            ManifestColumn::Title => "title",
        }
    }

    /// NULL becomes an empty field
    pub fn value(&self, row: &ExportRow) -> String {
        match self {
            ManifestColumn::Id => row.id.to_string(),
            ManifestColumn::Url => row.url.clone().unwrap_or_default(),
            ManifestColumn::Title => row.title.clone().unwrap_or_default(),
        }
    }
}

/// A file to write, relative to the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    pub relative_path: PathBuf,
    pub contents: Vec<u8>,
}

impl PayloadFile {
    pub fn new(relative_path: PathBuf, contents: Vec<u8>) -> Self {
        Self {
            relative_path,
            contents,
        }
    }
}

/// Everything one row contributes to the export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    pub manifest: Option<Vec<String>>,
    pub payloads: Vec<PayloadFile>,
}

#[derive(Serialize)]
struct TextPassageDocument<'a> {
    text: Option<&'a str>,
    passage: Value,
}

#[derive(Serialize)]
struct PassageDocument<'a> {
    content: Option<&'a str>,
    passage: Value,
}

fn parse_passage(id: i32, raw: &str) -> ExportResult<Value> {
    serde_json::from_str(raw).map_err(|source| ExportError::InvalidPassage { id, source })
}

fn line_or_empty(id: i32, field: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("{}\n", value),
        None => {
            log::warn!("Item {} has no {}; writing an empty line", id, field);
            "\n".to_string()
        }
    }
}

/// Pretty-print with 4-space indentation, no trailing newline. The output
/// is pure ASCII: see `AsciiPrettyFormatter`.
pub fn to_pretty_json<T: Serialize>(value: &T) -> ExportResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let formatter = AsciiPrettyFormatter::new(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

/// `PrettyFormatter` that writes every character from U+007F up as a
/// lowercase `\uXXXX` escape, using a surrogate pair outside the BMP.
struct AsciiPrettyFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl<'a> AsciiPrettyFormatter<'a> {
    fn new(indent: &'a [u8]) -> Self {
        Self {
            inner: PrettyFormatter::with_indent(indent),
        }
    }
}

impl Formatter for AsciiPrettyFormatter<'_> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }

    // quotes, backslashes and control characters never reach here
    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let bytes = fragment.as_bytes();
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if (ch as u32) < 0x7f {
                continue;
            }
            writer.write_all(&bytes[start..index])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(&bytes[start..])
    }
}

/// Export statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub total_matching: i64,
    pub rows_exported: usize,
    pub rows_skipped: usize,
    pub pages_fetched: usize,
    pub files_written: usize,
    pub bytes_written: usize,
    pub duration_ms: u64,
}
