//! Catalog text format: tolerant parsing, streaming parsing, serialization.
//!
//! The format is gettext PO:
//!
//! ```text
//! # translator comment
//! #: src/app.rs:12 src/menu.rs:4
//! #, fuzzy
//! msgctxt "menu"
//! msgid "Open"
//! msgstr ""
//! "Ouvrir\n"
//! "le fichier"
//! ```
//!
//! An entry starts at its first line and ends at a blank line, at the next
//! key declaration (`msgctxt`/`msgid` after a `msgid` was already seen), or
//! at a comment line once its `msgstr` was read. A comment between `msgid`
//! and `msgstr` stays with its entry. Quoted continuation lines append to the
//! last opened field. Anything unrecognized is skipped and reported as a
//! [`ParseDiagnostic`]; parsing never fails.
//!
//! The parser is line-driven and only ever holds the entry being built plus
//! one partial line, so [`StreamingParser`] runs in O(largest entry + chunk)
//! memory no matter how large the catalog is.

use std::collections::{BTreeSet, VecDeque};

use crate::error::{GlossaError, Result};
use crate::model::{CatalogEntry, CatalogHeader};

/// A recoverable problem found while parsing. The offending line is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub line: usize,
    pub message: String,
}

impl From<ParseDiagnostic> for GlossaError {
    fn from(d: ParseDiagnostic) -> Self {
        GlossaError::Parse {
            line: d.line,
            message: d.message,
        }
    }
}

/// Result of parsing a whole catalog text.
#[derive(Debug, Clone, Default)]
pub struct ParsedCatalog {
    pub header: Option<CatalogHeader>,
    pub entries: Vec<CatalogEntry>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

// ───────────────────────────────────────────────────────────────────
// Line state machine
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Context,
    Key,
    Value,
    /// Plural forms and other fields we read past without storing.
    Ignored,
}

#[derive(Debug, Default)]
struct EntryBuilder {
    context: Option<String>,
    key: Option<String>,
    value: Option<String>,
    references: Vec<String>,
    flags: BTreeSet<String>,
    comments: Vec<String>,
    open: Option<Field>,
    start_line: usize,
    touched: bool,
}

impl EntryBuilder {
    fn field_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Context => self.context.as_mut(),
            Field::Key => self.key.as_mut(),
            Field::Value => self.value.as_mut(),
            Field::Ignored => None,
        }
    }
}

#[derive(Debug, Default)]
struct LineParser {
    builder: EntryBuilder,
    line_no: usize,
    header: Option<CatalogHeader>,
    /// Whether the first entry slot (the only place a header may appear) is used.
    first_done: bool,
    diagnostics: Vec<ParseDiagnostic>,
}

impl LineParser {
    fn diagnose(&mut self, line: usize, message: impl Into<String>) {
        let message = message.into();
        log::debug!("catalog line {line}: {message}");
        self.diagnostics.push(ParseDiagnostic { line, message });
    }

    fn push_line(&mut self, raw: &str, out: &mut Vec<CatalogEntry>) {
        self.line_no += 1;
        let line_no = self.line_no;
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let line = raw.trim_start();

        if line.trim_end().is_empty() {
            self.flush(out);
            return;
        }

        if let Some(comment) = line.strip_prefix('#') {
            // Comments precede `msgid`; after a `msgstr` they open the next entry.
            if self.builder.value.is_some() {
                self.flush(out);
            }
            self.touch(line_no);
            if let Some(refs) = comment.strip_prefix(':') {
                self.builder
                    .references
                    .extend(refs.split_whitespace().map(str::to_string));
            } else if let Some(flags) = comment.strip_prefix(',') {
                self.builder.flags.extend(
                    flags
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(str::to_string),
                );
            } else {
                self.builder.comments.push(comment.to_string());
            }
            return;
        }

        if line.starts_with('"') {
            let (text, closed) = unquote(line.trim_end());
            if !closed {
                self.diagnose(line_no, "unterminated string");
            }
            match self.builder.open {
                Some(Field::Ignored) => {}
                Some(field) => {
                    if let Some(target) = self.builder.field_mut(field) {
                        target.push_str(&text);
                    }
                }
                None => self.diagnose(line_no, "continuation line outside of any field"),
            }
            return;
        }

        let (keyword, rest) = split_keyword(line);
        match keyword {
            "msgctxt" => {
                if self.builder.key.is_some() {
                    self.flush(out);
                }
                self.touch(line_no);
                if self.builder.context.is_some() {
                    self.diagnose(line_no, "duplicate msgctxt, keeping the last one");
                }
                let text = self.keyword_value(line_no, rest);
                self.builder.context = Some(text);
                self.builder.open = Some(Field::Context);
            }
            "msgid" => {
                if self.builder.key.is_some() {
                    self.flush(out);
                }
                self.touch(line_no);
                let text = self.keyword_value(line_no, rest);
                self.builder.key = Some(text);
                self.builder.open = Some(Field::Key);
            }
            "msgstr" | "msgstr[0]" => {
                self.touch(line_no);
                if self.builder.value.is_some() {
                    self.diagnose(line_no, "duplicate msgstr, keeping the last one");
                }
                let text = self.keyword_value(line_no, rest);
                self.builder.value = Some(text);
                self.builder.open = Some(Field::Value);
            }
            kw if kw == "msgid_plural" || kw.starts_with("msgstr[") => {
                self.touch(line_no);
                self.diagnose(line_no, format!("plural field {kw} is not supported, skipped"));
                self.builder.open = Some(Field::Ignored);
            }
            _ => {
                self.diagnose(line_no, format!("unrecognized line: {}", truncate(line, 40)));
            }
        }
    }

    fn touch(&mut self, line_no: usize) {
        if !self.builder.touched {
            self.builder.touched = true;
            self.builder.start_line = line_no;
        }
    }

    fn keyword_value(&mut self, line_no: usize, rest: &str) -> String {
        let rest = rest.trim();
        if !rest.starts_with('"') {
            self.diagnose(line_no, "keyword without a quoted value");
            return String::new();
        }
        let (text, closed) = unquote(rest);
        if !closed {
            self.diagnose(line_no, "unterminated string");
        }
        text
    }

    /// Close the entry being built, emitting it (or the header) if complete.
    fn flush(&mut self, out: &mut Vec<CatalogEntry>) {
        let builder = std::mem::take(&mut self.builder);
        if !builder.touched {
            return;
        }
        let first = !self.first_done;
        self.first_done = true;

        let Some(original_text) = builder.key else {
            self.diagnose(builder.start_line, "entry without msgid dropped");
            return;
        };

        if original_text.is_empty() && builder.context.is_none() {
            if first {
                let value = builder.value.unwrap_or_default();
                self.header = Some(CatalogHeader::from_value(&value));
            } else {
                self.diagnose(builder.start_line, "entry with empty key dropped");
            }
            return;
        }

        out.push(CatalogEntry {
            key: CatalogEntry::derive_key(&original_text, builder.context.as_deref()),
            original_text,
            current_text: builder.value.unwrap_or_default(),
            previous_text: None,
            context: builder.context,
            references: builder.references,
            flags: builder.flags,
            comments: builder.comments,
        });
    }
}

fn split_keyword(line: &str) -> (&str, &str) {
    match line.find(|c: char| c.is_whitespace() || c == '"') {
        Some(idx) => (&line[..idx], &line[idx..]),
        None => (line, ""),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Decode a quoted string starting at `"`. Returns the text and whether a
/// closing quote was found. Text after the closing quote is ignored.
fn unquote(s: &str) -> (String, bool) {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    if chars.next() != Some('"') {
        return (out, false);
    }
    while let Some(c) = chars.next() {
        match c {
            '"' => return (out, true),
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    (out, false)
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Streaming parser
// ───────────────────────────────────────────────────────────────────

/// Push parser over byte chunks of any size and alignment.
///
/// ```
/// use glossa_core::codec::StreamingParser;
///
/// let mut parser = StreamingParser::new();
/// let mut entries = parser.feed(b"msgid \"Hel");
/// entries.extend(parser.feed(b"lo\"\nmsgstr \"Hallo\"\n\n"));
/// entries.extend(parser.finish());
/// assert_eq!(entries[0].current_text, "Hallo");
/// ```
#[derive(Debug, Default)]
pub struct StreamingParser {
    /// Bytes after the last newline seen.
    pending: Vec<u8>,
    lines: LineParser,
    bytes_consumed: u64,
}

impl StreamingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every entry completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<CatalogEntry> {
        let mut out = Vec::new();
        let scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);
        self.bytes_consumed += chunk.len() as u64;

        let mut start = 0;
        let mut pos = scan_from;
        while let Some(offset) = self.pending[pos..].iter().position(|&b| b == b'\n') {
            let end = pos + offset;
            let line = String::from_utf8_lossy(&self.pending[start..end]);
            self.lines.push_line(&line, &mut out);
            start = end + 1;
            pos = start;
        }
        self.pending.drain(..start);
        out
    }

    /// Flush the trailing line and entry. Call once, after the last chunk.
    pub fn finish(&mut self) -> Vec<CatalogEntry> {
        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            self.lines.push_line(&line, &mut out);
        }
        self.lines.flush(&mut out);
        if !self.lines.diagnostics.is_empty() {
            log::warn!(
                "catalog parsed with {} recoverable problems",
                self.lines.diagnostics.len()
            );
        }
        out
    }

    /// Header, once the first entry slot has been closed.
    pub fn header(&self) -> Option<&CatalogHeader> {
        self.lines.header.as_ref()
    }

    pub fn diagnostics(&self) -> &[ParseDiagnostic] {
        &self.lines.diagnostics
    }

    /// Total bytes fed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    pub fn into_diagnostics(self) -> Vec<ParseDiagnostic> {
        self.lines.diagnostics
    }
}

/// Lazy entry iterator over a sequence of chunks.
pub struct StreamingEntries<I> {
    chunks: I,
    parser: StreamingParser,
    ready: VecDeque<CatalogEntry>,
    done: bool,
}

impl<I> StreamingEntries<I> {
    pub fn parser(&self) -> &StreamingParser {
        &self.parser
    }
}

impl<I, B> Iterator for StreamingEntries<I>
where
    I: Iterator<Item = B>,
    B: AsRef<[u8]>,
{
    type Item = CatalogEntry;

    fn next(&mut self) -> Option<CatalogEntry> {
        loop {
            if let Some(entry) = self.ready.pop_front() {
                return Some(entry);
            }
            if self.done {
                return None;
            }
            match self.chunks.next() {
                Some(chunk) => self.ready.extend(self.parser.feed(chunk.as_ref())),
                None => {
                    self.ready.extend(self.parser.finish());
                    self.done = true;
                }
            }
        }
    }
}

/// Parse entries lazily from arbitrarily split chunks.
pub fn parse_entries_streaming<I>(chunks: I) -> StreamingEntries<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    StreamingEntries {
        chunks: chunks.into_iter(),
        parser: StreamingParser::new(),
        ready: VecDeque::new(),
        done: false,
    }
}

// ───────────────────────────────────────────────────────────────────
// Whole-text entry points
// ───────────────────────────────────────────────────────────────────

/// Parse a complete catalog text, header and diagnostics included.
pub fn parse_catalog(text: &str) -> ParsedCatalog {
    let mut parser = StreamingParser::new();
    let mut entries = parser.feed(text.as_bytes());
    entries.extend(parser.finish());
    ParsedCatalog {
        header: parser.header().cloned(),
        entries,
        diagnostics: parser.into_diagnostics(),
    }
}

/// Parse the entries of a catalog text (the header is not included).
pub fn parse_entries(text: &str) -> Vec<CatalogEntry> {
    parse_catalog(text).entries
}

/// Why the comment lines of `entry` would not read back unchanged, if so.
///
/// Values, keys and contexts are escaped and always survive; comment,
/// reference and flag lines are written raw.
pub fn unwritable_reason(entry: &CatalogEntry) -> Option<String> {
    for comment in &entry.comments {
        if comment.contains(['\n', '\r']) {
            return Some(format!("comment {comment:?} spans several lines"));
        }
        if comment.starts_with([':', ',']) {
            return Some(format!("comment {comment:?} reads back as a reference or flag line"));
        }
    }
    for reference in &entry.references {
        if reference.is_empty() || reference.contains(char::is_whitespace) {
            return Some(format!("reference {reference:?} is empty or contains whitespace"));
        }
    }
    for flag in &entry.flags {
        if flag.trim().is_empty() || flag.trim() != flag || flag.contains([',', '\n', '\r']) {
            return Some(format!("flag {flag:?} is blank, padded or contains a separator"));
        }
    }
    None
}

/// Serialize a catalog. The header is always written first.
///
/// `previous_text` is not part of the file format and is never written.
/// Entries whose comment lines fail [`unwritable_reason`] are written as
/// they are, with a warning; use [`try_serialize_entries`] to refuse them.
pub fn serialize_entries(header: &CatalogHeader, entries: &[CatalogEntry]) -> String {
    let mut out = String::with_capacity(64 + entries.len() * 64);
    write_field(&mut out, "msgid", "");
    write_field(&mut out, "msgstr", &header.to_value());

    for entry in entries {
        if let Some(reason) = unwritable_reason(entry) {
            log::warn!("entry '{}' will not read back unchanged: {}", entry.key, reason);
        }
        out.push('\n');
        write_entry(&mut out, entry);
    }
    out
}

/// Like [`serialize_entries`], but fails on the first entry whose comment
/// lines would not read back unchanged.
pub fn try_serialize_entries(header: &CatalogHeader, entries: &[CatalogEntry]) -> Result<String> {
    if let Some((entry, reason)) = entries
        .iter()
        .find_map(|e| unwritable_reason(e).map(|reason| (e, reason)))
    {
        return Err(GlossaError::validation(format!("entry '{}': {}", entry.key, reason)));
    }
    Ok(serialize_entries(header, entries))
}

fn write_entry(out: &mut String, entry: &CatalogEntry) {
    for comment in &entry.comments {
        out.push('#');
        out.push_str(comment);
        out.push('\n');
    }
    if !entry.references.is_empty() {
        out.push_str("#: ");
        out.push_str(&entry.references.join(" "));
        out.push('\n');
    }
    if !entry.flags.is_empty() {
        out.push_str("#, ");
        let flags: Vec<&str> = entry.flags.iter().map(String::as_str).collect();
        out.push_str(&flags.join(", "));
        out.push('\n');
    }
    if let Some(context) = &entry.context {
        write_field(out, "msgctxt", context);
    }
    write_field(out, "msgid", &entry.original_text);
    write_field(out, "msgstr", &entry.current_text);
}

fn write_field(out: &mut String, keyword: &str, value: &str) {
    out.push_str(keyword);
    if value.contains('\n') {
        out.push_str(" \"\"\n");
        for segment in value.split_inclusive('\n') {
            out.push('"');
            escape_into(out, segment);
            out.push_str("\"\n");
        }
    } else {
        out.push_str(" \"");
        escape_into(out, value);
        out.push_str("\"\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"msgid ""
msgstr ""
"Language: fr\n"
"Content-Type: text/plain; charset=UTF-8\n"
"X-Generator: Poedit 3.4\n"

# Shown on the landing page
#: src/home.rs:10 src/home.rs:22
#, fuzzy
msgid "greeting"
msgstr "Bonjour"

msgctxt "menu"
msgid "Open"
msgstr ""
"Ouvrir\n"
"le fichier"

msgid "untranslated"
msgstr ""
"#;

    #[test]
    fn test_parse_sample() {
        let parsed = parse_catalog(SAMPLE);
        let header = parsed.header.unwrap();
        assert_eq!(header.language, "fr");
        assert_eq!(header.encoding, "UTF-8");
        assert_eq!(header.generator, "Poedit 3.4");

        assert_eq!(parsed.entries.len(), 3);
        let greeting = &parsed.entries[0];
        assert_eq!(greeting.key, "greeting");
        assert_eq!(greeting.current_text, "Bonjour");
        assert_eq!(greeting.references, vec!["src/home.rs:10", "src/home.rs:22"]);
        assert!(greeting.is_fuzzy());
        assert_eq!(greeting.comments, vec![" Shown on the landing page"]);

        let open = &parsed.entries[1];
        assert_eq!(open.context.as_deref(), Some("menu"));
        assert_eq!(open.key, "menu\u{4}Open");
        assert_eq!(open.current_text, "Ouvrir\nle fichier");

        assert_eq!(parsed.entries[2].current_text, "");
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_next_key_declaration_ends_entry_without_blank_line() {
        let text = "msgid \"a\"\nmsgstr \"1\"\nmsgid \"b\"\nmsgstr \"2\"\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].current_text, "1");
        assert_eq!(entries[1].key, "b");
    }

    #[test]
    fn test_comment_does_not_terminate_entry() {
        let text = "msgid \"a\"\n#, fuzzy\nmsgstr \"1\"\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_fuzzy());
        assert_eq!(entries[0].current_text, "1");
    }

    #[test]
    fn test_comments_after_msgstr_open_next_entry() {
        let text = "msgid \"a\"\nmsgstr \"1\"\n#: src/b.rs:1\n#, fuzzy\n# note\nmsgid \"b\"\nmsgstr \"2\"\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].references.is_empty());
        assert!(!entries[0].is_fuzzy());
        assert!(entries[0].comments.is_empty());
        assert_eq!(entries[1].references, vec!["src/b.rs:1"]);
        assert!(entries[1].is_fuzzy());
        assert_eq!(entries[1].comments, vec![" note"]);
    }

    #[test]
    fn test_header_without_blank_line_before_comment() {
        let text = "msgid \"\"\nmsgstr \"Language: fr\\n\"\n#: src/a.rs:3\nmsgid \"a\"\nmsgstr \"1\"\n";
        let parsed = parse_catalog(text);
        assert_eq!(parsed.header.unwrap().language, "fr");
        assert_eq!(parsed.entries[0].references, vec!["src/a.rs:3"]);
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_continuation_appends_to_open_field() {
        let text = "msgctxt \"a\"\n\"b\"\nmsgid \"c\"\n\"d\"\nmsgstr \"e\"\n\"f\"\n";
        let entries = parse_entries(text);
        assert_eq!(entries[0].context.as_deref(), Some("ab"));
        assert_eq!(entries[0].original_text, "cd");
        assert_eq!(entries[0].current_text, "ef");
    }

    #[test]
    fn test_stray_lines_are_recovered() {
        let text = "\"orphan\"\nmsgid \"a\"\nbogus line\nmsgstr \"1\"\n";
        let parsed = parse_catalog(text);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].current_text, "1");
        assert_eq!(parsed.diagnostics.len(), 2);
        assert_eq!(parsed.diagnostics[0].line, 1);
        assert_eq!(parsed.diagnostics[1].line, 3);
    }

    #[test]
    fn test_unterminated_string_keeps_text() {
        let parsed = parse_catalog("msgid \"a\"\nmsgstr \"half");
        assert_eq!(parsed.entries[0].current_text, "half");
        assert_eq!(parsed.diagnostics.len(), 1);
    }

    #[test]
    fn test_plural_fields_skipped() {
        let text = "msgid \"file\"\nmsgid_plural \"files\"\n\"x\"\nmsgstr[0] \"fichier\"\nmsgstr[1] \"fichiers\"\n";
        let parsed = parse_catalog(text);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].original_text, "file");
        assert_eq!(parsed.entries[0].current_text, "fichier");
        assert_eq!(parsed.diagnostics.len(), 2);
    }

    #[test]
    fn test_empty_key_after_header_dropped() {
        let text = "msgid \"a\"\nmsgstr \"1\"\n\nmsgid \"\"\nmsgstr \"x\"\n";
        let parsed = parse_catalog(text);
        assert!(parsed.header.is_none());
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.diagnostics.len(), 1);
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = "msgid \"a\"\r\nmsgstr \"1\"\r\n\r\nmsgid \"b\"\r\nmsgstr \"2\"\r\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].current_text, "2");
    }

    #[test]
    fn test_escapes_roundtrip() {
        let header = CatalogHeader::new("de");
        let entries = vec![
            CatalogEntry::new("say \"hi\"", "sag \"hallo\"\tbitte\\"),
            CatalogEntry::new("two\nlines\n", "zwei\r\nZeilen\n"),
            CatalogEntry::new("x", "").with_context("ctx\nwith newline"),
        ];
        let text = serialize_entries(&header, &entries);
        let parsed = parse_catalog(&text);
        assert_eq!(parsed.header.as_ref(), Some(&header));
        assert_eq!(parsed.entries, entries);
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_serialize_writes_header_first() {
        let text = serialize_entries(&CatalogHeader::new("es"), &[]);
        assert!(text.starts_with("msgid \"\"\nmsgstr \"\"\n\"Language: es\\n\"\n"));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let entry = CatalogEntry::new("Save", "Speichern")
            .with_comment(" translator note")
            .with_comment(". extracted note")
            .with_reference("src/a.rs:1")
            .with_reference("src/b.rs:2")
            .with_flag("fuzzy")
            .with_flag("c-format");
        let text = serialize_entries(&CatalogHeader::new("de"), std::slice::from_ref(&entry));
        assert_eq!(parse_entries(&text), vec![entry]);
    }

    #[test]
    fn test_previous_text_is_not_written() {
        let mut edited = CatalogEntry::new("Hello", "Salut");
        edited.previous_text = Some("Bonjour".into());
        let header = CatalogHeader::new("fr");

        let text = serialize_entries(&header, std::slice::from_ref(&edited));
        assert_eq!(text, serialize_entries(&header, &[CatalogEntry::new("Hello", "Salut")]));

        let parsed = parse_entries(&text);
        assert_eq!(parsed[0].previous_text, None);
        assert_eq!(parsed[0].current_text, "Salut");
    }

    #[test]
    fn test_unwritable_metadata_detected() {
        let header = CatalogHeader::new("fr");
        let cases = [
            CatalogEntry::new("a", "1").with_comment(": looks like a reference"),
            CatalogEntry::new("a", "1").with_comment(", fuzzy"),
            CatalogEntry::new("a", "1").with_comment(" two\nlines"),
            CatalogEntry::new("a", "1").with_reference("src/a b.rs:1"),
            CatalogEntry::new("a", "1").with_flag("c-format, fuzzy"),
            CatalogEntry::new("a", "1").with_flag(" padded"),
        ];
        for entry in cases {
            assert!(unwritable_reason(&entry).is_some(), "{entry:?}");
            let result = try_serialize_entries(&header, std::slice::from_ref(&entry));
            assert!(matches!(result, Err(GlossaError::Validation(_))), "{entry:?}");
        }

        let fine = CatalogEntry::new("a", "1")
            .with_comment(". extracted: with colon")
            .with_comment("")
            .with_reference("src/a.rs:1")
            .with_flag("no-c-format");
        assert_eq!(unwritable_reason(&fine), None);
        let text = try_serialize_entries(&header, std::slice::from_ref(&fine)).unwrap();
        assert_eq!(parse_entries(&text), vec![fine]);
    }

    #[test]
    fn test_streaming_splits_inside_utf8_sequence() {
        let text = "msgid \"café\"\nmsgstr \"Kaffee ☕\"\n";
        let bytes = text.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        let entries: Vec<_> = parse_entries_streaming(chunks).collect();
        assert_eq!(entries, parse_entries(text));
        assert_eq!(entries[0].current_text, "Kaffee ☕");
    }

    #[test]
    fn test_streaming_yields_entries_as_soon_as_terminated() {
        let mut parser = StreamingParser::new();
        assert!(parser.feed(b"msgid \"a\"\nmsgstr \"1\"\n").is_empty());
        let done = parser.feed(b"\nmsgid \"b\"");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].key, "a");
        assert_eq!(parser.buffered_len(), "msgid \"b\"".len());
        let rest = parser.finish();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key, "b");
        assert_eq!(parser.bytes_consumed(), 31);
    }
}
