//! Property tests for the catalog codec.
//!
//! Verifies:
//! - serialize → parse reproduces every entry, multi-line values included
//! - any chunking of a catalog parses to the same entries as the whole text

use glossa_core::codec::{parse_catalog, parse_entries, parse_entries_streaming, serialize_entries};
use glossa_core::model::{CatalogEntry, CatalogHeader};
use proptest::prelude::*;

// ─── Strategies ──────────────────────────────────────────────────────────────

fn text_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 äöüéß,.:;!?'\"\\\\\n\t-]{0,24}"
}

fn original_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 äé\"\\\\\n.-]{1,24}"
}

fn entry() -> impl Strategy<Value = CatalogEntry> {
    (
        original_text(),
        text_value(),
        proptest::option::of("[a-z \n]{0,10}"),
        proptest::collection::vec("[a-z_/]{1,8}\\.rs:[0-9]{1,3}", 0..3),
        proptest::collection::vec("[a-z][a-z-]{0,8}", 0..3),
        proptest::collection::vec("[a-zA-Z0-9 .]{0,20}", 0..2),
    )
        .prop_map(|(original, value, context, references, flags, comments)| {
            let mut entry = CatalogEntry::new(original, value);
            if let Some(context) = context {
                entry = entry.with_context(context);
            }
            for reference in references {
                entry = entry.with_reference(reference);
            }
            for flag in flags {
                entry = entry.with_flag(flag);
            }
            for comment in comments {
                entry = entry.with_comment(format!(" {comment}"));
            }
            entry
        })
}

// ─── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn serialized_catalog_parses_back(entries in proptest::collection::vec(entry(), 0..12)) {
        let header = CatalogHeader::new("fr");
        let text = serialize_entries(&header, &entries);
        let parsed = parse_catalog(&text);

        prop_assert_eq!(parsed.entries, entries);
        prop_assert_eq!(parsed.header, Some(header));
        prop_assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn chunking_does_not_change_entries(
        entries in proptest::collection::vec(entry(), 1..8),
        sizes in proptest::collection::vec(1usize..48, 1..16),
    ) {
        let text = serialize_entries(&CatalogHeader::new("de"), &entries);
        let bytes = text.as_bytes();

        let mut chunks = Vec::new();
        let mut at = 0;
        let mut i = 0;
        while at < bytes.len() {
            let size = sizes[i % sizes.len()];
            let end = (at + size).min(bytes.len());
            chunks.push(&bytes[at..end]);
            at = end;
            i += 1;
        }

        let streamed: Vec<CatalogEntry> = parse_entries_streaming(chunks).collect();
        prop_assert_eq!(streamed, parse_entries(&text));
    }
}

// ─── Fixed cases ─────────────────────────────────────────────────────────────

#[test]
fn test_quotes_and_newlines_survive() {
    let entries = vec![
        CatalogEntry::new("Say \"hi\"\nthen leave", "Dis \"salut\"\npuis pars\n"),
        CatalogEntry::new("C:\\path", "C:\\chemin").with_context("file\ndialog"),
    ];
    let text = serialize_entries(&CatalogHeader::new("fr"), &entries);
    assert_eq!(parse_entries(&text), entries);
}

#[test]
fn test_header_survives_with_extra_fields() {
    let mut header = CatalogHeader::new("pt-BR");
    header
        .extra
        .push(("Plural-Forms".into(), "nplurals=2; plural=(n > 1);".into()));
    let text = serialize_entries(&header, &[]);
    assert_eq!(parse_catalog(&text).header, Some(header));
}
