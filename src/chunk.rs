//! Paragraph-boundary text chunker.
//!
//! Splits record text into pieces of at most `chunk_size` characters.
//! Splitting prefers paragraph boundaries (`\n\n`), then whitespace, and
//! each piece after the first starts with up to `chunk_overlap` characters
//! carried over from the end of the previous one.
//!
//! Sizes are counted in `char`s, never bytes, so multi-byte text is never
//! cut inside a code point.

use crate::models::Record;

/// Metadata key holding a chunk's position within its record.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// Split `text` into chunks. Returns no chunks for blank input.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = chunk_overlap.min(chunk_size - 1);

    let mut pieces: Vec<&str> = Vec::new();
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if char_len(trimmed) > chunk_size {
            pieces.extend(split_long(trimmed, chunk_size));
        } else {
            pieces.push(trimmed);
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();
    for piece in pieces {
        let would_be = if buf.is_empty() {
            char_len(piece)
        } else {
            char_len(&buf) + 2 + char_len(piece)
        };
        if would_be > chunk_size && !buf.is_empty() {
            let flushed = std::mem::take(&mut buf);
            // Carry as much context as still fits in front of the next piece.
            let room = chunk_size.saturating_sub(char_len(piece) + 2);
            let tail = tail_chars(&flushed, overlap.min(room)).trim_start().to_string();
            chunks.push(flushed);
            buf.push_str(&tail);
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(piece);
    }
    if !buf.trim().is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// Split one record into chunk records.
///
/// Chunk ids are `{record id}:{index}` and every chunk carries a
/// `chunk_index` metadata entry. A record that fits in one chunk still
/// gets index 0.
pub fn chunk_record(record: &Record, chunk_size: usize, chunk_overlap: usize) -> Vec<Record> {
    chunk_text(record.text(), chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let mut metadata = record.metadata().clone();
            metadata.insert(CHUNK_INDEX_KEY.to_string(), index.to_string());
            let chunk = Record::new(text, metadata);
            match record.id() {
                Some(id) => chunk.identified(format!("{}:{}", id, index)),
                None => chunk,
            }
        })
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Hard-split an oversized paragraph at `max` characters, backing off to
/// the last newline or space inside the window when there is one.
fn split_long(text: &str, max: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if char_len(remaining) <= max {
            out.push(remaining);
            break;
        }
        let window_end = remaining
            .char_indices()
            .nth(max)
            .map(|(idx, _)| idx)
            .unwrap_or(remaining.len());
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|pos| *pos > 0)
            .unwrap_or(window_end);
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = remaining[split_at..].trim_start();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1000, 150);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("", 100, 10).is_empty());
        assert!(chunk_text("\n\n  \n\n", 100, 10).is_empty());
    }

    #[test]
    fn chunks_respect_size_limit() {
        let text = (0..60)
            .map(|i| format!("Paragraphe numéro {} de la notice.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 120, 30);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 120, "chunk too long: {}", c.len());
        }
    }

    #[test]
    fn overlap_carries_previous_tail() {
        let text = "aaaa bbbb cccc\n\ndddd eeee ffff";
        let chunks = chunk_text(text, 20, 4);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "aaaa bbbb cccc");
        assert!(chunks[1].starts_with("cccc"));
        assert!(chunks[1].ends_with("dddd eeee ffff"));
    }

    #[test]
    fn long_paragraph_splits_on_whitespace() {
        let text = "mot ".repeat(100);
        let chunks = chunk_text(text.trim(), 50, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 50);
            assert!(!c.starts_with(' ') && !c.ends_with(' '));
        }
    }

    #[test]
    fn multibyte_text_is_not_cut_mid_char() {
        let text = "é".repeat(250);
        let chunks = chunk_text(&text, 100, 10);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.chars().count() <= 100);
            assert!(c.chars().all(|ch| ch == 'é' || ch == '\n'), "{:?}", c);
        }
        // The overlap carried into the last chunk is joined as a paragraph.
        assert_eq!(chunks[2], format!("{}\n\n{}", "é".repeat(10), "é".repeat(50)));
    }

    #[test]
    fn chunk_record_ids_and_index() {
        let record = Record::new("Alpha\n\nBeta", Metadata::new()).identified("abc");
        let chunks = chunk_record(&record, 6, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id(), Some("abc:0"));
        assert_eq!(chunks[1].id(), Some("abc:1"));
        assert_eq!(chunks[1].metadata()[CHUNK_INDEX_KEY], "1");
        assert_eq!(chunks[1].text(), "Beta");
    }
}
