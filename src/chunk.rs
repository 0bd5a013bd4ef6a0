//! Overlapping, separator-aware text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters. Each chunk boundary is placed on the coarsest separator that
//! fits inside the window, tried in this order:
//!
//! | Priority | Separator | Meaning |
//! |----------|-----------|---------|
//! | 1 | `"\n\n"` | paragraph / table-row block |
//! | 2 | `"\n"` | line break |
//! | 3 | `". "` | end of sentence |
//! | 4 | `" "` | word |
//! | 5 | (none) | raw character split |
//!
//! The separator stays at the end of the chunk it closes. The next chunk
//! starts exactly `overlap` characters before the previous one ended, so
//! trimming the first `overlap` characters of every chunk after the first
//! and concatenating reconstructs the input exactly.
//!
//! All lengths and offsets are measured in `char`s, not bytes.
//!
//! Chunk identifiers are derived from the document id and the chunk ordinal
//! ([`chunk_id`]), so re-ingesting a document overwrites its vectors in
//! place instead of accumulating duplicates.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split separators, coarsest first.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Sizing parameters for splitting text.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker. `chunk_size` is raised to at least 1 and `overlap`
    /// is capped at `chunk_size - 1` so every step makes progress; the
    /// config loader rejects such values before they get here.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily compute the chunk spans of `text`.
    ///
    /// The iterator is finite and `Clone`; cloning it (or calling `spans`
    /// again) restarts the sequence from the same position.
    pub fn spans<'a>(&self, text: &'a str) -> Spans<'a> {
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        Spans {
            text,
            offsets,
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            next_start: Some(0),
        }
    }

    /// Split `text` into chunks belonging to `document_id`.
    ///
    /// Always returns at least one chunk; text no longer than the chunk
    /// size (including empty text) comes back as a single chunk equal to
    /// the input.
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        let spans: Vec<Span<'_>> = self.spans(text).collect();
        let total = spans.len();
        spans
            .into_iter()
            .enumerate()
            .map(|(ordinal, span)| Chunk {
                document_id: document_id.to_string(),
                ordinal,
                total,
                start: span.start,
                text: span.text.to_string(),
            })
            .collect()
    }
}

/// Convenience wrapper around [`Chunker::chunk`].
pub fn chunk_text(document_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    Chunker::new(chunk_size, overlap).chunk(document_id, text)
}

/// A chunk boundary pair in character offsets, with the borrowed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub start: usize,
    pub end: usize,
    pub text: &'a str,
}

/// Iterator over the chunk spans of one text. See [`Chunker::spans`].
#[derive(Debug, Clone)]
pub struct Spans<'a> {
    text: &'a str,
    /// Byte offset of every char, followed by `text.len()`.
    offsets: Vec<usize>,
    chunk_size: usize,
    overlap: usize,
    next_start: Option<usize>,
}

impl<'a> Spans<'a> {
    fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }

    fn span(&self, start: usize, end: usize) -> Span<'a> {
        Span {
            start,
            end,
            text: &self.text[self.offsets[start]..self.offsets[end]],
        }
    }

    /// Choose where the chunk starting at `start` ends, given that the
    /// remaining text does not fit in one chunk.
    ///
    /// The end must land after `start + overlap` so the next chunk starts
    /// strictly later than this one.
    fn split_point(&self, start: usize) -> usize {
        let window_end = start + self.chunk_size;
        let min_end = start + self.overlap + 1;
        let window_start_byte = self.offsets[start];
        let window = &self.text[window_start_byte..self.offsets[window_end]];

        for sep in SEPARATORS {
            if let Some(pos) = window.rfind(sep) {
                let end_byte = window_start_byte + pos + sep.len();
                // Separators are ASCII, so `end_byte` is always a char boundary.
                if let Ok(end) = self.offsets.binary_search(&end_byte) {
                    if end >= min_end {
                        return end;
                    }
                }
            }
        }

        window_end
    }
}

impl<'a> Iterator for Spans<'a> {
    type Item = Span<'a>;

    fn next(&mut self) -> Option<Span<'a>> {
        let start = self.next_start?;
        let len = self.char_len();

        if len - start <= self.chunk_size {
            self.next_start = None;
            return Some(self.span(start, len));
        }

        let end = self.split_point(start);
        self.next_start = Some(end - self.overlap);
        Some(self.span(start, end))
    }
}

/// Deterministic identifier for the `ordinal`-th chunk of a document.
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let name = format!("{}:{}", document_id, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// SHA-256 hex digest of chunk text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
