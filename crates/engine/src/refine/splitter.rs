//! Recursive character text splitting.
//!
//! Text is split on the first separator that occurs in it (paragraphs, then
//! lines, then words, then characters). Pieces are merged back into chunks of
//! at most `chunk_size` characters, with up to `chunk_overlap` characters
//! repeated between neighbouring chunks. Pieces still too long are split
//! again with the next separator.

use std::collections::VecDeque;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Prefix added to every chunk after the first.
pub const OVERLAP_HEADER: &str = "(cont'd) ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 100,
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl TextSplitter {
    /// Overlap is clamped below the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    /// Split `text` and prefix each chunk with `header`; chunks after the
    /// first also get [`OVERLAP_HEADER`].
    pub fn create_documents(&self, text: &str, header: &str) -> Vec<String> {
        self.split_text(text)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                if i == 0 {
                    format!("{header}{chunk}")
                } else {
                    format!("{header}{OVERLAP_HEADER}{chunk}")
                }
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let rest = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short, separator));
                short.clear();
            }
            if rest.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, rest));
            }
        }

        if !short.is_empty() {
            chunks.extend(self.merge(&short, separator));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        let join = |window: &VecDeque<&str>| -> Option<String> {
            let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
            let trimmed = joined.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !window.is_empty() {
                chunks.extend(join(&window));

                // Slide the window until only the overlap remains and the
                // next piece fits.
                while let Some(&front) = window.front() {
                    let joiner = if window.is_empty() { 0 } else { sep_len };
                    if total <= self.chunk_overlap && total + len + joiner <= self.chunk_size {
                        break;
                    }
                    let dropped = char_len(front) + if window.len() > 1 { sep_len } else { 0 };
                    total = total.saturating_sub(dropped);
                    window.pop_front();
                }
            }

            let joiner = if window.is_empty() { 0 } else { sep_len };
            window.push_back(piece);
            total += len + joiner;
        }

        chunks.extend(join(&window));
        chunks
    }
}
