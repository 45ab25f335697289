//! Recursive character splitter.
//!
//! Text is cut on the coarsest separator that occurs in it, and any piece
//! still too long is cut again on the next separator down the hierarchy.
//! Adjacent small pieces are then packed into chunks of at most
//! `chunk_size` characters, each chunk carrying up to `chunk_overlap`
//! characters from the end of the previous one. Lengths count `char`s.

use std::collections::VecDeque;

use specweaver_shared::{ChunkingConfig, Result};

/// Paragraph, line, sentence, word, character.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()))
            .unwrap_or(separators.len());
        let separator = separators.get(position).map_or("", String::as_str);
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.trim().to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }
        chunks.retain(|c| !c.is_empty());
        chunks
    }

    /// Pack small pieces into chunks, sliding a window for the overlap.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = |w: &VecDeque<&str>| if w.is_empty() { 0 } else { sep_len };

            if total + len + joiner(&window) > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = join_window(&window, separator) {
                    chunks.push(chunk);
                }
                while total > self.chunk_overlap
                    || (total > 0 && total + len + joiner(&window) > self.chunk_size)
                {
                    let Some(first) = window.front() else { break };
                    let dropped = char_len(first) + if window.len() > 1 { sep_len } else { 0 };
                    total = total.saturating_sub(dropped);
                    window.pop_front();
                }
            }

            total += len + joiner(&window);
            window.push_back(piece);
        }

        if let Some(chunk) = join_window(&window, separator) {
            chunks.push(chunk);
        }
        chunks
    }
}

fn join_window(window: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> TextSplitter {
        TextSplitter::new(&ChunkingConfig {
            chunk_size,
            chunk_overlap,
            ..ChunkingConfig::default()
        })
        .unwrap()
    }

    fn sentences(count: usize) -> String {
        (0..count)
            .map(|i| format!("Sentence {i} describes how the inventory module tracks stock"))
            .collect::<Vec<_>>()
            .join(". ")
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = splitter(1000, 100).split("  A small requirement.  ");
        assert_eq!(chunks, vec!["A small requirement."]);
    }

    #[test]
    fn no_chunk_exceeds_size() {
        let text = format!("{}\n\n{}\n{}", sentences(40), sentences(25), "x".repeat(700));
        let s = splitter(200, 40);
        let chunks = s.split(&text);
        assert!(chunks.len() > 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 200, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunks = splitter(200, 80).split(&sentences(30));
        assert!(chunks.len() >= 2);
        let carried = chunks[1].split(". ").next().unwrap();
        assert!(
            chunks[0].contains(carried),
            "expected {carried:?} to be carried over from the first chunk"
        );
    }

    #[test]
    fn paragraphs_preferred_over_sentences() {
        let text = "First paragraph. Still first.\n\nSecond paragraph.";
        let chunks = splitter(30, 0).split(text);
        assert_eq!(chunks, vec!["First paragraph. Still first.", "Second paragraph."]);
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let chunks = splitter(50, 10).split(&"é".repeat(120));
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
    }

    #[test]
    fn whitespace_only_yields_nothing() {
        assert!(splitter(100, 10).split(" \n\n \n ").is_empty());
    }
}
