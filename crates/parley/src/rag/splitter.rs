use std::collections::VecDeque;

use crate::errors::{AgentError, AgentResult};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Splits text into chunks of at most `chunk_size` characters.
///
/// The first separator found in the text is used to cut it into pieces; pieces
/// that are still too long are cut again with the following separators. Small
/// pieces are then merged back into chunks, with neighbouring chunks sharing up to
/// `chunk_overlap` characters. Separators stay attached to the start of the piece
/// that follows them, and chunks are trimmed of surrounding whitespace.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for RecursiveCharacterTextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RecursiveCharacterTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> AgentResult<Self> {
        if chunk_size == 0 {
            return Err(AgentError::InvalidParameters(
                "chunk size must be positive".to_string(),
            ));
        }
        if chunk_overlap > chunk_size {
            return Err(AgentError::InvalidParameters(format!(
                "chunk overlap ({}) is larger than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        })
    }

    pub fn with_separators<S: Into<String>>(mut self, separators: impl IntoIterator<Item = S>) -> Self {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map_or("", String::as_str);
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if total > self.chunk_size {
                    tracing::warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total,
                        self.chunk_size
                    );
                }
                chunks.extend(join(&current));
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(first) => total -= char_len(first),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }
        chunks.extend(join(&current));
        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn join(pieces: &VecDeque<&str>) -> Option<String> {
    let text: String = pieces.iter().copied().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Cut `text` before every occurrence of `separator`; an empty separator cuts
/// between characters. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        pieces.push(&text[start..pos]);
        start = pos;
    }
    pieces.push(&text[start..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = RecursiveCharacterTextSplitter::default();
        assert_eq!(splitter.split_text("  short text \n"), vec!["short text"]);
        assert!(splitter.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn test_split_keeping_separator() {
        assert_eq!(
            split_keeping_separator("a. b. c", ". "),
            vec!["a", ". b", ". c"]
        );
        assert_eq!(split_keeping_separator(". a", ". "), vec![". a"]);
        assert_eq!(split_keeping_separator("héj", ""), vec!["h", "é", "j"]);
    }

    #[test]
    fn test_splits_on_words() {
        let splitter = RecursiveCharacterTextSplitter::new(10, 0).unwrap();
        assert_eq!(
            splitter.split_text("hello world foo bar"),
            vec!["hello", "world foo", "bar"]
        );
    }

    #[test]
    fn test_prefers_paragraphs() {
        let splitter = RecursiveCharacterTextSplitter::new(12, 0).unwrap();
        assert_eq!(
            splitter.split_text("para one.\n\npara two."),
            vec!["para one.", "para two."]
        );
    }

    #[test]
    fn test_character_fallback_with_overlap() {
        let splitter = RecursiveCharacterTextSplitter::new(10, 3).unwrap();
        assert_eq!(
            splitter.split_text("abcdefghijklmnopqrstuvwxyz"),
            vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxyz"]
        );
    }

    #[test]
    fn test_long_pieces_are_split_again() {
        let splitter = RecursiveCharacterTextSplitter::new(20, 0).unwrap();
        let text = "short\n\nthis paragraph is much longer than twenty";
        let chunks = splitter.split_text(text);
        assert_eq!(chunks[0], "short");
        assert!(chunks.len() > 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }

    #[test]
    fn test_default_chunks_respect_size() {
        let sentence = "The quarterly revenue grew by twelve percent compared to last year. ";
        let text = sentence.repeat(60);
        let splitter = RecursiveCharacterTextSplitter::default();
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= DEFAULT_CHUNK_SIZE));
        assert!(chunks.iter().all(|c| c.starts_with("The") || c.starts_with(". The")));
    }

    #[test]
    fn test_default_overlap_between_chunks() {
        let text = (0..400)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = RecursiveCharacterTextSplitter::default().split_text(&text);

        assert!(chunks[0].starts_with("w000"));
        assert!(chunks[0].ends_with("w099"));
        // the last 50 characters of a chunk open the next one
        assert!(chunks[1].starts_with("w090 w091"));
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(RecursiveCharacterTextSplitter::new(0, 0).is_err());
        assert!(RecursiveCharacterTextSplitter::new(10, 11).is_err());
    }

    #[test]
    fn test_custom_separators() {
        let splitter = RecursiveCharacterTextSplitter::new(5, 0)
            .unwrap()
            .with_separators(["|", ""]);
        assert_eq!(splitter.split_text("ab|cd|ef"), vec!["ab|cd", "|ef"]);
    }
}
