//! Text Chunking Module
//!
//! Splits knowledge text into paragraph-bounded chunks so each piece can be
//! scored on its own. Consecutive chunks share a short word tail.

use std::sync::LazyLock;

use regex::Regex;

/// Paragraph break: two or more consecutive newlines
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("paragraph break pattern is valid"));

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Characters per overlap word used to turn the overlap budget into a word count
const CHARS_PER_WORD: usize = 5;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// Chunking configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Target chunk size (characters)
    pub max_characters: usize,
    /// Approximate overlap carried into the next chunk (characters)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 500,
            overlap_characters: 50,
        }
    }
}

impl ChunkConfig {
    /// Number of trailing words carried over when a chunk closes
    pub fn overlap_words(&self) -> usize {
        self.overlap_characters.div_ceil(CHARS_PER_WORD)
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// Text chunking strategy
pub trait Chunker: Send + Sync {
    /// Split text into chunks
    fn chunk(&self, text: &str) -> Vec<String>;

    /// Chunker name
    fn name(&self) -> &'static str;
}

// ============================================================================
// ParagraphChunker
// ============================================================================

/// Paragraph-accumulating chunker
///
/// Paragraphs are never split. A paragraph longer than `max_characters`
/// becomes one oversized chunk.
pub struct ParagraphChunker {
    config: ChunkConfig,
}

impl ParagraphChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Seed for the next buffer: the last few words of the closed one
    fn overlap_seed(&self, closed: &str) -> String {
        let keep = self.config.overlap_words();
        if keep == 0 {
            return String::new();
        }

        let words: Vec<&str> = closed.split_whitespace().collect();
        let start = words.len().saturating_sub(keep);
        let tail = words[start..].join(" ");

        if tail.is_empty() {
            tail
        } else {
            tail + PARAGRAPH_SEPARATOR
        }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for para in PARAGRAPH_BREAK.split(text) {
            let para_len = para.chars().count();

            // A whitespace-only buffer is never emitted as its own chunk
            if !current.trim().is_empty() && current_len + para_len > self.config.max_characters {
                chunks.push(current.trim().to_string());
                current = self.overlap_seed(&current);
                current_len = current.chars().count();
            }

            current.push_str(para);
            current.push_str(PARAGRAPH_SEPARATOR);
            current_len += para_len + PARAGRAPH_SEPARATOR.len();
        }

        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "ParagraphChunker"
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Chunker with the default 500/50 budget
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(ParagraphChunker::with_defaults())
}

/// Chunker with an explicit budget
pub fn paragraph_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(ParagraphChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, overlap: usize) -> ParagraphChunker {
        ParagraphChunker::new(ChunkConfig {
            max_characters: max,
            overlap_characters: overlap,
        })
    }

    #[test]
    fn test_chunker_empty() {
        let chunks = ParagraphChunker::with_defaults().chunk("");
        assert!(chunks.is_empty());

        let chunks = ParagraphChunker::with_defaults().chunk("\n\n  \n\n");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunker_leading_blank_paragraph() {
        let long = "a".repeat(600);
        let chunks = ParagraphChunker::with_defaults().chunk(&format!(" \n\n{}", long));
        assert_eq!(chunks, vec![long]);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_chunker_small_text_single_chunk() {
        let text = "First paragraph.\n\nSecond paragraph.";
        let chunks = ParagraphChunker::with_defaults().chunk(text);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_chunker_fasting_scenario() {
        let text = "Para1.\n\nPara2 that is long and keeps going for a while.";
        let chunks = chunker(10, 50).chunk(text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Para1.");
        assert!(chunks[1].starts_with("Para1."));
        assert!(chunks[1].ends_with("keeps going for a while."));
    }

    #[test]
    fn test_chunker_oversized_paragraph_kept_whole() {
        let long = "word ".repeat(100);
        let long = long.trim();
        let chunks = chunker(20, 0).chunk(long);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], long);
    }

    #[test]
    fn test_chunker_overlap_word_count() {
        // 10 characters of overlap -> 2 words
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunker(30, 10).chunk(text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "alpha beta gamma delta");
        assert_eq!(chunks[1], "gamma delta\n\nepsilon zeta eta theta");
    }

    #[test]
    fn test_chunker_without_overlap_reconstructs_paragraphs() {
        let paragraphs = ["one two three", "four five six", "seven eight nine", "ten"];
        let text = paragraphs.join("\n\n\n");
        let chunks = chunker(15, 0).chunk(&text);

        let rejoined = chunks.join("\n\n");
        let rebuilt: Vec<&str> = PARAGRAPH_BREAK.split(&rejoined).collect();
        assert_eq!(rebuilt, paragraphs);
    }

    #[test]
    fn test_chunker_counts_characters_not_bytes() {
        // 6 characters, 18 bytes
        let text = "안녕하세요!\n\n세계";
        let chunks = chunker(10, 0).chunk(text);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_overlap_words() {
        assert_eq!(ChunkConfig::default().overlap_words(), 10);
        assert_eq!(
            ChunkConfig {
                max_characters: 100,
                overlap_characters: 11
            }
            .overlap_words(),
            3
        );
        assert_eq!(
            ChunkConfig {
                max_characters: 100,
                overlap_characters: 0
            }
            .overlap_words(),
            0
        );
    }
}
