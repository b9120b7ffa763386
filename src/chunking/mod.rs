//! Chunker (C1): splits a file's text into fixed-size, line-bounded chunks
//! with overlap.
//!
//! Unlike AST-aware splitters, this chunker never looks at syntax — it
//! walks lines and accumulates a character-budget window, which is what
//! lets `chunk_file` stay a pure, allocation-cheap function with no
//! per-language grammar dependency.

use crate::error::EngineError;
use crate::error::Result;
use crate::types::Chunk;

/// Default character budget per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;
/// Default overlap, in characters, between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Split `text` into chunks. `file_extension` is attached to every
    /// emitted chunk verbatim (lower-cased, no leading dot).
    ///
    /// Empty files produce zero chunks. Lines longer than `chunk_size` are
    /// emitted as their own chunk rather than split mid-line.
    pub fn chunk_file(&self, text: &str, file_extension: &str) -> Result<Vec<Chunk>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        // `lines()` silently drops a trailing empty segment after the last
        // newline, which is what we want: an N-line file with a trailing
        // newline has N lines, not N+1.
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let ext = file_extension.trim_start_matches('.').to_ascii_lowercase();
        let mut windows: Vec<(usize, usize, String)> = Vec::new(); // (line_start_idx, line_end_idx, text), 0-based inclusive

        let mut start = 0usize;
        while start < lines.len() {
            let mut end = start;
            let mut len = lines[start].len();

            // Always take at least one line, even if it alone exceeds the
            // budget (oversized lines are their own chunk, not split).
            while end + 1 < lines.len() {
                let next_len = lines[end + 1].len() + 1; // +1 for the newline joiner
                if len + next_len > self.chunk_size {
                    break;
                }
                end += 1;
                len += next_len;
            }

            let window_text = lines[start..=end].join("\n");
            windows.push((start, end, window_text));

            if end + 1 >= lines.len() {
                break;
            }

            // Next window starts `chunk_overlap` characters before the
            // previous end, rounded back to a line boundary.
            let mut back_chars = 0usize;
            let mut next_start = end;
            while next_start > start && back_chars < self.chunk_overlap {
                back_chars += lines[next_start].len() + 1;
                next_start -= 1;
            }
            start = next_start + 1;
        }

        let total = windows.len();
        let chunks = windows
            .into_iter()
            .enumerate()
            .map(|(idx, (line_start, line_end, text))| Chunk {
                text,
                chunk_index: idx,
                total_chunks: total,
                line_start: (line_start + 1) as u32,
                line_end: (line_end + 1) as u32,
                file_extension: ext.clone(),
            })
            .collect();

        Ok(chunks)
    }

    /// Validates that raw bytes are usable input before chunking. Exists so
    /// callers that read raw bytes off disk can surface a `ChunkingFailed`
    /// at the same call site instead of panicking on a lossy UTF-8 convert.
    pub fn validate_bytes(bytes: &[u8]) -> Result<&str> {
        std::str::from_utf8(bytes).map_err(|e| EngineError::ChunkingFailed {
            reason: format!("file is not valid UTF-8: {e}"),
        })
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(n: usize, width: usize) -> String {
        (0..n)
            .map(|i| "x".repeat(width) + &i.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_file_produces_zero_chunks() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk_file("", "rs").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn single_small_file_is_one_chunk() {
        let chunker = Chunker::new(2000, 200);
        let chunks = chunker.chunk_file("line one\nline two\n", "py").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, 2);
        assert_eq!(chunks[0].file_extension, "py");
    }

    #[test]
    fn oversized_line_is_its_own_chunk() {
        let chunker = Chunker::new(50, 10);
        let text = format!("short\n{}\nshort2", "y".repeat(500));
        let chunks = chunker.chunk_file(&text, "txt").unwrap();
        // The middle line alone exceeds chunk_size and must appear as a
        // single chunk whose line_start == line_end.
        let oversized = chunks.iter().find(|c| c.line_start == 2).unwrap();
        assert_eq!(oversized.line_start, oversized.line_end);
    }

    #[test]
    fn multiple_windows_cover_every_line_with_overlap() {
        let chunker = Chunker::new(100, 20);
        let text = lines_of(40, 5);
        let chunks = chunker.chunk_file(&text, "rs").unwrap();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.total_chunks, chunks.len());
        }
        assert_eq!(chunks.last().unwrap().line_end, 40);
        assert_eq!(chunks[0].line_start, 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].line_start <= pair[0].line_end);
        }
    }

    #[test]
    fn trailing_partial_window_is_always_emitted() {
        let chunker = Chunker::new(30, 5);
        let text = lines_of(7, 5);
        let chunks = chunker.chunk_file(&text, "rs").unwrap();
        assert_eq!(chunks.last().unwrap().line_end, 7);
    }

    #[test]
    fn line_start_le_line_end_for_all_chunks() {
        let chunker = Chunker::new(40, 8);
        let text = lines_of(25, 3);
        let chunks = chunker.chunk_file(&text, "rs").unwrap();
        for c in &chunks {
            assert!(c.line_start <= c.line_end);
        }
    }
}
