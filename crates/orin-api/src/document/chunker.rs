use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Character-window chunker with overlap.
///
/// A window that would end inside a word is pulled back to the last
/// whitespace in its second half, so chunks rarely split words.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if overlap >= chunk_size {
            bail!("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})");
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_len = chars.len();

        let mut start = 0;
        while start < total_len {
            let mut end = std::cmp::min(start + self.chunk_size, total_len);

            if end < total_len && !chars[end].is_whitespace() {
                let floor = start + self.chunk_size / 2;
                if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                    end = ws;
                }
            }

            let content: String = chars[start..end].iter().collect();
            let content = content.trim();
            if !content.is_empty() {
                chunks.push(Chunk {
                    index: chunks.len(),
                    content: content.to_string(),
                    start_pos: start,
                    end_pos: end,
                });
            }

            if end >= total_len {
                break;
            }

            // always advance, even when the window was shortened below the overlap
            start = std::cmp::max(end.saturating_sub(self.overlap), start + 1);
        }

        chunks
    }
}
