// src/core/buffer.rs

use crate::constants::TRUNCATION_MARKER;
use std::collections::VecDeque;

/// A bounded output buffer.
///
/// Chunks are appended as they arrive. Once the byte count exceeds the cap the
/// oldest chunks are dropped (a chunk larger than the cap on its own keeps only
/// its tail), and `contents()` starts with a marker stating how many bytes went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    bytes: usize,
    cap: Option<usize>,
    dropped_bytes: u64,
}

impl OutputBuffer {
    /// Creates a buffer holding at most `cap` bytes; `None` is unbounded.
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            cap,
            ..Self::default()
        }
    }

    /// Appends a chunk, evicting the oldest bytes past the cap.
    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.bytes += chunk.len();
        self.chunks.push_back(chunk.to_string());
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        let Some(cap) = self.cap else {
            return;
        };
        while self.bytes > cap {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let excess = self.bytes - cap;
            if front.len() <= excess {
                self.bytes -= front.len();
                self.dropped_bytes += front.len() as u64;
                self.chunks.pop_front();
            } else {
                // Cut inside the chunk, moving forward to a char boundary.
                let mut cut = excess;
                while !front.is_char_boundary(cut) {
                    cut += 1;
                }
                front.replace_range(..cut, "");
                self.bytes -= cut;
                self.dropped_bytes += cut as u64;
            }
        }
    }

    /// Whether any bytes were evicted.
    pub fn is_truncated(&self) -> bool {
        self.dropped_bytes > 0
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Changes the cap, evicting immediately if the buffer is now over it.
    pub fn set_cap(&mut self, cap: Option<usize>) {
        self.cap = cap;
        self.enforce_cap();
    }

    /// The held output joined, prefixed by the truncation marker if bytes were dropped.
    pub fn contents(&self) -> String {
        let mut joined = String::with_capacity(self.bytes + 48);
        if self.is_truncated() {
            joined.push_str(&format!(
                "{} {} earlier bytes dropped ...]\n",
                TRUNCATION_MARKER, self.dropped_bytes
            ));
        }
        for chunk in &self.chunks {
            joined.push_str(chunk);
        }
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_buffer_keeps_everything() {
        let mut buffer = OutputBuffer::new(None);
        for i in 0..1000 {
            buffer.push(&format!("line {i}\n"));
        }
        assert!(!buffer.is_truncated());
        assert!(buffer.contents().starts_with("line 0\n"));
        assert!(buffer.contents().ends_with("line 999\n"));
    }

    #[test]
    fn test_oldest_chunks_are_evicted_first() {
        let mut buffer = OutputBuffer::new(Some(10));
        buffer.push("aaaa\n");
        buffer.push("bbbb\n");
        buffer.push("cccc\n");
        assert_eq!(buffer.len(), 10);
        assert!(buffer.is_truncated());
        let contents = buffer.contents();
        assert!(contents.starts_with(TRUNCATION_MARKER));
        assert!(contents.contains("5 earlier bytes dropped"));
        assert!(contents.ends_with("bbbb\ncccc\n"));
    }

    #[test]
    fn test_oversized_chunk_keeps_its_tail() {
        let mut buffer = OutputBuffer::new(Some(4));
        buffer.push("0123456789");
        assert_eq!(buffer.len(), 4);
        assert!(buffer.contents().ends_with("6789"));
    }

    #[test]
    fn test_cut_respects_utf8_boundaries() {
        let mut buffer = OutputBuffer::new(Some(3));
        buffer.push("ééé");
        // Each 'é' is two bytes; the cut lands on a boundary, never inside a char.
        let contents = buffer.contents();
        assert!(contents.ends_with('é'));
        assert!(buffer.len() <= 3);
    }

    #[test]
    fn test_shrinking_cap_evicts_immediately() {
        let mut buffer = OutputBuffer::new(None);
        buffer.push("hello ");
        buffer.push("world");
        buffer.set_cap(Some(5));
        assert_eq!(buffer.len(), 5);
        assert!(buffer.contents().ends_with("world"));
    }
}
