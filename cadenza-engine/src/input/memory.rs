//! In-memory input stream, used by tests and for preloaded data

use std::io::Cursor;
use std::io::Read;

use crate::error::Result;

use super::InputStream;

/// An [`InputStream`] over an owned byte buffer.
pub struct MemoryInputStream {
    uri: String,
    cursor: Cursor<Vec<u8>>,
    mime: Option<String>,
}

impl MemoryInputStream {
    pub fn new(uri: impl Into<String>, data: Vec<u8>) -> Self {
        Self { uri: uri.into(), cursor: Cursor::new(data), mime: None }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

impl InputStream for MemoryInputStream {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.cursor.read(buf)?)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.cursor.set_position(offset);
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.cursor.position() >= self.cursor.get_ref().len() as u64
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        Some(self.cursor.get_ref().len() as u64)
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stream() {
        let mut s = MemoryInputStream::new("mem:test", vec![1, 2, 3, 4]).with_mime("audio/wav");
        assert_eq!(s.mime(), Some("audio/wav"));
        assert_eq!(s.size(), Some(4));

        let mut buf = [0u8; 8];
        assert_eq!(s.read(&mut buf).unwrap(), 4);
        assert!(s.is_eof());

        s.seek(2).unwrap();
        assert!(!s.is_eof());
        assert_eq!(s.read(&mut buf).unwrap(), 2);
    }
}
