//! File-backed input stream

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

use super::InputStream;

/// An [`InputStream`] over a local file.
#[derive(Debug)]
pub struct FileInputStream {
    uri: String,
    file: File,
    size: u64,
    position: u64,
    mime: Option<&'static str>,
}

impl FileInputStream {
    pub fn open(path: impl AsRef<Path>, uri: &str) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::InputOpen {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;
        let size = file
            .metadata()
            .map_err(|e| Error::InputOpen { uri: uri.to_string(), message: e.to_string() })?
            .len();

        let mime = mime_from_extension(path);
        debug!(uri, size, ?mime, "opened file input");

        Ok(Self { uri: uri.to_string(), file, size, position: 0, mime })
    }
}

impl InputStream for FileInputStream {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.position >= self.size
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn mime(&self) -> Option<&str> {
        self.mime
    }
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "flac" => Some("audio/flac"),
        "mp3" => Some("audio/mpeg"),
        "ogg" | "oga" => Some("audio/ogg"),
        "opus" => Some("audio/opus"),
        "wav" => Some("audio/wav"),
        "m4a" | "mp4" => Some("audio/mp4"),
        "aac" => Some("audio/aac"),
        _ => None,
    }
}
