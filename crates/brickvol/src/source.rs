//! Random-access byte sources for brick payloads.
//!
//! The payload decoder only needs to know how long the blob is and how to
//! read an exact byte range from it.
//!
//! # Implementations
//!
//! - `[u8]`: an in-memory blob
//! - [`FileSource`]: a blob on disk, read on demand

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// A blob of concatenated brick payloads.
pub trait BrickSource: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Whether the blob holds no bytes at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// A read that cannot fill the whole buffer is an error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl BrickSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| short_read(offset, buf.len()))?;
        let bytes = start
            .checked_add(buf.len())
            .and_then(|end| self.get(start..end))
            .ok_or_else(|| short_read(offset, buf.len()))?;
        buf.copy_from_slice(bytes);
        Ok(())
    }
}

/// A blob file opened for reading.
///
/// Reads seek a shared handle, so concurrent readers are serialized.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
    path: PathBuf,
}

impl FileSource {
    /// Open a blob file and record its length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or inspected.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let io_error = |e: io::Error| Error::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        let file = File::open(path).map_err(io_error)?;
        let len = file.metadata().map_err(io_error)?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
            path: path.to_path_buf(),
        })
    }

    /// The path this source was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BrickSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("blob file lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

fn short_read(offset: u64, wanted: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("cannot read {wanted} bytes at offset {offset}"),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_slice_source() {
        let blob: &[u8] = &[1, 2, 3, 4, 5];
        assert_eq!(BrickSource::len(blob), 5);
        assert!(!BrickSource::is_empty(blob));

        let mut buf = [0u8; 2];
        blob.read_at(3, &mut buf).unwrap();
        assert_eq!(buf, [4, 5]);

        let error = blob.read_at(4, &mut buf).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
        assert!(blob.read_at(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[9u8, 8, 7, 6]).unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.len(), 4);
        assert_eq!(source.path(), file.path());

        let mut buf = [0u8; 3];
        source.read_at(1, &mut buf).unwrap();
        assert_eq!(buf, [8, 7, 6]);
        assert!(source.read_at(2, &mut buf).is_err());
    }

    #[test]
    fn test_file_source_missing() {
        let result = FileSource::open("/nonexistent/brickvol/bricks.bin");
        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
