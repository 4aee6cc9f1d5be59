//! Random-access byte sources backing a database file.

use super::error::InputError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// A read-only view over the bytes of one database file
///
/// Implementations must be safe to call from several threads at once, since
/// per-root walks may run concurrently.
pub trait ByteSource: Sync {
    /// Total size of the source in bytes
    fn size(&self) -> u64;

    /// Reads exactly `len` bytes starting at `offset`
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, InputError>;

    fn check_bounds(&self, offset: u64, len: usize) -> Result<(), InputError> {
        let size = self.size();
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok(()),
            _ => Err(InputError::OutOfBounds { offset, len, size }),
        }
    }
}

/// Database file on disk
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    /// Opens the SQLite database file at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        debug!("Opened {} ({} bytes)", path.as_ref().display(), size);
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, InputError> {
        self.check_bounds(offset, len)?;

        let mut buf = vec![0; len];
        // A poisoned lock still holds a usable handle.
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Database image held in memory
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, InputError> {
        self.check_bounds(offset, len)?;
        let start = offset as usize;
        Ok(self.data[start..start + len].to_vec())
    }
}
