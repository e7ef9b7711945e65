//! Per-channel handle table.
//!
//! Handles are opaque strings issued to the client: the first byte encodes
//! the kind (`'f'` file, `'d'` directory) and the rest is a hex counter
//! that only ever grows, so a handle is never reused within a session. The
//! table owns everything cached per handle (the remembered open arguments
//! and the lazily created readers, writers and directory readers) and
//! releases all of it on close.

use crate::sftp::adapter::{AutoSeekWriter, DirPager, RandomAccessReader};
use crate::sftp::attr::{FileAttr, NamedAttr};
use crate::sftp::fs::{SftpDir, SftpFile, SftpStream};
use skiff_platform::{Error, Result};
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Cap on live file handles per channel; directory handles get the same
/// bound of their own.
pub const MAX_FILES: usize = 256;

/// The remembered arguments of an OPEN request. The backend file is not
/// opened until the first READ or WRITE on the handle, so these stay
/// around to perform that deferred open.
#[derive(Debug, Clone)]
pub struct FileOpenArgs {
    /// Path the client asked to open.
    pub path: String,
    /// SSH_FXF_* open flags.
    pub pflags: u32,
    /// Requested attributes.
    pub attr: FileAttr,
}

/// The read half cached for a file handle: either a natively
/// offset-addressed backend file, or a sequential stream behind the
/// cursor-tracking adapter.
pub enum FileReader {
    /// Offset-addressed backend file, driven directly.
    Direct(Box<dyn SftpFile>),
    /// Sequential transfer stream wrapped for random access.
    Stream(RandomAccessReader<Box<dyn SftpStream>>),
}

impl FileReader {
    /// Reads up to `buf.len()` bytes at `offset`; zero means end of file.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        match self {
            Self::Direct(file) => file.read_at(buf, offset).await,
            Self::Stream(rd) => rd.read_at(buf, offset).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Direct(file) => file.close().await,
            Self::Stream(rd) => {
                rd.get_mut().shutdown().await?;
                Ok(())
            }
        }
    }
}

/// The write half cached for a file handle.
pub enum FileWriter {
    /// Offset-addressed backend file, driven directly.
    Direct(Box<dyn SftpFile>),
    /// Sequential transfer stream wrapped behind an auto-seeking cursor.
    Stream(AutoSeekWriter<Box<dyn SftpStream>>),
}

impl FileWriter {
    /// Writes all of `data` at `offset`.
    pub async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        match self {
            Self::Direct(file) => file.write_at(data, offset).await,
            Self::Stream(wr) => wr.write_at(data, offset).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Direct(file) => file.close().await,
            Self::Stream(wr) => wr.close().await,
        }
    }
}

/// The directory reader cached for a directory handle.
pub enum DirReader {
    /// Backend directory stream.
    Backend(Box<dyn SftpDir>),
    /// Pre-fetched bulk listing, paged by the server.
    Paged(DirPager),
}

impl DirReader {
    /// Returns up to `count` entries; empty once exhausted.
    pub async fn read_entries(&mut self, count: usize) -> Result<Vec<NamedAttr>> {
        match self {
            Self::Backend(dir) => dir.read_entries(count).await,
            Self::Paged(pager) => Ok(pager.next_page(count)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Backend(dir) => dir.close().await,
            Self::Paged(_) => Ok(()),
        }
    }
}

/// Per-channel handle state. Single-writer by construction: only the
/// channel's dispatcher task touches it.
#[derive(Default)]
pub struct HandleTable {
    files: HashMap<String, FileOpenArgs>,
    dirs: HashMap<String, String>,
    readers: HashMap<String, FileReader>,
    writers: HashMap<String, FileWriter>,
    dir_readers: HashMap<String, DirReader>,
    counter: u64,
}

impl HandleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live file handles.
    pub fn nfiles(&self) -> usize {
        self.files.len()
    }

    /// Number of live directory handles.
    pub fn ndirs(&self) -> usize {
        self.dirs.len()
    }

    /// Issues a file handle for the given open arguments.
    ///
    /// Fails with [`Error::TooManyHandles`] once [`MAX_FILES`] file handles
    /// are live; the channel stays up and the counter is not consumed.
    pub fn new_file(&mut self, args: FileOpenArgs) -> Result<String> {
        if self.nfiles() >= MAX_FILES {
            return Err(Error::TooManyHandles);
        }
        self.counter += 1;
        let handle = format!("f{:x}", self.counter);
        self.files.insert(handle.clone(), args);
        Ok(handle)
    }

    /// Issues a directory handle for the given path, bounded like
    /// [`HandleTable::new_file`].
    pub fn new_dir(&mut self, path: String) -> Result<String> {
        if self.ndirs() >= MAX_FILES {
            return Err(Error::TooManyHandles);
        }
        self.counter += 1;
        let handle = format!("d{:x}", self.counter);
        self.dirs.insert(handle.clone(), path);
        Ok(handle)
    }

    /// Looks up the open arguments of a file handle.
    pub fn file_args(&self, handle: &str) -> Option<&FileOpenArgs> {
        self.files.get(handle)
    }

    /// Looks up the path of a directory handle.
    pub fn dir_path(&self, handle: &str) -> Option<&str> {
        self.dirs.get(handle).map(String::as_str)
    }

    /// The cached reader for a file handle, if one was created.
    pub fn reader(&mut self, handle: &str) -> Option<&mut FileReader> {
        self.readers.get_mut(handle)
    }

    /// Caches the reader for a file handle and returns it.
    pub fn set_reader(&mut self, handle: &str, reader: FileReader) -> &mut FileReader {
        self.readers.entry(handle.to_string()).or_insert(reader)
    }

    /// The cached writer for a file handle, if one was created.
    pub fn writer(&mut self, handle: &str) -> Option<&mut FileWriter> {
        self.writers.get_mut(handle)
    }

    /// Caches the writer for a file handle and returns it.
    pub fn set_writer(&mut self, handle: &str, writer: FileWriter) -> &mut FileWriter {
        self.writers.entry(handle.to_string()).or_insert(writer)
    }

    /// The cached directory reader, if one was created.
    pub fn dir_reader(&mut self, handle: &str) -> Option<&mut DirReader> {
        self.dir_readers.get_mut(handle)
    }

    /// Caches the directory reader for a handle and returns it.
    pub fn set_dir_reader(&mut self, handle: &str, reader: DirReader) -> &mut DirReader {
        self.dir_readers.entry(handle.to_string()).or_insert(reader)
    }

    /// Releases a handle and everything cached under it, dispatching on the
    /// kind prefix. Close errors from backends and adapters are swallowed;
    /// the client is owed nothing but an acknowledgment.
    pub async fn close_handle(&mut self, handle: &str) {
        match handle.as_bytes().first() {
            Some(b'f') => {
                self.files.remove(handle);
                if let Some(mut rd) = self.readers.remove(handle) {
                    if let Err(e) = rd.close().await {
                        warn!(handle, error = %e, "error closing reader");
                    }
                }
                if let Some(mut wr) = self.writers.remove(handle) {
                    if let Err(e) = wr.close().await {
                        warn!(handle, error = %e, "error closing writer");
                    }
                }
            }
            Some(b'd') => {
                self.dirs.remove(handle);
                if let Some(mut dr) = self.dir_readers.remove(handle) {
                    if let Err(e) = dr.close().await {
                        warn!(handle, error = %e, "error closing directory reader");
                    }
                }
            }
            _ => {}
        }
    }

    /// Releases every live handle; used when the channel goes down.
    pub async fn close_all(&mut self) {
        let handles: Vec<String> = self
            .files
            .keys()
            .chain(self.dirs.keys())
            .cloned()
            .collect();
        for handle in handles {
            self.close_handle(&handle).await;
        }
    }
}
