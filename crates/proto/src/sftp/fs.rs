//! The virtual file-system contract the dispatcher delegates to.
//!
//! A backend implements [`SftpFs`] plus the per-resource traits
//! [`SftpFile`] and [`SftpDir`]. Backends are shared across channels and
//! own their own synchronization.
//!
//! Two optional capabilities let a backend skip implementing random-access
//! files or directory iteration: a bulk directory listing (paged by the
//! server) and sequential transfer streams (wrapped in the server's
//! random-access adapters). Capability discovery happens at the open site
//! through the `supports_*` predicates; the default implementations answer
//! [`Error::Unsupported`].

use crate::sftp::attr::{FileAttr, NamedAttr};
use async_trait::async_trait;
use skiff_platform::{Error, Result};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

/// A sequential transfer stream: read/write plus seek, for backends that
/// cannot offer offset-addressed files. The server layers its cursor-
/// tracking adapters on top.
pub trait SftpStream: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin> SftpStream for T {}

/// An open, offset-addressed backend file.
#[async_trait]
pub trait SftpFile: Send {
    /// Reads up to `buf.len()` bytes at `offset`. Returns the number of
    /// bytes read; zero means end of file.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Writes all of `data` at `offset`.
    async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()>;

    /// Stats the open file.
    async fn fstat(&self) -> Result<FileAttr>;

    /// Applies attributes to the open file.
    async fn fsetstat(&mut self, attr: &FileAttr) -> Result<()>;

    /// Releases the file.
    async fn close(&mut self) -> Result<()>;
}

/// An open backend directory stream.
#[async_trait]
pub trait SftpDir: Send {
    /// Returns up to `count` entries. An empty batch signals the end of the
    /// directory.
    async fn read_entries(&mut self, count: usize) -> Result<Vec<NamedAttr>>;

    /// Releases the directory.
    async fn close(&mut self) -> Result<()>;
}

/// The pluggable file-system backend.
#[async_trait]
pub trait SftpFs: Send + Sync {
    /// Opens a file for reading or writing per the SSH_FXF_* flags.
    async fn open_file(
        &self,
        name: &str,
        pflags: u32,
        attr: &FileAttr,
    ) -> Result<Box<dyn SftpFile>>;

    /// Opens a directory for iteration.
    async fn open_dir(&self, name: &str) -> Result<Box<dyn SftpDir>>;

    /// Removes a file.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Renames `old` to `new`. `flags` passes through from the wire.
    async fn rename(&self, old: &str, new: &str, flags: u32) -> Result<()>;

    /// Creates a directory with the requested attributes.
    async fn mkdir(&self, name: &str, attr: &FileAttr) -> Result<()>;

    /// Removes a directory.
    async fn rmdir(&self, name: &str) -> Result<()>;

    /// Stats a path. With `follow_links` false the link itself is stat'ed.
    async fn stat(&self, name: &str, follow_links: bool) -> Result<FileAttr>;

    /// Applies attributes to a path.
    async fn set_stat(&self, name: &str, attr: &FileAttr) -> Result<()>;

    /// Resolves a symbolic link.
    async fn read_link(&self, path: &str) -> Result<String>;

    /// Canonicalizes a path.
    async fn real_path(&self, path: &str) -> Result<String>;

    /// Whether [`SftpFs::read_dir_bulk`] is implemented.
    fn supports_read_dir_bulk(&self) -> bool {
        false
    }

    /// Returns the full contents of a directory at once; the server pages
    /// the result 1024 entries per reply.
    async fn read_dir_bulk(&self, name: &str) -> Result<Vec<NamedAttr>> {
        let _ = name;
        Err(Error::Unsupported("bulk directory listing"))
    }

    /// Whether [`SftpFs::transfer_stream`] is implemented.
    fn supports_transfer_streams(&self) -> bool {
        false
    }

    /// Opens a sequential stream positioned at `offset` for the given file.
    async fn transfer_stream(
        &self,
        name: &str,
        pflags: u32,
        attr: &FileAttr,
        offset: u64,
    ) -> Result<Box<dyn SftpStream>> {
        let _ = (name, pflags, attr, offset);
        Err(Error::Unsupported("sequential transfer streams"))
    }
}
