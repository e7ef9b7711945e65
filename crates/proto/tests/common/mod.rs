//! Shared fixtures for the SFTP server integration tests: an in-memory
//! backend, a sequential-stream-only backend, and a minimal wire-level
//! client.

use async_trait::async_trait;
use skiff_platform::{Error, Result};
use skiff_proto::sftp::{
    FileAttr, FileKind, FileMode, NamedAttr, OpenFlags, SftpDir, SftpFile, SftpFs, SftpStream,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncSeek, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf,
};

fn not_found(path: &str) -> Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, format!("{path}: no such entry")).into()
}

fn denied(path: &str) -> Error {
    std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("{path}: permission denied"),
    )
    .into()
}

#[derive(Default)]
struct FsState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    links: BTreeMap<String, String>,
    denied: BTreeSet<String>,
}

impl FsState {
    /// Immediate children of `path`, as named attribute entries.
    fn list(&self, path: &str) -> Vec<NamedAttr> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let child_of = |full: &str| -> Option<String> {
            let rest = full.strip_prefix(&prefix)?;
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };
        let mut out = Vec::new();
        for (full, data) in &self.files {
            if let Some(name) = child_of(full) {
                out.push(NamedAttr::new(
                    name,
                    FileAttr::with_size_mode(data.len() as u64, FileMode::regular(0o644)),
                ));
            }
        }
        for full in &self.dirs {
            if let Some(name) = child_of(full) {
                out.push(NamedAttr::new(
                    name,
                    FileAttr::with_size_mode(0, FileMode::directory(0o755)),
                ));
            }
        }
        out
    }
}

/// In-memory backend with natively offset-addressed files. With
/// `with_bulk_listing` it advertises the bulk directory capability instead
/// of directory streams.
pub struct MemFs {
    state: Arc<Mutex<FsState>>,
    bulk_dirs: bool,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FsState::default())),
            bulk_dirs: false,
        }
    }

    pub fn with_bulk_listing() -> Self {
        Self {
            state: Arc::new(Mutex::new(FsState::default())),
            bulk_dirs: true,
        }
    }

    pub fn insert_file(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
    }

    pub fn insert_dir(&self, path: &str) {
        self.state.lock().unwrap().dirs.insert(path.to_string());
    }

    pub fn insert_link(&self, path: &str, target: &str) {
        self.state
            .lock()
            .unwrap()
            .links
            .insert(path.to_string(), target.to_string());
    }

    pub fn deny(&self, path: &str) {
        self.state.lock().unwrap().denied.insert(path.to_string());
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }
}

#[async_trait]
impl SftpFs for MemFs {
    async fn open_file(
        &self,
        name: &str,
        pflags: u32,
        _attr: &FileAttr,
    ) -> Result<Box<dyn SftpFile>> {
        let mut state = self.state.lock().unwrap();
        if state.denied.contains(name) {
            return Err(denied(name));
        }
        if !state.files.contains_key(name) {
            if pflags & OpenFlags::CREAT == 0 {
                return Err(not_found(name));
            }
            state.files.insert(name.to_string(), Vec::new());
        } else if pflags & OpenFlags::TRUNC != 0 {
            state.files.insert(name.to_string(), Vec::new());
        }
        Ok(Box::new(MemFile {
            state: self.state.clone(),
            path: name.to_string(),
        }))
    }

    async fn open_dir(&self, name: &str) -> Result<Box<dyn SftpDir>> {
        let state = self.state.lock().unwrap();
        if name != "/" && !state.dirs.contains(name) {
            return Err(not_found(name));
        }
        Ok(Box::new(MemDir {
            entries: state.list(name),
            pos: 0,
        }))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn rename(&self, old: &str, new: &str, _flags: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(data) = state.files.remove(old) {
            state.files.insert(new.to_string(), data);
            return Ok(());
        }
        if state.dirs.remove(old) {
            state.dirs.insert(new.to_string());
            return Ok(());
        }
        Err(not_found(old))
    }

    async fn mkdir(&self, name: &str, _attr: &FileAttr) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.dirs.contains(name) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{name}: already exists"),
            )
            .into());
        }
        state.dirs.insert(name.to_string());
        Ok(())
    }

    async fn rmdir(&self, name: &str) -> Result<()> {
        if self.state.lock().unwrap().dirs.remove(name) {
            Ok(())
        } else {
            Err(not_found(name))
        }
    }

    async fn stat(&self, name: &str, follow_links: bool) -> Result<FileAttr> {
        let state = self.state.lock().unwrap();
        if state.denied.contains(name) {
            return Err(denied(name));
        }
        if let Some(target) = state.links.get(name) {
            if follow_links {
                let data = state.files.get(target).ok_or_else(|| not_found(target))?;
                return Ok(FileAttr::with_size_mode(
                    data.len() as u64,
                    FileMode::regular(0o644),
                ));
            }
            return Ok(FileAttr::with_size_mode(
                target.len() as u64,
                FileMode {
                    perm: 0o777,
                    kind: FileKind::Other,
                },
            ));
        }
        if let Some(data) = state.files.get(name) {
            return Ok(FileAttr::with_size_mode(
                data.len() as u64,
                FileMode::regular(0o644),
            ));
        }
        if name == "/" || state.dirs.contains(name) {
            return Ok(FileAttr::with_size_mode(0, FileMode::directory(0o755)));
        }
        Err(not_found(name))
    }

    async fn set_stat(&self, name: &str, _attr: &FileAttr) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.files.contains_key(name) || state.dirs.contains(name) {
            Ok(())
        } else {
            Err(not_found(name))
        }
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .links
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn real_path(&self, path: &str) -> Result<String> {
        if path.is_empty() || path == "." {
            return Ok("/".to_string());
        }
        if path.starts_with('/') {
            Ok(path.to_string())
        } else {
            Ok(format!("/{path}"))
        }
    }

    fn supports_read_dir_bulk(&self) -> bool {
        self.bulk_dirs
    }

    async fn read_dir_bulk(&self, name: &str) -> Result<Vec<NamedAttr>> {
        let state = self.state.lock().unwrap();
        if name != "/" && !state.dirs.contains(name) {
            return Err(not_found(name));
        }
        Ok(state.list(name))
    }
}

struct MemFile {
    state: Arc<Mutex<FsState>>,
    path: String,
}

#[async_trait]
impl SftpFile for MemFile {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let state = self.state.lock().unwrap();
        let data = state.files.get(&self.path).ok_or_else(|| not_found(&self.path))?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let file = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| not_found(&self.path))?;
        let end = offset as usize + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn fstat(&self) -> Result<FileAttr> {
        let state = self.state.lock().unwrap();
        let data = state.files.get(&self.path).ok_or_else(|| not_found(&self.path))?;
        Ok(FileAttr::with_size_mode(
            data.len() as u64,
            FileMode::regular(0o644),
        ))
    }

    async fn fsetstat(&mut self, _attr: &FileAttr) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemDir {
    entries: Vec<NamedAttr>,
    pos: usize,
}

#[async_trait]
impl SftpDir for MemDir {
    async fn read_entries(&mut self, count: usize) -> Result<Vec<NamedAttr>> {
        let end = (self.pos + count).min(self.entries.len());
        let batch = self.entries[self.pos..end].to_vec();
        self.pos = end;
        Ok(batch)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Backend exposing a single file only through sequential transfer
/// streams, to exercise the server's random-access adapters. The generic
/// open paths answer unsupported so any accidental use shows up in tests.
pub struct SeqFs {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SeqFs {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

#[async_trait]
impl SftpFs for SeqFs {
    async fn open_file(
        &self,
        _name: &str,
        _pflags: u32,
        _attr: &FileAttr,
    ) -> Result<Box<dyn SftpFile>> {
        Err(Error::Unsupported("offset-addressed files"))
    }

    async fn open_dir(&self, _name: &str) -> Result<Box<dyn SftpDir>> {
        Err(Error::Unsupported("directory streams"))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        Err(not_found(name))
    }

    async fn rename(&self, old: &str, _new: &str, _flags: u32) -> Result<()> {
        Err(not_found(old))
    }

    async fn mkdir(&self, _name: &str, _attr: &FileAttr) -> Result<()> {
        Err(Error::Unsupported("directories"))
    }

    async fn rmdir(&self, name: &str) -> Result<()> {
        Err(not_found(name))
    }

    async fn stat(&self, _name: &str, _follow_links: bool) -> Result<FileAttr> {
        let len = self.data.lock().unwrap().len() as u64;
        Ok(FileAttr::with_size_mode(len, FileMode::regular(0o644)))
    }

    async fn set_stat(&self, _name: &str, _attr: &FileAttr) -> Result<()> {
        Ok(())
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        Err(not_found(path))
    }

    async fn real_path(&self, path: &str) -> Result<String> {
        Ok(path.to_string())
    }

    fn supports_transfer_streams(&self) -> bool {
        true
    }

    async fn transfer_stream(
        &self,
        _name: &str,
        _pflags: u32,
        _attr: &FileAttr,
        offset: u64,
    ) -> Result<Box<dyn SftpStream>> {
        Ok(Box::new(MemStream {
            data: self.data.clone(),
            pos: offset,
        }))
    }
}

/// A seekable in-memory stream; reads and writes walk a shared buffer
/// sequentially from the current position.
struct MemStream {
    data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
}

impl AsyncRead for MemStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        let data = me.data.lock().unwrap();
        let pos = me.pos as usize;
        if pos < data.len() {
            let n = buf.remaining().min(data.len() - pos);
            buf.put_slice(&data[pos..pos + n]);
            me.pos += n as u64;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MemStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let me = self.get_mut();
        let mut data = me.data.lock().unwrap();
        let end = me.pos as usize + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[me.pos as usize..end].copy_from_slice(buf);
        me.pos = end as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MemStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        let me = self.get_mut();
        let len = me.data.lock().unwrap().len() as i64;
        let target = match position {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => me.pos as i64 + n,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        me.pos = target as u64;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

/// Wire-level test client: frames requests, reads responses.
pub struct TestClient {
    stream: DuplexStream,
}

/// A decoded response packet.
#[derive(Debug)]
pub struct Response {
    pub opcode: u8,
    pub body: Vec<u8>,
}

impl Response {
    fn field_u32(&self, at: usize) -> u32 {
        u32::from_be_bytes(self.body[at..at + 4].try_into().unwrap())
    }

    pub fn id(&self) -> u32 {
        self.field_u32(0)
    }

    /// Unwraps a STATUS response, asserting the empty message and language
    /// tag, and returns (id, code).
    pub fn into_status(self) -> (u32, u32) {
        assert_eq!(self.opcode, 101, "expected STATUS, got {self:?}");
        assert_eq!(self.body.len(), 16);
        let code = self.field_u32(4);
        assert_eq!(self.field_u32(8), 0, "status message not empty");
        assert_eq!(self.field_u32(12), 0, "language tag not empty");
        (self.id(), code)
    }

    /// Unwraps a HANDLE response into (id, handle).
    pub fn into_handle(self) -> (u32, String) {
        assert_eq!(self.opcode, 102, "expected HANDLE, got {self:?}");
        let len = self.field_u32(4) as usize;
        let handle = String::from_utf8(self.body[8..8 + len].to_vec()).unwrap();
        (self.id(), handle)
    }

    /// Unwraps a DATA response into (id, payload).
    pub fn into_data(self) -> (u32, Vec<u8>) {
        assert_eq!(self.opcode, 103, "expected DATA, got {self:?}");
        let len = self.field_u32(4) as usize;
        assert_eq!(self.body.len(), 8 + len);
        let id = self.id();
        (id, self.body[8..].to_vec())
    }

    /// Unwraps an ATTRS response into (id, attributes).
    pub fn into_attrs(self) -> (u32, FileAttr) {
        assert_eq!(self.opcode, 105, "expected ATTRS, got {self:?}");
        let id = self.id();
        let mut p = skiff_proto::sftp::wire::Parser::new(&self.body[4..]);
        let attr = FileAttr::parse(&mut p).unwrap();
        p.end().unwrap();
        (id, attr)
    }

    /// Unwraps a NAME response into (id, short names).
    pub fn into_names(self) -> (u32, Vec<String>) {
        assert_eq!(self.opcode, 104, "expected NAME, got {self:?}");
        let count = self.field_u32(4) as usize;
        let mut names = Vec::with_capacity(count);
        let mut at = 8;
        for _ in 0..count {
            let name_len = self.field_u32(at) as usize;
            at += 4;
            names.push(String::from_utf8(self.body[at..at + name_len].to_vec()).unwrap());
            at += name_len;
            let long_len = self.field_u32(at) as usize;
            at += 4 + long_len;
            // Skip the attribute block: flags, then declared fields.
            let flags = self.field_u32(at);
            at += 4;
            if flags & FileAttr::SIZE != 0 {
                at += 8;
            }
            if flags & FileAttr::UIDGID != 0 {
                at += 8;
            }
            if flags & FileAttr::PERMISSIONS != 0 {
                at += 4;
            }
            if flags & FileAttr::ACMODTIME != 0 {
                at += 8;
            }
        }
        (self.id(), names)
    }
}

impl TestClient {
    pub fn new(stream: DuplexStream) -> Self {
        Self { stream }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn send(&mut self, opcode: u8, body: &[u8]) {
        let mut packet = Vec::with_capacity(5 + body.len());
        packet.extend_from_slice(&(1 + body.len() as u32).to_be_bytes());
        packet.push(opcode);
        packet.extend_from_slice(body);
        self.stream.write_all(&packet).await.unwrap();
    }

    /// Reads exactly `n` raw bytes off the channel.
    pub async fn recv_raw(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    pub async fn recv(&mut self) -> Response {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header).await.unwrap();
        let length = u32::from_be_bytes(header[..4].try_into().unwrap()) as usize;
        let mut body = vec![0u8; length - 1];
        self.stream.read_exact(&mut body).await.unwrap();
        Response {
            opcode: header[4],
            body,
        }
    }

    /// Reads until the server side closes; fails if more data arrives.
    pub async fn expect_eof(&mut self) {
        let mut buf = [0u8; 1];
        let n = self.stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "expected channel EOF");
    }

    pub async fn handshake(&mut self) {
        self.send(1, &3u32.to_be_bytes()).await;
        let resp = self.recv().await;
        assert_eq!(resp.opcode, 2);
        assert_eq!(resp.body, 3u32.to_be_bytes());
    }

    pub async fn open(&mut self, id: u32, path: &str, pflags: u32) -> Response {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&(path.len() as u32).to_be_bytes());
        body.extend_from_slice(path.as_bytes());
        body.extend_from_slice(&pflags.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes()); // attr flags: none
        self.send(3, &body).await;
        self.recv().await
    }

    pub async fn close(&mut self, id: u32, handle: &str) -> Response {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&(handle.len() as u32).to_be_bytes());
        body.extend_from_slice(handle.as_bytes());
        self.send(4, &body).await;
        self.recv().await
    }

    pub async fn read(&mut self, id: u32, handle: &str, offset: u64, len: u32) -> Response {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&(handle.len() as u32).to_be_bytes());
        body.extend_from_slice(handle.as_bytes());
        body.extend_from_slice(&offset.to_be_bytes());
        body.extend_from_slice(&len.to_be_bytes());
        self.send(5, &body).await;
        self.recv().await
    }

    pub async fn write(&mut self, id: u32, handle: &str, offset: u64, data: &[u8]) -> Response {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&(handle.len() as u32).to_be_bytes());
        body.extend_from_slice(handle.as_bytes());
        body.extend_from_slice(&offset.to_be_bytes());
        body.extend_from_slice(&(data.len() as u32).to_be_bytes());
        body.extend_from_slice(data);
        self.send(6, &body).await;
        self.recv().await
    }

    /// Sends an opcode whose body is id followed by one path string.
    pub async fn path_request(&mut self, opcode: u8, id: u32, path: &str) -> Response {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(&(path.len() as u32).to_be_bytes());
        body.extend_from_slice(path.as_bytes());
        self.send(opcode, &body).await;
        self.recv().await
    }
}
