//! The per-channel request dispatcher.
//!
//! [`serve_channel`] owns an accepted `subsystem=sftp` session channel for
//! its whole lifetime and runs the protocol state machine: read one packet,
//! decode it by opcode, call the backend, answer. One request is in flight
//! at a time, so responses leave in request order and the handle table has
//! a single writer.
//!
//! Errors come in two tiers. Backend and adapter failures are answered
//! with a STATUS response carrying the mapped error code and the loop
//! continues. Transport failures, malformed packets, and invalid handles
//! on data-bearing opcodes tear the channel down; the caller owns nothing
//! further, every backend resource is released on the way out.

use crate::sftp::adapter::{AutoSeekWriter, DirPager, RandomAccessReader};
use crate::sftp::attr::{FileAttr, NamedAttr};
use crate::sftp::fs::SftpFs;
use crate::sftp::handle::{DirReader, FileOpenArgs, FileReader, FileWriter, HandleTable};
use crate::sftp::message::{
    Opcode, StatusCode, MAX_DIR_ENTRIES, MAX_PACKET_SIZE, MAX_READ_LEN, SFTP_VERSION,
};
use crate::sftp::wire::{LenMark, Parser, Printer};
use skiff_platform::{Error, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Pre-encoded reply to INIT: a VERSION packet advertising protocol 3.
const INIT_REPLY: [u8; 9] = [0, 0, 0, 5, Opcode::Version as u8, 0, 0, 0, SFTP_VERSION as u8];

/// Wire form of the length-prefixed string `"sftp"`.
const SFTP_SUBSYSTEM_PAYLOAD: [u8; 8] = [0, 0, 0, 4, b's', b'f', b't', b'p'];

/// Recognizes an SSH channel request asking for the SFTP subsystem.
///
/// Hosts call this on `"subsystem"` requests before handing the accepted
/// channel to [`serve_channel`].
pub fn is_sftp_subsystem(request_type: &str, payload: &[u8]) -> bool {
    request_type == "subsystem" && payload == SFTP_SUBSYSTEM_PAYLOAD
}

/// Serves one SFTP session over an established channel.
///
/// Takes ownership of the channel and serves requests against `fs` until
/// the client closes its side (returns `Ok`) or a fatal framing, protocol,
/// or transport error occurs (returns `Err`). Every handle and backend
/// resource is released before returning, and the channel is shut down.
pub async fn serve_channel<C>(channel: C, fs: Arc<dyn SftpFs>) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut session = Session {
        channel,
        fs,
        handles: HandleTable::new(),
    };
    let result = session.run().await;
    session.handles.close_all().await;
    let _ = session.channel.shutdown().await;
    result
}

struct Session<C> {
    channel: C,
    fs: Arc<dyn SftpFs>,
    handles: HandleTable,
}

impl<C: AsyncRead + AsyncWrite + Unpin + Send> Session<C> {
    async fn run(&mut self) -> Result<()> {
        loop {
            let (length, op) = match self.read_header().await? {
                Some(header) => header,
                None => {
                    debug!("channel closed by peer");
                    return Ok(());
                }
            };
            if length > MAX_PACKET_SIZE {
                return Err(Error::Protocol(format!(
                    "packet length {length} exceeds {MAX_PACKET_SIZE} byte ceiling"
                )));
            }
            // Opcode byte plus at least one more: no defined request is
            // smaller.
            if length < 3 {
                return Err(Error::Protocol("packet too short".to_string()));
            }
            let mut body = vec![0u8; length - 1];
            self.channel.read_exact(&mut body).await?;
            trace!(opcode = op, len = body.len(), "request body");
            self.dispatch(op, &body).await?;
        }
    }

    /// Reads the 5-byte packet header. `None` means the peer closed the
    /// channel cleanly before starting another packet.
    async fn read_header(&mut self) -> Result<Option<(usize, u8)>> {
        let mut header = [0u8; 5];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.channel.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Protocol("truncated packet header".to_string()));
            }
            filled += n;
        }
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        Ok(Some((length, header[4])))
    }

    async fn dispatch(&mut self, op: u8, body: &[u8]) -> Result<()> {
        let mut p = Parser::new(body);
        let Some(opcode) = Opcode::from_u8(op) else {
            return self.reply_unsupported(op, body).await;
        };
        match opcode {
            Opcode::Init => {
                let client_version = p.u32()?;
                // Extension pairs may follow the version; they are ignored.
                debug!(client_version, "init");
                self.channel.write_all(&INIT_REPLY).await?;
                self.channel.flush().await?;
                Ok(())
            }
            Opcode::Open => {
                let id = p.u32()?;
                let path = p.string()?;
                let pflags = p.u32()?;
                let attr = FileAttr::parse(&mut p)?;
                p.end()?;
                debug!(id, %path, pflags, "open");
                // Lazy open: the backend is untouched until the first READ
                // or WRITE, so only the handle limit can fail here.
                let args = FileOpenArgs { path, pflags, attr };
                match self.handles.new_file(args) {
                    Ok(handle) => self.send_handle(id, &handle).await,
                    Err(e) => self.send_status(id, StatusCode::from_error(&e)).await,
                }
            }
            Opcode::Close => {
                let id = p.u32()?;
                let handle = p.string()?;
                p.end()?;
                debug!(id, %handle, "close");
                self.handles.close_handle(&handle).await;
                self.send_status(id, StatusCode::Ok).await
            }
            Opcode::Read => {
                let id = p.u32()?;
                let handle = p.string()?;
                let offset = p.u64()?;
                let length = p.u32()?;
                p.end()?;
                debug!(id, %handle, offset, length, "read");
                let Some(args) = self.handles.file_args(&handle).cloned() else {
                    return Err(self.fatal_invalid_handle(id).await);
                };
                let length = length.min(MAX_READ_LEN) as usize;
                let mut buf = vec![0u8; length];
                match self.read_file(&handle, &args, &mut buf, offset).await {
                    Ok(0) => self.send_status(id, StatusCode::Eof).await,
                    Ok(n) => self.send_data(id, &buf[..n]).await,
                    Err(e) => {
                        debug!(id, error = %e, "read failed");
                        self.send_status(id, StatusCode::from_error(&e)).await
                    }
                }
            }
            Opcode::Write => {
                let id = p.u32()?;
                let handle = p.string()?;
                let offset = p.u64()?;
                let length = p.u32()? as usize;
                let data = p.bytes(length)?.to_vec();
                p.end()?;
                debug!(id, %handle, offset, length, "write");
                let Some(args) = self.handles.file_args(&handle).cloned() else {
                    return Err(self.fatal_invalid_handle(id).await);
                };
                let res = self.write_file(&handle, &args, &data, offset).await;
                self.send_status_result(id, res).await
            }
            Opcode::LStat | Opcode::Stat => {
                let id = p.u32()?;
                let path = p.string()?;
                p.end()?;
                debug!(id, %path, follow = opcode == Opcode::Stat, "stat");
                let res = self.fs.stat(&path, opcode == Opcode::Stat).await;
                self.send_attrs_result(id, res).await
            }
            Opcode::FStat => {
                let id = p.u32()?;
                let handle = p.string()?;
                p.end()?;
                debug!(id, %handle, "fstat");
                let Some(args) = self.handles.file_args(&handle).cloned() else {
                    return Err(self.fatal_invalid_handle(id).await);
                };
                let res = self.fs.stat(&args.path, true).await;
                self.send_attrs_result(id, res).await
            }
            Opcode::SetStat => {
                let id = p.u32()?;
                let path = p.string()?;
                let attr = FileAttr::parse(&mut p)?;
                p.end()?;
                debug!(id, %path, "setstat");
                let res = self.fs.set_stat(&path, &attr).await;
                self.send_status_result(id, res).await
            }
            Opcode::FSetStat => {
                let id = p.u32()?;
                let handle = p.string()?;
                let attr = FileAttr::parse(&mut p)?;
                p.end()?;
                debug!(id, %handle, "fsetstat");
                let Some(args) = self.handles.file_args(&handle).cloned() else {
                    return Err(self.fatal_invalid_handle(id).await);
                };
                let res = self.fs.set_stat(&args.path, &attr).await;
                self.send_status_result(id, res).await
            }
            Opcode::OpenDir => {
                let id = p.u32()?;
                let path = p.string()?;
                p.end()?;
                debug!(id, %path, "opendir");
                // Lazy like OPEN: the directory is read on first READDIR.
                match self.handles.new_dir(path) {
                    Ok(handle) => self.send_handle(id, &handle).await,
                    Err(e) => self.send_status(id, StatusCode::from_error(&e)).await,
                }
            }
            Opcode::ReadDir => {
                let id = p.u32()?;
                let handle = p.string()?;
                p.end()?;
                debug!(id, %handle, "readdir");
                let Some(path) = self.handles.dir_path(&handle).map(str::to_string) else {
                    return Err(self.fatal_invalid_handle(id).await);
                };
                match self.read_dir(&handle, &path).await {
                    Ok(entries) if entries.is_empty() => {
                        self.send_status(id, StatusCode::Eof).await
                    }
                    Ok(entries) => self.send_names(id, &entries).await,
                    Err(e) => {
                        debug!(id, error = %e, "readdir failed");
                        self.send_status(id, StatusCode::from_error(&e)).await
                    }
                }
            }
            Opcode::Remove => {
                let id = p.u32()?;
                let path = p.string()?;
                p.end()?;
                debug!(id, %path, "remove");
                let res = self.fs.remove(&path).await;
                self.send_status_result(id, res).await
            }
            Opcode::MkDir => {
                let id = p.u32()?;
                let path = p.string()?;
                let attr = FileAttr::parse(&mut p)?;
                p.end()?;
                debug!(id, %path, "mkdir");
                let res = self.fs.mkdir(&path, &attr).await;
                self.send_status_result(id, res).await
            }
            Opcode::RmDir => {
                let id = p.u32()?;
                let path = p.string()?;
                p.end()?;
                debug!(id, %path, "rmdir");
                let res = self.fs.rmdir(&path).await;
                self.send_status_result(id, res).await
            }
            Opcode::RealPath => {
                let id = p.u32()?;
                let path = p.string()?;
                p.end()?;
                debug!(id, %path, "realpath");
                let res = self.fs.real_path(&path).await;
                self.send_name_result(id, res).await
            }
            Opcode::Rename => {
                let id = p.u32()?;
                let old = p.string()?;
                let new = p.string()?;
                let flags = p.u32()?;
                p.end()?;
                debug!(id, %old, %new, flags, "rename");
                let res = self.fs.rename(&old, &new, flags).await;
                self.send_status_result(id, res).await
            }
            Opcode::ReadLink => {
                let id = p.u32()?;
                let path = p.string()?;
                p.end()?;
                debug!(id, %path, "readlink");
                let res = self.fs.read_link(&path).await;
                self.send_name_result(id, res).await
            }
            Opcode::Symlink => {
                // Symlink creation is not offered; the link arguments are
                // irrelevant, only the id is needed for the refusal.
                let id = p.u32()?;
                debug!(id, "symlink refused");
                self.send_status(id, StatusCode::OpUnsupported).await
            }
            Opcode::Version
            | Opcode::Status
            | Opcode::Handle
            | Opcode::Data
            | Opcode::Name
            | Opcode::Attrs => self.reply_unsupported(op, body).await,
        }
    }

    /// Answers an opcode this server does not serve. The request id is
    /// echoed when the body is long enough to carry one; anything shorter
    /// is dropped on the floor.
    async fn reply_unsupported(&mut self, op: u8, body: &[u8]) -> Result<()> {
        let mut p = Parser::new(body);
        match p.u32() {
            Ok(id) => {
                debug!(opcode = op, id, "unsupported opcode");
                self.send_status(id, StatusCode::OpUnsupported).await
            }
            Err(_) => {
                warn!(opcode = op, len = body.len(), "discarding unintelligible packet");
                Ok(())
            }
        }
    }

    /// Answers a best-effort FAILURE status for `id`, then reports the
    /// invalid handle as fatal to the channel.
    async fn fatal_invalid_handle(&mut self, id: u32) -> Error {
        let _ = self.send_status(id, StatusCode::Failure).await;
        Error::InvalidHandle
    }

    /// Reads through the handle's cached reader, creating it on first use:
    /// a sequential transfer stream wrapped for random access when the
    /// backend offers one, the plain offset-addressed backend file
    /// otherwise. This is where the deferred OPEN finally hits the backend.
    async fn read_file(
        &mut self,
        handle: &str,
        args: &FileOpenArgs,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        if self.handles.reader(handle).is_none() {
            let reader = if self.fs.supports_transfer_streams() {
                let stream = self
                    .fs
                    .transfer_stream(&args.path, args.pflags, &args.attr, offset)
                    .await?;
                FileReader::Stream(RandomAccessReader::new(stream, offset))
            } else {
                FileReader::Direct(self.fs.open_file(&args.path, args.pflags, &args.attr).await?)
            };
            self.handles.set_reader(handle, reader);
        }
        match self.handles.reader(handle) {
            Some(reader) => reader.read_at(buf, offset).await,
            None => Err(Error::InvalidHandle),
        }
    }

    /// Mirror of [`Session::read_file`] for the write half.
    async fn write_file(
        &mut self,
        handle: &str,
        args: &FileOpenArgs,
        data: &[u8],
        offset: u64,
    ) -> Result<()> {
        if self.handles.writer(handle).is_none() {
            let writer = if self.fs.supports_transfer_streams() {
                let stream = self
                    .fs
                    .transfer_stream(&args.path, args.pflags, &args.attr, offset)
                    .await?;
                FileWriter::Stream(AutoSeekWriter::new(stream, offset))
            } else {
                FileWriter::Direct(self.fs.open_file(&args.path, args.pflags, &args.attr).await?)
            };
            self.handles.set_writer(handle, writer);
        }
        match self.handles.writer(handle) {
            Some(writer) => writer.write_at(data, offset).await,
            None => Err(Error::InvalidHandle),
        }
    }

    /// Returns the next batch of up to 1024 entries through the handle's
    /// cached directory reader, creating it on first use: the backend's
    /// bulk listing behind a pager when offered, its directory stream
    /// otherwise.
    async fn read_dir(&mut self, handle: &str, path: &str) -> Result<Vec<NamedAttr>> {
        if self.handles.dir_reader(handle).is_none() {
            let reader = if self.fs.supports_read_dir_bulk() {
                DirReader::Paged(DirPager::new(self.fs.read_dir_bulk(path).await?))
            } else {
                DirReader::Backend(self.fs.open_dir(path).await?)
            };
            self.handles.set_dir_reader(handle, reader);
        }
        match self.handles.dir_reader(handle) {
            Some(reader) => reader.read_entries(MAX_DIR_ENTRIES).await,
            None => Err(Error::InvalidHandle),
        }
    }

    async fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.channel.write_all(packet).await?;
        self.channel.flush().await?;
        Ok(())
    }

    /// STATUS response: the code plus empty message and language tag.
    async fn send_status(&mut self, id: u32, code: StatusCode) -> Result<()> {
        debug!(id, ?code, "status");
        let mut out = Printer::with_capacity(4 + 17);
        out.u32(17)
            .u8(Opcode::Status as u8)
            .u32(id)
            .u32(code as u32)
            .string("")
            .string("");
        self.write_packet(&out.finish()).await
    }

    async fn send_status_result(&mut self, id: u32, res: Result<()>) -> Result<()> {
        match res {
            Ok(()) => self.send_status(id, StatusCode::Ok).await,
            Err(e) => {
                debug!(id, error = %e, "operation failed");
                self.send_status(id, StatusCode::from_error(&e)).await
            }
        }
    }

    async fn send_handle(&mut self, id: u32, handle: &str) -> Result<()> {
        let mut out = Printer::with_capacity(4 + 9 + handle.len());
        out.u32(9 + handle.len() as u32)
            .u8(Opcode::Handle as u8)
            .u32(id)
            .string(handle);
        self.write_packet(&out.finish()).await
    }

    /// DATA response; the payload is written straight from the read buffer
    /// after the fixed-size header.
    async fn send_data(&mut self, id: u32, data: &[u8]) -> Result<()> {
        let mut out = Printer::with_capacity(13);
        out.u32(1 + 4 + 4 + data.len() as u32)
            .u8(Opcode::Data as u8)
            .u32(id)
            .u32(data.len() as u32);
        self.channel.write_all(&out.finish()).await?;
        self.channel.write_all(data).await?;
        self.channel.flush().await?;
        Ok(())
    }

    async fn send_attrs_result(&mut self, id: u32, res: Result<FileAttr>) -> Result<()> {
        let attr = match res {
            Ok(attr) => attr,
            Err(e) => {
                debug!(id, error = %e, "stat failed");
                return self.send_status(id, StatusCode::from_error(&e)).await;
            }
        };
        let mut out = Printer::new();
        let mut len = LenMark::default();
        out.len_u32(&mut len)
            .len_start(&mut len)
            .u8(Opcode::Attrs as u8)
            .u32(id);
        attr.write(&mut out);
        out.len_done(&mut len);
        self.write_packet(&out.finish()).await
    }

    /// NAME response carrying a directory batch.
    async fn send_names(&mut self, id: u32, entries: &[NamedAttr]) -> Result<()> {
        let mut out = Printer::new();
        let mut len = LenMark::default();
        out.len_u32(&mut len)
            .len_start(&mut len)
            .u8(Opcode::Name as u8)
            .u32(id)
            .u32(entries.len() as u32);
        for entry in entries {
            out.string(&entry.name);
            out.string(&entry.long_name());
            entry.attr.write(&mut out);
        }
        out.len_done(&mut len);
        self.write_packet(&out.finish()).await
    }

    /// NAME response for REALPATH and READLINK: one entry whose short
    /// name, long name, and placeholder attributes all carry the resolved
    /// string.
    async fn send_name_result(&mut self, id: u32, res: Result<String>) -> Result<()> {
        let path = match res {
            Ok(path) => path,
            Err(e) => {
                debug!(id, error = %e, "path resolution failed");
                return self.send_status(id, StatusCode::from_error(&e)).await;
            }
        };
        let mut out = Printer::new();
        let mut len = LenMark::default();
        out.len_u32(&mut len)
            .len_start(&mut len)
            .u8(Opcode::Name as u8)
            .u32(id)
            .u32(1)
            .string(&path)
            .string(&path)
            .u32(0);
        out.len_done(&mut len);
        self.write_packet(&out.finish()).await
    }
}
