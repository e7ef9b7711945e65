//! SFTP v3 subsystem server.
//!
//! This module serves the SSH File Transfer Protocol, version 3, on top of
//! an already-established SSH session channel. Transport security,
//! authentication, and channel multiplexing happen below; the host hands
//! an accepted `subsystem=sftp` channel to [`serve_channel`] together with
//! a file-system backend and gets it back when the session ends.
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|  (always version 3)
//!   |                               |
//!   |-- SSH_FXP_OPEN -------------->|
//!   |<- SSH_FXP_HANDLE -------------|  (backend not touched yet)
//!   |                               |
//!   |-- SSH_FXP_READ -------------->|  (backend file opened lazily)
//!   |<- SSH_FXP_DATA ---------------|
//!   |                               |
//!   |-- SSH_FXP_CLOSE ------------->|
//!   |<- SSH_FXP_STATUS -------------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_proto::sftp::{serve_channel, SftpFs};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     channel: tokio::io::DuplexStream,
//! #     backend: Arc<dyn SftpFs>,
//! # ) -> skiff_platform::Result<()> {
//! // channel: an accepted subsystem=sftp session channel
//! // backend: anything implementing SftpFs
//! serve_channel(channel, backend).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)

pub mod adapter;
pub mod attr;
pub mod fs;
pub mod handle;
pub mod message;
pub mod server;
pub mod wire;

pub use attr::{FileAttr, FileKind, FileMode, NamedAttr};
pub use fs::{SftpDir, SftpFile, SftpFs, SftpStream};
pub use handle::{FileOpenArgs, HandleTable, MAX_FILES};
pub use message::{Opcode, OpenFlags, StatusCode, MAX_READ_LEN, SFTP_VERSION};
pub use server::{is_sftp_subsystem, serve_channel};
