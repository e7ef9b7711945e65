//! Protocol implementation for the Skiff SFTP server.
//!
//! This crate provides the core of an SFTP version 3 subsystem server: a
//! per-channel request loop that parses SFTP packets from an established
//! SSH session channel, dispatches them against a pluggable virtual file
//! system, and writes framed responses back.
//!
//! What it deliberately does not do: secure transport, key exchange,
//! authentication, TCP listening, or channel multiplexing. The host
//! program handles those and passes an accepted `subsystem=sftp` channel
//! (anything `AsyncRead + AsyncWrite`) to [`sftp::serve_channel`].
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_proto::sftp::{self, SftpFs};
//! use std::sync::Arc;
//!
//! # async fn on_subsystem_request(
//! #     req_type: &str,
//! #     payload: &[u8],
//! #     channel: tokio::io::DuplexStream,
//! #     backend: Arc<dyn SftpFs>,
//! # ) -> skiff_platform::Result<()> {
//! if sftp::is_sftp_subsystem(req_type, payload) {
//!     sftp::serve_channel(channel, backend).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod sftp;
