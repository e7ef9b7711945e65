//! # Skiff Platform
//!
//! Shared types for the Skiff SFTP server: the unified error type
//! ([`Error`]) and result alias ([`Result`]) used across the workspace.
//!
//! # Examples
//!
//! ```
//! use skiff_platform::{Error, Result};
//!
//! fn parse_version(body: &[u8]) -> Result<u32> {
//!     let bytes: [u8; 4] = body
//!         .try_into()
//!         .map_err(|_| Error::Protocol("version field truncated".to_string()))?;
//!     Ok(u32::from_be_bytes(bytes))
//! }
//!
//! # fn main() -> Result<()> {
//! assert_eq!(parse_version(&[0, 0, 0, 3])?, 3);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{Error, Result};
