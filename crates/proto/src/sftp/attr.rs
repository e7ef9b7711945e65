//! The SFTP attribute block and its codec.
//!
//! Attributes travel as a `u32` flag bitmask followed by the fields the
//! bitmask declares, in fixed order: size, uid/gid, permissions,
//! atime/mtime, extended pairs. A field is serialized iff its flag bit is
//! set, and parsing consumes a field only when its bit is set.

use crate::sftp::wire::{Parser, Printer};
use skiff_platform::{Error, Result};

/// File kind carried by the portable mode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    /// Regular file (`0o100000` on the wire).
    #[default]
    Regular,
    /// Directory (`0o40000` on the wire).
    Directory,
    /// Anything else; serialized with zero type bits.
    Other,
}

/// Portable file mode: POSIX permission bits plus a directory/regular
/// distinction. Other host file types round-trip as [`FileKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileMode {
    /// Low nine permission bits.
    pub perm: u32,
    /// Directory, regular, or other.
    pub kind: FileKind,
}

impl FileMode {
    /// Directory type bit of the wire encoding.
    pub const WIRE_DIR: u32 = 0o40000;
    /// Regular-file type bit of the wire encoding.
    pub const WIRE_REGULAR: u32 = 0o100000;

    /// Convenience constructor for a regular file with the given permissions.
    pub fn regular(perm: u32) -> Self {
        Self {
            perm: perm & 0o777,
            kind: FileKind::Regular,
        }
    }

    /// Convenience constructor for a directory with the given permissions.
    pub fn directory(perm: u32) -> Self {
        Self {
            perm: perm & 0o777,
            kind: FileKind::Directory,
        }
    }

    /// Encodes into the portable wire form.
    pub fn to_wire(self) -> u32 {
        let type_bits = match self.kind {
            FileKind::Directory => Self::WIRE_DIR,
            FileKind::Regular => Self::WIRE_REGULAR,
            FileKind::Other => 0,
        };
        (self.perm & 0o777) | type_bits
    }

    /// Decodes from the portable wire form.
    pub fn from_wire(raw: u32) -> Self {
        let kind = if raw & Self::WIRE_DIR != 0 {
            FileKind::Directory
        } else if raw & Self::WIRE_REGULAR != 0 {
            FileKind::Regular
        } else {
            FileKind::Other
        };
        Self {
            perm: raw & 0o777,
            kind,
        }
    }

    /// True for directories.
    pub fn is_dir(self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// File metadata, gated field by field by `flags`.
///
/// Undeclared fields stay zero-valued. `extended` holds key/value pairs
/// flattened into a sequence of length `2 * count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttr {
    /// Bitmask declaring which fields below are present.
    pub flags: u32,
    /// File size in bytes.
    pub size: u64,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Portable mode word.
    pub mode: FileMode,
    /// Access time, seconds since epoch.
    pub atime: u32,
    /// Modification time, seconds since epoch.
    pub mtime: u32,
    /// Flattened extended key/value pairs, passed through opaquely.
    pub extended: Vec<String>,
}

impl FileAttr {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;

    /// Bound on extended pairs accepted from the wire.
    const MAX_EXTENDED_PAIRS: u32 = 255;

    /// Attributes declaring only size and mode, the shape backends most
    /// commonly produce for stat results.
    pub fn with_size_mode(size: u64, mode: FileMode) -> Self {
        Self {
            flags: Self::SIZE | Self::PERMISSIONS,
            size,
            mode,
            ..Self::default()
        }
    }

    /// Parses an attribute block from a request body.
    pub fn parse(p: &mut Parser<'_>) -> Result<Self> {
        let mut attr = Self {
            flags: p.u32()?,
            ..Self::default()
        };
        if attr.flags & Self::SIZE != 0 {
            attr.size = p.u64()?;
        }
        if attr.flags & Self::UIDGID != 0 {
            attr.uid = p.u32()?;
            attr.gid = p.u32()?;
        }
        if attr.flags & Self::PERMISSIONS != 0 {
            attr.mode = FileMode::from_wire(p.u32()?);
        }
        if attr.flags & Self::ACMODTIME != 0 {
            attr.atime = p.u32()?;
            attr.mtime = p.u32()?;
        }
        if attr.flags & Self::EXTENDED != 0 {
            let count = p.u32()?;
            if count > Self::MAX_EXTENDED_PAIRS {
                return Err(Error::Protocol(format!(
                    "extended attribute count {count} exceeds limit"
                )));
            }
            let mut pairs = Vec::with_capacity(2 * count as usize);
            for _ in 0..count {
                pairs.push(p.string()?);
                pairs.push(p.string()?);
            }
            attr.extended = pairs;
        }
        Ok(attr)
    }

    /// Serializes the attribute block, mirroring [`FileAttr::parse`].
    pub fn write(&self, out: &mut Printer) {
        out.u32(self.flags);
        if self.flags & Self::SIZE != 0 {
            out.u64(self.size);
        }
        if self.flags & Self::UIDGID != 0 {
            out.u32(self.uid).u32(self.gid);
        }
        if self.flags & Self::PERMISSIONS != 0 {
            out.u32(self.mode.to_wire());
        }
        if self.flags & Self::ACMODTIME != 0 {
            out.u32(self.atime).u32(self.mtime);
        }
        if self.flags & Self::EXTENDED != 0 {
            out.u32((self.extended.len() / 2) as u32);
            for s in &self.extended {
                out.string(s);
            }
        }
    }
}

/// An attribute block together with the entry's name. Directory listings
/// are sequences of these.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedAttr {
    /// Entry name within its parent directory.
    pub name: String,
    /// Entry metadata.
    pub attr: FileAttr,
}

impl NamedAttr {
    /// Creates a named attribute block.
    pub fn new(name: impl Into<String>, attr: FileAttr) -> Self {
        Self {
            name: name.into(),
            attr,
        }
    }

    /// Formats the `ls -l`-style long name used in NAME responses.
    ///
    /// Clients only display this string; the fields mirror what the short
    /// name and attribute block already carry.
    pub fn long_name(&self) -> String {
        let a = &self.attr;
        let mode = a.mode;
        let type_ch = if mode.is_dir() { 'd' } else { '-' };
        let mut perms = String::with_capacity(9);
        for shift in [6u32, 3, 0] {
            let bits = (mode.perm >> shift) & 0o7;
            perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        let mtime = chrono::DateTime::from_timestamp(i64::from(a.mtime), 0)
            .unwrap_or_default()
            .format("%b %e %H:%M");
        format!(
            "{}{} {:3} {:5} {:5} {:8} {} {}",
            type_ch, perms, 1, a.uid, a.gid, a.size, mtime, self.name
        )
    }
}
