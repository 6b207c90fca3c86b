//! API version packing and rendering.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use thiserror::Error;

use crate::error::{Error, Result};

/// API version implemented by this crate.
pub const API_VERSION: Version = Version { major: 1, minor: 0 };

/// A `major.minor` API version, packed as `major << 16 | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Incompatible API changes.
    pub major: u16,
    /// Compatible additions.
    pub minor: u16,
}

impl Version {
    /// Packs into the 32-bit wire form.
    #[must_use]
    pub const fn pack(self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }

    /// Unpacks the 32-bit wire form.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn unpack(code: u32) -> Self {
        Self {
            major: (code >> 16) as u16,
            minor: (code & 0xffff) as u16,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Failure to parse a `major.minor` string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version string: {0:?}")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_owned());
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

/// Renders the packed version `code` into `buf` as `"<major>.<minor>"`
/// followed by a NUL byte, for C-style consumers.
///
/// Returns the length of the text, NUL excluded.
///
/// # Errors
///
/// `BufferTooSmall` if `buf` cannot hold the text and its terminator,
/// `EncodingFailure` if formatting fails.
pub fn render(code: u32, buf: &mut [u8]) -> Result<usize> {
    let mut text = String::new();
    write!(text, "{}", Version::unpack(code)).map_err(|_| Error::EncodingFailure)?;
    let len = text.len();
    if len >= buf.len() {
        return Err(Error::BufferTooSmall {
            needed: len + 1,
            available: buf.len(),
        });
    }
    buf[..len].copy_from_slice(text.as_bytes());
    buf[len] = 0;
    Ok(len)
}
