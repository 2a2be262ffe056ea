//! Open/write flag encoding and seek whence.
//!
//! The low two bits of `OpenFlags` encode the access mode; the remaining
//! bits are independent behavior flags. This mirrors POSIX `open(2)` flags
//! closely enough to be familiar, but the concrete bit values are AGFS's
//! own.

use serde::{Deserialize, Serialize};

use crate::error::AgfsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const RDONLY: u32 = 0;
    pub const WRONLY: u32 = 1;
    pub const RDWR: u32 = 2;
    const ACCESS_MASK: u32 = 0b11;

    pub const CREATE: u32 = 4;
    pub const EXCL: u32 = 8;
    pub const APPEND: u32 = 16;
    pub const TRUNC: u32 = 32;
    pub const SYNC: u32 = 64;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn access_mode(self) -> u32 {
        self.0 & Self::ACCESS_MASK
    }

    pub fn readable(self) -> bool {
        matches!(self.access_mode(), Self::RDONLY | Self::RDWR)
    }

    pub fn writable(self) -> bool {
        matches!(self.access_mode(), Self::WRONLY | Self::RDWR)
    }

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn create(self) -> bool {
        self.has(Self::CREATE)
    }

    pub fn exclusive(self) -> bool {
        self.has(Self::EXCL)
    }

    pub fn append(self) -> bool {
        self.has(Self::APPEND)
    }

    pub fn truncate(self) -> bool {
        self.has(Self::TRUNC)
    }

    pub fn sync(self) -> bool {
        self.has(Self::SYNC)
    }
}

/// Write-path flags: a subset of [`OpenFlags`]' behavior bits,
/// `None` (0) permitted and meaning "create-and-truncate when combined
/// with a negative offset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WriteFlags(pub u32);

impl WriteFlags {
    pub const NONE: u32 = 0;
    pub const CREATE: u32 = OpenFlags::CREATE;
    pub const EXCL: u32 = OpenFlags::EXCL;
    pub const APPEND: u32 = OpenFlags::APPEND;
    pub const TRUNC: u32 = OpenFlags::TRUNC;
    pub const SYNC: u32 = OpenFlags::SYNC;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn create(self) -> bool {
        self.has(Self::CREATE)
    }

    pub fn exclusive(self) -> bool {
        self.has(Self::EXCL)
    }

    pub fn append(self) -> bool {
        self.has(Self::APPEND)
    }

    pub fn truncate(self) -> bool {
        self.has(Self::TRUNC)
    }
}

/// `seek` whence: `start=0, current=1, end=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Whence {
    Start,
    Current,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = AgfsError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            other => Err(AgfsError::invalid_argument(format!(
                "invalid whence: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_decoding() {
        let ro = OpenFlags::new(OpenFlags::RDONLY);
        assert!(ro.readable());
        assert!(!ro.writable());

        let rw = OpenFlags::new(OpenFlags::RDWR | OpenFlags::CREATE);
        assert!(rw.readable());
        assert!(rw.writable());
        assert!(rw.create());
        assert!(!rw.truncate());
    }

    #[test]
    fn whence_roundtrip() {
        assert_eq!(Whence::try_from(0).unwrap(), Whence::Start);
        assert_eq!(Whence::try_from(2).unwrap(), Whence::End);
        assert!(Whence::try_from(3).is_err());
    }
}
