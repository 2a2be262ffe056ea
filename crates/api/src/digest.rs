//! Whole-file digests: `md5` and `xxh3` (lower 64 bits), read in
//! fixed-size chunks so a multi-gigabyte file never needs to be buffered
//! whole.

use md5::{Digest, Md5};
use xxhash_rust::xxh3::Xxh3;

use agfs_core::{AgfsError, AgfsResult};
use agfs_plugin::filesystem::Filesystem;

const CHUNK_SIZE: i64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Xxh3,
}

impl Algorithm {
    pub fn parse(s: &str) -> AgfsResult<Self> {
        match s {
            "md5" => Ok(Algorithm::Md5),
            "xxh3" => Ok(Algorithm::Xxh3),
            other => Err(AgfsError::invalid_argument(format!("unknown digest algorithm: {other}"))),
        }
    }
}

pub async fn digest(fs: &dyn Filesystem, path: &str, algorithm: Algorithm) -> AgfsResult<String> {
    let mut offset = 0i64;
    let mut md5 = Md5::new();
    let mut xxh3 = Xxh3::new();

    loop {
        let result = fs.read(path, offset, CHUNK_SIZE).await?;
        match algorithm {
            Algorithm::Md5 => md5.update(&result.data),
            Algorithm::Xxh3 => xxh3.update(&result.data),
        }
        offset += result.data.len() as i64;
        if result.eof {
            break;
        }
    }

    Ok(match algorithm {
        Algorithm::Md5 => hex::encode(md5.finalize()),
        Algorithm::Xxh3 => format!("{:016x}", xxh3.digest()),
    })
}

/// Small local hex encoder so the crate doesn't need to pull in the `hex`
/// crate just for this.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agfs_memfs::MemFsBackend;

    #[tokio::test]
    async fn md5_of_known_string() {
        let fs = MemFsBackend::new();
        fs.create("/f").await.unwrap();
        fs.write("/f", b"hello", 0, agfs_core::WriteFlags::new(0)).await.unwrap();
        let d = digest(&fs, "/f", Algorithm::Md5).await.unwrap();
        assert_eq!(d, "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn xxh3_is_deterministic() {
        let fs = MemFsBackend::new();
        fs.create("/f").await.unwrap();
        fs.write("/f", b"hello", 0, agfs_core::WriteFlags::new(0)).await.unwrap();
        let a = digest(&fs, "/f", Algorithm::Xxh3).await.unwrap();
        let b = digest(&fs, "/f", Algorithm::Xxh3).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
