//! Line-oriented regex search over a single file. Reads the whole file
//! (backends are expected to be modest in size for this operation;
//! streaming grep is a non-goal) and matches line by line so results
//! carry line numbers.

use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

use agfs_core::AgfsResult;
use agfs_plugin::filesystem::Filesystem;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GrepMatch {
    pub line_number: u64,
    pub line: String,
}

pub async fn grep(fs: &dyn Filesystem, path: &str, pattern: &str) -> AgfsResult<Vec<GrepMatch>> {
    let re = Regex::new(pattern).map_err(|e| agfs_core::AgfsError::invalid_argument(format!("bad pattern: {e}")))?;
    let result = fs.read(path, 0, -1).await?;
    let text = String::from_utf8_lossy(&result.data);

    Ok(text
        .lines()
        .enumerate()
        .filter(|(_, line)| re.is_match(line))
        .map(|(i, line)| GrepMatch { line_number: (i + 1) as u64, line: line.to_string() })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agfs_memfs::MemFsBackend;

    #[tokio::test]
    async fn finds_matching_lines_with_numbers() {
        let fs = MemFsBackend::new();
        fs.create("/log").await.unwrap();
        fs.write("/log", b"alpha\nbeta error\ngamma\ndelta error\n", 0, agfs_core::WriteFlags::new(0))
            .await
            .unwrap();
        let matches = grep(&fs, "/log", "error").await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line_number, 2);
        assert_eq!(matches[1].line_number, 4);
    }

    #[tokio::test]
    async fn bad_pattern_is_invalid_argument() {
        let fs = MemFsBackend::new();
        fs.create("/f").await.unwrap();
        let err = grep(&fs, "/f", "(unclosed").await.unwrap_err();
        assert!(matches!(err, agfs_core::AgfsError::InvalidArgument { .. }));
    }
}
