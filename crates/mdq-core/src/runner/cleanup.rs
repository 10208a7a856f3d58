//! File cleanup after cancellation or an explicit delete.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Suffixes the downloader uses for in-progress data next to a destination.
const PARTIAL_SUFFIXES: [&str; 2] = [".part", ".ytdl"];
/// Fragmented (HLS/DASH) downloads keep one `<dest>.part-FragN` file per fragment.
const FRAGMENT_INFIX: &str = ".part-Frag";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Remove one file, treating "already gone" as success. Returns whether a file was removed.
pub async fn remove_output(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Fragment files (`<dest>.part-Frag*`) sitting next to `dest`.
async fn fragment_files(dest: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(name)) = (dest.parent(), dest.file_name()) else {
        return Vec::new();
    };
    let mut prefix = name.to_owned();
    prefix.push(FRAGMENT_INFIX);
    let prefix = prefix.to_string_lossy().into_owned();

    let mut found = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), "cannot list download dir: {}", e);
            return found;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            found.push(entry.path());
        }
    }
    found
}

/// Remove every announced destination together with its `.part`/`.ytdl`
/// and `.part-Frag*` siblings. Failures are logged, never returned. Returns
/// the number of files removed.
pub async fn remove_partial_files(destinations: &[PathBuf]) -> usize {
    let mut removed = 0;
    for dest in destinations {
        let mut candidates: Vec<PathBuf> = std::iter::once(dest.clone())
            .chain(PARTIAL_SUFFIXES.iter().map(|s| with_suffix(dest, s)))
            .collect();
        candidates.extend(fragment_files(dest).await);
        for path in candidates {
            match remove_output(&path).await {
                Ok(true) => {
                    tracing::debug!(path = %path.display(), "removed partial download file");
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(path = %path.display(), "could not remove file: {}", e),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_destination_and_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        std::fs::write(with_suffix(&dest, ".part"), b"partial").unwrap();
        std::fs::write(with_suffix(&dest, ".ytdl"), b"state").unwrap();
        let keep = dir.path().join("other.mp4");
        std::fs::write(&keep, b"keep").unwrap();

        let removed = remove_partial_files(&[dest.clone()]).await;
        assert_eq!(removed, 2);
        assert!(!with_suffix(&dest, ".part").exists());
        assert!(!with_suffix(&dest, ".ytdl").exists());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn removes_fragment_files_of_that_destination_only() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stream.mp4");
        for n in 1..=3 {
            std::fs::write(with_suffix(&dest, &format!(".part-Frag{n}")), b"frag").unwrap();
        }
        std::fs::write(with_suffix(&dest, ".part-Frag4.part"), b"frag").unwrap();
        let other = dir.path().join("stream2.mp4.part-Frag1");
        std::fs::write(&other, b"other").unwrap();

        let removed = remove_partial_files(&[dest.clone()]).await;
        assert_eq!(removed, 4);
        assert!(!with_suffix(&dest, ".part-Frag2").exists());
        assert!(other.exists());
    }

    #[tokio::test]
    async fn remove_output_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.mkv");
        assert!(!remove_output(&path).await.unwrap());
        std::fs::write(&path, b"x").unwrap();
        assert!(remove_output(&path).await.unwrap());
    }

    #[test]
    fn suffix_is_appended_not_replaced() {
        assert_eq!(
            with_suffix(Path::new("/a/b.f137.mp4"), ".part"),
            PathBuf::from("/a/b.f137.mp4.part")
        );
    }
}
