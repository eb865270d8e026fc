use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CookError;
use crate::staging::{self, is_staging_file};
use crate::unit::{relative_path, walk_files};

/// Copies files whose extension is in `extensions` (case-insensitive, all
/// files when empty) from `src_dir` to `dest_dir`, keeping relative paths.
/// Returns the copied paths relative to `src_dir`.
pub fn copy(
    src_dir: &Path,
    dest_dir: &Path,
    extensions: &[String],
    recurse: bool,
) -> Result<Vec<PathBuf>, CookError> {
    if !src_dir.is_dir() {
        debug!(dir = %src_dir.display(), "copy source missing, nothing to copy");
        return Ok(Vec::new());
    }
    let mut copied = Vec::new();
    for path in walk_files(src_dir, recurse)? {
        if is_staging_file(&path) || !extension_matches(&path, extensions) {
            continue;
        }
        let rel = relative_path(src_dir, &path);
        let target = dest_dir.join(&rel);
        staging::copy_atomic(&path, &target, &format!("file '{}'", path.display()))?;
        debug!(file = %rel, "copied");
        copied.push(PathBuf::from(rel));
    }
    Ok(copied)
}

fn extension_matches(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;
    use std::fs;

    fn fixture() -> (PathBuf, PathBuf) {
        let root = temp_dir("copier");
        let src = root.join("src");
        fs::create_dir_all(src.join("door")).expect("mkdir");
        fs::write(src.join("click.WAV"), b"riff").expect("write");
        fs::write(src.join("door").join("open.ogg"), b"ogg").expect("write");
        fs::write(src.join("readme.txt"), b"text").expect("write");
        (root, src)
    }

    #[test]
    fn filters_by_extension_and_keeps_structure() {
        let (root, src) = fixture();
        let dest = root.join("dest");
        let exts = vec!["wav".to_string(), "ogg".to_string()];
        let copied = copy(&src, &dest, &exts, true).expect("copy");
        assert_eq!(
            copied,
            vec![PathBuf::from("click.WAV"), PathBuf::from("door/open.ogg")]
        );
        assert_eq!(fs::read(dest.join("door").join("open.ogg")).expect("read"), b"ogg");
        assert!(!dest.join("readme.txt").exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn flat_copy_skips_subdirectories() {
        let (root, src) = fixture();
        let dest = root.join("dest");
        let copied = copy(&src, &dest, &[], false).expect("copy");
        assert_eq!(
            copied,
            vec![PathBuf::from("click.WAV"), PathBuf::from("readme.txt")]
        );
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_source_copies_nothing() {
        let root = temp_dir("copier_missing");
        let copied = copy(&root.join("absent"), &root.join("dest"), &[], true).expect("copy");
        assert!(copied.is_empty());
        let _ = fs::remove_dir_all(&root);
    }
}
