//! All-or-nothing placement of a unit's output files.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CookError;
use crate::unit::OutputFile;

/// Suffix of in-flight files. Never packaged.
pub const STAGING_SUFFIX: &str = ".cooktmp";

pub fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(STAGING_SUFFIX))
        .unwrap_or(false)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Stages every output next to its final path, then renames them all into
/// place. On any failure the staged files and the outputs already placed
/// for this unit are removed.
pub fn commit(
    dest_dir: &Path,
    outputs: &[OutputFile],
    unit: &str,
) -> Result<Vec<PathBuf>, CookError> {
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(outputs.len());
    for output in outputs {
        let target = dest_dir.join(&output.rel_path);
        let temp = staging_path(&target);
        if let Err(err) = write_file(&temp, &output.bytes) {
            let _ = fs::remove_file(&temp);
            discard(&staged, &[]);
            return Err(CookError::io(unit, err));
        }
        staged.push((temp, target));
    }

    let mut placed = Vec::with_capacity(staged.len());
    for (index, (temp, target)) in staged.iter().enumerate() {
        if let Err(err) = fs::rename(temp, target) {
            discard(&staged[index..], &placed);
            return Err(CookError::io(unit, err));
        }
        placed.push(target.clone());
    }
    debug!(unit, files = placed.len(), "outputs committed");
    Ok(placed)
}

/// Single-file variant of [`commit`] for an absolute target path.
pub fn write_atomic(target: &Path, bytes: &[u8], unit: &str) -> Result<(), CookError> {
    let temp = staging_path(target);
    let result = write_file(&temp, bytes).and_then(|()| fs::rename(&temp, target));
    if let Err(err) = result {
        let _ = fs::remove_file(&temp);
        return Err(CookError::io(unit, err));
    }
    Ok(())
}

/// Copies `src` to `target` through a staging file.
pub fn copy_atomic(src: &Path, target: &Path, unit: &str) -> Result<(), CookError> {
    let temp = staging_path(target);
    let result = create_parent(&temp)
        .and_then(|()| fs::copy(src, &temp).map(|_| ()))
        .and_then(|()| fs::rename(&temp, target));
    if let Err(err) = result {
        let _ = fs::remove_file(&temp);
        return Err(CookError::io(unit, err));
    }
    Ok(())
}

fn discard(staged: &[(PathBuf, PathBuf)], placed: &[PathBuf]) {
    for (temp, _) in staged {
        let _ = fs::remove_file(temp);
    }
    for path in placed {
        let _ = fs::remove_file(path);
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    create_parent(path)?;
    fs::write(path, bytes)
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn commit_places_every_output() {
        let dir = temp_dir("commit");
        let outputs = vec![
            OutputFile::new("island.terra.sim", vec![1, 2]),
            OutputFile::new("nested/island.terra.client", vec![3]),
        ];
        let placed = commit(&dir, &outputs, "terrain 'island'").expect("commit");
        assert_eq!(placed.len(), 2);
        assert_eq!(fs::read(dir.join("nested/island.terra.client")).expect("read"), vec![3]);
        assert!(!staging_path(&dir.join("island.terra.sim")).exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_commit_leaves_nothing_behind() {
        let dir = temp_dir("commit_fail");
        fs::write(dir.join("blocker"), b"file").expect("write");
        let outputs = vec![
            OutputFile::new("first.bsp", vec![1]),
            OutputFile::new("blocker/second.mesh", vec![2]),
        ];
        let err = commit(&dir, &outputs, "map 'hall'").expect_err("should fail");
        assert_eq!(err.kind(), crate::ExitStatus::IoFailure);
        assert!(!dir.join("first.bsp").exists());
        assert!(!staging_path(&dir.join("first.bsp")).exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn staging_files_are_recognised() {
        assert!(is_staging_file(Path::new("out/grass.tex.cooktmp")));
        assert!(!is_staging_file(Path::new("out/grass.tex")));
    }
}
