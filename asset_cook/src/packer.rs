//! Packs the destination tree into one archive.
use std::fs;
use std::path::{Path, PathBuf};

use cook_formats::archive::{ArchiveBuilder, ArchiveError};
use tracing::debug;

use crate::error::CookError;
use crate::staging::{self, is_staging_file};
use crate::unit::{relative_path, walk_files};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: usize,
}

/// Archives every file under `dest_root` except `archive_path` and staging
/// files, in sorted path order.
pub fn pack(dest_root: &Path, archive_path: &Path) -> Result<ArchiveSummary, CookError> {
    let mut files = Vec::new();
    if dest_root.is_dir() {
        for path in walk_files(dest_root, true)? {
            if path != archive_path && !is_staging_file(&path) {
                files.push(path);
            }
        }
    }
    pack_files(dest_root, &files, archive_path)
}

/// Archives exactly `files`, each named by its path relative to `dest_root`.
pub fn pack_files(
    dest_root: &Path,
    files: &[PathBuf],
    archive_path: &Path,
) -> Result<ArchiveSummary, CookError> {
    let unit = format!("archive '{}'", archive_path.display());
    let mut builder = ArchiveBuilder::new();
    for path in files {
        let name = relative_path(dest_root, path);
        let data = fs::read(path).map_err(|err| CookError::io(&unit, err))?;
        builder.add(&name, data).map_err(|err| archive_error(&unit, err))?;
        debug!(entry = %name, "packed");
    }
    let entries = builder.len();
    let bytes = builder.encode().map_err(|err| archive_error(&unit, err))?;
    staging::write_atomic(archive_path, &bytes, &unit)?;
    Ok(ArchiveSummary {
        entries,
        bytes: bytes.len(),
    })
}

pub(crate) fn archive_error(unit: &str, err: ArchiveError) -> CookError {
    match err {
        ArchiveError::Io(source) => CookError::io(unit, source),
        other => CookError::validation(unit, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;
    use cook_formats::archive::read_archive;

    #[test]
    fn packs_sorted_tree_without_itself() {
        let root = temp_dir("packer");
        fs::create_dir_all(root.join("textures")).expect("mkdir");
        fs::write(root.join("textures").join("grass.tex"), b"tex").expect("write");
        fs::write(root.join("resources.tbl"), b"tbl").expect("write");
        fs::write(root.join("half.bsp.cooktmp"), b"partial").expect("write");
        let archive = root.join("assets.pak");
        fs::write(&archive, b"stale").expect("write");

        let summary = pack(&root, &archive).expect("pack");
        assert_eq!(summary.entries, 2);
        let file = read_archive(&archive).expect("read");
        assert_eq!(file.entry_names(), vec!["resources.tbl", "textures/grass.tex"]);
        assert_eq!(
            file.entry_data("textures/grass.tex").expect("data"),
            Some(&b"tex"[..])
        );
        assert_eq!(summary.bytes as u64, fs::metadata(&archive).expect("meta").len());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn packs_only_the_listed_files() {
        let root = temp_dir("packer_listed");
        fs::create_dir_all(root.join("scripts")).expect("mkdir");
        fs::write(root.join("scripts").join("main.lua"), b"return 1").expect("write");
        fs::write(root.join("scripts").join("old.lua"), b"return 0").expect("write");
        let archive = root.join("assets.pak");

        let files = vec![root.join("scripts").join("main.lua")];
        let summary = pack_files(&root, &files, &archive).expect("pack");
        assert_eq!(summary.entries, 1);
        let file = read_archive(&archive).expect("read");
        assert_eq!(file.entry_names(), vec!["scripts/main.lua"]);

        let missing = vec![root.join("scripts").join("gone.lua")];
        let err = pack_files(&root, &missing, &archive).expect_err("missing file");
        assert_eq!(err.kind(), crate::ExitStatus::IoFailure);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn unwritable_target_is_an_io_failure() {
        let root = temp_dir("packer_fail");
        fs::write(root.join("a.bin"), b"a").expect("write");
        let archive = root.join("missing").join("assets.pak");
        fs::create_dir_all(root.join("missing")).expect("mkdir");
        fs::create_dir_all(&archive).expect("directory in the way");
        let err = pack(&root, &archive).expect_err("target is a directory");
        assert_eq!(err.kind(), crate::ExitStatus::IoFailure);
        let _ = fs::remove_dir_all(&root);
    }
}
