use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::codec::{CodecError, Reader, Writer};

pub const ARCHIVE_MAGIC: &[u8; 4] = b"PPAK";

const MAX_ARCHIVE_ENTRIES: usize = 100_000;
// u16 name length + u32 offset + u32 size.
const MIN_INDEX_ENTRY_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid archive: {0}")]
    Codec(#[from] CodecError),
    #[error("archive has too many entries: {entries}")]
    TooManyEntries { entries: usize },
    #[error("archive entry out of bounds: {name}")]
    EntryOutOfBounds { name: String },
    #[error("archive entry path is unsafe: {0}")]
    UnsafePath(String),
    #[error("duplicate archive entry: {0}")]
    DuplicateEntry(String),
    #[error("archive exceeds the 32-bit offset range")]
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// Parsed archive with random access through its index.
#[derive(Debug)]
pub struct ArchiveFile {
    data: Vec<u8>,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveFile {
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&ArchiveEntry> {
        let needle = sanitize_name(name);
        self.entries.iter().find(|entry| entry.name == needle)
    }

    pub fn entry_data(&self, name: &str) -> Result<Option<&[u8]>, ArchiveError> {
        let entry = match self.entry_by_name(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        Ok(Some(self.payload(entry)?))
    }

    pub fn extract_all(&self, out_dir: &Path) -> Result<(), ArchiveError> {
        fs::create_dir_all(out_dir)?;
        for entry in &self.entries {
            let out_path = safe_join(out_dir, &entry.name)?;
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&out_path, self.payload(entry)?)?;
        }
        Ok(())
    }

    fn payload(&self, entry: &ArchiveEntry) -> Result<&[u8], ArchiveError> {
        let offset = entry.offset as usize;
        let end = offset
            .checked_add(entry.size as usize)
            .ok_or_else(|| ArchiveError::EntryOutOfBounds {
                name: entry.name.clone(),
            })?;
        self.data
            .get(offset..end)
            .ok_or_else(|| ArchiveError::EntryOutOfBounds {
                name: entry.name.clone(),
            })
    }
}

pub fn read_archive(path: &Path) -> Result<ArchiveFile, ArchiveError> {
    let data = fs::read(path)?;
    parse_archive(data)
}

pub fn parse_archive(data: Vec<u8>) -> Result<ArchiveFile, ArchiveError> {
    let mut entries = Vec::new();
    {
        let mut reader = Reader::with_header(&data, ARCHIVE_MAGIC)?;
        let entry_count = reader.count("archive entry", MIN_INDEX_ENTRY_LEN)?;
        if entry_count > MAX_ARCHIVE_ENTRIES {
            return Err(ArchiveError::TooManyEntries {
                entries: entry_count,
            });
        }
        entries.reserve(entry_count);
        for _ in 0..entry_count {
            let name = sanitize_name(&reader.string()?);
            let offset = reader.u32()?;
            let size = reader.u32()?;
            let end = (offset as usize)
                .checked_add(size as usize)
                .ok_or_else(|| ArchiveError::EntryOutOfBounds { name: name.clone() })?;
            if end > data.len() {
                return Err(ArchiveError::EntryOutOfBounds { name });
            }
            entries.push(ArchiveEntry { name, offset, size });
        }
    }
    Ok(ArchiveFile { data, entries })
}

/// Collects entries in memory and lays them out sorted by name, so the
/// encoded archive depends only on entry names and contents.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, name: &str, data: Vec<u8>) -> Result<(), ArchiveError> {
        let name = sanitize_name(name);
        if !is_safe_relative(&name) {
            return Err(ArchiveError::UnsafePath(name));
        }
        if self.entries.contains_key(&name) {
            return Err(ArchiveError::DuplicateEntry(name));
        }
        self.entries.insert(name, data);
        Ok(())
    }

    pub fn encode(self) -> Result<Vec<u8>, ArchiveError> {
        if self.entries.len() > MAX_ARCHIVE_ENTRIES {
            return Err(ArchiveError::TooManyEntries {
                entries: self.entries.len(),
            });
        }
        let index_len: usize = self
            .entries
            .keys()
            .map(|name| name.len() + MIN_INDEX_ENTRY_LEN)
            .sum();
        let header_len = 12 + index_len;

        let mut writer = Writer::with_header(ARCHIVE_MAGIC);
        writer.count("archive entry", self.entries.len())?;
        let mut offset = header_len;
        for (name, data) in &self.entries {
            writer.string(name)?;
            writer.u32(u32::try_from(offset).map_err(|_| ArchiveError::TooLarge)?);
            writer.u32(u32::try_from(data.len()).map_err(|_| ArchiveError::TooLarge)?);
            offset = offset.checked_add(data.len()).ok_or(ArchiveError::TooLarge)?;
        }
        u32::try_from(offset).map_err(|_| ArchiveError::TooLarge)?;
        for data in self.entries.values() {
            writer.bytes(data);
        }
        Ok(writer.into_bytes())
    }
}

fn sanitize_name(name: &str) -> String {
    let trimmed = name.trim_matches(char::from(0));
    trimmed.replace('\\', "/")
}

fn is_safe_relative(name: &str) -> bool {
    if name.is_empty() || name.starts_with('/') {
        return false;
    }
    Path::new(name)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

fn safe_join(base: &Path, entry: &str) -> Result<PathBuf, ArchiveError> {
    let rel = Path::new(entry);
    let mut safe = PathBuf::from(base);
    for component in rel.components() {
        match component {
            Component::Normal(part) => safe.push(part),
            Component::CurDir => {}
            _ => return Err(ArchiveError::UnsafePath(entry.to_string())),
        }
    }

    if safe.file_name() == Some(OsStr::new("")) || safe == base {
        return Err(ArchiveError::UnsafePath(entry.to_string()));
    }

    Ok(safe)
}
