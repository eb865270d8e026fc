//! Syntax gate for gameplay scripts. Sources are compiled with the bundled
//! Lua 5.4 parser and never executed.
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use mlua::Lua;
use thiserror::Error;
use walkdir::WalkDir;

pub const SCRIPT_EXTENSION: &str = "lua";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{path}:{line}: {message}")]
    Syntax {
        path: String,
        line: u32,
        message: String,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScriptError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, ScriptError::Syntax { .. })
    }
}

/// One parser reused across every file of a check run.
pub struct ScriptChecker {
    lua: Lua,
}

impl Default for ScriptChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptChecker {
    pub fn new() -> Self {
        Self { lua: Lua::new() }
    }

    /// Compiles `source` under `name` without running it.
    pub fn check_source(&self, name: &str, source: &str) -> Result<(), ScriptError> {
        self.check_bytes(name, source.as_bytes())
    }

    /// Lua source is a byte string; no text encoding is assumed.
    pub fn check_bytes(&self, name: &str, source: &[u8]) -> Result<(), ScriptError> {
        let chunk = self.lua.load(source).set_name(format!("={}", name));
        match chunk.into_function() {
            Ok(_) => Ok(()),
            Err(err) => Err(syntax_error(name, err)),
        }
    }

    pub fn check_file(&self, path: &Path, name: &str) -> Result<(), ScriptError> {
        let source = fs::read(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.check_bytes(name, &source)
    }
}

/// Checks `path` if it is a script file, or every `.lua` file beneath it in
/// sorted order. Returns the number of scripts checked; a missing path
/// checks nothing.
pub fn check(path: &Path) -> Result<usize, ScriptError> {
    if !path.exists() {
        return Ok(0);
    }
    let checker = ScriptChecker::new();
    let mut checked = 0;
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|err| ScriptError::Io {
            path: err.path().unwrap_or(path).to_path_buf(),
            source: err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
        })?;
        if !entry.file_type().is_file() || !is_script(entry.path()) {
            continue;
        }
        let name = display_name(path, entry.path());
        checker.check_file(entry.path(), &name)?;
        checked += 1;
    }
    Ok(checked)
}

pub fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION))
        .unwrap_or(false)
}

fn display_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let rel = if rel.as_os_str().is_empty() {
        path.file_name().map(Path::new).unwrap_or(path)
    } else {
        rel
    };
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn syntax_error(name: &str, err: mlua::Error) -> ScriptError {
    let text = match err {
        mlua::Error::SyntaxError { message, .. } => message,
        other => other.to_string(),
    };
    let (line, message) = split_location(name, &text);
    ScriptError::Syntax {
        path: name.to_string(),
        line,
        message,
    }
}

// Parser messages read "<chunk>:<line>: <message>".
fn split_location(name: &str, text: &str) -> (u32, String) {
    let located = text
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(|rest| rest.split_once(':'))
        .and_then(|(line, message)| {
            line.trim()
                .parse::<u32>()
                .ok()
                .map(|line| (line, message.trim().to_string()))
        });
    located.unwrap_or_else(|| (0, text.trim().to_string()))
}
