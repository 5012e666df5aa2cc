use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A template read from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub contents: String,
}

impl SourceFile {
    pub fn new(path: PathBuf, contents: String) -> Self {
        Self { path, contents }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::new(path.to_path_buf(), contents))
    }

    /// 1-based line without its terminator.
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|index| self.contents.lines().nth(index))
    }
}
