//! File storage for key bundles and signed documents.

use anyhow::{Context, Result, bail};
use getrandom::fill;
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::format;

/// A single JSON record on disk.
///
/// Writes go through a temporary file in the same directory and are
/// renamed into place, so a reader sees either the old or the new file.
#[derive(Clone, Debug)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("failed to read {}", self.path.display()))
    }

    pub fn load_json<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.load()?;
        format::parse(&data).with_context(|| format!("failed to parse {}", self.path.display()))
    }

    pub fn save_json<T: Serialize>(&self, record: &T) -> Result<()> {
        self.save(&format::serialize(record)?)
    }

    /// Like [`save_json`](Self::save_json), but refuses to replace an existing file.
    pub fn save_new_json<T: Serialize>(&self, record: &T) -> Result<()> {
        if self.exists() {
            bail!("{} already exists", self.path.display());
        }
        self.save_json(record)
    }

    /// Saves data using an atomic write.
    ///
    /// 1. Write to a temporary file with a random name
    /// 2. fsync the temporary file
    /// 3. Rename it over the target
    /// 4. fsync the parent directory so the rename is persisted
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.random_tmp_path()?;

        // fail if the temp name is taken
        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .context("failed to create temporary file")?;

        tmp_file.write_all(data)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e).context("atomic replace failed");
        }

        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }

        Ok(())
    }

    /// Format: `filename.tmp.<randomhex>`
    fn random_tmp_path(&self) -> Result<PathBuf> {
        let mut buf = [0u8; 8];
        fill(&mut buf)?;

        let file_name = self
            .path
            .file_name()
            .context("storage path has no file name")?
            .to_string_lossy();

        let tmp_name = format!("{}.tmp.{}", file_name, hex::encode(buf));

        Ok(self.path.with_file_name(tmp_name))
    }
}
