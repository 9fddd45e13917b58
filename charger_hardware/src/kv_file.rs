//! TOML-file-backed key/value store (namespace `charger`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use charger_traits::{HwResult, KvStore};
use tracing::warn;

use crate::error::{HwError, Result};

const NAMESPACE: &str = "charger";

/// Typed store persisted as a small TOML document:
///
/// ```toml
/// [charger]
/// batteryCap = 50.0
/// isLithium = false
/// ```
///
/// Writes buffer in memory; `flush()` rewrites the file atomically
/// (temp file + rename).
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    values: BTreeMap<String, toml::Value>,
    dirty: bool,
}

impl FileKvStore {
    /// Open or create the store. A missing file yields an empty namespace;
    /// an unreadable one is treated as empty with a warning (the charge
    /// profile then starts from defaults).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) => match text.parse::<toml::Table>() {
                Ok(mut root) => match root.remove(NAMESPACE) {
                    Some(toml::Value::Table(table)) => table.into_iter().collect(),
                    _ => BTreeMap::new(),
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "store unreadable; starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(HwError::Io(e)),
        };
        Ok(Self {
            path,
            values,
            dirty: false,
        })
    }

    fn insert(&mut self, key: &str, value: toml::Value) {
        self.values.insert(key.to_string(), value);
        self.dirty = true;
    }

    fn write_out(&self) -> Result<()> {
        let mut root = toml::Table::new();
        root.insert(
            NAMESPACE.to_string(),
            toml::Value::Table(self.values.clone().into_iter().collect()),
        );
        let text = toml::to_string(&root).map_err(|e| HwError::Store(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get_f32(&self, key: &str) -> Option<f32> {
        match self.values.get(key)? {
            toml::Value::Float(f) => Some(*f as f32),
            toml::Value::Integer(i) => Some(*i as f32),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key)?.as_bool()
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key)?.as_integer().and_then(|i| u64::try_from(i).ok())
    }

    fn put_f32(&mut self, key: &str, value: f32) -> HwResult<()> {
        self.insert(key, toml::Value::Float(f64::from(value)));
        Ok(())
    }

    fn put_bool(&mut self, key: &str, value: bool) -> HwResult<()> {
        self.insert(key, toml::Value::Boolean(value));
        Ok(())
    }

    fn put_u64(&mut self, key: &str, value: u64) -> HwResult<()> {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        self.insert(key, toml::Value::Integer(value));
        Ok(())
    }

    fn flush(&mut self) -> HwResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.write_out()
            .map_err(|e| Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()))?;
        self.dirty = false;
        Ok(())
    }
}
