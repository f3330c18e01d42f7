use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

// --- Playlist store ----------------------------------------------------------
//
// The spirit list is a JSON array of objects read once at startup. We never
// look inside a record; it is handed to the browser verbatim. Records are
// kept behind `Arc` so every broadcast of the same position shares one
// allocation.

/// One playlist entry, passed through to clients untouched.
pub type SpiritRecord = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read spirit data from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spirit data is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("spirit data must be a JSON array")]
    NotASequence,
    #[error("spirit entry {index} is not a JSON object")]
    NotARecord { index: usize },
    #[error("spirit data contains no entries")]
    Empty,
}

pub struct Playlist {
    records: Vec<Arc<SpiritRecord>>,
    cursor: usize,
    rng: fastrand::Rng,
}

impl Playlist {
    /// Read and validate the data file, then shuffle it once.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value, fastrand::Rng::new())
    }

    /// Same as [`Playlist::from_json_str`] but with a caller supplied RNG so
    /// shuffles are reproducible.
    pub fn with_rng(text: &str, rng: fastrand::Rng) -> Result<Self, LoadError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value, rng)
    }

    fn from_value(value: Value, rng: fastrand::Rng) -> Result<Self, LoadError> {
        let Value::Array(entries) = value else {
            return Err(LoadError::NotASequence);
        };
        if entries.is_empty() {
            return Err(LoadError::Empty);
        }

        let records = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                Value::Object(map) => Ok(Arc::new(map)),
                _ => Err(LoadError::NotARecord { index }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut playlist = Self { records, cursor: 0, rng };
        playlist.shuffle();
        Ok(playlist)
    }

    /// Uniform in-place permutation (Fisher-Yates).
    pub fn shuffle(&mut self) {
        self.rng.shuffle(&mut self.records);
    }

    /// Move to the next record. Returns `true` when the end was reached and
    /// the list was reshuffled with the cursor back at 0.
    pub fn advance(&mut self) -> bool {
        self.cursor += 1;
        if self.cursor >= self.records.len() {
            let last = self.records[self.records.len() - 1].clone();
            self.shuffle();
            self.cursor = 0;
            // The item just shown must not open the next pass.
            let len = self.records.len();
            if len > 1 && Arc::ptr_eq(&self.records[0], &last) {
                let j = self.rng.usize(1..len);
                self.records.swap(0, j);
            }
            return true;
        }
        false
    }

    pub fn current(&self) -> Arc<SpiritRecord> {
        // Non-empty and cursor < len are upheld by construction and advance().
        self.records[self.cursor].clone()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[Arc<SpiritRecord>] {
        &self.records
    }
}

#[cfg(test)]
pub(crate) fn sample_json(n: usize) -> String {
    let items: Vec<Value> = (0..n)
        .map(|i| serde_json::json!({ "Name": format!("spirit-{i}"), "Model": format!("spirit_{i}.glb") }))
        .collect();
    Value::Array(items).to_string()
}
