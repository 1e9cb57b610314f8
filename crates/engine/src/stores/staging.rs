//! Staging store: client-supplied values awaiting injection.
//!
//! Staging and injection run on different request flows, so all access goes
//! through one lock; an entry is replaced atomically and a reader never sees
//! a partially-written value. Entries are consumed by injection but left in
//! place; only an overwrite or an explicit clear removes one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// Type coercion failed at staging time. Injection trusts the stored
    /// type tag and never re-validates.
    #[error("invalid {expected} value for key '{key}': '{raw}'")]
    InvalidValue {
        key: String,
        expected: &'static str,
        raw: String,
    },
    #[error("failed to persist staged upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Declared type of a stage request, as sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedType {
    Image,
    Text,
    Float,
    Int,
}

impl std::str::FromStr for StagedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Image" => Ok(Self::Image),
            "Text" => Ok(Self::Text),
            "Float" => Ok(Self::Float),
            "Int" => Ok(Self::Int),
            other => Err(format!("unsupported data type: {other}")),
        }
    }
}

/// An uploaded image held locally, not yet transferred to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub storage_path: PathBuf,
    pub original_filename: String,
}

/// One staged value.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedValue {
    Text(String),
    Int(i64),
    Float(f64),
    Image(ImageRef),
}

impl StagedValue {
    /// JSON form for echoing in stage responses. Image refs echo their
    /// original filename.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => json!(s),
            Self::Int(i) => json!(i),
            Self::Float(f) => json!(f),
            Self::Image(r) => json!(r.original_filename),
        }
    }
}

/// Process-wide key/value store of staged data. Unbounded in key count,
/// single-valued per key.
pub struct StagingStore {
    scratch_dir: PathBuf,
    entries: Mutex<HashMap<String, StagedValue>>,
}

impl StagingStore {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let scratch_dir = scratch_dir.into();
        std::fs::create_dir_all(&scratch_dir)?;
        Ok(Self {
            scratch_dir,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Stage a scalar value, coercing `raw` to the declared type.
    ///
    /// Returns the stored value for echoing. `StagedType::Image` is not
    /// accepted here; image staging goes through [`Self::stage_image`].
    pub fn stage_value(
        &self,
        key: &str,
        ty: StagedType,
        raw: &str,
    ) -> Result<StagedValue, StagingError> {
        let value = match ty {
            StagedType::Text => StagedValue::Text(raw.to_string()),
            StagedType::Int => {
                StagedValue::Int(raw.trim().parse().map_err(|_| StagingError::InvalidValue {
                    key: key.to_string(),
                    expected: "Int",
                    raw: raw.to_string(),
                })?)
            }
            StagedType::Float => {
                StagedValue::Float(raw.trim().parse().map_err(|_| StagingError::InvalidValue {
                    key: key.to_string(),
                    expected: "Float",
                    raw: raw.to_string(),
                })?)
            }
            StagedType::Image => {
                return Err(StagingError::InvalidValue {
                    key: key.to_string(),
                    expected: "Image (requires a file upload)",
                    raw: raw.to_string(),
                })
            }
        };
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Persist an uploaded image under a collision-resistant name and stage
    /// a reference to it.
    pub fn stage_image(
        &self,
        key: &str,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<ImageRef, StagingError> {
        let mut scratch_name = Uuid::new_v4().to_string();
        if let Some(ext) = Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
        {
            scratch_name.push('.');
            scratch_name.push_str(ext);
        }
        let storage_path = self.scratch_dir.join(scratch_name);
        std::fs::write(&storage_path, bytes)?;

        let image_ref = ImageRef {
            storage_path,
            original_filename: original_filename.to_string(),
        };
        self.insert(key, StagedValue::Image(image_ref.clone()));
        Ok(image_ref)
    }

    /// Read a staged value. Injection uses this and leaves the entry alone.
    pub fn get(&self, key: &str) -> Option<StagedValue> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(key).cloned()
    }

    /// Remove a key, releasing any scratch file it held. Returns whether an
    /// entry existed.
    pub fn clear(&self, key: &str) -> bool {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            entries.remove(key)
        };
        match removed {
            Some(value) => {
                release_scratch_file(&value);
                true
            }
            None => false,
        }
    }

    /// Insert, releasing the scratch file of any superseded image entry.
    fn insert(&self, key: &str, value: StagedValue) {
        let superseded = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            entries.insert(key.to_string(), value)
        };
        if let Some(old) = superseded {
            release_scratch_file(&old);
        }
        tracing::info!(key = %key, "Staged data");
    }
}

fn release_scratch_file(value: &StagedValue) {
    if let StagedValue::Image(image_ref) = value {
        if let Err(e) = std::fs::remove_file(&image_ref.storage_path) {
            tracing::warn!(
                path = %image_ref.storage_path.display(),
                error = %e,
                "Failed to remove superseded staged file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StagingStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StagingStore::new(dir.path().join("scratch")).expect("store");
        (dir, store)
    }

    #[test]
    fn stages_and_reads_scalars() {
        let (_dir, store) = store();
        store
            .stage_value("current_prompt", StagedType::Text, "a red fox")
            .expect("text");
        store
            .stage_value("current_count", StagedType::Int, "3")
            .expect("int");
        store
            .stage_value("current_strength", StagedType::Float, "0.75")
            .expect("float");

        assert_eq!(
            store.get("current_prompt"),
            Some(StagedValue::Text("a red fox".to_string()))
        );
        assert_eq!(store.get("current_count"), Some(StagedValue::Int(3)));
        assert_eq!(
            store.get("current_strength"),
            Some(StagedValue::Float(0.75))
        );
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn rejects_bad_numeric_input_at_staging_time() {
        let (_dir, store) = store();
        let err = store
            .stage_value("current_count", StagedType::Int, "three")
            .expect_err("must fail");
        assert!(matches!(err, StagingError::InvalidValue { .. }));
        // Nothing was stored for the key.
        assert!(store.get("current_count").is_none());
    }

    #[test]
    fn overwrite_replaces_value() {
        let (_dir, store) = store();
        store
            .stage_value("k", StagedType::Text, "first")
            .expect("stage");
        store
            .stage_value("k", StagedType::Text, "second")
            .expect("stage");
        assert_eq!(store.get("k"), Some(StagedValue::Text("second".to_string())));
    }

    #[test]
    fn staged_image_overwrite_releases_the_old_file() {
        let (_dir, store) = store();
        let first = store
            .stage_image("current_line_draft", "draft.png", b"png-one")
            .expect("stage");
        assert!(first.storage_path.exists());

        let second = store
            .stage_image("current_line_draft", "draft2.png", b"png-two")
            .expect("stage");
        assert!(!first.storage_path.exists());
        assert!(second.storage_path.exists());

        match store.get("current_line_draft") {
            Some(StagedValue::Image(r)) => assert_eq!(r, second),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn clear_removes_entry_and_file() {
        let (_dir, store) = store();
        let image_ref = store
            .stage_image("k", "a.png", b"bytes")
            .expect("stage");
        assert!(store.clear("k"));
        assert!(!image_ref.storage_path.exists());
        assert!(store.get("k").is_none());
        assert!(!store.clear("k"));
    }

    #[test]
    fn scratch_names_keep_the_extension_but_not_the_name() {
        let (_dir, store) = store();
        let image_ref = store
            .stage_image("k", "my photo.PNG", b"bytes")
            .expect("stage");
        let name = image_ref
            .storage_path
            .file_name()
            .and_then(|n| n.to_str())
            .expect("name");
        assert!(name.ends_with(".PNG"));
        assert!(!name.contains("my photo"));
    }
}
