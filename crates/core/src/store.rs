use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::calibration::{nearest_to, CalibrationDatabase, MeanPolicy};
use crate::error::{CoreError, Result};
use crate::geometry::{BoundingBox, Center};
use crate::memory::ExtractionMemory;
use crate::schema::Schema;
use crate::segment::TextChunk;

/// Calibration state the controller reads and updates. Implementations decide
/// where the state lives; `flush` is where durable ones write it out.
pub trait CalibrationStore: Send {
    fn initialize(&mut self, label: &str, schema: &Schema);

    fn seen(&self, label: &str) -> u32;

    /// Counts one more processed document for `label`, returning the new count.
    fn mark_seen(&mut self, label: &str) -> u32;

    /// Appends a confirmed value box for `(label, field)`.
    fn record(&mut self, label: &str, field: &str, bbox: BoundingBox);

    fn mean_center(&self, label: &str, field: &str) -> Option<Center>;

    fn query_nearest<'a>(
        &self,
        label: &str,
        field: &str,
        chunks: &'a [TextChunk],
    ) -> Option<&'a TextChunk> {
        nearest_to(self.mean_center(label, field)?, chunks)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    memory: ExtractionMemory,
    calibration: CalibrationDatabase,
}

impl MemoryStore {
    pub fn new(policy: MeanPolicy) -> Self {
        Self::from_memory(ExtractionMemory::default(), policy)
    }

    pub fn from_memory(memory: ExtractionMemory, policy: MeanPolicy) -> Self {
        let calibration = CalibrationDatabase::from_memory(&memory, policy);
        Self {
            memory,
            calibration,
        }
    }

    pub fn memory(&self) -> &ExtractionMemory {
        &self.memory
    }

    pub fn calibration(&self) -> &CalibrationDatabase {
        &self.calibration
    }
}

impl CalibrationStore for MemoryStore {
    fn initialize(&mut self, label: &str, schema: &Schema) {
        self.memory.initialize(label, schema);
        self.calibration.initialize(label, schema);
    }

    fn seen(&self, label: &str) -> u32 {
        self.memory.seen(label)
    }

    fn mark_seen(&mut self, label: &str) -> u32 {
        self.memory.increment_seen(label)
    }

    fn record(&mut self, label: &str, field: &str, bbox: BoundingBox) {
        self.memory.push_box(label, field, bbox);
        self.calibration.record(label, field, bbox.center());
    }

    fn mean_center(&self, label: &str, field: &str) -> Option<Center> {
        self.calibration.mean_center(label, field)
    }
}

/// [`MemoryStore`] backed by a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing or unreadable file yields an empty
    /// store; the file is only written on [`CalibrationStore::flush`].
    pub fn open<P: AsRef<Path>>(path: P, policy: MeanPolicy) -> Self {
        let path = path.as_ref().to_path_buf();
        let memory = load_memory(&path);
        Self {
            path,
            inner: MemoryStore::from_memory(memory, policy),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl CalibrationStore for JsonFileStore {
    fn initialize(&mut self, label: &str, schema: &Schema) {
        self.inner.initialize(label, schema);
    }

    fn seen(&self, label: &str) -> u32 {
        self.inner.seen(label)
    }

    fn mark_seen(&mut self, label: &str) -> u32 {
        self.inner.mark_seen(label)
    }

    fn record(&mut self, label: &str, field: &str, bbox: BoundingBox) {
        self.inner.record(label, field, bbox);
    }

    fn mean_center(&self, label: &str, field: &str) -> Option<Center> {
        self.inner.mean_center(label, field)
    }

    fn flush(&mut self) -> Result<()> {
        save_memory(&self.path, self.inner.memory())
    }
}

/// Reads persisted memory; absent or corrupt files count as empty.
pub fn load_memory(path: &Path) -> ExtractionMemory {
    if !path.exists() {
        return ExtractionMemory::default();
    }
    let parsed = File::open(path)
        .map_err(CoreError::from)
        .and_then(|file| serde_json::from_reader(file).map_err(CoreError::from));
    match parsed {
        Ok(memory) => memory,
        Err(err) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable calibration memory: {err}");
            ExtractionMemory::default()
        }
    }
}

pub fn save_memory(path: &Path, memory: &ExtractionMemory) -> Result<()> {
    let persist_err = |err: &dyn std::fmt::Display| CoreError::Persist {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persist_err(&e))?;
    }
    let file = File::create(path).map_err(|e| persist_err(&e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, memory).map_err(|e| persist_err(&e))?;
    writer.flush().map_err(|e| persist_err(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn schema() -> Schema {
        [("nome", "Nome"), ("inscricao", "Inscrição")]
            .into_iter()
            .collect()
    }

    #[test]
    fn memory_store_keeps_boxes_and_means_in_step() {
        let mut store = MemoryStore::default();
        store.initialize("oab", &schema());
        store.record("oab", "nome", BoundingBox::new(0.0, 0.0, 20.0, 10.0));
        store.record("oab", "nome", BoundingBox::new(20.0, 10.0, 40.0, 20.0));
        assert_eq!(store.mean_center("oab", "nome"), Some(Center::new(20.0, 10.0)));
        assert_eq!(store.mean_center("oab", "inscricao"), None);
        assert_eq!(
            store.memory().label("oab").unwrap().fields["nome"].boxes.len(),
            2
        );
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/bbox_memory.json");
        let mut store = JsonFileStore::open(&path, MeanPolicy::Historical);
        store.initialize("oab", &schema());
        store.record("oab", "nome", BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        store.mark_seen("oab");
        store.flush().unwrap();

        let reopened = JsonFileStore::open(&path, MeanPolicy::Historical);
        assert_eq!(reopened.seen("oab"), 1);
        assert_eq!(reopened.mean_center("oab", "nome"), Some(Center::new(5.0, 5.0)));
        assert!(reopened
            .inner()
            .calibration()
            .entry("oab", "inscricao")
            .is_some());
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bbox_memory.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::open(&path, MeanPolicy::Historical);
        assert!(store.inner().memory().is_empty());
        assert_eq!(store.seen("oab"), 0);
    }
}
