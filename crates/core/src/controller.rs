//! Per-document extraction policy.
//!
//! While a label has fewer than `sample_threshold` processed documents the
//! model-backed extractor answers and every box it returns is recorded. From
//! then on values are read off the learned positions, and the extractor is only
//! consulted again when geometry leaves too many fields empty.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::extractor::FieldExtractor;
use crate::matcher::{Direction, ProximityMatcher, Tolerance};
use crate::schema::{ExtractionResult, FieldValue, Schema};
use crate::segment::{PageLayout, Segmenter, SegmenterConfig, TextChunk};
use crate::store::CalibrationStore;

/// Page number reported for geometric values; documents are single-page.
const GEOMETRIC_PAGE: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Documents a label must have seen before geometry takes over.
    pub sample_threshold: u32,
    /// Geometric results with a larger share of empty fields get one
    /// extractor rescue call.
    pub rescue_null_ratio: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sample_threshold: 3,
            rescue_null_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Learning,
    Geometric,
}

impl Phase {
    pub fn for_seen(seen: u32, sample_threshold: u32) -> Self {
        if seen < sample_threshold {
            Phase::Learning
        } else {
            Phase::Geometric
        }
    }
}

/// Which path produced the returned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Extractor,
    Geometry,
    Rescue,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub result: ExtractionResult,
    pub phase: Phase,
    pub source: ExtractionSource,
}

#[derive(Default)]
struct LabelLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LabelLocks {
    fn get(&self, label: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(label.to_string())
            .or_default()
            .clone()
    }
}

pub struct ExtractionController<E, S> {
    segmenter: Segmenter,
    matcher: ProximityMatcher,
    extractor: E,
    store: Mutex<S>,
    label_locks: LabelLocks,
    config: ControllerConfig,
}

impl<E: FieldExtractor, S: CalibrationStore> ExtractionController<E, S> {
    pub fn new(extractor: E, store: S) -> Self {
        Self {
            segmenter: Segmenter::default(),
            matcher: ProximityMatcher::default(),
            extractor,
            store: Mutex::new(store),
            label_locks: LabelLocks::default(),
            config: ControllerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_segmenter(mut self, config: SegmenterConfig) -> Self {
        self.segmenter = Segmenter::new(config);
        self
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.matcher = ProximityMatcher::new(tolerance);
        self
    }

    /// Locks the store. Do not hold the guard across calls to `extract`.
    pub fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock()
    }

    pub fn into_store(self) -> S {
        self.store.into_inner()
    }

    pub fn segment(&self, page: &PageLayout) -> Vec<TextChunk> {
        self.segmenter.segment(page)
    }

    pub fn find_value(
        &self,
        page: &PageLayout,
        keyword: &str,
        direction: Direction,
    ) -> Option<String> {
        let chunks = self.segmenter.segment(page);
        self.matcher.find_text(&chunks, keyword, direction)
    }

    /// Extracts `schema` from one page of a `label` document.
    ///
    /// Documents of the same label are processed one at a time; other labels
    /// are not blocked. Extractor failures never surface here: the result
    /// then comes from geometry, possibly all null.
    pub fn extract(&self, label: &str, schema: &Schema, page: &PageLayout) -> Result<Extraction> {
        if schema.is_empty() {
            return Err(CoreError::EmptySchema(label.to_string()));
        }
        let chunks = self.segmenter.segment(page);

        let label_lock = self.label_locks.get(label);
        let _label_guard = label_lock.lock();

        let seen = {
            let mut store = self.store.lock();
            store.initialize(label, schema);
            store.seen(label)
        };
        let phase = Phase::for_seen(seen, self.config.sample_threshold);
        debug!(
            label,
            seen,
            ?phase,
            chunks = chunks.len(),
            "extracting document"
        );

        let mut counted = false;
        if phase == Phase::Learning {
            match self.extractor.extract(label, schema, &chunks) {
                Ok(result) => {
                    let result = result.conform(schema);
                    self.commit(label, &result, true);
                    return Ok(Extraction {
                        result,
                        phase,
                        source: ExtractionSource::Extractor,
                    });
                }
                Err(err) => {
                    warn!(label, "extractor failed during learning, using geometry: {err}");
                    self.commit(label, &ExtractionResult::default(), true);
                    counted = true;
                }
            }
        }

        let geometric = self.geometric(label, schema, &chunks);
        let null_ratio = geometric.null_ratio(schema);
        debug!(label, null_ratio, "geometric extraction finished");

        if null_ratio > self.config.rescue_null_ratio {
            info!(
                label,
                null_ratio, "too many fields missing, asking the extractor to rescue"
            );
            match self.extractor.extract(label, schema, &chunks) {
                Ok(result) => {
                    let result = result.conform(schema);
                    self.commit(label, &result, !counted);
                    return Ok(Extraction {
                        result,
                        phase,
                        source: ExtractionSource::Rescue,
                    });
                }
                Err(err) => {
                    warn!(label, "rescue extraction failed, keeping geometric result: {err}");
                }
            }
        }

        if !counted {
            self.commit(label, &ExtractionResult::default(), true);
        }
        Ok(Extraction {
            result: geometric,
            phase,
            source: ExtractionSource::Geometry,
        })
    }

    fn geometric(&self, label: &str, schema: &Schema, chunks: &[TextChunk]) -> ExtractionResult {
        let store = self.store.lock();
        let mut result = ExtractionResult::all_null(schema);
        for field in schema.fields() {
            let value = store
                .query_nearest(label, field, chunks)
                .map(|chunk| FieldValue {
                    value: chunk.text.clone(),
                    page: GEOMETRIC_PAGE,
                    bbox: Some(chunk.bbox),
                });
            result.set(field, value);
        }
        result
    }

    /// Records every returned box, optionally counts the document, and
    /// persists. Persistence failures are logged only.
    fn commit(&self, label: &str, result: &ExtractionResult, count_document: bool) {
        let mut store = self.store.lock();
        for (field, value) in result.iter() {
            if let Some(bbox) = value.and_then(|v| v.bbox) {
                store.record(label, field, bbox);
            }
        }
        if count_document {
            let seen = store.mark_seen(label);
            if seen == self.config.sample_threshold {
                info!(label, seen, "label calibrated, switching to geometric extraction");
            }
        }
        if let Err(err) = store.flush() {
            warn!(label, "failed to persist calibration memory: {err}");
        }
    }
}
