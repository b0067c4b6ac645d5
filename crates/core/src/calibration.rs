use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::geometry::Center;
use crate::memory::ExtractionMemory;
use crate::schema::Schema;
use crate::segment::TextChunk;

/// How a field's reference position is derived from its center history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeanPolicy {
    /// Arithmetic mean of every recorded center.
    #[default]
    Historical,
    /// Arithmetic mean of the most recent `size` centers.
    Window { size: usize },
    /// Exponentially weighted mean; the newest center weighs 1, each older
    /// one `alpha` times the next.
    Decay { alpha: f64 },
}

impl MeanPolicy {
    /// Rejects windows of zero centers and decay factors outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        match *self {
            MeanPolicy::Historical => Ok(()),
            MeanPolicy::Window { size: 0 } => Err(CoreError::InvalidMeanPolicy(
                "window size must be at least 1".to_string(),
            )),
            MeanPolicy::Window { .. } => Ok(()),
            MeanPolicy::Decay { alpha } if alpha > 0.0 && alpha <= 1.0 => Ok(()),
            MeanPolicy::Decay { alpha } => Err(CoreError::InvalidMeanPolicy(format!(
                "decay alpha must be in (0, 1], got {alpha}"
            ))),
        }
    }

    pub fn mean(&self, centers: &[Center]) -> Option<Center> {
        match *self {
            MeanPolicy::Historical => plain_mean(centers),
            MeanPolicy::Window { size } => {
                let start = centers.len().saturating_sub(size.max(1));
                plain_mean(&centers[start..])
            }
            MeanPolicy::Decay { alpha } => decayed_mean(centers, alpha),
        }
    }
}

fn plain_mean(centers: &[Center]) -> Option<Center> {
    if centers.is_empty() {
        return None;
    }
    let n = centers.len() as f64;
    let (sx, sy) = centers
        .iter()
        .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
    Some(Center::new(sx / n, sy / n))
}

fn decayed_mean(centers: &[Center], alpha: f64) -> Option<Center> {
    if centers.is_empty() {
        return None;
    }
    let mut weight = 1.0;
    let (mut sx, mut sy, mut total) = (0.0, 0.0, 0.0);
    for center in centers.iter().rev() {
        sx += weight * center.x;
        sy += weight * center.y;
        total += weight;
        weight *= alpha;
    }
    if total <= 0.0 {
        return plain_mean(centers);
    }
    Some(Center::new(sx / total, sy / total))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub centers: Vec<Center>,
    pub mean_center: Option<Center>,
}

impl CalibrationEntry {
    pub fn samples(&self) -> usize {
        self.centers.len()
    }
}

/// Learned value positions, label -> field -> entry.
#[derive(Debug, Clone, Default)]
pub struct CalibrationDatabase {
    labels: IndexMap<String, IndexMap<String, CalibrationEntry>>,
    policy: MeanPolicy,
}

impl CalibrationDatabase {
    pub fn new(policy: MeanPolicy) -> Self {
        Self {
            labels: IndexMap::new(),
            policy,
        }
    }

    /// Rebuilds calibration from persisted box history, replaying boxes in
    /// stored order.
    pub fn from_memory(memory: &ExtractionMemory, policy: MeanPolicy) -> Self {
        let mut db = Self::new(policy);
        for (label, label_mem) in memory.labels() {
            let fields = db.labels.entry(label.clone()).or_default();
            for (field, field_mem) in &label_mem.fields {
                let entry = fields.entry(field.clone()).or_default();
                entry
                    .centers
                    .extend(field_mem.boxes.iter().map(|b| b.center()));
                entry.mean_center = policy.mean(&entry.centers);
            }
        }
        db
    }

    pub fn initialize(&mut self, label: &str, schema: &Schema) {
        let fields = self.labels.entry(label.to_string()).or_default();
        for field in schema.fields() {
            fields.entry(field.to_string()).or_default();
        }
    }

    pub fn record(&mut self, label: &str, field: &str, center: Center) {
        let entry = self
            .labels
            .entry(label.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default();
        entry.centers.push(center);
        entry.mean_center = self.policy.mean(&entry.centers);
    }

    pub fn entry(&self, label: &str, field: &str) -> Option<&CalibrationEntry> {
        self.labels.get(label)?.get(field)
    }

    pub fn fields(&self, label: &str) -> Option<&IndexMap<String, CalibrationEntry>> {
        self.labels.get(label)
    }

    pub fn mean_center(&self, label: &str, field: &str) -> Option<Center> {
        self.entry(label, field)?.mean_center
    }

    pub fn query_nearest<'a>(
        &self,
        label: &str,
        field: &str,
        chunks: &'a [TextChunk],
    ) -> Option<&'a TextChunk> {
        nearest_to(self.mean_center(label, field)?, chunks)
    }
}

/// Chunk whose center is closest to `target`; earliest chunk wins ties.
pub fn nearest_to(target: Center, chunks: &[TextChunk]) -> Option<&TextChunk> {
    chunks
        .iter()
        .map(|chunk| (chunk.bbox.center().distance(&target), chunk))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, chunk)| chunk)
}
