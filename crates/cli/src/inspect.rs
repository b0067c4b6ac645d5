//! Read-only commands for looking at layouts and learned positions.

use std::path::Path;

use anyhow::Result;
use geofield_core::{
    keyword_context, load_memory, CalibrationDatabase, Direction, MeanPolicy, ProximityMatcher,
    Segmenter, TextChunk,
};

use crate::config::FileConfig;
use crate::layout::load_layout;

fn chunks_of(path: &Path, config: &FileConfig) -> Result<Vec<TextChunk>> {
    let page = load_layout(path)?;
    Ok(Segmenter::new(config.segmenter).segment(&page))
}

pub fn segment(path: &Path, json: bool, config: &FileConfig) -> Result<()> {
    let chunks = chunks_of(path, config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }
    for chunk in &chunks {
        let [x0, y0, x1, y1] = chunk.bbox.to_array();
        println!("[{x0:>7.1} {y0:>7.1} {x1:>7.1} {y1:>7.1}]  {}", chunk.text);
    }
    eprintln!("{} chunks", chunks.len());
    Ok(())
}

pub fn find(path: &Path, keyword: &str, direction: Direction, config: &FileConfig) -> Result<()> {
    let chunks = chunks_of(path, config)?;
    match ProximityMatcher::new(config.matcher).find(&chunks, keyword, direction) {
        Some(found) => {
            println!("{}", found.text());
            tracing::debug!(
                keyword = %found.keyword.text,
                gap = found.gap,
                "matched {direction} of keyword"
            );
        }
        None => eprintln!("no value {direction} of {keyword:?}"),
    }
    Ok(())
}

pub fn context(path: &Path, keyword: &str, window: usize, config: &FileConfig) -> Result<()> {
    let chunks = chunks_of(path, config)?;
    println!("{}", keyword_context(&chunks, keyword, window));
    Ok(())
}

pub fn memory(path: &Path, config: &FileConfig) -> Result<()> {
    print!("{}", memory_report(path, config.calibration.mean_policy));
    Ok(())
}

fn memory_report(path: &Path, policy: MeanPolicy) -> String {
    let memory = load_memory(path);
    if memory.is_empty() {
        return format!("{}: no calibration data\n", path.display());
    }
    let database = CalibrationDatabase::from_memory(&memory, policy);
    let mut out = String::new();
    for (label, entry) in memory.labels() {
        out.push_str(&format!("{label}  seen={}\n", entry.seen));
        let Some(fields) = database.fields(label) else {
            continue;
        };
        for (field, calibration) in fields {
            let mean = calibration
                .mean_center
                .map(|c| format!("({:.1}, {:.1})", c.x, c.y))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  {field:<24} samples={:<4} mean={mean}\n",
                calibration.samples()
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use geofield_core::{save_memory, BoundingBox, ExtractionMemory, Schema};

    #[test]
    fn report_lists_labels_fields_and_means() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let mut memory = ExtractionMemory::default();
        let schema: Schema = [("nome", "name"), ("cpf", "tax id")].into_iter().collect();
        memory.initialize("card", &schema);
        memory.push_box("card", "nome", BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        memory.push_box("card", "nome", BoundingBox::new(10.0, 10.0, 20.0, 20.0));
        memory.increment_seen("card");
        memory.increment_seen("card");
        save_memory(&path, &memory).unwrap();

        let report = memory_report(&path, MeanPolicy::Historical);
        assert!(report.starts_with("card  seen=2\n"));
        assert!(report.contains("nome"));
        assert!(report.contains("samples=2"));
        assert!(report.contains("mean=(10.0, 10.0)"));
        assert!(report.contains("samples=0"));
    }

    #[test]
    fn report_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = memory_report(&dir.path().join("none.json"), MeanPolicy::Historical);
        assert!(report.contains("no calibration data"));
    }
}
