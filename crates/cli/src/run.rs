use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use geofield_core::{
    CalibrationStore, ExtractionController, ExtractionResult, ExtractionSource, FieldExtractor,
    JsonFileStore, Schema,
};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::FileConfig;
use crate::layout::load_layout;
use crate::llm_extractor::{LlmFieldExtractor, UnavailableExtractor};

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub label: String,
    pub extraction_schema: Schema,
    #[serde(alias = "pdf_path")]
    pub layout_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputEntry {
    pub label: String,
    pub extraction_schema: Schema,
    pub layout_path: PathBuf,
    pub extracted_fields: IndexMap<String, Option<String>>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub manifest: PathBuf,
    pub output: PathBuf,
    pub memory: PathBuf,
    pub fresh: bool,
    pub jobs: usize,
}

pub fn run(opts: &RunOptions, config: &FileConfig) -> Result<()> {
    let settings = config.llm.resolve()?;
    info!(
        provider = settings.provider.as_str(),
        model = %settings.model,
        "starting batch"
    );
    let extractor: Box<dyn FieldExtractor> = match LlmFieldExtractor::new(&settings) {
        Ok(extractor) => Box::new(extractor),
        Err(err) => {
            warn!("model unavailable, relying on learned positions only: {err:#}");
            Box::new(UnavailableExtractor::new(format!("{err:#}")))
        }
    };
    run_with(opts, config, extractor)
}

pub fn run_with<E: FieldExtractor>(
    opts: &RunOptions,
    config: &FileConfig,
    extractor: E,
) -> Result<()> {
    let entries = read_manifest(&opts.manifest)?;
    if opts.fresh && opts.memory.exists() {
        fs::remove_file(&opts.memory)
            .with_context(|| format!("failed to remove {}", opts.memory.display()))?;
        info!(path = %opts.memory.display(), "discarded calibration memory");
    }
    let store = JsonFileStore::open(&opts.memory, config.calibration.mean_policy);
    let controller = ExtractionController::new(extractor, store)
        .with_config(config.controller)
        .with_segmenter(config.segmenter)
        .with_tolerance(config.matcher);
    let base = opts.manifest.parent().unwrap_or_else(|| Path::new(""));
    let outputs = run_batch(&controller, &entries, base, opts.jobs)?;
    write_output(&opts.output, &outputs)?;
    info!(
        documents = outputs.len(),
        output = %opts.output.display(),
        "batch finished"
    );
    Ok(())
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid manifest {}", path.display()))
}

/// Runs every entry through `controller` on a pool of `jobs` threads. Output
/// order follows the manifest; a failing document yields an all-null entry.
pub fn run_batch<E, S>(
    controller: &ExtractionController<E, S>,
    entries: &[ManifestEntry],
    base: &Path,
    jobs: usize,
) -> Result<Vec<OutputEntry>>
where
    E: FieldExtractor,
    S: CalibrationStore,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| anyhow!("failed to build worker pool: {e}"))?;
    let results: Vec<(OutputEntry, Option<ExtractionSource>)> = pool.install(|| {
        entries
            .par_iter()
            .map(|entry| process_entry(controller, entry, base))
            .collect()
    });
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for (_, source) in &results {
        let key = match source {
            Some(ExtractionSource::Extractor) => "extractor",
            Some(ExtractionSource::Geometry) => "geometry",
            Some(ExtractionSource::Rescue) => "rescue",
            None => "failed",
        };
        *counts.entry(key).or_default() += 1;
    }
    info!(?counts, "documents by source");
    Ok(results.into_iter().map(|(output, _)| output).collect())
}

fn process_entry<E, S>(
    controller: &ExtractionController<E, S>,
    entry: &ManifestEntry,
    base: &Path,
) -> (OutputEntry, Option<ExtractionSource>)
where
    E: FieldExtractor,
    S: CalibrationStore,
{
    let path = if entry.layout_path.is_absolute() {
        entry.layout_path.clone()
    } else {
        base.join(&entry.layout_path)
    };
    let outcome = load_layout(&path).and_then(|page| {
        controller
            .extract(&entry.label, &entry.extraction_schema, &page)
            .map_err(anyhow::Error::from)
    });
    let (result, source) = match outcome {
        Ok(extraction) => (extraction.result, Some(extraction.source)),
        Err(err) => {
            warn!(
                label = %entry.label,
                layout = %path.display(),
                "document failed: {err:#}"
            );
            (ExtractionResult::all_null(&entry.extraction_schema), None)
        }
    };
    let output = OutputEntry {
        label: entry.label.clone(),
        extraction_schema: entry.extraction_schema.clone(),
        layout_path: entry.layout_path.clone(),
        extracted_fields: result.values(),
    };
    (output, source)
}

fn write_output(path: &Path, outputs: &[OutputEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, outputs)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
