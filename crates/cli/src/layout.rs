use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geofield_core::{LayoutLine, PageLayout};
use serde::Deserialize;

/// Text layout as written by the layout provider. Either a flat list of lines
/// or a block dictionary where only text blocks (`type` 0) carry lines.
#[derive(Deserialize)]
#[serde(untagged)]
enum LayoutFile {
    Lines { lines: Vec<LayoutLine> },
    Blocks { blocks: Vec<RawBlock> },
}

#[derive(Deserialize)]
struct RawBlock {
    #[serde(rename = "type", default)]
    kind: u32,
    #[serde(default)]
    lines: Vec<LayoutLine>,
}

pub fn parse_layout(raw: &str) -> Result<PageLayout> {
    let file: LayoutFile =
        serde_json::from_str(raw).context("layout must contain `lines` or `blocks`")?;
    let lines = match file {
        LayoutFile::Lines { lines } => lines,
        LayoutFile::Blocks { blocks } => blocks
            .into_iter()
            .filter(|block| block.kind == 0)
            .flat_map(|block| block.lines)
            .collect(),
    };
    Ok(PageLayout::new(lines))
}

pub fn load_layout(path: &Path) -> Result<PageLayout> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read layout {}", path.display()))?;
    parse_layout(&raw).with_context(|| format!("invalid layout {}", path.display()))
}
