//! Keyword-anchored value lookup.
//!
//! A value is the chunk nearest to the keyword chunk in one direction, provided
//! it stays aligned with the keyword within a tolerance proportional to the
//! keyword box.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::segment::TextChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Right,
    Below,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Right => "right",
            Direction::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "right" => Ok(Direction::Right),
            "below" => Ok(Direction::Below),
            _ => Err(CoreError::InvalidDirection(value.to_string())),
        }
    }
}

/// Alignment tolerances as fractions of the keyword box size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub x_ratio: f64,
    pub y_ratio: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            x_ratio: 0.25,
            y_ratio: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityMatch<'a> {
    pub keyword: &'a TextChunk,
    pub value: &'a TextChunk,
    /// Distance from the keyword edge to the value edge along `direction`.
    pub gap: f64,
}

impl ProximityMatch<'_> {
    pub fn text(&self) -> &str {
        &self.value.text
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProximityMatcher {
    tolerance: Tolerance,
}

impl ProximityMatcher {
    pub fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    pub fn find<'a>(
        &self,
        chunks: &'a [TextChunk],
        keyword: &str,
        direction: Direction,
    ) -> Option<ProximityMatch<'a>> {
        let needle = keyword.trim().to_lowercase();
        let anchor = chunks
            .iter()
            .find(|chunk| chunk.text.to_lowercase().contains(&needle))?;
        let k = anchor.bbox;
        let tol_x = self.tolerance.x_ratio * k.width();
        let tol_y = self.tolerance.y_ratio * k.height();

        chunks
            .iter()
            .filter(|chunk| chunk.bbox != k && !chunk.text.to_lowercase().contains(&needle))
            .filter_map(|chunk| {
                let c = chunk.bbox;
                let gap = match direction {
                    Direction::Right => {
                        let dx_left = c.x0 - k.x1;
                        let dy_align = (c.y0 - k.y0).abs();
                        (dx_left >= 0.0 && dy_align <= tol_y).then_some(dx_left)
                    }
                    Direction::Below => {
                        let dy_top = c.y0 - k.y1;
                        let dx_align = (c.x0 - k.x0).abs();
                        (dy_top > 0.0 && dx_align <= tol_x).then_some(dy_top)
                    }
                }?;
                Some((gap, chunk))
            })
            // min_by keeps the first of equal elements, so ties go to document order
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(gap, value)| ProximityMatch {
                keyword: anchor,
                value,
                gap,
            })
    }

    pub fn find_text(
        &self,
        chunks: &[TextChunk],
        keyword: &str,
        direction: Direction,
    ) -> Option<String> {
        self.find(chunks, keyword, direction)
            .map(|found| found.text().to_string())
    }
}
