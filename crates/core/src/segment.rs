use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub bbox: BoundingBox,
}

impl Span {
    pub fn new(text: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutLine {
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// Text geometry of a single page as delivered by the layout provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    #[serde(default)]
    pub lines: Vec<LayoutLine>,
}

impl PageLayout {
    pub fn new(lines: Vec<LayoutLine>) -> Self {
        Self { lines }
    }
}

/// A spatially contiguous run of text, the unit every lookup works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub bbox: BoundingBox,
}

impl TextChunk {
    pub fn new(text: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Horizontal distance between spans above which a new chunk starts.
    pub x_gap_thresh: f64,
    /// A span with a longer run of spaces than this starts a new chunk.
    pub space_thresh: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            x_gap_thresh: 30.0,
            space_thresh: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn segment(&self, page: &PageLayout) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        for line in &page.lines {
            self.segment_line(&line.spans, &mut chunks);
        }
        chunks
    }

    fn segment_line(&self, spans: &[Span], out: &mut Vec<TextChunk>) {
        let mut pending = PendingChunk::default();
        let mut last_x1: Option<f64> = None;
        for span in spans {
            if let Some(prev_x1) = last_x1 {
                let x_gap = span.bbox.x0 - prev_x1;
                if x_gap > self.config.x_gap_thresh
                    || longest_space_run(&span.text) > self.config.space_thresh
                {
                    pending.flush_into(out);
                }
            }
            pending.push(span);
            last_x1 = Some(span.bbox.x1);
        }
        pending.flush_into(out);
    }
}

#[derive(Default)]
struct PendingChunk {
    text: String,
    bbox: Option<BoundingBox>,
}

impl PendingChunk {
    fn push(&mut self, span: &Span) {
        self.text.push_str(&span.text);
        self.bbox = Some(match self.bbox {
            Some(current) => current.envelope(&span.bbox),
            None => span.bbox,
        });
    }

    fn flush_into(&mut self, out: &mut Vec<TextChunk>) {
        let text = std::mem::take(&mut self.text);
        let bbox = self.bbox.take();
        let trimmed = text.trim();
        if let Some(bbox) = bbox {
            if !trimmed.is_empty() {
                out.push(TextChunk::new(trimmed, bbox));
            }
        }
    }
}

fn longest_space_run(text: &str) -> usize {
    let mut longest = 0usize;
    let mut current = 0usize;
    for ch in text.chars() {
        if ch == ' ' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Span {
        Span::new(text, BoundingBox::new(x0, y0, x1, y1))
    }

    fn page(lines: Vec<Vec<Span>>) -> PageLayout {
        PageLayout::new(
            lines
                .into_iter()
                .map(|spans| LayoutLine { spans })
                .collect(),
        )
    }

    #[test]
    fn splits_on_space_run_without_gap() {
        let layout = page(vec![vec![
            span("A", 0.0, 0.0, 10.0, 10.0),
            span("    B", 10.0, 0.0, 40.0, 10.0),
        ]]);
        let chunks = Segmenter::default().segment(&layout);
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[test]
    fn three_spaces_do_not_split() {
        let layout = page(vec![vec![
            span("A", 0.0, 0.0, 10.0, 10.0),
            span("   B", 10.0, 0.0, 40.0, 10.0),
        ]]);
        let chunks = Segmenter::default().segment(&layout);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A   B");
    }

    #[test]
    fn gap_threshold_is_strict() {
        let wide = page(vec![vec![
            span("Name", 0.0, 0.0, 40.0, 10.0),
            span("Alice", 71.0, 0.0, 100.0, 10.0),
        ]]);
        assert_eq!(Segmenter::default().segment(&wide).len(), 2);

        let narrow = page(vec![vec![
            span("Name", 0.0, 0.0, 40.0, 10.0),
            span("Alice", 69.0, 0.0, 100.0, 10.0),
        ]]);
        let merged = Segmenter::default().segment(&narrow);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "NameAlice");
    }

    #[test]
    fn chunk_bbox_is_envelope_of_spans() {
        let layout = page(vec![vec![
            span("Rua ", 10.0, 4.0, 30.0, 12.0),
            span("das ", 31.0, 2.0, 50.0, 11.0),
            span("Flores", 52.0, 3.0, 80.0, 14.0),
        ]]);
        let chunks = Segmenter::default().segment(&layout);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Rua das Flores");
        assert_eq!(chunks[0].bbox, BoundingBox::new(10.0, 2.0, 80.0, 14.0));
    }

    #[test]
    fn blank_chunks_and_empty_lines_are_dropped() {
        let layout = page(vec![
            vec![],
            vec![
                span("   ", 0.0, 0.0, 10.0, 10.0),
                span("Total", 200.0, 0.0, 240.0, 10.0),
            ],
        ]);
        let chunks = Segmenter::default().segment(&layout);
        assert_eq!(chunks, vec![TextChunk::new(
            "Total",
            BoundingBox::new(200.0, 0.0, 240.0, 10.0)
        )]);
    }

    #[test]
    fn lines_keep_document_order() {
        let layout = page(vec![
            vec![
                span("Nome", 0.0, 0.0, 30.0, 10.0),
                span("Maria", 100.0, 0.0, 140.0, 10.0),
            ],
            vec![span("Inscrição", 0.0, 20.0, 50.0, 30.0)],
        ]);
        let texts: Vec<_> = Segmenter::default()
            .segment(&layout)
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["Nome", "Maria", "Inscrição"]);
    }

    #[test]
    fn custom_thresholds_apply() {
        let segmenter = Segmenter::new(SegmenterConfig {
            x_gap_thresh: 5.0,
            space_thresh: 1,
        });
        let layout = page(vec![vec![
            span("a", 0.0, 0.0, 5.0, 5.0),
            span("b", 8.0, 0.0, 12.0, 5.0),
            span("  c", 12.0, 0.0, 20.0, 5.0),
        ]]);
        let texts: Vec<_> = segmenter
            .segment(&layout)
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["ab", "c"]);
    }
}
