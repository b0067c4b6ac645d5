mod calibration;
mod context;
mod controller;
mod error;
mod extractor;
mod geometry;
mod matcher;
mod memory;
mod schema;
mod segment;
mod store;

pub use calibration::{nearest_to, CalibrationDatabase, CalibrationEntry, MeanPolicy};
pub use context::keyword_context;
pub use controller::{
    ControllerConfig, Extraction, ExtractionController, ExtractionSource, Phase,
};
pub use error::{CoreError, ExtractError, ResponseParseError, Result};
pub use extractor::{parse_field_response, FieldExtractor};
pub use geometry::{BoundingBox, Center};
pub use matcher::{Direction, ProximityMatch, ProximityMatcher, Tolerance};
pub use memory::{ExtractionMemory, FieldMemory, LabelMemory};
pub use schema::{ExtractionResult, FieldValue, Schema};
pub use segment::{LayoutLine, PageLayout, Segmenter, SegmenterConfig, Span, TextChunk};
pub use store::{load_memory, save_memory, CalibrationStore, JsonFileStore, MemoryStore};
