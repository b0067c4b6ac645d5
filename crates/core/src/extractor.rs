use serde_json::{Map, Value};

use crate::error::{ExtractError, ResponseParseError};
use crate::geometry::BoundingBox;
use crate::schema::{ExtractionResult, FieldValue, Schema};
use crate::segment::TextChunk;

/// The expensive, model-backed field extractor.
///
/// Implementations must bound their own latency and report a timeout as
/// [`ExtractError::Timeout`]; the controller treats every error the same way.
pub trait FieldExtractor: Send + Sync {
    fn extract(
        &self,
        label: &str,
        schema: &Schema,
        chunks: &[TextChunk],
    ) -> Result<ExtractionResult, ExtractError>;
}

impl<T: FieldExtractor + ?Sized> FieldExtractor for &T {
    fn extract(
        &self,
        label: &str,
        schema: &Schema,
        chunks: &[TextChunk],
    ) -> Result<ExtractionResult, ExtractError> {
        (**self).extract(label, schema, chunks)
    }
}

impl<T: FieldExtractor + ?Sized> FieldExtractor for Box<T> {
    fn extract(
        &self,
        label: &str,
        schema: &Schema,
        chunks: &[TextChunk],
    ) -> Result<ExtractionResult, ExtractError> {
        (**self).extract(label, schema, chunks)
    }
}

const SNIPPET_CHARS: usize = 120;

/// Parses a model reply of the form
/// `{"<field>": {"value": ..., "page": n, "bbox": [x0, y0, x1, y1]} | null}`
/// into a result shaped like `schema`. A surrounding Markdown code fence is
/// tolerated; keys outside the schema are ignored.
pub fn parse_field_response(
    content: &str,
    schema: &Schema,
) -> Result<ExtractionResult, ResponseParseError> {
    let body = strip_code_fence(content);
    let value: Value =
        serde_json::from_str(body).map_err(|source| ResponseParseError::InvalidJson {
            source,
            snippet: body.chars().take(SNIPPET_CHARS).collect(),
        })?;
    let object = match value {
        Value::Object(map) => map,
        other => return Err(ResponseParseError::NotAnObject(json_kind(&other))),
    };
    let mut result = ExtractionResult::all_null(schema);
    for field in schema.fields() {
        let parsed = match object.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::Object(entry)) => parse_entry(field, entry)?,
            Some(other) => {
                return Err(invalid(
                    field,
                    format!("expected object or null, got {}", json_kind(other)),
                ))
            }
        };
        result.set(field, parsed);
    }
    Ok(result)
}

fn parse_entry(
    field: &str,
    entry: &Map<String, Value>,
) -> Result<Option<FieldValue>, ResponseParseError> {
    let value = match entry.get("value") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => {
            return Err(invalid(
                field,
                format!("value must be a scalar, got {}", json_kind(other)),
            ))
        }
    };
    let page = match entry.get("page") {
        None | Some(Value::Null) => 1,
        Some(raw) => raw
            .as_u64()
            .and_then(|p| u32::try_from(p).ok())
            .filter(|p| *p > 0)
            .ok_or_else(|| invalid(field, format!("page must be a positive integer, got {raw}")))?,
    };
    let bbox = match entry.get("bbox") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(parse_bbox(raw).ok_or_else(|| {
            invalid(field, format!("bbox must be four numbers, got {raw}"))
        })?),
    };
    Ok(Some(FieldValue { value, page, bbox }))
}

fn parse_bbox(raw: &Value) -> Option<BoundingBox> {
    let coords = raw
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()?;
    match coords.as_slice() {
        [x0, y0, x1, y1] => Some(BoundingBox::new(*x0, *y0, *x1, *y1)),
        _ => None,
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string ("json") on the opening fence line
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid(field: &str, reason: String) -> ResponseParseError {
    ResponseParseError::InvalidField {
        field: field.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        [
            ("nome", "Nome do profissional"),
            ("inscricao", "Número de inscrição"),
            ("situacao", "Situação"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn parses_fenced_response() {
        let content = "```json\n{\"nome\": {\"value\": \" MARIA SILVA \", \"page\": 1, \"bbox\": [10, 20, 110, 32]},\n \"inscricao\": {\"value\": 123456}, \"situacao\": null, \"extra\": 1}\n```";
        let result = parse_field_response(content, &schema()).unwrap();
        let nome = result.get("nome").unwrap();
        assert_eq!(nome.value, "MARIA SILVA");
        assert_eq!(nome.bbox, Some(BoundingBox::new(10.0, 20.0, 110.0, 32.0)));
        let inscricao = result.get("inscricao").unwrap();
        assert_eq!(inscricao.value, "123456");
        assert_eq!(inscricao.page, 1);
        assert!(inscricao.bbox.is_none());
        assert!(result.get("situacao").is_none());
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn missing_fields_become_null() {
        let result = parse_field_response("{}", &schema()).unwrap();
        assert_eq!(result.null_ratio(&schema()), 1.0);
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_field_response("Sorry, I cannot help with that.", &schema()).unwrap_err();
        match err {
            ResponseParseError::InvalidJson { snippet, .. } => {
                assert!(snippet.starts_with("Sorry"))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_non_object_root() {
        let err = parse_field_response("[1, 2]", &schema()).unwrap_err();
        assert!(matches!(err, ResponseParseError::NotAnObject("array")));
    }

    #[test]
    fn rejects_malformed_bbox() {
        let err = parse_field_response(
            r#"{"nome": {"value": "X", "bbox": [1, 2, 3]}}"#,
            &schema(),
        )
        .unwrap_err();
        assert!(matches!(err, ResponseParseError::InvalidField { ref field, .. } if field == "nome"));
    }

    #[test]
    fn parses_single_line_fence() {
        for content in [
            r#"```{"nome": {"value": "X"}}```"#,
            r#"```json{"nome": {"value": "X"}}```"#,
        ] {
            let result = parse_field_response(content, &schema()).unwrap();
            assert_eq!(result.get("nome").unwrap().value, "X", "{content}");
        }
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let result = parse_field_response(
            r#"{"nome": {"value": "   "}, "inscricao": {"value": "42"}}"#,
            &schema(),
        )
        .unwrap();
        assert!(result.get("nome").is_none());
        assert!((result.null_ratio(&schema()) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_page_zero() {
        let err = parse_field_response(r#"{"nome": {"value": "X", "page": 0}}"#, &schema())
            .unwrap_err();
        assert!(matches!(err, ResponseParseError::InvalidField { ref field, .. } if field == "nome"));
    }
}
