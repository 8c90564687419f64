//! Normalization of evaluator output into validated records.
//!
//! The evaluator is a language model and its output shape is not stable: it
//! may hand back one record, a container of records, or a loose key/value map
//! with camelCase keys and stringly-typed numbers. Each shape is a variant of
//! [`EvaluationOutput`] with its own normalization function. Malformed
//! candidates are logged and dropped; they never fail the batch.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use paperscout_shared::{EvaluationRecord, PaperScoutError, Result};

// ---------------------------------------------------------------------------
// Input shapes
// ---------------------------------------------------------------------------

/// One evaluator-stage output.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutput {
    /// Already a typed record.
    SingleRecord(EvaluationRecord),
    /// A batch of candidates, in evaluator order.
    RecordContainer { items: Vec<Candidate> },
    /// A loose mapping that still needs coercion.
    UntypedMapping(Map<String, Value>),
}

/// A single entry of a [`EvaluationOutput::RecordContainer`].
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Typed(EvaluationRecord),
    Untyped(Map<String, Value>),
}

impl From<EvaluationRecord> for EvaluationOutput {
    fn from(record: EvaluationRecord) -> Self {
        Self::SingleRecord(record)
    }
}

impl EvaluationOutput {
    /// Classify a raw JSON value.
    ///
    /// `null` is absent input and yields `Ok(None)`. Objects with an `items`
    /// array and top-level arrays become containers; other objects become a
    /// typed record when they deserialize as a well-formed one, otherwise an
    /// untyped mapping. Scalars are an unrecognized shape.
    pub fn from_json(value: Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(Some(Self::container(items))),
            Value::Object(mut map) => {
                if let Some(Value::Array(items)) = map.get_mut("items") {
                    return Ok(Some(Self::container(std::mem::take(items))));
                }
                Ok(Some(match typed_record(&map) {
                    Some(record) => Self::SingleRecord(record),
                    None => Self::UntypedMapping(map),
                }))
            }
            other => Err(PaperScoutError::extraction(format!(
                "unrecognized evaluator output: expected object or array, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Classify evaluator text (a model reply).
    ///
    /// Blank text is absent input. Markdown code fences are stripped; if the
    /// text is not JSON as a whole, the outermost `{...}` or `[...]` span is
    /// tried before giving up.
    pub fn from_text(text: &str) -> Result<Option<Self>> {
        let body = strip_code_fence(text.trim());
        if body.is_empty() {
            return Ok(None);
        }

        let value = match serde_json::from_str::<Value>(body) {
            Ok(value) => value,
            Err(first_err) => embedded_json(body).ok_or_else(|| {
                PaperScoutError::extraction(format!(
                    "unrecognized evaluator output: not JSON ({first_err})"
                ))
            })?,
        };
        Self::from_json(value)
    }

    /// Number of candidates this output carries.
    pub fn len(&self) -> usize {
        match self {
            Self::RecordContainer { items } => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn container(items: Vec<Value>) -> Self {
        let items = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match item {
                Value::Object(map) => Some(match typed_record(&map) {
                    Some(record) => Candidate::Typed(record),
                    None => Candidate::Untyped(map),
                }),
                other => {
                    warn!(index, kind = json_kind(&other), "dropping non-object candidate");
                    None
                }
            })
            .collect();
        Self::RecordContainer { items }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Normalize one evaluator output into validated records, in input order.
///
/// Absent input yields an empty sequence.
pub fn extract(output: Option<&EvaluationOutput>) -> Vec<EvaluationRecord> {
    match output {
        None => Vec::new(),
        Some(EvaluationOutput::SingleRecord(record)) => {
            normalize_single(record).into_iter().collect()
        }
        Some(EvaluationOutput::RecordContainer { items }) => normalize_container(items),
        Some(EvaluationOutput::UntypedMapping(map)) => normalize_mapping(map).into_iter().collect(),
    }
}

/// [`extract`] over several outputs, concatenated in order.
pub fn extract_all(outputs: &[EvaluationOutput]) -> Vec<EvaluationRecord> {
    let records: Vec<_> = outputs.iter().flat_map(|o| extract(Some(o))).collect();
    debug!(outputs = outputs.len(), records = records.len(), "extraction complete");
    records
}

fn normalize_single(record: &EvaluationRecord) -> Option<EvaluationRecord> {
    let record = trimmed(record.clone());
    match record.validate() {
        Ok(()) => Some(record),
        Err(e) => {
            warn!(id = %record.id, error = %e, "dropping malformed record");
            None
        }
    }
}

fn normalize_container(items: &[Candidate]) -> Vec<EvaluationRecord> {
    items
        .iter()
        .filter_map(|item| match item {
            Candidate::Typed(record) => normalize_single(record),
            Candidate::Untyped(map) => normalize_mapping(map),
        })
        .collect()
}

fn normalize_mapping(map: &Map<String, Value>) -> Option<EvaluationRecord> {
    match coerce_mapping(map) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "dropping candidate that failed coercion");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

const SCORE_KEYS: &[&str] = &["relevance_score", "relevanceScore", "score"];
const RELEVANT_KEYS: &[&str] = &["is_relevant", "isRelevant", "relevant"];

/// Build a record from a loose mapping.
pub fn coerce_mapping(map: &Map<String, Value>) -> Result<EvaluationRecord> {
    let id = string_field(map, "id")?;
    let summary = string_field(map, "summary")?;

    let score_value = first_present(map, SCORE_KEYS)
        .ok_or_else(|| missing(&id, "relevance_score"))?;
    let relevance_score = coerce_score(score_value).ok_or_else(|| {
        PaperScoutError::validation(format!("relevance_score {score_value} is not an integer 0..=10 (id {id})"))
    })?;

    let relevant_value =
        first_present(map, RELEVANT_KEYS).ok_or_else(|| missing(&id, "is_relevant"))?;
    let is_relevant = coerce_bool(relevant_value).ok_or_else(|| {
        PaperScoutError::validation(format!("is_relevant {relevant_value} is not a boolean (id {id})"))
    })?;

    EvaluationRecord::new(id, relevance_score, is_relevant, summary)
}

fn string_field(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(PaperScoutError::validation(format!("{key} is empty"))),
        Some(other) => Err(PaperScoutError::validation(format!(
            "{key} must be a string, got {}",
            json_kind(other)
        ))),
        None => Err(PaperScoutError::validation(format!("{key} is missing"))),
    }
}

fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

fn missing(id: &str, field: &str) -> PaperScoutError {
    PaperScoutError::validation(format!("{field} is missing (id {id})"))
}

fn coerce_score(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => match n.as_u64() {
            Some(n) => n as f64,
            None => n.as_f64()?,
        },
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(&n)).then_some(n as u8)
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Strict deserialization; only well-formed records count as typed.
fn typed_record(map: &Map<String, Value>) -> Option<EvaluationRecord> {
    let record: EvaluationRecord = serde_json::from_value(Value::Object(map.clone())).ok()?;
    let record = trimmed(record);
    record.validate().ok().map(|()| record)
}

/// Same whitespace handling as [`string_field`] on the coerced path.
fn trimmed(mut record: EvaluationRecord) -> EvaluationRecord {
    record.id = record.id.trim().to_string();
    record.summary = record.summary.trim().to_string();
    record
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (```json) up to the first newline.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn embedded_json(text: &str) -> Option<Value> {
    [('{', '}'), ('[', ']')].iter().find_map(|(open, close)| {
        let start = text.find(*open)?;
        let end = text.rfind(*close)?;
        (end > start)
            .then(|| serde_json::from_str(&text[start..=end]).ok())
            .flatten()
    })
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, score: u8) -> EvaluationRecord {
        EvaluationRecord::new(id, score, true, "summary").unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn absent_input_is_empty() {
        assert!(extract(None).is_empty());
        assert!(EvaluationOutput::from_json(Value::Null).unwrap().is_none());
        assert!(EvaluationOutput::from_text("   \n").unwrap().is_none());
    }

    #[test]
    fn typed_and_coerced_paths_trim_alike() {
        let strict = EvaluationOutput::from_json(json!({
            "id": " A ", "relevance_score": 5, "is_relevant": true, "summary": "  s \n"
        }))
        .unwrap()
        .unwrap();
        let loose = EvaluationOutput::from_json(json!({
            "id": " A ", "relevanceScore": 5, "is_relevant": true, "summary": "  s \n"
        }))
        .unwrap()
        .unwrap();
        assert!(matches!(strict, EvaluationOutput::SingleRecord(_)));
        assert!(matches!(loose, EvaluationOutput::UntypedMapping(_)));

        let expected = vec![EvaluationRecord::new("A", 5, true, "s").unwrap()];
        assert_eq!(extract(Some(&strict)), expected);
        assert_eq!(extract(Some(&loose)), expected);

        let built = EvaluationOutput::SingleRecord(EvaluationRecord {
            id: "A\t".into(),
            relevance_score: 5,
            is_relevant: true,
            summary: " s".into(),
        });
        assert_eq!(extract(Some(&built)), expected);
    }

    #[test]
    fn single_record_yields_one() {
        let out = EvaluationOutput::from(record("A", 9));
        assert_eq!(extract(Some(&out)), vec![record("A", 9)]);
    }

    #[test]
    fn malformed_single_record_is_dropped() {
        let out = EvaluationOutput::SingleRecord(EvaluationRecord {
            id: "A".into(),
            relevance_score: 42,
            is_relevant: true,
            summary: "s".into(),
        });
        assert!(extract(Some(&out)).is_empty());
    }

    #[test]
    fn partial_batch_keeps_good_items() {
        let value = json!({
            "items": [
                {"id": "A", "relevance_score": 9, "is_relevant": true, "summary": "a"},
                {"id": "B", "relevance_score": 6, "is_relevant": true},
                {"id": "C", "relevance_score": 7, "is_relevant": false, "summary": "c"}
            ]
        });
        let out = EvaluationOutput::from_json(value).unwrap().unwrap();
        assert_eq!(out.len(), 3);

        let records = extract(Some(&out));
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
    }

    #[test]
    fn container_preserves_order_across_variants() {
        let out = EvaluationOutput::RecordContainer {
            items: vec![
                Candidate::Untyped(object(json!({
                    "id": "Z", "relevanceScore": "8", "isRelevant": "true", "summary": " z "
                }))),
                Candidate::Typed(record("Y", 2)),
                Candidate::Typed(record("X", 5)),
            ],
        };
        let records = extract(Some(&out));
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["Z", "Y", "X"]);
        assert_eq!(records[0].summary, "z");
        assert_eq!(records[0].relevance_score, 8);
    }

    #[test]
    fn empty_container_is_empty() {
        let out = EvaluationOutput::from_json(json!({"items": []})).unwrap().unwrap();
        assert!(out.is_empty());
        assert!(extract(Some(&out)).is_empty());
    }

    #[test]
    fn top_level_array_is_container() {
        let out = EvaluationOutput::from_json(json!([
            {"id": "A", "relevance_score": 3, "is_relevant": true, "summary": "a"},
            "garbage",
            {"id": "B", "score": 7.0, "relevant": true, "summary": "b"}
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(out.len(), 2);
        let records = extract(Some(&out));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].relevance_score, 7);
    }

    #[test]
    fn strict_object_becomes_single_record() {
        let out = EvaluationOutput::from_json(json!({
            "id": "A", "relevance_score": 4, "is_relevant": false, "summary": "a"
        }))
        .unwrap()
        .unwrap();
        assert!(matches!(out, EvaluationOutput::SingleRecord(_)));
    }

    #[test]
    fn loose_object_becomes_mapping() {
        let out = EvaluationOutput::from_json(json!({
            "id": "A", "relevanceScore": 4, "isRelevant": false, "summary": "a"
        }))
        .unwrap()
        .unwrap();
        assert!(matches!(out, EvaluationOutput::UntypedMapping(_)));
        assert_eq!(extract(Some(&out)).len(), 1);
    }

    #[test]
    fn scalar_is_unrecognized_shape() {
        for value in [json!("text"), json!(7), json!(true)] {
            let err = EvaluationOutput::from_json(value).unwrap_err();
            assert!(matches!(err, PaperScoutError::Extraction { .. }));
        }
    }

    #[test]
    fn coercion_rejects_bad_fields() {
        let cases = [
            json!({"relevance_score": 5, "is_relevant": true, "summary": "s"}),
            json!({"id": "A", "relevance_score": 11, "is_relevant": true, "summary": "s"}),
            json!({"id": "A", "relevance_score": 6.5, "is_relevant": true, "summary": "s"}),
            json!({"id": "A", "relevance_score": -1, "is_relevant": true, "summary": "s"}),
            json!({"id": "A", "relevance_score": "high", "is_relevant": true, "summary": "s"}),
            json!({"id": "A", "relevance_score": 5, "is_relevant": "maybe", "summary": "s"}),
            json!({"id": "A", "relevance_score": 5, "summary": "s"}),
            json!({"id": 2301.0001, "relevance_score": 5, "is_relevant": true, "summary": "s"}),
            json!({"id": "A", "relevance_score": 5, "is_relevant": true, "summary": "  "}),
        ];
        for case in cases {
            assert!(coerce_mapping(&object(case.clone())).is_err(), "accepted {case}");
        }
    }

    #[test]
    fn coercion_accepts_lenient_forms() {
        let record = coerce_mapping(&object(json!({
            "id": " 2301.0001 ", "score": " 10 ", "is_relevant": "FALSE", "summary": "ok"
        })))
        .unwrap();
        assert_eq!(record.id, "2301.0001");
        assert_eq!(record.relevance_score, 10);
        assert!(!record.is_relevant);
    }

    #[test]
    fn from_text_strips_code_fence() {
        let text = "```json\n{\"id\": \"A\", \"relevance_score\": 8, \"is_relevant\": true, \"summary\": \"a\"}\n```";
        let out = EvaluationOutput::from_text(text).unwrap().unwrap();
        assert_eq!(extract(Some(&out)), vec![EvaluationRecord::new("A", 8, true, "a").unwrap()]);
    }

    #[test]
    fn from_text_finds_embedded_object() {
        let text = "Final Answer: {\"id\": \"A\", \"relevance_score\": 2, \"is_relevant\": false, \"summary\": \"off topic\"} Thanks!";
        let out = EvaluationOutput::from_text(text).unwrap().unwrap();
        assert_eq!(extract(Some(&out)).len(), 1);
    }

    #[test]
    fn from_text_rejects_prose() {
        let err = EvaluationOutput::from_text("I could not find any papers.").unwrap_err();
        assert!(err.to_string().contains("unrecognized evaluator output"));
    }

    #[test]
    fn extract_all_concatenates_in_order() {
        let outputs = vec![
            EvaluationOutput::from(record("A", 1)),
            EvaluationOutput::RecordContainer { items: vec![] },
            EvaluationOutput::from(record("B", 2)),
        ];
        let ids: Vec<_> = extract_all(&outputs).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
