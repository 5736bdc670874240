use bson::{Bson, Document};
use serde_json::Value;
use std::fmt;

/// Which request field a filter, sort or pipeline value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecField {
    Query,
    Sort,
    Pipeline,
}

impl fmt::Display for SpecField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecField::Query => write!(f, "query"),
            SpecField::Sort => write!(f, "sort"),
            SpecField::Pipeline => write!(f, "pipeline"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Invalid JSON {field}: {source}")]
    InvalidJson {
        field: SpecField,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid JSON {field}: expected {expected}")]
    WrongShape {
        field: SpecField,
        expected: &'static str,
    },

    #[error("Invalid {field}: {source}")]
    ExtendedJson {
        field: SpecField,
        #[source]
        source: bson::extjson::de::Error,
    },

    #[error("collection is required")]
    MissingCollection,

    #[error("skip must be a non-negative integer, got {0}")]
    NegativeSkip(i64),

    #[error("pipeline stage {0} is not permitted")]
    ForbiddenStage(String),
}

impl NormalizeError {
    /// Only unparseable filter or sort text is the caller's fault; every other
    /// rejection is reported as a failed operation.
    pub fn is_client_input(&self) -> bool {
        matches!(
            self,
            NormalizeError::InvalidJson {
                field: SpecField::Query | SpecField::Sort,
                ..
            }
        )
    }
}

/// Resolve the string-or-object duality of a request field.
///
/// A non-blank string is parsed as JSON. `null`, a missing field and a blank
/// string all mean "not given".
fn decode(field: SpecField, raw: Option<&Value>) -> Result<Option<Value>, NormalizeError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => serde_json::from_str(text)
            .map(Some)
            .map_err(|source| NormalizeError::InvalidJson { field, source }),
        Some(other) => Ok(Some(other.clone())),
    }
}

fn to_document(field: SpecField, value: Value) -> Result<Document, NormalizeError> {
    if !value.is_object() {
        return Err(NormalizeError::WrongShape {
            field,
            expected: "a JSON object",
        });
    }

    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        // Extended JSON such as {"$oid": ...} at the top level decodes to a scalar
        Ok(_) => Err(NormalizeError::WrongShape {
            field,
            expected: "a JSON object",
        }),
        Err(source) => Err(NormalizeError::ExtendedJson { field, source }),
    }
}

/// Normalize a filter or sort field into a document. Absent means empty.
pub fn normalize_document(field: SpecField, raw: Option<&Value>) -> Result<Document, NormalizeError> {
    match decode(field, raw)? {
        Some(value) => to_document(field, value),
        None => Ok(Document::new()),
    }
}

/// Normalize an aggregation pipeline into its ordered stages. Absent means no stages.
pub fn normalize_pipeline(raw: Option<&Value>) -> Result<Vec<Document>, NormalizeError> {
    let field = SpecField::Pipeline;
    match decode(field, raw)? {
        Some(Value::Array(stages)) => stages
            .into_iter()
            .map(|stage| to_document(field, stage))
            .collect(),
        Some(_) => Err(NormalizeError::WrongShape {
            field,
            expected: "an array of stage objects",
        }),
        None => Ok(Vec::new()),
    }
}
