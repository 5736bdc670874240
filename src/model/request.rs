use bson::Document;
use serde::Deserialize;
use serde_json::Value;

use crate::model::normalize::{normalize_document, normalize_pipeline, NormalizeError, SpecField};

/// Stages that write to another collection
pub const WRITE_STAGES: &[&str] = &["$out", "$merge"];

/// Body of `POST /api/query`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub collection: Option<String>,
    pub query: Option<Value>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub sort: Option<Value>,
}

/// Body of `POST /api/aggregate`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateRequest {
    pub collection: Option<String>,
    pub pipeline: Option<Value>,
}

/// A normalized find request
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub collection: String,
    pub filter: Document,
    pub sort: Document,
    /// Driver semantics: 0 means unbounded, a negative value is taken by magnitude
    pub limit: i64,
    pub skip: u64,
}

/// A normalized aggregation request
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub collection: String,
    pub pipeline: Vec<Document>,
}

fn require_collection(collection: Option<String>) -> Result<String, NormalizeError> {
    collection.ok_or(NormalizeError::MissingCollection)
}

impl QuerySpec {
    pub fn from_request(request: QueryRequest, default_limit: i64) -> Result<Self, NormalizeError> {
        let collection = require_collection(request.collection)?;
        let filter = normalize_document(SpecField::Query, request.query.as_ref())?;
        let sort = normalize_document(SpecField::Sort, request.sort.as_ref())?;

        let skip = match request.skip {
            Some(skip) if skip < 0 => return Err(NormalizeError::NegativeSkip(skip)),
            Some(skip) => skip as u64,
            None => 0,
        };

        Ok(Self {
            collection,
            filter,
            sort,
            limit: request.limit.unwrap_or(default_limit),
            skip,
        })
    }

    /// The limit as a row cap, `None` when unbounded
    pub fn row_cap(&self) -> Option<usize> {
        match self.limit {
            0 => None,
            limit => Some(limit.unsigned_abs() as usize),
        }
    }
}

impl AggregateSpec {
    pub fn from_request(
        request: AggregateRequest,
        allow_write_stages: bool,
    ) -> Result<Self, NormalizeError> {
        let collection = require_collection(request.collection)?;
        let pipeline = normalize_pipeline(request.pipeline.as_ref())?;

        if !allow_write_stages {
            if let Some(stage) = pipeline
                .iter()
                .flat_map(|stage| stage.keys())
                .find(|name| WRITE_STAGES.contains(&name.as_str()))
            {
                return Err(NormalizeError::ForbiddenStage(stage.clone()));
            }
        }

        Ok(Self {
            collection,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Bson};
    use serde_json::json;

    fn query_request(body: Value) -> QueryRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn defaults_apply_when_pagination_is_omitted() {
        let spec = QuerySpec::from_request(query_request(json!({"collection": "orders"})), 50).unwrap();
        assert_eq!(spec.collection, "orders");
        assert!(spec.filter.is_empty());
        assert!(spec.sort.is_empty());
        assert_eq!(spec.limit, 50);
        assert_eq!(spec.skip, 0);
        assert_eq!(spec.row_cap(), Some(50));
    }

    #[test]
    fn string_encoded_query_and_sort_are_parsed() {
        let request = query_request(json!({
            "collection": "jobs",
            "query": "{\"city\": \"Pune\"}",
            "sort": "{\"created_at\": -1}",
            "limit": 10,
            "skip": 20
        }));
        let spec = QuerySpec::from_request(request, 50).unwrap();
        assert_eq!(spec.filter, doc! {"city": "Pune"});
        assert!(matches!(
            spec.sort.get("created_at"),
            Some(Bson::Int32(-1)) | Some(Bson::Int64(-1))
        ));
        assert_eq!(spec.limit, 10);
        assert_eq!(spec.skip, 20);
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let request = query_request(json!({"collection": "jobs", "limit": 0}));
        let spec = QuerySpec::from_request(request, 50).unwrap();
        assert_eq!(spec.row_cap(), None);

        let request = query_request(json!({"collection": "jobs", "limit": -3}));
        let spec = QuerySpec::from_request(request, 50).unwrap();
        assert_eq!(spec.row_cap(), Some(3));
    }

    #[test]
    fn missing_collection_and_negative_skip_are_rejected() {
        let err = QuerySpec::from_request(query_request(json!({})), 50).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingCollection));

        let request = query_request(json!({"collection": "jobs", "skip": -1}));
        let err = QuerySpec::from_request(request, 50).unwrap_err();
        assert!(matches!(err, NormalizeError::NegativeSkip(-1)));
    }

    #[test]
    fn write_stages_follow_the_configured_policy() {
        let request = AggregateRequest {
            collection: Some("orders".to_string()),
            pipeline: Some(json!([{"$match": {}}, {"$out": "orders_copy"}])),
        };

        let spec = AggregateSpec::from_request(request.clone(), true).unwrap();
        assert_eq!(spec.pipeline.len(), 2);

        let err = AggregateSpec::from_request(request, false).unwrap_err();
        assert_eq!(err.to_string(), "pipeline stage $out is not permitted");
    }
}
