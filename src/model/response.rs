use bson::{Bson, Document};
use serde::Serialize;
use serde_json::Value;

/// Render a stored document as relaxed Extended JSON
pub fn document_to_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

pub fn documents_to_json(documents: Vec<Document>) -> Vec<Value> {
    documents.into_iter().map(document_to_json).collect()
}

#[derive(Debug, Serialize)]
pub struct CollectionStats {
    pub count: u64,
    pub sample: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<Value>,
    /// Documents matching the filter, ignoring skip and limit
    pub total: u64,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub results: Vec<Value>,
    pub count: usize,
}

impl QueryResponse {
    pub fn new(documents: Vec<Document>, total: u64) -> Self {
        let results = documents_to_json(documents);
        let count = results.len();
        Self {
            results,
            total,
            count,
        }
    }
}

impl AggregateResponse {
    pub fn new(documents: Vec<Document>) -> Self {
        let results = documents_to_json(documents);
        let count = results.len();
        Self { results, count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use serde_json::json;

    #[test]
    fn object_ids_render_as_extended_json() {
        let id = ObjectId::parse_str("65a1f0c2e4b0a1b2c3d4e5f6").unwrap();
        let value = document_to_json(doc! {"_id": id, "name": "Asha", "age": 29});
        assert_eq!(
            value,
            json!({"_id": {"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"}, "name": "Asha", "age": 29})
        );
    }

    #[test]
    fn count_tracks_results() {
        let response = QueryResponse::new(vec![doc! {"a": 1}, doc! {"a": 2}], 10);
        assert_eq!(response.count, 2);
        assert_eq!(response.total, 10);
    }
}
