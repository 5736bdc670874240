use anyhow::Result;
use bson::Document;

use crate::model::QuerySpec;

/// Read access to the collections of one database
#[async_trait::async_trait]
pub trait CollectionStore: Send + Sync {
    /// Names of the collections currently in the database
    async fn list_collections(&self) -> Result<Vec<String>>;
    /// Number of documents matching `filter`; an unknown collection counts as empty
    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64>;
    /// One document in default cursor order, `_id` included
    async fn sample_document(&self, collection: &str) -> Result<Option<Document>>;
    /// Filtered, sorted and paginated documents with `_id` projected out
    async fn find_documents(&self, spec: &QuerySpec) -> Result<Vec<Document>>;
    /// Every document of the collection with `_id` projected out
    async fn export_documents(&self, collection: &str) -> Result<Vec<Document>>;
}

/// Server-side aggregation pipelines
#[async_trait::async_trait]
pub trait AggregateStore: Send + Sync {
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>>;
}

/// Connectivity probe for the health endpoint
#[async_trait::async_trait]
pub trait HealthStore: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

pub trait Store: CollectionStore + AggregateStore + HealthStore + Send + Sync {}

impl<T: CollectionStore + AggregateStore + HealthStore + Send + Sync> Store for T {}
