use anyhow::{bail, Result};
use bson::{oid::ObjectId, Document};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::logic::document_filter::{matches, sort_documents};
use crate::logic::pipeline::run_pipeline;
use crate::model::{QuerySpec, WRITE_STAGES};
use crate::store::traits::{AggregateStore, CollectionStore, HealthStore};

/// Collections held in process memory, for local development and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append documents to a collection, creating it if needed.
    ///
    /// Documents without an `_id` get a fresh ObjectId.
    pub fn insert_many(&self, collection: &str, documents: impl IntoIterator<Item = Document>) -> usize {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();

        let before = stored.len();
        stored.extend(documents.into_iter().map(|mut document| {
            if !document.contains_key("_id") {
                document.insert("_id", ObjectId::new());
            }
            document
        }));
        stored.len() - before
    }

    /// Create an empty collection so that it shows up in listings
    pub fn create_collection(&self, collection: &str) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn filtered(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut selected = Vec::new();
        for document in documents {
            if matches(document, filter)? {
                selected.push(document.clone());
            }
        }
        Ok(selected)
    }
}

fn strip_id(mut document: Document) -> Document {
    document.remove("_id");
    document
}

#[async_trait::async_trait]
impl CollectionStore for MemoryStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64> {
        Ok(self.filtered(collection, &filter)?.len() as u64)
    }

    async fn sample_document(&self, collection: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|documents| documents.first().cloned()))
    }

    async fn find_documents(&self, spec: &QuerySpec) -> Result<Vec<Document>> {
        let mut documents = self.filtered(&spec.collection, &spec.filter)?;

        if !spec.sort.is_empty() {
            sort_documents(&mut documents, &spec.sort)?;
        }

        let page = documents
            .into_iter()
            .skip(spec.skip as usize)
            .take(spec.row_cap().unwrap_or(usize::MAX))
            .map(strip_id)
            .collect();
        Ok(page)
    }

    async fn export_documents(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self.snapshot(collection).into_iter().map(strip_id).collect())
    }
}

#[async_trait::async_trait]
impl AggregateStore for MemoryStore {
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        if let Some(stage) = pipeline
            .iter()
            .flat_map(|stage| stage.keys())
            .find(|name| WRITE_STAGES.contains(&name.as_str()))
        {
            bail!("{} is not supported by the memory store", stage);
        }

        run_pipeline(self.snapshot(collection), &pipeline)
    }
}

#[async_trait::async_trait]
impl HealthStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
