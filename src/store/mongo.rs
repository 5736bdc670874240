use anyhow::{Context, Result};
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::{Client, Collection, Database};

use crate::model::QuerySpec;
use crate::store::traits::{AggregateStore, CollectionStore, HealthStore};

/// Gateway store backed by a MongoDB database
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Build a client for `uri` and select `db_name`.
    ///
    /// The driver connects lazily, so this only fails on a malformed URI.
    /// Call [`HealthStore::ping`] to confirm the server is reachable.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(with_selection_timeout(uri))
            .await
            .context("Failed to create MongoDB client")?;

        Ok(Self {
            database: client.database(db_name),
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

/// Cap server selection so an unreachable server fails within seconds
fn with_selection_timeout(uri: &str) -> String {
    if uri.contains("serverSelectionTimeoutMS") {
        return uri.to_string();
    }
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!(
        "{}{}serverSelectionTimeoutMS=3000&connectTimeoutMS=3000",
        uri, separator
    )
}

fn without_id() -> Document {
    doc! { "_id": 0 }
}

#[async_trait::async_trait]
impl CollectionStore for MongoStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.database.list_collection_names().await?)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64> {
        Ok(self.collection(collection).count_documents(filter).await?)
    }

    async fn sample_document(&self, collection: &str) -> Result<Option<Document>> {
        Ok(self.collection(collection).find_one(doc! {}).await?)
    }

    async fn find_documents(&self, spec: &QuerySpec) -> Result<Vec<Document>> {
        let collection = self.collection(&spec.collection);
        let mut find = collection.find(spec.filter.clone()).projection(without_id());

        if !spec.sort.is_empty() {
            find = find.sort(spec.sort.clone());
        }

        let cursor = find.skip(spec.skip).limit(spec.limit).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn export_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .projection(without_id())
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait::async_trait]
impl AggregateStore for MongoStore {
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let cursor = self.collection(collection).aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait::async_trait]
impl HealthStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_timeout_is_appended_once() {
        assert_eq!(
            with_selection_timeout("mongodb://localhost:27017"),
            "mongodb://localhost:27017?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000"
        );
        assert_eq!(
            with_selection_timeout("mongodb://db:27017/?replicaSet=rs0"),
            "mongodb://db:27017/?replicaSet=rs0&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000"
        );

        let explicit = "mongodb://db:27017/?serverSelectionTimeoutMS=500";
        assert_eq!(with_selection_timeout(explicit), explicit);
    }
}
