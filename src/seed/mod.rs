use anyhow::{bail, Context, Result};
use bson::{Bson, Document};
use serde_json::Value;
use std::path::Path;

use crate::store::MemoryStore;

/// Parse a seed file body: a JSON object of `collection -> [documents]`,
/// documents in Extended JSON.
pub fn parse_seed(text: &str) -> Result<Vec<(String, Vec<Document>)>> {
    let root: Value = serde_json::from_str(text).context("Seed file is not valid JSON")?;
    let Value::Object(collections) = root else {
        bail!("Seed file must be an object keyed by collection name");
    };

    let mut parsed = Vec::with_capacity(collections.len());
    for (name, documents) in collections {
        let Value::Array(documents) = documents else {
            bail!("Seed collection '{}' must be an array of documents", name);
        };

        let mut converted = Vec::with_capacity(documents.len());
        for (index, document) in documents.into_iter().enumerate() {
            match Bson::try_from(document) {
                Ok(Bson::Document(document)) => converted.push(document),
                Ok(_) => bail!("Seed entry {}[{}] is not a document", name, index),
                Err(e) => {
                    return Err(e).with_context(|| format!("Seed entry {}[{}] is invalid", name, index))
                }
            }
        }
        parsed.push((name, converted));
    }
    Ok(parsed)
}

/// Load a seed file into the memory store, returning the number of documents inserted
pub fn load_seed_file(store: &MemoryStore, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;

    let mut inserted = 0;
    for (collection, documents) in parse_seed(&text)? {
        if documents.is_empty() {
            store.create_collection(&collection);
        }
        let count = store.insert_many(&collection, documents);
        log::info!("Seeded {} documents into {}", count, collection);
        inserted += count;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CollectionStore;
    use bson::doc;

    #[test]
    fn parses_collections_with_extended_json() {
        let parsed = parse_seed(
            r#"{
                "job_seekers": [{"_id": {"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"}, "name": "Ravi"}],
                "vendors": []
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.len(), 2);
        let (name, documents) = &parsed[0];
        assert_eq!(name, "job_seekers");
        assert!(documents[0].get_object_id("_id").is_ok());
    }

    #[test]
    fn rejects_non_document_entries() {
        assert!(parse_seed(r#"{"jobs": [1, 2]}"#).is_err());
        assert!(parse_seed(r#"{"jobs": {"title": "x"}}"#).is_err());
        assert!(parse_seed(r#"[]"#).is_err());
    }

    #[tokio::test]
    async fn loads_file_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"{"jobs": [{"title": "Welder"}, {"title": "Fitter"}], "enterprises": []}"#,
        )
        .unwrap();

        let store = MemoryStore::new();
        assert_eq!(load_seed_file(&store, &path).unwrap(), 2);
        assert_eq!(store.count_documents("jobs", doc! {}).await.unwrap(), 2);
        assert_eq!(
            store.list_collections().await.unwrap(),
            vec!["enterprises".to_string(), "jobs".to_string()]
        );
    }
}
