//! Qdrant-backed index, one collection per source tree.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, GetPointsBuilder, PointId,
    PointStruct, PointsIdsList, QuantizationType, ScalarQuantizationBuilder, UpsertPointsBuilder,
    Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};
use uuid::Uuid;

use super::{IndexEntry, VectorIndex};
use crate::embeddings::EmbeddingProvider;
use crate::state::TreeId;

/// Configuration for connecting to Qdrant.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Qdrant server URL
    pub url: String,

    /// API key (optional)
    pub api_key: Option<String>,

    /// Prefix prepended to the tree id to form the collection name
    pub collection_prefix: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection_prefix: "treesync_".to_string(),
        }
    }
}

/// Qdrant point id for a chunk identity.
///
/// Qdrant only accepts integers and UUIDs, so the chunk identity is mapped
/// through a name-based UUID; the same chunk always lands on the same point.
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

/// [`VectorIndex`] stored in a Qdrant collection.
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection_name: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl QdrantVectorIndex {
    pub fn connect(
        config: &QdrantConfig,
        tree: &TreeId,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url).skip_compatibility_check();

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder.build().context("Failed to connect to Qdrant")?;

        info!("Connected to Qdrant at {}", config.url);

        Ok(Self {
            client,
            collection_name: format!("{}{}", config.collection_prefix, tree),
            embedder,
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            debug!("No points to upsert");
            return Ok(());
        }

        let texts: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let points = build_points(entries, vectors)?;

        debug!("Upserting {} points", points.len());

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await
            .context("Failed to upsert points")?;

        Ok(())
    }
}

/// Pair each entry with its vector. Fails when the counts differ.
fn build_points(entries: Vec<IndexEntry>, vectors: Vec<Vec<f32>>) -> Result<Vec<PointStruct>> {
    if vectors.len() != entries.len() {
        bail!(
            "Embedding provider returned {} vectors for {} texts",
            vectors.len(),
            entries.len()
        );
    }

    Ok(entries
        .into_iter()
        .zip(vectors)
        .map(|(entry, vector)| PointStruct::new(point_id(&entry.id), vector, to_payload(&entry)))
        .collect())
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn exists(&self) -> Result<bool> {
        let collections = self.client.list_collections().await?;
        Ok(collections
            .collections
            .iter()
            .any(|c| c.name == self.collection_name))
    }

    async fn create(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let dimensions = self.embedder.dimensions();
        info!(
            "Creating collection: {} with {} dimensions",
            self.collection_name, dimensions
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine))
                    .quantization_config(
                        ScalarQuantizationBuilder::default()
                            .r#type(QuantizationType::Int8.into())
                            .quantile(0.99)
                            .always_ram(true),
                    ),
            )
            .await
            .context("Failed to create collection")?;

        self.upsert(entries).await
    }

    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.upsert(entries).await
    }

    async fn retract(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(point_id(id))).collect();

        let present = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection_name, point_ids.clone()))
            .await
            .context("Failed to look up points")?
            .result
            .len();

        debug!("Deleting {} points ({} present)", point_ids.len(), present);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .context("Failed to delete points")?;

        Ok(present)
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        info!("Deleting collection: {}", self.collection_name);

        self.client
            .delete_collection(&self.collection_name)
            .await
            .context("Failed to delete collection")?;

        Ok(())
    }
}

/// Flatten entry metadata into a Qdrant payload, keeping the text too.
fn to_payload(entry: &IndexEntry) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("chunk_id".to_string(), Value::from(entry.id.clone()));
    map.insert("text".to_string(), Value::from(entry.text.clone()));

    if let Some(fields) = entry.metadata.as_object() {
        for (key, value) in fields {
            if let Some(v) = json_to_value(value) {
                map.insert(key.clone(), v);
            }
        }
    }
    map
}

fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::from)
            .or_else(|| n.as_f64().map(Value::from)),
        serde_json::Value::String(s) => Some(Value::from(s.clone())),
        serde_json::Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                .collect();
            Some(Value::from(joined.join(", ")))
        }
        serde_json::Value::Object(_) => Some(Value::from(value.to_string())),
    }
}
