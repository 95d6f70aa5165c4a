//! Typed document kinds.
//!
//! `modelName` is only the on-disk discriminator. In code every persisted
//! entity is a concrete type implementing [`DocumentKind`], and
//! [`AnyDocument`] is the tagged union used where the kind is only known at
//! runtime (for example when a remote change arrives).

use crate::error::CodecError;
use crate::hash::ContentHash;
use crate::version::ModelVersion;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ulid::Ulid;

/// A document type that can be persisted through the store.
pub trait DocumentKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// On-disk discriminator, written as the envelope's `modelName`.
    const MODEL_NAME: &'static str;
    /// Prefix for generated ids.
    const ID_PREFIX: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Semantic version string of the schema that produced this value.
    fn model_version(&self) -> &str;

    /// Assign a freshly generated id if none is set yet.
    fn ensure_id(&mut self) {
        if self.id().is_empty() {
            self.set_id(generate_id(Self::ID_PREFIX));
        }
    }
}

/// Generate a unique, sortable document id such as `image-01hx...`.
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new().to_string().to_lowercase())
}

fn current_version() -> String {
    ModelVersion::CURRENT.to_string()
}

/// Hash index stored inside [`Metadata`]: model name -> content hash -> owner id.
pub type HashCodes = BTreeMap<String, BTreeMap<String, String>>;

/// The per-store singleton holding user preferences and the dedup index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub id: String,
    #[serde(default = "current_version")]
    pub model_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_opened_grid_id: Option<String>,
    #[serde(default)]
    pub header_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullscreen: Option<bool>,
    #[serde(default)]
    pub hash_codes: HashCodes,
    /// Input device configuration, carried opaquely.
    #[serde(default)]
    pub input_config: serde_json::Value,
    /// Preference fields this build does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            id: generate_id(Self::ID_PREFIX),
            model_version: current_version(),
            last_opened_grid_id: None,
            header_pinned: true,
            locked: None,
            fullscreen: None,
            hash_codes: HashCodes::new(),
            input_config: serde_json::Value::Object(Default::default()),
            extra: serde_json::Map::new(),
        }
    }
}

impl Metadata {
    /// Owner id registered for `hash` under `model_name`, if any.
    pub fn hash_owner(&self, model_name: &str, hash: &ContentHash) -> Option<&str> {
        self.hash_codes
            .get(model_name)
            .and_then(|map| map.get(&hash.to_hex()))
            .map(String::as_str)
    }

    /// Record `owner_id` as the stored copy of content `hash`.
    pub fn register_hash(&mut self, model_name: &str, hash: &ContentHash, owner_id: &str) {
        self.hash_codes
            .entry(model_name.to_string())
            .or_default()
            .insert(hash.to_hex(), owner_id.to_string());
    }

    /// Drop the entry for `hash`; the per-model map is kept even when empty.
    pub fn forget_hash(&mut self, model_name: &str, hash: &ContentHash) -> Option<String> {
        self.hash_codes
            .get_mut(model_name)
            .and_then(|map| map.remove(&hash.to_hex()))
    }

    /// Equality ignoring the id, used to skip no-op metadata writes.
    pub fn same_content(&self, other: &Metadata) -> bool {
        let mut lhs = self.clone();
        lhs.id.clear();
        let mut rhs = other.clone();
        rhs.id.clear();
        lhs == rhs
    }
}

impl DocumentKind for Metadata {
    const MODEL_NAME: &'static str = "MetaData";
    const ID_PREFIX: &'static str = "meta-data";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

/// An image referenced from layout documents, stored once per distinct content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    #[serde(default)]
    pub id: String,
    #[serde(default = "current_version")]
    pub model_version: String,
    /// Base64 data URL of the image.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,
}

impl ImageAsset {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            model_version: current_version(),
            data: data.into(),
            author: None,
            author_url: None,
        }
    }
}

impl DocumentKind for ImageAsset {
    const MODEL_NAME: &'static str = "ImageAsset";
    const ID_PREFIX: &'static str = "image";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

/// An uploaded executable model file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAsset {
    #[serde(default)]
    pub id: String,
    #[serde(default = "current_version")]
    pub model_version: String,
    pub file_name: String,
    pub data_base64: String,
}

impl ModelAsset {
    pub fn new(file_name: impl Into<String>, data_base64: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            model_version: current_version(),
            file_name: file_name.into(),
            data_base64: data_base64.into(),
        }
    }
}

impl DocumentKind for ModelAsset {
    const MODEL_NAME: &'static str = "ModelAsset";
    const ID_PREFIX: &'static str = "model-asset";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

/// A decoded document whose kind is chosen by its `modelName`.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyDocument {
    Metadata(Metadata),
    Image(ImageAsset),
    Model(ModelAsset),
    /// A kind this build does not model; kept as raw JSON.
    Other {
        model_name: String,
        value: serde_json::Value,
    },
}

impl AnyDocument {
    /// Decode plaintext JSON bytes of a document tagged `model_name`.
    pub fn decode(model_name: &str, plaintext: &[u8]) -> Result<Self, CodecError> {
        Ok(match model_name {
            Metadata::MODEL_NAME => AnyDocument::Metadata(serde_json::from_slice(plaintext)?),
            ImageAsset::MODEL_NAME => AnyDocument::Image(serde_json::from_slice(plaintext)?),
            ModelAsset::MODEL_NAME => AnyDocument::Model(serde_json::from_slice(plaintext)?),
            other => AnyDocument::Other {
                model_name: other.to_string(),
                value: serde_json::from_slice(plaintext)?,
            },
        })
    }

    pub fn model_name(&self) -> &str {
        match self {
            AnyDocument::Metadata(_) => Metadata::MODEL_NAME,
            AnyDocument::Image(_) => ImageAsset::MODEL_NAME,
            AnyDocument::Model(_) => ModelAsset::MODEL_NAME,
            AnyDocument::Other { model_name, .. } => model_name,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            AnyDocument::Metadata(m) => Some(m.id()),
            AnyDocument::Image(i) => Some(i.id()),
            AnyDocument::Model(m) => Some(m.id()),
            AnyDocument::Other { value, .. } => value.get("id").and_then(|v| v.as_str()),
        }
    }

    /// The parsed schema version, if the document declares a valid one.
    pub fn model_version(&self) -> Option<ModelVersion> {
        let raw = match self {
            AnyDocument::Metadata(m) => Some(m.model_version()),
            AnyDocument::Image(i) => Some(i.model_version()),
            AnyDocument::Model(m) => Some(m.model_version()),
            AnyDocument::Other { value, .. } => value.get("modelVersion").and_then(|v| v.as_str()),
        };
        raw.and_then(|v| v.parse().ok())
    }
}
