//! The storage-facing representation of a document.
//!
//! Documents never reach a storage engine in plaintext. They travel as an
//! [`Envelope`]: the engine's own identifier and revision, the model
//! discriminator, the application id and an opaque (encrypted) payload.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// An encrypted document as stored by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Engine-internal identifier.
    #[serde(rename = "_id", default)]
    pub internal_id: String,
    /// Engine-assigned revision, absent until the first successful write.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// On-disk discriminator of the document kind.
    #[serde(rename = "modelName", default)]
    pub model_name: String,
    /// Stable application-level identifier.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "encryptedDataBase64", default)]
    pub encrypted_payload: String,
}

impl Envelope {
    pub fn new(
        id: impl Into<String>,
        model_name: impl Into<String>,
        encrypted_payload: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            internal_id: id.clone(),
            revision: None,
            model_name: model_name.into(),
            id,
            encrypted_payload: encrypted_payload.into(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Check that every field an engine write depends on is present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.internal_id.is_empty() {
            return Err(ValidationError::MissingField("_id"));
        }
        if self.model_name.is_empty() {
            return Err(ValidationError::MissingField("modelName"));
        }
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.encrypted_payload.is_empty() {
            return Err(ValidationError::MissingField("encryptedDataBase64"));
        }
        Ok(())
    }

    /// Whether this record is a document of the application at all.
    ///
    /// Bulk reads return everything the engine holds, including design
    /// documents and records written by foreign tools.
    pub fn is_application_document(&self) -> bool {
        !self.model_name.is_empty()
    }
}

/// Filter for engine queries. Empty fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "modelName", skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl Selector {
    pub fn new(model_name: Option<&str>, id: Option<&str>) -> Self {
        Self {
            id: id.map(str::to_string),
            model_name: model_name.map(str::to_string),
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            model_name: None,
        }
    }

    pub fn by_model(model_name: impl Into<String>) -> Self {
        Self {
            id: None,
            model_name: Some(model_name.into()),
        }
    }

    /// A selector with no criteria would turn into a full scan.
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.model_name.is_none()
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.id.as_deref().map_or(true, |id| envelope.id == id)
            && self
                .model_name
                .as_deref()
                .map_or(true, |name| envelope.model_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_complete_envelope() {
        let env = Envelope::new("img-1", "ImageAsset", "cGF5bG9hZA==");
        assert_eq!(env.validate(), Ok(()));
        assert_eq!(env.internal_id, "img-1");
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let mut env = Envelope::new("img-1", "ImageAsset", "");
        assert_eq!(
            env.validate(),
            Err(ValidationError::MissingField("encryptedDataBase64"))
        );

        env.encrypted_payload = "x".into();
        env.model_name.clear();
        assert_eq!(env.validate(), Err(ValidationError::MissingField("modelName")));

        env.model_name = "ImageAsset".into();
        env.internal_id.clear();
        assert_eq!(env.validate(), Err(ValidationError::MissingField("_id")));
    }

    #[test]
    fn test_wire_field_names() {
        let env = Envelope::new("meta-1", "MetaData", "e30=").with_revision("1-abc");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["_id"], "meta-1");
        assert_eq!(json["_rev"], "1-abc");
        assert_eq!(json["modelName"], "MetaData");
        assert_eq!(json["encryptedDataBase64"], "e30=");
    }

    #[test]
    fn test_foreign_record_has_no_model() {
        let raw = serde_json::json!({ "_id": "_design/index", "_rev": "3-x", "views": {} });
        let env: Envelope = serde_json::from_value(raw).unwrap();
        assert!(!env.is_application_document());
    }

    #[test]
    fn test_selector_matching() {
        let env = Envelope::new("a", "ImageAsset", "p");
        assert!(Selector::by_id("a").matches(&env));
        assert!(Selector::by_model("ImageAsset").matches(&env));
        assert!(!Selector::new(Some("MetaData"), Some("a")).matches(&env));
        assert!(Selector::default().is_empty());
    }
}
