//! Conversion between typed documents and envelopes.
//!
//! Payload encryption is supplied by the embedding application through
//! [`EnvelopeCodec`]. The store only serializes documents to JSON and asks
//! the codec to seal and open the resulting bytes.

use crate::error::Result;
use vellum_core::{AnyDocument, CodecError, DocumentKind, Envelope};

/// Seals plaintext document bytes into an envelope payload and back.
pub trait EnvelopeCodec: Send + Sync + 'static {
    fn seal(&self, plaintext: &[u8]) -> std::result::Result<String, CodecError>;

    fn open(&self, payload: &str) -> std::result::Result<Vec<u8>, CodecError>;
}

/// Stores the JSON text as-is. For tests and unencrypted local databases.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaintextCodec;

impl EnvelopeCodec for PlaintextCodec {
    fn seal(&self, plaintext: &[u8]) -> std::result::Result<String, CodecError> {
        String::from_utf8(plaintext.to_vec()).map_err(|e| CodecError::Payload(e.to_string()))
    }

    fn open(&self, payload: &str) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Build the envelope for `doc`, keeping the engine identity of `previous`.
pub fn seal_document<K: DocumentKind>(
    codec: &dyn EnvelopeCodec,
    doc: &K,
    previous: Option<&Envelope>,
) -> Result<Envelope> {
    let plaintext = serde_json::to_vec(doc).map_err(CodecError::from)?;
    let payload = codec.seal(&plaintext)?;
    let mut envelope = Envelope::new(doc.id(), K::MODEL_NAME, payload);
    if let Some(prev) = previous {
        envelope.internal_id = prev.internal_id.clone();
        envelope.revision = prev.revision.clone();
    }
    Ok(envelope)
}

pub fn open_document<K: DocumentKind>(codec: &dyn EnvelopeCodec, envelope: &Envelope) -> Result<K> {
    if envelope.model_name != K::MODEL_NAME {
        return Err(CodecError::ModelMismatch {
            expected: K::MODEL_NAME.to_string(),
            found: envelope.model_name.clone(),
        }
        .into());
    }
    let plaintext = codec.open(&envelope.encrypted_payload)?;
    Ok(serde_json::from_slice(&plaintext).map_err(CodecError::from)?)
}

pub fn open_any(codec: &dyn EnvelopeCodec, envelope: &Envelope) -> Result<AnyDocument> {
    let plaintext = codec.open(&envelope.encrypted_payload)?;
    Ok(AnyDocument::decode(&envelope.model_name, &plaintext)?)
}
