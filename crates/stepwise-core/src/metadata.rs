//! Typed, versioned metadata carried across suspension points.
//!
//! Metadata is stored as an envelope `{kind, version, data}` so a component
//! never silently decodes another component's state or an older shape.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Result, StepError};

/// Metadata shape owned by one component.
pub trait ComponentMetadata: Serialize + DeserializeOwned {
    /// Discriminator written into the envelope.
    const KIND: &'static str;
    /// Shape version written into the envelope.
    const VERSION: u32 = 1;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    kind: String,
    version: u32,
    data: T,
}

/// Serialize metadata into its envelope.
pub fn encode<T: ComponentMetadata>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(Envelope {
        kind: T::KIND.to_string(),
        version: T::VERSION,
        data: value,
    })
    .map_err(|e| StepError::Serialization(e.to_string()))
}

/// Decode metadata, failing on absence or on any mismatch.
pub fn decode<T: ComponentMetadata>(raw: Option<&serde_json::Value>) -> Result<T> {
    let raw = raw.ok_or_else(|| {
        StepError::Metadata(format!("no {} metadata recorded for execution", T::KIND))
    })?;

    let envelope: Envelope<serde_json::Value> = serde_json::from_value(raw.clone())
        .map_err(|e| StepError::Metadata(format!("malformed metadata envelope: {}", e)))?;

    if envelope.kind != T::KIND {
        return Err(StepError::Metadata(format!(
            "expected {} metadata, found {}",
            T::KIND,
            envelope.kind
        )));
    }

    if envelope.version != T::VERSION {
        return Err(StepError::Metadata(format!(
            "unsupported {} metadata version {} (expected {})",
            T::KIND,
            envelope.version,
            T::VERSION
        )));
    }

    serde_json::from_value(envelope.data)
        .map_err(|e| StepError::Metadata(format!("malformed {} metadata: {}", T::KIND, e)))
}

/// Decode metadata if any is recorded.
pub fn decode_optional<T: ComponentMetadata>(raw: Option<&serde_json::Value>) -> Result<Option<T>> {
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(_) => decode(raw).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    impl ComponentMetadata for Counter {
        const KIND: &'static str = "counter";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct CounterV2 {
        count: u32,
    }

    impl ComponentMetadata for CounterV2 {
        const KIND: &'static str = "counter";
        const VERSION: u32 = 2;
    }

    #[test]
    fn test_envelope_shape() {
        let raw = encode(&Counter { count: 3 }).unwrap();
        assert_eq!(raw["kind"], "counter");
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["data"]["count"], 3);
        assert_eq!(decode::<Counter>(Some(&raw)).unwrap(), Counter { count: 3 });
    }

    #[test]
    fn test_missing_metadata_is_an_error() {
        let err = decode::<Counter>(None).unwrap_err();
        assert!(matches!(err, StepError::Metadata(_)));
        assert!(decode_optional::<Counter>(None).unwrap().is_none());
    }

    #[test]
    fn test_version_mismatch() {
        let raw = encode(&Counter { count: 1 }).unwrap();
        let err = decode::<CounterV2>(Some(&raw)).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_bare_value_is_rejected() {
        let raw = serde_json::json!({"count": 1});
        assert!(matches!(
            decode::<Counter>(Some(&raw)),
            Err(StepError::Metadata(_))
        ));
    }
}
