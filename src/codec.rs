//! Payload codec applied between a store's JSON and the backend.
//!
//! `compression` and `encryption` in the config only describe a codec; the
//! crate itself ships [`PassthroughCodec`]. Applications that need real
//! compression or encryption plug their own [`PayloadCodec`] into the builder.

use std::sync::Arc;

use crate::errors::StoreError;

pub trait PayloadCodec: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    fn encode(&self, plain: &str) -> Result<String, StoreError>;

    fn decode(&self, stored: &str) -> Result<String, StoreError>;
}

pub type CodecHandle = Arc<dyn PayloadCodec>;

/// Stores payloads unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl PayloadCodec for PassthroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn encode(&self, plain: &str) -> Result<String, StoreError> {
        Ok(plain.to_string())
    }

    fn decode(&self, stored: &str) -> Result<String, StoreError> {
        Ok(stored.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_is_identity() {
        let codec = PassthroughCodec;
        let payload = r#"{"history":[],"lastUpdated":0}"#;
        assert_eq!(codec.decode(&codec.encode(payload).unwrap()).unwrap(), payload);
        assert_eq!(codec.name(), "passthrough");
    }
}
