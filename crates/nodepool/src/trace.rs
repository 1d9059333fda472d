//! The per-attempt trace attached to every dispatch outcome, grounded in
//! `examples/original_source/chain_response_metadata.go`.

use std::time::SystemTime;

/// One entry in a [`ChainResponseMetadata`] trace: the outcome of a single
/// attempt against a single node.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeTrace {
    #[cfg_attr(feature = "serde", serde(with = "time_as_secs"))]
    pub time: SystemTime,
    pub node_name: String,
    pub status_code: u16,
    pub err: Option<String>,
}

/// Metadata returned alongside a successful response, or carried inside
/// [`crate::DispatchError::ChainFull`] / [`crate::DispatchError::MaxRetries`]
/// for the attempts that led up to the failure.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainResponseMetadata {
    pub chain_id: String,
    pub requested_url: String,
    pub retry: u32,
    pub trace: Vec<NodeTrace>,
}

#[cfg(feature = "serde")]
mod time_as_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs_f64(secs))
    }
}
