//! Serializable stats snapshots, grounded in
//! `examples/original_source/stats.go`. Field names mirror spec.md §6's
//! snapshot format; the `json:"..."` tags on the source become
//! `#[serde(rename_all = "snake_case")]` here so the wire shape matches
//! without this crate picking a concrete encoder.

use std::collections::HashMap;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNodeStats {
    pub name: String,
    pub current_hits: u32,
    pub total_hits: u64,
    pub limits: u32,
    pub response_stats: HashMap<u16, u64>,
    pub priority: u32,
    pub disabled: bool,
    pub fails: u32,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    pub id: String,
    pub nodes: Vec<ChainNodeStats>,
}
