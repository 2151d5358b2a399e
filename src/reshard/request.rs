//! Resharding request intake and validation
//!
//! Validation is pure: the caller gathers everything the rules need into a
//! [`ValidationContext`] and nothing is persisted until the request passes.

use crate::common::{Error, Result};
use crate::reshard::types::{ChunkRange, KeyPattern, Namespace, ShardId, ZoneRange};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Body of the reshard command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardCollectionRequest {
    pub namespace: Namespace,
    /// New shard key pattern, validated into a [`KeyPattern`]
    pub key: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<ZoneRange>>,
    #[serde(
        default,
        rename = "_presetReshardedChunks",
        skip_serializing_if = "Option::is_none"
    )]
    pub preset_resharded_chunks: Option<Vec<ChunkRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_initial_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern: Option<WriteConcern>,
}

impl ReshardCollectionRequest {
    pub fn new(namespace: Namespace, key: Map<String, Value>) -> Self {
        Self {
            namespace,
            key,
            unique: None,
            collation: None,
            zones: None,
            preset_resharded_chunks: None,
            num_initial_chunks: None,
            write_concern: Some(WriteConcern::majority()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcern {
    pub w: WriteMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteMode {
    Nodes(u32),
    Tag(String),
}

impl WriteConcern {
    pub fn majority() -> Self {
        Self {
            w: WriteMode::Tag("majority".to_string()),
        }
    }

    pub fn is_majority(&self) -> bool {
        matches!(&self.w, WriteMode::Tag(tag) if tag == "majority")
    }
}

/// Everything the validation rules look at besides the request itself
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub is_metadata_authority: bool,
    pub test_commands_enabled: bool,
    /// Zone ranges currently attached to the collection
    pub collection_zones: Vec<ZoneRange>,
    pub known_shards: Vec<ShardId>,
}

/// Request that passed every rule
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub namespace: Namespace,
    pub key_pattern: KeyPattern,
    pub zones: Option<Vec<ZoneRange>>,
    pub preset_chunks: Option<Vec<ChunkRange>>,
    pub num_initial_chunks: Option<u32>,
}

/// Check a request against the rules, in order
pub fn validate(
    request: &ReshardCollectionRequest,
    ctx: &ValidationContext,
) -> Result<ValidatedRequest> {
    let key_pattern = KeyPattern::try_from(request.key.clone()).map_err(Error::InvalidRequest)?;

    if request.unique.unwrap_or(false) {
        return Err(Error::InvalidRequest("The unique field must be false".into()));
    }

    if let Some(collation) = &request.collation {
        if !resolves_to_simple_collation(collation)? {
            return Err(Error::InvalidRequest(format!(
                "The collation for reshardCollection must be {{locale: 'simple'}}, but found: {}",
                collation
            )));
        }
    }

    if !ctx.collection_zones.is_empty() {
        let zones = request
            .zones
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("Must specify value for zones field".into()))?;
        validate_zone_names(zones, &ctx.collection_zones)?;
    }
    if let Some(zones) = &request.zones {
        validate_zone_ranges(zones, &key_pattern)?;
    }

    if let Some(chunks) = &request.preset_resharded_chunks {
        if !ctx.test_commands_enabled {
            return Err(Error::InvalidRequest(
                "Test commands must be enabled when a value is provided for field: \
                 _presetReshardedChunks"
                    .into(),
            ));
        }
        if request.num_initial_chunks.is_some() {
            return Err(Error::InvalidRequest(
                "Must specify only one of _presetReshardedChunks or numInitialChunks".into(),
            ));
        }
        validate_resharded_chunks(chunks, &key_pattern, &ctx.known_shards)?;
    }

    if request.num_initial_chunks == Some(0) {
        return Err(Error::InvalidRequest(
            "numInitialChunks must be greater than zero".into(),
        ));
    }

    if !ctx.is_metadata_authority {
        return Err(Error::IllegalOperation(
            "reshardCollection can only be run on the metadata authority".into(),
        ));
    }

    if !request
        .write_concern
        .as_ref()
        .map(WriteConcern::is_majority)
        .unwrap_or(false)
    {
        return Err(Error::InvalidOptions(
            "reshardCollection must be called with majority writeConcern".into(),
        ));
    }

    Ok(ValidatedRequest {
        namespace: request.namespace.clone(),
        key_pattern,
        zones: request.zones.clone(),
        preset_chunks: request.preset_resharded_chunks.clone(),
        num_initial_chunks: request.num_initial_chunks,
    })
}

/// `Ok(true)` for the binary collation, `Ok(false)` for any real locale
fn resolves_to_simple_collation(collation: &Value) -> Result<bool> {
    let locale = collation
        .as_object()
        .and_then(|doc| doc.get("locale"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::InvalidRequest(format!(
                "collation must be an object with a string locale, found: {}",
                collation
            ))
        })?;
    Ok(locale == "simple")
}

fn validate_zone_names(requested: &[ZoneRange], authoritative: &[ZoneRange]) -> Result<()> {
    let known: BTreeSet<&str> = authoritative.iter().map(|z| z.zone.as_str()).collect();
    let referenced: BTreeSet<&str> = requested.iter().map(|z| z.zone.as_str()).collect();

    if let Some(unknown) = referenced.difference(&known).next() {
        return Err(Error::InvalidRequest(format!(
            "zone {} is not associated with this collection",
            unknown
        )));
    }
    if let Some(missing) = known.difference(&referenced).next() {
        return Err(Error::InvalidRequest(format!(
            "zones must cover every zone of the collection, missing {}",
            missing
        )));
    }
    Ok(())
}

fn validate_zone_ranges(zones: &[ZoneRange], key: &KeyPattern) -> Result<()> {
    for zone in zones {
        key.check_bound(&zone.min)
            .and_then(|_| key.check_bound(&zone.max))
            .map_err(|e| Error::InvalidRequest(format!("zone {}: {}", zone.zone, e)))?;
        if key.compare_bounds(&zone.min, &zone.max) != Ordering::Less {
            return Err(Error::InvalidRequest(format!(
                "zone {} has min not below max",
                zone.zone
            )));
        }
    }
    Ok(())
}

/// Preset chunks must tile the whole key space of the new key, in order
fn validate_resharded_chunks(
    chunks: &[ChunkRange],
    key: &KeyPattern,
    known_shards: &[ShardId],
) -> Result<()> {
    if chunks.is_empty() {
        return Err(Error::InvalidRequest(
            "_presetReshardedChunks must not be empty".into(),
        ));
    }

    for chunk in chunks {
        key.check_bound(&chunk.min)
            .and_then(|_| key.check_bound(&chunk.max))
            .map_err(Error::InvalidRequest)?;
        if key.compare_bounds(&chunk.min, &chunk.max) != Ordering::Less {
            return Err(Error::InvalidRequest(format!(
                "chunk min {} is not below max {}",
                Value::Object(chunk.min.clone()),
                Value::Object(chunk.max.clone())
            )));
        }
        if !known_shards.contains(&chunk.recipient_shard_id) {
            return Err(Error::InvalidRequest(format!(
                "chunk assigned to unknown shard {}",
                chunk.recipient_shard_id
            )));
        }
    }

    let mut sorted: Vec<&ChunkRange> = chunks.iter().collect();
    sorted.sort_by(|a, b| key.compare_bounds(&a.min, &b.min));

    if key.compare_bounds(&sorted[0].min, &key.global_min()) != Ordering::Equal {
        return Err(Error::InvalidRequest(
            "preset chunks must start at the global minimum".into(),
        ));
    }
    if key.compare_bounds(&sorted[sorted.len() - 1].max, &key.global_max()) != Ordering::Equal {
        return Err(Error::InvalidRequest(
            "preset chunks must end at the global maximum".into(),
        ));
    }
    for pair in sorted.windows(2) {
        if key.compare_bounds(&pair[0].max, &pair[1].min) != Ordering::Equal {
            return Err(Error::InvalidRequest(format!(
                "preset chunks are not contiguous at {}",
                Value::Object(pair[0].max.clone())
            )));
        }
    }

    Ok(())
}
