//! Namespaces, shard key patterns, and key range bounds
//!
//! Bounds are ordered JSON objects whose fields follow the key pattern.
//! Values compare by type first, in the order
//! `MinKey < null < numbers < strings < objects < arrays < booleans < MaxKey`,
//! then by value within a type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

pub type ShardId = String;

/// Key range boundary document
pub type KeyBound = Map<String, Value>;

const MIN_KEY: &str = "$minKey";
const MAX_KEY: &str = "$maxKey";

/// A `db.collection` namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> crate::Result<Self> {
        let db = db.into();
        let coll = coll.into();
        if db.is_empty() || coll.is_empty() || db.contains('.') {
            return Err(crate::Error::InvalidRequest(format!(
                "invalid namespace: {}.{}",
                db, coll
            )));
        }
        Ok(Self { db, coll })
    }

    pub fn parse(ns: &str) -> crate::Result<Self> {
        match ns.split_once('.') {
            Some((db, coll)) => Self::new(db, coll),
            None => Err(crate::Error::InvalidRequest(format!(
                "namespace must be <db>.<collection>: {}",
                ns
            ))),
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// Working namespace the recipients build the resharded collection in
    ///
    /// A committed operation changes the uuid, so its namespace never comes back.
    /// After an operation ends in error the next one for the collection gets the
    /// same namespace; shards tell them apart by operation id.
    pub fn temporary_resharding(&self, existing_uuid: &Uuid) -> Namespace {
        Namespace {
            db: self.db.clone(),
            coll: format!("system.resharding.{}", existing_uuid),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl TryFrom<String> for Namespace {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Namespace::parse(&value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.to_string()
    }
}

/// Namespace plus the uuid of its current incarnation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionIdentity {
    pub namespace: Namespace,
    pub uuid: Uuid,
}

impl fmt::Display for CollectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.namespace, self.uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Ascending,
    Hashed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    pub name: String,
    pub kind: KeyKind,
}

/// Ordered shard key pattern, e.g. `{"region": 1, "customer": "hashed"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct KeyPattern {
    fields: Vec<KeyField>,
}

impl KeyPattern {
    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Bound with every field at MinKey
    pub fn global_min(&self) -> KeyBound {
        self.field_names()
            .map(|name| (name.to_string(), min_key()))
            .collect()
    }

    /// Bound with every field at MaxKey
    pub fn global_max(&self) -> KeyBound {
        self.field_names()
            .map(|name| (name.to_string(), max_key()))
            .collect()
    }

    /// A bound must name exactly this pattern's fields, in order
    pub fn check_bound(&self, bound: &KeyBound) -> std::result::Result<(), String> {
        let expected: Vec<&str> = self.field_names().collect();
        let actual: Vec<&str> = bound.keys().map(String::as_str).collect();
        if expected != actual {
            return Err(format!(
                "bound {} does not match shard key fields {:?}",
                Value::Object(bound.clone()),
                expected
            ));
        }
        Ok(())
    }

    /// Compare two bounds that both satisfy `check_bound`
    pub fn compare_bounds(&self, a: &KeyBound, b: &KeyBound) -> Ordering {
        for name in self.field_names() {
            let ord = compare_values(
                a.get(name).unwrap_or(&Value::Null),
                b.get(name).unwrap_or(&Value::Null),
            );
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.clone().into()))
    }
}

impl TryFrom<Map<String, Value>> for KeyPattern {
    type Error = String;

    fn try_from(doc: Map<String, Value>) -> std::result::Result<Self, String> {
        if doc.is_empty() {
            return Err("shard key pattern must not be empty".into());
        }

        let mut fields = Vec::with_capacity(doc.len());
        for (name, value) in doc {
            if name.is_empty() || name.starts_with('$') {
                return Err(format!("invalid shard key field name: {:?}", name));
            }
            let kind = match &value {
                Value::Number(n) if n.as_f64() == Some(1.0) => KeyKind::Ascending,
                Value::String(s) if s == "hashed" => KeyKind::Hashed,
                other => {
                    return Err(format!(
                        "shard key field {} must be 1 or \"hashed\", found {}",
                        name, other
                    ))
                }
            };
            fields.push(KeyField { name, kind });
        }

        if fields.iter().filter(|f| f.kind == KeyKind::Hashed).count() > 1 {
            return Err("shard key may contain at most one hashed field".into());
        }

        Ok(Self { fields })
    }
}

impl From<KeyPattern> for Map<String, Value> {
    fn from(pattern: KeyPattern) -> Self {
        pattern
            .fields
            .into_iter()
            .map(|f| {
                let value = match f.kind {
                    KeyKind::Ascending => Value::from(1),
                    KeyKind::Hashed => Value::from("hashed"),
                };
                (f.name, value)
            })
            .collect()
    }
}

/// Key range pinned to a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRange {
    pub zone: String,
    pub min: KeyBound,
    pub max: KeyBound,
}

/// Explicit chunk placement under the new key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRange {
    pub recipient_shard_id: ShardId,
    pub min: KeyBound,
    pub max: KeyBound,
}

pub fn min_key() -> Value {
    serde_json::json!({ MIN_KEY: 1 })
}

pub fn max_key() -> Value {
    serde_json::json!({ MAX_KEY: 1 })
}

fn is_sentinel(value: &Value, sentinel: &str) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.contains_key(sentinel))
}

fn type_rank(value: &Value) -> u8 {
    if is_sentinel(value, MIN_KEY) {
        return 0;
    }
    if is_sentinel(value, MAX_KEY) {
        return 7;
    }
    match value {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 6,
    }
}

/// Total order over bound values
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}
