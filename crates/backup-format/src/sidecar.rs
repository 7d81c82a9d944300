//! Metadata sidecar codec.
//!
//! A sidecar is a flat JSON object stored next to each archive. Producers
//! have written several shapes of it over time, so decoding is lenient:
//!
//! - every key except the id is optional and falls back to a default,
//! - historical key aliases are accepted (`id`, `created_at`, `size_bytes`, `extra`),
//! - a key whose value cannot be interpreted is treated as missing,
//! - unknown keys are preserved and written back by [`encode`]; a
//!   descriptor key or alias found among them is never written.
//!
//! When a sidecar is missing or only partly readable, [`reconcile`] fills the
//! gaps from the file properties the server reports for the archive.

use crate::descriptor::{BackupDescriptor, RemoteProps};
use crate::naming::validate_id;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use log::{debug, warn};
use serde_json::{Map, Value};

const ID_KEYS: &[&str] = &["backup_id", "id"];
const NAME_KEYS: &[&str] = &["name"];
const DATE_KEYS: &[&str] = &["date", "created_at"];
const SIZE_KEYS: &[&str] = &["size", "size_bytes"];
const PROTECTED_KEYS: &[&str] = &["protected"];
const EXTRA_KEYS: &[&str] = &["extra_metadata", "extra"];

const RESERVED_KEYS: &[&[&str]] = &[
    ID_KEYS,
    NAME_KEYS,
    DATE_KEYS,
    SIZE_KEYS,
    PROTECTED_KEYS,
    EXTRA_KEYS,
];

/// Whether `key` names a descriptor field, under its current or a historical name.
fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.iter().any(|keys| keys.contains(&key))
}

/// A sidecar as far as it could be read.
///
/// Fields are `None` when the key was absent or its value was unusable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialDescriptor {
    /// Backup id, from `backup_id` or `id`.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Creation time, from `date` or `created_at`.
    pub created_at: Option<DateTime<Utc>>,
    /// Archive size, from `size` or `size_bytes`.
    pub size_bytes: Option<u64>,
    /// Whether the archive is password protected.
    pub protected: Option<bool>,
    /// Host metadata object, from `extra_metadata` or `extra`. Empty when absent.
    pub extra_metadata: Map<String, Value>,
    /// Top-level keys that are not descriptor fields.
    pub extra_fields: Map<String, Value>,
    /// Keys that were present but could not be interpreted.
    pub invalid_fields: Vec<&'static str>,
}

impl PartialDescriptor {
    /// Whether every descriptor field was read from the sidecar.
    pub fn is_complete(&self) -> bool {
        self.id.is_some()
            && self.name.is_some()
            && self.created_at.is_some()
            && self.size_bytes.is_some()
            && self.protected.is_some()
            && self.invalid_fields.is_empty()
    }

    /// Fill missing fields with defaults. Fails only when there is no id.
    pub fn into_descriptor(self) -> Result<BackupDescriptor> {
        let id = self.id.ok_or(Error::MissingId)?;
        Ok(BackupDescriptor {
            name: self
                .name
                .unwrap_or_else(|| BackupDescriptor::default_name(&id)),
            created_at: self.created_at.unwrap_or_default(),
            size_bytes: self.size_bytes.unwrap_or(0),
            protected: self.protected.unwrap_or(false),
            extra_metadata: self.extra_metadata,
            extra_fields: self.extra_fields,
            id,
        })
    }
}

/// Serialize a descriptor to sidecar bytes.
pub fn encode(descriptor: &BackupDescriptor) -> Result<Vec<u8>> {
    let mut doc: Map<String, Value> = descriptor
        .extra_fields
        .iter()
        .filter(|(key, _)| !is_reserved_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    doc.insert("backup_id".into(), Value::String(descriptor.id.clone()));
    doc.insert("name".into(), Value::String(descriptor.name.clone()));
    doc.insert(
        "date".into(),
        Value::String(
            descriptor
                .created_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
    );
    doc.insert("size".into(), Value::from(descriptor.size_bytes));
    doc.insert("protected".into(), Value::Bool(descriptor.protected));
    doc.insert(
        "extra_metadata".into(),
        Value::Object(descriptor.extra_metadata.clone()),
    );

    Ok(serde_json::to_vec(&Value::Object(doc))?)
}

/// Decode sidecar bytes into a full descriptor, defaulting missing fields.
pub fn decode(data: &[u8]) -> Result<BackupDescriptor> {
    decode_partial(data)?.into_descriptor()
}

/// Decode sidecar bytes without requiring any particular field.
///
/// Fails only when the bytes are not a JSON object.
pub fn decode_partial(data: &[u8]) -> Result<PartialDescriptor> {
    let mut doc = match serde_json::from_slice::<Value>(data)? {
        Value::Object(map) => map,
        _ => return Err(Error::NotAnObject),
    };

    let mut partial = PartialDescriptor::default();

    partial.id = read_field(&mut doc, ID_KEYS, &mut partial.invalid_fields, |v| {
        v.as_str()
            .filter(|id| validate_id(id).is_ok())
            .map(str::to_string)
    });
    partial.name = read_field(&mut doc, NAME_KEYS, &mut partial.invalid_fields, |v| {
        v.as_str().map(str::to_string)
    });
    partial.created_at = read_field(&mut doc, DATE_KEYS, &mut partial.invalid_fields, parse_date);
    partial.size_bytes = read_field(&mut doc, SIZE_KEYS, &mut partial.invalid_fields, parse_size);
    partial.protected = read_field(
        &mut doc,
        PROTECTED_KEYS,
        &mut partial.invalid_fields,
        parse_bool,
    );
    partial.extra_metadata = read_field(&mut doc, EXTRA_KEYS, &mut partial.invalid_fields, |v| {
        match v {
            Value::Object(map) => Some(map.clone()),
            Value::Null => Some(Map::new()),
            _ => None,
        }
    })
    .unwrap_or_default();
    partial.extra_fields = doc;

    if !partial.invalid_fields.is_empty() {
        debug!("sidecar fields ignored: {:?}", partial.invalid_fields);
    }

    Ok(partial)
}

/// Build a descriptor for the archive `id` from whatever the sidecar gave us
/// and the server-reported file properties.
///
/// With no sidecar, the result is derived from `remote` alone: size and
/// creation time come from the server and extra metadata is empty.
pub fn reconcile(
    sidecar: Option<PartialDescriptor>,
    id: &str,
    remote: &RemoteProps,
) -> BackupDescriptor {
    let sidecar = sidecar.unwrap_or_default();

    if let Some(sidecar_id) = sidecar.id.as_deref() {
        if sidecar_id != id {
            warn!(
                "sidecar for {} claims id {}; using the archive name",
                id, sidecar_id
            );
        }
    }

    BackupDescriptor {
        id: id.to_string(),
        name: sidecar
            .name
            .unwrap_or_else(|| BackupDescriptor::default_name(id)),
        created_at: sidecar
            .created_at
            .or(remote.modified_at)
            .unwrap_or_default(),
        size_bytes: sidecar.size_bytes.unwrap_or(remote.size_bytes),
        protected: sidecar.protected.unwrap_or(false),
        extra_metadata: sidecar.extra_metadata,
        extra_fields: sidecar.extra_fields,
    }
}

/// Remove every alias of a field from `doc` and interpret the first one found.
fn read_field<T>(
    doc: &mut Map<String, Value>,
    keys: &[&'static str],
    invalid: &mut Vec<&'static str>,
    parse: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let mut found = None;
    for key in keys {
        if let Some(value) = doc.remove(*key) {
            if found.is_none() {
                found = Some((*key, value));
            }
        }
    }

    let (key, value) = found?;
    let parsed = parse(&value);
    if parsed.is_none() {
        invalid.push(key);
    }
    parsed
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            // Some producers omit the offset; those timestamps are UTC.
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .ok()
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

fn parse_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().filter(|v| *v <= 1).map(|v| v == 1),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Null => Some(false),
        _ => None,
    }
}
