use backup_format::{
    decode, decode_partial, encode, reconcile, BackupDescriptor, Error, ObjectKind, ObjectName,
    RemoteProps,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

fn full_descriptor() -> BackupDescriptor {
    let created = Utc.with_ymd_and_hms(2025, 1, 23, 12, 0, 0).unwrap()
        + chrono::Duration::nanoseconds(123_456_789);
    let mut descriptor = BackupDescriptor::new("f1e2d3c4", "Automatic backup 2025.1.3", created)
        .with_size(734_003_200)
        .with_protected(true)
        .with_extra_metadata("instance_id", "4b3c2a1f")
        .with_extra_metadata("with_automatic_settings", true);
    descriptor
        .extra_fields
        .insert("database_included".into(), Value::Bool(true));
    descriptor
}

#[test]
fn sidecar_round_trip_preserves_every_field() {
    let descriptor = full_descriptor();
    let decoded = decode(&encode(&descriptor).unwrap()).unwrap();
    assert_eq!(decoded, descriptor);
}

#[test]
fn sidecar_round_trip_of_minimal_descriptor() {
    let created = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
    let descriptor = BackupDescriptor::new("a", "", created);
    assert_eq!(decode(&encode(&descriptor).unwrap()).unwrap(), descriptor);
}

#[test]
fn sidecar_written_by_older_producer_decodes() {
    let doc = json!({
        "backup_id": "0ld",
        "name": "Full backup",
        "date": "2023-06-01T10:00:00.000000+00:00",
        "size": 12.5,
        "protected": false,
        "slug": "0ld",
        "folders": ["share", "ssl"],
    });
    let descriptor = decode(doc.to_string().as_bytes()).unwrap();
    assert_eq!(descriptor.id, "0ld");
    assert_eq!(descriptor.size_bytes, 12);
    assert_eq!(
        descriptor.created_at,
        Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap()
    );
    assert_eq!(descriptor.extra_fields["folders"], json!(["share", "ssl"]));
    assert!(descriptor.extra_metadata.is_empty());
}

#[test]
fn truncated_sidecar_is_a_decode_error() {
    let bytes = encode(&full_descriptor()).unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    assert!(matches!(decode(truncated), Err(Error::Json(_))));
}

#[test]
fn archive_without_sidecar_is_reconciled_from_remote_props() {
    let name = ObjectName::parse("ha_backup_abc123.tar").unwrap();
    assert_eq!(name.kind, ObjectKind::Archive);

    let modified = Utc.with_ymd_and_hms(2025, 2, 14, 3, 0, 0).unwrap();
    let props = RemoteProps {
        size_bytes: 99,
        modified_at: Some(modified),
    };
    let descriptor = reconcile(None, &name.id, &props);

    assert_eq!(descriptor.id, "abc123");
    assert_eq!(descriptor.size_bytes, 99);
    assert_eq!(descriptor.created_at, modified);
    assert!(descriptor.extra_metadata.is_empty());
}

#[test]
fn complete_sidecar_wins_over_remote_props() {
    let descriptor = full_descriptor();
    let partial = decode_partial(&encode(&descriptor).unwrap()).unwrap();
    assert!(partial.is_complete());

    let props = RemoteProps {
        size_bytes: 1,
        modified_at: Some(Utc::now()),
    };
    assert_eq!(reconcile(Some(partial), &descriptor.id, &props), descriptor);
}
