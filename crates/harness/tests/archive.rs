use lorekeep_core::{FieldValue, SchemaRegistry, Table};
use lorekeep_engine::{Engine, EngineConfig, EngineError, PlanAction};
use lorekeep_harness::{fixtures, TestSession};
use lorekeep_storage::SqliteStore;
use serde_json::json;

// ============================================================================
// Export
// ============================================================================

#[test]
fn export_names_file_and_counts_tables() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = TestSession::new()?;
    session.import(Table::Creature, &[fixtures::owlbear(), fixtures::goblin()])?;
    session.import(Table::Spell, &[fixtures::fireball()])?;

    let archive = session.engine.export()?;
    assert!(archive.file_name.starts_with("lorekeep_export_"));
    assert!(archive.file_name.ends_with(".tar"));
    // lorekeep_export_YYYYmmdd_HHMMSS.tar
    assert_eq!(archive.file_name.len(), "lorekeep_export_".len() + 15 + 4);

    let manifest = &archive.manifest;
    assert_eq!(manifest.schema_version, 2);
    assert_eq!(manifest.entry(Table::Creature).map(|e| e.count), Some(2));
    assert_eq!(manifest.entry(Table::Spell).map(|e| e.count), Some(1));
    assert_eq!(manifest.entry(Table::Character).map(|e| e.count), Some(0));
    Ok(())
}

#[test]
fn unchanged_store_exports_identical_table_files() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = TestSession::new()?;
    session.import(Table::Creature, &[fixtures::goblin(), fixtures::owlbear()])?;
    session
        .engine
        .create_user_record(Table::Character, &fixtures::character())?;

    let first = session.engine.export()?;
    let second = session.engine.export()?;
    assert_eq!(first.manifest.tables, second.manifest.tables);
    Ok(())
}

#[test]
fn configured_prefix_is_used() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_json_str(r#"{"archive_prefix": "dnd_helper_export", "pretty_tables": false}"#)?;
    let mut engine = Engine::with_config(SqliteStore::open_in_memory()?, SchemaRegistry::builtin(), config);
    let archive = engine.export()?;
    assert!(archive.file_name.starts_with("dnd_helper_export_"));
    Ok(())
}

#[test]
fn archive_written_to_disk_restores() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = TestSession::new()?;
    source.import(Table::Item, &[fixtures::bag_of_holding()])?;
    let archive = source.engine.export()?;

    let dir = tempfile::tempdir()?;
    let path = archive.write_to(dir.path())?;
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(archive.file_name.as_str()));

    let mut target = TestSession::new()?;
    let plan = target.engine.plan_restore_file(&path)?;
    target.engine.apply_restore(&plan, true)?;
    let bag = target.by_name(Table::Item, "Bag of Holding")?.ok_or("missing")?;
    assert!(matches!(bag.fields.get("properties"), Some(FieldValue::Map(_))));
    Ok(())
}

// ============================================================================
// Corruption
// ============================================================================

#[test]
fn tampered_record_invalidates_bundle() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = TestSession::new()?;
    source.import(Table::Creature, &[fixtures::owlbear()])?;
    let mut bytes = source.engine.export()?.bytes;

    let needle = b"Owlbear";
    let at = bytes
        .windows(needle.len())
        .rposition(|w| w == needle)
        .ok_or("name not found in archive")?;
    bytes[at + 5] = b'e';

    let target = TestSession::new()?;
    match target.engine.plan_restore(&bytes) {
        Err(EngineError::CorruptArchive(msg)) => assert!(msg.contains("creature.json"), "{msg}"),
        other => panic!("expected corrupt archive, got {other:?}"),
    }
    Ok(())
}

#[test]
fn truncated_bundle_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = TestSession::new()?;
    source.import(Table::Creature, &[fixtures::owlbear(), fixtures::goblin()])?;
    let bytes = source.engine.export()?.bytes;

    let target = TestSession::new()?;
    for cut in [10, 700, bytes.len() / 2] {
        assert!(
            matches!(
                target.engine.plan_restore(&bytes[..cut]),
                Err(EngineError::CorruptArchive(_))
            ),
            "cut at {cut}"
        );
    }
    Ok(())
}

#[test]
fn garbage_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
    let session = TestSession::new()?;
    let garbage = vec![0x5a_u8; 4096];
    assert!(matches!(
        session.engine.plan_restore(&garbage),
        Err(EngineError::CorruptArchive(_))
    ));
    Ok(())
}

#[test]
fn oversized_archive_is_refused() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = TestSession::new()?;
    source.import(Table::Creature, &[fixtures::owlbear()])?;
    let bytes = source.engine.export()?.bytes;

    let config = EngineConfig {
        max_archive_bytes: 1024,
        ..EngineConfig::default()
    };
    let engine = Engine::with_config(SqliteStore::open_in_memory()?, SchemaRegistry::builtin(), config);
    assert!(matches!(
        engine.plan_restore(&bytes),
        Err(EngineError::CorruptArchive(_))
    ));
    Ok(())
}

#[test]
fn newer_schema_version_is_unsupported() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fixtures::archive_with(3, &[("spell", Vec::new())])?;
    let session = TestSession::new()?;
    assert!(matches!(
        session.engine.plan_restore(&bytes),
        Err(EngineError::UnsupportedSchemaVersion { found: 3, supported: 2 })
    ));
    Ok(())
}

// ============================================================================
// Migration
// ============================================================================

#[test]
fn version_one_archive_is_migrated() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fixtures::archive_with(
        1,
        &[(
            "creature",
            vec![
                fixtures::v1_creature("imp", "Imp", r#"["fiend", "devil"]"#),
                fixtures::v1_creature("quasit", "Quasit", ""),
            ],
        )],
    )?;

    let mut session = TestSession::new()?;
    let plan = session.engine.plan_restore(&bytes)?;
    assert_eq!(plan.manifest.schema_version, 1);
    assert_eq!(plan.count(PlanAction::Insert), 2);
    session.engine.apply_restore(&plan, true)?;

    let imp = session.by_name(Table::Creature, "Imp")?.ok_or("missing")?;
    assert_eq!(
        imp.fields["tags"],
        FieldValue::List(vec![
            FieldValue::Text("fiend".into()),
            FieldValue::Text("devil".into()),
        ])
    );
    assert_eq!(imp.synced_version, None);
    let quasit = session.by_name(Table::Creature, "Quasit")?.ok_or("missing")?;
    assert_eq!(quasit.fields["tags"], FieldValue::List(Vec::new()));
    Ok(())
}

#[test]
fn unmigratable_record_fails_the_restore() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fixtures::archive_with(
        1,
        &[(
            "creature",
            vec![
                fixtures::v1_creature("imp", "Imp", r#"["fiend"]"#),
                fixtures::v1_creature("quasit", "Quasit", "fiend; demon"),
            ],
        )],
    )?;

    let session = TestSession::new()?;
    match session.engine.plan_restore(&bytes) {
        Err(EngineError::UnmigratableRecord { table, key, .. }) => {
            assert_eq!(table, Table::Creature);
            assert_eq!(key, "quasit");
        }
        other => panic!("expected unmigratable record, got {other:?}"),
    }
    assert!(session.engine.list(Table::Creature)?.is_empty());
    Ok(())
}

#[test]
fn version_one_item_properties_are_decoded() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fixtures::archive_with(
        1,
        &[(
            "item",
            vec![json!({
                "table": "item",
                "key": "rope",
                "version": 2,
                "origin": "user",
                "updated_at": "2024-01-15T09:00:00Z",
                "fields": {"name": "Rope", "properties": "{\"length_ft\": 50}"},
            })],
        )],
    )?;

    let mut session = TestSession::new()?;
    let plan = session.engine.plan_restore(&bytes)?;
    session.engine.apply_restore(&plan, true)?;
    let rope = session.by_name(Table::Item, "Rope")?.ok_or("missing")?;
    assert_eq!(rope.version, 2);
    let properties = rope.fields["properties"].as_map().ok_or("not a map")?;
    assert_eq!(properties["length_ft"], FieldValue::Integer(50));
    Ok(())
}

#[test]
fn repeated_key_in_table_file_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
    let shield = |level: u32| {
        json!({
            "table": "spell", "key": "shield", "version": 1, "origin": "reference_dataset",
            "updated_at": "2024-01-15T09:00:00Z", "synced_version": 1,
            "fields": {"name": "Shield", "level": level},
        })
    };
    let bytes = fixtures::archive_with(2, &[("spell", vec![shield(1), shield(2)])])?;

    let session = TestSession::new()?;
    match session.engine.plan_restore(&bytes) {
        Err(EngineError::CorruptArchive(msg)) => assert!(msg.contains("shield"), "{msg}"),
        other => panic!("expected corrupt archive, got {other:?}"),
    }
    Ok(())
}
