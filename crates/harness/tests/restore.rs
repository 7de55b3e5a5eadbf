use lorekeep_core::{
    Constraint, FieldSpec, FieldType, FieldValue, Origin, RecordKey, Schema, SchemaRegistry, Table,
};
use lorekeep_engine::{
    Engine, EngineConfig, EngineError, PlanAction, PlanCounts, RestoreCounts,
};
use lorekeep_harness::{fixtures, FlakyStore, TestSession};
use lorekeep_storage::{MemoryStore, RecordStore};
use pretty_assertions::assert_eq;
use serde_json::json;

/// A session holding one record of every table plus a locally edited one.
fn populated() -> Result<TestSession, Box<dyn std::error::Error>> {
    let mut session = TestSession::new()?;
    session.import(Table::Creature, &[fixtures::owlbear(), fixtures::goblin()])?;
    session.import(Table::Spell, &[fixtures::fireball()])?;
    session.import(Table::Item, &[fixtures::bag_of_holding()])?;
    session.import(Table::CampaignEntity, &[fixtures::quest()])?;
    session
        .engine
        .create_user_record(Table::Character, &fixtures::character())?;

    let mut edited = fixtures::goblin();
    edited["hit_points"] = json!("10 (3d6)");
    let goblin = RecordKey::from_name("Goblin").ok_or("no key")?;
    session
        .engine
        .edit_user_record(Table::Creature, &goblin, &edited)?;
    Ok(session)
}

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn export_then_forced_restore_reproduces_store() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = populated()?;
    let archive = source.engine.export()?;

    let mut target = TestSession::new()?;
    let plan = target.engine.plan_restore(&archive.bytes)?;
    assert!(plan.is_applicable());
    assert_eq!(plan.count(PlanAction::Insert), 6);

    let report = target.engine.apply_restore(&plan, true)?;
    assert_eq!(report.applied(), 6);
    assert_eq!(target.dump()?, source.dump()?);
    Ok(())
}

#[test]
fn single_character_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = TestSession::new()?;
    let created = source
        .engine
        .create_user_record(Table::Character, &fixtures::character())?;
    let archive = source.engine.export()?;

    let mut target = TestSession::new()?;
    let plan = target.engine.plan_restore(&archive.bytes)?;
    target.engine.apply_restore(&plan, true)?;

    let restored = target
        .engine
        .get(Table::Character, &created.key)?
        .ok_or("character missing")?;
    assert_eq!(restored.key, created.key);
    assert_eq!(restored.fields, created.fields);
    assert_eq!(restored.origin, Origin::User);
    Ok(())
}

#[test]
fn restore_into_memory_store() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = populated()?;
    let archive = source.engine.export()?;

    let mut target = Engine::new(MemoryStore::new());
    let plan = target.plan_restore(&archive.bytes)?;
    target.apply_restore(&plan, true)?;
    for table in Table::ALL {
        assert_eq!(target.list(table)?, source.engine.list(table)?);
    }
    Ok(())
}

// ============================================================================
// Plan and confirmation
// ============================================================================

#[test]
fn plan_summary_counts_per_table() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = populated()?;
    let archive = session.engine.export()?;

    // Diverge after the export: one user edit, one new record.
    let mut edited = fixtures::owlbear();
    edited["speed"] = json!("40 ft.");
    let owlbear = RecordKey::from_name("Owlbear").ok_or("no key")?;
    session
        .engine
        .edit_user_record(Table::Creature, &owlbear, &edited)?;
    session.import(Table::Spell, &[json!({"name": "Shield", "level": 1})])?;

    let plan = session.engine.plan_restore(&archive.bytes)?;
    let summary = plan.summary();
    assert_eq!(
        summary[&Table::Creature],
        PlanCounts {
            conflict: 1,
            unchanged: 1,
            ..PlanCounts::default()
        }
    );
    assert_eq!(
        summary[&Table::Spell],
        PlanCounts {
            unchanged: 1,
            ..PlanCounts::default()
        }
    );
    Ok(())
}

#[test]
fn unconfirmed_restore_changes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = populated()?;
    let archive = source.engine.export()?;

    let mut target = TestSession::new()?;
    let plan = target.engine.plan_restore(&archive.bytes)?;
    assert!(matches!(
        target.engine.apply_restore(&plan, false),
        Err(EngineError::ConfirmationRequired(_))
    ));
    assert!(target.dump()?.is_empty());
    Ok(())
}

#[test]
fn forced_restore_overwrites_local_edit() -> Result<(), Box<dyn std::error::Error>> {
    let mut session = TestSession::new()?;
    session.import(Table::Creature, &[fixtures::owlbear()])?;
    let archive = session.engine.export()?;

    let owlbear = RecordKey::from_name("Owlbear").ok_or("no key")?;
    let mut edited = fixtures::owlbear();
    edited["speed"] = json!("40 ft.");
    session
        .engine
        .edit_user_record(Table::Creature, &owlbear, &edited)?;

    let plan = session.engine.plan_restore(&archive.bytes)?;
    assert_eq!(plan.entries[0].action, PlanAction::Conflict);
    let report = session.engine.apply_restore(&plan, true)?;
    assert_eq!(
        report.tables[&Table::Creature],
        RestoreCounts {
            updated: 1,
            ..RestoreCounts::default()
        }
    );

    let restored = session.engine.get(Table::Creature, &owlbear)?.ok_or("missing")?;
    // Archived version 1 is older than local version 2.
    assert_eq!(restored.version, 3);
    assert_eq!(restored.origin, Origin::ReferenceDataset);
    assert!(!restored.fields.contains_key("speed"));
    Ok(())
}

#[test]
fn plan_with_rejected_record_cannot_be_applied() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fixtures::archive_with(
        2,
        &[(
            "spell",
            vec![
                json!({
                    "table": "spell", "key": "shield", "version": 1, "origin": "reference_dataset",
                    "updated_at": "2024-01-15T09:00:00Z", "synced_version": 1,
                    "fields": {"name": "Shield", "level": 1},
                }),
                json!({
                    "table": "spell", "key": "wish", "version": 1, "origin": "reference_dataset",
                    "updated_at": "2024-01-15T09:00:00Z", "synced_version": 1,
                    "fields": {"name": "Wish", "level": 10},
                }),
            ],
        )],
    )?;

    let mut session = TestSession::new()?;
    let plan = session.engine.plan_restore(&bytes)?;
    assert_eq!(plan.rejected.len(), 1);
    assert!(matches!(
        session.engine.apply_restore(&plan, true),
        Err(EngineError::Validation(err)) if err.key.as_deref() == Some("wish")
    ));
    assert!(session.engine.list(Table::Spell)?.is_empty());
    Ok(())
}

// ============================================================================
// All-or-nothing
// ============================================================================

#[test]
fn failed_revalidation_rolls_back_whole_restore() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = TestSession::new()?;
    source.import(
        Table::Spell,
        &[
            json!({"name": "Shield", "level": 1}),
            fixtures::fireball(),
            json!({"name": "Light", "level": 0}),
        ],
    )?;
    let archive = source.engine.export()?;

    let mut target = TestSession::new()?;
    target.import(Table::Spell, &[json!({"name": "Light", "level": 0})])?;
    let before = target.dump()?;
    let plan = target.engine.plan_restore(&archive.bytes)?;
    assert!(plan.is_applicable());

    // Cantrips and first-level spells only, from now on.
    target.engine.register_schema(Schema::new(
        Table::Spell,
        "name",
        vec![
            FieldSpec::required("name", FieldType::Text),
            FieldSpec::required("level", FieldType::Integer).with(Constraint::Range { min: 0, max: 1 }),
            FieldSpec::optional("school", FieldType::Text),
            FieldSpec::optional("casting_time", FieldType::Text),
            FieldSpec::optional("range", FieldType::Text),
            FieldSpec::optional("components", FieldType::Text),
            FieldSpec::optional("duration", FieldType::Text),
        ],
    ));

    assert!(matches!(
        target.engine.apply_restore(&plan, true),
        Err(EngineError::Validation(_))
    ));
    assert_eq!(target.dump()?, before);
    Ok(())
}

#[test]
fn storage_failure_mid_restore_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = populated()?;
    let archive = source.engine.export()?;

    let mut target = Engine::with_config(
        FlakyStore::new(MemoryStore::new()),
        SchemaRegistry::builtin(),
        EngineConfig::default(),
    );
    let plan = target.plan_restore(&archive.bytes)?;
    target.store().fail_after_puts(3);

    assert!(matches!(
        target.apply_restore(&plan, true),
        Err(EngineError::Storage(_))
    ));
    for table in Table::ALL {
        assert_eq!(target.store().count(table)?, 0);
    }
    assert!(!target.store().in_transaction());

    target.store().heal();
    let report = target.apply_restore(&plan, true)?;
    assert_eq!(report.applied(), 6);
    Ok(())
}

#[test]
fn on_disk_restore_persists() -> Result<(), Box<dyn std::error::Error>> {
    let mut source = populated()?;
    let archive = source.engine.export()?;

    let mut target = TestSession::on_disk()?;
    let plan = target.engine.plan_restore(&archive.bytes)?;
    target.engine.apply_restore(&plan, true)?;

    let fireball = target.by_name(Table::Spell, "Fireball")?.ok_or("missing")?;
    assert_eq!(fireball.fields["level"], FieldValue::Integer(3));
    Ok(())
}

#[test]
fn version_beyond_store_range_is_rejected_at_plan_time() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fixtures::archive_with(
        2,
        &[(
            "spell",
            vec![json!({
                "table": "spell", "key": "shield", "version": u64::MAX, "origin": "user",
                "updated_at": "2024-01-15T09:00:00Z", "synced_version": null,
                "fields": {"name": "Shield", "level": 1},
            })],
        )],
    )?;

    let mut target = Engine::new(MemoryStore::new());
    let plan = target.plan_restore(&bytes)?;
    assert!(!plan.is_applicable());
    assert!(plan.rejected[0].violations.iter().any(|v| v.field == "$version"));
    assert!(matches!(
        target.apply_restore(&plan, true),
        Err(EngineError::Validation(_))
    ));
    assert!(target.list(Table::Spell)?.is_empty());
    Ok(())
}
