//! Sample payloads and hand-built archives.

use std::collections::BTreeMap;

use serde_json::{json, Value};

pub fn owlbear() -> Value {
    json!({
        "name": "Owlbear",
        "size": "Large",
        "alignment": "unaligned",
        "hit_points": "59 (7d10+21)",
        "armor_class": "13",
        "challenge": "3 (700 XP)",
        "str_score": 20,
        "str_mod": "(+5)",
        "dex_score": 12,
        "dex_mod": "(+1)",
        "tags": ["monstrosity"],
    })
}

/// The reference example that lacks its required challenge rating.
pub fn owlbear_without_challenge() -> Value {
    json!({
        "name": "Owlbear",
        "hit_points": "59 (7d10+21)",
        "armor_class": "13",
    })
}

pub fn goblin() -> Value {
    json!({
        "name": "Goblin",
        "size": "Small",
        "hit_points": "7 (2d6)",
        "armor_class": "15 (leather armor, shield)",
        "challenge": "1/4 (50 XP)",
        "dex_score": 14,
        "dex_mod": "(+2)",
        "tags": ["humanoid", "goblinoid"],
    })
}

pub fn fireball() -> Value {
    json!({
        "name": "Fireball",
        "level": 3,
        "school": "Evocation",
        "casting_time": "1 action",
        "range": "150 feet",
        "components": "V, S, M",
        "duration": "Instantaneous",
    })
}

pub fn bag_of_holding() -> Value {
    json!({
        "name": "Bag of Holding",
        "type": "Wondrous item",
        "rarity": "uncommon",
        "properties": {"capacity_lb": 500, "weight_lb": 15},
    })
}

pub fn character() -> Value {
    json!({
        "name": "Mira Thorn",
        "player_name": "Sam",
        "race": "Half-Elf",
        "class": "Warlock",
        "alignment": "Chaotic Good",
        "level": 5,
        "xp": 6500,
        "ability_scores": {"STR": 8, "DEX": 14, "CON": 13, "INT": 10, "WIS": 12, "CHA": 18},
        "save_profs": ["WIS", "CHA"],
        "hp_max": 38,
        "hp_current": 31,
        "ac": 13,
        "currency": {"gp": 42, "sp": 7},
        "spell_slots": {"3": 2},
        "features": ["Pact of the Tome", {"name": "Fey Presence", "uses": 1}],
    })
}

pub fn quest() -> Value {
    json!({
        "kind": "quest",
        "name": "The Sunken Bell",
        "campaign": "Shattered Coast",
        "status": "active",
    })
}

/// Build a tar archive from `(path, bytes)` pairs without any checks.
pub fn raw_archive(files: &[(&str, Vec<u8>)]) -> Result<Vec<u8>, std::io::Error> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, data.as_slice())?;
    }
    builder.into_inner()
}

/// A well-formed archive at `schema_version` holding the given raw records
/// per table name, with correct counts and checksums.
pub fn archive_with(
    schema_version: u32,
    tables: &[(&str, Vec<Value>)],
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    let mut entries = BTreeMap::new();
    for (table, records) in tables {
        let file = format!("{table}.json");
        let bytes = serde_json::to_vec(records)?;
        entries.insert(
            table.to_string(),
            json!({
                "file": file,
                "count": records.len(),
                "checksum": blake3::hash(&bytes).to_hex().to_string(),
            }),
        );
        files.push((file, bytes));
    }
    let manifest = json!({
        "schema_version": schema_version,
        "created_at": chrono::Utc::now(),
        "tables": entries,
    });

    let mut all = vec![("manifest.json".to_string(), serde_json::to_vec(&manifest)?)];
    all.extend(files);
    let borrowed: Vec<(&str, Vec<u8>)> = all.iter().map(|(p, d)| (p.as_str(), d.clone())).collect();
    Ok(raw_archive(&borrowed)?)
}

/// A creature record in the version 1 archive shape: no sync marker and
/// tags stored as a JSON-encoded string.
pub fn v1_creature(key: &str, name: &str, tags: &str) -> Value {
    json!({
        "table": "creature",
        "key": key,
        "version": 1,
        "origin": "reference_dataset",
        "updated_at": "2024-01-15T09:00:00Z",
        "fields": {"name": name, "challenge": "1 (200 XP)", "tags": tags},
    })
}
