use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CoreError;
use crate::ids::Table;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    /// Accepts integers and floats.
    Float,
    Boolean,
    List(Box<FieldType>),
    /// String-keyed mapping whose values share one type.
    Map(Box<FieldType>),
    /// Any non-null value.
    Any,
}

impl FieldType {
    pub fn list_of(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    pub fn map_of(inner: FieldType) -> Self {
        FieldType::Map(Box::new(inner))
    }

    pub fn describe(&self) -> String {
        match self {
            FieldType::Text => "text".into(),
            FieldType::Integer => "integer".into(),
            FieldType::Float => "number".into(),
            FieldType::Boolean => "boolean".into(),
            FieldType::List(inner) => format!("list of {}", inner.describe()),
            FieldType::Map(inner) => format!("map of {}", inner.describe()),
            FieldType::Any => "any value".into(),
        }
    }
}

/// Semantic constraint attached to a field, checked after the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Inclusive numeric range.
    Range { min: i64, max: i64 },
    /// Text must match one of these, compared case-insensitively and
    /// normalized to the listed spelling.
    OneOf(Vec<String>),
    /// Text must not be blank.
    NonEmpty,
    /// Text modifier like `(+2)` that must equal `floor((score - 10) / 2)`
    /// of the named score field.
    ModifierOf(String),
    /// Every value of a mapping within an inclusive range.
    EachInRange { min: i64, max: i64 },
    /// Every key of a mapping drawn from this set, normalized like `OneOf`.
    KeysOneOf(Vec<String>),
}

impl Constraint {
    pub fn one_of(allowed: &[&str]) -> Self {
        Constraint::OneOf(allowed.iter().map(|s| s.to_string()).collect())
    }

    pub fn keys_one_of(allowed: &[&str]) -> Self {
        Constraint::KeysOneOf(allowed.iter().map(|s| s.to_string()).collect())
    }

    fn describe(&self) -> String {
        match self {
            Constraint::Range { min, max } | Constraint::EachInRange { min, max } => {
                if *max == i64::MAX {
                    format!(">= {min}")
                } else {
                    format!("{min}..={max}")
                }
            }
            Constraint::OneOf(allowed) => format!("one of: {}", allowed.join(", ")),
            Constraint::NonEmpty => "non-empty".into(),
            Constraint::ModifierOf(score) => format!("modifier of {score}, e.g. '(+2)'"),
            Constraint::KeysOneOf(allowed) => format!("keys: {}", allowed.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub constraints: Vec<Constraint>,
}

impl FieldSpec {
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            constraints: Vec::new(),
        }
    }

    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Declarative shape of one logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub table: Table,
    /// Field whose value derives the key of reference and generated records.
    pub key_field: String,
    /// Field whose value prefixes the derived key, for tables that hold
    /// several kinds of record under one namespace.
    pub key_qualifier: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(table: Table, key_field: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            table,
            key_field: key_field.to_string(),
            key_qualifier: None,
            fields,
        }
    }

    /// Prefix derived keys with the value of `field`.
    pub fn qualified_by(mut self, field: &str) -> Self {
        self.key_qualifier = Some(field.to_string());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// JSON object of field name to type hint, passed to the generator to
    /// shape its output. Not enforced by the generator.
    pub fn request_template(&self) -> Value {
        let mut template = serde_json::Map::new();
        for spec in &self.fields {
            let mut hint = spec.field_type.describe();
            for constraint in &spec.constraints {
                hint.push_str(&format!(" ({})", constraint.describe()));
            }
            if spec.required {
                hint.push_str(" [required]");
            }
            template.insert(spec.name.clone(), Value::String(hint));
        }
        Value::Object(template)
    }
}

/// One schema per logical table.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<Table, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the schemas of every built-in table.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(creature_schema());
        registry.register(spell_schema());
        registry.register(item_schema());
        registry.register(character_schema());
        registry.register(campaign_entity_schema());
        registry
    }

    /// Register a schema, replacing any previous one for the same table.
    pub fn register(&mut self, schema: Schema) {
        self.schemas.insert(schema.table, schema);
    }

    pub fn schema_for(&self, table: Table) -> Result<&Schema, CoreError> {
        self.schemas
            .get(&table)
            .ok_or_else(|| CoreError::UnknownTable(table.as_str().to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = Table> + '_ {
        self.schemas.keys().copied()
    }
}

const ABILITIES: [&str; 6] = ["str", "dex", "con", "int", "wis", "cha"];

const ABILITY_KEYS: [&str; 6] = ["STR", "DEX", "CON", "INT", "WIS", "CHA"];

const SPELL_SCHOOLS: [&str; 8] = [
    "Abjuration",
    "Conjuration",
    "Divination",
    "Enchantment",
    "Evocation",
    "Illusion",
    "Necromancy",
    "Transmutation",
];

const RARITIES: [&str; 6] = ["common", "uncommon", "rare", "very rare", "legendary", "artifact"];

const ALIGNMENTS: [&str; 10] = [
    "Lawful Good",
    "Neutral Good",
    "Chaotic Good",
    "Lawful Neutral",
    "True Neutral",
    "Chaotic Neutral",
    "Lawful Evil",
    "Neutral Evil",
    "Chaotic Evil",
    "Unaligned",
];

const ENTITY_KINDS: [&str; 5] = ["campaign", "quest", "location", "npc", "event"];

const QUEST_STATUSES: [&str; 3] = ["active", "completed", "failed"];

fn text(name: &str) -> FieldSpec {
    FieldSpec::optional(name, FieldType::Text)
}

fn name_field() -> FieldSpec {
    FieldSpec::required("name", FieldType::Text).with(Constraint::NonEmpty)
}

fn creature_schema() -> Schema {
    let mut fields = vec![
        name_field(),
        FieldSpec::required("challenge", FieldType::Text).with(Constraint::NonEmpty),
        text("size"),
        text("alignment"),
        text("hit_points"),
        text("armor_class"),
        text("speed"),
    ];
    for ability in ABILITIES {
        fields.push(
            FieldSpec::optional(&format!("{ability}_score"), FieldType::Integer)
                .with(Constraint::Range { min: 1, max: 30 }),
        );
    }
    for ability in ABILITIES {
        fields.push(
            FieldSpec::optional(&format!("{ability}_mod"), FieldType::Text)
                .with(Constraint::ModifierOf(format!("{ability}_score"))),
        );
    }
    fields.extend([
        text("skills"),
        text("saving_throws"),
        text("senses"),
        text("languages"),
        text("abilities"),
        FieldSpec::optional("tags", FieldType::list_of(FieldType::Text)),
        text("source"),
    ]);
    Schema::new(Table::Creature, "name", fields)
}

fn spell_schema() -> Schema {
    Schema::new(
        Table::Spell,
        "name",
        vec![
            name_field(),
            FieldSpec::required("level", FieldType::Integer)
                .with(Constraint::Range { min: 0, max: 9 }),
            FieldSpec::optional("school", FieldType::Text).with(Constraint::one_of(&SPELL_SCHOOLS)),
            text("casting_time"),
            text("range"),
            text("components"),
            text("duration"),
            text("description"),
            text("classes"),
            text("source"),
        ],
    )
}

fn item_schema() -> Schema {
    Schema::new(
        Table::Item,
        "name",
        vec![
            name_field(),
            text("type"),
            FieldSpec::optional("rarity", FieldType::Text).with(Constraint::one_of(&RARITIES)),
            text("description"),
            FieldSpec::optional("properties", FieldType::map_of(FieldType::Any)),
            text("source"),
        ],
    )
}

fn character_schema() -> Schema {
    let non_negative = Constraint::Range {
        min: 0,
        max: i64::MAX,
    };
    Schema::new(
        Table::Character,
        "name",
        vec![
            name_field(),
            text("player_name"),
            text("race"),
            text("class"),
            text("subclass"),
            text("background"),
            text("campaign"),
            FieldSpec::optional("alignment", FieldType::Text).with(Constraint::one_of(&ALIGNMENTS)),
            FieldSpec::optional("level", FieldType::Integer)
                .with(Constraint::Range { min: 1, max: 20 }),
            FieldSpec::optional("xp", FieldType::Integer).with(non_negative.clone()),
            FieldSpec::optional("ability_scores", FieldType::map_of(FieldType::Integer))
                .with(Constraint::keys_one_of(&ABILITY_KEYS))
                .with(Constraint::EachInRange { min: 1, max: 30 }),
            FieldSpec::optional("save_profs", FieldType::list_of(FieldType::Text)),
            FieldSpec::optional("skill_profs", FieldType::list_of(FieldType::Text)),
            FieldSpec::optional("hp_max", FieldType::Integer).with(non_negative.clone()),
            FieldSpec::optional("hp_current", FieldType::Integer),
            FieldSpec::optional("hp_temp", FieldType::Integer).with(non_negative.clone()),
            FieldSpec::optional("ac", FieldType::Integer).with(non_negative.clone()),
            FieldSpec::optional("speed", FieldType::Integer).with(non_negative),
            FieldSpec::optional("initiative_bonus", FieldType::Integer),
            FieldSpec::optional("features", FieldType::list_of(FieldType::Any)),
            FieldSpec::optional("equipment", FieldType::list_of(FieldType::Any)),
            FieldSpec::optional("currency", FieldType::map_of(FieldType::Integer))
                .with(Constraint::keys_one_of(&["pp", "gp", "ep", "sp", "cp"])),
            FieldSpec::optional("spells", FieldType::map_of(FieldType::Any)),
            FieldSpec::optional("spell_slots", FieldType::map_of(FieldType::Integer))
                .with(Constraint::EachInRange { min: 0, max: 9 }),
            text("notes"),
        ],
    )
}

fn campaign_entity_schema() -> Schema {
    Schema::new(
        Table::CampaignEntity,
        "name",
        vec![
            FieldSpec::required("kind", FieldType::Text).with(Constraint::one_of(&ENTITY_KINDS)),
            name_field(),
            text("campaign"),
            text("description"),
            text("notes"),
            text("relationship"),
            text("date_in_game"),
            FieldSpec::optional("status", FieldType::Text).with(Constraint::one_of(&QUEST_STATUSES)),
        ],
    )
    .qualified_by("kind")
}
