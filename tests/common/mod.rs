#![allow(dead_code)]

use crudmap::{
    AppState, Capabilities, CodecError, CodecRegistry, CrudConfig, CrudEngine, EngineConfig, EngineError, FieldKind,
    FieldRule, FieldValue, MemoryStore, Record, RequestContext, RequestIdentity, SchemaBuilder, SchemaRegistry,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    pub id: u64,
    pub owner_id: u64,
    pub title: String,
    pub age: u8,
    pub level: u8,
    pub secret: String,
    pub is_removed: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub tags: Vec<u64>,
}

impl Record for Event {
    fn declare(s: &mut SchemaBuilder) {
        s.table("events");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("OwnerId", FieldKind::U64).owner_reference().filterable();
        s.field("Title", FieldKind::String).filterable().validate(FieldRule::NotEmpty);
        s.field("Age", FieldKind::U8).filterable();
        s.field("Level", FieldKind::U8).min_write_role(2);
        s.field("Secret", FieldKind::String).admin_only();
        s.field("IsRemoved", FieldKind::Bool).soft_delete();
        s.field("CreatedAt", FieldKind::Timestamp).nullable();
        s.field("Tags", FieldKind::IdList);
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Id" => self.id.into(),
            "OwnerId" => self.owner_id.into(),
            "Title" => self.title.clone().into(),
            "Age" => self.age.into(),
            "Level" => self.level.into(),
            "Secret" => self.secret.clone().into(),
            "IsRemoved" => self.is_removed.into(),
            "CreatedAt" => self.created_at.map(FieldValue::Timestamp).unwrap_or(FieldValue::Null),
            "Tags" => FieldValue::IdList(self.tags.clone()),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "Id" => self.id = value.as_u64(field)?,
            "OwnerId" => self.owner_id = value.as_u64(field)?,
            "Title" => self.title = value.into_string(field)?,
            "Age" => self.age = value.as_u8(field)?,
            "Level" => self.level = value.as_u8(field)?,
            "Secret" => self.secret = value.into_string(field)?,
            "IsRemoved" => self.is_removed = value.as_bool(field)?,
            "CreatedAt" => {
                self.created_at = if value.is_null() {
                    None
                } else {
                    Some(value.into_timestamp(field)?)
                }
            }
            "Tags" => self.tags = value.into_id_list(field)?,
            _ => return Err(CodecError::UnknownField(field.to_string())),
        }
        Ok(())
    }

    /// Titles "veto" and "explode" make the update hook fail.
    fn capabilities() -> Capabilities<Self> {
        Capabilities::none().with_update_hook(|_, updated, _| match updated.title.as_str() {
            "veto" => Err(EngineError::Validation("title is reserved".into())),
            "explode" => panic!("update hook exploded"),
            _ => Ok(()),
        })
    }
}

/// Child of `Event` for related-items lookups.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Comment {
    pub id: u64,
    pub event_id: u64,
    pub body: String,
    pub hidden: bool,
}

impl Record for Comment {
    fn declare(s: &mut SchemaBuilder) {
        s.table("comments");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("EventId", FieldKind::U64).filterable();
        s.field("Body", FieldKind::String);
        s.field("Hidden", FieldKind::Bool).soft_delete();
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Id" => self.id.into(),
            "EventId" => self.event_id.into(),
            "Body" => self.body.clone().into(),
            "Hidden" => self.hidden.into(),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "Id" => self.id = value.as_u64(field)?,
            "EventId" => self.event_id = value.as_u64(field)?,
            "Body" => self.body = value.into_string(field)?,
            "Hidden" => self.hidden = value.as_bool(field)?,
            _ => return Err(CodecError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

/// Relation-owned record: access goes through rows in `note_users`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Note {
    pub id: u64,
    pub text: String,
}

impl Record for Note {
    fn declare(s: &mut SchemaBuilder) {
        s.table("notes");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("Text", FieldKind::String).filterable();
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Id" => self.id.into(),
            "Text" => self.text.clone().into(),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "Id" => self.id = value.as_u64(field)?,
            "Text" => self.text = value.into_string(field)?,
            _ => return Err(CodecError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

pub const TABLES: &[&str] = &["events", "comments", "event_tags", "notes", "note_users", "event_members"];

pub async fn memory_state(config: EngineConfig) -> (MemoryStore, AppState) {
    let store = MemoryStore::new();
    for t in TABLES {
        store.create_table(t).await;
    }
    let schemas = SchemaRegistry::new();
    schemas.register::<Event>().unwrap();
    schemas.register::<Comment>().unwrap();
    schemas.register::<Note>().unwrap();
    let state = AppState::new(Arc::new(store.clone()), Arc::new(schemas), config).with_codecs(CodecRegistry::new());
    (store, state)
}

pub async fn event_engine(config: CrudConfig<Event>) -> (MemoryStore, CrudEngine<Event>) {
    let (store, state) = memory_state(EngineConfig::default()).await;
    (store, CrudEngine::new(state, config).unwrap())
}

pub fn user(id: u64) -> RequestIdentity {
    RequestIdentity::user(id, 0)
}

pub fn admin_debug() -> RequestIdentity {
    let mut id = RequestIdentity::admin();
    id.debug = true;
    id
}

pub fn ctx(identity: RequestIdentity) -> RequestContext {
    RequestContext::new(identity, true)
}

pub fn doc(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

/// Seed events directly through a store transaction: (owner, title, age, removed).
pub async fn seed_events(store: &MemoryStore, rows: &[(u64, &str, u8, bool)]) {
    use crudmap::Store;
    let mut tx = store.begin().await.unwrap();
    for (owner, title, age, removed) in rows {
        let row = doc(json!({
            "owner_id": owner,
            "title": title,
            "age": age,
            "level": 0,
            "secret": format!("secret of {}", title),
            "is_removed": removed,
            "created_at": "2024-05-01T10:00:00Z",
            "tags": [],
        }));
        tx.insert("events", "id", row).await.unwrap();
    }
    tx.commit().await.unwrap();
}
