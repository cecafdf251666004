//! Demo server: tasks owned by their creator, task comments, boards shared through a
//! membership table, and cards writable by the members of their board.
//!
//! Run from repo root: `cargo run -p crudmap-demo`. With `DATABASE_URL` set the records live in
//! PostgreSQL (tables are created on startup); without it an in-memory store is used.
//! Identity comes from the `x-user-id`, `x-role-group`, `x-admin` and `x-debug` headers.

use axum::Router;
use chrono::{DateTime, Utc};
use crudmap::{
    common_routes_with_ready, crud_routes, ensure_database_exists, ensure_relation_table, ensure_table, AppState,
    CodecError, CodecRegistry, CrudConfig, CrudEngine, EngineConfig, FieldKind, FieldRule, FieldValue, MemoryStore,
    PgStore, PredefinedQuery, Record, RelatedModels, SchemaBuilder, SchemaRegistry, Store, TrustedHeaders,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

const BOARD_MEMBERS: &str = "board_members";

#[derive(Clone, Debug, Default)]
struct Task {
    id: u64,
    owner_id: u64,
    title: String,
    done: bool,
    priority: u8,
    archived: bool,
    due_at: Option<DateTime<Utc>>,
    labels: Vec<u64>,
    color: Value,
}

impl Record for Task {
    fn declare(s: &mut SchemaBuilder) {
        s.table("tasks");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("OwnerId", FieldKind::U64).owner_reference().filterable();
        s.field("Title", FieldKind::String)
            .filterable()
            .validate(FieldRule::Required)
            .validate(FieldRule::MaxLength(200));
        s.field("Done", FieldKind::Bool).filterable();
        s.field("Priority", FieldKind::U8).filterable().validate(FieldRule::MaxValue(5.0));
        s.field("Archived", FieldKind::Bool).soft_delete();
        s.field("DueAt", FieldKind::Timestamp).nullable().filterable();
        s.field("Labels", FieldKind::IdList);
        s.field("Color", FieldKind::Custom("rgb".into())).nullable();
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Id" => self.id.into(),
            "OwnerId" => self.owner_id.into(),
            "Title" => self.title.clone().into(),
            "Done" => self.done.into(),
            "Priority" => self.priority.into(),
            "Archived" => self.archived.into(),
            "DueAt" => self.due_at.into(),
            "Labels" => self.labels.clone().into(),
            "Color" => FieldValue::Custom(self.color.clone()),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "Id" => self.id = value.as_u64(field)?,
            "OwnerId" => self.owner_id = value.as_u64(field)?,
            "Title" => self.title = value.into_string(field)?,
            "Done" => self.done = value.as_bool(field)?,
            "Priority" => self.priority = value.as_u8(field)?,
            "Archived" => self.archived = value.as_bool(field)?,
            "DueAt" => self.due_at = if value.is_null() { None } else { Some(value.into_timestamp(field)?) },
            "Labels" => self.labels = value.into_id_list(field)?,
            "Color" => self.color = if value.is_null() { Value::Null } else { value.into_custom(field)? },
            _ => return Err(CodecError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct TaskComment {
    id: u64,
    task_id: u64,
    body: String,
    hidden: bool,
}

impl Record for TaskComment {
    fn declare(s: &mut SchemaBuilder) {
        s.table("task_comments");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("TaskId", FieldKind::U64).filterable().validate(FieldRule::Required);
        s.field("Body", FieldKind::String).validate(FieldRule::NotEmpty);
        s.field("Hidden", FieldKind::Bool).soft_delete();
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Id" => self.id.into(),
            "TaskId" => self.task_id.into(),
            "Body" => self.body.clone().into(),
            "Hidden" => self.hidden.into(),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "Id" => self.id = value.as_u64(field)?,
            "TaskId" => self.task_id = value.as_u64(field)?,
            "Body" => self.body = value.into_string(field)?,
            "Hidden" => self.hidden = value.as_bool(field)?,
            _ => return Err(CodecError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

/// Visible to the users listed in `board_members`.
#[derive(Clone, Debug, Default)]
struct Board {
    id: u64,
    name: String,
}

impl Record for Board {
    fn declare(s: &mut SchemaBuilder) {
        s.table("boards");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("Name", FieldKind::String).filterable().validate(FieldRule::Required);
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Id" => self.id.into(),
            "Name" => self.name.clone().into(),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "Id" => self.id = value.as_u64(field)?,
            "Name" => self.name = value.into_string(field)?,
            _ => return Err(CodecError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

/// Writable by members of its board (rows in `board_members`).
#[derive(Clone, Debug, Default)]
struct Card {
    id: u64,
    board_id: u64,
    text: String,
}

impl Record for Card {
    fn declare(s: &mut SchemaBuilder) {
        s.table("cards");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("BoardId", FieldKind::U64).filterable().validate(FieldRule::Required);
        s.field("Text", FieldKind::String).validate(FieldRule::NotEmpty);
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Id" => self.id.into(),
            "BoardId" => self.board_id.into(),
            "Text" => self.text.clone().into(),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "Id" => self.id = value.as_u64(field)?,
            "BoardId" => self.board_id = value.as_u64(field)?,
            "Text" => self.text = value.into_string(field)?,
            _ => return Err(CodecError::UnknownField(field.to_string())),
        }
        Ok(())
    }
}

/// `rgb`: "#rrggbb" on the wire, stored lowercased.
fn rgb_fill(v: &Value) -> Result<Value, String> {
    let s = v.as_str().ok_or("expected a color string")?;
    let hex = s.strip_prefix('#').ok_or("color must start with #")?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{}` is not a #rrggbb color", s));
    }
    Ok(Value::String(format!("#{}", hex.to_ascii_lowercase())))
}

fn rgb_export(v: &Value) -> Result<Value, String> {
    Ok(v.clone())
}

fn task_config() -> CrudConfig<Task> {
    CrudConfig::new()
        .predefined(PredefinedQuery::new("open", json!({"done": false})).sort("priority", -1))
        .related(
            "comments",
            RelatedModels::<Task, TaskComment>::new("task_id", |t| Some(t.id.into())),
        )
}

async fn open_store(schemas: &SchemaRegistry) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::info!("DATABASE_URL not set, using the in-memory store");
        let store = MemoryStore::new();
        for table in schemas.tables() {
            store.create_table(&table).await;
        }
        store.create_table(BOARD_MEMBERS).await;
        return Ok(Arc::new(store));
    };

    ensure_database_exists(&database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    let mut store = PgStore::new(pool.clone());
    for table in schemas.tables() {
        if let Some(mapping) = schemas.mapping_for_table(&table) {
            ensure_table(&pool, &mapping).await?;
            store.register(&mapping);
        }
    }
    ensure_relation_table(&pool, BOARD_MEMBERS).await?;
    store.register_relation_table(BOARD_MEMBERS);
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("crudmap=info,crudmap_demo=info")),
        )
        .init();

    let engine_config = EngineConfig::from_env()?;
    let schemas = SchemaRegistry::new();
    schemas.register::<Task>()?;
    schemas.register::<TaskComment>()?;
    schemas.register::<Board>()?;
    schemas.register::<Card>()?;

    let store = open_store(&schemas).await?;
    let mut codecs = CodecRegistry::new();
    codecs.register("rgb", rgb_fill, rgb_export);
    let state = AppState::new(store, Arc::new(schemas), engine_config)
        .with_codecs(codecs)
        .with_identity(TrustedHeaders);

    let tasks = CrudEngine::new(state.clone(), task_config())?;
    let comments = CrudEngine::<TaskComment>::new(state.clone(), CrudConfig::new())?;
    let boards = CrudEngine::<Board>::new(state.clone(), CrudConfig::new().store_relation(BOARD_MEMBERS))?;
    let cards = CrudEngine::<Card>::new(
        state.clone(),
        CrudConfig::new().permission_table(BOARD_MEMBERS, |c| Some(c.board_id.into())),
    )?;

    let api = Router::new()
        .nest("/tasks", crud_routes(tasks))
        .nest("/comments", crud_routes(comments))
        .nest("/boards", crud_routes(boards))
        .nest("/cards", crud_routes(cards));
    let app = Router::new()
        .merge(common_routes_with_ready(state))
        .nest("/api/v1", api);

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("crudmap demo listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
