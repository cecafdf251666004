//! Standard response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Serialize, Debug)]
pub struct ListResponse {
    pub items: Vec<Map<String, Value>>,
    pub pages: u64,
    pub total_items: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

impl ListResponse {
    /// Caller has no identity to scope by: an empty page, not an error.
    pub fn no_access(logs: Option<Vec<String>>) -> Self {
        ListResponse {
            items: Vec::new(),
            pages: 0,
            total_items: 0,
            msg: Some("no access".into()),
            logs,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ItemResponse {
    pub item: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(skip)]
    pub created: bool,
}

#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub id: Value,
    /// `true` when only the soft-delete flag was set.
    pub soft: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl IntoResponse for ItemResponse {
    fn into_response(self) -> Response {
        let status = if self.created { StatusCode::CREATED } else { StatusCode::OK };
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
