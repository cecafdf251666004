//! Typed errors and HTTP mapping.

use crate::identity::RequestContext;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Declaration-time problems: record schema or crud configuration that cannot be served.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("record `{record}` declares no primary key field")]
    MissingPrimaryKey { record: String },
    #[error("record `{record}` declares no table name")]
    MissingTable { record: String },
    #[error("unknown field `{field}` referenced by {context}")]
    UnknownField { field: String, context: String },
    #[error("name `{0}` is declared twice")]
    DuplicateName(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Failure of a single field conversion. Recovered and logged during fill, fatal when compiling
/// an identity lookup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("field `{field}`: value overflows {kind}")]
    NumberOverflow { field: String, kind: &'static str },
    #[error("field `{field}`: {message}")]
    InvalidValue { field: String, message: String },
    #[error("field `{field}`: unsupported field type `{type_name}`")]
    UnsupportedFieldType { field: String, type_name: String },
    #[error("field `{field}`: conversion panicked: {cause}")]
    Panicked {
        field: String,
        cause: String,
        stack: Option<String>,
    },
    #[error("unknown field `{0}`")]
    UnknownField(String),
}

impl CodecError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        CodecError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Storage collaborator failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unknown table `{0}`")]
    UnknownTable(String),
    #[error("storage: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("number overflow in field `{field}`")]
    NumberOverflow { field: String },
    #[error("unsupported field type: {0}")]
    UnsupportedFieldType(String),
    #[error("user doesn't have access")]
    NoAccess,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence: {0}")]
    Persistence(#[from] StoreError),
    #[error("hook rejected operation: {0}")]
    Hook(String),
    #[error("recovered from panic: {cause}")]
    PanicRecovered { cause: String, stack: Option<String> },
    #[error("record type `{0}` is not registered")]
    NotRegistered(String),
    #[error("predefined query {code}: {msg}")]
    PredefinedQuery {
        status: u16,
        code: &'static str,
        msg: String,
        arg: Option<String>,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<CodecError> for EngineError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::NumberOverflow { field, .. } => EngineError::NumberOverflow { field },
            CodecError::InvalidValue { .. } | CodecError::UnknownField(_) => EngineError::Validation(e.to_string()),
            CodecError::UnsupportedFieldType { type_name, .. } => EngineError::UnsupportedFieldType(type_name),
            CodecError::Panicked { cause, stack, .. } => EngineError::PanicRecovered { cause, stack },
        }
    }
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_)
            | EngineError::NumberOverflow { .. }
            | EngineError::UnsupportedFieldType(_) => StatusCode::BAD_REQUEST,
            EngineError::NoAccess | EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::PredefinedQuery { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            EngineError::Persistence(_)
            | EngineError::Hook(_)
            | EngineError::PanicRecovered { .. }
            | EngineError::NotRegistered(_)
            | EngineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable message shown to every caller; never carries storage or internal text.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::Validation(msg) => msg.clone(),
            EngineError::NumberOverflow { field } => format!("value of `{}` is out of range", field),
            EngineError::UnsupportedFieldType(_) => "unsupported field type".into(),
            EngineError::NoAccess => "no access".into(),
            EngineError::Forbidden(msg) => msg.clone(),
            EngineError::NotFound(_) => "object not found".into(),
            EngineError::Persistence(_) => "storage failure".into(),
            EngineError::Hook(_) => "operation rejected".into(),
            EngineError::PanicRecovered { .. } => "internal error".into(),
            EngineError::NotRegistered(_) | EngineError::Config(_) => "server misconfiguration".into(),
            EngineError::PredefinedQuery { msg, .. } => msg.clone(),
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            EngineError::PredefinedQuery { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct FailureBody {
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

/// An engine error bound to the request that produced it: carries the correlation id and
/// whether internal details may be shown to this caller.
#[derive(Debug)]
pub struct ApiFailure {
    pub error: EngineError,
    pub correlation_id: String,
    expose_details: bool,
    logs: Option<Vec<String>>,
}

impl ApiFailure {
    pub fn new(error: EngineError, ctx: &RequestContext) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let expose_details = ctx.debug_enabled();
        let logs = expose_details.then(|| ctx.log.lines().to_vec());
        ApiFailure {
            error,
            correlation_id,
            expose_details,
            logs,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.error.status_code()
    }

    pub fn body(&self) -> FailureBody {
        let (arg, stack) = match &self.error {
            EngineError::PredefinedQuery { arg, .. } => (arg.clone(), None),
            EngineError::PanicRecovered { stack, .. } if self.expose_details => (None, stack.clone()),
            _ => (None, None),
        };
        let with_id = matches!(
            self.status_code(),
            StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR
        );
        FailureBody {
            msg: self.error.public_message(),
            err: self.expose_details.then(|| self.error.to_string()),
            id: (with_id || self.expose_details).then(|| self.correlation_id.clone()),
            code: self.error.code(),
            arg,
            stack,
            logs: self.logs.clone(),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(correlation_id = %self.correlation_id, error = %self.error, "request failed");
        } else {
            tracing::warn!(correlation_id = %self.correlation_id, error = %self.error, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RequestIdentity;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(EngineError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            EngineError::NumberOverflow { field: "age".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(EngineError::NoAccess.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(EngineError::NotFound("1".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EngineError::Persistence(StoreError::UnknownTable("events".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            EngineError::Hook("vetoed".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn non_admin_failure_hides_internal_text() {
        let ctx = RequestContext::new(RequestIdentity::user(7, 0), true);
        let failure = ApiFailure::new(
            EngineError::Persistence(StoreError::Other("relation \"events\" does not exist".into())),
            &ctx,
        );
        let body = failure.body();
        assert_eq!(body.msg, "storage failure");
        assert!(body.err.is_none());
        assert!(body.logs.is_none());
        assert_eq!(body.id.as_deref(), Some(failure.correlation_id.as_str()));
    }

    #[test]
    fn admin_debug_failure_exposes_error_and_logs() {
        let mut identity = RequestIdentity::admin();
        identity.debug = true;
        let mut ctx = RequestContext::new(identity, true);
        ctx.log.note("filter SQL: `id = ?`");
        let failure = ApiFailure::new(EngineError::NotFound("42".into()), &ctx);
        let body = failure.body();
        assert_eq!(body.msg, "object not found");
        assert_eq!(body.err.as_deref(), Some("not found: 42"));
        assert_eq!(body.logs.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn codec_errors_map_into_taxonomy() {
        let e: EngineError = CodecError::NumberOverflow {
            field: "level".into(),
            kind: "u8",
        }
        .into();
        assert!(matches!(e, EngineError::NumberOverflow { ref field } if field == "level"));
        let e: EngineError = CodecError::UnsupportedFieldType {
            field: "geo".into(),
            type_name: "Point".into(),
        }
        .into();
        assert!(matches!(e, EngineError::UnsupportedFieldType(ref t) if t == "Point"));
    }
}
