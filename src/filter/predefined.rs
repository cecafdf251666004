//! Named server-side filter bundles selected with `?query=<name>&query_args=<json>`.

use crate::config::ListConfig;
use crate::error::EngineError;
use crate::filter::ListParams;
use crate::recover::panic_cause;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Rewrites the bundle's filters from the request arguments.
pub type ArgsProcessor = fn(&Value, Map<String, Value>) -> Result<Map<String, Value>, EngineError>;

#[derive(Clone, Debug)]
pub struct PredefinedQuery {
    pub name: String,
    pub filters: Map<String, Value>,
    pub required_args: Vec<String>,
    pub args_processor: Option<ArgsProcessor>,
    pub sort_field: Option<String>,
    pub order: Option<i64>,
    pub per_page: Option<i64>,
    pub page: Option<i64>,
}

impl PredefinedQuery {
    /// `filters` must be a JSON object; anything else yields an empty bundle.
    pub fn new(name: &str, filters: Value) -> Self {
        let filters = match filters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        PredefinedQuery {
            name: name.to_string(),
            filters,
            required_args: Vec::new(),
            args_processor: None,
            sort_field: None,
            order: None,
            per_page: None,
            page: None,
        }
    }

    pub fn require(mut self, arg: &str) -> Self {
        self.required_args.push(arg.to_string());
        self
    }

    pub fn process_args(mut self, f: ArgsProcessor) -> Self {
        self.args_processor = Some(f);
        self
    }

    pub fn sort(mut self, field: &str, order: i64) -> Self {
        self.sort_field = Some(field.to_string());
        self.order = Some(order);
        self
    }

    pub fn per_page(mut self, n: i64) -> Self {
        self.per_page = Some(n);
        self
    }

    pub fn page(mut self, n: i64) -> Self {
        self.page = Some(n);
        self
    }
}

fn pq_error(status: u16, code: &'static str, msg: &str, arg: Option<String>) -> EngineError {
    EngineError::PredefinedQuery {
        status,
        code,
        msg: msg.to_string(),
        arg,
    }
}

/// Resolve `params.query` against the configured bundles. Returns the filter document to compile
/// and the effective list parameters; the client's page survives unless the bundle sets one.
pub fn resolve_predefined(
    list: &ListConfig,
    params: &ListParams,
) -> Result<(Map<String, Value>, ListParams), EngineError> {
    let name = params.query.as_deref().unwrap_or_default();
    if list.predefined.is_empty() {
        return Err(pq_error(400, "PQ3", "wrong q", None));
    }
    let pq = list
        .predefined
        .get(name)
        .ok_or_else(|| pq_error(400, "PQ1", "q not found", Some(name.to_string())))?;

    let args = match params.query_args.as_deref().map(str::trim) {
        None | Some("") => Value::Object(Map::new()),
        Some(raw) => serde_json::from_str::<Value>(raw).map_err(|_| pq_error(400, "PQ2", "malformed args", None))?,
    };
    for required in &pq.required_args {
        if args.get(required).is_none() {
            return Err(pq_error(400, "PQ3", "required q arg not provided", Some(required.clone())));
        }
    }

    let filters = match pq.args_processor {
        None => pq.filters.clone(),
        Some(processor) => {
            let base = pq.filters.clone();
            match catch_unwind(AssertUnwindSafe(|| processor(&args, base))) {
                Ok(Ok(filters)) => filters,
                Ok(Err(e)) => {
                    tracing::warn!(query = %pq.name, error = %e, "predefined query args processor failed");
                    return Err(pq_error(500, "PQ4", "error processing predefined q args", None));
                }
                Err(payload) => {
                    tracing::error!(query = %pq.name, cause = %panic_cause(payload), "predefined query args processor panicked");
                    return Err(pq_error(500, "PQ4", "err processing predefined q", None));
                }
            }
        }
    };

    let effective = ListParams {
        filter: None,
        sort_field: pq.sort_field.clone().or_else(|| params.sort_field.clone()),
        order: pq.order.unwrap_or(params.order),
        page: pq.page.unwrap_or(params.page),
        per_page: pq.per_page.unwrap_or(params.per_page),
        query: params.query.clone(),
        query_args: params.query_args.clone(),
    };
    Ok((filters, effective))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn by_owner(args: &Value, mut filters: Map<String, Value>) -> Result<Map<String, Value>, EngineError> {
        filters.insert("owner_id".into(), args["owner"].clone());
        Ok(filters)
    }

    fn list_with(queries: Vec<PredefinedQuery>) -> ListConfig {
        ListConfig {
            predefined: queries.into_iter().map(|q| (q.name.clone(), q)).collect(),
            ..ListConfig::default()
        }
    }

    fn params(query: &str, args: Option<&str>) -> ListParams {
        ListParams {
            query: Some(query.into()),
            query_args: args.map(String::from),
            page: 3,
            per_page: 10,
            ..ListParams::default()
        }
    }

    fn code_of(err: EngineError) -> &'static str {
        match err {
            EngineError::PredefinedQuery { code, .. } => code,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bundle_overrides_sort_and_keeps_client_page() {
        let list = list_with(vec![PredefinedQuery::new("young", json!({"age": {"$lt": 18}})).sort("age", -1)]);
        let (filters, effective) = resolve_predefined(&list, &params("young", None)).unwrap();
        assert_eq!(Value::Object(filters), json!({"age": {"$lt": 18}}));
        assert_eq!(effective.sort_field.as_deref(), Some("age"));
        assert_eq!(effective.order, -1);
        assert_eq!(effective.page, 3);
        assert_eq!(effective.per_page, 10);
        assert!(effective.filter.is_none());
    }

    #[test]
    fn args_processor_rewrites_filters() {
        let list = list_with(vec![PredefinedQuery::new("mine", json!({})).require("owner").process_args(by_owner)]);
        let (filters, _) = resolve_predefined(&list, &params("mine", Some(r#"{"owner": 7}"#))).unwrap();
        assert_eq!(filters["owner_id"], json!(7));
    }

    #[test]
    fn resolution_errors_carry_codes() {
        let list = list_with(vec![PredefinedQuery::new("mine", json!({})).require("owner")]);
        assert_eq!(code_of(resolve_predefined(&list, &params("other", None)).unwrap_err()), "PQ1");
        assert_eq!(code_of(resolve_predefined(&list, &params("mine", Some("{oops"))).unwrap_err()), "PQ2");
        assert_eq!(code_of(resolve_predefined(&list, &params("mine", Some("{}"))).unwrap_err()), "PQ3");
        assert_eq!(code_of(resolve_predefined(&ListConfig::default(), &params("mine", None)).unwrap_err()), "PQ3");
    }

    #[test]
    fn panicking_processor_is_pq4() {
        fn boom(_: &Value, _: Map<String, Value>) -> Result<Map<String, Value>, EngineError> {
            panic!("processor failure")
        }
        let list = list_with(vec![PredefinedQuery::new("bad", json!({})).process_args(boom)]);
        let err = resolve_predefined(&list, &params("bad", None)).unwrap_err();
        assert!(matches!(err, EngineError::PredefinedQuery { status: 500, code: "PQ4", .. }));
    }
}
