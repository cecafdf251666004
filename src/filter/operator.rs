//! Supported filter operators and the structured conditions they compile to.

use crate::codec::FieldValue;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    Ne,
    In,
    Lookup,
}

/// Operator names accepted in `{"op": <name>, "v": <value>}` objects. Literal values compile to `Eq`.
const OPERATORS: &[(&str, FilterOp)] = &[
    ("gt", FilterOp::Gt),
    ("lt", FilterOp::Lt),
    ("gte", FilterOp::Gte),
    ("lte", FilterOp::Lte),
    ("ne", FilterOp::Ne),
    ("in", FilterOp::In),
    ("lookup", FilterOp::Lookup),
];

impl FilterOp {
    pub fn parse(name: &str) -> Option<Self> {
        OPERATORS.iter().find(|(n, _)| *n == name).map(|(_, op)| *op)
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            other => OPERATORS
                .iter()
                .find(|(_, op)| *op == other)
                .map(|(n, _)| *n)
                .unwrap_or("eq"),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
            FilterOp::Ne => "!=",
            FilterOp::In => "IN",
            FilterOp::Lookup => "LIKE",
        }
    }
}

/// One compiled predicate: `<table>.<column> <op> <args>`.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub table: String,
    pub column: String,
    pub op: FilterOp,
    pub args: Vec<FieldValue>,
    /// Cast applied to each bound parameter by SQL stores (e.g. `timestamptz`).
    pub cast: Option<&'static str>,
}

impl Condition {
    pub fn new(table: &str, column: &str, op: FilterOp, args: Vec<FieldValue>) -> Self {
        Condition {
            table: table.to_string(),
            column: column.to_string(),
            op,
            args,
            cast: None,
        }
    }

    pub fn eq(table: &str, column: &str, value: impl Into<FieldValue>) -> Self {
        Self::new(table, column, FilterOp::Eq, vec![value.into()])
    }

    pub fn with_cast(mut self, cast: Option<&'static str>) -> Self {
        self.cast = cast;
        self
    }

    /// `Eq`/`Ne` against a single null compare with `IS [NOT] NULL` and bind nothing.
    pub fn is_null_check(&self) -> bool {
        matches!(self.op, FilterOp::Eq | FilterOp::Ne) && matches!(self.args.as_slice(), [FieldValue::Null])
    }

    /// Render with a caller-supplied placeholder generator, one call per bound argument.
    pub fn render_with(&self, qualify: bool, placeholder: impl FnMut() -> String) -> String {
        let column = if qualify {
            format!("{}.{}", self.table, self.column)
        } else {
            self.column.clone()
        };
        self.render_expr(&column, placeholder)
    }

    /// Render against an already formatted column expression (e.g. quoted identifiers).
    pub fn render_expr(&self, column: &str, mut placeholder: impl FnMut() -> String) -> String {
        if self.is_null_check() {
            return match self.op {
                FilterOp::Ne => format!("{} IS NOT NULL", column),
                _ => format!("{} IS NULL", column),
            };
        }
        match self.op {
            FilterOp::In if self.args.is_empty() => "1 = 0".to_string(),
            FilterOp::In => {
                let holders: Vec<String> = self.args.iter().map(|_| placeholder()).collect();
                format!("{} IN ({})", column, holders.join(", "))
            }
            FilterOp::Lookup => format!("{} LIKE {} ESCAPE '\\'", column, placeholder()),
            op => format!("{} {} {}", column, op.sql(), placeholder()),
        }
    }

    /// Render with `?` placeholders, as shown in decision logs.
    pub fn render(&self, qualify: bool) -> String {
        self.render_with(qualify, || "?".to_string())
    }

    /// Arguments actually bound when rendered.
    pub fn bound_args(&self) -> &[FieldValue] {
        if self.is_null_check() {
            &[]
        } else {
            &self.args
        }
    }

    pub fn storage_args(&self) -> Vec<Value> {
        self.bound_args().iter().map(FieldValue::to_storage).collect()
    }
}

/// `INNER JOIN <table> ON <table>.<column> = <parent_table>.<parent_column>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinClause {
    pub table: String,
    pub column: String,
    pub parent_table: String,
    pub parent_column: String,
}

impl JoinClause {
    pub fn render(&self) -> String {
        format!(
            "INNER JOIN {} ON {}.{} = {}.{}",
            self.table, self.table, self.column, self.parent_table, self.parent_column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_and_unknown_ops() {
        assert_eq!(FilterOp::parse("gte"), Some(FilterOp::Gte));
        assert_eq!(FilterOp::parse("lookup"), Some(FilterOp::Lookup));
        assert_eq!(FilterOp::parse("eq"), None);
        assert_eq!(FilterOp::parse("regex"), None);
        assert_eq!(FilterOp::Ne.name(), "ne");
    }

    #[test]
    fn renders_placeholders() {
        let c = Condition::new("events", "age", FilterOp::Gte, vec![FieldValue::U8(18)]);
        assert_eq!(c.render(false), "age >= ?");
        assert_eq!(c.render(true), "events.age >= ?");

        let c = Condition::new("events", "id", FilterOp::In, vec![FieldValue::U64(1), FieldValue::U64(2)]);
        assert_eq!(c.render(false), "id IN (?, ?)");
        let empty = Condition::new("events", "id", FilterOp::In, vec![]);
        assert_eq!(empty.render(false), "1 = 0");

        let mut n = 0;
        let c = Condition::new("events", "title", FilterOp::Lookup, vec![FieldValue::from("%a%")]);
        assert_eq!(
            c.render_with(false, || {
                n += 1;
                format!("${}", n)
            }),
            "title LIKE $1 ESCAPE '\\'"
        );
    }

    #[test]
    fn null_equality_binds_nothing() {
        let c = Condition::eq("events", "note", FieldValue::Null);
        assert_eq!(c.render(false), "note IS NULL");
        assert!(c.bound_args().is_empty());
    }

    #[test]
    fn join_render() {
        let j = JoinClause {
            table: "event_tags".into(),
            column: "event_id".into(),
            parent_table: "events".into(),
            parent_column: "id".into(),
        };
        assert_eq!(j.render(), "INNER JOIN event_tags ON event_tags.event_id = events.id");
    }
}
