//! Column-list INSERT statements and their JSONEachRow encoding.

use serde_json::{Map, Number, Value as Json};

use crate::{Result, StoreError, Value};

/// Timestamp layout accepted by `DateTime64(9)` columns.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// A parsed `INSERT INTO table (col, ...)` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let s = s.trim_start();
    let head = s.get(..keyword.len())?;
    let rest = &s[keyword.len()..];
    if head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

impl InsertStatement {
    /// Parse an insert statement. Anything after the closing parenthesis of
    /// the column list, other than a trailing `;`, is rejected.
    pub fn parse(sql: &str) -> Result<Self> {
        let unsupported = || StoreError::Unsupported(sql.trim().to_string());

        let body = sql.trim().trim_end_matches(';').trim_end();
        let rest = strip_keyword(body, "INSERT")
            .and_then(|r| strip_keyword(r, "INTO"))
            .ok_or_else(unsupported)?;

        let open = rest.find('(').ok_or_else(unsupported)?;
        let close = rest[open..]
            .find(')')
            .map(|i| open + i)
            .ok_or_else(unsupported)?;
        if !rest[close + 1..].trim().is_empty() {
            return Err(unsupported());
        }

        let table = rest[..open].trim();
        if table.is_empty() || table.contains(char::is_whitespace) {
            return Err(unsupported());
        }

        let columns: Vec<String> = rest[open + 1..close]
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();
        if columns.iter().any(String::is_empty) {
            return Err(unsupported());
        }

        Ok(Self {
            table: table.to_string(),
            columns,
        })
    }

    /// Pair parameters with column names.
    pub fn bind<'v>(&self, params: &'v [Value]) -> Result<Vec<(&str, &'v Value)>> {
        if params.len() != self.columns.len() {
            return Err(StoreError::ParamCount {
                expected: self.columns.len(),
                actual: params.len(),
            });
        }
        Ok(self
            .columns
            .iter()
            .map(String::as_str)
            .zip(params.iter())
            .collect())
    }

    /// Query text for a JSONEachRow insert into this statement's columns.
    pub fn json_each_row_query(&self) -> String {
        format!(
            "INSERT INTO {} ({}) FORMAT JSONEachRow",
            self.table,
            self.columns.join(", ")
        )
    }

    /// Encode one row as a JSON object line.
    pub fn encode_row(&self, params: &[Value]) -> Result<String> {
        let mut row = Map::new();
        for (column, value) in self.bind(params)? {
            row.insert(column.to_string(), to_json(value));
        }
        Ok(serde_json::to_string(&row)?)
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::UInt64(v) => Json::Number(Number::from(*v)),
        Value::Float64(v) => match Number::from_f64(*v) {
            Some(n) => Json::Number(n),
            None if v.is_nan() => Json::String("nan".into()),
            None if *v > 0.0 => Json::String("inf".into()),
            None => Json::String("-inf".into()),
        },
        Value::String(v) => Json::String(v.clone()),
        Value::DateTime(v) => Json::String(v.format(DATETIME_FORMAT).to_string()),
        Value::Map(m) => Json::Object(
            m.iter()
                .map(|(k, v)| (k.clone(), Json::String(v.clone())))
                .collect(),
        ),
    }
}
