//! # Request Search
//!
//! Filters for the request feed and the "my requests" pages, turned into a
//! `WHERE` clause with numbered parameters.
//!
//! ## Text search
//! - `q` matches title or description, case-insensitive for ASCII (SQLite `LIKE`)
//! - `%`, `_` and `\` in the query are escaped, so they match literally
//!
//! Soft-deleted requests never show up.
use rusqlite::types::Value;

use crate::models::{Priority, RequestStatus, UserId};

#[derive(Clone, Debug, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub priority: Option<Priority>,
    pub category_id: Option<i64>,
    pub requester_id: Option<UserId>,
    pub assigned_to: Option<UserId>,
    pub text: Option<String>,
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl RequestFilter {
    /// Returns the clause (without `WHERE`) and its parameters, numbered from `?1`.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = vec!["is_deleted = 0".to_string()];
        let mut values = Vec::new();

        let mut push = |column: &str, value: Value| {
            values.push(value);
            clauses.push(format!("{column} = ?{}", values.len()));
        };

        if let Some(status) = self.status {
            push("status", Value::Text(status.as_str().to_string()));
        }
        if let Some(priority) = self.priority {
            push("priority", Value::Text(priority.as_str().to_string()));
        }
        if let Some(category_id) = self.category_id {
            push("category_id", Value::Integer(category_id));
        }
        if let Some(requester_id) = self.requester_id {
            push("requester_id", Value::Integer(requester_id));
        }
        if let Some(assigned_to) = self.assigned_to {
            push("assigned_to", Value::Integer(assigned_to));
        }

        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            values.push(Value::Text(format!("%{}%", escape_like(text))));
            let n = values.len();
            clauses.push(format!(
                "(title LIKE ?{n} ESCAPE '\\' OR description LIKE ?{n} ESCAPE '\\')"
            ));
        }

        (clauses.join(" AND "), values)
    }
}
