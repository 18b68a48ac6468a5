//! The query engine: filter expressions, the bitmap operator runtime,
//! the tuple layer and the actions.
//!
//! A query is `{filterExpression, action}`. The filter compiles per
//! partition into an [`operators::Operator`] tree whose evaluation
//! yields a row-id bitmap; the action consumes the per-partition
//! bitmaps and produces a [`QueryResult`] stream.

mod actions;
mod error;
mod filter;
pub mod operators;
pub mod result;
pub mod tuple;

pub use actions::Action;
pub use error::QueryError;
pub use filter::{AmbiguityMode, FilterExpression};
pub use result::{OrderByField, QueryResult, QueryResultEntry};

use serde::Deserialize;

/// One parsed query request.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Query {
    pub filter_expression: FilterExpression,
    pub action: Action,
}

impl Query {
    /// Parse the request JSON; malformed input is a `BadRequest`.
    pub fn parse(json: &str) -> Result<Query, QueryError> {
        serde_json::from_str(json)
            .map_err(|error| QueryError::BadRequest(format!("Invalid query JSON: {error}")))
    }
}
