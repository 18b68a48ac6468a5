/// Errors surfaced while answering a query.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// The query itself is at fault: malformed JSON, unknown columns or
    /// sequences, out-of-range positions, misused limit/offset.
    /// Recovered at the query boundary with a 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The planner reached a branch that the AST/schema invariants rule
    /// out. An internal bug, surfaced as a 500.
    #[error("query compilation failed: {0}")]
    Compilation(String),

    /// The query was cancelled before completing.
    #[error("query cancelled")]
    Cancelled,

    /// Row materialization failed, e.g. a corrupt compressed value.
    #[error("failed to materialize a row: {0}")]
    Materialization(#[source] std::io::Error),
}

impl QueryError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        QueryError::BadRequest(message.into())
    }

    /// The HTTP status this error maps to at the query boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::BadRequest(_) => 400,
            _ => 500,
        }
    }

    /// The error kind as it appears in the error response body.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::BadRequest(_) => "BadRequest",
            QueryError::Compilation(_) => "QueryCompilationError",
            QueryError::Cancelled => "Cancelled",
            QueryError::Materialization(_) => "InternalError",
        }
    }
}

/// Bail out with a `BadRequest` unless `condition` holds.
macro_rules! check_query {
    ($condition:expr, $($message:tt)+) => {
        if !$condition {
            return Err($crate::QueryError::BadRequest(format!($($message)+)));
        }
    };
}
pub(crate) use check_query;
