use thiserror::Error;

/// Failure kinds surfaced by the query engine and its collaborators.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The remote page is absent or has no revisions. Terminal for the query.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, timeout, HTTP status or API-level failure. Never folded into `NotFound`.
    #[error("transport failure while {context}: {message}")]
    Transport { context: String, message: String },

    /// A structured fragment inside a larger source could not be parsed.
    #[error("malformed source in {source_name}: {detail}")]
    MalformedSource { source_name: String, detail: String },

    /// The user query was empty or unusable; rejected before any remote call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Reading or writing the local name index file failed.
    #[error("index persistence failed: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl QueryError {
    pub fn transport(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Transport { .. } => "transport",
            Self::MalformedSource { .. } => "malformed_source",
            Self::InvalidInput(_) => "invalid_input",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::QueryError;

    #[test]
    fn transport_message_names_the_failed_step() {
        let error = QueryError::transport("fetching page 1-7", "HTTP 502 Bad Gateway");
        assert_eq!(
            error.to_string(),
            "transport failure while fetching page 1-7: HTTP 502 Bad Gateway"
        );
        assert_eq!(error.kind(), "transport");
        assert!(!error.is_not_found());
    }

    #[test]
    fn persistence_wraps_anyhow_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("failed to write enemy_index.json");
        let error = QueryError::from(inner);
        let message = error.to_string();
        assert!(message.contains("failed to write enemy_index.json"));
        assert!(message.contains("disk full"));
    }
}
