pub mod config;
pub mod error;
pub mod markup;
pub mod mediawiki;
pub mod name_index;
pub mod query;
pub mod recruit;
pub mod resolver;
pub mod roster;
pub mod runtime;
pub mod schema;

pub use error::{QueryError, QueryResult};
pub use query::{QueryEngine, QueryOutcome};
