use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoutingError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The referenced tables share no engine under the current placement.
    #[error("no single engine hosts all of: {}", tables.join(", "))]
    NoCommonLocation { tables: Vec<String> },

    #[error("no engine supports this query: {0}")]
    Unsupported(String),

    #[error("unknown routing model '{0}'")]
    UnknownModel(String),
}
