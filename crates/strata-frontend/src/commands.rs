//! Statements addressed to strata itself rather than a data engine.

/// Parsed internal command. The prefix match is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalCommand {
    Replan,
    RoutingPolicy,
    Blueprint,
    Metrics,
    Unknown(String),
}

impl InternalCommand {
    /// `None` when `sql` is an ordinary statement.
    pub fn parse(sql: &str, prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let head = sql.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        let name = sql[prefix.len()..].trim().to_ascii_uppercase();
        Some(match name.as_str() {
            "REPLAN" => InternalCommand::Replan,
            "ROUTING_POLICY" => InternalCommand::RoutingPolicy,
            "BLUEPRINT" => InternalCommand::Blueprint,
            "METRICS" => InternalCommand::Metrics,
            _ => InternalCommand::Unknown(sql.to_string()),
        })
    }
}
