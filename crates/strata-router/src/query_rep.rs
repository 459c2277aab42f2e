//! A SQL statement as the router sees it.
//!
//! Classification (DML, transaction boundaries) is by text prefix and never
//! parses. Tables, required functionality, and the predicate count need an
//! AST; they are computed together on first use and cached.

use std::ops::ControlFlow;
use std::sync::OnceLock;

use sqlparser::ast::{visit_expressions, visit_relations, BinaryOperator, Expr, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::functionality::Functionality;

const DATA_MODIFICATION_PREFIXES: [&str; 6] =
    ["INSERT", "UPDATE", "DELETE", "BEGIN", "COMMIT", "ROLLBACK"];

/// Trims, drops one trailing `;`, and trims again.
pub fn clean_sql(raw: &str) -> &str {
    let s = raw.trim();
    s.strip_suffix(';').unwrap_or(s).trim()
}

#[derive(Debug, Default)]
struct Analysis {
    tables: Vec<String>,
    functionality: Functionality,
    predicate_count: usize,
}

#[derive(Debug)]
pub struct QueryRep {
    sql: String,
    upper: String,
    analysis: OnceLock<Analysis>,
}

impl QueryRep {
    pub fn new(sql: &str) -> Self {
        let sql = clean_sql(sql).to_string();
        let upper = sql.to_uppercase();
        Self {
            sql,
            upper,
            analysis: OnceLock::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_data_modification(&self) -> bool {
        DATA_MODIFICATION_PREFIXES
            .iter()
            .any(|p| self.upper.starts_with(p))
    }

    pub fn is_transaction_start(&self) -> bool {
        self.upper == "BEGIN"
    }

    pub fn is_transaction_end(&self) -> bool {
        self.upper == "COMMIT" || self.upper == "ROLLBACK"
    }

    /// Referenced relation names (last identifier of each object name). CTE
    /// names are included; empty when the text does not parse.
    pub fn tables(&self) -> &[String] {
        &self.analysis().tables
    }

    pub fn required_functionality(&self) -> Functionality {
        self.analysis().functionality
    }

    /// Number of AND/OR-separated predicates in the top-level WHERE clause.
    pub fn predicate_count(&self) -> usize {
        self.analysis().predicate_count
    }

    fn analysis(&self) -> &Analysis {
        self.analysis.get_or_init(|| analyze(&self.sql))
    }
}

impl PartialEq for QueryRep {
    fn eq(&self, other: &Self) -> bool {
        self.sql == other.sql
    }
}

impl Eq for QueryRep {}

impl Clone for QueryRep {
    fn clone(&self) -> Self {
        Self::new(&self.sql)
    }
}

fn analyze(sql: &str) -> Analysis {
    let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "query did not parse; routing without table info");
            return Analysis::default();
        }
    };

    let mut tables: Vec<String> = Vec::new();
    let _ = visit_relations(&statements, |name| {
        if let Some(ident) = name.0.last() {
            if !tables.contains(&ident.value) {
                tables.push(ident.value.clone());
            }
        }
        ControlFlow::<()>::Continue(())
    });

    let mut functionality = Functionality::NONE;
    let _ = visit_expressions(&statements, |expr| {
        if let Expr::Function(f) = expr {
            let is_spatial = f
                .name
                .0
                .last()
                .map(|i| i.value.to_uppercase().starts_with("ST_"))
                .unwrap_or(false);
            if is_spatial {
                functionality = functionality | Functionality::GEOSPATIAL;
            }
        }
        ControlFlow::<()>::Continue(())
    });

    let predicate_count = statements.first().map(where_predicates).unwrap_or(0);

    Analysis {
        tables,
        functionality,
        predicate_count,
    }
}

fn where_predicates(stmt: &Statement) -> usize {
    let Statement::Query(query) = stmt else {
        return 0;
    };
    match query.body.as_ref() {
        SetExpr::Select(select) => select.selection.as_ref().map(count_predicates).unwrap_or(0),
        _ => 0,
    }
}

fn count_predicates(expr: &Expr) -> usize {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And | BinaryOperator::Or,
            right,
        } => count_predicates(left) + count_predicates(right),
        Expr::Nested(inner) => count_predicates(inner),
        _ => 1,
    }
}
