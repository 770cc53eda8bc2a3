//! Read-only validation and structural tenant scoping.
//!
//! Generated SQL is untrusted input. Nothing reaches the executor unless it
//! parses as a single plain SELECT over an allowlisted table, and the tenant
//! filter is added by rewriting the AST, never by splicing strings. A query
//! that cannot be proven scoped is rejected.

use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Ident, Query, Select, SetExpr, Statement, TableFactor,
    Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Tables a generated query may read. Everything else is private to the
/// daemon (cache, embeddings, chat history).
const TABLE_ALLOWLIST: &[&str] = &["campaigns", "campaign_metrics"];

/// Statement-level keywords that are never acceptable, checked lexically
/// before parsing so even unparseable input is rejected for the right reason.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "replace", "pragma", "attach",
    "detach", "vacuum", "reindex",
];

/// Result of guarding one candidate statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Safe to execute: re-rendered with the tenant filter in the AST
    Scoped(String),
    /// Parsed (or pre-screened) but is not a single plain SELECT
    RejectedNonSelect(String),
    /// Did not parse at all
    RejectedSyntax(String),
}

/// Validate `sql` and return a tenant-scoped rendition, or a rejection
pub fn scope_query(sql: &str, tenant_id: &str) -> GuardOutcome {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return GuardOutcome::RejectedNonSelect("empty statement".to_string());
    }

    let lowered = trimmed.to_lowercase();
    if !lowered.starts_with("select") {
        return GuardOutcome::RejectedNonSelect("statement does not begin with SELECT".to_string());
    }
    if lowered.contains("--") || lowered.contains("/*") {
        return GuardOutcome::RejectedNonSelect("comments are not allowed".to_string());
    }
    for keyword in FORBIDDEN_KEYWORDS {
        if lowered.split(|c: char| !c.is_alphanumeric() && c != '_').any(|w| w == *keyword) {
            return GuardOutcome::RejectedNonSelect(format!("forbidden keyword '{}'", keyword));
        }
    }

    let mut statements = match Parser::parse_sql(&GenericDialect {}, trimmed) {
        Ok(statements) => statements,
        Err(e) => return GuardOutcome::RejectedSyntax(e.to_string()),
    };

    if statements.len() != 1 {
        return GuardOutcome::RejectedNonSelect(format!(
            "expected one statement, got {}",
            statements.len()
        ));
    }

    let query = match statements.pop() {
        Some(Statement::Query(query)) => query,
        Some(other) => {
            return GuardOutcome::RejectedNonSelect(format!(
                "not a SELECT: {}",
                statement_kind(&other)
            ))
        }
        None => unreachable!(),
    };

    match scope_select(*query, tenant_id) {
        Ok(scoped) => {
            let rendered = Statement::Query(Box::new(scoped)).to_string();
            debug!("scoped query: {}", rendered);
            GuardOutcome::Scoped(rendered)
        }
        Err(rejection) => rejection,
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        _ => "non-query statement",
    }
}

/// Check the query shape and conjoin the tenant filter into its WHERE clause
fn scope_select(mut query: Query, tenant_id: &str) -> Result<Query, GuardOutcome> {
    let reject = |reason: &str| Err(GuardOutcome::RejectedNonSelect(reason.to_string()));

    if query.with.is_some() {
        return reject("CTEs are not allowed");
    }

    let select: &mut Select = match query.body.as_mut() {
        SetExpr::Select(select) => select.as_mut(),
        SetExpr::SetOperation { .. } => return reject("set operations are not allowed"),
        _ => return reject("query body is not a plain SELECT"),
    };

    // The permissive dialect parses keyword soup like "SELECT FROM WHERE
    // GROUP" into a SELECT with no table at all. That is malformed output,
    // not a well-formed statement of the wrong kind.
    if select.from.is_empty() {
        return Err(GuardOutcome::RejectedSyntax(
            "SELECT without a FROM table".to_string(),
        ));
    }
    if select.from.len() != 1 {
        return Err(GuardOutcome::RejectedNonSelect(format!(
            "expected exactly one table, got {}",
            select.from.len()
        )));
    }
    let table = &select.from[0];
    if !table.joins.is_empty() {
        return reject("joins are not allowed");
    }
    let table_name = match &table.relation {
        TableFactor::Table { name, .. } => name.to_string().to_lowercase(),
        TableFactor::Derived { .. } => return reject("subqueries in FROM are not allowed"),
        _ => return reject("unsupported FROM clause"),
    };
    if !TABLE_ALLOWLIST.contains(&table_name.as_str()) {
        return Err(GuardOutcome::RejectedNonSelect(format!(
            "table '{}' is not queryable",
            table_name
        )));
    }

    if let Some(existing) = &select.selection {
        if contains_subquery(existing) {
            return reject("subqueries are not allowed");
        }
    }
    if let Some(having) = &select.having {
        if contains_subquery(having) {
            return reject("subqueries are not allowed");
        }
    }
    if let GroupByExpr::Expressions(exprs) = &select.group_by {
        if exprs.iter().any(contains_subquery) {
            return reject("subqueries are not allowed");
        }
    }

    let tenant_filter = Expr::BinaryOp {
        left: Box::new(Expr::Identifier(Ident::new("tenant_id"))),
        op: BinaryOperator::Eq,
        right: Box::new(Expr::Value(Value::SingleQuotedString(
            tenant_id.to_string(),
        ))),
    };

    select.selection = Some(match select.selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(tenant_filter),
            op: BinaryOperator::And,
            right: Box::new(Expr::Nested(Box::new(existing))),
        },
        None => tenant_filter,
    });

    Ok(query)
}

/// Conservative subquery walk over the expression forms the generator can
/// realistically produce. Anything we do not recognize is treated as unsafe.
fn contains_subquery(expr: &Expr) -> bool {
    match expr {
        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => true,
        Expr::BinaryOp { left, right, .. } => contains_subquery(left) || contains_subquery(right),
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            contains_subquery(expr)
        }
        Expr::IsNull(expr) | Expr::IsNotNull(expr) => contains_subquery(expr),
        Expr::Between {
            expr, low, high, ..
        } => contains_subquery(expr) || contains_subquery(low) || contains_subquery(high),
        Expr::InList { expr, list, .. } => {
            contains_subquery(expr) || list.iter().any(contains_subquery)
        }
        Expr::Function(function) => {
            // Any subquery-shaped argument shows up as FunctionArgExpr::Expr
            function.args.iter().any(|arg| match arg {
                sqlparser::ast::FunctionArg::Unnamed(sqlparser::ast::FunctionArgExpr::Expr(e))
                | sqlparser::ast::FunctionArg::Named {
                    arg: sqlparser::ast::FunctionArgExpr::Expr(e),
                    ..
                } => contains_subquery(e),
                _ => false,
            })
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            contains_subquery(expr) || contains_subquery(pattern)
        }
        _ => false,
    }
}
