//! Static checks every generated statement passes before it may run.

use nl2sql_core::SchemaSelection;
use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, Ident, ObjectName, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::{dialect_from_str, Dialect, GenericDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use thiserror::Error;

const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "DROP", "CREATE", "ALTER", "TRUNCATE",
    "RENAME", "GRANT", "REVOKE", "DENY", "EXEC", "EXECUTE", "CALL", "BEGIN", "COMMIT",
    "ROLLBACK", "SAVEPOINT", "TRANSACTION", "DECLARE", "USE", "SHUTDOWN", "KILL", "BACKUP",
    "RESTORE", "DBCC", "BULK", "INTO", "COPY", "ATTACH", "DETACH", "PRAGMA", "VACUUM",
    "WAITFOR", "RECONFIGURE", "OPENROWSET", "OPENQUERY", "OPENDATASOURCE", "OPENXML",
    "SP_EXECUTESQL",
];

const SYSTEM_SCHEMAS: &[&str] = &["sys", "information_schema", "master", "tempdb", "msdb"];

/// Identifiers that show up as bare expressions in date functions and literals.
const ALLOWED_IDENTIFIERS: &[&str] = &[
    "year", "month", "day", "quarter", "week", "hour", "minute", "second", "current_date",
    "current_time", "current_timestamp", "true", "false", "null",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("empty statement")]
    Empty,

    #[error("comments are not allowed in generated SQL")]
    Comment,

    #[error("keyword '{0}' is not allowed: only read-only SELECT queries may run")]
    BlockedKeyword(String),

    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("SQL could not be parsed: {0}")]
    Unparseable(String),

    #[error("exactly one statement is allowed, found {0}")]
    MultipleStatements(usize),

    #[error("only SELECT queries are allowed")]
    NotSelect,

    #[error("system schema reference '{0}' is not allowed")]
    SystemSchema(String),

    #[error("table '{0}' is not in the provided schema")]
    UnknownTable(String),

    #[error("column '{0}' is not in the provided schema")]
    UnknownColumn(String),
}

/// Read-only, single-statement, schema-bound check for generated SQL.
#[derive(Debug, Clone)]
pub struct SqlGuard {
    dialect: String,
}

impl SqlGuard {
    /// `dialect` is a sqlparser dialect name ("generic", "mssql", "postgresql", ...);
    /// unknown names parse with the generic dialect.
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
        }
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        dialect_from_str(&self.dialect).unwrap_or_else(|| Box::new(GenericDialect {}))
    }

    pub fn check(&self, sql: &str, selection: &SchemaSelection) -> Result<(), GuardViolation> {
        let sql = sql.trim().trim_end_matches(';').trim();
        if sql.is_empty() {
            return Err(GuardViolation::Empty);
        }

        let dialect = self.dialect();
        let tokens = Tokenizer::new(dialect.as_ref(), sql)
            .tokenize()
            .map_err(|e| GuardViolation::Unparseable(e.to_string()))?;
        check_tokens(&tokens)?;

        let mut statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| GuardViolation::Unparseable(e.to_string()))?;
        if statements.len() != 1 {
            return Err(GuardViolation::MultipleStatements(statements.len()));
        }
        let statement = statements.remove(0);
        if !matches!(statement, Statement::Query(_)) {
            return Err(GuardViolation::NotSelect);
        }
        let names = LocalNames::collect(&statement);

        check_relations(&statement, selection, &names)?;
        check_columns(&statement, selection, &names)
    }
}

fn check_tokens(tokens: &[Token]) -> Result<(), GuardViolation> {
    let mut depth: i64 = 0;
    for token in tokens {
        match token {
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                return Err(GuardViolation::Comment)
            }
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(GuardViolation::UnbalancedParentheses);
                }
            }
            Token::Word(word) if word.quote_style.is_none() => {
                let upper = word.value.to_uppercase();
                if BLOCKED_KEYWORDS.contains(&upper.as_str()) || upper.starts_with("XP_") {
                    return Err(GuardViolation::BlockedKeyword(upper));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(GuardViolation::UnbalancedParentheses);
    }
    Ok(())
}

/// Names the query defines for itself: CTE names, column lists of table
/// aliases and select-list aliases.
#[derive(Debug, Default)]
struct LocalNames {
    ctes: HashSet<String>,
    alias_columns: HashSet<String>,
    /// Alias name to the number of select lists defining it.
    aliases: HashMap<String, usize>,
}

impl LocalNames {
    fn collect(statement: &Statement) -> Self {
        let mut names = Self::default();
        let _ = statement.visit(&mut names);
        names
    }

    /// An alias counts only when some select list other than `own` defines it.
    fn has_alias(&self, name: &str, own: &HashMap<String, usize>) -> bool {
        let defined = self.aliases.get(name).copied().unwrap_or(0);
        defined > own.get(name).copied().unwrap_or(0)
    }
}

impl Visitor for LocalNames {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(lower(&cte.alias.name));
                self.alias_columns.extend(cte.alias.columns.iter().map(lower));
            }
        }
        for select in selects(&query.body) {
            for (alias, count) in projection_aliases(select) {
                *self.aliases.entry(alias).or_default() += count;
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        let alias = match factor {
            TableFactor::Table { alias, .. } | TableFactor::Derived { alias, .. } => {
                alias.as_ref()
            }
            _ => None,
        };
        if let Some(alias) = alias {
            self.alias_columns.extend(alias.columns.iter().map(lower));
        }
        ControlFlow::Continue(())
    }
}

fn lower(ident: &Ident) -> String {
    ident.value.to_lowercase()
}

fn selects(body: &SetExpr) -> Vec<&Select> {
    match body {
        SetExpr::Select(select) => vec![select.as_ref()],
        SetExpr::SetOperation { left, right, .. } => {
            let mut found = selects(left);
            found.extend(selects(right));
            found
        }
        _ => Vec::new(),
    }
}

fn projection_aliases(select: &Select) -> HashMap<String, usize> {
    let mut aliases = HashMap::new();
    for item in &select.projection {
        if let SelectItem::ExprWithAlias { alias, .. } = item {
            *aliases.entry(lower(alias)).or_default() += 1;
        }
    }
    aliases
}

fn check_relations(
    statement: &Statement,
    selection: &SchemaSelection,
    names: &LocalNames,
) -> Result<(), GuardViolation> {
    let flow = visit_relations(statement, |relation: &ObjectName| {
        let parts: Vec<String> = relation.0.iter().map(|i| i.value.to_lowercase()).collect();
        let full = parts.join(".");
        let Some(last) = parts.last() else {
            return ControlFlow::Continue(());
        };

        if parts[..parts.len() - 1]
            .iter()
            .any(|p| SYSTEM_SCHEMAS.contains(&p.as_str()))
        {
            return ControlFlow::Break(GuardViolation::SystemSchema(full));
        }
        if parts.len() == 1 && names.ctes.contains(last) {
            return ControlFlow::Continue(());
        }

        let known = selection.tables.iter().any(|t| {
            let name = t.table.to_lowercase();
            name == full || name.rsplit('.').next() == Some(last.as_str())
        });
        if known {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(GuardViolation::UnknownTable(full))
        }
    });

    match flow {
        ControlFlow::Break(violation) => Err(violation),
        ControlFlow::Continue(()) => Ok(()),
    }
}

/// Identifiers a statement may reference.
struct ColumnScope<'a> {
    selection: &'a SchemaSelection,
    names: &'a LocalNames,
    table_names: HashSet<String>,
}

impl<'a> ColumnScope<'a> {
    fn new(selection: &'a SchemaSelection, names: &'a LocalNames) -> Self {
        let table_names = selection
            .tables
            .iter()
            .flat_map(|t| {
                let full = t.table.to_lowercase();
                let bare = full.rsplit('.').next().unwrap_or(&full).to_string();
                [full.clone(), bare]
            })
            .collect();
        Self {
            selection,
            names,
            table_names,
        }
    }

    fn is_known(&self, ident: &Ident, own: &HashMap<String, usize>) -> bool {
        let name = lower(ident);
        self.selection.has_column(&name)
            || self.names.has_alias(&name, own)
            || self.names.ctes.contains(&name)
            || self.names.alias_columns.contains(&name)
            || self.table_names.contains(&name)
            || ALLOWED_IDENTIFIERS.contains(&name.as_str())
    }

    fn check<V: Visit>(
        &self,
        node: &V,
        own: &HashMap<String, usize>,
    ) -> ControlFlow<GuardViolation> {
        visit_expressions(node, |expr: &Expr| {
            let ident = match expr {
                Expr::Identifier(ident) => Some(ident),
                Expr::CompoundIdentifier(parts) => parts.last(),
                _ => None,
            };
            match ident {
                Some(ident) if !self.is_known(ident, own) => {
                    ControlFlow::Break(GuardViolation::UnknownColumn(ident.value.clone()))
                }
                _ => ControlFlow::Continue(()),
            }
        })
    }
}

impl Visitor for ColumnScope<'_> {
    type Break = GuardViolation;

    // A select-list alias is visible to ORDER BY, GROUP BY, HAVING and outer
    // queries, never to its own projection or WHERE clause.
    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<GuardViolation> {
        for select in selects(&query.body) {
            let own = projection_aliases(select);
            for item in &select.projection {
                match item {
                    SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                        self.check(expr, &own)?;
                    }
                    _ => {}
                }
            }
            if let Some(selection) = &select.selection {
                self.check(selection, &own)?;
            }
        }
        ControlFlow::Continue(())
    }
}

fn check_columns(
    statement: &Statement,
    selection: &SchemaSelection,
    names: &LocalNames,
) -> Result<(), GuardViolation> {
    let mut scope = ColumnScope::new(selection, names);
    let flow = match scope.check(statement, &HashMap::new()) {
        ControlFlow::Continue(()) => statement.visit(&mut scope),
        broken => broken,
    };

    match flow {
        ControlFlow::Break(violation) => Err(violation),
        ControlFlow::Continue(()) => Ok(()),
    }
}
