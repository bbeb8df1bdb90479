//! Query builder - construct SELECT statements with a fluent API.

use serde::{Deserialize, Serialize};

use super::dialect::{Dialect, SqlDialect};
use super::expr::{Expr, ExprExt};
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = self.expr.to_tokens();
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// Table Reference
// =============================================================================

/// What a FROM or JOIN item reads.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    /// Dotted table name, each part quoted.
    Table(Vec<String>),
    /// File path read by the engine, emitted as a string literal.
    File(String),
    /// Pre-quoted text emitted verbatim.
    Raw(String),
}

/// A table reference with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub source: TableSource,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self::from_source(TableSource::Table(vec![table.into()]))
    }

    pub fn from_source(source: TableSource) -> Self {
        Self {
            source,
            alias: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        if let TableSource::Table(parts) = &mut self.source {
            parts.insert(0, schema.into());
        }
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(match &self.source {
            TableSource::Table(parts) => Token::QualifiedIdent(parts.clone()),
            TableSource::File(path) => Token::LitString(path.clone()),
            TableSource::Raw(raw) => Token::Raw(raw.clone()),
        });
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    #[default]
    Left,
    Right,
    Full,
}

impl std::fmt::Display for JoinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Full => "full",
        })
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Expr,
}

impl Join {
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        match self.join_type {
            JoinType::Inner => ts.push(Token::Inner),
            JoinType::Left => ts.push(Token::Left),
            JoinType::Right => ts.push(Token::Right),
            JoinType::Full => ts.push(Token::Full).space().push(Token::Outer),
        };

        ts.space().push(Token::Join).space();
        ts.append(&self.table.to_tokens());
        ts.space().push(Token::On).space();
        ts.append(&self.on.to_tokens());
        ts
    }
}

// =============================================================================
// ORDER BY
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// NULLS ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// An ORDER BY expression. The direction is always written out.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct OrderByExpr {
    pub expr: Expr,
    pub dir: SortDir,
    pub nulls: Option<NullsOrder>,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Asc,
            nulls: None,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            dir: SortDir::Desc,
            nulls: None,
        }
    }

    pub fn with_nulls(mut self, nulls: Option<NullsOrder>) -> Self {
        self.nulls = nulls;
        self
    }

    /// Skips NULLS FIRST/LAST for dialects that don't support it.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.expr.to_tokens();

        ts.space().push(match self.dir {
            SortDir::Asc => Token::Asc,
            SortDir::Desc => Token::Desc,
        });

        if let Some(nulls) = &self.nulls {
            if dialect.supports_nulls_ordering() {
                ts.space().push(match nulls {
                    NullsOrder::First => Token::NullsFirst,
                    NullsOrder::Last => Token::NullsLast,
                });
            }
            // TODO: emulate with a CASE sort key for MySQL and T-SQL
        }

        ts
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// A SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Query has no effect until converted to SQL with to_sql()"]
pub struct Query {
    pub select: Vec<SelectExpr>,
    pub distinct: bool,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SELECT list.
    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn join(mut self, join_type: JoinType, table: TableRef, on: Expr) -> Self {
        self.joins.push(Join {
            join_type,
            table,
            on,
        });
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.nested().and(condition.nested()),
            None => condition,
        });
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(condition);
        self
    }

    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Convert to token stream for a specific dialect.
    pub fn to_tokens_for_dialect(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Select);
        if self.distinct {
            ts.space().push(Token::Distinct);
        }

        for (i, select_expr) in self.select.iter().enumerate() {
            if i == 0 {
                ts.newline().indent(1);
            } else {
                ts.comma().newline().indent(1);
            }
            ts.append(&select_expr.to_tokens());
        }

        if let Some(from) = &self.from {
            ts.newline().push(Token::From).space();
            ts.append(&from.to_tokens());
        }

        for join in &self.joins {
            ts.newline();
            ts.append(&join.to_tokens());
        }

        if let Some(where_clause) = &self.where_clause {
            ts.newline().push(Token::Where).space();
            ts.append(&where_clause.to_tokens());
        }

        if !self.group_by.is_empty() {
            ts.newline().push(Token::GroupBy).space();
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&expr.to_tokens());
            }
        }

        if let Some(having) = &self.having {
            ts.newline().push(Token::Having).space();
            ts.append(&having.to_tokens());
        }

        if !self.order_by.is_empty() {
            ts.newline().push(Token::OrderBy).space();
            for (i, order_expr) in self.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&order_expr.to_tokens_for_dialect(dialect));
            }
        } else if self.limit.is_some() && dialect.requires_order_by_for_limit() {
            // OFFSET FETCH needs an ORDER BY; row order stays unspecified
            ts.newline()
                .push(Token::OrderBy)
                .space()
                .lparen()
                .push(Token::Select)
                .space()
                .push(Token::Null)
                .rparen();
        }

        if let Some(limit) = self.limit {
            ts.newline();
            ts.append(&dialect.emit_limit(limit));
        }

        ts
    }

    /// Generate SQL string for a specific dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens_for_dialect(dialect).serialize(dialect)
    }
}

impl std::fmt::Display for Query {
    /// Formats the query using the default dialect (DuckDB).
    ///
    /// For dialect-specific SQL, use [`Query::to_sql`] instead.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql(Dialect::default()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::{col, count_star, func, lit_int, table_col};
    use crate::sql::test_utils::validate_sql;

    #[test]
    fn test_simple_select() {
        let query = Query::new()
            .select(vec![col("id"), col("name")])
            .from(TableRef::new("customer").with_schema("dbo"));

        let sql = query.to_sql(Dialect::TSql);
        assert!(sql.contains("[dbo].[customer]"));
        assert!(sql.contains("[id]"));
        assert!(sql.contains("[name]"));
        validate_sql(&sql, Dialect::TSql).unwrap();
    }

    #[test]
    fn test_layout() {
        let query = Query::new()
            .select(vec![col("a"), col("b")])
            .from(TableRef::new("t").with_alias("t"));
        assert_eq!(
            query.to_sql(Dialect::DuckDb),
            "SELECT\n  \"a\",\n  \"b\"\nFROM \"t\" AS \"t\""
        );
    }

    #[test]
    fn test_file_and_raw_sources() {
        let file = TableRef::from_source(TableSource::File("data/orders.parquet".into()))
            .with_alias("orders");
        assert_eq!(
            file.to_tokens().serialize(Dialect::DuckDb),
            "'data/orders.parquet' AS \"orders\""
        );

        let raw = TableRef::from_source(TableSource::Raw("\"my db\".orders".into()));
        assert_eq!(raw.to_tokens().serialize(Dialect::DuckDb), "\"my db\".orders");
    }

    #[test]
    fn test_filter_ands_conditions() {
        let query = Query::new()
            .select(vec![col("name")])
            .from(TableRef::new("customer"))
            .filter(col("active").eq(true).or(col("vip").eq(true)))
            .filter(col("age").gt(lit_int(18)));

        let sql = query.to_sql(Dialect::DuckDb);
        assert!(
            sql.contains("WHERE (\"active\" = true OR \"vip\" = true) AND (\"age\" > 18)"),
            "SQL: {}",
            sql
        );
        validate_sql(&sql, Dialect::DuckDb).unwrap();
    }

    #[test]
    fn test_join() {
        let query = Query::new()
            .select(vec![table_col("c", "name"), table_col("o", "total")])
            .from(TableRef::new("customer").with_alias("c"))
            .join(
                JoinType::Inner,
                TableRef::new("orders").with_alias("o"),
                table_col("c", "id").eq(table_col("o", "cust_id")),
            );

        let sql = query.to_sql(Dialect::MySql);
        assert!(sql.contains("INNER JOIN `orders` AS `o` ON `c`.`id` = `o`.`cust_id`"));
        validate_sql(&sql, Dialect::MySql).unwrap();
    }

    #[test]
    fn test_full_join_keyword() {
        let query = Query::new()
            .select(vec![table_col("a", "x")])
            .from(TableRef::new("a").with_alias("a"))
            .join(
                JoinType::Full,
                TableRef::new("b").with_alias("b"),
                table_col("a", "k").eq(table_col("b", "k")),
            );
        let sql = query.to_sql(Dialect::Postgres);
        assert!(sql.contains("FULL OUTER JOIN"));
        validate_sql(&sql, Dialect::Postgres).unwrap();
    }

    #[test]
    fn test_aggregation() {
        let query = Query::new()
            .select(vec![
                col("region").into(),
                func("SUM", vec![col("amount")]).alias("total"),
                count_star().alias("cnt"),
            ])
            .from(TableRef::new("orders"))
            .group_by(vec![col("region")])
            .having(func("SUM", vec![col("amount")]).gt(lit_int(1000)));

        let sql = query.to_sql(Dialect::Postgres);
        assert!(sql.contains("GROUP BY \"region\""));
        assert!(sql.contains("HAVING SUM(\"amount\") > 1000"));
        validate_sql(&sql, Dialect::Postgres).unwrap();
    }

    #[test]
    fn test_order_by_direction_always_written() {
        let query = Query::new()
            .select(vec![col("name")])
            .from(TableRef::new("customer"))
            .order_by(vec![OrderByExpr::asc(col("name"))]);
        assert!(query.to_sql(Dialect::Postgres).ends_with("ORDER BY \"name\" ASC"));
    }

    #[test]
    fn test_nulls_ordering_skipped_when_unsupported() {
        let query = Query::new()
            .select(vec![col("name")])
            .from(TableRef::new("customer"))
            .order_by(vec![
                OrderByExpr::desc(col("name")).with_nulls(Some(NullsOrder::Last))
            ]);

        let pg = query.to_sql(Dialect::Postgres);
        assert!(pg.ends_with("ORDER BY \"name\" DESC NULLS LAST"));
        let mysql = query.to_sql(Dialect::MySql);
        assert!(mysql.ends_with("ORDER BY `name` DESC"));
    }

    #[test]
    fn test_limit_duckdb() {
        let query = Query::new()
            .select(vec![col("id")])
            .from(TableRef::new("customer"))
            .limit(10);

        let sql = query.to_sql(Dialect::DuckDb);
        assert!(sql.ends_with("LIMIT 10"));
        validate_sql(&sql, Dialect::DuckDb).unwrap();
    }

    #[test]
    fn test_limit_tsql_without_order_by() {
        let query = Query::new()
            .select(vec![col("id")])
            .from(TableRef::new("customer"))
            .limit(10);

        let sql = query.to_sql(Dialect::TSql);
        assert!(
            sql.contains("ORDER BY (SELECT NULL)"),
            "Expected ORDER BY (SELECT NULL) placeholder, got: {}",
            sql
        );
        assert!(sql.ends_with("OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"));
        validate_sql(&sql, Dialect::TSql).unwrap();
    }

    #[test]
    fn test_distinct() {
        let query = Query::new()
            .select(vec![col("segment")])
            .distinct()
            .from(TableRef::new("customer"));

        assert!(query.to_sql(Dialect::Postgres).starts_with("SELECT DISTINCT\n"));
    }

    #[test]
    fn test_select_without_from() {
        let query = Query::new().select(vec![lit_int(1).alias("echo")]);
        let sql = query.to_sql(Dialect::DuckDb);
        assert_eq!(sql, "SELECT\n  1 AS \"echo\"");
        validate_sql(&sql, Dialect::DuckDb).unwrap();
    }

    #[test]
    fn test_query_display() {
        let query = Query::new()
            .select(vec![col("id")])
            .from(TableRef::new("customer"));
        let display_sql = format!("{}", query);
        assert!(display_sql.contains("\"id\""));
        assert!(display_sql.contains("\"customer\""));
    }
}
