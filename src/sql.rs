use std::num::NonZeroUsize;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, LimitClause, ObjectNamePart, OrderByKind, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use thiserror::Error;

use crate::engine::BookingView;
use crate::model::*;
use crate::paging::{parse_sort, PageRequest, SortKey, DEFAULT_PAGE_SIZE};

/// `ORDER BY` / `LIMIT` / `OFFSET` of a listing, still unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    /// `"<field>;<ASC|DESC>"` tokens in clause order.
    pub sort: Vec<String>,
    /// `OFFSET`, an item offset.
    pub from: Option<i64>,
    /// `LIMIT`.
    pub size: Option<i64>,
}

impl Window {
    pub fn sort_keys(&self) -> Vec<SortKey> {
        parse_sort(&self.sort)
    }

    /// `from >= 0` and `size >= 1`, defaulting to 0 and 10.
    pub fn page(&self) -> Result<PageRequest, SqlError> {
        let from = self.from.unwrap_or(0);
        let size = self.size.unwrap_or(DEFAULT_PAGE_SIZE as i64);
        let from = usize::try_from(from).map_err(|_| SqlError::Window("OFFSET must not be negative"))?;
        let size = usize::try_from(size)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or(SqlError::Window("LIMIT must be at least 1"))?;
        Ok(PageRequest::from_offset(from, size))
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        name: String,
        email: String,
    },
    UpdateUser {
        id: Id,
        name: Option<String>,
        email: Option<String>,
    },
    SelectUsers {
        id: Option<Id>,
    },
    InsertItem {
        name: String,
        description: String,
        available: bool,
        request_id: Option<Id>,
    },
    UpdateItem {
        id: Id,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    },
    SelectItem {
        id: Id,
    },
    SelectOwnerItems {
        window: Window,
    },
    SearchItems {
        text: String,
        window: Window,
    },
    InsertComment {
        item_id: Id,
        text: String,
    },
    InsertBooking {
        item_id: Id,
        start: Ms,
        end: Ms,
    },
    DecideBooking {
        id: Id,
        approve: bool,
    },
    SelectBooking {
        id: Id,
    },
    SelectBookings {
        view: BookingView,
        /// Raw state token; the engine validates it.
        state: String,
        window: Window,
    },
    InsertRequest {
        description: String,
    },
    SelectRequest {
        id: Id,
    },
    SelectOwnRequests {
        sort: Vec<String>,
    },
    SelectOtherRequests {
        window: Window,
    },
}

impl Command {
    /// Commands an anonymous session may run.
    pub fn allows_anonymous(&self) -> bool {
        matches!(
            self,
            Command::InsertUser { .. } | Command::SelectUsers { .. } | Command::SearchItems { .. }
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SqlError::Empty);
    }
    if trimmed
        .get(..7)
        .is_some_and(|head| head.eq_ignore_ascii_case("UPDATE "))
    {
        return parse_update(trimmed);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(parse_err)?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_err(e: ParserError) -> SqlError {
    SqlError::Parse(e.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let need = |n: usize, table: &'static str| {
        if values.len() < n {
            Err(SqlError::WrongArity(table, n, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "users" => {
            need(2, "users")?;
            Ok(Command::InsertUser {
                name: parse_string(&values[0])?,
                email: parse_string(&values[1])?,
            })
        }
        "items" => {
            need(3, "items")?;
            let request_id = match values.get(3) {
                Some(v) => parse_i64_or_null(v)?,
                None => None,
            };
            Ok(Command::InsertItem {
                name: parse_string(&values[0])?,
                description: parse_string(&values[1])?,
                available: parse_bool(&values[2])?,
                request_id,
            })
        }
        "comments" => {
            need(2, "comments")?;
            Ok(Command::InsertComment {
                item_id: parse_i64(&values[0])?,
                text: parse_string(&values[1])?,
            })
        }
        "bookings" => {
            need(3, "bookings")?;
            Ok(Command::InsertBooking {
                item_id: parse_i64(&values[0])?,
                start: parse_i64(&values[1])?,
                end: parse_i64(&values[2])?,
            })
        }
        "requests" => {
            need(1, "requests")?;
            Ok(Command::InsertRequest {
                description: parse_string(&values[0])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

/// `UPDATE <table> SET col = v[, ...] WHERE id = N`, read clause by clause.
fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql).map_err(parse_err)?;
    parser.expect_keyword(Keyword::UPDATE).map_err(parse_err)?;
    let target = parser.parse_table_and_joins().map_err(parse_err)?;
    parser.expect_keyword(Keyword::SET).map_err(parse_err)?;
    let assignments = parser
        .parse_comma_separated(Parser::parse_assignment)
        .map_err(parse_err)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr().map_err(parse_err)?)
    } else {
        None
    };
    while parser.consume_token(&Token::SemiColon) {}
    let trailing = parser.peek_token();
    if trailing.token != Token::EOF {
        return Err(SqlError::Parse(format!("unexpected {} after UPDATE", trailing.token)));
    }

    let table = table_factor_name(&target.relation)?;
    let id = extract_where_id(&selection)?;
    let mut set = Vec::with_capacity(assignments.len());
    for assignment in &assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        set.push((column, &assignment.value));
    }

    match table.as_str() {
        "users" => {
            let (mut name, mut email) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(parse_string(value)?),
                    "email" => email = Some(parse_string(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateUser { id, name, email })
        }
        "items" => {
            let (mut name, mut description, mut available) = (None, None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(parse_string(value)?),
                    "description" => description = Some(parse_string(value)?),
                    "available" => available = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateItem {
                id,
                name,
                description,
                available,
            })
        }
        "bookings" => match set.as_slice() {
            [(column, value)] if column == "approved" => Ok(Command::DecideBooking {
                id,
                approve: parse_bool(value)?,
            }),
            _ => Err(SqlError::Unsupported("bookings only accept SET approved = <bool>".into())),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Equality filters from a WHERE clause of `col = value AND ...`.
fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left).ok_or_else(|| SqlError::Parse("filter must name a column".into()))?;
            out.push((column, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn parse_window(query: &ast::Query) -> Result<Window, SqlError> {
    let mut window = Window::default();

    if let Some(order_by) = &query.order_by {
        let OrderByKind::Expressions(exprs) = &order_by.kind else {
            return Err(SqlError::Unsupported("ORDER BY ALL".into()));
        };
        for item in exprs {
            let column = expr_column_name(&item.expr)
                .ok_or_else(|| SqlError::Parse("ORDER BY must name a column".into()))?;
            let direction = if item.options.asc == Some(false) { "DESC" } else { "ASC" };
            window.sort.push(format!("{column};{direction}"));
        }
    }

    match &query.limit_clause {
        Some(LimitClause::LimitOffset { limit, offset, .. }) => {
            window.size = limit.as_ref().map(parse_i64).transpose()?;
            window.from = offset.as_ref().map(|o| parse_i64(&o.value)).transpose()?;
        }
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => {
            window.size = Some(parse_i64(limit)?);
            window.from = Some(parse_i64(offset)?);
        }
        None => {}
    }
    Ok(window)
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let mut id = None;
    let mut state = None;
    let mut search = None;
    for (column, value) in filters {
        match column.as_str() {
            "id" => id = Some(parse_i64(value)?),
            "state" if matches!(table.as_str(), "bookings" | "owner_bookings") => {
                state = Some(parse_string(value)?)
            }
            "search" if table == "items" => search = Some(parse_string(value)?),
            _ => return Err(SqlError::UnknownColumn(column)),
        }
    }
    let window = parse_window(query)?;

    match (table.as_str(), id) {
        ("users", id) => Ok(Command::SelectUsers { id }),
        ("items", Some(id)) => Ok(Command::SelectItem { id }),
        ("items", None) => Ok(match search {
            Some(text) => Command::SearchItems { text, window },
            None => Command::SelectOwnerItems { window },
        }),
        ("bookings", Some(id)) => Ok(Command::SelectBooking { id }),
        ("bookings" | "owner_bookings", None) => Ok(Command::SelectBookings {
            view: if table == "bookings" {
                BookingView::Booker
            } else {
                BookingView::Owner
            },
            state: state.unwrap_or_else(|| "ALL".to_string()),
            window,
        }),
        ("requests", Some(id)) => Ok(Command::SelectRequest { id }),
        ("requests", None) => Ok(Command::SelectOwnRequests { sort: window.sort }),
        ("all_requests", None) => Ok(Command::SelectOtherRequests { window }),
        (_, Some(_)) if matches!(table.as_str(), "owner_bookings" | "all_requests") => {
            Err(SqlError::Unsupported(format!("{table} cannot be filtered by id")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Id, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_i64(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64(expr).map(Some),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid page window: {0}")]
    Window(&'static str),
}
