use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProperty {
        id: Ulid,
        owner_id: Ulid,
    },
    DeleteProperty {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        property_id: Ulid,
        requester_id: Ulid,
        kind: BookingKind,
        start: Ms,
        end: Option<Ms>,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
        actor: Option<Ulid>,
        reason: Option<String>,
    },
    UpdatePaymentStatus {
        id: Ulid,
        status: PaymentStatus,
    },
    SelectProperties,
    SelectBookings {
        property_id: Ulid,
    },
    SelectHolds {
        property_id: Ulid,
    },
    SelectAvailability {
        property_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').trim_matches('"').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN") {
        let target = trimmed[8..].trim().trim_matches(';').trim_matches('"').to_string();
        if target == "*" || target.is_empty() {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten { channel: target });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "properties" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("properties", 2, values.len()));
            }
            Ok(Command::InsertProperty {
                id: parse_ulid(&values[0])?,
                owner_id: parse_ulid(&values[1])?,
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            let kind_str = parse_string(&values[3])?;
            let kind = BookingKind::parse(&kind_str)
                .ok_or_else(|| SqlError::Parse(format!("unknown booking kind: {kind_str}")))?;
            let end = if values.len() >= 6 {
                parse_i64_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                property_id: parse_ulid(&values[1])?,
                requester_id: parse_ulid(&values[2])?,
                kind,
                start: parse_i64(&values[4])?,
                end,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_ulid(&delete.selection, "id")?;

    match table.as_str() {
        "properties" => Ok(Command::DeleteProperty { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Booking mutation surface: `UPDATE bookings SET status = '…'` is a state
/// transition request, `SET payment_status = '…'` is the inbound payment
/// event. The two don't mix in one statement.
fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_ulid(selection, "id")?;

    let mut status: Option<String> = None;
    let mut payment: Option<String> = None;
    let mut actor: Option<Ulid> = None;
    let mut reason: Option<String> = None;

    for assignment in assignments {
        let col = assignment_column(assignment)?;
        match col.as_str() {
            "status" => status = Some(parse_string(&assignment.value)?),
            "payment_status" => payment = Some(parse_string(&assignment.value)?),
            "actor" => actor = Some(parse_ulid(&assignment.value)?),
            "reason" => reason = Some(parse_string(&assignment.value)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    match (status, payment) {
        (Some(s), None) => {
            let status = BookingStatus::parse(&s)
                .ok_or_else(|| SqlError::Parse(format!("unknown status: {s}")))?;
            Ok(Command::UpdateBookingStatus { id, status, actor, reason })
        }
        (None, Some(p)) => {
            if actor.is_some() || reason.is_some() {
                return Err(SqlError::Unsupported(
                    "actor/reason only apply to status updates".into(),
                ));
            }
            let status = PaymentStatus::parse(&p)
                .ok_or_else(|| SqlError::Parse(format!("unknown payment status: {p}")))?;
            Ok(Command::UpdatePaymentStatus { id, status })
        }
        (Some(_), Some(_)) => Err(SqlError::Unsupported(
            "cannot set status and payment_status together".into(),
        )),
        (None, None) => Err(SqlError::MissingFilter("status")),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "properties" => Ok(Command::SelectProperties),
        "bookings" => Ok(Command::SelectBookings {
            property_id: extract_where_ulid(&select.selection, "property_id")?,
        }),
        "holds" => Ok(Command::SelectHolds {
            property_id: extract_where_ulid(&select.selection, "property_id")?,
        }),
        "availability" => {
            let (mut property_id, mut start, mut end, mut min_duration) = (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(
                    selection,
                    &mut property_id,
                    &mut start,
                    &mut end,
                    &mut min_duration,
                )?;
            }
            Ok(Command::SelectAvailability {
                property_id: property_id.ok_or(SqlError::MissingFilter("property_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                min_duration,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    property_id: &mut Option<Ulid>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
    min_duration: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, property_id, start, end, min_duration)?;
                extract_availability_filters(right, property_id, start, end, min_duration)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("property_id") {
                    *property_id = Some(parse_ulid(right)?);
                } else if col.as_deref() == Some("min_duration") {
                    *min_duration = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_ulid(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some(column) {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter(column))
            }
        }
        _ => Err(SqlError::MissingFilter(column)),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            _ => Ok(Some(parse_i64(expr)?)),
        }
    } else {
        Ok(Some(parse_i64(expr)?))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
