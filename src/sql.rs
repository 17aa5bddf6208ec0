use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::collab::{ApprovalStatus, TravelRequest};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHouse(StaffHouse),
    InsertRoom(Room),
    InsertOccupant(Occupant),
    InsertTravelRequest(TravelRequest),
    UpdateRoomStatus {
        id: Ulid,
        status: RoomStatus,
    },
    InsertBooking {
        request: BookingRequest,
        /// `RETURNING` was present: answer with `(id, date)` rows.
        returning: bool,
    },
    UpdateBooking {
        id: Ulid,
        update: BookingUpdate,
    },
    DeleteBooking {
        id: Ulid,
    },
    DeleteBlock {
        id: Ulid,
    },
    SelectBookings(BookingFilter),
    SelectAvailability {
        staff_house_id: Ulid,
        check_in: Day,
        check_out: Day,
    },
    SelectTravelLog {
        trf_id: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("one statement per query".into()));
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// `INSERT` values keyed by their column name.
struct Columns<'a> {
    table: &'static str,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Columns<'a> {
    fn new(table: &'static str, insert: &'a ast::Insert) -> Result<Self, SqlError> {
        if insert.columns.is_empty() {
            return Err(SqlError::Parse(format!("{table}: column list required")));
        }
        let rows = extract_all_insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported(format!("{table}: multi-row INSERT")));
        }
        let row = &rows[0];
        if row.len() != insert.columns.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), row.len()));
        }
        let values = insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(row.iter())
            .collect();
        Ok(Self { table, values })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.get(col).copied()
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    /// Reject columns the table doesn't have.
    fn only(&self, known: &[&str]) -> Result<(), SqlError> {
        match self.values.keys().find(|k| !known.contains(&k.as_str())) {
            Some(unknown) => Err(SqlError::UnknownColumn(unknown.clone())),
            None => Ok(()),
        }
    }

    fn id(&self) -> Result<Ulid, SqlError> {
        match self.get("id") {
            Some(e) => parse_ulid(e),
            None => Ok(Ulid::new()),
        }
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string(self.require(col)?)
    }

    fn opt_text(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.get(col).map_or(Ok(None), parse_string_or_null)
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map_or(Ok(None), parse_ulid_or_null)
    }

    fn opt_date(&self, col: &str) -> Result<Option<Day>, SqlError> {
        self.get(col).map_or(Ok(None), parse_date_or_null)
    }

    fn opt_enum<T: std::str::FromStr<Err = ParseEnumError>>(
        &self,
        col: &str,
    ) -> Result<Option<T>, SqlError> {
        match self.opt_text(col)? {
            Some(s) => s.parse().map(Some).map_err(SqlError::from),
            None => Ok(None),
        }
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "staff_houses" => {
            let cols = Columns::new("staff_houses", insert)?;
            cols.only(&["id", "name", "location", "address", "description"])?;
            Ok(Command::InsertHouse(StaffHouse {
                id: cols.id()?,
                name: cols.text("name")?,
                location: cols
                    .opt_enum("location")?
                    .ok_or(SqlError::MissingColumn("staff_houses", "location"))?,
                address: cols.opt_text("address")?,
                description: cols.opt_text("description")?,
            }))
        }
        "rooms" => {
            let cols = Columns::new("rooms", insert)?;
            cols.only(&["id", "staff_house_id", "name", "room_type", "capacity", "status"])?;
            Ok(Command::InsertRoom(Room {
                id: cols.id()?,
                house_id: parse_ulid(cols.require("staff_house_id")?)?,
                name: cols.text("name")?,
                room_type: cols.opt_enum("room_type")?.unwrap_or(RoomType::Single),
                capacity: match cols.get("capacity") {
                    Some(e) => parse_u32(e)?,
                    None => 1,
                },
                status: cols.opt_enum("status")?.unwrap_or(RoomStatus::Available),
            }))
        }
        "occupants" => {
            let cols = Columns::new("occupants", insert)?;
            cols.only(&["id", "kind", "name", "staff_number", "gender"])?;
            Ok(Command::InsertOccupant(Occupant {
                id: cols.id()?,
                kind: cols.opt_enum("kind")?.unwrap_or(OccupantKind::Staff),
                name: cols.text("name")?,
                staff_number: cols.opt_text("staff_number")?,
                gender: cols.opt_enum("gender")?,
            }))
        }
        "travel_requests" => {
            let cols = Columns::new("travel_requests", insert)?;
            cols.only(&["id", "requestor", "depart", "return_date", "approval"])?;
            let approval = match cols.opt_text("approval")? {
                Some(s) => ApprovalStatus::parse(&s)
                    .ok_or_else(|| SqlError::Parse(format!("bad approval status: {s}")))?,
                None => ApprovalStatus::Pending,
            };
            Ok(Command::InsertTravelRequest(TravelRequest {
                id: cols.text("id")?,
                requestor: cols.opt_ulid("requestor")?,
                depart: cols.opt_date("depart")?,
                return_date: cols.opt_date("return_date")?,
                approval,
            }))
        }
        "bookings" => {
            let cols = Columns::new("bookings", insert)?;
            cols.only(&[
                "room_id",
                "staff_house_id",
                "occupant_id",
                "date",
                "check_in",
                "check_out",
                "status",
                "notes",
                "block_reason",
                "trf_id",
                "force_block",
            ])?;
            let mut request = BookingRequest::new(parse_ulid(cols.require("room_id")?)?);
            request.staff_house_id = cols.opt_ulid("staff_house_id")?;
            request.occupant_id = cols.opt_ulid("occupant_id")?;
            request.date = cols.opt_date("date")?;
            request.check_in = cols.opt_date("check_in")?;
            request.check_out = cols.opt_date("check_out")?;
            if let Some(status) = cols.opt_enum("status")? {
                request.status = status;
            }
            request.notes = cols.opt_text("notes")?;
            request.block_reason = cols.opt_text("block_reason")?;
            request.trf_id = cols.opt_text("trf_id")?;
            request.force_block = match cols.get("force_block") {
                Some(e) => parse_bool_or_null(e)?.unwrap_or(false),
                None => false,
            };
            Ok(Command::InsertBooking {
                request,
                returning: insert.returning.is_some(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "bookings" => {
            let mut update = BookingUpdate::default();
            for (col, value) in assignment_pairs(assignments)? {
                match col.as_str() {
                    "room_id" => update.room_id = Some(parse_ulid(value)?),
                    "occupant_id" => update.occupant_id = Some(parse_ulid(value)?),
                    "date" => update.date = Some(parse_date(value)?),
                    "status" => update.status = Some(parse_string(value)?.parse()?),
                    "notes" => update.notes = Some(parse_string_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            if update.is_empty() {
                return Err(SqlError::Parse("UPDATE bookings sets nothing".into()));
            }
            Ok(Command::UpdateBooking { id, update })
        }
        "rooms" => {
            let mut status = None;
            for (col, value) in assignment_pairs(assignments)? {
                match col.as_str() {
                    "status" => status = Some(parse_string(value)?.parse()?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateRoomStatus {
                id,
                status: status.ok_or(SqlError::MissingColumn("rooms", "status"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assignment_pairs(assignments: &[ast::Assignment]) -> Result<Vec<(String, &Expr)>, SqlError> {
    assignments
        .iter()
        .map(|a| match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .map(|col| (col, &a.value))
                .ok_or_else(|| SqlError::Parse("empty column name".into())),
            AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
        })
        .collect()
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking { id }),
        "blocks" => Ok(Command::DeleteBlock { id }),
        _ => Err(SqlError::UnknownTable(table)),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            let mut filter = BookingFilter::default();
            for (col, value) in filters {
                match col.as_str() {
                    // Out-of-range parts fall back to the current month downstream.
                    "year" => filter.year = i32::try_from(parse_i64(value)?).ok(),
                    "month" => filter.month = u32::try_from(parse_i64(value)?).ok(),
                    "staff_house_id" => filter.staff_house_id = Some(parse_ulid(value)?),
                    "room_id" => filter.room_id = Some(parse_ulid(value)?),
                    "occupant_id" => filter.occupant_id = Some(parse_ulid(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectBookings(filter))
        }
        "availability" => {
            let (mut house, mut check_in, mut check_out) = (None, None, None);
            for (col, value) in filters {
                match col.as_str() {
                    "staff_house_id" => house = Some(parse_ulid(value)?),
                    "check_in" => check_in = Some(parse_date(value)?),
                    "check_out" => check_out = Some(parse_date(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectAvailability {
                staff_house_id: house.ok_or(SqlError::MissingFilter("staff_house_id"))?,
                check_in: check_in.ok_or(SqlError::MissingFilter("check_in"))?,
                check_out: check_out.ok_or(SqlError::MissingFilter("check_out"))?,
            })
        }
        "travel_request_log" => {
            let mut trf_id = None;
            for (col, value) in filters {
                match col.as_str() {
                    "trf_id" => trf_id = Some(parse_string(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectTravelLog {
                trf_id: trf_id.ok_or(SqlError::MissingFilter("trf_id"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                out.push((col, right));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_string(expr).map(Some)
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_ulid(expr).map(Some)
    }
}

fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<Day>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_date(expr).map(Some)
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
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

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool_or_null(expr: &Expr) -> Result<Option<bool>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Some(true)),
                "false" | "f" | "0" => Ok(Some(false)),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(Some(n != "0")),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
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
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
    BadEnum(ParseEnumError),
}

impl From<ParseEnumError> for SqlError {
    fn from(e: ParseEnumError) -> Self {
        SqlError::BadEnum(e)
    }
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
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadEnum(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const HOUSE: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn day(y: i32, m: u32, d: u32) -> Day {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_insert_booking_range() {
        let sql = format!(
            "INSERT INTO bookings (room_id, occupant_id, check_in, check_out, notes, trf_id) \
             VALUES ('{ROOM}', NULL, '2024-03-01', '2024-03-03', 'late arrival', 'TRF-42')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { request, returning } => {
                assert!(!returning);
                assert_eq!(request.room_id.to_string(), ROOM);
                assert_eq!(request.occupant_id, None);
                assert_eq!(request.date, None);
                assert_eq!(request.check_in, Some(day(2024, 3, 1)));
                assert_eq!(request.check_out, Some(day(2024, 3, 3)));
                assert_eq!(request.status, AllocationStatus::Confirmed);
                assert_eq!(request.notes.as_deref(), Some("late arrival"));
                assert_eq!(request.trf_id.as_deref(), Some("TRF-42"));
                assert!(!request.force_block);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_forced_block_with_returning() {
        let sql = format!(
            "INSERT INTO bookings (room_id, staff_house_id, date, status, block_reason, force_block) \
             VALUES ('{ROOM}', '{HOUSE}', '2024-03-02', 'Blocked', 'pipe burst', true) RETURNING id, date"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { request, returning } => {
                assert!(returning);
                assert_eq!(request.staff_house_id.map(|h| h.to_string()).as_deref(), Some(HOUSE));
                assert_eq!(request.date, Some(day(2024, 3, 2)));
                assert_eq!(request.status, AllocationStatus::Blocked);
                assert_eq!(request.block_reason.as_deref(), Some("pipe burst"));
                assert!(request.force_block);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_rejects_bad_values() {
        let bad_status = format!("INSERT INTO bookings (room_id, date, status) VALUES ('{ROOM}', '2024-03-01', 'Tentative')");
        assert!(matches!(parse_sql(&bad_status), Err(SqlError::BadEnum(_))));

        let bad_date = format!("INSERT INTO bookings (room_id, date) VALUES ('{ROOM}', '2024-02-30')");
        assert!(matches!(parse_sql(&bad_date), Err(SqlError::Parse(_))));

        let unknown = format!("INSERT INTO bookings (room_id, bed) VALUES ('{ROOM}', 2)");
        assert!(matches!(parse_sql(&unknown), Err(SqlError::UnknownColumn(c)) if c == "bed"));

        let positional = format!("INSERT INTO bookings VALUES ('{ROOM}')");
        assert!(parse_sql(&positional).is_err());
    }

    #[test]
    fn parse_status_wire_values() {
        let sql = format!("UPDATE bookings SET status = 'Checked-in' WHERE id = '{ROOM}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { update, .. } => {
                assert_eq!(update.status, Some(AllocationStatus::CheckedIn));
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_booking_move() {
        let sql = format!(
            "UPDATE bookings SET room_id = '{HOUSE}', date = '2024-04-01', notes = NULL WHERE id = '{ROOM}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { id, update } => {
                assert_eq!(id.to_string(), ROOM);
                assert_eq!(update.room_id.map(|r| r.to_string()).as_deref(), Some(HOUSE));
                assert_eq!(update.date, Some(day(2024, 4, 1)));
                assert_eq!(update.notes, Some(None));
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_clearing_notes_is_not_empty() {
        let sql = format!("UPDATE bookings SET notes = NULL WHERE id = '{ROOM}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { update, .. } => {
                assert_eq!(update.notes, Some(None));
                assert!(!update.is_empty());
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }
        let sql = format!("UPDATE bookings SET notes = 'ok' WHERE id = '{ROOM}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { update, .. } => {
                assert_eq!(update.notes, Some(Some("ok".to_string())));
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET status = 'Cancelled' WHERE room_id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_update_room_status() {
        let sql = format!("UPDATE rooms SET status = 'maintenance' WHERE id = '{ROOM}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRoomStatus {
                id: Ulid::from_string(ROOM).unwrap(),
                status: RoomStatus::Maintenance,
            }
        );
    }

    #[test]
    fn parse_deletes() {
        let id = Ulid::from_string(ROOM).unwrap();
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{ROOM}'")).unwrap(),
            Command::DeleteBooking { id }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM blocks WHERE id = '{ROOM}'")).unwrap(),
            Command::DeleteBlock { id }
        );
        assert!(parse_sql(&format!("DELETE FROM rooms WHERE id = '{ROOM}'")).is_err());
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = format!(
            "SELECT * FROM bookings WHERE year = 2024 AND month = 3 AND staff_house_id = '{HOUSE}' AND room_id = '{ROOM}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectBookings(filter) => {
                assert_eq!(filter.year, Some(2024));
                assert_eq!(filter.month, Some(3));
                assert!(filter.staff_house_id.is_some());
                assert!(filter.room_id.is_some());
                assert_eq!(filter.occupant_id, None);
            }
            other => panic!("expected SelectBookings, got {other:?}"),
        }

        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings(BookingFilter::default())
        );
    }

    #[test]
    fn parse_select_bookings_oversized_year_is_dropped() {
        match parse_sql("SELECT * FROM bookings WHERE year = 99999999999").unwrap() {
            Command::SelectBookings(filter) => assert_eq!(filter.year, None),
            other => panic!("expected SelectBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE staff_house_id = '{HOUSE}' AND check_in = '2024-03-01' AND check_out = '2024-03-05'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                staff_house_id: Ulid::from_string(HOUSE).unwrap(),
                check_in: day(2024, 3, 1),
                check_out: day(2024, 3, 5),
            }
        );

        let missing = format!("SELECT * FROM availability WHERE staff_house_id = '{HOUSE}'");
        assert!(matches!(parse_sql(&missing), Err(SqlError::MissingFilter("check_in"))));
    }

    #[test]
    fn parse_reference_data() {
        let sql = format!(
            "INSERT INTO staff_houses (id, name, location) VALUES ('{HOUSE}', 'Camp Alpha', 'Field Camp')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertHouse(h) => {
                assert_eq!(h.name, "Camp Alpha");
                assert_eq!(h.location, Location::FieldCamp);
            }
            other => panic!("expected InsertHouse, got {other:?}"),
        }

        let sql = format!(
            "INSERT INTO rooms (id, staff_house_id, name, room_type, capacity) VALUES ('{ROOM}', '{HOUSE}', 'A-101', 'Double', 2)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom(r) => {
                assert_eq!(r.room_type, RoomType::Double);
                assert_eq!(r.capacity, 2);
                assert_eq!(r.status, RoomStatus::Available);
            }
            other => panic!("expected InsertRoom, got {other:?}"),
        }

        let sql = "INSERT INTO occupants (name, kind, gender) VALUES ('Dana', 'Guest', 'Female')";
        match parse_sql(sql).unwrap() {
            Command::InsertOccupant(o) => {
                assert_eq!(o.kind, OccupantKind::Guest);
                assert_eq!(o.gender, Some(Gender::Female));
                assert_eq!(o.staff_number, None);
            }
            other => panic!("expected InsertOccupant, got {other:?}"),
        }

        let sql = "INSERT INTO staff_houses (name) VALUES ('Nowhere')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("staff_houses", "location"))
        ));
    }

    #[test]
    fn parse_travel_request() {
        let sql = format!(
            "INSERT INTO travel_requests (id, requestor, approval) VALUES ('TRF-9', '{ROOM}', 'Rejected')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertTravelRequest(t) => {
                assert_eq!(t.id, "TRF-9");
                assert_eq!(t.approval, ApprovalStatus::Rejected);
                assert!(t.requestor.is_some());
            }
            other => panic!("expected InsertTravelRequest, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO foobar (id) VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
