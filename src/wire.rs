use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::BerthAuthSource;
use crate::collab::InMemoryTravelDesk;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct BerthHandler {
    engine: Arc<Engine>,
    desk: Arc<InMemoryTravelDesk>,
    query_parser: Arc<BerthQueryParser>,
}

impl BerthHandler {
    pub fn new(engine: Arc<Engine>, desk: Arc<InMemoryTravelDesk>) -> Self {
        Self {
            engine,
            desk,
            query_parser: Arc::new(BerthQueryParser),
        }
    }

    /// The login name is the actor every capability check and audit note uses.
    fn actor<C: ClientInfo>(client: &C) -> String {
        client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| "anonymous".to_string())
    }

    async fn run(&self, actor: &str, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, actor: &str, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertHouse(house) => {
                engine.register_house(actor, house).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertRoom(room) => {
                engine.register_room(actor, room).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertOccupant(occupant) => {
                engine
                    .register_occupant(actor, occupant)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertTravelRequest(request) => {
                debug!("travel request {} is {:?}", request.id, request.approval);
                self.desk.upsert(request);
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoomStatus { id, status } => {
                engine
                    .set_room_status(actor, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertBooking { request, returning } => {
                let receipt = engine
                    .create_booking(actor, request)
                    .await
                    .map_err(engine_err)?;
                if !returning {
                    return Ok(vec![Response::Execution(
                        Tag::new("INSERT").with_rows(receipt.dates_booked()),
                    )]);
                }

                let schema = Arc::new(returning_schema());
                let rows: Vec<PgWireResult<_>> = receipt
                    .created
                    .iter()
                    .map(|(id, date)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&id.to_string())?;
                        encoder.encode_field(&date.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::UpdateBooking { id, update } => {
                engine
                    .update_booking(actor, id, update)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::DeleteBlock { id } => {
                engine.unblock(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings(filter) => {
                let views = engine.list_bookings(&filter).await;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = views
                    .iter()
                    .map(|v| encode_view(&schema, v))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability {
                staff_house_id,
                check_in,
                check_out,
            } => {
                let rooms = engine
                    .available_rooms(staff_house_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id.to_string())?;
                        encoder.encode_field(&room.name)?;
                        encoder.encode_field(&room.room_type.to_string())?;
                        encoder.encode_field(&i64::from(room.capacity))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectTravelLog { trf_id } => {
                let schema = Arc::new(travel_log_schema());
                let rows: Vec<PgWireResult<_>> = self
                    .desk
                    .log(&trf_id)
                    .into_iter()
                    .map(|entry| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&trf_id)?;
                        encoder.encode_field(&entry)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn encode_view(
    schema: &Arc<Vec<FieldInfo>>,
    v: &AllocationView,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&v.id.to_string())?;
    encoder.encode_field(&v.date.to_string())?;
    encoder.encode_field(&v.status.to_string())?;
    encoder.encode_field(&v.room_id.to_string())?;
    encoder.encode_field(&v.room_name)?;
    encoder.encode_field(&v.room_type.to_string())?;
    encoder.encode_field(&v.house_id.to_string())?;
    encoder.encode_field(&v.house_name)?;
    encoder.encode_field(&v.location.map(|l| l.to_string()))?;
    encoder.encode_field(&v.occupant_id.map(|o| o.to_string()))?;
    encoder.encode_field(&v.occupant_name)?;
    encoder.encode_field(&v.occupant_gender.map(|g| g.to_string()))?;
    encoder.encode_field(&v.notes)?;
    encoder.encode_field(&v.block_reason)?;
    encoder.encode_field(&v.trf_id)?;
    Ok(encoder.take_row())
}

fn text_fields(names: &[&str]) -> Vec<FieldInfo> {
    names
        .iter()
        .map(|n| FieldInfo::new((*n).into(), None, None, Type::VARCHAR, FieldFormat::Text))
        .collect()
}

fn bookings_schema() -> Vec<FieldInfo> {
    text_fields(&[
        "id",
        "date",
        "status",
        "room_id",
        "room_name",
        "room_type",
        "staff_house_id",
        "house_name",
        "location",
        "occupant_id",
        "occupant_name",
        "occupant_gender",
        "notes",
        "block_reason",
        "trf_id",
    ])
}

fn availability_schema() -> Vec<FieldInfo> {
    let mut fields = text_fields(&["room_id", "name", "room_type"]);
    fields.push(FieldInfo::new(
        "capacity".into(),
        None,
        None,
        Type::INT8,
        FieldFormat::Text,
    ));
    fields
}

fn returning_schema() -> Vec<FieldInfo> {
    text_fields(&["id", "date"])
}

fn travel_log_schema() -> Vec<FieldInfo> {
    text_fields(&["trf_id", "entry"])
}

/// Result columns of a statement, judged from its text: parameters may still
/// be unbound placeholders, so the statement can't be parsed yet.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("SELECT") && upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("SELECT") && upper.contains("TRAVEL_REQUEST_LOG") {
        travel_log_schema()
    } else if upper.contains("SELECT") && upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("INSERT") && upper.contains("RETURNING") {
        returning_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for BerthHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = Self::actor(client);
        self.run(&actor, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BerthQueryParser;

#[async_trait]
impl QueryParser for BerthQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BerthHandler {
    type Statement = String;
    type QueryParser = BerthQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = Self::actor(client);
        let sql = substitute_params(portal);
        self.run(&actor, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| sql_err(sql::SqlError::Empty))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i > start
                    && let Ok(n) = sql[start..i].parse::<usize>()
                {
                    max = max.max(n);
                }
            }
            _ => i += 1,
        }
    }
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters[..])
}

/// Inline bound parameters (text format) into the statement in one left-to-right
/// pass. `$N` is only a placeholder outside quoted literals and identifiers, and
/// substituted values are never rescanned. Unknown indices are left as written.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    let mut copied = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote is an escaped quote, so the scan just carries on.
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let param = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| params.get(n));
                if let Some(value) = param {
                    out.push_str(&sql[copied..i]);
                    match value {
                        Some(raw) => {
                            let text = String::from_utf8_lossy(raw.as_ref());
                            out.push('\'');
                            out.push_str(&text.replace('\'', "''"));
                            out.push('\'');
                        }
                        None => out.push_str("NULL"),
                    }
                    copied = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BerthFactory {
    handler: Arc<BerthHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BerthAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BerthFactory {
    pub fn new(engine: Arc<Engine>, desk: Arc<InMemoryTravelDesk>, password: String) -> Self {
        let auth_source = BerthAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BerthHandler::new(engine, desk)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BerthFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    desk: Arc<InMemoryTravelDesk>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(BerthFactory::new(engine, desk, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for each engine failure.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInput { .. } => "22023",
        EngineError::NotFound(_) => "02000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Conflict { .. } | EngineError::GenderConflict { .. } => "23P01",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::Forbidden(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::TransactionFailure(_) => "40000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
