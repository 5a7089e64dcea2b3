use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use futures::{Sink, SinkExt};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::auth::BookdAuthSource;
use crate::engine::{BookingEvent, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

/// Accept a single client connection. One handler per connection so LISTEN
/// subscriptions die with it.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(BookdFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory)
        .await
        .map_err(std::io::Error::other)
}

pub struct BookdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<BookdQueryParser>,
    /// Per-connection LISTEN subscriptions: channel name → event receiver.
    /// Pending events are flushed to the client at its next round-trip.
    subscriptions: Mutex<HashMap<String, broadcast::Receiver<Event>>>,
}

impl BookdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(BookdQueryParser),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Drain pending booking-state-changed events into NOTIFY messages.
    /// Delivery piggybacks on the listening connection's next round-trip.
    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let mut pending: Vec<(String, String)> = Vec::new();
        {
            let mut subs = self.subscriptions.lock().unwrap();
            for (channel, rx) in subs.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(event) => {
                            if let Some(change) = event.state_change()
                                && let Ok(payload) = serde_json::to_string(&change) {
                                    pending.push((channel.clone(), payload));
                                }
                        }
                        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
            }
        }
        for (channel, payload) in pending {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(0, channel, payload),
                ))
                .await?;
        }
        Ok(())
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.dispatch_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn dispatch_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertProperty { id, owner_id } => {
                engine
                    .register_property(id, owner_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteProperty { id } => {
                engine.remove_property(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                property_id,
                requester_id,
                kind,
                start,
                end,
            } => {
                engine
                    .reserve(id, property_id, requester_id, kind, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBookingStatus {
                id,
                status,
                actor,
                reason,
            } => {
                let event = BookingEvent::for_target_status(status).ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "22023".into(),
                        format!("status '{status}' cannot be requested directly"),
                    )))
                })?;
                engine
                    .apply_transition(id, event, actor, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::UpdatePaymentStatus { id, status } => {
                engine.update_payment(id, status).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectProperties => {
                let properties = engine.list_properties();
                let schema = Arc::new(property_schema());
                let rows: Vec<PgWireResult<_>> = properties
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.id.to_string())?;
                        encoder.encode_field(&p.owner_id.to_string())?;
                        encoder.encode_field(&(p.active_holds as i64))?;
                        encoder.encode_field(&(p.total_bookings as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { property_id } => {
                let bookings = engine
                    .get_bookings(property_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(booking_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.property_id.to_string())?;
                        encoder.encode_field(&b.requester_id.to_string())?;
                        encoder.encode_field(&b.owner_id.to_string())?;
                        encoder.encode_field(&b.kind.as_str())?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.payment_status.as_str())?;
                        encoder.encode_field(&b.span.start)?;
                        encoder.encode_field(&b.span.end)?;
                        encoder.encode_field(&b.created_at)?;
                        encoder.encode_field(&b.hold_expires_at)?;
                        encoder.encode_field(&b.cancelled_by.map(|u| u.to_string()))?;
                        encoder.encode_field(&b.cancelled_at)?;
                        encoder.encode_field(&b.cancellation_reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectHolds { property_id } => {
                let holds = engine
                    .get_active_holds(property_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(hold_schema());
                let rows: Vec<PgWireResult<_>> = holds
                    .into_iter()
                    .map(|h| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&h.booking_id.to_string())?;
                        encoder.encode_field(&h.property_id.to_string())?;
                        encoder.encode_field(&h.kind.as_str())?;
                        encoder.encode_field(&h.start)?;
                        encoder.encode_field(&h.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability {
                property_id,
                start,
                end,
                min_duration,
            } => {
                let slots = engine
                    .compute_availability(property_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());

                let pid_str = property_id.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&pid_str)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let property_id = parse_channel(&channel)?;
                let rx = engine.notify.subscribe(property_id);
                self.subscriptions.lock().unwrap().insert(channel, rx);
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                self.subscriptions.lock().unwrap().remove(&channel);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => {
                self.subscriptions.lock().unwrap().clear();
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

fn parse_channel(channel: &str) -> PgWireResult<Ulid> {
    let id_str = channel.strip_prefix("property_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected property_{{id}})"),
        )))
    })?;
    Ulid::from_string(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

fn property_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("owner_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("active_holds".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("total_bookings".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("property_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("requester_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("owner_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("kind".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("payment_status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("created_at".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("hold_expires_at".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("cancelled_by".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("cancelled_at".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("cancellation_reason".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn hold_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("booking_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("property_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("kind".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("property_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

/// Result schema for a statement, by table sniffing — used by both
/// describe paths of the extended protocol.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("HOLDS") {
        hold_schema()
    } else if upper.contains("PROPERTIES") {
        property_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for BookdHandler {
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
        let engine = self.resolve_engine(client)?;
        self.flush_notifications(client).await?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookdQueryParser;

#[async_trait]
impl QueryParser for BookdQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookdHandler {
    type Statement = String;
    type QueryParser = BookdQueryParser;

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
        let engine = self.resolve_engine(client)?;
        self.flush_notifications(client).await?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
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
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max {
                    max = n;
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BookdFactory {
    handler: Arc<BookdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BookdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BookdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = BookdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookdFactory {
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

/// Map engine errors onto pg error codes so drivers can branch without
/// reading message text.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Conflict { .. } => "23P01",         // exclusion_violation
        EngineError::NotFound(_) => "P0002",             // no_data_found
        EngineError::AlreadyExists(_) => "23505",        // unique_violation
        EngineError::Validation(_) => "22023",           // invalid_parameter_value
        EngineError::Busy(_) => "55P03",                 // lock_not_available
        EngineError::InvalidTransition { .. } => "P0001",
        EngineError::HasActiveHolds(_) => "55006",       // object_in_use
        EngineError::LimitExceeded(_) => "54000",        // program_limit_exceeded
        EngineError::WalError(_) => "XX000",             // internal_error
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
