use std::fmt::Debug;
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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::auth::LendItAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

type Schema = Arc<Vec<FieldInfo>>;

pub struct LendItHandler {
    engine: Arc<Engine>,
    query_parser: Arc<LendItQueryParser>,
}

/// Login user of the session as a user id. Anything non-numeric is an
/// anonymous session.
fn acting_user<C: ClientInfo>(client: &C) -> Option<Id> {
    client.metadata().get("user").and_then(|u| u.trim().parse().ok())
}

impl LendItHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(LendItQueryParser),
        }
    }

    /// Parse, authorize, execute, and record metrics for one statement.
    async fn run(&self, actor: Option<Id>, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, actor: Option<Id>, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        let actor = match actor {
            Some(id) => id,
            None if cmd.allows_anonymous() => 0,
            None => {
                return Err(user_error(
                    "28000",
                    "log in with a numeric user id to run this statement".into(),
                ));
            }
        };

        match cmd {
            Command::InsertUser { name, email } => {
                let user = engine.create_user(name, email).await.map_err(engine_err)?;
                users_response(&[user])
            }
            Command::UpdateUser { id, name, email } => {
                let user = engine.update_user(id, name, email).await.map_err(engine_err)?;
                users_response(&[user])
            }
            Command::SelectUsers { id: Some(id) } => {
                let user = engine.get_user(id).map_err(engine_err)?;
                users_response(&[user])
            }
            Command::SelectUsers { id: None } => users_response(&engine.list_users()),
            Command::InsertItem {
                name,
                description,
                available,
                request_id,
            } => {
                let item = engine
                    .create_item(actor, name, description, available, request_id)
                    .await
                    .map_err(engine_err)?;
                items_response(&[item])
            }
            Command::UpdateItem {
                id,
                name,
                description,
                available,
            } => {
                let item = engine
                    .update_item(actor, id, name, description, available)
                    .await
                    .map_err(engine_err)?;
                items_response(&[item])
            }
            Command::SelectItem { id } => {
                let projection = engine.get_item(actor, id).await.map_err(engine_err)?;
                projections_response(&[projection])
            }
            Command::SelectOwnerItems { window } => {
                let page = window.page().map_err(sql_err)?;
                let projections = engine
                    .list_owner_items(actor, page, &window.sort_keys())
                    .await
                    .map_err(engine_err)?;
                projections_response(&projections)
            }
            Command::SearchItems { text, window } => {
                let page = window.page().map_err(sql_err)?;
                let items = engine.search_items(&text, page).await.map_err(engine_err)?;
                items_response(&items)
            }
            Command::InsertComment { item_id, text } => {
                let comment = engine.add_comment(actor, item_id, text).await.map_err(engine_err)?;
                comments_response(&[comment])
            }
            Command::InsertBooking { item_id, start, end } => {
                let booking = engine
                    .create_booking(actor, item_id, start, end)
                    .await
                    .map_err(engine_err)?;
                bookings_response(&[booking])
            }
            Command::DecideBooking { id, approve } => {
                let booking = engine.process_booking(actor, id, approve).await.map_err(engine_err)?;
                bookings_response(&[booking])
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(actor, id).await.map_err(engine_err)?;
                bookings_response(&[booking])
            }
            Command::SelectBookings { view, state, window } => {
                let page = window.page().map_err(sql_err)?;
                let bookings = engine
                    .list_bookings(actor, view, &state, page, &window.sort_keys())
                    .await
                    .map_err(engine_err)?;
                bookings_response(&bookings)
            }
            Command::InsertRequest { description } => {
                let request = engine.create_request(actor, description).await.map_err(engine_err)?;
                requests_response(&[RequestInfo {
                    request,
                    items: Vec::new(),
                }])
            }
            Command::SelectRequest { id } => {
                let info = engine.get_request(actor, id).await.map_err(engine_err)?;
                requests_response(&[info])
            }
            Command::SelectOwnRequests { sort } => {
                let infos = engine
                    .list_own_requests(actor, &crate::paging::parse_sort(&sort))
                    .await
                    .map_err(engine_err)?;
                requests_response(&infos)
            }
            Command::SelectOtherRequests { window } => {
                let page = window.page().map_err(sql_err)?;
                let infos = engine
                    .list_other_requests(actor, page, &window.sort_keys())
                    .await
                    .map_err(engine_err)?;
                requests_response(&infos)
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn user_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
    ]
}

fn item_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("owner_id", Type::INT8),
        field("name", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("available", Type::BOOL),
        field("request_id", Type::INT8),
    ]
}

fn projection_schema() -> Vec<FieldInfo> {
    let mut schema = item_schema();
    schema.extend([
        field("last_booking_id", Type::INT8),
        field("last_booker_id", Type::INT8),
        field("next_booking_id", Type::INT8),
        field("next_booker_id", Type::INT8),
        field("comments", Type::VARCHAR),
    ]);
    schema
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("item_id", Type::INT8),
        field("item_name", Type::VARCHAR),
        field("booker_id", Type::INT8),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
    ]
}

fn comment_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("item_id", Type::INT8),
        field("author_id", Type::INT8),
        field("author_name", Type::VARCHAR),
        field("text", Type::VARCHAR),
        field("created", Type::INT8),
    ]
}

fn request_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("requestor_id", Type::INT8),
        field("description", Type::VARCHAR),
        field("created", Type::INT8),
        field("items", Type::VARCHAR),
    ]
}

/// Schema a command answers with, for Describe.
fn command_schema(cmd: &Command) -> Vec<FieldInfo> {
    match cmd {
        Command::InsertUser { .. } | Command::UpdateUser { .. } | Command::SelectUsers { .. } => user_schema(),
        Command::InsertItem { .. } | Command::UpdateItem { .. } | Command::SearchItems { .. } => item_schema(),
        Command::SelectItem { .. } | Command::SelectOwnerItems { .. } => projection_schema(),
        Command::InsertComment { .. } => comment_schema(),
        Command::InsertBooking { .. }
        | Command::DecideBooking { .. }
        | Command::SelectBooking { .. }
        | Command::SelectBookings { .. } => booking_schema(),
        Command::InsertRequest { .. }
        | Command::SelectRequest { .. }
        | Command::SelectOwnRequests { .. }
        | Command::SelectOtherRequests { .. } => request_schema(),
    }
}

/// Describe runs before parameters are bound. Every placeholder becomes a
/// neutral literal so the statement still parses to the right command.
fn schema_for_sql(sql_text: &str) -> Vec<FieldInfo> {
    let probe = substitute_placeholders(sql_text, |_| Some("'0'".to_string()));
    sql::parse_sql(&probe)
        .map(|cmd| command_schema(&cmd))
        .unwrap_or_default()
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    rows: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema: Schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = rows
        .iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, row)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn json_column<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| user_error("XX000", format!("encoding failed: {e}")))
}

fn users_response(users: &[User]) -> PgWireResult<Response> {
    rows_response(user_schema(), users, |enc, u| {
        enc.encode_field(&u.id)?;
        enc.encode_field(&u.name)?;
        enc.encode_field(&u.email)
    })
}

fn encode_item(enc: &mut DataRowEncoder, item: &Item) -> PgWireResult<()> {
    enc.encode_field(&item.id)?;
    enc.encode_field(&item.owner_id)?;
    enc.encode_field(&item.name)?;
    enc.encode_field(&item.description)?;
    enc.encode_field(&item.available)?;
    enc.encode_field(&item.request_id)
}

fn items_response(items: &[Item]) -> PgWireResult<Response> {
    rows_response(item_schema(), items, encode_item)
}

fn projections_response(projections: &[ItemProjection]) -> PgWireResult<Response> {
    rows_response(projection_schema(), projections, |enc, p| {
        encode_item(enc, &p.item)?;
        enc.encode_field(&p.last_booking.map(|b| b.id))?;
        enc.encode_field(&p.last_booking.map(|b| b.booker_id))?;
        enc.encode_field(&p.next_booking.map(|b| b.id))?;
        enc.encode_field(&p.next_booking.map(|b| b.booker_id))?;
        enc.encode_field(&json_column(&p.comments)?)
    })
}

fn bookings_response(bookings: &[BookingInfo]) -> PgWireResult<Response> {
    rows_response(booking_schema(), bookings, |enc, b| {
        enc.encode_field(&b.id)?;
        enc.encode_field(&b.item_id)?;
        enc.encode_field(&b.item_name)?;
        enc.encode_field(&b.booker_id)?;
        enc.encode_field(&b.start)?;
        enc.encode_field(&b.end)?;
        enc.encode_field(&b.status.as_str().to_string())
    })
}

fn comments_response(comments: &[CommentInfo]) -> PgWireResult<Response> {
    rows_response(comment_schema(), comments, |enc, c| {
        enc.encode_field(&c.id)?;
        enc.encode_field(&c.item_id)?;
        enc.encode_field(&c.author_id)?;
        enc.encode_field(&c.author_name)?;
        enc.encode_field(&c.text)?;
        enc.encode_field(&c.created)
    })
}

fn requests_response(infos: &[RequestInfo]) -> PgWireResult<Response> {
    rows_response(request_schema(), infos, |enc, info| {
        enc.encode_field(&info.request.id)?;
        enc.encode_field(&info.request.requestor_id)?;
        enc.encode_field(&info.request.description)?;
        enc.encode_field(&info.request.created)?;
        enc.encode_field(&json_column(&info.items)?)
    })
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for LendItHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = acting_user(client);
        Ok(vec![self.run(actor, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LendItQueryParser;

#[async_trait]
impl QueryParser for LendItQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LendItHandler {
    type Statement = String;
    type QueryParser = LendItQueryParser;

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
        let actor = acting_user(client);
        let sql_text = substitute_params(portal);
        self.run(actor, &sql_text).await
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
        Ok(DescribeStatementResponse::new(param_types, schema_for_sql(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for_sql(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql_text: &str) -> usize {
    placeholders(sql_text).map(|(_, n)| n).max().unwrap_or(0)
}

/// `(byte range, N)` for every `$N` in the statement.
fn placeholders(sql_text: &str) -> impl Iterator<Item = (std::ops::Range<usize>, usize)> + '_ {
    let bytes = sql_text.as_bytes();
    let mut i = 0;
    std::iter::from_fn(move || {
        while i < bytes.len() {
            if bytes[i] != b'$' {
                i += 1;
                continue;
            }
            let start = i;
            i += 1;
            let digits = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql_text[digits..i].parse::<usize>() {
                return Some((start..i, n));
            }
        }
        None
    })
}

/// Replace each `$N` with `value(N)`. Placeholders without a value stay as
/// they are.
fn substitute_placeholders(sql_text: &str, value: impl Fn(usize) -> Option<String>) -> String {
    let mut out = String::with_capacity(sql_text.len());
    let mut last = 0;
    for (range, n) in placeholders(sql_text) {
        if let Some(v) = value(n) {
            out.push_str(&sql_text[last..range.start]);
            out.push_str(&v);
            last = range.end;
        }
    }
    out.push_str(&sql_text[last..]);
    out
}

/// Bound text parameters become quoted literals; NULL stays NULL.
fn substitute_params(portal: &Portal<String>) -> String {
    let params = &portal.parameters;
    substitute_placeholders(&portal.statement.statement, |n| {
        let param = params.get(n.checked_sub(1)?)?;
        Some(match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        })
    })
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LendItFactory {
    handler: Arc<LendItHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<LendItAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LendItFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = LendItAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LendItHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LendItFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = LendItFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound { .. } => "P0002",
        EngineError::NotAvailable { .. } => "55000",
        EngineError::Validation(_) => "22023",
        EngineError::StatusAlreadyProcessed { .. } => "55006",
        EngineError::StateValidation { .. } => "22P02",
        EngineError::AlreadyExists { .. } => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    match &e {
        EngineError::WalError(_) => warn!(error = %e, "write failed"),
        EngineError::NotFound { reason, .. } => debug!(?reason, error = %e, "not found"),
        _ => {}
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::Window(_) => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
