//! Request routing over the engine, account, history and auth services.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bankcore_auth::{AuthService, NewPrincipal, PrincipalUpdate};
use bankcore_common::{
    parse_date_bound, AccountNumber, BankError, BoundSide, Currency, DateRange, Principal,
    PrincipalId, Result,
};
use bankcore_engine::{
    AccountService, AuthorizationGate, History, HistoryQuery, SharedMetrics, TransactionEngine,
};
use bankcore_ledger::{AccountType, LedgerStore, TransactionType};
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::http::request::Parts;
use hyper::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Limited};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::admin::UserAdmin;
use crate::audit::AuditEvent;
use crate::http::{bearer_token, parse_amount, parse_json, parse_query, HttpResponse, Reply};
use crate::state::ServerState;

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct VerifyOtpRequest {
    username: String,
    otp: String,
}

#[derive(Deserialize, Default)]
struct CreateAccountRequest {
    #[serde(default)]
    account_type: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Deserialize)]
struct AmountRequest {
    account: String,
    #[serde(default)]
    amount: Value,
}

#[derive(Deserialize)]
struct TransferRequest {
    from_account: String,
    to_account: String,
    #[serde(default)]
    amount: Value,
}

/// The HTTP application: decodes requests, calls the services and encodes
/// their results.
pub struct App {
    auth: Arc<AuthService>,
    engine: TransactionEngine,
    accounts: AccountService,
    history: History,
    admin: UserAdmin,
    store: Arc<dyn LedgerStore>,
    metrics: SharedMetrics,
    state: RwLock<ServerState>,
    max_body_bytes: usize,
}

impl App {
    /// User administration is checked against the login directory's roles.
    pub fn new(
        auth: Arc<AuthService>,
        engine: TransactionEngine,
        accounts: AccountService,
        history: History,
        store: Arc<dyn LedgerStore>,
        metrics: SharedMetrics,
        max_body_bytes: usize,
    ) -> Self {
        let directory = auth.directory().clone();
        let admin = UserAdmin::new(directory.clone(), AuthorizationGate::new(directory));
        Self {
            auth,
            engine,
            accounts,
            history,
            admin,
            store,
            metrics,
            state: RwLock::new(ServerState::Starting),
            max_body_bytes,
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ServerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            info!(from = previous.as_str(), to = state.as_str(), "Server state changed");
        }
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    /// Evict expired credentials and prune idle account locks.
    pub fn maintain(&self) {
        let evicted = self.auth.evict_expired();
        let pruned = self.store.prune_idle_locks();
        if evicted > 0 || pruned > 0 {
            info!(evicted, pruned, "Maintenance pass");
        }
    }

    pub async fn run_maintenance(&self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            self.maintain();
        }
    }

    /// Serve a request straight off a connection.
    pub async fn serve(&self, req: Request<Incoming>) -> HttpResponse {
        let (parts, body) = req.into_parts();
        match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => {
                self.handle(Request::from_parts(parts, collected.to_bytes()))
                    .await
            }
            Err(e) => {
                debug!(error = %e, "Request body rejected");
                Reply::plain_error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "BODY_REJECTED",
                    "Request body too large or unreadable",
                )
                .into_response()
            }
        }
    }

    /// Route a fully-read request.
    pub async fn handle(&self, req: Request<Bytes>) -> HttpResponse {
        let (parts, body) = req.into_parts();

        if parts.uri.path() != "/health" && !self.state().accepts_requests() {
            return Reply::plain_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                "Server is not accepting requests",
            )
            .into_response();
        }

        let mut principal = None;
        let reply = self
            .route(&parts, &body, &mut principal)
            .await
            .unwrap_or_else(|e| Reply::error(&e));

        if parts.method != Method::GET && parts.method != Method::HEAD {
            AuditEvent {
                principal,
                method: parts.method.as_str(),
                path: parts.uri.path(),
                status: reply.status.as_u16(),
                request: &body,
                response: &reply.body,
            }
            .emit();
        }

        reply.into_response()
    }

    async fn route(
        &self,
        parts: &Parts,
        body: &Bytes,
        acting: &mut Option<PrincipalId>,
    ) -> Result<Reply> {
        let path = parts.uri.path();
        match (&parts.method, path) {
            (&Method::GET, "/health") => Ok(Reply::json(
                StatusCode::OK,
                &json!({ "status": self.state() }),
            )),
            (&Method::GET, "/metrics") => {
                let locks = self.store.lock_stats();
                Ok(Reply::text(StatusCode::OK, self.metrics.to_prometheus(locks)))
            }
            (&Method::POST, "/api/user/login") => self.login(body).await,
            (&Method::POST, "/api/user/verify-otp") => self.verify_otp(body),
            _ => {
                let Some(route) = Route::match_path(&parts.method, path) else {
                    return Ok(unrouted(path));
                };
                let principal = self.authenticate(parts)?;
                *acting = Some(principal.id);
                self.dispatch(route, &principal, parts, body).await
            }
        }
    }

    async fn dispatch(
        &self,
        route: Route,
        principal: &Principal,
        parts: &Parts,
        body: &Bytes,
    ) -> Result<Reply> {
        match route {
            Route::CreateAccount => {
                let request: CreateAccountRequest = if body.is_empty() {
                    CreateAccountRequest::default()
                } else {
                    parse_json(body)?
                };
                let account_type = request
                    .account_type
                    .as_deref()
                    .map(AccountType::from_str)
                    .transpose()?
                    .unwrap_or_default();
                let currency = request
                    .currency
                    .as_deref()
                    .map(Currency::from_str)
                    .transpose()?
                    .unwrap_or_default();
                let account = self.accounts.open(principal, account_type, currency).await?;
                Ok(Reply::json(StatusCode::CREATED, &account))
            }
            Route::OwnAccounts => {
                let accounts = self.accounts.list_own(principal).await?;
                Ok(Reply::json(StatusCode::OK, &accounts))
            }
            Route::AllAccounts => {
                let accounts = self.accounts.list_all(principal).await?;
                Ok(Reply::json(StatusCode::OK, &accounts))
            }
            Route::Deposit | Route::Withdraw => {
                let request: AmountRequest = parse_json(body)?;
                let account = account_field(&request.account, "account")?;
                let amount = parse_amount(&request.amount)?;
                let record = if route == Route::Deposit {
                    self.engine.deposit(principal, &account, amount).await?
                } else {
                    self.engine.withdraw(principal, &account, amount).await?
                };
                Ok(Reply::json(StatusCode::CREATED, &record))
            }
            Route::Transfer => {
                let request: TransferRequest = parse_json(body)?;
                let from = account_field(&request.from_account, "from_account")?;
                let to = account_field(&request.to_account, "to_account")?;
                let amount = parse_amount(&request.amount)?;
                let record = self.engine.transfer(principal, &from, &to, amount).await?;
                Ok(Reply::json(StatusCode::CREATED, &record))
            }
            Route::History => {
                let query = history_query(parts.uri.query())?;
                let page = self.history.history(principal, &query).await?;
                Ok(Reply::json(StatusCode::OK, &page))
            }
            Route::AllTransactions => {
                let query = history_query(parts.uri.query())?;
                let page = self.history.all_transactions(principal, &query).await?;
                Ok(Reply::json(StatusCode::OK, &page))
            }
            Route::Logout => {
                if let Some(token) = bearer_token(&parts.headers) {
                    self.auth.logout(token);
                }
                Ok(Reply::json(StatusCode::OK, &json!({ "message": "Logged out." })))
            }
            Route::ListUsers => {
                let params = parse_query(parts.uri.query());
                let present = |key: &str| params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
                let count = present("count").map(|raw| number(raw, "count")).transpose()?;
                let page = present("page").map(|raw| number(raw, "page")).transpose()?;
                let users = self.admin.list(
                    principal,
                    present("search"),
                    count.unwrap_or(0),
                    page.unwrap_or(0),
                )?;
                Ok(Reply::json(StatusCode::OK, &users))
            }
            Route::CreateUser => {
                let request: NewPrincipal = parse_json(body)?;
                let user = self.admin.create(principal, request)?;
                Ok(Reply::json(StatusCode::CREATED, &user))
            }
            Route::User(method, username) => {
                let user = match method {
                    UserMethod::Get => self.admin.get(principal, &username)?,
                    UserMethod::Update => {
                        let update: PrincipalUpdate = parse_json(body)?;
                        self.admin.update(principal, &username, update)?
                    }
                    UserMethod::Deactivate => {
                        self.admin.deactivate(principal, &username)?;
                        return Ok(Reply::json(
                            StatusCode::OK,
                            &json!({ "detail": "User deactivated" }),
                        ));
                    }
                };
                Ok(Reply::json(StatusCode::OK, &user))
            }
            Route::Roles => {
                let roles = self.admin.roles(principal)?;
                Ok(Reply::json(StatusCode::OK, &roles))
            }
            Route::ReloadDirectory => {
                let principals = self.admin.reload(principal)?;
                Ok(Reply::json(
                    StatusCode::OK,
                    &json!({ "message": "Directory reloaded.", "principals": principals }),
                ))
            }
        }
    }

    async fn login(&self, body: &Bytes) -> Result<Reply> {
        let request: LoginRequest = parse_json(body)?;
        self.auth.login(&request.username, &request.password).await?;
        Ok(Reply::json(
            StatusCode::OK,
            &json!({ "message": "OTP sent. Verify to complete login." }),
        ))
    }

    fn verify_otp(&self, body: &Bytes) -> Result<Reply> {
        let request: VerifyOtpRequest = parse_json(body)?;
        let token = self.auth.verify_otp(&request.username, request.otp.trim())?;
        Ok(Reply::json(StatusCode::OK, &json!({ "access": token })))
    }

    fn authenticate(&self, parts: &Parts) -> Result<Principal> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            BankError::Unauthenticated("Authentication credentials were not provided.".to_string())
        })?;
        self.auth.authenticate_bearer(token).map_err(|e| {
            warn!(error = %e, "Bearer token rejected");
            BankError::from(e)
        })
    }
}

/// Authenticated routes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    CreateAccount,
    OwnAccounts,
    AllAccounts,
    Deposit,
    Withdraw,
    Transfer,
    History,
    AllTransactions,
    Logout,
    ListUsers,
    CreateUser,
    User(UserMethod, String),
    Roles,
    ReloadDirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserMethod {
    Get,
    Update,
    Deactivate,
}

const USERS_PREFIX: &str = "/api/users/";

impl Route {
    fn match_path(method: &Method, path: &str) -> Option<Route> {
        let path = path.trim_end_matches('/');
        if let Some(username) = path.strip_prefix(USERS_PREFIX).filter(|u| !u.contains('/')) {
            let user_method = match *method {
                Method::GET => UserMethod::Get,
                Method::PUT | Method::PATCH => UserMethod::Update,
                Method::DELETE => UserMethod::Deactivate,
                _ => return None,
            };
            return Some(Route::User(user_method, username.to_string()));
        }

        let route = match (method, path) {
            (&Method::POST, "/api/accounts/create") => Route::CreateAccount,
            (&Method::GET, "/api/accounts") => Route::OwnAccounts,
            (&Method::GET, "/api/accounts/all") => Route::AllAccounts,
            (&Method::POST, "/api/transactions/deposit") => Route::Deposit,
            (&Method::POST, "/api/transactions/withdraw") => Route::Withdraw,
            (&Method::POST, "/api/transactions/transfer") => Route::Transfer,
            (&Method::GET, "/api/transactions/history") => Route::History,
            (&Method::GET, "/api/transactions/all") => Route::AllTransactions,
            (&Method::POST, "/api/user/logout") => Route::Logout,
            (&Method::GET, "/api/users") => Route::ListUsers,
            (&Method::POST, "/api/users") => Route::CreateUser,
            (&Method::GET, "/api/roles") => Route::Roles,
            (&Method::POST, "/api/roles/reload") => Route::ReloadDirectory,
            _ => return None,
        };
        Some(route)
    }
}

const KNOWN_PATHS: [&str; 16] = [
    "/health",
    "/metrics",
    "/api/user/login",
    "/api/user/verify-otp",
    "/api/accounts/create",
    "/api/accounts",
    "/api/accounts/all",
    "/api/transactions/deposit",
    "/api/transactions/withdraw",
    "/api/transactions/transfer",
    "/api/transactions/history",
    "/api/transactions/all",
    "/api/user/logout",
    "/api/users",
    "/api/roles",
    "/api/roles/reload",
];

fn unrouted(path: &str) -> Reply {
    let path = path.trim_end_matches('/');
    if KNOWN_PATHS.contains(&path) || path.starts_with(USERS_PREFIX) {
        Reply::plain_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed",
        )
    } else {
        Reply::plain_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Not found")
    }
}

fn account_field(raw: &str, field: &str) -> Result<AccountNumber> {
    AccountNumber::parse(raw).map_err(|_| BankError::InvalidRequest {
        message: format!("{} must be a string of digits", field),
        field: Some(field.to_string()),
    })
}

fn history_query(raw: Option<&str>) -> Result<HistoryQuery> {
    let params = parse_query(raw);
    let present = |key: &str| params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    let account = present("account")
        .map(|raw| account_field(raw, "account"))
        .transpose()?;
    let start = present("start_date")
        .map(|raw| parse_date_bound(raw, BoundSide::Start))
        .transpose()?;
    let end = present("end_date")
        .map(|raw| parse_date_bound(raw, BoundSide::End))
        .transpose()?;
    let kind = present("type").map(TransactionType::from_str).transpose()?;
    let count = present("count").map(|raw| number(raw, "count")).transpose()?;
    let page = present("page").map(|raw| number(raw, "page")).transpose()?;
    let include_incoming = present("include_incoming")
        .map_or(false, |raw| matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"));

    let query = HistoryQuery {
        account,
        range: DateRange::new(start, end)?,
        kind,
        count: count.unwrap_or(0),
        page: page.unwrap_or(0),
        include_incoming,
    };
    query.validate()?;
    Ok(query)
}

fn number(raw: &str, field: &str) -> Result<u64> {
    raw.parse().map_err(|_| BankError::InvalidRequest {
        message: format!("{} must be a non-negative integer", field),
        field: Some(field.to_string()),
    })
}
