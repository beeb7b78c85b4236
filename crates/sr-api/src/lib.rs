use std::env;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    extract::State,
    extract::connect_info::ConnectInfo,
    http::Method,
    http::Request,
    http::header::{CONTENT_TYPE, HeaderName, HeaderValue},
    middleware,
    middleware::Next,
    response::Response,
    routing::{get, patch, post},
};
use chrono::{FixedOffset, Offset, Utc};
use clap::{ArgAction, Parser, ValueEnum};
use dotenvy::dotenv;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};
use sr_common::db::{PgReferralStore, create_pool_from_url, run_migrations};
use sr_common::identity::{
    AdminAllowList, DisabledIdentityProvider, GoogleIdentityProvider, GoogleOAuthConfig,
    IdentityGate, IdentityProvider, StaticIdentityProvider,
};
use sr_common::policy::parse_utc_offset;
use sr_common::store::{MemoryReferralStore, ReferralStore, SheetsConfig, SheetsReferralStore};
use sr_common::store::sheets::DEFAULT_API_BASE;
use sr_common::workflow::WorkflowEngine;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod auth;
pub mod error;
pub mod handlers;
pub mod views;

use auth::{MIN_SESSION_SECRET_LEN, SessionConfig};
use error::ApiError;
use handlers::{admin, admin_pages, health, pages, referrals, session};
use sr_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};

const SHUTDOWN_DRAIN_GRACE: std::time::Duration = std::time::Duration::from_millis(200);
const DEFAULT_SHEET_TAB: &str = "Referrals";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum StoreBackend {
    Sheets,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "sr-api", about = "Staff referral program: submission, lookup and admin workflow")]
struct Cli {
    /// Server port
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// Where referrals are kept: sheets | postgres | memory
    #[arg(long, env = "SR_STORE_BACKEND", default_value = "sheets", value_enum)]
    store_backend: StoreBackend,

    /// Spreadsheet id for SR_STORE_BACKEND=sheets
    #[arg(long, env = "SR_SHEET_ID")]
    sheet_id: Option<String>,

    /// Tab holding the referral rows
    #[arg(long, env = "SR_SHEET_TAB", default_value = DEFAULT_SHEET_TAB)]
    sheet_tab: String,

    /// Service account key file used to reach the spreadsheet
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_KEY")]
    service_account_key: Option<PathBuf>,

    /// PostgreSQL connection string for SR_STORE_BACKEND=postgres
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// OAuth client id for admin sign-in
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    google_client_id: Option<String>,

    /// OAuth client secret for admin sign-in
    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    google_client_secret: Option<String>,

    /// Callback URL registered with the OAuth client
    #[arg(
        long,
        env = "SR_OAUTH_REDIRECT_URL",
        default_value = "http://localhost:3001/auth/callback"
    )]
    oauth_redirect_url: String,

    /// Key signing admin session cookies (at least 32 bytes)
    #[arg(long, env = "SR_SESSION_SECRET")]
    session_secret: String,

    /// Comma separated admin email addresses
    #[arg(long, env = "SR_ADMIN_EMAILS")]
    admin_emails: String,

    /// Comma separated list of allowed CORS origins
    #[arg(long, env = "SR_CORS_ORIGINS", default_value = "http://localhost:3000")]
    cors_origins: String,

    /// Mark cookies Secure; disable only for plain-http local development
    #[arg(long, env = "SR_COOKIE_SECURE", default_value_t = true, action = ArgAction::Set)]
    cookie_secure: bool,

    /// UTC offset of the program's calendar, e.g. -05:00; decides the day a
    /// hire becomes eligible
    #[arg(
        long,
        env = "SR_PROGRAM_UTC_OFFSET",
        default_value = "+00:00",
        allow_hyphen_values = true
    )]
    program_utc_offset: String,
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Sheets(SheetsConfig),
    Postgres { database_url: String },
    Memory,
}

impl StoreConfig {
    fn backend(&self) -> StoreBackend {
        match self {
            StoreConfig::Sheets(_) => StoreBackend::Sheets,
            StoreConfig::Postgres { .. } => StoreBackend::Postgres,
            StoreConfig::Memory => StoreBackend::Memory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub store: StoreConfig,
    pub oauth: Option<GoogleOAuthConfig>,
    pub session: SessionConfig,
    pub admins: AdminAllowList,
    pub cors_origins: Vec<String>,
    pub program_offset: FixedOffset,
}

type IpRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

#[derive(Clone)]
pub struct RateLimits {
    global: Arc<IpRateLimiter>,
    submit: Arc<IpRateLimiter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub global_per_sec: u64,
    pub global_burst: u32,
    pub submit_per_sec: u64,
    pub submit_burst: u32,
}

impl RateLimitConfig {
    fn parse_env_u64(vars: &[&str]) -> Option<u64> {
        vars.iter()
            .find_map(|name| env::var(name).ok())
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
    }

    fn parse_env_u32(vars: &[&str]) -> Option<u32> {
        vars.iter()
            .find_map(|name| env::var(name).ok())
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
    }

    fn from_env() -> Self {
        Self {
            global_per_sec: Self::parse_env_u64(&["SR_RATE_LIMIT_GLOBAL_PER_SEC"]).unwrap_or(20),
            global_burst: Self::parse_env_u32(&["SR_RATE_LIMIT_GLOBAL_BURST"]).unwrap_or(40),
            submit_per_sec: Self::parse_env_u64(&["SR_RATE_LIMIT_SUBMIT_PER_SEC"]).unwrap_or(1),
            submit_burst: Self::parse_env_u32(&["SR_RATE_LIMIT_SUBMIT_BURST"]).unwrap_or(5),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl AppConfig {
    fn from_cli(cli: Cli) -> Result<Self, ApiError> {
        let cors_origins = split_list(&cli.cors_origins);

        if cors_origins.iter().any(|origin| origin == "*") {
            return Err(ApiError::Config(
                "SR_CORS_ORIGINS must list explicit origins when credentials are enabled".into(),
            ));
        }

        if cli.session_secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(ApiError::Config(format!(
                "SR_SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} bytes"
            )));
        }

        let program_offset = parse_utc_offset(&cli.program_utc_offset).ok_or_else(|| {
            ApiError::Config(format!(
                "SR_PROGRAM_UTC_OFFSET must look like +HH:MM or -HH:MM, got {:?}",
                cli.program_utc_offset
            ))
        })?;

        let admins = AdminAllowList::parse(&cli.admin_emails);
        if admins.is_empty() {
            return Err(ApiError::Config(
                "SR_ADMIN_EMAILS must name at least one admin".into(),
            ));
        }

        let store = match cli.store_backend {
            StoreBackend::Sheets => {
                let spreadsheet_id = non_blank(cli.sheet_id).ok_or_else(|| {
                    ApiError::Config("SR_SHEET_ID is required when SR_STORE_BACKEND=sheets".into())
                })?;
                let service_account_key = cli.service_account_key.ok_or_else(|| {
                    ApiError::Config(
                        "GOOGLE_SERVICE_ACCOUNT_KEY is required when SR_STORE_BACKEND=sheets"
                            .into(),
                    )
                })?;
                StoreConfig::Sheets(SheetsConfig {
                    spreadsheet_id,
                    tab: cli.sheet_tab,
                    service_account_key,
                    api_base: DEFAULT_API_BASE.to_string(),
                })
            }
            StoreBackend::Postgres => {
                let database_url = non_blank(cli.database_url).ok_or_else(|| {
                    ApiError::Config(
                        "DATABASE_URL is required when SR_STORE_BACKEND=postgres".into(),
                    )
                })?;
                StoreConfig::Postgres { database_url }
            }
            StoreBackend::Memory => StoreConfig::Memory,
        };

        let oauth = match (
            non_blank(cli.google_client_id),
            non_blank(cli.google_client_secret),
        ) {
            (Some(client_id), Some(client_secret)) => Some(GoogleOAuthConfig::new(
                client_id,
                client_secret,
                cli.oauth_redirect_url,
            )),
            (None, None) => None,
            _ => {
                return Err(ApiError::Config(
                    "GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET must be set together".into(),
                ));
            }
        };

        Ok(Self {
            port: cli.port,
            store,
            oauth,
            session: SessionConfig::new(cli.session_secret, cli.cookie_secure),
            admins,
            cors_origins,
            program_offset,
        })
    }

    pub fn for_tests(admins: &str) -> Self {
        Self {
            port: 3001,
            store: StoreConfig::Memory,
            oauth: None,
            session: SessionConfig::new("test-session-secret-0123456789abcdef".into(), false),
            admins: AdminAllowList::parse(admins),
            cors_origins: vec!["http://localhost:3000".into()],
            program_offset: Utc.fix(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReferralStore>,
    pub workflow: WorkflowEngine,
    pub identity: IdentityGate,
    pub config: AppConfig,
    pub(crate) rate_limits: RateLimits,
    pub readiness: Arc<std::sync::atomic::AtomicBool>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        store: Arc<dyn ReferralStore>,
        provider: Arc<dyn IdentityProvider>,
        config: AppConfig,
        rate_limits: RateLimits,
    ) -> Self {
        Self {
            workflow: WorkflowEngine::new(store.clone())
                .with_program_offset(config.program_offset),
            identity: IdentityGate::new(provider, config.admins.clone()),
            store,
            config,
            rate_limits,
            readiness: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }
}

impl axum::extract::FromRef<SharedState> for SessionConfig {
    fn from_ref(input: &SharedState) -> SessionConfig {
        input.config.session.clone()
    }
}

impl axum::extract::FromRef<SharedState> for AdminAllowList {
    fn from_ref(input: &SharedState) -> AdminAllowList {
        input.identity.admins().clone()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
}

fn build_ip_limiter(per_second: u64, burst_size: u32) -> Arc<IpRateLimiter> {
    let nanos_per_token = 1_000_000_000u64 / per_second.max(1);
    let burst = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(Duration::from_nanos(nanos_per_token.max(1)))
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst);

    Arc::new(RateLimiter::keyed(quota))
}

pub fn default_rate_limits() -> RateLimits {
    let cfg = RateLimitConfig::from_env();
    RateLimits {
        global: build_ip_limiter(cfg.global_per_sec, cfg.global_burst),
        submit: build_ip_limiter(cfg.submit_per_sec, cfg.submit_burst),
    }
}

fn request_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

fn enforce_rate_limit(limiter: &IpRateLimiter, ip: Option<IpAddr>) -> Result<(), ApiError> {
    if let Some(client_ip) = ip {
        if limiter.check_key(&client_ip).is_err() {
            return Err(ApiError::TooManyRequests("rate limit exceeded".into()));
        }
    }

    Ok(())
}

async fn global_rate_limit(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.global, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn submit_rate_limit(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.submit, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn attach_request_id_context(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    Ok(error::with_request_id(request_id, next.run(req)).await)
}

pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let request_id_header = HeaderName::from_static("x-request-id");
    let trace_header = request_id_header.clone();

    let trace = TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(&trace_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
            status = tracing::field::Empty,
        )
    });

    let submit_limit = || middleware::from_fn_with_state(state.clone(), submit_rate_limit);

    let api_routes = Router::new()
        .route(
            "/referrals",
            post(referrals::submit).route_layer(submit_limit()),
        )
        .route("/referrals/lookup", get(referrals::lookup))
        .route("/referrals/:id", get(referrals::get_referral))
        .route("/staff/lookup", get(referrals::staff_lookup))
        .route("/statuses", get(referrals::statuses))
        .route("/auth/status", get(session::auth_status))
        .route("/admin/referrals", get(admin::list_referrals))
        .route(
            "/admin/referrals/:id",
            get(admin::get_referral).patch(admin::update_referral),
        )
        .route("/admin/referrals/:id/archive", patch(admin::archive))
        .route("/admin/referrals/:id/unarchive", patch(admin::unarchive))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/rollup", get(admin::rollup));

    let admin_page_routes = Router::new()
        .route("/", get(admin_pages::dashboard))
        .route("/referrals", get(admin_pages::list))
        .route("/referrals/:id", get(admin_pages::detail))
        .route("/referrals/:id/status", post(admin_pages::change_status))
        .route("/referrals/:id/notes", post(admin_pages::save_notes))
        .route("/referrals/:id/archive", post(admin_pages::archive))
        .route("/referrals/:id/unarchive", post(admin_pages::unarchive));

    Router::new()
        .route("/", get(pages::index))
        .route(
            "/referrals",
            post(pages::submit).route_layer(submit_limit()),
        )
        .route("/lookup", get(pages::lookup))
        .route("/login", get(session::login))
        .route("/auth/callback", get(session::callback))
        .route("/logout", get(session::logout))
        .route("/health", get(health::readyz))
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .nest("/admin", admin_page_routes)
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            global_rate_limit,
        ))
        .layer(middleware::from_fn(attach_request_id_context))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(
            request_id_header,
            MakeRequestUuid::default(),
        ))
        .layer(cors)
        .with_state(state)
}

pub const TEST_ADMIN_EMAIL: &str = "talent@school.org";
pub const TEST_ADMIN_CODE: &str = "admin-code";
pub const TEST_STAFF_CODE: &str = "staff-code";

/// In-memory state with a fixed-code identity provider: `admin-code` signs
/// in [`TEST_ADMIN_EMAIL`], `staff-code` signs in a non-admin.
pub fn test_state_with_store(store: Arc<dyn ReferralStore>) -> SharedState {
    let provider = StaticIdentityProvider::new()
        .with_code(TEST_ADMIN_CODE, TEST_ADMIN_EMAIL)
        .with_code(TEST_STAFF_CODE, "teacher@school.org");

    Arc::new(AppState::new(
        store,
        Arc::new(provider),
        AppConfig::for_tests(TEST_ADMIN_EMAIL),
        default_rate_limits(),
    ))
}

pub fn test_state() -> SharedState {
    test_state_with_store(Arc::new(MemoryReferralStore::new()))
}


async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn ReferralStore>, ApiError> {
    match config {
        StoreConfig::Sheets(sheets) => {
            let store = SheetsReferralStore::connect(sheets.clone())
                .await
                .map_err(|err| ApiError::StoreUnavailable(format!("sheets setup failed: {err}")))?;
            Ok(Arc::new(store))
        }
        StoreConfig::Postgres { database_url } => {
            let pool = create_pool_from_url(database_url)
                .map_err(|err| ApiError::StoreUnavailable(format!("failed to create pool: {err}")))?;
            run_migrations(&pool).await.map_err(|err| {
                ApiError::StoreUnavailable(format!("failed to run migrations: {err}"))
            })?;
            Ok(Arc::new(PgReferralStore::new(pool)))
        }
        StoreConfig::Memory => {
            warn!("using the in-memory referral store; data is lost on restart");
            Ok(Arc::new(MemoryReferralStore::new()))
        }
    }
}

fn identity_provider(config: &AppConfig) -> Result<Arc<dyn IdentityProvider>, ApiError> {
    match &config.oauth {
        Some(oauth) => {
            let provider = GoogleIdentityProvider::new(oauth.clone())
                .map_err(|err| ApiError::Internal(format!("failed to build OAuth client: {err}")))?;
            Ok(Arc::new(provider))
        }
        None => {
            warn!("GOOGLE_CLIENT_ID is not set; admin sign-in is disabled");
            Ok(Arc::new(DisabledIdentityProvider))
        }
    }
}

pub async fn run() -> Result<(), ApiError> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli)?;
    let store = connect_store(&config.store).await?;
    let provider = identity_provider(&config)?;

    let state = Arc::new(AppState::new(
        store,
        provider,
        config.clone(),
        default_rate_limits(),
    ));

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let app = create_router(state.clone());

    info!(
        %addr,
        store = ?config.store.backend(),
        admins = config.admins.len(),
        "sr-api listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    state
        .readiness
        .store(false, std::sync::atomic::Ordering::SeqCst);

    // Let load balancers see /readyz fail before new connections are refused.
    tokio::time::sleep(SHUTDOWN_DRAIN_GRACE).await;
}
