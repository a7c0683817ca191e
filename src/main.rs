use ecorelay::cards::CardStore;
use ecorelay::db::init_db;
use ecorelay::health;
use ecorelay::ingress::QueryRequest;
use ecorelay::logging::{request_id_middleware, setup_panic_hook, REQUEST_ID_HEADER};
use ecorelay::streaming::RelayPump;
use ecorelay::upstream::UpstreamClient;
use ecorelay::{AppState, Args, Card, RelayError, Result};

use axum::{
    extract::{Query, State},
    http as ax_http, middleware,
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use tracing_subscriber::prelude::*;

#[tracing::instrument(name = "relay.query", skip_all)]
async fn query_handler(
    State(state): State<Arc<AppState>>,
    headers: ax_http::HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let query: QueryRequest = match serde_json::from_value(payload) {
        Ok(q) => q,
        Err(e) => {
            let err: ecorelay::ObservedError =
                RelayError::InvalidQuery(format!("Malformed query payload: {}", e)).into();
            return err.into_response();
        }
    };

    if let Err(e) = query.validate() {
        tracing::warn!("[client -> relay] Rejected query: {}", e);
        return e.into_response();
    }

    ecorelay::logging::log_query_summary(&query);

    let response = match state.upstream.ask(&query.to_upstream_body()).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("[relay -> backend] Request failed: {}", e);
            return e.into_response();
        }
    };

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let heartbeat = state.args.heartbeat();
    let (tx, rx) = mpsc::channel(100);

    let stream_span = tracing::info_span!(
        "stream",
        request_id = %ecorelay::str_utils::prefix_chars(&request_id, 8)
    );
    tokio::spawn(async move {
        RelayPump::handle_stream(response.bytes_stream().boxed(), tx, heartbeat, request_id)
            .instrument(stream_span)
            .await;
    });

    Sse::new(ReceiverStream::new(rx)).into_response()
}

async fn create_card_handler(
    State(state): State<Arc<AppState>>,
    Json(card): Json<Card>,
) -> Result<(ax_http::StatusCode, Json<Card>)> {
    let saved = state.store.save(&card).await?;
    Ok((ax_http::StatusCode::CREATED, Json(saved)))
}

#[derive(Deserialize)]
struct ListCardsParams {
    email: Option<String>,
}

async fn list_cards_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListCardsParams>,
) -> Result<Json<Vec<Card>>> {
    let email = match params.email.as_deref() {
        Some(e) if !e.trim().is_empty() => e,
        _ => {
            return Err(RelayError::InvalidQuery("Missing email query parameter".into()).into());
        }
    };
    let cards = state.store.list_by_owner(email).await?;
    Ok(Json(cards))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "ecorelay=debug".into(),
    };

    let file_appender = tracing_appender::rolling::daily(".", "ecorelay.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    setup_panic_hook();

    let args = Arc::new(Args::parse());

    let pool = match init_db(&args.database).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };
    let store = CardStore::new(pool);

    let api_key = match std::env::var("UPSTREAM_API_KEY") {
        Ok(k) if !k.is_empty() => k,
        _ => {
            eprintln!("Error: UPSTREAM_API_KEY environment variable is missing or empty.");
            eprintln!("Please set it in your .env file or environment.");
            std::process::exit(1);
        }
    };

    // No overall request timeout: analysis streams run for minutes.
    let client = match reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(args.connect_timeout_secs))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let upstream = UpstreamClient::new(
        client,
        args.backend_base_url.clone(),
        api_key,
        args.max_retries,
    );

    let state = Arc::new(AppState {
        upstream,
        store,
        args: args.clone(),
    });

    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([ax_http::Method::GET, ax_http::Method::POST])
        .allow_headers([ax_http::header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/api/query", post(query_handler))
        .route(
            "/api/cards",
            post(create_card_handler).get(list_cards_handler),
        )
        .route("/health", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .layer(axum::extract::DefaultBodyLimit::max(args.max_body_size))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("ecorelay listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
