use askama::Template;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use market_digest_server_rs::completion::{OpenAiChat, TextCompletion};
use market_digest_server_rs::config::Config;
use market_digest_server_rs::digest::DigestService;
use market_digest_server_rs::email::Mailer;
use market_digest_server_rs::models::{DigestRequest, is_valid_email};
use market_digest_server_rs::news::NewsClient;
use market_digest_server_rs::quotes::QuoteFetcher;
use market_digest_server_rs::tickers::{TickerResolver, YahooSearchClient, fill_random_tickers};

use tower_http::trace::TraceLayer;

const MAX_TICKER_SLOTS: usize = 5;

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {}

struct AppState {
    resolver: Arc<TickerResolver>,
    digest: DigestService,
}

async fn index_handler() -> impl IntoResponse {
    match (IndexTemplate {}).render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Template error: {}", e),
        )
            .into_response(),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("Failed to load configuration");

    let completion: Arc<dyn TextCompletion> = Arc::new(OpenAiChat::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    ));
    let resolver = Arc::new(TickerResolver::new(
        Arc::new(YahooSearchClient::new()),
        completion.clone(),
    ));
    let mailer = Mailer::new(&config.smtp).expect("Failed to configure SMTP transport");
    let digest = DigestService::new(
        resolver.clone(),
        QuoteFetcher::new(),
        NewsClient::new(config.news_api_key.clone(), config.finnhub_api_key.clone()),
        completion,
        mailer,
    );
    let shared_state = Arc::new(AppState { resolver, digest });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/tickers/resolve/", post(resolve_ticker_handler))
        .route("/tickers/randomize/", post(randomize_tickers_handler))
        .route("/digest/", post(send_digest_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

#[derive(Serialize)]
struct GenericResponse {
    success: bool,
    message: String,
}

#[derive(Deserialize)]
struct ResolveRequest {
    query: String,
}

#[derive(Serialize)]
struct ResolveResponse {
    symbol: String,
}

async fn resolve_ticker_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResolveRequest>,
) -> impl IntoResponse {
    let symbol = state.resolver.resolve(&request.query).await;
    Json(ResolveResponse { symbol })
}

#[derive(Deserialize, Serialize)]
struct TickerSlots {
    tickers: Vec<String>,
}

async fn randomize_tickers_handler(Json(request): Json<TickerSlots>) -> impl IntoResponse {
    Json(TickerSlots {
        tickers: fill_random_tickers(request.tickers),
    })
}

async fn send_digest_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DigestRequest>,
) -> impl IntoResponse {
    let email = request.email.trim();
    if email.is_empty() {
        return bad_request("Please enter your email address.");
    }
    if !is_valid_email(email) {
        return bad_request("Please enter a valid email address.");
    }
    if request.name.trim().is_empty() {
        return bad_request("Please enter your name.");
    }
    if request.tickers.is_empty() || request.tickers.len() > MAX_TICKER_SLOTS {
        return bad_request("Please provide between 1 and 5 ticker fields.");
    }

    let request = DigestRequest {
        name: request.name.trim().to_string(),
        email: email.to_string(),
        ..request
    };

    match state.digest.build_and_send(&request).await {
        Ok(()) => Json(GenericResponse {
            success: true,
            message: "Newsletter sent to your inbox!".to_string(),
        })
        .into_response(),
        Err(e) => {
            error!("Error building digest for {}: {:#}", request.email, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "message": format!("Failed to send digest: {}", e)
                })),
            )
                .into_response()
        }
    }
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "success": false,
            "message": message
        })),
    )
        .into_response()
}
