mod config;
mod error;
mod models;

use axum::{
    Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use clap::Parser;
use std::net::SocketAddr;
use tracing::{error, info};

use error::DokuwebError;
use models::dokuweb::{CreateTicketRequest, DokuwebClient};

/// ----------------------------------------------------------------------
/// 1  Kommandozeilen-Argumente
/// ----------------------------------------------------------------------
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Pfad zur YAML-Konfiguration (Zugangsdaten, Endpunkte)
    #[arg(short, long, env = "DOKUWEB_CONFIG", default_value = "config.yml")]
    config: String,

    /// Port (Default 8000)
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
}

/// ----------------------------------------------------------------------
/// 2  Programmstart
/// ----------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a) Logging
    tracing_subscriber::fmt().with_env_filter("info").init();

    // b) CLI + Konfiguration
    let cli = Cli::parse();
    config::init(&cli.config)?;

    // c) Router
    let app = Router::new()
        .route("/dokuweb/token", get(fetch_token))
        .route("/dokuweb/ticket", post(create_ticket))
        .route("/dokuweb/ticket/:id", get(ticket_details))
        .route("/dokuweb/keywords", get(keywords))
        .route("/dokuweb/tickets", get(search_tickets));

    // d) Server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!("Listening on http://{addr}/dokuweb/{{token, ticket, keywords, tickets}}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

/// Jeder Handler baut sich seinen eigenen Client aus der Konfiguration.
async fn authenticated_client() -> Result<DokuwebClient, DokuwebError> {
    let mut client = DokuwebClient::new(config::get_dokuweb());
    client.authenticate().await?;
    Ok(client)
}

fn error_response(operation: &str, err: DokuwebError) -> (StatusCode, Json<Value>) {
    error!(%err, "error in {}", operation);
    let status = match &err {
        DokuwebError::Precondition(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

/// ----------------------------------------------------------------------
/// 3  Handler
/// ----------------------------------------------------------------------
#[tracing::instrument]
async fn fetch_token() -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let client = authenticated_client()
        .await
        .map_err(|e| error_response("fetch_token", e))?;
    // authenticate() stellt sicher, dass ein Token vorhanden ist
    let token = client.token().unwrap_or_default().to_string();
    Ok(Json(json!({ "token": token })))
}

#[tracing::instrument(skip(payload))]
async fn create_ticket(
    Json(payload): Json<CreateTicketRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!("creating ticket: {}", payload.subject);

    let client = authenticated_client()
        .await
        .map_err(|e| error_response("create_ticket", e))?;
    let created = client
        .create_ticket(&payload)
        .await
        .map_err(|e| error_response("create_ticket", e))?;
    Ok(Json(json!(created)))
}

#[derive(Debug, Deserialize)]
struct KeywordsQuery {
    channel: Option<String>,
    ticketsystem: Option<String>,
}

#[tracing::instrument]
async fn keywords(
    Query(query): Query<KeywordsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let client = authenticated_client()
        .await
        .map_err(|e| error_response("keywords", e))?;
    let keywords = client
        .get_keywords(query.channel.as_deref(), query.ticketsystem.as_deref())
        .await
        .map_err(|e| error_response("keywords", e))?;
    Ok(Json(json!(keywords)))
}

#[tracing::instrument]
async fn ticket_details(
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!("fetching ticket details for ID: {}", id);

    let client = authenticated_client()
        .await
        .map_err(|e| error_response("ticket_details", e))?;
    match client.get_ticket_details(&id).await {
        Ok(attrs) => Ok(Json(json!(attrs))),
        Err(err @ DokuwebError::Parse { .. }) => {
            error!(%err, "ticket not found: {}", id);
            Err((StatusCode::NOT_FOUND, Json(json!({ "error": err.to_string() }))))
        }
        Err(err) => Err(error_response("ticket_details", err)),
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    creator: String,
    start: Option<u32>,
    max: Option<u32>,
}

#[tracing::instrument]
async fn search_tickets(
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!("searching tickets created by: {}", query.creator);

    let client = authenticated_client()
        .await
        .map_err(|e| error_response("search_tickets", e))?;
    let tickets = client
        .search_tickets_by_creator(&query.creator, query.start, query.max)
        .await
        .map_err(|e| error_response("search_tickets", e))?;
    Ok(Json(json!(tickets)))
}
