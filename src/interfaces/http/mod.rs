pub mod session;

use crate::application::use_cases::chat_pipeline::ChatPipeline;
use crate::application::use_cases::conversation_service::ConversationService;
use crate::domain::chat::round_seconds;
use crate::domain::schema::TableMetadata;
use actix_cors::Cors;
use actix_web::{
    delete, dev::Server, get, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use session::SessionKeys;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::error;

const INDEX_HTML: &str = include_str!("../../../static/index.html");
const LOG_CAPACITY: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

pub struct HttpState {
    pub pipeline: Arc<ChatPipeline>,
    pub conversations: Arc<ConversationService>,
    /// Metadata captured at startup, used for the stats summary.
    pub tables: Arc<Vec<TableMetadata>>,
    pub session_keys: SessionKeys,
    pub logs: Arc<Mutex<Vec<LogEntry>>>,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: Option<Value>,
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "error": message }))
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

#[get("/health")]
async fn health(data: web::Data<HttpState>) -> impl Responder {
    let db_ok = match data.pipeline.database().ping().await {
        Ok(()) => true,
        Err(e) => {
            add_log(&data.logs, "WARN", "Health", &format!("Database ping failed: {}", e));
            false
        }
    };

    let (status, database) = if db_ok {
        ("healthy", "connected")
    } else {
        ("degraded", "disconnected")
    };
    HttpResponse::Ok().json(json!({
        "status": status,
        "database": database,
        "model": data.pipeline.model(),
        "rag_indexed": data.pipeline.rag().is_indexed(),
    }))
}

#[get("/tables")]
async fn tables(data: web::Data<HttpState>) -> impl Responder {
    let tables = data.pipeline.rag().table_names();
    HttpResponse::Ok().json(json!({ "count": tables.len(), "tables": tables }))
}

#[get("/stats")]
async fn stats(data: web::Data<HttpState>) -> impl Responder {
    let total_rows: i64 = data.tables.iter().map(|t| t.row_count).sum();
    let total_columns: usize = data.tables.iter().map(|t| t.columns.len()).sum();

    HttpResponse::Ok().json(json!({
        "table_count": data.pipeline.rag().table_names().len(),
        "total_rows": total_rows,
        "total_columns": total_columns,
        "model": data.pipeline.model(),
        "database": data.pipeline.database().database_name(),
    }))
}

#[post("/chat")]
async fn chat(data: web::Data<HttpState>, req: HttpRequest, body: web::Bytes) -> impl Responder {
    let message = serde_json::from_slice::<ChatRequest>(&body)
        .ok()
        .and_then(|r| r.message);
    let question = match message {
        Some(Value::String(text)) => text.trim().to_string(),
        _ => return bad_request("No message provided"),
    };
    if question.is_empty() {
        return bad_request("Empty message");
    }

    let started = Instant::now();
    let (session, new_cookie) = data.session_keys.resolve(&req);
    add_log(
        &data.logs,
        "INFO",
        "Chat",
        &format!("Question: {}", truncate(&question, 120)),
    );

    let mut response = match data.pipeline.process(&question).await {
        Ok(outcome) => {
            if outcome.record_history {
                let answer = outcome.response.answer.as_deref().unwrap_or_default();
                data.conversations.record_exchange(session, &question, answer);
            }
            if let Some(err) = &outcome.response.error {
                add_log(&data.logs, "WARN", "Chat", err);
            }
            HttpResponse::Ok().json(outcome.response)
        }
        Err(e) => {
            error!(error = %e, "Chat pipeline failed");
            add_log(&data.logs, "ERROR", "Chat", &format!("Pipeline failed: {}", e));
            HttpResponse::InternalServerError().json(json!({
                "answer": null,
                "sql": null,
                "results": null,
                "execution_time": round_seconds(started.elapsed()),
                "error": format!("An unexpected error occurred: {}", e),
            }))
        }
    };

    if let Some(cookie) = new_cookie {
        if let Err(e) = response.add_cookie(&cookie) {
            error!(error = %e, "Failed to set session cookie");
        }
    }
    response
}

#[get("/history")]
async fn get_history(data: web::Data<HttpState>, req: HttpRequest) -> impl Responder {
    let history = data
        .session_keys
        .read(&req)
        .map(|session| data.conversations.history(session))
        .unwrap_or_default();
    HttpResponse::Ok().json(json!({ "count": history.len(), "history": history }))
}

#[delete("/history")]
async fn clear_history(data: web::Data<HttpState>, req: HttpRequest) -> impl Responder {
    let cleared = data
        .session_keys
        .read(&req)
        .map(|session| data.conversations.clear(session))
        .unwrap_or(false);
    HttpResponse::Ok().json(json!({ "cleared": cleared }))
}

#[get("/logs")]
async fn get_logs(data: web::Data<HttpState>) -> impl Responder {
    let logs = data.logs.lock().unwrap_or_else(|p| p.into_inner());
    HttpResponse::Ok().json(&*logs)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

pub fn add_log_entry(
    logs: &Mutex<Vec<LogEntry>>,
    level: &str,
    source: &str,
    message: &str,
) -> LogEntry {
    let entry = LogEntry {
        time: Local::now().format("%H:%M:%S").to_string(),
        level: level.to_string(),
        source: source.to_string(),
        message: message.to_string(),
    };
    let mut logs = logs.lock().unwrap_or_else(|p| p.into_inner());
    logs.push(entry.clone());
    if logs.len() > LOG_CAPACITY {
        logs.remove(0);
    }
    entry
}

pub fn add_log(logs: &Mutex<Vec<LogEntry>>, level: &str, source: &str, message: &str) {
    add_log_entry(logs, level, source, message);
}

/// Routes shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index).service(
        web::scope("/api")
            .service(health)
            .service(tables)
            .service(stats)
            .service(chat)
            .service(get_history)
            .service(clear_history)
            .service(get_logs),
    );
}

pub fn start_server(state: HttpState, host: &str, port: u16) -> std::io::Result<Server> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((host, port))?
    .run();

    Ok(server)
}
