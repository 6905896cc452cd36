use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::application::use_cases::embedding_service::{EmbeddingService, TextEmbedder};
use crate::application::use_cases::query_executor::QueryExecutor;
use crate::application::use_cases::schema_index::{IndexOutcome, SchemaRag};
use crate::application::use_cases::schema_introspector::SchemaIntrospector;
use crate::application::use_cases::sql_generator::SqlGenerator;
use crate::application::{ChatPipeline, ConversationService, PipelineOptions};
use crate::domain::error::AppError;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db;
use crate::infrastructure::llm_clients::{LLMClient, RouterClient};
use crate::interfaces::http::session::SessionKeys;
use crate::interfaces::http::{add_log, start_server, HttpState, LogEntry};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn to_io(err: AppError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

pub fn run() -> std::io::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {}", e);
        }
    }

    let config = AppConfig::load().map_err(to_io)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    actix_web::rt::System::new().block_on(serve(config))
}

async fn serve(config: AppConfig) -> std::io::Result<()> {
    let logs: Arc<Mutex<Vec<LogEntry>>> = Arc::new(Mutex::new(Vec::new()));
    info!("NorthwindAI starting up");

    let database = db::connect(&config.database).await.map_err(|e| {
        error!(error = %e, "Database connection failed");
        to_io(e)
    })?;

    let tables = SchemaIntrospector::new(database.clone()).introspect().await;

    let embedder: Arc<dyn TextEmbedder> = Arc::new(EmbeddingService::new(config.embedding.clone()));
    let rag = Arc::new(SchemaRag::new(embedder, config.rag.top_k));
    match rag.index_schema(&tables).await {
        Ok(IndexOutcome::Indexed(count)) => add_log(
            &logs,
            "INFO",
            "Startup",
            &format!("Indexed {} tables for schema retrieval", count),
        ),
        Ok(outcome) => {
            warn!(?outcome, "Schema index is empty");
            add_log(&logs, "WARN", "Startup", "No tables indexed");
        }
        Err(e) => {
            error!(error = %e, "Schema indexing failed");
            add_log(
                &logs,
                "ERROR",
                "Startup",
                &format!("Schema indexing failed: {}", e),
            );
        }
    }

    let llm_client: Arc<dyn LLMClient> = Arc::new(RouterClient::new());
    info!(
        provider = ?config.llm.provider,
        model = %config.llm.model,
        "LLM client ready"
    );

    let pipeline = ChatPipeline::new(
        rag,
        SqlGenerator::new(llm_client, config.llm.clone(), config.rag.answer_row_limit),
        QueryExecutor::new(database, config.database.row_limit),
        PipelineOptions {
            max_sql_retries: config.rag.max_sql_retries,
            follow_ups: config.rag.follow_ups,
        },
    );

    let conversations = Arc::new(ConversationService::new(
        config.rag.history_limit,
        config.server.session_ttl_minutes,
    ));
    let sweeper = conversations.clone();
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweeper.purge_expired();
        }
    });

    let state = HttpState {
        pipeline: Arc::new(pipeline),
        conversations,
        tables: Arc::new(tables),
        session_keys: SessionKeys::from_secret(&config.server.session_secret),
        logs,
    };

    info!(
        host = %config.server.host,
        port = config.server.port,
        "HTTP server listening"
    );
    start_server(state, &config.server.host, config.server.port)?.await
}
