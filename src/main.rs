use std::sync::Arc;

use sms_assist::auth::AuthGate;
use sms_assist::config::Settings;
use sms_assist::http::{AppState, api_routes};
use sms_assist::llm::{DEFAULT_MAX_RETRIES, LlmBackend, LlmConfig, create_responder};
use sms_assist::processor::MessageProcessor;
use sms_assist::store::{self, Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // Validated by Settings::from_env, so the parse cannot miss here.
    let backend = LlmBackend::parse(&settings.ai_provider).unwrap_or(LlmBackend::Anthropic);

    eprintln!("📱 SMS Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {} ({})", backend.label(), settings.ai_model);
    eprintln!("   API: http://0.0.0.0:{}/api", settings.port);
    eprintln!(
        "   Auth: {}",
        if settings.allowed_numbers.is_empty() {
            "open (all numbers)".to_string()
        } else {
            format!("allowlist ({} numbers)", settings.allowed_numbers.len())
        }
    );

    // ── Database ─────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&settings.database_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await.unwrap_or_else(
        |e| {
            eprintln!(
                "Error: Failed to open database at {}: {}",
                settings.database_path, e
            );
            std::process::exit(1);
        },
    ));
    eprintln!("   Database: {}\n", settings.database_path);

    // ── AI responder ─────────────────────────────────────────────────
    let responder = create_responder(&LlmConfig {
        backend,
        api_key: settings.api_key.clone(),
        model: settings.ai_model.clone(),
        max_retries: DEFAULT_MAX_RETRIES,
    })?;

    // ── Processor and routes ─────────────────────────────────────────
    let processor = Arc::new(MessageProcessor::new(
        AuthGate::new(&settings.allowed_numbers),
        Arc::clone(&db),
        responder,
        settings.system_prompt.clone(),
        settings.max_context_messages,
    ));

    let app = api_routes(AppState {
        processor,
        db: Arc::clone(&db),
        api_key: settings.sms_api_key.clone(),
        poll_batch_size: settings.poll_batch_size,
    });

    let _cleanup = store::spawn_outbox_cleanup(Arc::clone(&db), settings.outbox_retention_days);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    tracing::info!(port = settings.port, "SMS Assist listening");
    axum::serve(listener, app).await?;

    Ok(())
}
