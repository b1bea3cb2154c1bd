use loan_origination_assistant::{
    agent::{SessionManager, TurnController},
    api::{start_server, ApiState},
    audit::AuditLog,
    config::Settings,
    policy::ThresholdCreditPolicy,
    retrieval::{InMemoryKnowledgeBase, RetrievalConnector},
    router::{GeminiRouter, KeywordRouter, ReasoningRouter},
    state::InMemorySessionStore,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    info!("Loan Origination Assistant - API Server");
    info!("Port: {}", settings.port);

    let router: Arc<dyn ReasoningRouter> = if settings.llm.api_key.is_some() {
        info!(model = %settings.llm.model, "Using Gemini router");
        Arc::new(GeminiRouter::new(&settings.llm)?)
    } else {
        warn!("GEMINI_API_KEY not set, falling back to the keyword router");
        Arc::new(KeywordRouter)
    };

    let knowledge: Arc<dyn RetrievalConnector> = Arc::new(InMemoryKnowledgeBase::with_loan_products());
    let registry = create_default_registry(
        Arc::new(ThresholdCreditPolicy::new(settings.policy.clone())),
        knowledge.clone(),
    )
    .with_retrieval_limits(settings.turn.retrieval_top_k, settings.turn.retrieval_timeout);

    let controller = TurnController::new(
        router,
        registry,
        settings.turn.clone(),
        Arc::new(AuditLog::new()),
    );
    let sessions = Arc::new(SessionManager::new(
        Arc::new(InMemorySessionStore::new()),
        controller,
    ));

    info!("Session manager initialized");

    let state = ApiState::new(sessions, knowledge, settings.rag_top_k);
    start_server(state, &settings.host, settings.port).await?;

    Ok(())
}
