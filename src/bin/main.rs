use loan_origination_assistant::{
    agent::{SessionManager, TurnController},
    audit::AuditLog,
    config::Settings,
    policy::ThresholdCreditPolicy,
    retrieval::InMemoryKnowledgeBase,
    router::KeywordRouter,
    state::InMemorySessionStore,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SCRIPT: &[&str] = &[
    "I need a loan of 100000 for a car.",
    "My name is John Doe.",
    "Yes, please proceed with KYC.",
    "Yes, please proceed with the credit check.",
    "Yes, I accept the offer.",
    "What documents do I need for disbursement?",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    info!("Loan assistant demo starting");

    let registry = create_default_registry(
        Arc::new(ThresholdCreditPolicy::new(settings.policy.clone())),
        Arc::new(InMemoryKnowledgeBase::with_loan_products()),
    )
    .with_retrieval_limits(settings.turn.retrieval_top_k, settings.turn.retrieval_timeout);

    let controller = TurnController::new(
        Arc::new(KeywordRouter),
        registry,
        settings.turn.clone(),
        Arc::new(AuditLog::new()),
    );
    let manager = SessionManager::new(Arc::new(InMemorySessionStore::new()), controller);

    let session = manager.create_session().await?;
    println!("assistant> {}", session.reply);

    for message in SCRIPT {
        println!("\nuser> {}", message);
        match manager.handle_message(&session.session_id, message).await {
            Ok(turn) => println!("assistant> {}", turn.reply),
            Err(e) => eprintln!("turn failed: {}", e),
        }
    }

    let state = manager.snapshot(&session.session_id).await?;
    println!("\n=== LOAN APPLICATION ===");
    println!("{}", serde_json::to_string_pretty(&state.application)?);

    if let Some(letter) = state.application.sanction_letter.as_ref() {
        println!("\n{}", letter.body);
    }

    let turns = manager.turn_history(&session.session_id).await?;
    println!("\n=== AUDIT TRAIL ===");
    for (i, turn) in turns.iter().enumerate() {
        println!(
            "  {}: {} iterations, tools [{}], state {}",
            i + 1,
            turn.iterations,
            turn.tools_invoked.join(", "),
            turn.state_hash.get(..12).unwrap_or_default()
        );
    }

    Ok(())
}
