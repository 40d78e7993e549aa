//! Walk one applicant through onboarding against a running backend.
//!
//! Usage: `cargo run --example onboarding_flow -- [config.toml]`
//! The base URL can also be set with `HIRE_QUERY_BASE_URL`.

use hire_query::telemetry::{DEFAULT_FILTER, init_tracing};
use hire_query::{
    ChatInitState, ClientConfig, EnrichmentStatusResponse, PersonCreate, PersonExtend,
    QueriesBuilder,
};
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(DEFAULT_FILTER)?;

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => ClientConfig::load(&path)?,
        None => {
            let mut config = ClientConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    let queries = QueriesBuilder::new(config)
        .gc_sweep_interval(Duration::from_secs(30))
        .build()?;

    let person = queries
        .create_person(PersonCreate {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: None,
            job_id: 1,
        })
        .await?;
    tracing::info!(person_id = person.id, "applicant created");

    queries
        .extend_person(
            person.id,
            PersonExtend {
                job_id: person.job_id,
                resume_text: "Analytical engines, 1842-1843.".into(),
                github: Some("ada".into()),
                ..PersonExtend::default()
            },
        )
        .await?;
    queries.trigger_enrichment(person.id).await?;

    let status_key = hire_query::queries::keys::enrichment_status(person.id);
    let cache = queries.cache().clone();
    let _enrichment = queries.watch_enrichment(person.id, move |event| {
        if let Some(entry) = cache.peek::<EnrichmentStatusResponse>(event.key()) {
            if let Some(status) = entry.value {
                tracing::info!(status = ?status.enrichment_status, "enrichment");
            }
        }
    });
    tracing::info!(key = %status_key, "watching enrichment");

    let session = queries.open_interview(person.id, |_| {});
    let mut state = session.initializer.watch();
    let outcome = state
        .wait_for(|s| matches!(s, ChatInitState::Initialized | ChatInitState::InitializationFailed(_)))
        .await?
        .clone();
    if let Some(message) = outcome.failure_message() {
        tracing::error!(message, "interview unavailable");
        return Ok(());
    }

    let reply = queries
        .send_message(person.id, "I enjoy turning theory into working machines.")
        .await?;
    tracing::info!(progress = reply.progress, reply = %reply.agent_reply, "agent replied");

    tokio::time::sleep(Duration::from_secs(5)).await;
    queries.cache().flush_events().await?;
    Ok(())
}
