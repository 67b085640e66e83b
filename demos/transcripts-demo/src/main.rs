use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transcripts_providers::{claude::ClaudeProvider, codex::CodexProvider, gemini::GeminiProvider, Provider};
use transcripts_service::{ServiceConfig, SessionQuery, SessionService};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}

fn main() {
    init_logging();

    let providers: Vec<Box<dyn Provider>> = vec![
        Box::new(CodexProvider::from_env()),
        Box::new(ClaudeProvider::from_env()),
        Box::new(GeminiProvider::from_env()),
    ];

    let config = ServiceConfig::from_env();
    let refresh_interval = config.refresh_interval;
    let service = SessionService::new(providers, config);

    let page = service.list_sessions(&SessionQuery {
        page_size: 20,
        ..Default::default()
    });

    println!(
        "{} session(s) across providers (refresh interval {:?})",
        page.total, refresh_interval
    );
    for session in &page.items {
        println!(
            "- [{}] {} ({} messages, updated {})",
            session.provider,
            session.session_id,
            session.message_count(),
            session
                .updated_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
        );
    }
    if page.has_next {
        println!("... {} more page(s)", page.total_pages.saturating_sub(page.page));
    }
}
