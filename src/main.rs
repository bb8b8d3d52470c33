use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use maildesk::cli::Repl;
use maildesk::config::{AppConfig, KnowledgeSource};
use maildesk::knowledge::{InMemoryKnowledgeBase, KnowledgeBase, SupabaseKnowledgeBase};
use maildesk::llm::create_provider;
use maildesk::mail::{DisabledMailClient, ImapMailClient, MailClient};
use maildesk::pipeline::{Collaborators, Orchestrator};
use maildesk::server::{AppState, ServiceInfo, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(&config);

    let cli_mode = std::env::args().skip(1).any(|arg| arg == "--cli");

    eprintln!("📬 Maildesk v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);

    // ── Collaborators ───────────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("Failed to create LLM provider")?;

    let knowledge: Arc<dyn KnowledgeBase> = match &config.knowledge {
        KnowledgeSource::Supabase(supabase) => Arc::new(
            SupabaseKnowledgeBase::new(supabase.clone())
                .context("Failed to create Supabase client")?,
        ),
        KnowledgeSource::File(path) => {
            let kb = InMemoryKnowledgeBase::from_file(path)
                .await
                .with_context(|| format!("Failed to load knowledge file {}", path.display()))?;
            eprintln!("   Knowledge: {} documents from {}", kb.len(), path.display());
            Arc::new(kb)
        }
        KnowledgeSource::Empty => {
            eprintln!("   Knowledge: none configured");
            Arc::new(InMemoryKnowledgeBase::empty())
        }
    };

    let mail: Arc<dyn MailClient> = match config.mail.clone() {
        Some(mail_config) => {
            eprintln!("   Mail: {} as {}", mail_config.imap_host, mail_config.username);
            Arc::new(ImapMailClient::new(mail_config))
        }
        None => {
            eprintln!("   Mail: disabled (EMAIL_IMAP_HOST not set)");
            Arc::new(DisabledMailClient)
        }
    };

    let services = ServiceInfo {
        llm: llm.model_name().to_string(),
        knowledge: knowledge.name().to_string(),
        mail: mail.name().to_string(),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Collaborators {
            llm,
            knowledge,
            mail: Arc::clone(&mail),
        },
        config.pipeline.clone(),
    ));

    if cli_mode {
        eprintln!("   Type a request and press Enter. /send [address] sends the last draft, /quit exits.\n");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        Repl::new(orchestrator, mail)
            .run(stdin, tokio::io::stdout())
            .await
            .context("REPL failed")?;
        return Ok(());
    }

    // ── HTTP / WebSocket ────────────────────────────────────────────────
    let app = routes(AppState {
        orchestrator,
        mail,
        services,
        environment: config.environment.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    eprintln!("   Text API: http://{addr}/api/text");
    eprintln!("   Text WS:  ws://{addr}/ws/text");
    tracing::info!(port = config.port, environment = %config.environment, "Server started");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Console logging, plus a daily rolling file when `MAILDESK_LOG_DIR` is set.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "maildesk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}
