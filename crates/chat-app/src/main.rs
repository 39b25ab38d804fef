use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use snafu::ResultExt;
use superpost::app::{
    ChatShell, HostedSetupSnafu, LifecycleSnafu, OpenStorageSnafu, SettingsSnafu, ShellCommand,
    ShellError, TerminalSnafu,
};
use superpost::auth::SessionSlot;
use superpost::hosted::hosted_services;
use superpost::local::local_services;
use superpost::model_selector::ModelSelector;
use superpost::services::ChatServices;
use superpost::settings::{BackendKind, Settings, SettingsStore};
use superpost_llm::{LlmProvider, ModelCache, create_provider};
use superpost_storage::SqliteStorage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "superpost")]
#[command(about = "Terminal chat client for the SuperPost assistant")]
struct Cli {
    /// Settings file to use instead of the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), ShellError> {
    let cli = Cli::parse();
    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let settings = store.settings();
    init_tracing(&settings.log_level);
    tracing::debug!(path = ?store.config_path(), backend = ?settings.backend, "settings loaded");

    let selector = ModelSelector::new(settings.default_model.clone());
    let session = SessionSlot::default();
    let (services, provider) = build_services(&settings, session, &selector).await?;
    services.connect().await.context(LifecycleSnafu {
        stage: "connect-chat-services",
    })?;

    let mut shell = ChatShell::new(services, selector, provider);
    let result = run(&mut shell).await;

    if let Err(error) = shell.shutdown().await {
        tracing::warn!(error = %error, "chat services did not shut down cleanly");
    }
    result
}

fn init_tracing(configured_level: &str) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match configured_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(filter) => filter,
            Err(error) => {
                eprintln!("WARN: log level '{configured_level}' is not a valid filter ({error}); using 'info'");
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_services(
    settings: &Settings,
    session: SessionSlot,
    selector: &ModelSelector,
) -> Result<(ChatServices, Option<Arc<dyn LlmProvider>>), ShellError> {
    match settings.backend {
        BackendKind::Hosted => {
            let endpoints = settings.hosted.endpoints().context(SettingsSnafu {
                stage: "resolve-hosted-endpoints",
            })?;
            let services = hosted_services(&endpoints, session).context(HostedSetupSnafu {
                stage: "build-hosted-services",
            })?;
            Ok((services, None))
        }
        BackendKind::Local => {
            let storage = SqliteStorage::open(&settings.database_location())
                .await
                .context(OpenStorageSnafu {
                    stage: "open-local-store",
                })?;

            let provider = settings.provider.to_provider_config().and_then(|config| {
                match create_provider(config, Arc::new(ModelCache::default())) {
                    Ok(provider) => Some(provider),
                    Err(error) => {
                        tracing::warn!(error = %error, "provider unavailable; replies use the fallback");
                        None
                    }
                }
            });

            let services = local_services(
                Arc::new(storage),
                session,
                provider.clone(),
                selector.handle(),
            );
            Ok((services, provider))
        }
    }
}

async fn run(shell: &mut ChatShell) -> Result<(), ShellError> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let greeting = shell.start().await;
    write_lines(&mut stdout, &greeting.lines).await?;
    write_lines(&mut stdout, &["Type /help for commands.".to_string()]).await?;

    while let Some(line) = lines.next_line().await.context(TerminalSnafu {
        stage: "read-stdin-line",
    })? {
        let Some(command) = ShellCommand::parse(&line) else {
            continue;
        };
        let output = shell.execute(command).await;
        write_lines(&mut stdout, &output.lines).await?;
        if output.quit {
            break;
        }
    }
    Ok(())
}

async fn write_lines(stdout: &mut tokio::io::Stdout, lines: &[String]) -> Result<(), ShellError> {
    for line in lines {
        stdout
            .write_all(format!("{line}\n").as_bytes())
            .await
            .context(TerminalSnafu {
                stage: "write-stdout",
            })?;
    }
    stdout.flush().await.context(TerminalSnafu {
        stage: "flush-stdout",
    })
}
