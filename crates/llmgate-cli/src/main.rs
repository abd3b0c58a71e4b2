//! llmgate: multi-provider LLM gateway CLI
//!
//! Usage:
//!   llmgate validate
//!   llmgate generate "Recommend a green tea" --provider claude
//!   llmgate chat
//!   llmgate health
//!   llmgate prompt ecommerce recommendation --locale ja --var userId=u1

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llmgate_chat::{ChatRequest, ChatService, InMemorySessionStore};
use llmgate_core::{AiManager, HealthAggregator, RequestOptions};
use llmgate_prompts::{FsTemplateSource, PromptLoader};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "llmgate", version, about = "Multi-provider LLM request gateway")]
struct Cli {
    /// Config file (default: <config_dir>/llmgate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the configuration and exit
    Validate,

    /// Complete a single prompt
    Generate {
        prompt: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Override the provider's configured model
        #[arg(long)]
        model: Option<String>,
    },

    /// Interactive chat over one session, one message per line
    Chat {
        #[arg(long)]
        provider: Option<String>,
        /// Resume or name the session
        #[arg(long)]
        session: Option<String>,
    },

    /// Probe every enabled endpoint
    Health,

    /// Render a prompt template
    Prompt {
        category: String,
        name: String,
        #[arg(long, default_value = "en")]
        locale: String,
        /// Template variable as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Template root (default: <config_dir>/llmgate/prompts)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A token that fires on Ctrl-C
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            trigger.cancel();
        }
    });
    token
}

async fn build_manager(cli: &Cli) -> Result<(Arc<AiManager>, llmgate_core::GatewayConfig)> {
    let config = config::load(cli.config.as_deref()).await?;
    let manager = AiManager::from_config(&config).context("Failed to build gateway")?;
    Ok((Arc::new(manager), config))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    debug!(command = ?cli.command, config = ?cli.config, "CLI arguments parsed");

    match &cli.command {
        Commands::Validate => {
            let (manager, _) = build_manager(&cli).await?;
            println!("OK: {} provider(s): {}", manager.provider_names().len(), manager.provider_names().join(", "));
        }

        Commands::Generate {
            prompt,
            provider,
            temperature,
            max_tokens,
            locale,
            user,
            model,
        } => {
            let (manager, _) = build_manager(&cli).await?;
            let options = RequestOptions {
                temperature: *temperature,
                max_tokens: *max_tokens,
                locale: locale.clone(),
                user_id: user.clone(),
                model: model.clone(),
                cancel: Some(ctrl_c_token()),
            };
            let response = manager
                .generate_response(prompt, provider.as_deref(), &options)
                .await;
            print_json(&response)?;
            if !response.success {
                std::process::exit(1);
            }
        }

        Commands::Chat { provider, session } => {
            let (manager, _) = build_manager(&cli).await?;
            run_chat(manager, provider.clone(), session.clone()).await?;
        }

        Commands::Health => {
            let (manager, config) = build_manager(&cli).await?;
            let report = HealthAggregator::new(manager, config.health).report().await;
            print_json(&report)?;
            if !report.is_serving() {
                std::process::exit(1);
            }
        }

        Commands::Prompt {
            category,
            name,
            locale,
            vars,
            dir,
        } => {
            let root = dir.clone().unwrap_or_else(config::default_prompts_dir);
            let loader = PromptLoader::new(Arc::new(FsTemplateSource::new(root)));
            let variables: HashMap<String, String> = vars.iter().cloned().collect();
            let response = loader
                .load_prompt_response(category, name, locale, Some(&variables))
                .await;
            print_json(&response)?;
            if !response.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Next input line; `None` on EOF or when `interrupt` fires first
async fn next_line_or<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

async fn run_chat(manager: Arc<AiManager>, provider: Option<String>, session: Option<String>) -> Result<()> {
    let service = ChatService::new(manager, Arc::new(InMemorySessionStore::new()));
    let mut session_id = session;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("Chat started, send an empty line or EOF to quit");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        // once ctrl_c() has been awaited the default SIGINT handler is gone,
        // so the prompt has to listen for it too
        let Some(line) = next_line_or(&mut lines, tokio::signal::ctrl_c()).await? else {
            stdout.write_all(b"\n").await?;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let mut request = ChatRequest::new(line);
        request.session_id = session_id.clone();
        request.provider = provider.clone();

        let token = CancellationToken::new();
        request.options.cancel = Some(token.clone());
        let reply = tokio::select! {
            reply = service.chat(request) => reply,
            _ = tokio::signal::ctrl_c() => {
                token.cancel();
                warn!("Turn interrupted");
                continue;
            }
        };

        match (&reply.data, &reply.error) {
            (Some(data), _) => {
                let origin = if data.cached { "cache" } else { data.provider.as_str() };
                stdout
                    .write_all(format!("{}\n[{} · {}ms]\n", data.content, origin, data.latency_ms).as_bytes())
                    .await?;
            }
            (None, Some(error)) => {
                stdout
                    .write_all(format!("error ({}): {}\n", error.kind, error.message).as_bytes())
                    .await?;
            }
            (None, None) => {}
        }
        if reply.session_id.is_some() {
            session_id = reply.session_id;
        }
    }

    if let Some(id) = session_id {
        info!("Chat session '{}' ended", id);
    }
    Ok(())
}
