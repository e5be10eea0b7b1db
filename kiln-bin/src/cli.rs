use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kiln_client::{AgentRuntimeClient, InvocationBody};
use kiln_config::{ConfigLoader, KilnConfig, LoggingConfig};
use kiln_core::{AgentFault, ChunkType, InvocationRequest, KilnError};
use kiln_runtime::{Dispatcher, EntrypointRegistry};
use serde_json::json;
use tracing::{debug, info};

use crate::demo;

/// Kiln: host agents in sandboxes and invoke them over HTTP
#[derive(Parser)]
#[command(name = "kiln", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to kiln.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the built-in echo agent in a sandbox server
    Serve {
        /// Register the streaming echo instead of the single-result one
        #[arg(long)]
        streaming: bool,
        /// Listen address (overrides sandbox.listen)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Invoke an agent through the client gateway
    Invoke {
        /// Prompt sent as the payload's `prompt` field
        #[arg(short, long)]
        prompt: String,
        /// Session id to continue (the sandbox creates one if omitted)
        #[arg(short, long)]
        session: Option<String>,
        /// Agent id (overrides client.agent_id)
        #[arg(long)]
        agent_id: Option<String>,
        /// Sandbox base URL (overrides client.base_url)
        #[arg(long)]
        url: Option<String>,
        /// Seconds to wait for a terminal response
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Environment variables for the sandbox, as KEY=VALUE
        #[arg(short, long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Query a sandbox health probe
    Ping {
        /// Sandbox base URL (overrides client.base_url)
        #[arg(long)]
        url: Option<String>,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse "key=value" CLI arguments.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

impl Cli {
    pub async fn run(self) -> kiln_core::Result<()> {
        // Load config first so we can use it for log format
        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        let log_level = self
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone());
        init_logging(&config.logging, &log_level);
        debug!(path = %loader.path().display(), "configuration resolved");

        match self.command {
            Commands::Serve { streaming, listen } => cmd_serve(config, streaming, listen).await,
            Commands::Invoke {
                prompt,
                session,
                agent_id,
                url,
                timeout,
                env,
            } => {
                let args = InvokeArgs {
                    prompt,
                    session,
                    agent_id,
                    url,
                    timeout,
                    env,
                };
                cmd_invoke(config, args).await
            }
            Commands::Ping { url } => cmd_ping(config, url).await,
            Commands::Config { json } => cmd_config(&config, json),
        }
    }
}

fn init_logging(logging: &LoggingConfig, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match logging.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

async fn cmd_serve(
    mut config: KilnConfig,
    streaming: bool,
    listen: Option<String>,
) -> kiln_core::Result<()> {
    if let Some(listen) = listen {
        config.sandbox.listen = listen;
    }

    let registry = EntrypointRegistry::new(
        config.sandbox.service_name.clone(),
        config.sandbox.features.clone(),
    );
    let entrypoint = if streaming {
        demo::streaming_echo()
    } else {
        demo::echo()
    };
    registry.register_entrypoint(entrypoint)?;
    info!(
        service = %config.sandbox.service_name,
        streaming,
        "echo agent registered"
    );

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry)));
    kiln_server::start_server(config.sandbox, dispatcher).await
}

struct InvokeArgs {
    prompt: String,
    session: Option<String>,
    agent_id: Option<String>,
    url: Option<String>,
    timeout: Option<u64>,
    env: Vec<(String, String)>,
}

async fn cmd_invoke(mut config: KilnConfig, args: InvokeArgs) -> kiln_core::Result<()> {
    if let Some(url) = args.url {
        config.client.base_url = url;
    }
    let agent_id = args
        .agent_id
        .or(config.client.agent_id.clone())
        .unwrap_or_else(|| config.sandbox.service_name.clone());

    let client = AgentRuntimeClient::from_config(&config.client)?;
    let mut request = InvocationRequest::json(agent_id, &json!({ "prompt": args.prompt }))
        .with_timeout(args.timeout.unwrap_or(config.client.timeout_secs));
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    for (key, value) in args.env {
        request = request.with_env(key, value);
    }

    let invocation = client.invoke(request).await?;
    if let Some(ref session) = invocation.session_id {
        eprintln!("session: {session}");
    }

    match invocation.body {
        InvocationBody::Result(response) => {
            let text = response.result_text();
            response.into_result()?;
            println!("{text}");
        }
        InvocationBody::Stream(mut stream) => {
            let mut stdout = std::io::stdout();
            while let Some(frame) = stream.next().await {
                let frame = frame?;
                match frame.kind {
                    ChunkType::Content => {
                        write!(stdout, "{}", frame.chunk)?;
                        stdout.flush()?;
                    }
                    ChunkType::End => break,
                    ChunkType::Error => {
                        writeln!(stdout)?;
                        return Err(KilnError::Invocation {
                            kind: AgentFault::DEFAULT_KIND.into(),
                            message: frame.error.unwrap_or_default(),
                        });
                    }
                }
            }
            writeln!(stdout)?;
        }
    }
    Ok(())
}

async fn cmd_ping(mut config: KilnConfig, url: Option<String>) -> kiln_core::Result<()> {
    if let Some(url) = url {
        config.client.base_url = url;
    }
    let client = AgentRuntimeClient::from_config(&config.client)?;
    let status = client.ping().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn cmd_config(config: &KilnConfig, json: bool) -> kiln_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        println!(
            "{}",
            toml::to_string_pretty(config).map_err(|e| KilnError::Configuration(e.to_string()))?
        );
    }
    Ok(())
}
