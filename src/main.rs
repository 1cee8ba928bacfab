use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keepsake_voice::VoiceConfig;

/// Keepsake voice - real-time voice conversations with a remote assistant
#[derive(Parser, Debug)]
#[command(name = "keepsake-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Talk to the assistant through the default microphone and speakers
    Run {
        /// Persona to use
        #[arg(short = 'p', long = "persona", default_value = "companion")]
        persona: String,
    },

    /// Print the resolved configuration with secrets redacted
    CheckConfig,

    /// List available personas
    Personas,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keepsake_voice=info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = match &cli.config {
        Some(config_path) => {
            tracing::info!(path = %config_path.display(), "loading configuration");
            VoiceConfig::from_file(config_path)?
        }
        None => VoiceConfig::from_env()?,
    };

    match cli.command {
        Commands::CheckConfig => {
            println!("{config}");
            Ok(())
        }
        Commands::Personas => {
            for name in config.persona_names() {
                if let Some(persona) = config.persona(&name) {
                    let tools = if persona.tools_enabled { " (tools)" } else { "" };
                    println!("{name}{tools}");
                }
            }
            Ok(())
        }
        Commands::Run { persona } => run(config, &persona).await,
    }
}

#[cfg(feature = "audio-device")]
async fn run(config: VoiceConfig, persona_name: &str) -> anyhow::Result<()> {
    use std::sync::Arc;

    use keepsake_voice::core::session::{
        MessageCommittedCallback, SessionCallbacks, SessionErrorCallback, SessionState,
        ToolEvent, ToolEventCallback, TranscriptDeltaCallback, TranscriptUpdate,
    };
    use keepsake_voice::{
        CpalAudioHost, MemoryNotebook, MessagePair, RealtimeError, SessionLifecycleManager,
        SessionSettings, ToolCallDispatcher,
    };
    use tokio::io::{AsyncBufReadExt, BufReader};

    let persona = config
        .persona(persona_name)
        .ok_or_else(|| anyhow!("Unknown persona '{persona_name}'"))?;

    let notebook = MemoryNotebook::new();
    let tools =
        ToolCallDispatcher::new(config.tool_timeout()).with_handler(Arc::new(notebook.clone()));

    let on_transcript_delta: TranscriptDeltaCallback = Arc::new(|update: TranscriptUpdate| {
        Box::pin(async move {
            tracing::debug!(role = %update.role, text = %update.text, "transcript");
        })
    });
    let on_message_committed: MessageCommittedCallback = Arc::new(|pair: MessagePair| {
        Box::pin(async move {
            println!("you: {}", pair.user);
            println!("assistant: {}", pair.ai);
        })
    });
    let on_tool_event: ToolEventCallback = Arc::new(|event: ToolEvent| {
        Box::pin(async move {
            tracing::info!(tool = %event.request.name, call_id = %event.request.id, "tool call answered");
        })
    });
    let on_error: SessionErrorCallback = Arc::new(|error: RealtimeError| {
        Box::pin(async move {
            eprintln!("session error: {error}");
        })
    });
    let callbacks = SessionCallbacks {
        on_transcript_delta: Some(on_transcript_delta),
        on_message_committed: Some(on_message_committed),
        on_tool_event: Some(on_tool_event),
        on_error: Some(on_error),
        ..Default::default()
    };

    let manager = SessionLifecycleManager::new(
        Arc::new(CpalAudioHost::new()),
        Arc::new(config.transport()),
        tools,
        SessionSettings::from(&config),
    )
    .with_callbacks(callbacks);

    manager.start(persona).await?;
    println!("Session live. Type to send text, Ctrl-C to stop.");

    let mut state = manager.subscribe_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.wait_for(|s| *s == SessionState::Idle) => {
                if changed.is_ok() {
                    println!("Session ended by the voice service.");
                }
                break;
            }
            line = lines.next_line() => match line? {
                Some(text) if !text.trim().is_empty() => {
                    if let Err(e) = manager.send_text(text.trim()) {
                        eprintln!("could not send text: {e}");
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    manager.stop().await;

    if let Some(stats) = manager.stats() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    for entry in notebook.entries() {
        println!("remembered: {}", entry.fact);
    }
    Ok(())
}

#[cfg(not(feature = "audio-device"))]
async fn run(_config: VoiceConfig, _persona_name: &str) -> anyhow::Result<()> {
    anyhow::bail!("keepsake-voice was built without the `audio-device` feature")
}
