use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing::{info, warn};

use anyhow::anyhow;

use realtime_gateway::core::realtime::{
    RelayPublisher, RepeaterSettings, Session, SessionConfig, TranscriberSettings,
    TranslatorSettings, create_transcriber, create_transcriber_repeater, create_translator,
};
use realtime_gateway::{RelayMode, ServerConfig, routes, state::AppState};

/// Realtime Gateway - relay for realtime model sessions
#[derive(Parser, Debug)]
#[command(name = "realtime-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the simple relay (/model -> /client)
    Serve {
        /// Port to listen on (default 30033)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },

    /// Run the debug relay (/provider <-> /consumer)
    Debug {
        /// Port to listen on (default 30020)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },

    /// Open a session and publish its events to a relay until interrupted
    Publish {
        /// Session preset
        #[arg(long, value_enum, default_value_t = Preset::Transcriber)]
        preset: Preset,

        /// Relay provider endpoint (overrides REALTIME_RELAY_URL)
        #[arg(long)]
        relay: Option<String>,

        /// Target language for the translator preset
        #[arg(long, default_value = "Spanish")]
        language: String,

        /// Instructions for the plain preset
        #[arg(long)]
        instructions: Option<String>,

        /// Ignore user.audio.stream chunks injected through the relay
        #[arg(long)]
        no_voice_in: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Preset {
    /// Default configuration, optional instructions
    Plain,
    Transcriber,
    Repeater,
    Translator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let mut config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    // Subcommands select the relay mode; an explicit port overrides the config
    let (mode, port) = match cli.command {
        Some(Commands::Serve { port }) => (RelayMode::Simple, port),
        Some(Commands::Debug { port }) => (RelayMode::Debug, port),
        Some(Commands::Publish {
            preset,
            relay,
            language,
            instructions,
            no_voice_in,
        }) => {
            if let Some(relay) = relay {
                config.relay_publish_url = Some(relay);
            }
            let target = PublishTarget {
                preset,
                language,
                instructions,
                voice_in: !no_voice_in,
            };
            return publish(&config, target).await;
        }
        None => (config.mode, None),
    };
    if mode != config.mode {
        config.port = if config.port == config.mode.default_port() {
            mode.default_port()
        } else {
            config.port
        };
        config.mode = mode;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let address = config.address();
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!(
        mode = %mode,
        upstream = mode.upstream_path(),
        downstream = mode.downstream_path(),
        "Starting relay"
    );

    let app_state = AppState::new(mode);

    println!("Relay listening on ws://{}", socket_addr);
    let listener = TcpListener::bind(&socket_addr).await?;
    routes::relay::serve_relay(listener, app_state).await?;

    Ok(())
}

struct PublishTarget {
    preset: Preset,
    language: String,
    instructions: Option<String>,
    voice_in: bool,
}

/// Open a session from the configured defaults and publish it to the relay
/// until ctrl-c or the session ends.
async fn publish(config: &ServerConfig, target: PublishTarget) -> anyhow::Result<()> {
    let options = config.session_options();
    let session = match target.preset {
        Preset::Plain => {
            let session_config = match target.instructions {
                Some(instructions) => SessionConfig {
                    instructions: Some(instructions),
                    ..Default::default()
                },
                None => SessionConfig::default(),
            };
            Session::open(session_config, options).await?
        }
        Preset::Transcriber => create_transcriber(TranscriberSettings::default(), options).await?,
        Preset::Repeater => {
            let settings = RepeaterSettings {
                model: options.model,
                ..Default::default()
            };
            create_transcriber_repeater(settings, options).await?
        }
        Preset::Translator => {
            let settings = TranslatorSettings {
                target_language: target.language,
                model: options.model,
                ..Default::default()
            };
            create_translator(settings, options).await?
        }
    };

    let mut publisher_config = config.publisher_config();
    publisher_config.accept_audio_stream = target.voice_in;
    let publisher = RelayPublisher::attach(&session, publisher_config).await?;
    println!("Session {} publishing to {}", session.id(), publisher.url());

    let mut status = session.status_changes();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, closing session"),
        _ = status.wait_for(|s| s.is_terminal()) => warn!("Session ended"),
    }

    publisher.detach();
    session.close();
    println!("{}", serde_json::to_string_pretty(&session.usage())?);
    Ok(())
}
