//! Markov Chat Bot - Entry Point
//!
//! Modes:
//! - Default: connect to chat and run, with the operator console on stdin
//! - --offline / -o: no chat connection, console only

use std::sync::Arc;
use std::time::Instant;

use markov_chatbot::{
    AdmissionJob, ChannelLifecycleManager, ChatBot, Config, ConversationScheduler, FilterPolicy,
    InboundMessage, JsonFileStore, LearnerJob, LibreTranslateClient, MarkovModel, PersistenceGateway,
    RecordingTransport, TranslationPolicy, Translator, Transport,
};
use markov_chatbot::console::Console;
use markov_chatbot::transport::IrcTransport;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let offline = args.iter().any(|a| a == "--offline" || a == "-o");
    let json_logs = args.iter().any(|a| a == "--json");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Markov Chat Bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: markov-chatbot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --offline, -o   Console only, no chat connection");
        println!("  --json          Log JSON to stderr");
        println!("  --help, -h      Show this help");
        println!();
        println!("Environment variables:");
        println!("  BOT_NICK               Bot login name (required)");
        println!("  BOT_OAUTH_TOKEN        Chat token");
        println!("  BOT_DATA_DIR           Data directory (default: ./data)");
        println!("  BOT_MODEL_FILE         Model file (default: <data>/markov_dict.json)");
        println!("  BOT_COMMAND_PREFIX     Chat command prefix (default: !)");
        println!("  TRANSLATE_URL          LibreTranslate endpoint");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Markov Chat Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let store: Arc<dyn PersistenceGateway> =
        Arc::new(JsonFileStore::new(&config.data_dir, &config.model_path));

    // Durable state
    let filters = store.load_filters().await?;
    let settings = Arc::new(RwLock::new(store.load_settings().await?));
    let channels = store.load_channels().await?;
    let model = match store.load_model().await {
        Ok(Some(snapshot)) => MarkovModel::from_snapshot(config.markov(), snapshot),
        Ok(None) => {
            warn!("No saved model, starting empty");
            MarkovModel::new(config.markov())
        }
        Err(e) => {
            error!("Failed to load model, starting empty: {}", e);
            MarkovModel::new(config.markov())
        }
    };

    let translation = match config.translate_url {
        Some(ref url) => {
            info!("Translation via {}", url);
            let client: Arc<dyn Translator> =
                Arc::new(LibreTranslateClient::new(url, config.translate_api_key.clone()));
            Some(TranslationPolicy::new(client, &config.command_prefix)?)
        }
        None => None,
    };

    // Chat connection
    // Offline keeps the sender alive so the inbound loop just idles
    let (offline_tx, offline_rx) = mpsc::channel::<InboundMessage>(1);
    let (transport, mut inbound) = match (offline, config.irc()) {
        (false, Some(irc)) => {
            let (transport, rx) = IrcTransport::connect(&irc).await?;
            let transport: Arc<dyn Transport> = Arc::new(transport);
            (transport, rx)
        }
        _ => {
            warn!("Running offline: nothing will be sent");
            let transport: Arc<dyn Transport> = Arc::new(RecordingTransport::new());
            (transport, offline_rx)
        }
    };

    let membership = Arc::new(Mutex::new(ChannelLifecycleManager::from_persisted(
        config.admission(),
        channels,
        Instant::now(),
    )));
    let initial: Vec<String> = membership.lock().active().to_vec();
    if let Err(e) = transport.join_channels(&initial).await {
        error!("Initial join failed: {}", e);
    }

    let scheduler = Arc::new(ConversationScheduler::new(
        config.scheduler(),
        model,
        FilterPolicy::new(filters),
        Arc::clone(&settings),
        translation,
    )?);

    let bot = Arc::new(ChatBot::new(
        config.bot_options(),
        Arc::clone(&scheduler),
        Arc::clone(&membership),
        settings,
        Arc::clone(&store),
        Arc::clone(&transport),
    ));

    // Background jobs
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = config.background();

    let learner = LearnerJob::new(
        Arc::clone(&scheduler),
        Arc::clone(&store),
        background.clone(),
        Instant::now(),
    );
    let learner_handle = tokio::spawn(learner.run(shutdown_rx.clone()));

    let admission = AdmissionJob::new(
        Arc::clone(&membership),
        Arc::clone(&scheduler),
        Arc::clone(&transport),
        Arc::clone(&store),
        background.tick,
    );
    tokio::spawn(admission.run(shutdown_rx.clone()));

    let console = Console::new(
        Arc::clone(&bot),
        Arc::clone(&store),
        config.markov(),
        shutdown_tx.clone(),
    );
    tokio::spawn(console.run());

    // Inbound events, one at a time
    let mut shutdown = shutdown_rx;
    loop {
        tokio::select! {
            msg = inbound.recv() => match msg {
                Some(msg) => {
                    bot.handle(msg).await;
                }
                None => {
                    warn!("Chat connection ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = shutdown.changed() => break,
        }
    }

    drop(offline_tx);
    let _ = shutdown_tx.send(true);
    if let Err(e) = learner_handle.await {
        error!("Learner task failed: {}", e);
    }
    info!("Done");
    Ok(())
}
