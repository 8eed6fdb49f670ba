//! Console host for gaia.
//!
//! Runs one session over a text console: each stdin line is a final user
//! transcript and the assistant's reply streams to stdout. Speech providers
//! are not involved, so only the context and language-model path runs.

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use gaia::config::ChannelKind;
use gaia::context::{AssistantContextAggregator, UserContextAggregator};
use gaia::pipeline::frames::{ControlMarker, Speaker, Transcription};
use gaia::pipeline::{Emitter, Frame, Pipeline, Stage};
use gaia::services::{LanguageModel, LlmStage, OpenAiLlm};
use gaia::{
    ChannelEvent, ChannelInfo, ConversationContext, GaiaConfig, ProviderError, RuntimeEvent,
    SessionController, SessionFactory,
};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Gaia: real-time conversational voice agent.
#[derive(Parser)]
#[command(name = "gaia-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel id to use for the console session.
    #[arg(long, default_value = "console")]
    channel: String,

    /// Caller UTC offset in minutes, as a transport would report it.
    #[arg(long, allow_hyphen_values = true)]
    utc_offset: Option<i32>,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    write_default_config: bool,
}

/// Prints assistant text as it streams and passes every frame on.
struct ConsolePrinter;

#[async_trait]
impl Stage for ConsolePrinter {
    fn name(&self) -> &str {
        "console_output"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        match &frame {
            Frame::Control(ControlMarker::StartOfTurn(Speaker::Assistant)) => print!("gaia> "),
            Frame::Text(t) => print!("{}", t.text),
            Frame::Control(ControlMarker::EndOfTurn(Speaker::Assistant)) => println!(),
            Frame::Control(ControlMarker::Cancel) => println!(" [interrupted]"),
            _ => {}
        }
        let _ = std::io::stdout().flush();
        out.push(frame).await
    }
}

struct ConsoleFactory {
    llm: Arc<dyn LanguageModel>,
}

impl SessionFactory for ConsoleFactory {
    fn build(&self, _channel: &ChannelInfo, context: ConversationContext) -> gaia::Result<Pipeline> {
        Ok(Pipeline::new(vec![
            Box::new(UserContextAggregator::new(context.clone())),
            Box::new(LlmStage::new(Arc::clone(&self.llm))),
            Box::new(ConsolePrinter),
            Box::new(AssistantContextAggregator::new(context)),
        ]))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gaia=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(GaiaConfig::default_config_path);

    if cli.write_default_config {
        GaiaConfig::default().save_to_file(&config_path)?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    let config = if config_path.exists() {
        GaiaConfig::from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        GaiaConfig::default()
    };
    if config.transport.kind != ChannelKind::Console {
        warn!("the audio transport is provided by the embedding application, using the console");
    }

    let llm = OpenAiLlm::from_config(&config.llm).context("configuring language model")?;
    let factory = Arc::new(ConsoleFactory { llm: Arc::new(llm) });
    let (runtime_tx, runtime_rx) = broadcast::channel(64);
    let controller = Arc::new(SessionController::new(&config, factory).with_events(runtime_tx));

    let (events_tx, events_rx) = mpsc::channel(8);
    let runner = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run(events_rx).await }
    });

    let mut runtime_events = BroadcastStream::new(runtime_rx);
    let mut channel = ChannelInfo::new(&cli.channel);
    if let Some(offset) = cli.utc_offset {
        channel = channel.with_utc_offset(offset);
    }
    events_tx.send(ChannelEvent::Connected(channel)).await?;

    let started = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = runtime_events.next().await {
            if let Ok(RuntimeEvent::SessionStarted { channel, .. }) = event
                && channel == cli.channel
            {
                return true;
            }
        }
        false
    })
    .await;
    let session = match (started, controller.session(&cli.channel)) {
        (Ok(true), Some(session)) => session,
        _ => anyhow::bail!("session for channel {} did not start", cli.channel),
    };
    info!(session = %session.id(), "console session ready, type to talk, Ctrl-D to hang up");

    let input = session.input();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        input.send(Frame::start_of_turn(Speaker::User)).await?;
        input
            .send(Frame::Transcription(Transcription::final_text(line)))
            .await?;
        input.send(Frame::end_of_turn(Speaker::User)).await?;
    }

    events_tx
        .send(ChannelEvent::Disconnected(cli.channel.clone()))
        .await?;
    drop(events_tx);
    runner.await?;
    Ok(())
}
