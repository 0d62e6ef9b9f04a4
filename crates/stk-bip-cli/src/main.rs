//! stk-bip: inspect and replay SIM Toolkit BIP proactive commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use stk_bip::{
    ApnRecord, ApnType, BipConfig, BipService, CardMessage, CardReceiver, CommandParamsFactory, DataConnectivity,
    DataState, EnableResult, FactoryOutcome, NoIcons,
};
use stk_bip_models::tlv::{decode_list, unwrap_envelope, PROACTIVE_COMMAND_TAG};
use stk_bip_models::{ComprehensionTlv, TlvTag};
use strum::IntoEnumIterator;
use tracing::{debug, info};

/// SIM Toolkit BIP command tool.
#[derive(Parser, Debug)]
#[command(name = "stk-bip", about = "Decode and replay SIM Toolkit BIP proactive commands")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the objects of a proactive command and its decoded parameters.
    Decode {
        /// Command bytes in hex (D0 envelope or bare TLVs).
        hex: String,
    },
    /// Feed a script of proactive commands to a live BIP service.
    ///
    /// One entry per line: a hex command, `session-end`, `card-removed`
    /// or `wait <ms>`. Lines starting with `#` are ignored.
    Replay {
        /// Script file.
        file: PathBuf,

        /// How long to collect card messages after each entry.
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Decode { hex } => decode(&hex),
        Commands::Replay { file, settle_ms } => replay(&file, Duration::from_millis(settle_ms)).await,
    }
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

fn tag_name(tag: u16) -> String {
    TlvTag::iter()
        .find(|known| known.code() == tag)
        .map_or_else(|| format!("{tag:#04X}"), |known| known.to_string())
}

fn print_tree(tlvs: &[ComprehensionTlv], depth: usize) {
    for tlv in tlvs {
        let flag = if tlv.comprehension_required() { "CR" } else { "  " };
        println!(
            "{:indent$}{} {} len={} {}",
            "",
            tag_name(tlv.tag()),
            flag,
            tlv.length(),
            hex::encode_upper(tlv.value()),
            indent = depth * 2
        );
        print_tree(tlv.children(), depth + 1);
    }
}

fn decode(input: &str) -> anyhow::Result<()> {
    let raw = hex::decode(input.trim()).context("command is not valid hex")?;
    let body = unwrap_envelope(&raw, PROACTIVE_COMMAND_TAG).context("malformed envelope")?;
    let tlvs = decode_list(body).context("malformed objects")?;
    print_tree(&tlvs, 0);

    let mut factory = CommandParamsFactory::new();
    let command = match factory.make(&raw) {
        FactoryOutcome::Ready(command) => command,
        FactoryOutcome::LoadIcons(records) => {
            println!("icon records to load: {records:?}");
            factory
                .on_icons_loaded(Ok(Vec::new()))
                .context("command lost while loading icons")?
        }
        FactoryOutcome::Failed { details, error } => {
            println!("rejected: {error}");
            if let Some(details) = details {
                println!("{}", serde_json::to_string_pretty(&details)?);
            }
            return Ok(());
        }
    };
    println!("{}", serde_json::to_string_pretty(&command)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// replay
// ---------------------------------------------------------------------------

/// A data connection that is always up.
struct AlwaysConnected;

impl DataConnectivity for AlwaysConnected {
    fn enable_apn_type(&self, _apn_type: &ApnType) -> EnableResult {
        EnableResult::AlreadyActive
    }
    fn disable_apn_type(&self, apn_type: &ApnType) {
        debug!(%apn_type, "disable requested");
    }
    fn apn_state(&self, _apn_type: &ApnType) -> DataState {
        DataState::Connected
    }
    fn is_data_allowed(&self) -> bool {
        true
    }
    fn is_voice_call_active(&self) -> bool {
        false
    }
    fn apn_records(&self) -> Vec<ApnRecord> {
        Vec::new()
    }
    fn insert_apn(&self, record: ApnRecord) {
        info!(apn = %record.name, "access point inserted");
    }
}

async fn drain(card: &mut CardReceiver, settle: Duration) {
    while let Ok(Some(message)) = tokio::time::timeout(settle, card.recv()).await {
        match message {
            CardMessage::TerminalResponse(bytes) => println!("<- TR  {}", hex::encode_upper(bytes)),
            CardMessage::EventDownload(bytes) => println!("<- ENV {}", hex::encode_upper(bytes)),
        }
    }
}

async fn replay(file: &Path, settle: Duration) -> anyhow::Result<()> {
    let script = std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    let (service, handle, mut card) = BipService::new(BipConfig::from_env(), Arc::new(AlwaysConnected), Arc::new(NoIcons));
    let service = tokio::spawn(service.run());

    for (line_no, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["session-end"] => handle.session_end()?,
            ["card-removed"] => handle.card_removed()?,
            ["wait", ms] => {
                let ms: u64 = ms.parse().with_context(|| format!("line {}: bad wait", line_no + 1))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            [command] => {
                let raw = hex::decode(command).with_context(|| format!("line {}: not hex", line_no + 1))?;
                println!("-> {}", hex::encode_upper(&raw));
                handle.proactive_command(raw)?;
            }
            _ => bail!("line {}: unrecognised entry {line:?}", line_no + 1),
        }
        drain(&mut card, settle).await;
    }

    drop(handle);
    service.await.context("service task failed")?;
    Ok(())
}
