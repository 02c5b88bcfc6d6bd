use alloy::primitives::B256;
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use mirror_core::{BlockHeightCache, BlockMirror, TransactionMirror};
use mirror_data::types::{BLOCK_PREFIX, TX_PREFIX};
use mirror_data::{FieldMap, MirrorBackend, MirrorConfig, RedisBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

struct AppContext {
    config: MirrorConfig,
    backend: Arc<dyn MirrorBackend>,
}

#[derive(Parser, Debug)]
#[command(name = "chain-mirror")]
#[command(about = "Inspect the pending transaction and recent block mirror")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Store URL; overrides the config file.
    #[arg(long, global = true, env = "MIRROR_REDIS_URL")]
    url: Option<String>,

    /// JSON mirror configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Block payloads were written with compression enabled.
    #[arg(long, global = true)]
    compressed: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarize what the mirror currently holds.
    Status,
    /// List pending transaction keys.
    Pending(PendingArgs),
    /// Show a mirrored block by height or hash.
    Block(BlockArgs),
    /// Show a mirrored pending transaction.
    Tx(TxArgs),
}

#[derive(Args, Debug)]
struct PendingArgs {
    /// Maximum number of keys to print.
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

#[derive(Args, Debug)]
struct BlockArgs {
    #[arg(long, conflicts_with = "hash", required_unless_present = "hash")]
    number: Option<u64>,

    #[arg(long)]
    hash: Option<String>,

    /// Output format: table (default) or json.
    #[arg(long, default_value = "table")]
    output: String,
}

#[derive(Args, Debug)]
struct TxArgs {
    #[arg(long)]
    hash: String,

    /// Output format: table (default) or json.
    #[arg(long, default_value = "table")]
    output: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
            MirrorConfig::from_json(&raw).wrap_err("invalid mirror config")?
        }
        None => MirrorConfig::default(),
    };
    if let Some(url) = cli.url {
        config.url = url;
    }
    config.compress_enabled |= cli.compressed;

    let backend = RedisBackend::connect(&config)
        .await
        .wrap_err_with(|| format!("failed to connect to {}", config.url))?;
    let ctx = AppContext {
        config,
        backend: Arc::new(backend),
    };

    match cli.command {
        Commands::Status => handle_status(&ctx).await,
        Commands::Pending(args) => handle_pending(&ctx, args).await,
        Commands::Block(args) => handle_block(&ctx, args).await,
        Commands::Tx(args) => handle_tx(&ctx, args).await,
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn parse_hash(raw: &str) -> Result<B256> {
    raw.parse::<B256>()
        .map_err(|err| eyre!("invalid hash {raw}: {err}"))
}

fn block_mirror(ctx: &AppContext) -> Result<BlockMirror> {
    BlockMirror::new(
        Arc::clone(&ctx.backend),
        Arc::new(BlockHeightCache::new()),
        &ctx.config,
    )
    .wrap_err("failed to build block reader")
}

fn field_text(fields: &FieldMap, name: &str) -> String {
    fields
        .get(name)
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .unwrap_or_default()
}

fn field_table(fields: &FieldMap, skip: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Field", "Value"]);
    for (name, value) in fields {
        if skip.contains(&name.as_str()) {
            continue;
        }
        table.add_row(vec![name.clone(), String::from_utf8_lossy(value).into_owned()]);
    }
    table
}

async fn handle_status(ctx: &AppContext) -> Result<()> {
    let pending = ctx
        .backend
        .scan_prefix(TX_PREFIX)
        .await
        .wrap_err("failed to scan transaction records")?;
    let blocks = ctx
        .backend
        .scan_prefix(BLOCK_PREFIX)
        .await
        .wrap_err("failed to scan block records")?;
    let latest = blocks
        .iter()
        .filter_map(|key| key.strip_prefix(BLOCK_PREFIX)?.parse::<u64>().ok())
        .max();

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Store".to_string(), ctx.config.url.clone()]);
    table.add_row(vec!["Pending transactions".to_string(), pending.len().to_string()]);
    table.add_row(vec!["Live blocks".to_string(), blocks.len().to_string()]);
    table.add_row(vec![
        "Latest block".to_string(),
        latest.map_or_else(|| "-".to_string(), |n| n.to_string()),
    ]);
    table.add_row(vec![
        "Compression".to_string(),
        if ctx.config.compress_enabled { "zstd" } else { "off" }.to_string(),
    ]);
    println!("{table}");

    info!(pending = pending.len(), blocks = blocks.len(), "status command completed");
    Ok(())
}

async fn handle_pending(ctx: &AppContext, args: PendingArgs) -> Result<()> {
    let keys = ctx
        .backend
        .scan_prefix(TX_PREFIX)
        .await
        .wrap_err("failed to list pending transactions")?;

    for key in keys.iter().take(args.limit) {
        println!("{key}");
    }
    if keys.len() > args.limit {
        println!("... {} more", keys.len() - args.limit);
    }
    Ok(())
}

async fn handle_block(ctx: &AppContext, args: BlockArgs) -> Result<()> {
    let mirror = block_mirror(ctx)?;

    let fields = match (&args.hash, args.number) {
        (Some(hash), _) => mirror.get_block_fields(&parse_hash(hash)?, &[]).await,
        (None, Some(number)) => mirror.get_block_fields_by_number(number, &[]).await,
        (None, None) => return Err(eyre!("either --number or --hash is required")),
    }
    .wrap_err("failed to read block record")?;

    let Some(fields) = fields else {
        println!("block not mirrored (never written or expired)");
        return Ok(());
    };
    let number: u64 = fields
        .get("blocknumber")
        .and_then(|raw| std::str::from_utf8(raw).ok()?.parse().ok())
        .ok_or_else(|| eyre!("block record has no readable blocknumber"))?;

    let txs = mirror
        .get_tx_summaries_by_number(number)
        .await
        .wrap_err("failed to decode transaction summaries")?
        .unwrap_or_default();
    let logs = mirror
        .get_logs_by_number(number)
        .await
        .wrap_err("failed to decode log summaries")?
        .unwrap_or_default();

    if args.output == "json" {
        let json = serde_json::json!({
            "blockhash": field_text(&fields, "blockhash"),
            "blocknumber": number,
            "blockgasprice": field_text(&fields, "blockgasprice"),
            "txs": txs,
            "logs": logs,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{}", field_table(&fields, &["txs", "logs"]));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Tx Hash", "Type", "Nonce", "Gas Price (gwei)", "To"]);
    for tx in &txs {
        table.add_row(vec![
            tx.hash.clone(),
            tx.tx_type.to_string(),
            tx.nonce.to_string(),
            (tx.gas_price / 1_000_000_000).to_string(),
            tx.to
                .clone()
                .or_else(|| tx.contract_address.as_ref().map(|addr| format!("create {addr}")))
                .unwrap_or_default(),
        ]);
    }
    println!("{table}");
    println!("{} transactions, {} logs", txs.len(), logs.len());
    Ok(())
}

async fn handle_tx(ctx: &AppContext, args: TxArgs) -> Result<()> {
    let hash = parse_hash(&args.hash)?;
    let mirror = TransactionMirror::new(
        Arc::clone(&ctx.backend),
        Arc::new(BlockHeightCache::new()),
        &ctx.config,
    )
    .wrap_err("failed to build transaction reader")?;

    let Some(record) = mirror
        .get_tx(&hash)
        .await
        .wrap_err("failed to read transaction record")?
    else {
        println!("transaction not mirrored (never admitted, mined or expired)");
        return Ok(());
    };

    if args.output == "json" {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let fields: FieldMap = record
        .to_fields()
        .into_iter()
        .chain(record.mined.iter().flat_map(|mined| mined.to_fields()))
        .collect();
    println!("{}", field_table(&fields, &["rawdata"]));
    Ok(())
}
