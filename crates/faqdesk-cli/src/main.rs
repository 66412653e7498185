use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use faqdesk_api::FaqApi;
use faqdesk_core::ChatSession;
use faqdesk_source::{HttpSheetSource, SheetSource, StaticSheetSource};
use serde_json::Value;
use time::OffsetDateTime;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "fqd")]
#[command(about = "FAQDesk CLI")]
struct Cli {
    #[arg(long, default_value = "./faqdesk.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Faq {
        #[command(subcommand)]
        command: FaqCommand,
    },
    Ask(AskArgs),
    Chat(ChatArgs),
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum FaqCommand {
    List(FaqListArgs),
    Categories,
}

#[derive(Debug, Args)]
struct FaqListArgs {
    #[arg(long)]
    q: Option<String>,
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    text: String,
}

#[derive(Debug, Args)]
struct ChatArgs {
    /// Escalation form shown after the first completed exchange.
    #[arg(long, default_value = "https://forms.google.com/")]
    contact_url: String,
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    Run(SyncRunArgs),
    Logs,
}

#[derive(Debug, Args)]
struct SyncRunArgs {
    /// Remote sheet-fetch endpoint; the built-in sample rows are used when
    /// this is absent.
    #[arg(long)]
    source_url: Option<String>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let api = FaqApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Faq { command } => run_faq(command, &api),
        Command::Ask(args) => run_ask(&args, &api),
        Command::Chat(args) => run_chat(&args, &api),
        Command::Sync { command } => run_sync(command, &api),
    }
}

fn run_db(command: DbCommand, api: &FaqApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let before = api.schema_status()?;
            if args.dry_run {
                return emit_json(serde_json::json!({
                    "dry_run": true,
                    "current_version": before.current_version,
                    "target_version": before.target_version,
                    "would_apply_versions": before.pending_versions
                }));
            }

            let after = api.migrate()?;
            emit_json(serde_json::json!({
                "dry_run": false,
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version,
                "up_to_date": after.pending_versions.is_empty()
            }))
        }
    }
}

fn run_faq(command: FaqCommand, api: &FaqApi) -> Result<()> {
    match command {
        FaqCommand::List(args) => {
            let entries = api.list_faqs(args.q.as_deref(), args.category.as_deref())?;
            emit_json(serde_json::json!({
                "count": entries.len(),
                "faqs": entries
            }))
        }
        FaqCommand::Categories => {
            let categories = api.categories()?;
            emit_json(serde_json::json!({ "categories": categories }))
        }
    }
}

fn run_ask(args: &AskArgs, api: &FaqApi) -> Result<()> {
    let reply = api.answer(&args.text)?;
    emit_json(serde_json::to_value(&reply).context("failed to serialize chat reply")?)
}

fn run_chat(args: &ChatArgs, api: &FaqApi) -> Result<()> {
    let mut session = ChatSession::new(OffsetDateTime::now_utc());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Some(greeting) = session.turns().first() {
        writeln!(out, "{}", greeting.content)?;
    }
    writeln!(out)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let entries = api.active_entries()?;
        let Some(message) = session.submit(input, &entries, OffsetDateTime::now_utc()) else {
            continue;
        };

        writeln!(out, "{}", message.content)?;
        if message.related.len() > 1 {
            writeln!(out)?;
            for scored in &message.related {
                writeln!(out, "  [{}] {} ({})", scored.score, scored.entry.question, scored.entry.category)?;
            }
        }
        if session.show_escalation() {
            writeln!(out, "\nお問い合わせフォーム: {}", args.contact_url)?;
        }
        writeln!(out)?;
    }

    Ok(())
}

fn run_sync(command: SyncCommand, api: &FaqApi) -> Result<()> {
    match command {
        SyncCommand::Run(args) => {
            let source: Box<dyn SheetSource> = match args.source_url {
                Some(url) => Box::new(HttpSheetSource::new(url)),
                None => Box::new(StaticSheetSource),
            };
            let report = api.sync(source.as_ref())?;
            emit_json(serde_json::to_value(&report).context("failed to serialize sync report")?)
        }
        SyncCommand::Logs => {
            let logs = api.sync_logs()?;
            emit_json(serde_json::json!({
                "count": logs.len(),
                "logs": logs
            }))
        }
    }
}
