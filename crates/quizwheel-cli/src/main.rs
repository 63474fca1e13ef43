use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use quizwheel_core::WheelCoordinator;
use quizwheel_questions::{next_index, QuestionsClient};
use quizwheel_store_sqlite::SqliteStore;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_SETTLE_MS: u64 = 5000;

#[derive(Debug, Parser)]
#[command(name = "qw")]
#[command(about = "Quiz Wheel CLI")]
struct Cli {
    #[arg(long, default_value = "./quizwheel.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Wheel {
        #[command(subcommand)]
        command: Box<WheelCommand>,
    },
    Spin(SpinArgs),
    History {
        #[command(subcommand)]
        command: Box<HistoryCommand>,
    },
    Questions {
        #[command(subcommand)]
        command: Box<QuestionsCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum WheelCommand {
    List,
    Add(WheelAddArgs),
    Remove(WheelRemoveArgs),
    Edit(WheelEditArgs),
    Clear,
    Repopulate,
}

#[derive(Debug, Args)]
struct WheelAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    answer: Option<String>,
}

#[derive(Debug, Args)]
struct WheelRemoveArgs {
    #[arg(long)]
    position: usize,
}

#[derive(Debug, Args)]
struct WheelEditArgs {
    #[arg(long)]
    position: usize,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    answer: Option<String>,
}

#[derive(Debug, Args)]
struct SpinArgs {
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS)]
    settle_ms: u64,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    Show,
    Clear,
}

#[derive(Debug, Subcommand)]
enum QuestionsCommand {
    List,
    Add(QuestionsAddArgs),
    Edit(QuestionsEditArgs),
    Delete(QuestionsDeleteArgs),
    AddToWheel(QuestionsAddToWheelArgs),
}

#[derive(Debug, Args)]
struct QuestionsAddArgs {
    #[arg(long)]
    index: Option<u32>,
    #[arg(long)]
    question: String,
    #[arg(long)]
    answers: Option<String>,
}

#[derive(Debug, Args)]
struct QuestionsEditArgs {
    #[arg(long)]
    index: u32,
    #[arg(long)]
    question: Option<String>,
    #[arg(long)]
    answers: Option<String>,
}

#[derive(Debug, Args)]
struct QuestionsDeleteArgs {
    #[arg(long)]
    index: u32,
}

#[derive(Debug, Args)]
struct QuestionsAddToWheelArgs {
    #[arg(long)]
    index: u32,
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
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Wheel { command } => {
            let mut coordinator = open_coordinator(&cli.db)?;
            run_wheel(*command, &mut coordinator)
        }
        Command::Spin(args) => {
            let mut coordinator = open_coordinator(&cli.db)?;
            run_spin(&args, &mut coordinator)
        }
        Command::History { command } => {
            let mut coordinator = open_coordinator(&cli.db)?;
            run_history(*command, &mut coordinator)
        }
        Command::Questions { command } => run_questions(*command, &cli.db),
    }
}

/// The wheel ships without built-in items: the population is whatever the
/// snapshot database holds plus explicit adds.
fn open_coordinator(db: &Path) -> Result<WheelCoordinator<SqliteStore>> {
    let mut store = SqliteStore::open(db)?;
    store.migrate()?;
    let coordinator = WheelCoordinator::load(store, Vec::new())
        .context("failed to load wheel state from snapshot store")?;
    Ok(coordinator)
}

fn run_wheel(command: WheelCommand, coordinator: &mut WheelCoordinator<SqliteStore>) -> Result<()> {
    match command {
        WheelCommand::List => emit_json(serde_json::json!({
            "items": coordinator.active_items(),
            "retired": coordinator.retired_names(),
            "count": coordinator.active_items().len()
        })),
        WheelCommand::Add(args) => {
            let added = coordinator.add_item(&args.name, &args.prompt, args.answer.as_deref())?;
            let status = if added.is_some() { "added" } else { "ignored" };
            emit_json(serde_json::json!({
                "status": status,
                "item": added,
                "count": coordinator.active_items().len()
            }))
        }
        WheelCommand::Remove(args) => {
            let removed = coordinator.remove_item(args.position)?;
            let status = if removed.is_some() { "removed" } else { "out_of_range" };
            emit_json(serde_json::json!({
                "status": status,
                "item": removed,
                "retired": coordinator.retired_names(),
                "count": coordinator.active_items().len()
            }))
        }
        WheelCommand::Edit(args) => {
            let updated =
                coordinator.edit_item(args.position, &args.prompt, args.answer.as_deref())?;
            let status = if updated.is_some() { "edited" } else { "out_of_range" };
            emit_json(serde_json::json!({
                "status": status,
                "item": updated
            }))
        }
        WheelCommand::Clear => {
            coordinator.clear_all()?;
            emit_json(serde_json::json!({
                "status": "cleared",
                "count": coordinator.active_items().len()
            }))
        }
        WheelCommand::Repopulate => {
            let restored = coordinator.repopulate()?;
            emit_json(serde_json::json!({
                "status": "repopulated",
                "restored": restored,
                "count": coordinator.active_items().len()
            }))
        }
    }
}

fn run_spin(args: &SpinArgs, coordinator: &mut WheelCoordinator<SqliteStore>) -> Result<()> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let Some(settles_at) = coordinator.start_spin(&mut rng, 0) else {
        return emit_json(serde_json::json!({
            "status": "empty",
            "winner": Value::Null
        }));
    };

    // The rendering surface animates the wheel for the settlement window;
    // here the delay is a plain sleep before the reveal.
    thread::sleep(Duration::from_millis(args.settle_ms));

    let winner = coordinator
        .settle(settles_at)?
        .ok_or_else(|| anyhow!("spin did not settle at its scheduled tick"))?;
    emit_json(serde_json::json!({
        "status": "settled",
        "winner": winner,
        "remaining": coordinator.active_items().len(),
        "history": coordinator.history()
    }))
}

fn run_history(
    command: HistoryCommand,
    coordinator: &mut WheelCoordinator<SqliteStore>,
) -> Result<()> {
    match command {
        HistoryCommand::Show => emit_json(serde_json::json!({
            "entries": coordinator.history(),
            "count": coordinator.history().len()
        })),
        HistoryCommand::Clear => {
            coordinator.clear_history()?;
            emit_json(serde_json::json!({ "status": "cleared" }))
        }
    }
}

fn run_questions(command: QuestionsCommand, db: &Path) -> Result<()> {
    let client = QuestionsClient::from_env()?;
    match command {
        QuestionsCommand::List => {
            let records = client.list()?;
            emit_json(serde_json::json!({
                "questions": records,
                "count": records.len()
            }))
        }
        QuestionsCommand::Add(args) => {
            let index = match args.index {
                Some(index) => index,
                None => next_index(&client.list()?),
            };
            let record = client.create(index, &args.question, args.answers.as_deref())?;
            emit_json(serde_json::json!({
                "status": "created",
                "question": record
            }))
        }
        QuestionsCommand::Edit(args) => {
            client.update(args.index, args.question.as_deref(), args.answers.as_deref())?;
            emit_json(serde_json::json!({
                "status": "updated",
                "index": args.index
            }))
        }
        QuestionsCommand::Delete(args) => {
            client.delete(args.index)?;
            emit_json(serde_json::json!({
                "status": "deleted",
                "index": args.index
            }))
        }
        QuestionsCommand::AddToWheel(args) => {
            let records = client.list()?;
            let record = records
                .into_iter()
                .find(|record| record.index == args.index)
                .ok_or_else(|| anyhow!("question with index {} not found", args.index))?;
            let item = record.into_wheel_item();

            let mut coordinator = open_coordinator(db)?;
            let added = coordinator.add_item(&item.name, &item.prompt, item.answer.as_deref())?;
            let status = if added.is_some() { "added" } else { "ignored" };
            emit_json(serde_json::json!({
                "status": status,
                "item": added,
                "count": coordinator.active_items().len()
            }))
        }
    }
}
