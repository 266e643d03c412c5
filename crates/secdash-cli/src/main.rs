use std::io;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use secdash_assistant::{Assistant, AssistantConfig};
use secdash_core::{Dataset, Incident, OpOutcome, Table, Ticket, User};
use secdash_store_sqlite::Database;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "secdash")]
#[command(about = "Security dashboard data layer CLI")]
struct Cli {
    #[arg(long, default_value = "./secdash.sqlite3")]
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
    /// Reconcile the CSV batch files under the data directory into the store.
    Load(LoadArgs),
    Incident {
        #[command(subcommand)]
        command: IncidentCommand,
    },
    Dataset {
        #[command(subcommand)]
        command: DatasetCommand,
    },
    Ticket {
        #[command(subcommand)]
        command: TicketCommand,
    },
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Ask the assistant a question, optionally with a context summary.
    Ask(AskArgs),
    /// Probe the remote assistant credential and endpoint.
    Health,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Init,
}

#[derive(Debug, Args)]
struct LoadArgs {
    #[arg(long, default_value = "DATA")]
    data_dir: PathBuf,
    /// Load a single table's batch file instead of the full mapping.
    #[arg(long)]
    only: Option<Table>,
}

#[derive(Debug, Subcommand)]
enum IncidentCommand {
    Add(IncidentAddArgs),
    List,
    SetStatus {
        incident_id: String,
        status: String,
    },
    Delete {
        incident_id: String,
    },
}

#[derive(Debug, Args)]
struct IncidentAddArgs {
    #[arg(long)]
    incident_id: String,
    #[arg(long)]
    incident_type: Option<String>,
    #[arg(long)]
    severity: Option<String>,
    #[arg(long, default_value = "Open")]
    status: String,
    /// Defaults to the current UTC time.
    #[arg(long)]
    reported_at: Option<String>,
    #[arg(long)]
    resolved_at: Option<String>,
    #[arg(long)]
    assigned_to: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Subcommand)]
enum DatasetCommand {
    Add(DatasetAddArgs),
    List,
    SetOwner {
        dataset_name: String,
        owner: String,
    },
    Delete {
        dataset_name: String,
    },
}

#[derive(Debug, Args)]
struct DatasetAddArgs {
    #[arg(long)]
    dataset_name: String,
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    source_system: Option<String>,
    #[arg(long)]
    size_mb: Option<f64>,
    #[arg(long)]
    row_count: Option<i64>,
    #[arg(long)]
    created_at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum TicketCommand {
    Add(TicketAddArgs),
    List,
    SetStatus {
        ticket_id: String,
        status: String,
    },
    Delete {
        ticket_id: String,
    },
}

#[derive(Debug, Args)]
struct TicketAddArgs {
    #[arg(long)]
    ticket_id: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long, default_value = "Open")]
    status: String,
    /// Defaults to the current UTC time.
    #[arg(long)]
    opened_at: Option<String>,
    #[arg(long)]
    closed_at: Option<String>,
    #[arg(long)]
    assigned_to: Option<String>,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Add {
        username: String,
        #[arg(long)]
        password_hash: String,
        #[arg(long, default_value = "viewer")]
        role: String,
    },
    Get {
        username: String,
    },
}

#[derive(Debug, Args)]
struct AskArgs {
    question: String,
    #[arg(long)]
    context: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ask(args) => {
            let assistant = Assistant::new(AssistantConfig::from_env());
            println!("{}", assistant.answer(&args.question, args.context.as_deref()));
            Ok(())
        }
        Command::Health => {
            let assistant = Assistant::new(AssistantConfig::from_env());
            println!("{}", assistant.health_check());
            Ok(())
        }
        command => {
            let mut db = Database::open(&cli.db)?;
            db.ensure_schema()?;
            run_store_command(&mut db, command)
        }
    }
}

fn run_store_command(db: &mut Database, command: Command) -> Result<()> {
    match command {
        Command::Db { command: DbCommand::Init } => {
            // ensure_schema already ran; report the outcome.
            print_json(&OpOutcome::done("Schema ensured."))
        }
        Command::Load(args) => match args.only {
            Some(table) => {
                let report = db.load_csv(&args.data_dir.join(table.batch_file()), table)?;
                print_json(&report)
            }
            None => {
                let summary = db.load_all(&args.data_dir)?;
                print_json(&summary)
            }
        },
        Command::Incident { command } => run_incident_command(db, command),
        Command::Dataset { command } => run_dataset_command(db, command),
        Command::Ticket { command } => run_ticket_command(db, command),
        Command::User { command } => run_user_command(db, command),
        Command::Ask(_) | Command::Health => unreachable!("handled before opening the store"),
    }
}

fn run_incident_command(db: &Database, command: IncidentCommand) -> Result<()> {
    match command {
        IncidentCommand::Add(args) => {
            let incident = Incident {
                incident_id: args.incident_id,
                incident_type: args.incident_type,
                severity: args.severity,
                status: Some(args.status),
                reported_at: Some(args.reported_at.unwrap_or_else(now_stamp)),
                resolved_at: args.resolved_at,
                assigned_to: args.assigned_to,
                description: args.description,
            };
            print_json(&db.create_incident(&incident)?)
        }
        IncidentCommand::List => print_json(&db.all_incidents()?),
        IncidentCommand::SetStatus { incident_id, status } => {
            print_json(&db.update_incident_status(&incident_id, &status)?)
        }
        IncidentCommand::Delete { incident_id } => print_json(&db.delete_incident(&incident_id)?),
    }
}

fn run_dataset_command(db: &Database, command: DatasetCommand) -> Result<()> {
    match command {
        DatasetCommand::Add(args) => {
            let dataset = Dataset {
                dataset_name: args.dataset_name,
                owner: args.owner,
                source_system: args.source_system,
                size_mb: args.size_mb,
                row_count: args.row_count,
                created_at: args.created_at,
            };
            print_json(&db.create_dataset(&dataset)?)
        }
        DatasetCommand::List => print_json(&db.all_datasets()?),
        DatasetCommand::SetOwner { dataset_name, owner } => {
            print_json(&db.update_dataset_owner(&dataset_name, &owner)?)
        }
        DatasetCommand::Delete { dataset_name } => print_json(&db.delete_dataset(&dataset_name)?),
    }
}

fn run_ticket_command(db: &Database, command: TicketCommand) -> Result<()> {
    match command {
        TicketCommand::Add(args) => {
            let ticket = Ticket {
                ticket_id: args.ticket_id,
                category: args.category,
                priority: args.priority,
                status: Some(args.status),
                opened_at: Some(args.opened_at.unwrap_or_else(now_stamp)),
                closed_at: args.closed_at,
                assigned_to: args.assigned_to,
            };
            print_json(&db.create_ticket(&ticket)?)
        }
        TicketCommand::List => print_json(&db.all_tickets()?),
        TicketCommand::SetStatus { ticket_id, status } => {
            print_json(&db.update_ticket_status(&ticket_id, &status)?)
        }
        TicketCommand::Delete { ticket_id } => print_json(&db.delete_ticket(&ticket_id)?),
    }
}

fn run_user_command(db: &Database, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::Add { username, password_hash, role } => {
            print_json(&db.create_user(&User { username, password_hash, role })?)
        }
        UserCommand::Get { username } => print_json(&db.user_by_username(&username)?),
    }
}

fn now_stamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
