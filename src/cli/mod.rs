use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::LedgerService;
use crate::config::Config;
use crate::domain::{format_cents, parse_cents, ExpenseHeader, ExpenseId, TripId, UserId};
use crate::logging;

/// travelbook - Shared travel expenses
#[derive(Parser)]
#[command(name = "travelbook")]
#[command(about = "Record trip expenses and split them among participants")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, default_value = "travelbook.toml", global = true)]
    pub config: String,

    /// Database file path (overrides config file)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Log level (overrides config file)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Trip management commands
    #[command(subcommand)]
    Trip(TripCommands),

    /// Expense management commands
    #[command(subcommand)]
    Expense(ExpenseCommands),

    /// Verify that every expense is linked to a trip
    Check,

    /// Export the expenses of a trip
    Export {
        /// Trip ID
        trip: TripId,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a user
    Add {
        /// Nickname (must be unique)
        nickname: String,
    },

    /// List all users
    List,
}

#[derive(Subcommand)]
pub enum TripCommands {
    /// Create a new trip
    Create {
        /// Trip name
        name: String,

        /// Nickname of the trip owner
        #[arg(long)]
        owner: String,
    },

    /// List all trips
    List,

    /// Add a user to a trip
    Join {
        /// Trip ID
        id: TripId,

        /// Nickname of the user joining
        #[arg(long)]
        user: String,
    },

    /// Show a trip with its expenses and what everyone owes
    Show {
        /// Trip ID
        id: TripId,
    },
}

#[derive(Subcommand)]
pub enum ExpenseCommands {
    /// Record an expense for a trip
    Add {
        /// Trip ID
        #[arg(long)]
        trip: TripId,

        /// Expense name
        #[arg(short, long)]
        name: String,

        /// Price (e.g., "42.50" or "42")
        #[arg(short, long)]
        price: String,

        /// Where the money was spent
        #[arg(short, long, default_value = "")]
        location: String,

        /// Description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Participant nickname (repeatable)
        #[arg(long = "participant")]
        participants: Vec<String>,
    },

    /// Show an expense
    Show {
        /// Expense ID
        id: ExpenseId,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Change an expense. Participants given here are added to the
    /// existing ones; nobody is removed.
    Update {
        /// Expense ID
        id: ExpenseId,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        price: Option<String>,

        #[arg(short, long)]
        location: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// Participant nickname to add (repeatable)
        #[arg(long = "participant")]
        participants: Vec<String>,
    },

    /// Remove an expense with its participants
    Remove {
        /// Expense ID
        id: ExpenseId,
    },
}

impl Cli {
    /// Config file values with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)?;
        if let Some(ref path) = self.database {
            config.database.path = path.clone();
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.resolve_config()?;
        logging::init(&config.logging);

        match self.command {
            Commands::Init => {
                LedgerService::init(&config.database).await?;
                println!("Database initialized: {}", config.database.path);
            }

            Commands::User(user_cmd) => {
                let service = LedgerService::connect(&config.database).await?;
                run_user_command(&service, user_cmd).await?;
            }

            Commands::Trip(trip_cmd) => {
                let service = LedgerService::connect(&config.database).await?;
                run_trip_command(&service, trip_cmd).await?;
            }

            Commands::Expense(expense_cmd) => {
                let service = LedgerService::connect(&config.database).await?;
                run_expense_command(&service, expense_cmd).await?;
            }

            Commands::Check => {
                let service = LedgerService::connect(&config.database).await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                trip,
                format,
                output,
            } => {
                let service = LedgerService::connect(&config.database).await?;
                run_export_command(&service, trip, &format, output.as_deref()).await?;
            }
        }

        Ok(())
    }
}

async fn run_user_command(service: &LedgerService, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Add { nickname } => {
            let user = service.register_user(&nickname).await?;
            println!("Registered user: {} ({})", user.nickname, user.id);
        }

        UserCommands::List => {
            let users = service.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<6} {:<20}", "ID", "NICKNAME");
                println!("{}", "-".repeat(27));
                for user in users {
                    println!("{:<6} {:<20}", user.id, user.nickname);
                }
            }
        }
    }
    Ok(())
}

async fn run_trip_command(service: &LedgerService, cmd: TripCommands) -> Result<()> {
    match cmd {
        TripCommands::Create { name, owner } => {
            let owner = service.get_user_by_nickname(&owner).await?;
            let trip = service.create_trip(&name, owner.id).await?;
            println!("Created trip: {} ({})", trip.name, trip.id);
        }

        TripCommands::List => {
            let trips = service.list_trips().await?;
            if trips.is_empty() {
                println!("No trips found.");
            } else {
                println!("{:<6} {:<30} {:<12}", "ID", "NAME", "CREATED");
                println!("{}", "-".repeat(50));
                for trip in trips {
                    println!(
                        "{:<6} {:<30} {:<12}",
                        trip.id,
                        truncate(&trip.name, 30),
                        trip.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        TripCommands::Join { id, user } => {
            let user = service.get_user_by_nickname(&user).await?;
            service.add_trip_member(id, user.id).await?;
            println!("{} joined trip {}", user.nickname, id);
        }

        TripCommands::Show { id } => {
            let details = service.get_trip_details(id).await?;
            let owner = service.get_user(details.trip.owner_id).await?;

            println!("Trip: {}", details.trip.name);
            println!("  ID:      {}", details.trip.id);
            println!("  Owner:   {}", owner.nickname);
            println!(
                "  Created: {}",
                details.trip.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            let members: Vec<_> = details.members.iter().map(|m| m.nickname.as_str()).collect();
            println!("  Members: {}", members.join(", "));
            println!();

            if details.expenses.is_empty() {
                println!("No expenses recorded.");
                return Ok(());
            }

            println!(
                "{:<6} {:<24} {:<16} {:>12} {:>6}",
                "ID", "NAME", "LOCATION", "PRICE", "SPLIT"
            );
            println!("{}", "-".repeat(68));
            for expense in &details.expenses {
                println!(
                    "{:<6} {:<24} {:<16} {:>12} {:>6}",
                    expense.id,
                    truncate(&expense.name, 24),
                    truncate(&expense.location, 16),
                    format_cents(expense.price_cents),
                    expense.participant_ids.len()
                );
            }
            println!("{}", "-".repeat(68));
            println!(
                "{:<48} {:>12}",
                "TOTAL",
                format_cents(details.shares.total)
            );

            println!();
            println!("{:<24} {:>12}", "PARTICIPANT", "OWES");
            for share in &details.shares.shares {
                println!(
                    "{:<24} {:>12}",
                    truncate(&share.nickname, 24),
                    format_cents(share.owed)
                );
            }
            if details.shares.unassigned != 0 {
                println!(
                    "{:<24} {:>12}",
                    "(unassigned)",
                    format_cents(details.shares.unassigned)
                );
            }
        }
    }
    Ok(())
}

async fn run_expense_command(service: &LedgerService, cmd: ExpenseCommands) -> Result<()> {
    match cmd {
        ExpenseCommands::Add {
            trip,
            name,
            price,
            location,
            description,
            participants,
        } => {
            let price_cents =
                parse_cents(&price).context("Invalid price format. Use '42.50' or '42'")?;
            let participant_ids = resolve_participants(service, &participants).await?;

            let header = ExpenseHeader::new(name, price_cents)
                .with_location(location)
                .with_description(description)
                .with_participants(participant_ids);

            // Surface a readable error before the foreign key does
            service.get_trip(trip).await?;
            let id = service.create_expense(&header, trip).await?;
            println!(
                "Recorded expense: {} {} ({})",
                header.name,
                format_cents(header.price_cents),
                id
            );
        }

        ExpenseCommands::Show { id, format } => {
            let header = service.get_expense(id).await?;
            match format.as_str() {
                "json" => {
                    println!("{}", serde_json::to_string_pretty(&header)?);
                }
                _ => {
                    println!("Expense: {}", header.name);
                    println!("  ID:           {}", header.id);
                    println!("  Trip:         {}", header.trip_id);
                    println!("  Price:        {}", format_cents(header.price_cents));
                    if !header.location.is_empty() {
                        println!("  Location:     {}", header.location);
                    }
                    if !header.description.is_empty() {
                        println!("  Description:  {}", header.description);
                    }
                    println!("  Version:      {}", header.version);

                    let mut names = Vec::with_capacity(header.participant_ids.len());
                    for user_id in &header.participant_ids {
                        names.push(service.get_user(*user_id).await?.nickname);
                    }
                    if names.is_empty() {
                        println!("  Participants: (none)");
                    } else {
                        println!("  Participants: {}", names.join(", "));
                    }
                }
            }
        }

        ExpenseCommands::Update {
            id,
            name,
            price,
            location,
            description,
            participants,
        } => {
            let mut header = service.get_expense(id).await?;

            if let Some(name) = name {
                header.name = name;
            }
            if let Some(price) = price {
                header.price_cents =
                    parse_cents(&price).context("Invalid price format. Use '42.50' or '42'")?;
            }
            if let Some(location) = location {
                header.location = location;
            }
            if let Some(description) = description {
                header.description = description;
            }
            header.participant_ids = resolve_participants(service, &participants).await?;

            let updated = service.update_expense(&header).await?;
            println!(
                "Updated expense: {} {} ({} participants)",
                updated.name,
                format_cents(updated.price_cents),
                updated.participant_ids.len()
            );
        }

        ExpenseCommands::Remove { id } => {
            service.remove_expense(id).await?;
            println!("Removed expense: {}", id);
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    let stats = service.check_integrity().await?;

    println!("Expenses:           {}", stats.expense_count);
    println!("Participant rows:   {}", stats.participant_count);
    println!("Unlinked expenses:  {}", stats.orphaned_expenses);
    println!("Dangling links:     {}", stats.dangling_links);

    if stats.orphaned_expenses == 0 && stats.dangling_links == 0 {
        println!("Ledger is consistent");
        Ok(())
    } else {
        anyhow::bail!("Ledger has inconsistencies")
    }
}

async fn run_export_command(
    service: &LedgerService,
    trip_id: TripId,
    format: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match format {
        "csv" => {
            let count = exporter.export_trip_csv(trip_id, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} expenses", count);
            }
        }
        "json" => {
            let snapshot = exporter.export_trip_json(trip_id, writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported trip '{}' with {} expenses",
                    snapshot.trip.name,
                    snapshot.expenses.len()
                );
            }
        }
        _ => {
            anyhow::bail!("Invalid export format '{}'. Valid formats: csv, json", format);
        }
    }

    Ok(())
}

/// Map nicknames to user ids, failing on the first unknown one.
async fn resolve_participants(service: &LedgerService, nicknames: &[String]) -> Result<Vec<UserId>> {
    let mut ids = Vec::with_capacity(nicknames.len());
    for nickname in nicknames {
        ids.push(service.get_user_by_nickname(nickname).await?.id);
    }
    Ok(ids)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
