use clap::{CommandFactory, Parser, Subcommand};

mod commands;
mod context;
mod logging;

#[derive(Parser)]
#[command(name = "checkin", version, about = "Daily Check-in CLI")]
struct Cli {
    /// User whose day is read or changed
    #[arg(long, global = true, default_value = checkin_core::storage::migrations::LEGACY_USER)]
    user: String,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show today's levels
    Status {
        /// Print a table instead of JSON
        #[arg(long)]
        table: bool,
    },
    /// Toggle a level: selecting the active level clears it
    Toggle(commands::checkin::LevelArgs),
    /// Set a level directly (0 clears)
    Set(commands::checkin::LevelArgs),
    /// Today's notes
    Note {
        #[command(subcommand)]
        action: commands::note::NoteAction,
    },
    /// Current and longest streak
    Streak,
    /// Calendar summary of the day, week, month or year containing today
    Calendar {
        period: commands::stats::Period,
        /// Rolling window ending today instead of the calendar period
        #[arg(long, conflicts_with = "breakdown")]
        rolling: bool,
        /// Split a month into weeks or a year into months
        #[arg(long)]
        breakdown: bool,
    },
    /// Stored day records, newest first
    History {
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Achievement table and what has been unlocked
    Achievements,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Print the task catalog in use
    Catalog,
    /// Forget the cached day and unlocked achievements of --user
    Forget,
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let user = cli.user;
    let result = match cli.command {
        Commands::Status { table } => commands::checkin::status(&user, table).await,
        Commands::Toggle(args) => commands::checkin::toggle(&user, args).await,
        Commands::Set(args) => commands::checkin::set(&user, args).await,
        Commands::Note { action } => commands::note::run(&user, action).await,
        Commands::Streak => commands::stats::streak(&user).await,
        Commands::Calendar {
            period,
            rolling,
            breakdown,
        } => {
            if breakdown {
                commands::stats::breakdown(&user, period).await
            } else {
                commands::stats::calendar(&user, period, rolling).await
            }
        }
        Commands::History { days } => commands::stats::history(&user, days).await,
        Commands::Achievements => commands::stats::achievements(&user).await,
        Commands::Config { action } => commands::config::run(action),
        Commands::Catalog => commands::config::catalog(),
        Commands::Forget => commands::checkin::forget(&user),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "checkin", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
