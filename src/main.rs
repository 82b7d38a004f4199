mod ai;
mod analysis;
mod app;
mod auth;
mod backends;
mod calc;
mod config;
mod db;
mod error;
mod firestore;
mod input;
mod models;
mod store;
mod tui;
mod validator;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use app::App;
use backends::Backends;
use calc::format_usd;
use config::{BackendMode, Config};
use db::LocalStorage;
use input::FormFields;
use models::{AnalysisResult, GroundingChunk, User};

#[derive(Parser)]
#[command(name = "homewise")]
#[command(about = "AI-assisted analysis of real estate purchases")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive terminal UI (default)
    Tui,

    /// Analyze a property and print the result
    Analyze {
        #[command(flatten)]
        property: PropertyArgs,

        /// Save the analysis for the signed-in user
        #[arg(long)]
        save: bool,

        /// Print the raw analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign in (demo user when no identity provider is configured)
    Login,

    /// Sign out
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List saved analyses, newest first
    List,

    /// Show a saved analysis
    Show {
        /// Analysis ID
        id: String,

        /// Print the raw analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a saved analysis
    Delete {
        /// Analysis ID
        id: String,
    },

    /// Compare two or more saved analyses side by side
    Compare {
        /// Analysis IDs
        #[arg(required = true, num_args = 2..)]
        ids: Vec<String>,
    },

    /// Monthly principal and interest for a loan
    Payment {
        /// Loan amount
        principal: f64,

        /// Annual interest rate in percent
        rate: f64,

        /// Loan term in years
        years: f64,
    },

    /// Show which backends are live or simulated
    Status,
}

// Form values for a one-shot analysis. Omitted flags keep the form defaults.
#[derive(Args)]
struct PropertyArgs {
    /// Property price ($)
    #[arg(long)]
    price: Option<String>,

    /// Down payment ($)
    #[arg(long)]
    down: Option<String>,

    /// Interest rate (%)
    #[arg(long)]
    rate: Option<String>,

    /// Loan term (years)
    #[arg(long)]
    term: Option<String>,

    /// Gross annual income ($)
    #[arg(long)]
    income: Option<String>,

    /// Monthly debts ($)
    #[arg(long)]
    debts: Option<String>,

    /// Property location (City, State)
    #[arg(long)]
    property: Option<String>,

    /// Work location
    #[arg(long)]
    work: Option<String>,
}

impl PropertyArgs {
    fn into_form(self) -> FormFields {
        let mut form = FormFields::default();
        let overrides = [
            self.price,
            self.down,
            self.rate,
            self.term,
            self.income,
            self.debts,
            self.property,
            self.work,
        ];
        for (index, value) in overrides.into_iter().enumerate() {
            if let Some(value) = value {
                form.set(index, value);
            }
        }
        form
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("homewise=info"));

    match log_file {
        // The terminal belongs to the UI, so logs go to a file.
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tui);

    if let Commands::Payment {
        principal,
        rate,
        years,
    } = command
    {
        let payment = calc::monthly_payment(principal, rate, years);
        println!("Monthly principal & interest: ${:.2} ({})", payment, format_usd(payment));
        return Ok(());
    }

    let config = Config::from_env();
    let interactive = matches!(command, Commands::Tui);
    init_logging(interactive.then(|| config.log_path()).as_deref())?;

    let db_path = config.database_path();
    let storage = LocalStorage::open(&db_path)
        .with_context(|| format!("Failed to open local storage at {}", db_path.display()))?;
    let backends = Backends::from_config(&config, storage.clone());
    let store = &*backends.store;

    match command {
        Commands::Tui => tui::run(&backends)?,

        Commands::Analyze {
            property,
            save,
            json,
        } => {
            let input = property.into_form().collect().context("Invalid property details")?;

            let mut app = App::new();
            if let Some(user) = backends.auth.current_user() {
                app.on_auth_changed(Some(user), store);
            }

            let ticket = app
                .submit(input)
                .ok_or_else(|| anyhow!("An analysis is already running"))?;
            if !backends.gateway.is_live() {
                eprintln!("Running in simulation mode (no Gemini API key configured).");
            }
            let outcome = backends.gateway.get_analysis(&ticket.input);
            app.complete_analysis(&ticket, outcome);
            if let Some(error) = &app.error {
                bail!("{}", error);
            }

            let result = app
                .analysis_result
                .as_ref()
                .ok_or_else(|| anyhow!("No analysis was produced"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(result)?);
            } else {
                print_analysis(result, &app.citations);
            }

            if save {
                app.save_current(store);
                let message = app.alert.take().unwrap_or_default();
                if !app.is_saved() {
                    bail!("{}", message);
                }
                let id = app
                    .analysis_result
                    .as_ref()
                    .and_then(|r| r.id.clone())
                    .unwrap_or_default();
                println!("\n{} (ID: {})", message, id);
            }
        }

        Commands::Login => {
            let user = backends.auth.login_with_google()?;
            println!("Signed in as {}", user.display_name());
            if backends.auth.mode() == BackendMode::Simulated {
                println!("Simulated account: analyses are saved on this machine only.");
            }
        }

        Commands::Logout => {
            backends.auth.logout()?;
            println!("Signed out.");
        }

        Commands::Whoami => match backends.auth.current_user() {
            Some(user) => {
                println!("{}", user.display_name());
                println!("UID: {}", user.uid);
                println!("Account: {}", backends.auth.mode());
            }
            None => println!("Not signed in."),
        },

        Commands::List => {
            let user = require_user(&backends)?;
            let analyses = store
                .get_analyses_for_user(&user)
                .context("Failed to load saved analyses")?;
            if analyses.is_empty() {
                println!("You haven't saved any analyses yet.");
            } else {
                println!(
                    "{:<28} {:<11} {:<28} {:>12} {:<17}",
                    "ID", "VERDICT", "LOCATION", "PRICE", "SAVED"
                );
                println!("{}", "-".repeat(100));
                for analysis in &analyses {
                    let verdict = analysis
                        .decision()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "incomplete".to_string());
                    let price = analysis
                        .user_input
                        .as_ref()
                        .map(|input| format_usd(input.property_price))
                        .unwrap_or_else(|| "-".to_string());
                    let saved = analysis
                        .saved_at
                        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<28} {:<11} {:<28} {:>12} {:<17}",
                        truncate(analysis.id.as_deref().unwrap_or("-"), 26),
                        verdict,
                        truncate(analysis.property_location(), 26),
                        price,
                        saved
                    );
                }
            }
        }

        Commands::Show { id, json } => {
            let user = require_user(&backends)?;
            let analyses = store
                .get_analyses_for_user(&user)
                .context("Failed to load saved analyses")?;
            match analyses.iter().find(|a| a.id.as_deref() == Some(id.as_str())) {
                Some(analysis) if json => println!("{}", serde_json::to_string_pretty(analysis)?),
                Some(analysis) => print_analysis(analysis, &[]),
                None => println!("Analysis '{}' not found.", id),
            }
        }

        Commands::Delete { id } => {
            let user = require_user(&backends)?;
            store
                .delete_analysis(&user, &id)
                .with_context(|| format!("Failed to delete analysis '{}'", id))?;
            println!("Deleted analysis '{}'.", id);
        }

        Commands::Compare { ids } => {
            let user = require_user(&backends)?;
            let mut app = App::new();
            app.on_auth_changed(Some(user), store);
            app.show_dashboard(store);
            if let Some(alert) = app.alert.take() {
                bail!("{}", alert);
            }
            if !app.start_compare(&ids) {
                bail!("{}", app.alert.take().unwrap_or_default());
            }
            print_comparison(&app.analyses_to_compare);
        }

        Commands::Status => {
            println!("Analysis: {} ({})", backends.analysis_mode(), config.gemini_model);
            println!("Account:  {}", backends.auth.mode());
            println!("Storage:  {}", backends.store.mode());
            if let Some(path) = storage.path() {
                println!("Database: {}", path.display());
            }
            println!("Log file: {}", config.log_path().display());
            match backends.auth.current_user() {
                Some(user) => println!("User:     {}", user.display_name()),
                None => println!("User:     (not signed in)"),
            }
        }

        Commands::Payment { .. } => unreachable!("handled before backends are opened"),
    }

    Ok(())
}

fn require_user(backends: &Backends) -> Result<User> {
    backends
        .auth
        .current_user()
        .ok_or_else(|| anyhow!("Not signed in. Run `homewise login` first."))
}

fn wrapped(text: &str) -> String {
    textwrap::indent(&textwrap::fill(text, 76), "  ")
}

fn print_analysis(result: &AnalysisResult, citations: &[GroundingChunk]) {
    let Some(analysis) = validator::complete(result) else {
        println!("Incomplete analysis: this record is missing required data and cannot be displayed.");
        println!("Missing: {}", validator::missing_fields(result).join(", "));
        return;
    };

    let input = analysis.user_input;
    println!("{}", input.property_location);
    if let Some(id) = analysis.id {
        println!("ID: {}", id);
    }
    println!("\nVERDICT: {}", analysis.decision.to_string().to_uppercase());
    print!("{}", wrapped(&analysis.verdict.summary));
    for pro in &analysis.verdict.pros {
        println!("  + {}", pro);
    }
    for con in &analysis.verdict.cons {
        println!("  - {}", con);
    }

    let affordability = analysis.affordability;
    println!(
        "\nAFFORDABILITY: {:.0}/100, payment {}/mo, DTI {:.1}%",
        affordability.affordability_index,
        format_usd(affordability.monthly_payment),
        affordability.dti_ratio
    );
    print!("{}", wrapped(&affordability.narrative));

    let market = analysis.market_analysis;
    println!("\nMARKET: {} trend, sentiment {:.0}/100", market.trend, market.sentiment);
    print!("{}", wrapped(&market.narrative));

    let cost = analysis.ownership_cost;
    println!("\nMONTHLY OWNERSHIP COST: {}", format_usd(cost.total_monthly_cost));
    println!("  Principal & interest  {:>10}", format_usd(cost.principal_and_interest));
    println!("  Property tax          {:>10}", format_usd(cost.property_tax));
    println!("  Home insurance        {:>10}", format_usd(cost.home_insurance));
    println!("  Maintenance           {:>10}", format_usd(cost.maintenance));

    println!("\nBREAK-EVEN: {:.1} years", analysis.break_even.years);
    print!("{}", wrapped(&analysis.break_even.narrative));

    let commute = analysis.commute;
    println!(
        "\nCOMMUTE to {}: {:.0} min, {:.1} mi",
        input.work_location, commute.time, commute.distance
    );
    print!("{}", wrapped(&commute.narrative));

    let location = analysis.location_score;
    println!(
        "\nLOCATION: overall {:.1}/10 (schools {:.1}, safety {:.1}, amenities {:.1})",
        location.overall, location.schools, location.crime, location.amenities
    );
    print!("{}", wrapped(&location.narrative));

    let payment = calc::monthly_payment(input.loan_amount(), input.interest_rate, f64::from(input.loan_term));
    let dti = calc::debt_to_income(input.monthly_debts + cost.total_monthly_cost, input.annual_income);
    println!(
        "\nLocal check: P&I {}/mo on {} at {}% over {} years; DTI with housing {:.1}%",
        format_usd(payment),
        format_usd(input.loan_amount()),
        input.interest_rate,
        input.loan_term,
        dti
    );

    let sources: Vec<_> = citations.iter().filter_map(|c| c.web.as_ref()).collect();
    if !sources.is_empty() {
        println!("\nSOURCES:");
        for web in sources {
            println!(
                "  {} {}",
                web.title.as_deref().unwrap_or("(untitled)"),
                web.uri.as_deref().unwrap_or("")
            );
        }
    }
}

fn print_comparison(analyses: &[AnalysisResult]) {
    let columns: Vec<_> = analyses.iter().map(validator::complete).collect();
    let cell = |f: &dyn Fn(&validator::CompleteAnalysis) -> String| -> Vec<String> {
        columns
            .iter()
            .map(|c| c.as_ref().map(f).unwrap_or_else(|| "n/a".to_string()))
            .collect()
    };

    let rows: Vec<(&str, Vec<String>)> = vec![
        (
            "Property",
            analyses
                .iter()
                .map(|a| truncate(a.property_location(), 20))
                .collect(),
        ),
        ("Verdict", cell(&|a| a.decision.to_string())),
        ("Price", cell(&|a| format_usd(a.user_input.property_price))),
        ("Monthly Cost", cell(&|a| format_usd(a.ownership_cost.total_monthly_cost))),
        ("Affordability", cell(&|a| format!("{:.0}/100", a.affordability.affordability_index))),
        ("Market Sentiment", cell(&|a| format!("{:.0}/100", a.market_analysis.sentiment))),
        ("Break-Even", cell(&|a| format!("{:.1} yrs", a.break_even.years))),
    ];

    for (label, values) in rows {
        let values: Vec<String> = values.iter().map(|v| format!("{:<22}", v)).collect();
        println!("{:<18} {}", label, values.join(" "));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_analyze_overrides() {
        let cli = Cli::try_parse_from([
            "homewise", "analyze", "--price", "350000", "--property", "Boise, ID", "--save",
        ])
        .unwrap();
        let Some(Commands::Analyze { property, save, json }) = cli.command else {
            panic!("expected analyze");
        };
        assert!(save);
        assert!(!json);

        let input = property.into_form().collect().unwrap();
        assert_eq!(input.property_price, 350000.0);
        assert_eq!(input.property_location, "Boise, ID");
        assert_eq!(input.down_payment, 100000.0);
    }

    #[test]
    fn test_cli_defaults_to_tui() {
        let cli = Cli::try_parse_from(["homewise"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_compare_needs_two_ids() {
        assert!(Cli::try_parse_from(["homewise", "compare", "one"]).is_err());
        assert!(Cli::try_parse_from(["homewise", "compare", "one", "two"]).is_ok());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer location", 10), "a much ...");
    }
}
