use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use billsync::browser::chromium::ChromiumLauncher;
use billsync::budget::{BudgetService, TransactionSubmitter, YnabClient};
use billsync::clock::{Clock, SystemClock};
use billsync::config::{default_config_path, Environment, ResolvedConfig, RunMode};
use billsync::credentials::{resolve_required, AuthStateStore, OpSecretResolver};
use billsync::duration::format_duration;
use billsync::sync::{artifacts, BillExtractor, BillTarget, RetryOrchestrator, SessionManager};

/// Exit status for configuration problems, matching fatal run failures.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "billsync")]
#[command(about = "Schedule the current utility bill in YNAB")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the bill and record it (default)
    Run,
    /// List the budgets and accounts the token can see
    Budgets,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let env = Environment::from_env();
    let (log_level, run_mode) = match &env {
        Ok(env) => (env.log_level.clone(), env.run_mode),
        Err(_) => ("info".to_string(), RunMode::default()),
    };
    if let Err(e) = init_tracing(&log_level, run_mode) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }

    let env = match env {
        Ok(env) => env,
        Err(e) => {
            tracing::error!(error = %e, "Invalid environment");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let config = match ResolvedConfig::load(&cli.config, env) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "Failed to load config");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Budgets => match list_budgets(&config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = format!("{e:#}"), "Failed to list budgets");
                ExitCode::FAILURE
            }
        },
        Command::Config => {
            show_config(&cli.config, &config);
            ExitCode::SUCCESS
        }
    }
}

fn init_tracing(log_level: &str, run_mode: RunMode) -> Result<()> {
    let filter = EnvFilter::try_new(format!(
        "{log_level},chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off"
    ))
    .with_context(|| format!("Invalid LOG_LEVEL: {log_level}"))?;

    match run_mode {
        RunMode::Development => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .init();
        }
        RunMode::Production => {
            std::fs::create_dir_all("logs").context("Failed to create logs directory")?;
            let path = PathBuf::from("logs").join(format!(
                "{}.log",
                SystemClock.today().format("%Y-%m-%d")
            ));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_target(true)
                        .with_level(true)
                        .json(),
                )
                .init();
        }
    }

    Ok(())
}

async fn ynab_client(config: &ResolvedConfig, vault: &OpSecretResolver) -> Result<YnabClient> {
    let token = resolve_required(vault, &config.settings.vault.ynab_token).await?;
    Ok(
        YnabClient::with_timeout(token, config.settings.timeouts.http)?
            .with_base_url(config.env.ynab_base_url.clone()),
    )
}

async fn run(config: &ResolvedConfig) -> ExitCode {
    let settings = &config.settings;
    let env = &config.env;

    artifacts::reset_dir(&settings.screenshot_dir);

    let vault = Arc::new(OpSecretResolver::new().with_timeout(settings.timeouts.vault));
    let ynab = match ynab_client(config, &vault).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "Could not set up the budget client");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = AuthStateStore::new(&settings.auth_dir).with_clock(clock.clone());
    let sessions = SessionManager::new(store, env.pge_base_url.clone())
        .with_selectors(settings.selectors.clone())
        .with_timeouts(settings.timeouts.navigation, settings.timeouts.login)
        .with_element_timeout(settings.timeouts.element);
    let extractor = BillExtractor::new(
        settings.selectors.amount_due.clone(),
        settings.selectors.due_date.clone(),
    )
    .with_element_timeout(settings.timeouts.element)
    .with_screenshot_dir(settings.screenshot_dir.clone())
    .with_clock(clock);
    let submitter =
        TransactionSubmitter::new(Arc::new(ynab)).with_skip_duplicates(settings.skip_duplicates);
    let launcher = Arc::new(
        ChromiumLauncher::new(settings.headless)
            .with_executable(settings.chrome_executable.clone()),
    );

    let orchestrator = RetryOrchestrator::new(
        launcher,
        vault,
        sessions,
        extractor,
        submitter,
        BillTarget {
            budget_name: env.budget_name.clone(),
            account_name: env.account_name.clone(),
            category_id: env.category_id.clone(),
        },
    )
    .with_secrets(settings.vault.clone())
    .with_max_attempts(settings.max_attempts)
    .with_close_timeout(settings.timeouts.close)
    .with_retry_delay(settings.retry_delay);

    match orchestrator.run().await {
        Ok(report) => {
            tracing::info!(
                amount_due = %report.record.amount_due,
                due_date = %report.record.due_date,
                attempts = report.attempts,
                reused_session = report.reused_session,
                outcome = ?report.outcome,
                "Bill recorded"
            );
            ExitCode::SUCCESS
        }
        Err(failure) => {
            tracing::error!(error = %failure, "Run failed");
            ExitCode::from(failure.exit_code())
        }
    }
}

async fn list_budgets(config: &ResolvedConfig) -> Result<()> {
    let vault = OpSecretResolver::new().with_timeout(config.settings.timeouts.vault);
    let client = ynab_client(config, &vault).await?;

    for budget in client.list_budgets().await? {
        println!("{} ({})", budget.name, budget.id);
        for account in client.list_accounts(&budget.id).await? {
            if account.deleted {
                continue;
            }
            let closed = if account.closed { " [closed]" } else { "" };
            println!("  {} ({}){closed}", account.name, account.id);
        }
    }

    Ok(())
}

fn show_config(path: &std::path::Path, config: &ResolvedConfig) {
    let settings = &config.settings;
    let env = &config.env;

    println!("Config file: {}", path.display());
    println!("Provider URL: {}", env.pge_base_url);
    println!("YNAB URL: {}", env.ynab_base_url);
    println!("Budget: {}", env.budget_name);
    println!("Account: {}", env.account_name);
    println!("Category: {}", env.category_id);
    println!("Run mode: {:?}", env.run_mode);
    println!("Max attempts: {}", settings.max_attempts);
    println!(
        "Timeouts: navigation {}, login {}, element {}, close {}, http {}, vault {}",
        format_duration(settings.timeouts.navigation),
        format_duration(settings.timeouts.login),
        format_duration(settings.timeouts.element),
        format_duration(settings.timeouts.close),
        format_duration(settings.timeouts.http),
        format_duration(settings.timeouts.vault),
    );
    println!("Retry delay: {}", format_duration(settings.retry_delay));
    println!("Auth directory: {}", settings.auth_dir.display());
    println!("Screenshot directory: {}", settings.screenshot_dir.display());
    println!("Headless: {}", settings.headless);
}
