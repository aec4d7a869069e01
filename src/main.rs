use clap::{Parser, Subcommand};
use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use std::process;

use taskhub_auth::cli::{self, audit::SearchArgs};
use taskhub_auth::config;
use taskhub_auth::App;

/// TaskHub Auth - account, session and audit management for TaskHub
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Sets the configuration file
    #[clap(short, long, value_name = "FILE", default_value = "config.toml")]
    config: String,

    /// Turn debugging information on
    #[clap(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and write a default config if missing
    Init {},

    /// Register a new account
    Register {
        #[clap(long)]
        email: String,

        #[clap(long)]
        first_name: String,

        #[clap(long)]
        last_name: String,

        /// Password (prompted when omitted)
        #[clap(long)]
        password: Option<String>,
    },

    /// Confirm an email address with the token from the verification email
    VerifyEmail {
        #[clap(long)]
        token: String,
    },

    /// Send a new verification email
    ResendVerification {
        #[clap(long)]
        email: String,
    },

    /// Log in and print an access/refresh token pair
    Login {
        #[clap(short, long)]
        email: String,

        /// Password (prompted when omitted)
        #[clap(long)]
        password: Option<String>,

        /// Free-form device description stored with the session
        #[clap(long)]
        device: Option<String>,
    },

    /// Exchange a refresh token for a new token pair
    Refresh {
        #[clap(long)]
        refresh_token: String,
    },

    /// End the current session
    Logout {
        #[clap(long)]
        token: String,

        /// End every session of the account
        #[clap(long)]
        all_devices: bool,
    },

    /// Show the account behind an access token
    Whoami {
        #[clap(long)]
        token: String,
    },

    /// List the active sessions of the account
    Sessions {
        #[clap(long)]
        token: String,
    },

    /// Email a password reset link
    ForgotPassword {
        #[clap(long)]
        email: String,
    },

    /// Set a new password with a reset token
    ResetPassword {
        #[clap(long)]
        token: String,

        /// New password (prompted when omitted)
        #[clap(long)]
        password: Option<String>,
    },

    /// Remove expired tokens, sessions and audit entries
    Sweep {
        /// Keep running on the configured interval
        #[clap(long)]
        daemon: bool,

        /// Override the interval in seconds
        #[clap(long)]
        interval: Option<u64>,
    },

    /// Audit trail commands
    Audit {
        #[clap(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Search audit logs
    Search {
        /// Filter by user ID
        #[clap(long)]
        user_id: Option<String>,

        /// Filter by action, e.g. LOGIN_FAILED
        #[clap(long)]
        action: Option<String>,

        /// Minimum severity (LOW, MEDIUM, HIGH, CRITICAL)
        #[clap(long)]
        severity: Option<String>,

        /// Filter by client IP address
        #[clap(long)]
        ip: Option<String>,

        /// Start date in YYYY-MM-DD format
        #[clap(long)]
        from_date: Option<String>,

        /// End date in YYYY-MM-DD format
        #[clap(long)]
        to_date: Option<String>,

        /// Maximum number of records to return
        #[clap(long, short, default_value = "50")]
        limit: usize,

        #[clap(long, default_value = "0")]
        offset: usize,
    },

    /// Summarise the security events of one user
    Summary {
        #[clap(long)]
        user_id: String,

        #[clap(long, default_value = "30")]
        days: i64,
    },

    /// Purge audit logs past their retention period
    Purge {
        /// Confirm purging without additional prompt
        #[clap(long)]
        confirm: bool,
    },
}

fn run(cli: &Cli, app: &App) -> anyhow::Result<bool> {
    match &cli.command {
        Commands::Init {} => cli::maintenance::init(app, &cli.config),
        Commands::Register { email, first_name, last_name, password } => {
            cli::auth::register(app, email, first_name, last_name, password.as_deref())
        }
        Commands::VerifyEmail { token } => cli::auth::verify_email(app, token),
        Commands::ResendVerification { email } => cli::auth::resend_verification(app, email),
        Commands::Login { email, password, device } => {
            cli::auth::login(app, email, password.as_deref(), device.as_deref())
        }
        Commands::Refresh { refresh_token } => cli::auth::refresh(app, refresh_token),
        Commands::Logout { token, all_devices } => cli::auth::logout(app, token, *all_devices),
        Commands::Whoami { token } => cli::auth::whoami(app, token),
        Commands::Sessions { token } => cli::auth::sessions(app, token),
        Commands::ForgotPassword { email } => cli::auth::forgot_password(app, email),
        Commands::ResetPassword { token, password } => {
            cli::auth::reset_password(app, token, password.as_deref())
        }
        Commands::Sweep { daemon, interval } => cli::maintenance::sweep(app, *daemon, *interval),
        Commands::Audit { command } => match command {
            AuditCommands::Search { user_id, action, severity, ip, from_date, to_date, limit, offset } => {
                let args = SearchArgs {
                    user_id: user_id.clone(),
                    action: action.clone(),
                    min_severity: severity.clone(),
                    ip_address: ip.clone(),
                    from_date: from_date.clone(),
                    to_date: to_date.clone(),
                    limit: *limit,
                    offset: *offset,
                };
                cli::audit::search(app, &args)
            }
            AuditCommands::Summary { user_id, days } => cli::audit::summary(app, user_id, *days),
            AuditCommands::Purge { confirm } => cli::audit::purge(app, *confirm),
        },
    }
}

fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.debug {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let mut config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load configuration: {:#}", err);
            process::exit(1);
        }
    };
    if let Err(err) = config::apply_env_overrides(&mut config) {
        error!("Invalid environment override: {:#}", err);
        process::exit(1);
    }
    info!("Configuration loaded from {}", cli.config);

    let app = match App::from_config(config) {
        Ok(app) => app,
        Err(err) => {
            error!("Failed to start: {:#}", err);
            process::exit(1);
        }
    };

    match run(&cli, &app) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(err) => {
            error!("{:#}", err);
            process::exit(1);
        }
    }
}
