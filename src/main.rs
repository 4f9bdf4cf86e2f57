use std::{
    error::Error,
    path::{Path, PathBuf},
    process,
};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::net::TcpListener;
use url::Url;
use veil::Redact;

use tunebridge::{
    config::Config,
    credentials::Credentials,
    server::{self, Backend},
    signal::Signals,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Redact, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// TOML file with `client_id` and `client_secret` of the application as
    /// registered with Spotify. Keep it private: the secret allows anyone to
    /// act as this application.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Client ID, overriding the secrets file
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    client_id: Option<String>,

    /// Client secret, overriding the secrets file
    #[redact]
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Address to serve the local backend on
    #[arg(short, long, value_name = "ADDR", default_value_t = String::from("127.0.0.1:9876"))]
    listen: String,

    /// Preferences file
    ///
    /// JSON file where the refresh credential is kept between runs.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value = Config::PREFERENCES_FILE)]
    preferences: PathBuf,

    /// Where Spotify sends the user after consent
    ///
    /// Must match a redirect URI registered for the application.
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, default_value_t = String::from(Config::REDIRECT_URI))]
    redirect_uri: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the client credentials from a file.
///
/// A missing file is not an error: the credentials may come from the
/// command line or the environment instead.
fn load_credentials(secrets_file: &Path) -> tunebridge::error::Result<Credentials> {
    if !secrets_file.exists() {
        info!(
            "{} not found, reading credentials from the environment",
            secrets_file.display()
        );
        return Ok(Credentials::default());
    }

    Credentials::from_file(secrets_file)
}

/// Serves the local backend until a signal arrives.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the listen address
/// cannot be bound. Errors while handling requests never end up here.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let overrides = Credentials {
        client_id: args.client_id,
        client_secret: args.client_secret,
    };
    let credentials = load_credentials(Path::new(&args.secrets_file))?.merge(overrides);
    if credentials.basic_auth().is_err() {
        warn!("client ID or secret not configured; authorization requests will fail");
    }

    let mut config = Config::with_credentials(credentials)?;
    config.redirect_uri = Url::parse(&args.redirect_uri)?;
    config.preferences_file = args.preferences;

    let backend = Backend::new(&config)?;
    let signals = Signals::register()?;
    let listener = TcpListener::bind(&args.listen)
        .await
        .map_err(|e| format!("cannot listen on {}: {e}", args.listen))?;

    server::serve(listener, backend, signals.stopped()).await?;
    info!("stopped");

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and serves the local backend.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
