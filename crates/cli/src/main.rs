mod commands;
mod ui;


use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tollgate::stores::ThrottlePolicy;
use tollgate::{Config, Coordination};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Inspect and drive distributed coordination state")]
#[command(version)]
#[command(after_help = "Examples:
  tollgate health                               Check the store is reachable
  tollgate lock acquire purge-expired --ttl 5m  Take a maintenance lock
  tollgate rate-limit check --ip 203.0.113.7    Count a request and show the decision
  tollgate idempotency show order-42            Show the record for a key
  tollgate throttle status alice@example.com 203.0.113.7")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the coordination store is reachable
    #[command(after_help = "Example: tollgate health")]
    Health,

    /// Acquire or release a distributed lock
    Lock {
        #[command(subcommand)]
        action: LockCommands,
    },

    /// Run requests through the rate limiter
    #[command(name = "rate-limit")]
    RateLimit {
        #[command(subcommand)]
        action: RateLimitCommands,
    },

    /// Inspect or claim idempotency keys
    Idempotency {
        #[command(subcommand)]
        action: IdempotencyCommands,
    },

    /// Inspect or drive sign-in throttling
    Throttle {
        #[command(subcommand)]
        action: ThrottleCommands,
    },

    /// Generate shell completions
    #[command(after_help = "Examples:
  tollgate completions bash > ~/.bash_completion.d/tollgate
  tollgate completions zsh > ~/.zfunc/_tollgate")]
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// Try to take the lock for a resource
    #[command(after_help = "Example: tollgate lock acquire purge-expired --ttl 5m")]
    Acquire {
        /// Resource name (stored as lock:<resource>)
        resource: String,
        /// Owner token; a random one is generated if omitted
        #[arg(long)]
        owner: Option<String>,
        /// How long the lock is held before it expires
        #[arg(long, value_parser = humantime::parse_duration)]
        ttl: Option<Duration>,
    },
    /// Release a lock, only if held by the given owner
    #[command(after_help = "Example: tollgate lock release purge-expired 6f1c...")]
    Release {
        /// Resource name
        resource: String,
        /// Owner token printed by `lock acquire`
        owner: String,
    },
}

#[derive(Subcommand)]
enum RateLimitCommands {
    /// Count one request with the given attributes and print the decision
    #[command(after_help = "Example: tollgate rate-limit check --ip 203.0.113.7 --country DE")]
    Check {
        #[arg(long)]
        fingerprint: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        country: Option<String>,
        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IdempotencyCommands {
    /// Claim a key as a request would (acquire, in flight or cached)
    #[command(after_help = "Example: tollgate idempotency check order-42")]
    Check {
        key: String,
    },
    /// Show the record for a key without claiming it
    #[command(after_help = "Example: tollgate idempotency show order-42")]
    Show {
        key: String,
        /// Print the cached response as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ThrottleCommands {
    /// Show failures, lockout and known-good state for a pair
    #[command(after_help = "Example: tollgate throttle status alice@example.com 203.0.113.7")]
    Status {
        /// What is being signed into (e.g. an email)
        identifier: String,
        /// Who is attempting it (e.g. a client IP)
        identity: String,
    },
    /// Record a failed attempt
    Fail {
        identifier: String,
        identity: String,
    },
    /// Record a successful attempt, clearing the failure streak
    Succeed {
        identifier: String,
        identity: String,
        /// Also remember the pair as known-good
        #[arg(long)]
        remember: bool,
    },
    /// Print the delay that applies after a number of failures
    #[command(after_help = "Example: tollgate throttle delay 5")]
    Delay {
        failures: i64,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        ui::print_error(&err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // These need no store.
    match &cli.command {
        Commands::Completions { shell } => {
            generate(*shell, &mut Cli::command(), "tollgate", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Throttle {
            action: ThrottleCommands::Delay { failures },
        } => {
            commands::throttle::delay(&throttle_policy()?, *failures);
            return Ok(());
        }
        _ => {}
    }

    let config = Config::from_env()?;
    init_tracing(&config);

    let coordination = Coordination::connect(&config)?;
    tracing::debug!(timeout_ms = config.store_timeout_ms, "coordination store configured");

    match cli.command {
        Commands::Health => commands::health::run(&coordination).await,
        Commands::Lock { action } => match action {
            LockCommands::Acquire {
                resource,
                owner,
                ttl,
            } => {
                let ttl = ttl.unwrap_or(config.lock_ttl());
                commands::lock::acquire(&coordination, &resource, owner, ttl)
                    .await
                    .map(|_| ())
            }
            LockCommands::Release { resource, owner } => {
                commands::lock::release(&coordination, &resource, &owner)
                    .await
                    .map(|_| ())
            }
        },
        Commands::RateLimit { action } => match action {
            RateLimitCommands::Check {
                fingerprint,
                ip,
                city,
                country,
                json,
            } => {
                let context = tollgate::stores::RequestContext {
                    fingerprint,
                    ip,
                    city,
                    country,
                };
                commands::rate_limit::check(&coordination, &context, json)
                    .await
                    .map(|_| ())
            }
        },
        Commands::Idempotency { action } => match action {
            IdempotencyCommands::Check { key } => {
                commands::idempotency::check(&coordination, &key)
                    .await
                    .map(|_| ())
            }
            IdempotencyCommands::Show { key, json } => {
                commands::idempotency::show(&coordination, &key, json)
                    .await
                    .map(|_| ())
            }
        },
        Commands::Throttle { action } => match action {
            ThrottleCommands::Status {
                identifier,
                identity,
            } => commands::throttle::status(&coordination, &identifier, &identity).await,
            ThrottleCommands::Fail {
                identifier,
                identity,
            } => commands::throttle::fail(&coordination, &identifier, &identity)
                .await
                .map(|_| ()),
            ThrottleCommands::Succeed {
                identifier,
                identity,
                remember,
            } => {
                commands::throttle::succeed(&coordination, &identifier, &identity, remember).await
            }
            // Handled before connecting.
            ThrottleCommands::Delay { .. } => Ok(()),
        },
        Commands::Completions { .. } => Ok(()),
    }
}

/// The configured throttle policy, or the default one when no
/// `TOLLGATE_*` environment is set up.
fn throttle_policy() -> anyhow::Result<ThrottlePolicy> {
    match Config::from_env() {
        Ok(config) => Ok(config.sign_in_throttle().policy),
        Err(tollgate::Error::Config(_)) => Ok(ThrottlePolicy::default()),
        Err(err) => Err(err.into()),
    }
}

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Logs go to stderr so command output stays pipeable.
/// JSON in production, human-readable otherwise.
fn init_tracing(config: &Config) {
    let env_filter = default_env_filter();
    if config.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn lock_ttl_accepts_human_durations() {
        let cli =
            Cli::try_parse_from(["tollgate", "lock", "acquire", "purge", "--ttl", "5m"]).unwrap();

        let Commands::Lock {
            action: LockCommands::Acquire { resource, ttl, owner },
        } = cli.command
        else {
            panic!("expected lock acquire");
        };
        assert_eq!(resource, "purge");
        assert_eq!(ttl, Some(Duration::from_secs(300)));
        assert!(owner.is_none());
    }

    #[test]
    fn rate_limit_check_takes_optional_dimensions() {
        let cli = Cli::try_parse_from(["tollgate", "rate-limit", "check", "--ip", "10.0.0.1"])
            .unwrap();

        let Commands::RateLimit {
            action: RateLimitCommands::Check { ip, country, json, .. },
        } = cli.command
        else {
            panic!("expected rate-limit check");
        };
        assert_eq!(ip.as_deref(), Some("10.0.0.1"));
        assert!(country.is_none());
        assert!(!json);
    }

    #[test]
    fn default_log_level_is_info() {
        let filter = EnvFilter::new(DEFAULT_LOG_FILTER);
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::INFO)
        );
    }
}
