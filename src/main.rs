use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use whereis_gateway::api::ApiServerBuilder;
use whereis_gateway::db::{self, DeviceRepo};
use whereis_gateway::dispatch::{HttpPushNotifier, PendingInvocations};
use whereis_gateway::security::{IdentityVerifier, SessionManager};
use whereis_gateway::{CommandCatalog, Config};

/// Whereis - device registry and remote command gateway
#[derive(Parser)]
#[command(name = "whereis", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the command catalog
    Commands,
    /// List the devices registered to an owner
    Devices {
        /// Owner identity (email)
        #[arg(short, long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,whereis_gateway=info",
        1 => "info,whereis_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    let catalog = CommandCatalog::load_or_builtin(&config.commands_file)?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Commands => {
                print_commands(&catalog);
                Ok(())
            }
            Command::Devices { owner } => list_devices(&config, &owner),
        };
    }

    serve(config, catalog).await
}

async fn serve(config: Config, catalog: CommandCatalog) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        db = %config.db_path.display(),
        commands = catalog.len(),
        "starting whereis gateway"
    );

    let pool = db::init(&config.db_path)?;
    let audience = config.audience();

    let secret = config.session.secret.unwrap_or_else(|| {
        tracing::warn!("WHEREIS_SESSION_SECRET not set, sessions will not survive a restart");
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        SecretString::from(random)
    });

    let sessions = Arc::new(SessionManager::new(
        &secret,
        &config.session.cookie_name,
        config.session.ttl_secs,
        config.session.secure_cookie,
    ));
    let verifier = Arc::new(IdentityVerifier::new(
        config.session.verifier_url,
        audience,
    )?);
    let notifier = Arc::new(HttpPushNotifier::new(Duration::from_secs(
        config.dispatch.push_timeout_secs,
    ))?);

    let pending = Arc::new(PendingInvocations::new());
    if let Some(ttl) = config.dispatch.invocation_ttl_secs {
        tracing::info!(ttl_secs = ttl, "pending invocations expire");
        drop(pending.clone().spawn_sweeper(Duration::from_secs(ttl)));
    }

    let mut builder = ApiServerBuilder::new(pool, Arc::new(catalog), notifier)
        .host(config.server.host)
        .port(config.server.port)
        .pending(pending)
        .sessions(sessions)
        .verifier(verifier)
        .sms_enabled(config.sms.enabled);
    if config.sms.enabled {
        builder = builder.sms_rate_limit(config.sms.rate_limit);
    }

    let server = builder.build().spawn();

    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

fn print_commands(catalog: &CommandCatalog) {
    for command in catalog.all() {
        println!("{:>4}  {:<16} {}", command.id, command.name, command.description);
    }
}

fn list_devices(config: &Config, owner: &str) -> anyhow::Result<()> {
    let repo = DeviceRepo::new(db::init(&config.db_path)?);
    let devices = repo.list_for_owner(owner)?;

    if devices.is_empty() {
        println!("No devices registered to {owner}");
        return Ok(());
    }

    for device in devices {
        let commands = repo.command_ids(device.id)?;
        println!(
            "{:>4}  {:<20} {}  pin={} commands={commands:?}",
            device.id,
            device.name,
            device.endpoint,
            if device.has_sms_pin() { "yes" } else { "no" },
        );
    }

    Ok(())
}
