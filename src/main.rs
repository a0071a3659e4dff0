//! erpbridge CLI entrypoint
//! Resolves connection settings and runs one query against the ERP backend.
#![deny(unsafe_code)]

// Internal imports (std, crate)
use std::path::PathBuf;

// External imports (alphabetized)
use anyhow::{Context, anyhow, bail};
use clap::Parser;
use erpbridge_client::{ClientConfig, ErpClient, QueryHelpers, RpcError, ServiceAccountConfig};
use serde_json::{Map, Value, json};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "erpbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Debug)]
pub struct ConnectionArgs {
    /// TOML config file (defaults to the user config directory)
    #[arg(long, global = true, env = "ERPBRIDGE_CONFIG")]
    config: Option<PathBuf>,
    /// Base URL of the ERP backend
    #[arg(long, global = true, env = "ERPBRIDGE_URL")]
    url: Option<Url>,
    /// Database for the service account login
    #[arg(long, global = true, env = "ERPBRIDGE_DB")]
    database: Option<String>,
    /// Service account login
    #[arg(long, global = true, env = "ERPBRIDGE_LOGIN")]
    login: Option<String>,
    /// Service account password
    #[arg(long, global = true, env = "ERPBRIDGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Run as the end user owning this session cookie instead of a service account
    #[arg(long, global = true)]
    user_session: Option<String>,
    /// Service account to run as
    #[arg(long, global = true, default_value = "default")]
    account: String,
    /// Deadline for each call, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Log the service account in and print who it is
    Login,
    /// Call any model method
    Call {
        /// Model name, e.g. res.partner
        model: String,
        /// Method name, e.g. search_read
        method: String,
        /// Positional arguments as a JSON array
        #[arg(long)]
        args: Option<String>,
        /// Keyword arguments as a JSON object
        #[arg(long)]
        kwargs: Option<String>,
    },
    /// Search records and read their fields
    #[command(name = "search-read")]
    SearchRead {
        model: String,
        /// Search domain as JSON
        #[arg(long, default_value = "[]")]
        domain: String,
        /// Comma-separated field names
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(long)]
        limit: Option<u32>,
        /// Sort specification, e.g. "name asc"
        #[arg(long)]
        order: Option<String>,
    },
    /// Create one record and print its id
    Create {
        model: String,
        /// Field values as a JSON object
        #[arg(long)]
        values: String,
    },
    /// Update records
    Write {
        model: String,
        /// Comma-separated record ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
        /// Field values as a JSON object
        #[arg(long)]
        values: String,
    },
    /// Delete records
    Unlink {
        model: String,
        /// Comma-separated record ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let config = load_config(&cli.connection)?;
    let client = ErpClient::new(config).context("Failed to build ERP client")?;

    let output = match &cli.command {
        Commands::Login => run_login(&client, &cli.connection).await?,
        Commands::Call {
            model,
            method,
            args,
            kwargs,
        } => {
            let args = match args {
                Some(raw) => parse_array(raw, "--args")?,
                None => Vec::new(),
            };
            let kwargs = match kwargs {
                Some(raw) => parse_object(raw, "--kwargs")?,
                None => Map::new(),
            };
            query_handle(&client, &cli.connection)?
                .call_method(model, method, args, kwargs)
                .await
                .map_err(call_failed)?
        }
        Commands::SearchRead {
            model,
            domain,
            fields,
            limit,
            order,
        } => {
            let domain = Value::Array(parse_array(domain, "--domain")?);
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            let rows = query_handle(&client, &cli.connection)?
                .search_read(model, domain, &fields, *limit, order.as_deref())
                .await
                .map_err(call_failed)?;
            Value::Array(rows)
        }
        Commands::Create { model, values } => {
            let values = parse_object(values, "--values")?;
            let id = query_handle(&client, &cli.connection)?
                .create(model, values)
                .await
                .map_err(call_failed)?;
            json!(id)
        }
        Commands::Write { model, ids, values } => {
            let values = parse_object(values, "--values")?;
            let written = query_handle(&client, &cli.connection)?
                .write(model, ids, values)
                .await
                .map_err(call_failed)?;
            json!(written)
        }
        Commands::Unlink { model, ids } => {
            let removed = query_handle(&client, &cli.connection)?
                .unlink(model, ids)
                .await
                .map_err(call_failed)?;
            json!(removed)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Resolve settings: config file first, then flag and env overrides
fn load_config(args: &ConnectionArgs) -> anyhow::Result<ClientConfig> {
    let mut config = match (&args.config, &args.url) {
        (Some(path), _) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        (None, Some(url)) => ClientConfig::builder()
            .base_url(url.as_str())
            .build()
            .context("Invalid connection settings")?,
        (None, None) => {
            let path = ClientConfig::default_path()
                .context("No --url given and no user config directory available")?;
            ClientConfig::from_file(&path).with_context(|| {
                format!("No --url given and failed to load {}", path.display())
            })?
        }
    };

    if let Some(url) = &args.url {
        config.base_url = url.clone();
    }
    if let Some(secs) = args.timeout {
        config.timeout_secs = secs;
    }

    match (&args.database, &args.login, &args.password) {
        (Some(database), Some(login), Some(password)) => {
            config.service_accounts.insert(
                args.account.clone(),
                ServiceAccountConfig {
                    database: database.clone(),
                    login: login.clone(),
                    password: password.clone(),
                },
            );
        }
        (None, None, None) => {}
        _ => bail!("--database, --login and --password must be given together"),
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn query_handle(client: &ErpClient, args: &ConnectionArgs) -> anyhow::Result<QueryHelpers> {
    match &args.user_session {
        Some(token) => Ok(client.as_user(token.clone())),
        None => client
            .as_service_account(&args.account)
            .with_context(|| format!("Cannot run as service account '{}'", args.account)),
    }
}

async fn run_login(client: &ErpClient, args: &ConnectionArgs) -> anyhow::Result<Value> {
    if args.user_session.is_some() {
        bail!("login applies to service accounts, not --user-session");
    }

    let session = client.login(&args.account).await.map_err(|e| match e {
        erpbridge_client::ClientError::Rpc(rpc) => call_failed(rpc),
        other => anyhow::Error::new(other)
            .context(format!("Cannot log in as service account '{}'", args.account)),
    })?;

    info!(account = %args.account, uid = ?session.uid(), "Logged in");

    Ok(json!({
        "account": args.account,
        "uid": session.uid(),
        "name": session.display_name(),
    }))
}

/// Full detail goes to the log; the user sees the safe message only
fn call_failed(error: RpcError) -> anyhow::Error {
    error!(kind = ?error.kind(), error = %error, "Call failed");
    anyhow!(error.user_message())
}

fn parse_json(raw: &str, flag: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Failed to parse {} as JSON", flag))
}

fn parse_array(raw: &str, flag: &str) -> anyhow::Result<Vec<Value>> {
    match parse_json(raw, flag)? {
        Value::Array(items) => Ok(items),
        other => bail!("{} must be a JSON array, got {}", flag, other),
    }
}

fn parse_object(raw: &str, flag: &str) -> anyhow::Result<Map<String, Value>> {
    match parse_json(raw, flag)? {
        Value::Object(map) => Ok(map),
        other => bail!("{} must be a JSON object, got {}", flag, other),
    }
}
