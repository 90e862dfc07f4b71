use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wirebot::{Client, Config, ConfigError, GatewayFrame, Opcode};

/// Longest payload excerpt echoed back to a channel, leaving room for the
/// code fence under the 2000 character message limit.
const ECHO_LIMIT: usize = 1950;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] wirebot::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "wirebot", about = "Gateway and REST client for Discord-style bots")]
struct Cli {
    #[arg(long, env = "WIREBOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "WIREBOT_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "WIREBOT_SHARD", default_value_t = 0)]
    shard: u32,

    #[arg(long, env = "WIREBOT_SHARD_COUNT", default_value_t = 1)]
    shard_count: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Gateway(GatewayCommand),
    Api(ApiCommand),
}

#[derive(Args, Debug)]
struct GatewayCommand {
    #[command(subcommand)]
    command: GatewaySubcommand,
}

#[derive(Subcommand, Debug)]
enum GatewaySubcommand {
    /// Log every gateway payload until interrupted.
    Log {
        /// Also post each payload, except bot messages, to this channel.
        #[arg(long)]
        channel: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ApiCommand {
    #[arg(value_enum)]
    method: ApiMethod,

    /// Path below the base URL, e.g. `/users/@me`.
    path: String,

    /// JSON body for post, put and patch.
    #[arg(long)]
    data: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ApiMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let client = Client::new(config_from(&cli)?)?;

    match cli.command {
        Command::Gateway(gateway) => match gateway.command {
            GatewaySubcommand::Log { channel } => run_gateway_log(&client, channel).await,
        },
        Command::Api(api) => run_api(&client, api).await,
    }
}

fn config_from(cli: &Cli) -> Result<Config, ConfigError> {
    config_with_env(cli, |key| std::env::var(key).ok())
}

/// Flag values layered over the `WIREBOT_*` environment, so settings without
/// a flag (retries, reconnect delay, timeouts) still come from the env.
fn config_with_env(
    cli: &Cli,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let flags = [
        ("WIREBOT_TOKEN", cli.token.clone()),
        ("WIREBOT_BASE_URL", cli.base_url.clone()),
        ("WIREBOT_SHARD", Some(cli.shard.to_string())),
        ("WIREBOT_SHARD_COUNT", Some(cli.shard_count.to_string())),
    ];
    Config::from_lookup(|key| {
        flags
            .iter()
            .find(|(name, _)| *name == key)
            .and_then(|(_, value)| value.clone())
            .or_else(|| env(key))
    })
}

async fn run_gateway_log(client: &Client, channel: Option<String>) -> Result<(), CliError> {
    let rest = client.rest().clone();
    client.on_gateway_payload(move |frame| {
        info!(op = frame.op, t = ?frame.t, s = ?frame.s, d = %frame.d, "payload");

        let Some(channel) = channel.as_deref() else {
            return;
        };
        let Some(content) = echo_message(frame) else {
            return;
        };
        let rest = rest.clone();
        let path = format!("/channels/{channel}/messages");
        tokio::spawn(async move {
            if let Err(e) = rest.post(&path, &content).await {
                warn!(error = %e, path = %path, "echo failed");
            }
        });
    });

    client.connect().await?;
    info!(
        shard = client.current_shard(),
        shards = client.shard_count(),
        discovered = ?client.gateway().discovered_shards(),
        "connected; press ctrl-c to stop"
    );

    tokio::select! {
        () = client.wait_closed() => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted, closing gateway");
            client.close();
            client.wait_closed().await;
        }
    }
    Ok(())
}

/// Message body echoing `frame` as a JSON code block, or `None` for
/// messages written by bots.
fn echo_message(frame: &GatewayFrame) -> Option<String> {
    if is_bot_message(frame) {
        return None;
    }
    let pretty = serde_json::to_string_pretty(frame).ok()?;
    let excerpt = match pretty.char_indices().nth(ECHO_LIMIT) {
        Some((cut, _)) => format!("{}...", &pretty[..cut]),
        None => pretty,
    };
    Some(json!({ "content": format!("```javascript\n{excerpt}\n```") }).to_string())
}

fn is_bot_message(frame: &GatewayFrame) -> bool {
    frame.opcode() == Some(Opcode::Dispatch)
        && frame.t.as_deref() == Some("MESSAGE_CREATE")
        && frame.d["author"]["bot"].as_bool().unwrap_or(false)
}

async fn run_api(client: &Client, api: ApiCommand) -> Result<(), CliError> {
    let data = match api.data.as_deref() {
        Some(raw) => serde_json::from_str::<Value>(raw)?.to_string(),
        None => "{}".to_owned(),
    };

    let body = match api.method {
        ApiMethod::Get => client.get(&api.path).await?,
        ApiMethod::Post => client.post(&api.path, &data).await?,
        ApiMethod::Put => client.put(&api.path, &data).await?,
        ApiMethod::Patch => client.patch(&api.path, &data).await?,
        ApiMethod::Delete => client.delete(&api.path).await?,
    };
    println!("{}", render_body(&body));
    Ok(())
}

/// Pretty-print JSON bodies; anything else is returned as-is.
fn render_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| body.to_owned())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
