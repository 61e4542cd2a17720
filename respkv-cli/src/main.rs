//! # respkv Command-Line Demo
//!
//! Purpose: Drive GET and SET against a Redis-compatible server from the
//! shell, exercising the pooled client end to end.
//!
//! Usage:
//!
//! ```text
//! respkv-cli [--addr HOST:PORT] [--timeout-ms N] [--pool-size N] get KEY
//! respkv-cli [--addr HOST:PORT] [--timeout-ms N] [--pool-size N] set KEY VALUE
//! ```
//!
//! Set `RUST_LOG=respkv_client=trace` to follow each call through the pool.

use std::env;
use std::ffi::OsString;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use respkv_client::{Client, ClientConfig, Context, DEFAULT_POOL_SIZE};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = ":6379";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, PartialEq, Eq)]
enum Action {
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Debug)]
struct CliConfig {
    addr: String,
    timeout: Duration,
    pool_size: usize,
    action: Action,
}

/// Converts raw process arguments, rejecting any that are not UTF-8.
fn collect_args(args: impl IntoIterator<Item = OsString>) -> Result<Vec<String>> {
    args.into_iter()
        .map(|arg| {
            arg.into_string()
                .map_err(|raw| anyhow!("argument is not valid UTF-8: {:?}", raw))
        })
        .collect()
}

impl CliConfig {
    fn from_args(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut addr = DEFAULT_ADDR.to_string();
        let mut timeout_ms = DEFAULT_TIMEOUT_MS;
        let mut pool_size = DEFAULT_POOL_SIZE;
        let mut positional = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--addr" => addr = args.next().context("--addr needs a value")?,
                "--timeout-ms" => {
                    let raw = args.next().context("--timeout-ms needs a value")?;
                    timeout_ms = raw.parse().with_context(|| format!("invalid timeout {:?}", raw))?;
                }
                "--pool-size" => {
                    let raw = args.next().context("--pool-size needs a value")?;
                    pool_size = raw.parse().with_context(|| format!("invalid pool size {:?}", raw))?;
                }
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let action = match (positional.next().as_deref(), positional.next(), positional.next()) {
            (Some("get"), Some(key), None) => Action::Get { key },
            (Some("set"), Some(key), Some(value)) => Action::Set { key, value },
            _ => bail!("usage: respkv-cli [--addr HOST:PORT] [--timeout-ms N] [--pool-size N] get KEY | set KEY VALUE"),
        };
        if positional.next().is_some() {
            bail!("too many arguments");
        }

        Ok(CliConfig {
            addr,
            timeout: Duration::from_millis(timeout_ms),
            pool_size,
            action,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CliConfig::from_args(collect_args(env::args_os().skip(1))?)?;
    let ctx = Context::with_timeout(config.timeout);
    let client = Client::with_config(
        &ctx,
        ClientConfig {
            addr: config.addr.clone(),
            pool_size: config.pool_size,
            ..ClientConfig::default()
        },
    )
    .context("create client")?;

    match &config.action {
        Action::Get { key } => {
            let value = client
                .get(&ctx, key.as_bytes())
                .with_context(|| format!("GET {} from {}", key, config.addr))?;
            match value {
                Some(data) => println!("{}", String::from_utf8_lossy(&data)),
                None => {
                    info!(key = %key, "key does not exist");
                    println!("(nil)");
                }
            }
        }
        Action::Set { key, value } => {
            client
                .set(&ctx, key.as_bytes(), value.as_bytes())
                .with_context(|| format!("SET {} on {}", key, config.addr))?;
            println!("OK");
        }
    }

    client.close().context("close client")?;
    Ok(())
}
