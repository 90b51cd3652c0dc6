mod commands;
mod errors;

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use crate::{
    commands::Commands,
    errors::{CliError, Result},
};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use lookout_protocol::{
    client::Client,
    errors::ClientError,
    protocol::{ErrorKind, FunctionId, FunctionInfo, LogPage, LogQuery, Response, ResponseData},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Lookout - read function logs through a lookout gateway
#[derive(Parser, Debug)]
#[command(name = "lookout")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Gateway address (host:port)
    #[arg(
        short,
        long,
        global = true,
        env = "LOOKOUT_GATEWAY",
        default_value = "127.0.0.1:7070"
    )]
    pub gateway: String,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub timeout: u64,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let timeout = Duration::from_secs(cli.timeout);
    let client = Client::connect(&cli.gateway, timeout).await?;

    match cli.command {
        Commands::Ping => {
            expect_ok(client.ping(timeout).await?)?;
            println!("Gateway {} is up", client.address());
        }
        Commands::Describe { function } => {
            let function = parse_function(&function)?;
            match expect_data(client.describe_function(function, timeout).await?)? {
                ResponseData::Function(info) => print_function(&info),
                _ => return Err(CliError::UnexpectedResponse("expected function info")),
            }
        }
        Commands::Count { tenant } => {
            match expect_data(client.count_functions(tenant, timeout).await?)? {
                ResponseData::Count(count) => println!("{}", count),
                _ => return Err(CliError::UnexpectedResponse("expected a count")),
            }
        }
        Commands::Logs {
            function,
            instance,
            bytes,
            pages,
            backward_pos,
            forward_pos,
            worker_id,
            follow,
            interval_ms,
            positions,
        } => {
            let source = GatewayLogs {
                client: &client,
                function: parse_function(&function)?,
                instance,
                worker_id,
                timeout,
            };
            let report = |page: &LogPage| {
                if positions {
                    eprintln!(
                        "[forward {} backward {}]",
                        page.forward_index, page.backward_index
                    );
                }
            };

            if follow {
                let start = match forward_pos.filter(|p| *p > 0) {
                    Some(position) => position,
                    None => {
                        let last = read_backward_pages(&source, bytes, 0, 1).await?;
                        for page in &last {
                            write_page(page)?;
                            report(page);
                        }
                        last.last().map(|p| p.forward_index).unwrap_or(0)
                    }
                };
                let stopped_at = follow_logs(
                    &source,
                    bytes,
                    start,
                    Duration::from_millis(interval_ms),
                    async {
                        let _ = tokio::signal::ctrl_c().await;
                    },
                    |page| {
                        if let Err(e) = write_page(page) {
                            debug!("Failed to write log page: {}", e);
                        }
                        report(page);
                    },
                )
                .await?;
                debug!("Stopped following at position {}", stopped_at);
            } else if let Some(position) = forward_pos {
                let page = expect_page(source.fetch(LogQuery::forward(bytes, position)).await?)?;
                write_page(&page)?;
                report(&page);
            } else {
                let start = backward_pos.unwrap_or(0);
                for page in read_backward_pages(&source, bytes, start, pages).await? {
                    write_page(&page)?;
                    report(&page);
                }
            }
        }
    }

    Ok(())
}

fn parse_function(s: &str) -> Result<FunctionId> {
    FunctionId::parse(s).ok_or_else(|| CliError::InvalidFunction(s.to_string()))
}

fn expect_ok(response: Response) -> Result<Option<ResponseData>> {
    match response {
        Response::Ok { data, .. } => Ok(data),
        Response::Error { kind, message } => Err(CliError::Server { kind, message }),
    }
}

fn expect_data(response: Response) -> Result<ResponseData> {
    expect_ok(response)?.ok_or(CliError::UnexpectedResponse("missing response data"))
}

fn expect_page(response: Response) -> Result<LogPage> {
    match expect_data(response)? {
        ResponseData::Page(page) => Ok(page),
        _ => Err(CliError::UnexpectedResponse("expected a log page")),
    }
}

fn write_page(page: &LogPage) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(page.logs.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn print_function(info: &FunctionInfo) {
    println!(
        "{} ({}, parallelism {})",
        info.function, info.component, info.parallelism
    );
    if info.instances.is_empty() {
        println!("  no placements cached");
        return;
    }
    for instance in &info.instances {
        println!(
            "  instance {:<4} {:<8} worker {:<32} confirmed {}",
            instance.instance_id,
            if instance.running { "running" } else { "stopped" },
            instance.worker_id,
            format_timestamp(instance.last_query_time)
        );
    }
}

/// Milliseconds since the epoch, in local time
fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Page fetches used by the paging loops, so they can run against a mock.
trait LogSource {
    async fn fetch(&self, query: LogQuery) -> std::result::Result<Response, ClientError>;
}

struct GatewayLogs<'a> {
    client: &'a Client,
    function: FunctionId,
    instance: u32,
    worker_id: Option<String>,
    timeout: Duration,
}

impl LogSource for GatewayLogs<'_> {
    async fn fetch(&self, query: LogQuery) -> std::result::Result<Response, ClientError> {
        self.client
            .fetch_log(
                self.function.clone(),
                self.instance,
                self.worker_id.clone(),
                query,
                self.timeout,
            )
            .await
    }
}

/// Walk back up to `pages` pages from `start` (0 = end of file).
/// Pages come back oldest first.
async fn read_backward_pages(
    source: &impl LogSource,
    bytes: i64,
    start: i64,
    pages: u32,
) -> Result<Vec<LogPage>> {
    let mut position = start;
    let mut collected = Vec::new();
    for _ in 0..pages.max(1) {
        let page = expect_page(source.fetch(LogQuery::backward(bytes, position)).await?)?;
        position = page.backward_index;
        collected.push(page);
        if position <= 0 {
            break;
        }
    }
    collected.reverse();
    Ok(collected)
}

/// Poll forward from `position` until `shutdown` resolves.
///
/// Non-empty pages are handed to `on_page` and the next page is requested
/// right away. Once caught up, the loop waits `interval` between polls. An
/// `Io` error from the agent means the writer has not finished a line yet and
/// is retried. Returns the position reached.
async fn follow_logs(
    source: &impl LogSource,
    bytes: i64,
    mut position: i64,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
    mut on_page: impl FnMut(&LogPage),
) -> Result<i64> {
    tokio::pin!(shutdown);

    loop {
        let response = tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(position),
            response = source.fetch(LogQuery::forward(bytes, position)) => response?,
        };

        let mut caught_up = true;
        match response {
            Response::Error {
                kind: ErrorKind::Io,
                message,
            } => debug!("No complete line past {}: {}", position, message),
            response => {
                let page = expect_page(response)?;
                if !page.is_empty() {
                    on_page(&page);
                    caught_up = false;
                }
                position = page.forward_index;
            }
        }

        if caught_up {
            tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(position),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
