use crate::config::EngineConfig;
use crate::dispatcher::{DispatchSummary, Dispatcher, Disposition};
use crate::echo::{demo_registry, register_demo_pages};
use crate::logging::{init_logging_with_config, LogConfig};
use crate::request::Request;
use crate::transport::{MemoryChannel, SentResponse};
use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use http::Method;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long `probe` waits for a delayed or streamed response to land.
const PROBE_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line interface for the chainrouter engine
#[derive(Parser, Debug)]
#[command(name = "chainrouter")]
#[command(about = "Chain dispatch engine probe", long_about = None)]
pub struct Cli {
    /// Log engine activity to stdout (pretty, debug level)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch one request through the demo pages and print the response
    Probe(ProbeArgs),
    /// Print the effective engine configuration as YAML
    Config {
        /// YAML configuration file; environment variables still override it
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    pub method: String,

    /// Request target, path plus optional query
    #[arg(short, long)]
    pub target: String,

    /// Request header as `name:value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    pub body: Option<String>,

    /// YAML configuration file; environment variables still override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Also print the dispatch summary and Prometheus metrics
    #[arg(long, default_value_t = false)]
    pub metrics: bool,
}

/// Result of a probe: what the channel received and how dispatch ended.
#[derive(Debug)]
pub struct ProbeReport {
    pub summary: DispatchSummary,
    pub response: Option<SentResponse>,
    pub metrics: String,
}

impl ProbeReport {
    /// Status line, headers, blank line, body.
    #[must_use]
    pub fn render(&self, with_metrics: bool) -> String {
        let mut out = String::new();
        match &self.response {
            Some(resp) => {
                let _ = writeln!(
                    out,
                    "HTTP/1.1 {} {}",
                    resp.status.as_u16(),
                    resp.status.canonical_reason().unwrap_or("")
                );
                for (name, value) in resp.headers.iter() {
                    let _ = writeln!(out, "{}: {}", name, value.to_str().unwrap_or("<binary>"));
                }
                out.push('\n');
                out.push_str(&resp.body_text());
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            None => out.push_str("<no response sent>\n"),
        }
        if with_metrics {
            if let Ok(summary) = serde_json::to_string_pretty(&self.summary) {
                let _ = writeln!(out, "\n{summary}");
            }
            let _ = write!(out, "\n{}", self.metrics);
        }
        out
    }
}

fn parse_header(raw: &str) -> anyhow::Result<(&str, &str)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header {raw:?} must look like name:value"))?;
    let name = name.trim();
    anyhow::ensure!(!name.is_empty(), "header {raw:?} has an empty name");
    Ok((name, value.trim()))
}

/// Build the request described by `args`.
pub fn build_request(args: &ProbeArgs) -> anyhow::Result<Request> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method {:?}", args.method))?;
    let mut request = Request::new(method, &args.target);
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value);
    }
    if let Some(body) = &args.body {
        request = request.with_body(body.as_bytes().to_vec());
    }
    Ok(request)
}

/// Dispatch one request through the demo pages on an in-memory channel.
pub fn probe(args: &ProbeArgs) -> anyhow::Result<ProbeReport> {
    let config = EngineConfig::resolve(args.config.as_deref())?;
    may::config().set_stack_size(config.pool.stack_size);

    let dispatcher = Dispatcher::from_config(&config, Arc::new(demo_registry()))?;
    register_demo_pages(&dispatcher)?;

    let request = build_request(args)?;
    let channel = Arc::new(MemoryChannel::new());
    let summary = dispatcher.dispatch_blocking(request, channel.clone());
    let response = match summary.disposition {
        Disposition::Abandoned => None,
        _ => channel
            .wait_for(1, PROBE_SEND_TIMEOUT)
            .into_iter()
            .next(),
    };
    Ok(ProbeReport {
        summary,
        response,
        metrics: dispatcher.render_metrics(),
    })
}

/// Run the parsed command line.
pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    if cli.verbose {
        init_logging_with_config(&LogConfig::development())?;
    }
    match cli.command {
        Commands::Probe(args) => {
            let report = probe(&args)?;
            print!("{}", report.render(args.metrics));
            Ok(())
        }
        Commands::Config { config } => {
            let config = EngineConfig::resolve(config.as_deref())?;
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}
