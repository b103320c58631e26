//! seca — engagement-scoped security check runner.
//!
//! Runs authorized read-only checks against an engagement's scope and seals
//! the evidence (audit log, result bundle, hash artifacts, telemetry) under
//! the results root. Ctrl-C cancels the run; partial results are still
//! sealed.

use clap::{Args, Parser, Subcommand};
use seca_audit::RawRecorder;
use seca_bundle::{HashAlgorithm, verify_dir};
use seca_checks::{HttpChecker, HttpMethod, RawCaptureFn, TcpChecker};
use seca_engage::EngagementStore;
use seca_engine::{Checker, TracingProgress};
use seca_run::{RunOptions, RunRequest, execute};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const EXIT_ERROR: i32 = 1;
const EXIT_PARTIAL: i32 = 3;

#[derive(Parser)]
#[command(name = "seca")]
#[command(about = "Authorized security checks with a tamper-evident evidence bundle")]
#[command(version)]
struct Cli {
    /// Path to the engagement catalog
    #[arg(long, global = true, default_value = "engagements.json")]
    catalog: PathBuf,

    /// Root directory for per-engagement evidence
    #[arg(long, global = true, default_value = "results")]
    results_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a checker over an engagement's scope
    Check {
        #[command(subcommand)]
        checker: CheckerKind,
    },

    /// Re-hash an engagement's evidence and compare against its artifacts
    Verify {
        /// Engagement id
        #[arg(long)]
        engagement: String,

        /// Bundle file stem (e.g. http_results)
        #[arg(long, default_value = "http_results")]
        stem: String,

        /// Hash algorithm the evidence was sealed with
        #[arg(long, default_value = "sha256")]
        hash: String,
    },

    /// Show recent run telemetry for an engagement
    Telemetry {
        /// Engagement id
        #[arg(long)]
        engagement: String,

        /// Newest records to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List engagements in the catalog
    Engagements,
}

#[derive(Subcommand)]
enum CheckerKind {
    /// HTTP HEAD/GET observation
    Http {
        #[command(flatten)]
        run: RunArgs,

        /// Use HEAD instead of GET
        #[arg(long)]
        head: bool,

        /// Write raw_<unixnano>.txt evidence sidecars
        #[arg(long)]
        capture_raw: bool,
    },

    /// Bare TCP connect reachability
    Network {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Engagement id
    #[arg(long)]
    engagement: String,

    /// Operator identity (defaults to $USER / $LOGNAME)
    #[arg(long)]
    operator: Option<String>,

    /// Concurrent checker invocations
    #[arg(long, default_value_t = 5)]
    concurrency: usize,

    /// Checks per second, 0 disables rate limiting
    #[arg(long, default_value_t = 10)]
    rate_limit: u32,

    /// Per-check timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Extra attempts for non-ok targets
    #[arg(long, default_value_t = 0)]
    retries: usize,

    /// Hash algorithm for evidence sealing (sha256 or sha512)
    #[arg(long, default_value = "sha256")]
    hash: String,
}

impl RunArgs {
    fn options(&self, command: &str) -> RunOptions {
        RunOptions {
            command: command.to_string(),
            operator: self.operator.clone(),
            concurrency: self.concurrency,
            rate_limit: self.rate_limit,
            timeout: Duration::from_secs(self.timeout_secs),
            retry_count: self.retries,
            hash: self.hash.clone(),
            crawl: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("seca=info".parse()?))
        .init();

    let cli = Cli::parse();
    let store = EngagementStore::load(&cli.catalog);

    match cli.command {
        Commands::Check { checker } => {
            let (run_args, checker, command): (&RunArgs, Arc<dyn Checker>, &str) = match &checker {
                CheckerKind::Http {
                    run,
                    head,
                    capture_raw,
                } => {
                    let method = if *head { HttpMethod::Head } else { HttpMethod::Get };
                    let mut http = HttpChecker::new(method)?;
                    if *capture_raw {
                        let recorder =
                            RawRecorder::new(&cli.results_root.join(&run.engagement), 4096);
                        let capture: RawCaptureFn = Arc::new(move |target, headers, body| {
                            if let Err(e) = recorder.capture(target, headers, body) {
                                warn!(url = target, error = %e, "raw capture failed");
                            }
                        });
                        http = http.with_raw_capture(capture);
                    }
                    (run, Arc::new(http), "check-http")
                }
                CheckerKind::Network { run } => (run, Arc::new(TcpChecker), "check-network"),
            };

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received, cancelling run");
                        cancel.cancel();
                    }
                }
            });

            let request = RunRequest {
                store: &store,
                results_root: &cli.results_root,
                engagement_id: &run_args.engagement,
                checker,
                options: run_args.options(command),
                crawler: None,
                signer: None,
                encryptor: None,
                progress: Some(Arc::new(TracingProgress)),
                cancel,
            };

            match execute(request).await {
                Ok(outcome) => {
                    println!(
                        "{} [{}] {} targets, {} ok, {} error",
                        outcome.engagement_id,
                        outcome.state,
                        outcome.telemetry.target_count,
                        outcome.telemetry.success_count,
                        outcome.telemetry.error_count,
                    );
                    println!("  bundle: {}", outcome.paths.bundle.display());
                    println!("  audit:  {}", outcome.paths.audit.display());
                    if outcome.cancelled {
                        std::process::exit(EXIT_PARTIAL);
                    }
                }
                Err(e) => {
                    error!(error = %e, "run failed");
                    std::process::exit(EXIT_ERROR);
                }
            }
        }

        Commands::Verify {
            engagement,
            stem,
            hash,
        } => {
            seca_engage::validate_engagement_id(&engagement)?;
            let algo: HashAlgorithm = hash.parse()?;
            let dir = cli.results_root.join(&engagement);
            let report = verify_dir(&dir, &stem, algo)?;
            println!("audit:    {}", verdict(report.audit_matches));
            println!("bundle:   {}", verdict(report.bundle_matches));
            println!("metadata: {}", verdict(report.metadata_matches));
            if !report.is_intact() {
                std::process::exit(EXIT_ERROR);
            }
        }

        Commands::Telemetry { engagement, limit } => {
            seca_engage::validate_engagement_id(&engagement)?;
            let dir = cli.results_root.join(&engagement);
            for record in seca_telemetry::read_recent(&dir, &engagement, limit)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }

        Commands::Engagements => {
            for e in store.list() {
                println!(
                    "{}  {} (owner: {}, roe_acknowledged: {}, scope: {} targets)",
                    e.id,
                    e.name,
                    e.owner,
                    e.roe_acknowledged,
                    e.scope.len()
                );
            }
        }
    }

    info!("done");
    Ok(())
}

fn verdict(ok: bool) -> &'static str {
    if ok { "OK" } else { "MISMATCH" }
}
