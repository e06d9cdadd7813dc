use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod abshr;
mod analysis;
mod cli_output;
mod config;
mod error;
mod maps;
mod models;
mod quota;
mod report;
mod subscription;
mod transport;
mod verdict;

use abshr::{AbshrForm, SecurityForensicsBridge};
use analysis::{AnalysisController, ImageUpload};
use cli_output::{OutputMode, OutputWriter};
use config::{ClientConfig, StoredSession};
use quota::{QuotaInitStrategy, QuotaTracker};
use transport::{HttpTransport, SessionJar};

#[derive(Parser)]
#[command(name = "sedq")]
#[command(about = "Submit images for forensic analysis and get a trust verdict", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Analysis server URL (overrides config and SEDQ_BASE_URL)
    #[arg(long, global = true)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how many free analyses are left
    Tries,

    /// Analyze one or more images in a single session
    Analyze {
        /// Images to analyze, in order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Download the PDF report after each successful analysis
        #[arg(long)]
        report: bool,

        /// Also save the ELA / PRNU / Grad-CAM maps as PNG files
        #[arg(long)]
        save_maps: bool,

        /// Directory for reports and maps (default: config or Downloads)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Quota bootstrap: optimistic (no lookup) or server
        #[arg(long)]
        init: Option<String>,
    },

    /// Verify a document image through the Abshr security-forensics bridge
    Abshr {
        /// Image to verify
        image: PathBuf,

        /// Extra form field sent with the image (key=value, repeatable)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Open the returned report URL in the browser
        #[arg(long)]
        open_report: bool,

        /// File a security report for a suspicious document
        #[arg(long)]
        file_report: bool,
    },

    /// Activate a subscription plan for unlimited analyses
    Subscribe {
        /// Plan name (e.g. monthly, yearly)
        plan: String,
    },

    /// Show or change client configuration
    Config {
        /// Action: show, init, set-url, forget-session
        #[arg(default_value = "show")]
        action: String,

        /// Value for set-url
        value: Option<String>,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got: {}", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty field name in: {}", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging (stderr keeps stdout clean for --json)
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let out = OutputWriter::new(if cli.json {
        OutputMode::Json
    } else {
        OutputMode::auto()
    });

    let mut config = ClientConfig::load()?;
    if let Some(server) = cli.server {
        config.base_url = server;
        config.validate()?;
    }
    debug!("Using server {}", config.base_url);

    match cli.command {
        Commands::Tries => {
            let transport = connect(&config)?;
            let quota = QuotaTracker::initialize(
                &transport,
                QuotaInitStrategy::Server,
                config.optimistic_tries,
            )
            .await;
            remember_session(&config, &transport.session());
            out.quota(quota.status());
            Ok(())
        }

        Commands::Analyze {
            images,
            report,
            save_maps,
            out_dir,
            init,
        } => {
            let strategy = match init {
                Some(s) => QuotaInitStrategy::from_str(&s)?,
                None => config.quota_init,
            };
            let out_dir = out_dir.unwrap_or_else(|| config.download_dir());
            run_analysis(&config, &out, &images, strategy, report, save_maps, &out_dir).await
        }

        Commands::Abshr {
            image,
            fields,
            open_report,
            file_report,
        } => {
            let form = AbshrForm {
                image: ImageUpload::from_path(&image).await?,
                fields,
            };

            let transport = connect(&config)?;
            let base = transport.base().clone();
            let session = transport.session();
            let mut bridge = SecurityForensicsBridge::new(transport);

            let spinner = out.spinner("Running security analysis...");
            let outcome = bridge.submit(form).await.cloned();
            spinner.finish_and_clear();
            remember_session(&config, &session);

            out.bridge(&bridge.view());
            match outcome {
                Ok(view) => {
                    if open_report {
                        match abshr::open_report(&base, &view) {
                            Ok(link) => out.success(&format!("Opened {}", link)),
                            Err(e) => out.warning(&format!(
                                "Could not open the browser ({}). Report: {}",
                                e,
                                abshr::report_link(&base, &view.report_url)
                            )),
                        }
                    }
                    if file_report {
                        match abshr::file_report(&view) {
                            Some(ack) => out.success(ack),
                            None => out.line("The document is clean; there is nothing to report."),
                        }
                    }
                }
                Err(e) => out.error(&e),
            }
            Ok(())
        }

        Commands::Subscribe { plan } => {
            let transport = connect(&config)?;
            let session = transport.session();
            let mut controller = AnalysisController::start(
                transport,
                QuotaInitStrategy::Optimistic,
                config.optimistic_tries,
            )
            .await;

            let activation = controller.activate_subscription(&plan).await;
            remember_session(&config, &session);
            match activation {
                Ok(message) => out.success(&message),
                Err(e) => out.error(&e),
            }
            out.quota(controller.view().quota);
            Ok(())
        }

        Commands::Config { action, value } => match action.as_str() {
            "show" => {
                out.section("Client Configuration");
                out.line(&format!("Server: {}", config.base_url));
                out.line(&format!("Timeout: {}s", config.timeout_secs));
                out.line(&format!("Quota init: {:?}", config.quota_init));
                out.line(&format!("Downloads: {}", config.download_dir().display()));
                out.line(&format!(
                    "Config file: {}",
                    ClientConfig::config_file_path()?.display()
                ));
                Ok(())
            }
            "init" => {
                let path = ClientConfig::default().save()?;
                out.saved("Default configuration", &path);
                Ok(())
            }
            "set-url" => {
                let url = value.ok_or_else(|| anyhow!("Usage: sedq config set-url <URL>"))?;
                config.base_url = url;
                let path = config.save()?;
                out.saved("Configuration", &path);
                Ok(())
            }
            "forget-session" => {
                if StoredSession::forget(&StoredSession::file_path()?)? {
                    out.success("Saved server session removed");
                } else {
                    out.line("No saved server session");
                }
                Ok(())
            }
            other => Err(anyhow!(
                "Unknown config action: {}. Supported: show, init, set-url, forget-session",
                other
            )),
        },
    }
}

/// HTTP client for the configured server, resuming the saved server session
fn connect(config: &ClientConfig) -> Result<HttpTransport> {
    let transport = HttpTransport::new(&config.base_url, config.timeout())?;
    let saved = StoredSession::file_path()
        .ok()
        .and_then(|path| StoredSession::load(&path, &config.base_url));
    if let Some(cookie) = saved {
        debug!("Resuming saved server session");
        transport.session().restore(&cookie);
    }
    Ok(transport)
}

/// Keep the server session so quota and subscription carry over to the next run
fn remember_session(config: &ClientConfig, session: &SessionJar) {
    let Some(cookie) = session.header() else {
        return;
    };
    let stored = StoredSession {
        base_url: config.base_url.clone(),
        cookie,
    };
    if let Err(e) = StoredSession::file_path().and_then(|path| stored.save(&path)) {
        warn!("Could not save the server session: {}", e);
    }
}

async fn run_analysis(
    config: &ClientConfig,
    out: &OutputWriter,
    images: &[PathBuf],
    strategy: QuotaInitStrategy,
    want_report: bool,
    save_maps: bool,
    out_dir: &Path,
) -> Result<()> {
    let transport = connect(config)?;
    let session = transport.session();
    let mut controller =
        AnalysisController::start(transport, strategy, config.optimistic_tries).await;
    let outcome =
        analyze_images(&mut controller, out, images, want_report, save_maps, out_dir).await;
    remember_session(config, &session);
    outcome
}

async fn analyze_images(
    controller: &mut AnalysisController<HttpTransport>,
    out: &OutputWriter,
    images: &[PathBuf],
    want_report: bool,
    save_maps: bool,
    out_dir: &Path,
) -> Result<()> {
    out.quota(controller.view().quota);

    for path in images {
        if !controller.view().submit_enabled {
            out.warning("Submission is locked until you subscribe (sedq subscribe <plan>).");
            break;
        }

        out.section(&format!("Analysis: {}", path.display()));
        let upload = ImageUpload::from_path(path).await?;

        let spinner = out.spinner("Analyzing...");
        let outcome = controller.submit(&upload).await.map(|_| ());
        spinner.finish_and_clear();

        out.analysis(&controller.view());
        if let Err(e) = outcome {
            out.error(&e);
            continue;
        }

        if save_maps {
            if let Some(result) = controller.last_result() {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                out.maps(&maps::export_maps(result, out_dir, &stem)?);
            }
        }

        if want_report {
            let spinner = out.spinner("Generating report...");
            let artifact = controller.download_report().await;
            spinner.finish_and_clear();

            match artifact {
                Ok(artifact) => {
                    let saved = artifact.save(out_dir)?;
                    out.saved("Report", &saved);
                }
                Err(e) => out.error(&e),
            }
        }
    }

    info!("{}", controller.view().quota_label);
    Ok(())
}
