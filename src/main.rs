use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use mail_triage::cli::{self, Cli, Commands};
use mail_triage::config::Config;
use mail_triage::error::TriageError;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl MultiProgressMakeWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self { multi }
    }
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: mail-triage --help");
        process::exit(cli::exit_code(&e));
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mail_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mail_triage=info,warn"))
    };

    // Shared MultiProgress: logs print above spinners
    let multi_progress = Arc::new(MultiProgress::new());
    let make_writer = MultiProgressMakeWriter::new(Arc::clone(&multi_progress));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Auth { account, force } => {
            tracing::info!("Authenticating account {}", account);
            let email = cli::authenticate_account(&cli, account, *force).await?;
            println!("Successfully authenticated account '{}'", account);
            println!("Connected to mailbox: {}", email);
            Ok(())
        }

        Commands::Scan {
            newer_than_days,
            json,
            output,
            llm_fallback,
        } => {
            let report = cli::run_scan(
                &cli,
                newer_than_days.as_deref(),
                *llm_fallback,
                (*multi_progress).clone(),
            )
            .await?;

            let rendered = serde_json::to_string_pretty(&report)?;
            if let Some(path) = output {
                tokio::fs::write(path, &rendered).await?;
                tracing::info!("Report written to {:?}", path);
            }

            if *json {
                println!("{}", rendered);
            } else {
                print!("{}", cli::render_summary(&report));
            }
            Ok(())
        }

        Commands::Classify { input } => {
            let request = cli::read_classify_request(input.as_ref()).await?;
            let response = cli::run_classify(&cli, &request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(TriageError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - accounts: one entry per mailbox, each with its own token cache");
            println!("  - scan.default_days: lookback window when --newer-than-days is omitted");
            println!("  - classification.labels / classification.rules: deterministic triage");
            println!("  - llm.model / llm.api_key_env: language model used by --llm-fallback");
            Ok(())
        }

        Commands::Rules => {
            let config = Config::load(&cli.config).await?;
            print!("{}", cli::render_rules(&config.rule_classifier()?));
            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(triage_err) = error.downcast_ref::<TriageError>() {
        match triage_err {
            TriageError::NoAccountsConfigured => {
                eprintln!("\nHint: Add at least one [[accounts]] entry to your config file.");
                eprintln!("      Run: mail-triage init-config");
            }
            TriageError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: mail-triage auth --account <name> --force");
            }
            TriageError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: You've hit Gmail API rate limits.");
                eprintln!("      Wait a few seconds and try again.");
                eprintln!("      Consider reducing scan.max_concurrent_fetches in config.");
            }
            TriageError::Timeout { .. } => {
                eprintln!("\nHint: The scan ran out of time. Raise scan.timeout_secs");
                eprintln!("      or scan a shorter window with --newer-than-days.");
            }
            TriageError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: mail-triage init-config --force");
            }
            _ => {}
        }
    }
}
