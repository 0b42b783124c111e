use anyhow::Result;
use clap::Parser;
use gmail_regex_rules::actions::RemoteClient;
use gmail_regex_rules::auth::{self, CredentialProvider, OAuthCredentialProvider, StaticCredentialProvider};
use gmail_regex_rules::cli::{self, Cli, Commands, RulesCommand, SettingsCommand};
use gmail_regex_rules::client::{GmailApi, MailApi};
use gmail_regex_rules::commands::CommandHandler;
use gmail_regex_rules::config::{Config, DiscoverySource};
use gmail_regex_rules::discovery::{self, FileMessageSource, GmailInboxSource, MessageSource};
use gmail_regex_rules::error::GmailError;
use gmail_regex_rules::logging;
use gmail_regex_rules::matcher::{self, PatternEvaluation};
use gmail_regex_rules::models::{clamp_retention, LogLevel, Message};
use gmail_regex_rules::processor::BatchProcessor;
use gmail_regex_rules::retry::RetryPolicy;
use gmail_regex_rules::scheduler::{self, Scheduler, TickOutcome};
use gmail_regex_rules::storage::Store;
use std::io::Read;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-rules --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Persisted settings are applied once the store is open
    let log = logging::init(LogLevel::default(), cli.verbose, cli.log_format)?;

    let mut config = Config::load(&cli.config).await?;
    if let Some(dir) = &cli.storage_dir {
        config.storage.dir = dir.clone();
    }

    let store = Store::open(&config.storage.dir);
    store.initialize().await?;
    let settings = store.load_settings().await?;
    log.set_level(settings.log_level)?;

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            let token_cache = &config.auth.token_cache;
            if force && token_cache.exists() {
                tokio::fs::remove_file(token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let provider =
                OAuthCredentialProvider::new(&config.auth.credentials, token_cache).await?;
            let credential = provider.get_credential().await?;
            if token_cache.exists() {
                auth::secure_token_file(token_cache).await?;
            }

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", token_cache);

            let api = GmailApi::new(&config.api)?;
            let labels = api.list_labels(&credential).await?;
            println!("Connection verified: {} label(s) visible", labels.len());
            Ok(())
        }

        Commands::Run { once } => {
            let (processor, api) = build_processor(cli.token.as_deref(), &config, store).await?;
            let source: Arc<dyn MessageSource> = match config.discovery.source {
                DiscoverySource::Gmail => Arc::new(GmailInboxSource::new(
                    api,
                    processor.credentials().clone(),
                    RetryPolicy::from(&config.retry),
                    config.discovery.query.clone(),
                    config.discovery.max_messages,
                )),
                DiscoverySource::File => {
                    Arc::new(FileMessageSource::new(&config.discovery.inbox_file))
                }
            };
            let mut scheduler = Scheduler::new(processor, source).with_log_handle(log);

            if once {
                match scheduler.tick().await? {
                    TickOutcome::Disabled => println!("Processing is disabled in settings"),
                    TickOutcome::Checked { discovered, summary } => {
                        println!("Discovered {} new message(s)", discovered);
                        if let Some(summary) = summary {
                            println!("{}", serde_json::to_string_pretty(&summary)?);
                        }
                    }
                }
                return Ok(());
            }

            println!(
                "Scheduler started, checking every {} minute(s). Press Ctrl-C to stop.",
                settings.interval_minutes()
            );
            let (handle, mut task) = scheduler.spawn();
            tokio::select! {
                joined = &mut task => {
                    joined.map_err(|e| anyhow::anyhow!("Scheduler task failed: {}", e))??;
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    tracing::info!("Shutdown requested");
                    handle.shutdown().await;
                    task.await
                        .map_err(|e| anyhow::anyhow!("Scheduler task failed: {}", e))??;
                }
            }
            Ok(())
        }

        Commands::Process { messages } => {
            let json = tokio::fs::read_to_string(&messages).await?;
            let messages = discovery::parse_messages(&json)?;
            let (processor, _) = build_processor(cli.token.as_deref(), &config, store).await?;

            let pb = cli::spinner(&format!("Processing {} message(s)...", messages.len()));
            let result = processor.process_messages(&messages).await;
            pb.finish_and_clear();

            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        }

        Commands::TestRules {
            rules,
            emails,
            email,
            compact,
        } => {
            let rules = cli::parse_rule_values(&tokio::fs::read_to_string(&rules).await?)?;
            let messages: Vec<Message> = match (email, emails) {
                (Some(inline), _) => vec![serde_json::from_str(&inline).map_err(|e| {
                    GmailError::InvalidInput(format!("Failed to parse --email JSON: {}", e))
                })?],
                (None, Some(path)) => {
                    discovery::parse_messages(&tokio::fs::read_to_string(&path).await?)?
                }
                (None, None) => {
                    return Err(GmailError::InvalidInput(
                        "Provide --emails <file> or --email <json>".to_string(),
                    )
                    .into())
                }
            };

            let results = cli::evaluate_offline(&rules, &messages);
            if compact {
                print!("{}", cli::render_offline_compact(&results));
            } else {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            eprintln!("{}", cli::offline_footer(&results));
            Ok(())
        }

        Commands::TestPattern { pattern, sample } => {
            let evaluation = matcher::evaluate_pattern(Some(&pattern), Some(&sample));
            let detail = match &evaluation {
                PatternEvaluation::Empty => "no pattern".to_string(),
                PatternEvaluation::Error(reason) => format!("invalid pattern: {}", reason),
                PatternEvaluation::Match => "matches".to_string(),
                PatternEvaluation::NoMatch => "does not match".to_string(),
            };
            println!("{} {}", evaluation.symbol(), detail);
            Ok(())
        }

        Commands::Reschedule { minutes } => {
            let applied = scheduler::reschedule_interval(&store, minutes).await?;
            println!("Processing interval set to {} minute(s)", applied);
            if applied != minutes {
                println!("(requested {}, the minimum is 1)", minutes);
            }
            Ok(())
        }

        Commands::Request { json } => {
            let json = match json {
                Some(json) => json,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };
            let (processor, _) = build_processor(cli.token.as_deref(), &config, store).await?;
            let handler = CommandHandler::new(processor);
            println!("{}", handler.handle_json(&json).await);
            Ok(())
        }

        Commands::Rules { command } => match command {
            RulesCommand::List => {
                print!("{}", cli::render_rules(&store.load_rules().await?));
                Ok(())
            }
            RulesCommand::Import { file } => {
                let json = tokio::fs::read_to_string(&file).await?;
                let report = store.import_rules(&json).await?;
                println!("Imported {} rule(s) from {:?}", report.imported, file);
                for (name, reason) in &report.invalid {
                    println!("  ⚠ {}: {}", name, reason);
                }
                Ok(())
            }
            RulesCommand::Export { file } => {
                let json = store.export_rules().await?;
                match file {
                    Some(path) => {
                        tokio::fs::write(&path, json).await?;
                        println!("Exported rules to {:?}", path);
                    }
                    None => println!("{}", json),
                }
                Ok(())
            }
        },

        Commands::Stats { limit } => {
            let entries = store.load_perf_stats().await?;
            print!("{}", cli::render_stats(&entries, limit));
            Ok(())
        }

        Commands::Settings { command } => match command {
            SettingsCommand::Show => {
                print!("{}", cli::render_settings(&settings));
                Ok(())
            }
            SettingsCommand::Set {
                enabled,
                retention,
                log_level,
            } => {
                let mut settings = settings;
                if let Some(enabled) = enabled {
                    settings.enabled = enabled;
                }
                if let Some(retention) = retention {
                    settings.perf_retention_limit = clamp_retention(retention);
                }
                if let Some(level) = log_level {
                    settings.log_level = level;
                }
                store.save_settings(&settings).await?;
                print!("{}", cli::render_settings(&settings));
                Ok(())
            }
        },

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(GmailError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - storage.dir: where rules, settings and stats are kept");
            println!("  - discovery.source: 'gmail' or 'file'");
            println!("  - discovery.query: Gmail search for candidate messages");
            println!("  - retry.max_attempts / retry.base_delay_ms: remote call retries");

            Ok(())
        }
    }
}

/// Wire the credential provider, Gmail API client and processor together
async fn build_processor(
    token: Option<&str>,
    config: &Config,
    store: Store,
) -> Result<(Arc<BatchProcessor>, Arc<dyn MailApi>)> {
    let credentials: Arc<dyn CredentialProvider> = match token {
        Some(token) if !token.trim().is_empty() => {
            tracing::debug!("Using static access token");
            Arc::new(StaticCredentialProvider::new(Some(token.to_string())))
        }
        _ => Arc::new(
            OAuthCredentialProvider::new(&config.auth.credentials, &config.auth.token_cache)
                .await?,
        ),
    };

    let api: Arc<dyn MailApi> = Arc::new(GmailApi::new(&config.api)?);
    let remote = RemoteClient::new(api.clone(), RetryPolicy::from(&config.retry));
    let processor = Arc::new(BatchProcessor::new(store, remote, credentials));
    Ok((processor, api))
}

/// Display error with helpful context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    // Display error chain
    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(gmail_err) = error.downcast_ref::<GmailError>() {
        match gmail_err {
            GmailError::AuthError(_) | GmailError::Unauthorized(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: gmail-rules auth --force");
                eprintln!("      Or pass a token with --token / GMAIL_ACCESS_TOKEN.");
            }
            GmailError::ServerError { .. }
            | GmailError::NetworkError(_)
            | GmailError::RemoteOperationFailed { .. } => {
                eprintln!("\nHint: This may be a temporary API error.");
                eprintln!("      Try running the command again.");
            }
            GmailError::RateLimited(_) => {
                eprintln!("\nHint: You've hit Gmail API rate limits.");
                eprintln!("      Wait a few minutes and try again.");
            }
            GmailError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-rules init-config --force");
            }
            _ => {}
        }
    }
}
