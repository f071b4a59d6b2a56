//! Kestrel CLI entry point

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kestrel::agent::{InvocationRequest, InvocationResponse, Invoker};
use kestrel::auth::{
    BrowserReauthenticator, ClientSecrets, CredentialManager, FileCredentialStore, GoogleTokenRefresher,
};
use kestrel::config::{Config, ToolProviderConfig};
use kestrel::provider::HttpConnector;
use kestrel::{tools, ui};

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Kestrel - autonomous task agent")]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Onboard,

    /// Run one task through the agent
    Run {
        /// Task for the agent
        #[arg(short, long)]
        message: Option<String>,

        /// Model name, e.g. gemini-1.5-pro or gpt-4o
        #[arg(long)]
        model: Option<String>,

        /// Iteration budget for this run
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Remote tool provider endpoint
        #[arg(long)]
        provider_url: Option<String>,

        /// Read an invocation request from stdin and print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Authorize Google access in the browser
    Login,

    /// Remove stored Google credentials
    Logout,

    /// Show Kestrel status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => {
            ui::print_step("Initializing Kestrel...");
            let config = kestrel::config::onboard()?;
            ui::print_success(&format!("Config written to {:?}", kestrel::config::config_path()));
            println!("\nNext steps:");
            println!("  1. Set GEMINI_API_KEY or OPENAI_API_KEY (or edit the config file)");
            if config.google.client_secrets_path.is_none() {
                println!("  2. For Gmail tools, set google.client_secrets_path and run 'kestrel login'");
            }
            println!("  3. Run: kestrel run -m \"Summarize my latest invoice email\"");
        }

        Commands::Run {
            message,
            model,
            max_iterations,
            provider_url,
            json,
        } => {
            let mut config = kestrel::config::load_or_default()?;
            if let Some(url) = provider_url {
                config.tool_provider = Some(ToolProviderConfig { url });
            }

            let request = if json {
                let mut input = String::new();
                std::io::stdin().read_to_string(&mut input)?;
                serde_json::from_str::<InvocationRequest>(&input).context("Invalid invocation request on stdin")?
            } else {
                let user_input = message.context("Pass a task with -m, or use --json")?;
                InvocationRequest {
                    user_input,
                    model_name: model,
                    max_iterations,
                }
            };

            run_task(config, request, json).await?;
        }

        Commands::Login => {
            let config = kestrel::config::load_or_default()?;
            let manager = credential_manager(&config, true)?
                .context("google.client_secrets_path is not configured")?;

            ui::print_step("Opening the browser for Google consent...");
            manager.login(&config.google.identity).await?;
            ui::print_success(&format!("Credentials saved under {:?}", config.google.token_dir));
        }

        Commands::Logout => {
            let config = kestrel::config::load_or_default()?;
            let store = FileCredentialStore::new(&config.google.token_dir);
            kestrel::auth::CredentialStore::delete(&store, &config.google.identity)?;
            ui::print_success("Logged out successfully");
        }

        Commands::Status => {
            let config = kestrel::config::load_or_default()?;
            println!("Kestrel Status\n");
            println!("Config: {:?}", kestrel::config::config_path());
            println!("Model: {}", config.model);
            println!("Max iterations: {}", config.max_iterations);
            println!("Gemini API: {}", if config.gemini_api_key.is_empty() { "not set" } else { "✓" });
            println!("OpenAI API: {}", if config.openai_api_key.is_empty() { "not set" } else { "✓" });
            match &config.tool_provider {
                Some(provider) => println!("Tool provider: {}", provider.url),
                None => println!("Tool provider: none"),
            }

            match credential_manager(&config, false) {
                Ok(Some(manager)) => {
                    let usable = manager.has_usable_credentials(&config.google.identity).unwrap_or(false);
                    println!(
                        "Google credentials: {}",
                        if usable { "✓" } else { "not set (run 'kestrel login')" }
                    );
                }
                Ok(None) => println!("Google credentials: client secrets not configured"),
                Err(e) => println!("Google credentials: {}", e),
            }
        }
    }

    Ok(())
}

/// Build the credential manager when Google client secrets are configured.
/// Only `login` gets the browser flow; a run reports missing consent
/// through the tool instead of blocking on a browser.
fn credential_manager(config: &Config, interactive: bool) -> Result<Option<Arc<CredentialManager>>> {
    let Some(path) = &config.google.client_secrets_path else {
        return Ok(None);
    };
    let secrets = ClientSecrets::from_file(path)?;
    let store = Arc::new(FileCredentialStore::new(&config.google.token_dir));

    let mut manager = CredentialManager::new(store, Arc::new(GoogleTokenRefresher::new(secrets.clone())))
        .with_scopes(config.google.scopes.clone());
    if interactive {
        let reauthenticator = BrowserReauthenticator::new(secrets, config.google.callback_port)
            .with_callback_timeout(Duration::from_secs(config.google.callback_timeout_secs));
        manager = manager.with_reauthenticator(Arc::new(reauthenticator));
    }
    Ok(Some(Arc::new(manager)))
}

async fn run_task(config: Config, request: InvocationRequest, json: bool) -> Result<()> {
    let credentials = credential_manager(&config, false)?;
    let registry = Arc::new(tools::default_registry(&config, credentials));

    if !json {
        let model = request.model_name.as_deref().unwrap_or(config.model.as_str());
        ui::print_header(model, config.tool_provider.as_ref().map(|p| p.url.as_str()));
        ui::print_thinking("Working");
    }

    let invoker = Invoker::new(config, registry).with_connector(Arc::new(HttpConnector::default()));

    // Ctrl+C cancels the invocation; a second one exits.
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            eprintln!("\nBye!");
            std::process::exit(130);
        }
        eprintln!("\nCancelling... press Ctrl+C again to exit");
        handler_token.cancel();
    })
    .unwrap_or_else(|e| warn!("Failed to install Ctrl+C handler: {}", e));

    let result = invoker.execute(&request, &cancel).await;

    if json {
        let response = InvocationResponse::from(result);
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        ui::print_result(&result);
    }
    Ok(())
}
