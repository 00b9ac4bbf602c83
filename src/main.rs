//! Switchboard CLI entry point

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use anyhow::Result;

use switchboard::adapters::cli::CliChannel;
use switchboard::agent::BackendRegistry;
use switchboard::collaborators::FileCredentialStore;
use switchboard::orchestrator::{Orchestrator, TaskClassifier};
use switchboard::ui;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Switchboard - multi-backend LLM task orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a configuration interactively
    Onboard,

    /// Send a request (interactive session when no message is given)
    Ask {
        /// Message to send
        #[arg(short, long)]
        message: Option<String>,

        /// User the request runs as
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Show how a query would be classified and routed
    Classify {
        #[arg(short, long)]
        query: String,

        /// Pretend retrieval found relevant context
        #[arg(long)]
        with_context: bool,
    },

    /// Store a user's external-workspace token
    Connect {
        #[arg(short, long, default_value = "cli")]
        user: String,

        #[arg(short, long)]
        token: String,
    },

    /// Show configuration summary
    Status,

    /// Delete all configuration and data
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Setup Global Ctrl+C handler
    let exit_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let r = exit_flag.clone();

    ctrlc::set_handler(move || {
        if r.load(std::sync::atomic::Ordering::SeqCst) {
            println!("\n👋 Bye!");
            std::process::exit(0);
        } else {
            println!("\n⚠️  Press Ctrl+C again to exit");
            r.store(true, std::sync::atomic::Ordering::SeqCst);

            // Reset flag after 3 seconds
            let r2 = r.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_secs(3));
                r2.store(false, std::sync::atomic::Ordering::SeqCst);
            });
        }
    }).ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            switchboard::config::onboard()?;
        }

        Commands::Ask { message, user } => {
            let config = switchboard::config::load()?;
            let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
            let mut channel = CliChannel::new(orchestrator.clone(), &user);

            if let Some(msg) = message {
                let outcome = channel.run_once(&msg).await;
                orchestrator.shutdown().await;
                let result = outcome?;
                println!("\n{}", result.answer);
                ui::print_result_meta(&result);
            } else {
                ui::print_header(&format!("Interactive session as {} (Ctrl+C twice to exit)", user));
                let outcome = channel.run_interactive().await;
                orchestrator.shutdown().await;
                outcome?;
            }
        }

        Commands::Classify { query, with_context } => {
            let config = switchboard::config::load()?;
            let backend = BackendRegistry::from_config(&config)
                .ok()
                .and_then(|registry| registry.get(&config.routing.classifier).ok());
            if backend.is_none() {
                ui::print_warning("Classifier backend unavailable, only override rules apply");
            }

            let classifier = TaskClassifier::new(backend, &config.workspace_keyword, config.routing.clone())?;
            let route = classifier.route(&query, with_context).await;
            ui::print_route(&route);
        }

        Commands::Connect { user, token } => {
            let store = FileCredentialStore::new(&FileCredentialStore::default_path());
            store.save_token(&user, &token)?;
            ui::print_success(&format!("Stored external-workspace token for {}", user));
        }

        Commands::Status => {
            let config = switchboard::config::load()?;
            ui::print_header("Status");
            println!("Workspace: {:?}", config.workspace);
            println!("Gemini API: {}", if config.gemini_api_key.is_empty() { "not set" } else { "✓" });
            println!("Anthropic API: {}", if config.anthropic_api_key.is_empty() { "not set" } else { "✓" });
            println!("Max steps: {}", config.max_steps);
            println!("Workspace keyword: {}", config.workspace_keyword);

            println!("\nRouting:");
            for category in switchboard::orchestrator::TaskCategory::ALL {
                println!("  {:<20} {}", category.as_str(), config.routing.for_category(category).id());
            }
            println!("  {:<20} {}", "fallback", config.routing.fallback.id());
            println!("  {:<20} {}", "classifier", config.routing.classifier.id());

            println!();
            if config.browser.service_url.is_empty() {
                println!("Browser service: disabled");
            } else {
                println!("Browser service: {}", config.browser.service_url);
            }
            if config.mcp.enabled {
                println!("MCP server: {} {}", config.mcp.command, config.mcp.args.join(" "));
            } else {
                println!("MCP server: disabled");
            }
            println!(
                "Retrieval: {}",
                config.retrieval.url.as_deref().unwrap_or("disabled")
            );
        }

        Commands::Reset => {
            switchboard::config::reset()?;
        }
    }

    Ok(())
}
