//! Graphbind CLI
//!
//! Hydrates API response envelopes into a live entity graph and renders
//! binding strings against it.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use graphbind::commands::{self, Assignment, ScopeSpec};
use graphbind::project::ProjectLoader;

/// Graphbind entity graph tool
#[derive(Parser, Debug)]
#[command(name = "graphbind")]
#[command(about = "Hydrate API responses and render bindings against them", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge a response envelope and print the resulting entity graph
    Hydrate {
        /// API configuration file, or a directory holding graphbind.toml
        #[arg(short, long, default_value = "graphbind.toml")]
        config: PathBuf,

        /// Response envelope (JSON)
        response: PathBuf,

        /// Type an object or identifier result refers to
        #[arg(short = 't', long = "type")]
        model: Option<String>,
    },

    /// Bind an element against hydrated entities and print it before and after assignments
    Render {
        /// API configuration file, or a directory holding graphbind.toml
        #[arg(short, long, default_value = "graphbind.toml")]
        config: PathBuf,

        /// Response envelope (JSON)
        #[arg(short, long)]
        response: PathBuf,

        /// Entity exposed to the binding, as name=Type:id
        #[arg(short, long = "scope", required = true)]
        scopes: Vec<ScopeSpec>,

        /// Binding string, e.g. "text: ~user:name"
        #[arg(short, long)]
        bind: String,

        /// Attribute assignment applied after the first render, as scope.path=value
        #[arg(long = "set")]
        sets: Vec<Assignment>,
    },
}

fn main() -> Result<()> {
    // Entities are single-threaded, so everything runs on the current thread
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("graphbind=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    info!("Starting graphbind v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Hydrate {
            config,
            response,
            model,
        } => {
            let store = ProjectLoader::load(&config).await?.into_store();
            let body = ProjectLoader::load_response(&response).await?;
            print!("{}", commands::hydrate(&store, body, model.as_deref())?);
        }
        Command::Render {
            config,
            response,
            scopes,
            bind,
            sets,
        } => {
            let store = ProjectLoader::load(&config).await?.into_store();
            let body = ProjectLoader::load_response(&response).await?;
            let rendered = commands::render(&store, body, &scopes, &bind, &sets)?;
            println!("{}", rendered.before);
            if !sets.is_empty() {
                println!("{}", rendered.after);
            }
        }
    }

    Ok(())
}
