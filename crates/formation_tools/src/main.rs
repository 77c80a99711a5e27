//! Formation Controller - Development Tools

use clap::{Parser, Subcommand};
use formation_tools::preview::{build_preview, load_template, render_ascii, render_json, PreviewOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "formation-tools")]
#[command(about = "Development tools for formation templates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate template files
    Validate {
        /// Path to template directory
        #[arg(default_value = "assets/formations")]
        path: String,
    },
    /// Preview the slot layout of a template
    Preview {
        /// Preset name or path to a template file
        #[arg(short, long, default_value = "Box")]
        template: String,
        /// Number of members
        #[arg(short, long, default_value_t = 12)]
        members: usize,
        /// Use the marching column layout
        #[arg(long)]
        columnar: bool,
        /// Seed for slot jitter
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Print JSON instead of ASCII art
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            tracing::info!("Validating templates in: {path}");
            match formation_tools::validate::validate_data_directory(std::path::Path::new(&path)) {
                Ok(templates) => tracing::info!(count = templates.len(), "Validation passed"),
                Err(e) => {
                    tracing::error!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Preview {
            template,
            members,
            columnar,
            seed,
            json,
        } => {
            let options = PreviewOptions {
                members,
                columnar,
                seed,
            };
            let rendered = load_template(&template)
                .and_then(|template| build_preview(&template, &options))
                .and_then(|preview| {
                    if json {
                        render_json(&preview)
                    } else {
                        Ok(render_ascii(&preview))
                    }
                });
            match rendered {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    tracing::error!("Preview failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
