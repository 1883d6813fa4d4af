// SPDX-License-Identifier: Apache-2.0

mod archive;
mod config;
mod direct;
mod error;
mod fetcher;
mod filename;
mod host;
mod models;
mod page_scan;
mod pipeline;
mod resolver;
mod transport;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::FetchConfig;
use fetcher::FetchContext;
use host::{DetachedHost, DirectoryTarget};
use models::message::{DownloadResponse, ProgressEvent, Request};
use models::page::PageData;

#[derive(Parser)]
#[command(name = "imagezip", about = "Download a page's images, upgraded to their largest versions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bundle every image of a scraped page into one ZIP archive.
    Download {
        /// Page data JSON as produced by the scraper, or `-` for stdin
        #[arg(long)]
        page: PathBuf,

        /// Directory the archive is saved into
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Probe link targets and pick the largest payload per image
        #[arg(long, default_value_t = false)]
        high_res: bool,

        /// Archive name, overriding the one in the page data
        #[arg(long)]
        zip_name: Option<String>,

        /// Images processed concurrently
        #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Include per-image diagnostics in the response
        #[arg(long, default_value_t = false)]
        diagnostics: bool,
    },
    /// Save every image as its own file instead of an archive.
    Direct {
        /// Page data JSON as produced by the scraper, or `-` for stdin
        #[arg(long)]
        page: PathBuf,

        /// Directory the images are saved into
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Print the ranked candidate URLs for each image without downloading anything.
    Candidates {
        /// Page data JSON as produced by the scraper, or `-` for stdin
        #[arg(long)]
        page: PathBuf,
    },
    /// Answer one `downloadImages` request read from stdin.
    Message {
        /// Directory the archive is saved into
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Include per-image diagnostics in the response
        #[arg(long, default_value_t = false)]
        diagnostics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("imagezip_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            page,
            out_dir,
            high_res,
            zip_name,
            batch_size,
            diagnostics,
        } => {
            let config = FetchConfig {
                batch_size,
                diagnostics,
                ..FetchConfig::default()
            };
            let mut data = read_page(&page).await?;
            if high_res {
                data.high_res = Some(true);
            }
            if zip_name.is_some() {
                data.zip_name = zip_name;
            }
            handle_commands_download(config, data, &out_dir).await?
        }

        Commands::Direct { page, out_dir } => {
            let data = read_page(&page).await?;
            handle_commands_direct(FetchConfig::default(), data, &out_dir).await?
        }

        Commands::Candidates { page } => {
            let data = read_page(&page).await?;
            handle_commands_candidates(&data)?
        }

        Commands::Message {
            out_dir,
            diagnostics,
        } => {
            let config = FetchConfig {
                diagnostics,
                ..FetchConfig::default()
            };
            handle_commands_message(config, &out_dir).await?
        }
    }

    Ok(())
}

async fn handle_commands_download(config: FetchConfig, data: PageData, out_dir: &Path) -> Result<()> {
    info!(images = data.images.len(), high_res = data.high_res(), "Downloading page images");
    let response = respond(config, Request::DownloadImages { data }, out_dir).await?;
    print_response(&response)
}

async fn handle_commands_direct(config: FetchConfig, data: PageData, out_dir: &Path) -> Result<()> {
    let client = config.http_client()?;
    let target = DirectoryTarget::new(out_dir, client);

    let response = match direct::download_direct(&config, &target, &data, print_progress).await {
        Ok(summary) => {
            let mut response = DownloadResponse::succeeded(summary.downloaded, summary.total);
            response.improved_count = Some(summary.improved);
            response
        }
        Err(e) => DownloadResponse::failed(e.to_string()),
    };
    print_response(&response)
}

fn handle_commands_candidates(data: &PageData) -> Result<()> {
    let resolved: Vec<Vec<String>> = data.images.iter().map(resolver::resolve).collect();
    let json_output =
        serde_json::to_string_pretty(&resolved).context("Failed to serialize candidates to JSON")?;
    println!("{}", json_output);
    Ok(())
}

async fn handle_commands_message(config: FetchConfig, out_dir: &Path) -> Result<()> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("Failed to read request from stdin")?;
    let request: Request =
        serde_json::from_str(&raw).context("Failed to parse request JSON")?;

    let response = respond(config, request, out_dir).await?;
    // The response is the answer to the message, so a failed download is not a process error.
    let json_output =
        serde_json::to_string(&response).context("Failed to serialize response to JSON")?;
    println!("{}", json_output);
    Ok(())
}

async fn respond(config: FetchConfig, request: Request, out_dir: &Path) -> Result<DownloadResponse> {
    let client = config.http_client()?;
    let target = DirectoryTarget::new(out_dir, client.clone());
    let ctx = FetchContext::new(config, client.clone(), DetachedHost::new(client));
    Ok(pipeline::handle_request(&ctx, &target, request, print_progress).await)
}

async fn read_page(page: &Path) -> Result<PageData> {
    let raw = if page.as_os_str() == "-" {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("Failed to read page data from stdin")?;
        raw
    } else {
        tokio::fs::read_to_string(page)
            .await
            .with_context(|| format!("Failed to read page data from '{}'", page.display()))?
    };
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse page data in '{}'", page.display()))
}

fn print_progress(event: ProgressEvent) {
    if let Ok(line) = serde_json::to_string(&event) {
        eprintln!("{}", line);
    }
}

fn print_response(response: &DownloadResponse) -> Result<()> {
    let json_output =
        serde_json::to_string_pretty(response).context("Failed to serialize response to JSON")?;
    println!("{}", json_output);
    match &response.error {
        Some(error) if !response.success => bail!("{}", error),
        _ => Ok(()),
    }
}
