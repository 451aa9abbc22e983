use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubetape::cli::{Cli, Commands};
use tubetape::config::Config;
use tubetape::output::console::{print_playlist_summary, progress_renderer};
use tubetape::pipeline::{Pipeline, PipelineError, PlaylistRequest, SingleRequest};
use tubetape::resolver::youtube::YtDlpResolver;
use tubetape::resolver::{has_playlist_param, Classifier, ContentKind, MediaReference};
use tubetape::{api, utils};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let overrides = cli.overrides();
    let config = Config::load().await?.with_overrides(overrides)?;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Download {
            url,
            title,
            output,
            no_playlist,
        } => {
            let listed = if no_playlist || !has_playlist_param(&url) {
                None
            } else {
                expand_playlist(&config, &url).await
            };

            match listed {
                Some((items, listed_title)) => {
                    download_playlist(&config, items, title.or(listed_title), &output, quiet)
                        .await?
                }
                None => download_single(&config, url, title, &output, quiet).await?,
            }
        }
        Commands::Playlist {
            url,
            items,
            title,
            output,
        } => {
            let (items, listed_title) = match (items, url) {
                (Some(file), _) => (read_items(&file)?, None),
                (None, Some(url)) => list_playlist(&config, &url).await?,
                (None, None) => anyhow::bail!("Either a playlist URL or --items is required"),
            };
            download_playlist(&config, items, title.or(listed_title), &output, quiet).await?;
        }
        Commands::Classify { url } => {
            let url = utils::validate_and_normalize_url(&url)?;
            let classifier = YtDlpResolver::new(config.tools.yt_dlp_path.clone());
            let classification = classifier.classify(&url).await?;
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Commands::Serve { .. } => {
            warn_missing_dependencies(&config).await;
            let addr = config.bind_addr()?;
            let pipeline = Arc::new(Pipeline::from_config(&config));
            let classifier = Arc::new(YtDlpResolver::new(config.tools.yt_dlp_path.clone()));
            api::serve(addr, pipeline, classifier).await?;
        }
        Commands::Config { path } => {
            if path {
                println!("{}", Config::config_path()?.display());
            } else {
                config.display();
            }
        }
        Commands::Check => {
            let missing =
                utils::check_dependencies(&config.tools.yt_dlp_path, &config.tools.ffmpeg_path)
                    .await;
            if missing.is_empty() {
                println!("{} yt-dlp and ffmpeg are available", style("✓").green());
            } else {
                for dep in &missing {
                    eprintln!("{} {}", style("✗").red(), dep);
                }
                anyhow::bail!("{} required tool(s) missing", missing.len());
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "tubetape=debug,tower_http=debug" } else { "tubetape=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Token cancelled by the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", style("Cancelling...").yellow());
            trigger.cancel();
        }
    });
    token
}

async fn download_single(
    config: &Config,
    url: String,
    title: Option<String>,
    output: &Path,
    quiet: bool,
) -> Result<()> {
    let token = cancel_on_ctrl_c();
    let (progress, renderer) = progress_renderer(quiet);
    let pipeline = Pipeline::from_config(config).with_progress(progress);

    tracing::info!("Starting download for URL: {}", url);
    let result = pipeline
        .download_single(SingleRequest { url, title }, &token)
        .await;
    drop(pipeline);
    let _ = renderer.await;

    let result = result.map_err(report)?;
    let path = output_path(output, &result.filename)?;
    result.save_to_file(&path).await.map_err(report)?;
    println!("Audio saved to: {}", style(path.display()).green());
    Ok(())
}

async fn download_playlist(
    config: &Config,
    items: Vec<MediaReference>,
    playlist_title: Option<String>,
    output: &Path,
    quiet: bool,
) -> Result<()> {
    let token = cancel_on_ctrl_c();
    let (progress, renderer) = progress_renderer(quiet);
    let pipeline = Pipeline::from_config(config).with_progress(progress);

    tracing::info!("Starting playlist download with {} item(s)", items.len());
    let request = PlaylistRequest {
        items,
        playlist_title,
    };
    let result = pipeline.download_playlist(request, &token).await;
    drop(pipeline);
    let _ = renderer.await;

    let download = result.map_err(report)?;
    let path = output_path(output, &download.result.filename)?;
    download.result.save_to_file(&path).await.map_err(report)?;

    print_playlist_summary(&download.succeeded, &download.failed);
    println!("Archive saved to: {}", style(path.display()).green());
    Ok(())
}

/// Items of a playlist URL, or `None` when it should be treated as one video
async fn expand_playlist(
    config: &Config,
    url: &str,
) -> Option<(Vec<MediaReference>, Option<String>)> {
    let classifier = YtDlpResolver::new(config.tools.yt_dlp_path.clone());
    match classifier.classify(url).await {
        Ok(classification)
            if matches!(classification.kind, ContentKind::Playlist | ContentKind::Mixed)
                && !classification.items.is_empty() =>
        {
            println!(
                "Found {} item(s) in {}",
                classification.items.len(),
                classification.title.as_deref().unwrap_or("playlist")
            );
            Some((classification.items, classification.title))
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Could not list playlist, downloading single video: {}", e);
            None
        }
    }
}

/// Log internal details, keep the user-facing message
fn report(error: PipelineError) -> anyhow::Error {
    if let Some(diagnostics) = error.diagnostics() {
        tracing::debug!("Transcoder output:\n{}", diagnostics);
    }
    anyhow::anyhow!(error.user_message())
}

fn output_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    fs_err::create_dir_all(dir).context("Failed to create output directory")?;
    Ok(dir.join(filename))
}

fn read_items(path: &Path) -> Result<Vec<MediaReference>> {
    let content = fs_err::read_to_string(path).context("Failed to read items file")?;
    serde_json::from_str(&content).context("Items file must be a JSON array of {url, title}")
}

async fn list_playlist(config: &Config, url: &str) -> Result<(Vec<MediaReference>, Option<String>)> {
    let url = utils::validate_and_normalize_url(url)?;
    let classifier = YtDlpResolver::new(config.tools.yt_dlp_path.clone());
    let classification = classifier
        .classify(&url)
        .await
        .context("Failed to list playlist items")?;

    if classification.items.is_empty() {
        anyhow::bail!("No playlist items found at {}", url);
    }
    println!(
        "Found {} item(s) in {}",
        classification.items.len(),
        classification.title.as_deref().unwrap_or("playlist")
    );
    Ok((classification.items, classification.title))
}

async fn warn_missing_dependencies(config: &Config) {
    let missing =
        utils::check_dependencies(&config.tools.yt_dlp_path, &config.tools.ffmpeg_path).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }
}
