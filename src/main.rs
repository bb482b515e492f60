use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kiosk_carousel::cache::CacheStore;
use kiosk_carousel::carousel::LoopedSequence;
use kiosk_carousel::config::Configuration;
use kiosk_carousel::events::{LoadImage, LoaderEvent, PageSelected, ViewerCommand};
use kiosk_carousel::platform::display_power::{self, DisplayPower};
use kiosk_carousel::tasks::{controller, fetcher::Fetcher, loader, viewer};

#[derive(Debug, Parser)]
#[command(
    name = "kiosk-carousel",
    version,
    about = "full-screen looping image carousel"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Fetch (or fall back to the cache) once, print the looped sequence and exit
    #[arg(long = "fetch-only")]
    fetch_only: bool,
    /// Override the cache directory from the config file
    #[arg(long = "cache-dir", value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args {
        config,
        fetch_only,
        cache_dir,
    } = Args::parse();

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(dir) = cache_dir {
        cfg.cache.directory = dir;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!(
        "Loaded configuration from {}:\n{:#?}",
        config.display(),
        cfg
    );

    let fetcher = Fetcher::new(&cfg).context("failed to build HTTP client")?;
    let cache = CacheStore::from_config(&cfg.cache);

    if fetch_only {
        return run_fetch_only(&fetcher, &cache).await;
    }

    // Channels (small/bounded)
    let (viewer_tx, viewer_rx) = mpsc::channel::<ViewerCommand>(16); // Controller -> Viewer
    let (selected_tx, selected_rx) = mpsc::channel::<PageSelected>(64); // Viewer -> Controller
    let (to_load_tx, to_load_rx) = mpsc::channel::<LoadImage>(4); // Viewer -> Loader
    let (loaded_tx, loaded_rx) =
        mpsc::channel::<LoaderEvent>(cfg.carousel.loader_max_concurrent_decodes.max(1)); // Loader -> Viewer

    let cancel = CancellationToken::new();

    // Ctrl-D/Ctrl-C cancel the pipeline
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = Vec::new();
            match io::stdin().read_to_end(&mut sink) {
                Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
                Err(err) => tracing::warn!("stdin watcher failed: {err}"),
            }
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping shutdown watcher");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Controller
    tasks.spawn({
        let fetcher = fetcher.clone();
        let cache = cache.clone();
        let auto_advance = cfg.carousel.auto_advance;
        let cancel = cancel.clone();
        async move {
            controller::run(fetcher, cache, auto_advance, viewer_tx, selected_rx, cancel)
                .await
                .map(|state| tracing::info!(?state, "controller finished"))
                .context("controller task failed")
        }
    });

    // Display keep-awake (optional)
    if let Some(power) = DisplayPower::from_config(&cfg.display) {
        let keep_alive = cfg.display.keep_alive_interval;
        let cancel = cancel.clone();
        tasks.spawn(async move {
            display_power::run(power, keep_alive, cancel)
                .await
                .context("display power task failed")
        });
    } else {
        tracing::debug!("display power not configured; relying on compositor settings");
    }

    // Loader
    tasks.spawn({
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        let max_in_flight = cfg.carousel.loader_max_concurrent_decodes;
        let max_dimension = cfg.carousel.max_image_dimension;
        async move {
            loader::run(
                to_load_rx,
                loaded_tx,
                fetcher,
                cancel,
                max_in_flight,
                max_dimension,
            )
            .await
            .context("loader task failed")
        }
    });

    // Run the windowed viewer on the main thread (blocking) after spawning other tasks
    // This call returns when the window closes or cancellation occurs
    if let Err(e) = viewer::run_windowed(
        viewer_rx,
        loaded_rx,
        to_load_tx,
        selected_tx,
        cancel.clone(),
        &cfg.carousel,
        cfg.viewer.clone(),
    )
    .context("viewer failed")
    {
        tracing::error!("{e:?}");
    }
    // Ensure other tasks are asked to stop
    cancel.cancel();

    // Drain JoinSet (wait for other tasks to complete)
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}

async fn run_fetch_only(fetcher: &Fetcher, cache: &CacheStore) -> Result<()> {
    // Nobody renders notices here; the channel only has to accept them.
    let (notice_tx, mut notice_rx) = mpsc::channel::<ViewerCommand>(4);
    let resolved = controller::resolve_images(fetcher, cache, &notice_tx).await?;
    drop(notice_tx);
    while let Some(command) = notice_rx.recv().await {
        if let ViewerCommand::Notify(notice) = command {
            println!("# {}", notice.message());
        }
    }

    let Some((origin, images)) = resolved else {
        println!("(no images from network or cache {})", cache.dir().display());
        return Ok(());
    };
    let Some(sequence) = LoopedSequence::new(images) else {
        return Ok(());
    };

    println!(
        "# origin: {origin:?}\n# images: {}\n# pages: {}\n",
        sequence.real_len(),
        sequence.len()
    );
    for (position, image) in sequence.items().iter().enumerate() {
        let marker = match sequence.boundary_target(position) {
            Some(target) => format!("  -> {target}"),
            None => String::new(),
        };
        println!("  {position:>4}: {image}{marker}");
    }
    Ok(())
}
