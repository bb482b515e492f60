use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::carousel::{LoopedSequence, Pager};
use crate::events::{ImageRef, Notice, PageSelected, ViewerCommand};
use crate::tasks::fetcher::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarouselState {
    Loading,
    Displaying,
    Advancing,
    /// Neither network nor cache had images. Absorbing until teardown.
    NoImages,
    Destroyed,
}

/// Which side of the fetch-or-cache decision produced the images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Remote,
    Cache,
}

/// Fetches remote images and falls back to the cache when that comes back empty.
///
/// Sends `UsingCache` to the viewer when falling back. Returns `None` when
/// both sources are empty.
pub async fn resolve_images(
    fetcher: &Fetcher,
    cache: &CacheStore,
    to_viewer: &Sender<ViewerCommand>,
) -> Result<Option<(ImageOrigin, Vec<ImageRef>)>> {
    let remote = fetcher.fetch().await;
    if !remote.is_empty() {
        return Ok(Some((ImageOrigin::Remote, remote)));
    }

    if to_viewer
        .send(ViewerCommand::Notify(Notice::UsingCache))
        .await
        .is_err()
    {
        debug!("viewer channel closed; cache notice not shown");
    }
    let cached = read_cache(cache.clone()).await?;
    if cached.is_empty() {
        return Ok(None);
    }
    Ok(Some((
        ImageOrigin::Cache,
        cached.into_iter().map(ImageRef::Local).collect(),
    )))
}

async fn read_cache(cache: CacheStore) -> Result<Vec<PathBuf>> {
    let listed = tokio::task::spawn_blocking(move || cache.list())
        .await
        .context("cache listing task failed")?;
    match listed {
        Ok(paths) => Ok(paths),
        Err(err) => {
            warn!(error = %err, "failed to read image cache");
            Ok(Vec::new())
        }
    }
}

/// Drives the carousel for one screen lifetime.
///
/// Rules:
/// - Resolve images once (network first, cache second); teardown may abandon this.
/// - With nothing to show, send `NoImages` exactly once and idle until teardown.
/// - Otherwise show the looped sequence and request an animated advance every
///   `auto_advance`.
/// - When the viewer settles on a sentinel page, request one non-animated jump
///   to its real counterpart. A jump still unconfirmed at the next tick is
///   requested again.
/// - Nothing is sent to the viewer after `cancel` fires.
pub async fn run(
    fetcher: Fetcher,
    cache: CacheStore,
    auto_advance: Duration,
    to_viewer: Sender<ViewerCommand>,
    mut selected_rx: Receiver<PageSelected>,
    cancel: CancellationToken,
) -> Result<CarouselState> {
    let mut state = CarouselState::Loading;
    debug!(?state, "carousel starting");

    let resolved = select! {
        biased;
        _ = cancel.cancelled() => {
            info!("cancelled while loading images");
            return Ok(CarouselState::Destroyed);
        }
        res = resolve_images(&fetcher, &cache, &to_viewer) => res?,
    };

    let Some((origin, images)) = resolved else {
        state = CarouselState::NoImages;
        warn!(?state, "no images from network or cache");
        if to_viewer
            .send(ViewerCommand::Notify(Notice::NoImages))
            .await
            .is_err()
        {
            debug!("viewer channel closed; no-images notice not shown");
        }
        cancel.cancelled().await;
        return Ok(state);
    };
    info!(?origin, count = images.len(), "images resolved");

    let Some(sequence) = LoopedSequence::new(images) else {
        return Ok(CarouselState::NoImages);
    };
    let mut pager = Pager::new(sequence.clone());
    if to_viewer.send(ViewerCommand::Show(sequence)).await.is_err() {
        debug!("viewer channel closed before first show");
        return Ok(CarouselState::Destroyed);
    }
    state = CarouselState::Displaying;
    debug!(?state, real_pages = pager.sequence().real_len(), "carousel displaying");

    let mut ticker = interval_at(Instant::now() + auto_advance, auto_advance);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            biased;

            _ = cancel.cancelled() => break,

            maybe_selected = selected_rx.recv() => {
                let Some(PageSelected(position)) = maybe_selected else {
                    debug!("viewer closed page channel");
                    break;
                };
                if let Some(target) = pager.on_page_selected(position) {
                    debug!(position, target, "boundary reached; jumping");
                    let jump = ViewerCommand::ScrollTo { position: target, animated: false };
                    if !send_unless_cancelled(&to_viewer, &cancel, jump).await {
                        break;
                    }
                } else {
                    state = CarouselState::Displaying;
                    debug!(?state, position, "page settled");
                }
            }

            _ = ticker.tick() => {
                let Some(next) = pager.advance_target() else {
                    // jump still unconfirmed a full period later
                    if let Some(target) = pager.pending_jump() {
                        warn!(current = pager.current(), target, "boundary jump unconfirmed; resending");
                        let jump = ViewerCommand::ScrollTo { position: target, animated: false };
                        if !send_unless_cancelled(&to_viewer, &cancel, jump).await {
                            break;
                        }
                    }
                    continue;
                };
                state = CarouselState::Advancing;
                debug!(?state, from = pager.current(), to = next, "auto-advance");
                let advance = ViewerCommand::ScrollTo { position: next, animated: true };
                if !send_unless_cancelled(&to_viewer, &cancel, advance).await {
                    break;
                }
            }
        }
    }

    state = CarouselState::Destroyed;
    info!(?state, "carousel stopped");
    Ok(state)
}

/// Sends `command` unless teardown wins the race. Returns whether it was sent.
async fn send_unless_cancelled(
    to_viewer: &Sender<ViewerCommand>,
    cancel: &CancellationToken,
    command: ViewerCommand,
) -> bool {
    select! {
        biased;
        _ = cancel.cancelled() => false,
        res = to_viewer.send(command) => res.is_ok(),
    }
}
