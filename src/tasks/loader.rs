use std::collections::HashSet;
use std::io::Cursor;

use anyhow::Result;
use fast_image_resize as fir;
use image::RgbaImage;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::events::{ImageRef, LoadImage, LoaderEvent, PreparedImageCpu};
use crate::processing::layout::resize_to_contain;
use crate::tasks::fetcher::Fetcher;

// Decodes an image to RGBA8 and applies EXIF orientation if available.
// Orientation handling is best-effort; without metadata the pixels are kept as-is.
fn decode_rgba8_apply_exif(bytes: &[u8]) -> crate::error::Result<RgbaImage> {
    let img = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
        .map_err(|err| Error::Decode(err.to_string()))?;

    let mut img = img.to_rgba8();

    let orientation: u16 = read_orientation(bytes).unwrap_or(1);
    match orientation {
        1 => {}
        2 => {
            img = image::imageops::flip_horizontal(&img);
        }
        3 => {
            img = image::imageops::rotate180(&img);
        }
        4 => {
            img = image::imageops::flip_vertical(&img);
        }
        5 => {
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => {
            img = image::imageops::rotate90(&img);
        }
        7 => {
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => {
            img = image::imageops::rotate270(&img);
        }
        _ => {}
    }

    Ok(img)
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {o}");
    Some(o)
}

/// Shrinks `source` so neither edge exceeds `max_dim`, keeping aspect ratio.
pub fn downscale_to_fit(source: RgbaImage, max_dim: u32) -> crate::error::Result<RgbaImage> {
    let (w, h) = source.dimensions();
    if w <= max_dim && h <= max_dim {
        return Ok(source);
    }
    let (target_w, target_h) = resize_to_contain(max_dim, max_dim, w, h, max_dim);
    resize_rgba(&source, target_w, target_h)
}

pub fn resize_rgba(
    source: &RgbaImage,
    target_w: u32,
    target_h: u32,
) -> crate::error::Result<RgbaImage> {
    if source.dimensions() == (target_w, target_h) {
        return Ok(source.clone());
    }
    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| Error::Decode(format!("resize source view: {err}")))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| Error::Decode(format!("resize failed: {err}")))?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| Error::Decode("resized buffer has the wrong length".to_string()))
}

async fn read_source(fetcher: &Fetcher, image: &ImageRef) -> crate::error::Result<Vec<u8>> {
    match image {
        ImageRef::Remote(url) => fetcher.download(url).await,
        ImageRef::Local(path) => Ok(tokio::fs::read(path).await?),
    }
}

async fn load_one(
    fetcher: Fetcher,
    image: ImageRef,
    max_dim: u32,
) -> crate::error::Result<PreparedImageCpu> {
    let bytes = read_source(&fetcher, &image).await?;
    let rgba = tokio::task::spawn_blocking(move || {
        decode_rgba8_apply_exif(&bytes).and_then(|img| downscale_to_fit(img, max_dim))
    })
    .await
    .map_err(|err| Error::Decode(format!("decode task failed: {err}")))??;
    let (width, height) = rgba.dimensions();
    Ok(PreparedImageCpu {
        source: image,
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

/// Turns image references into decoded RGBA pages for the viewer.
///
/// - Remote references are downloaded with the fetcher's client; local ones are read from disk.
/// - Duplicate requests for an in-flight reference are dropped.
/// - Failures are reported as `LoadFailed` so the viewer can stop waiting.
pub async fn run(
    mut load_rx: Receiver<LoadImage>,
    to_viewer: Sender<LoaderEvent>,
    fetcher: Fetcher,
    cancel: CancellationToken,
    max_in_flight: usize,
    max_dimension: u32,
) -> Result<()> {
    let mut in_flight: HashSet<ImageRef> = HashSet::new();
    let mut tasks: JoinSet<(ImageRef, crate::error::Result<PreparedImageCpu>)> = JoinSet::new();

    loop {
        select! {
            _ = cancel.cancelled() => break,

            // Accept new load requests while under limit
            Some(LoadImage(image)) = load_rx.recv(), if in_flight.len() < max_in_flight => {
                if in_flight.insert(image.clone()) {
                    let fetcher = fetcher.clone();
                    tasks.spawn(async move {
                        let res = load_one(fetcher, image.clone(), max_dimension).await;
                        (image, res)
                    });
                } else {
                    debug!(%image, "load already in flight");
                }
            }

            Some(join_res) = tasks.join_next() => {
                let Ok((image, res)) = join_res else {
                    warn!("load task panicked");
                    continue;
                };
                in_flight.remove(&image);
                let event = match res {
                    Ok(prepared) => {
                        debug!(%image, width = prepared.width, height = prepared.height, "loaded");
                        LoaderEvent::ImageLoaded(prepared)
                    }
                    Err(err) => {
                        warn!(%image, error = %err, "failed to load image");
                        LoaderEvent::LoadFailed(image)
                    }
                };
                if to_viewer.send(event).await.is_err() {
                    debug!("viewer channel closed; stopping loader");
                    break;
                }
            }

            else => {
                if in_flight.is_empty() {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    fn orient6_bytes() -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap()
    }

    #[test]
    fn applies_orientation_six() {
        let img = decode_rgba8_apply_exif(&orient6_bytes()).unwrap();
        assert_eq!(img.dimensions(), (1, 2));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_rgba8_apply_exif(b"definitely not an image").is_err());
    }

    #[test]
    fn downscale_keeps_aspect_within_limit() {
        let src = RgbaImage::from_pixel(400, 100, image::Rgba([10, 20, 30, 255]));
        let out = downscale_to_fit(src, 200).unwrap();
        assert_eq!(out.dimensions(), (200, 50));
        assert_eq!(out.get_pixel(100, 25).0, [10, 20, 30, 255]);
    }

    #[test]
    fn small_images_are_not_resized() {
        let src = RgbaImage::from_pixel(16, 9, image::Rgba([1, 2, 3, 255]));
        let out = downscale_to_fit(src, 200).unwrap();
        assert_eq!(out.dimensions(), (16, 9));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loads_local_file_and_reports_missing_one() {
        use crate::cache::CacheStore;
        use crate::config::{NetworkConfig, SourceConfig, WritePolicy};
        use tokio::sync::mpsc;

        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("img_0.jpg");
        std::fs::write(&good, orient6_bytes()).unwrap();
        let missing = tmp.path().join("img_1.jpg");

        let fetcher = Fetcher::with_parts(
            SourceConfig::default(),
            &NetworkConfig::default(),
            CacheStore::new(tmp.path(), WritePolicy::Overwrite),
            true,
        )
        .unwrap();
        let (load_tx, load_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(load_rx, event_tx, fetcher, cancel.clone(), 2, 64));

        load_tx.send(LoadImage(ImageRef::Local(good.clone()))).await.unwrap();
        load_tx
            .send(LoadImage(ImageRef::Local(missing.clone())))
            .await
            .unwrap();

        let mut loaded = None;
        let mut failed = None;
        for _ in 0..2 {
            let ev = tokio::time::timeout(std::time::Duration::from_secs(5), event_rx.recv())
                .await
                .expect("timeout waiting for loader event")
                .expect("loader channel closed");
            match ev {
                LoaderEvent::ImageLoaded(prepared) => loaded = Some(prepared),
                LoaderEvent::LoadFailed(image) => failed = Some(image),
            }
        }
        let loaded = loaded.expect("expected a decoded image");
        assert_eq!(loaded.source, ImageRef::Local(good));
        assert_eq!((loaded.width, loaded.height), (1, 2));
        assert_eq!(loaded.pixels.len(), 8);
        assert_eq!(failed, Some(ImageRef::Local(missing)));

        cancel.cancel();
        let _ = handle.await;
    }
}
