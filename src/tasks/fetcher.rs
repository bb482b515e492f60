use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::config::{Configuration, HostRewrite, NetworkConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::events::ImageRef;

#[derive(Debug, Deserialize)]
struct GalleryResponse {
    #[serde(default)]
    data: Option<GalleryData>,
}

#[derive(Debug, Deserialize)]
struct GalleryData {
    #[serde(default)]
    urls: Vec<String>,
}

struct Downloaded {
    index: usize,
    url: String,
    bytes: Vec<u8>,
}

/// Discovers the remote image set, downloads it and refreshes the cache.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    source: SourceConfig,
    rewrites: Vec<HostRewrite>,
    cache: CacheStore,
    clear_on_refresh: bool,
}

impl Fetcher {
    pub fn new(cfg: &Configuration) -> Result<Self> {
        Self::with_parts(
            cfg.source.clone(),
            &cfg.network,
            CacheStore::from_config(&cfg.cache),
            cfg.cache.clear_on_refresh,
        )
    }

    pub fn with_parts(
        source: SourceConfig,
        network: &NetworkConfig,
        cache: CacheStore,
        clear_on_refresh: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(network.connect_timeout)
            .timeout(network.request_timeout)
            .build()?;
        Ok(Self {
            client,
            source,
            rewrites: network.host_rewrites.clone(),
            cache,
            clear_on_refresh,
        })
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// One round-trip to the configured source.
    ///
    /// Never fails: every error is logged and an empty list means "nothing
    /// usable came from the network". When at least one image downloads, the
    /// cache is refreshed and the returned references point at the cached
    /// files (or at the remote URL for any file that could not be written).
    #[instrument(skip(self), fields(cache = %self.cache.dir().display()))]
    pub async fn fetch(&self) -> Vec<ImageRef> {
        let urls = match self.discover().await {
            Ok(urls) => urls,
            Err(err) => {
                warn!(error = %err, "image discovery failed");
                return Vec::new();
            }
        };
        if urls.is_empty() {
            info!("remote source listed no images");
            return Vec::new();
        }
        info!(discovered = urls.len(), "remote images discovered");

        let downloads = self.download_all(urls).await;
        if downloads.is_empty() {
            warn!("no image could be downloaded; leaving cache untouched");
            return Vec::new();
        }
        self.refresh_cache(downloads).await
    }

    /// Lists the image URLs the source currently offers, in display order.
    pub async fn discover(&self) -> Result<Vec<String>> {
        match &self.source {
            SourceConfig::GalleryApi { endpoint } => self.gallery_urls(endpoint).await,
            SourceConfig::NumberedProbe {
                base_url,
                extension,
                first_index,
                max_images,
            } => Ok(self
                .probe_urls(base_url, extension, *first_index, *max_images)
                .await),
        }
    }

    /// GETs one image after applying host rewrites. Anything but `200` is an error.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let target = rewrite_host(url, &self.rewrites)?;
        let response = self.client.get(&target).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                url: target,
                status,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn gallery_urls(&self, endpoint: &str) -> Result<Vec<String>> {
        debug!(endpoint, "requesting gallery listing");
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                url: endpoint.to_string(),
                status,
            });
        }
        let body = response.text().await?;
        parse_gallery_response(&body)
    }

    async fn probe_urls(
        &self,
        base_url: &str,
        extension: &str,
        first_index: u32,
        max_images: Option<u32>,
    ) -> Vec<String> {
        let mut found = Vec::new();
        let mut n = first_index;
        loop {
            if max_images.is_some_and(|max| found.len() >= max as usize) {
                debug!(limit = ?max_images, "probe limit reached");
                break;
            }
            let url = format!("{base_url}{n}.{extension}");
            match self.head_ok(&url).await {
                Ok(true) => found.push(url),
                Ok(false) => {
                    debug!(%url, "probe ended at first missing image");
                    break;
                }
                Err(err) => {
                    debug!(%url, error = %err, "probe ended on request error");
                    break;
                }
            }
            let Some(next) = n.checked_add(1) else {
                break;
            };
            n = next;
        }
        found
    }

    async fn head_ok(&self, url: &str) -> Result<bool> {
        let target = rewrite_host(url, &self.rewrites)?;
        let response = self.client.head(&target).send().await?;
        Ok(response.status() == StatusCode::OK)
    }

    async fn download_all(&self, urls: Vec<String>) -> Vec<Downloaded> {
        let mut downloads = Vec::with_capacity(urls.len());
        for (index, url) in urls.into_iter().enumerate() {
            match self.download(&url).await {
                Ok(bytes) => {
                    debug!(index, %url, bytes = bytes.len(), "downloaded image");
                    downloads.push(Downloaded { index, url, bytes });
                }
                Err(err) => warn!(index, %url, error = %err, "skipping image"),
            }
        }
        downloads
    }

    async fn refresh_cache(&self, downloads: Vec<Downloaded>) -> Vec<ImageRef> {
        let fallback: Vec<ImageRef> = downloads
            .iter()
            .map(|d| ImageRef::Remote(d.url.clone()))
            .collect();
        let cache = self.cache.clone();
        let clear_first = self.clear_on_refresh;
        let written = tokio::task::spawn_blocking(move || {
            if clear_first && let Err(err) = cache.clear() {
                warn!(error = %err, "failed to clear cache before refresh");
            }
            downloads
                .into_iter()
                .map(|Downloaded { index, url, bytes }| match cache.save(index, &bytes) {
                    Ok(path) => ImageRef::Local(path),
                    Err(err) => {
                        warn!(index, error = %err, "failed to cache image; using remote url");
                        ImageRef::Remote(url)
                    }
                })
                .collect::<Vec<_>>()
        })
        .await;

        match written {
            Ok(images) => {
                info!(count = images.len(), "cache refreshed");
                images
            }
            Err(err) => {
                warn!(error = %err, "cache refresh task failed; using remote urls");
                fallback
            }
        }
    }
}

/// Extracts `data.urls` from a gallery listing. Missing keys mean no images.
pub fn parse_gallery_response(body: &str) -> Result<Vec<String>> {
    let parsed: GalleryResponse = serde_json::from_str(body)?;
    Ok(parsed.data.map(|d| d.urls).unwrap_or_default())
}

/// Swaps the host of `url` when it exactly matches a rewrite's `from`.
pub fn rewrite_host(url: &str, rewrites: &[HostRewrite]) -> Result<String> {
    if rewrites.is_empty() {
        return Ok(url.to_string());
    }
    let mut parsed = Url::parse(url).map_err(|err| Error::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    let Some(rewrite) = parsed
        .host_str()
        .and_then(|host| rewrites.iter().find(|r| r.from == host))
    else {
        return Ok(url.to_string());
    };
    let to = rewrite.to.clone();
    parsed
        .set_host(Some(&to))
        .map_err(|err| Error::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(from: &str, to: &str) -> HostRewrite {
        HostRewrite {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn parses_gallery_urls_in_order() {
        let body = r#"{"code":0,"data":{"urls":["https://a/1.jpg","https://a/2.jpg"],"title":"x"}}"#;
        assert_eq!(
            parse_gallery_response(body).unwrap(),
            vec!["https://a/1.jpg".to_string(), "https://a/2.jpg".to_string()]
        );
    }

    #[test]
    fn missing_data_or_urls_is_empty() {
        assert!(parse_gallery_response("{}").unwrap().is_empty());
        assert!(parse_gallery_response(r#"{"data":null}"#).unwrap().is_empty());
        assert!(parse_gallery_response(r#"{"data":{}}"#).unwrap().is_empty());
    }

    #[test]
    fn malformed_gallery_is_an_error() {
        assert!(matches!(
            parse_gallery_response("<html>"),
            Err(Error::MalformedGallery(_))
        ));
        assert!(matches!(
            parse_gallery_response(r#"{"data":{"urls":"nope"}}"#),
            Err(Error::MalformedGallery(_))
        ));
    }

    #[test]
    fn rewrites_only_exact_host_matches() {
        let rules = [rewrite("artlocal.example", "10.0.2.2"), rewrite("127.0.0.1", "10.0.2.2")];
        assert_eq!(
            rewrite_host("http://artlocal.example:8080/img/1.jpg?x=1", &rules).unwrap(),
            "http://10.0.2.2:8080/img/1.jpg?x=1"
        );
        assert_eq!(
            rewrite_host("http://127.0.0.1/a.jpg", &rules).unwrap(),
            "http://10.0.2.2/a.jpg"
        );
        assert_eq!(
            rewrite_host("http://cdn.artlocal.example/a.jpg", &rules).unwrap(),
            "http://cdn.artlocal.example/a.jpg"
        );
    }

    #[test]
    fn no_rewrites_leaves_url_untouched() {
        assert_eq!(rewrite_host("not a url", &[]).unwrap(), "not a url");
    }

    #[test]
    fn unparsable_url_with_rewrites_is_reported() {
        let rules = [rewrite("a", "b")];
        assert!(matches!(
            rewrite_host("not a url", &rules),
            Err(Error::InvalidUrl { .. })
        ));
    }
}
