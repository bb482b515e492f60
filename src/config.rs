use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

const DEFAULT_CACHE_DIRECTORY: &str = "/var/cache/kiosk-carousel";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Local image cache used when the network comes back empty.
    pub cache: CacheConfig,
    /// Where the image list comes from.
    pub source: SourceConfig,
    /// HTTP client behavior shared by discovery and downloads.
    pub network: NetworkConfig,
    /// Paging and decode behavior.
    pub carousel: CarouselOptions,
    /// Window and notice presentation.
    pub viewer: ViewerOptions,
    /// Keeps the panel powered while the carousel runs.
    pub display: DisplayConfig,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.cache.directory.as_os_str().is_empty(),
            "cache.directory must not be empty"
        );
        self.source.validate().context("invalid source configuration")?;
        self.network
            .validate()
            .context("invalid network configuration")?;
        self.carousel
            .validate()
            .context("invalid carousel configuration")?;
        ensure!(
            !self.viewer.notice_duration.is_zero(),
            "viewer.notice-duration must be greater than zero"
        );
        self.display
            .validate()
            .context("invalid display configuration")?;
        Ok(self)
    }
}

/// What to do when a cache file for an index already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    #[default]
    Overwrite,
    SkipExisting,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub write_policy: WritePolicy,
    /// Remove every cached image before writing a fresh set.
    pub clear_on_refresh: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_CACHE_DIRECTORY),
            write_policy: WritePolicy::default(),
            clear_on_refresh: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceConfig {
    /// `POST {}` to an endpoint answering `{"data": {"urls": [...]}}`.
    GalleryApi { endpoint: String },
    /// `HEAD <base-url><n>.<extension>` for increasing `n` until a non-200.
    #[serde(rename_all = "kebab-case")]
    NumberedProbe {
        base_url: String,
        #[serde(default = "SourceConfig::default_extension")]
        extension: String,
        #[serde(default)]
        first_index: u32,
        #[serde(default)]
        max_images: Option<u32>,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::GalleryApi {
            endpoint: String::new(),
        }
    }
}

impl SourceConfig {
    fn default_extension() -> String {
        "jpg".to_string()
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::GalleryApi { endpoint } => {
                ensure!(
                    endpoint.starts_with("http://") || endpoint.starts_with("https://"),
                    "source.endpoint must be an http(s) URL, got {endpoint:?}"
                );
            }
            Self::NumberedProbe {
                base_url,
                extension,
                max_images,
                ..
            } => {
                ensure!(
                    base_url.starts_with("http://") || base_url.starts_with("https://"),
                    "source.base-url must be an http(s) URL, got {base_url:?}"
                );
                ensure!(
                    !extension.is_empty() && !extension.starts_with('.'),
                    "source.extension must be non-empty and given without a leading dot"
                );
                ensure!(
                    max_images.is_none_or(|max| max > 0),
                    "source.max-images must be greater than zero when set"
                );
            }
        }
        Ok(())
    }
}

/// Exact-host substitution applied to every image download URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HostRewrite {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub host_rewrites: Vec<HostRewrite>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            request_timeout: Duration::from_secs(30),
            host_rewrites: Vec::new(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.connect_timeout.is_zero(),
            "network.connect-timeout must be greater than zero"
        );
        ensure!(
            !self.request_timeout.is_zero(),
            "network.request-timeout must be greater than zero"
        );
        for rewrite in &self.host_rewrites {
            ensure!(
                !rewrite.from.is_empty() && !rewrite.to.is_empty(),
                "network.host-rewrites entries need both from and to"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CarouselOptions {
    /// Period between automatic page advances.
    #[serde(with = "humantime_serde")]
    pub auto_advance: Duration,
    /// Length of the animated slide between two pages.
    #[serde(with = "humantime_serde")]
    pub slide_duration: Duration,
    /// Decoded images are shrunk so neither edge exceeds this many pixels.
    pub max_image_dimension: u32,
    pub loader_max_concurrent_decodes: usize,
}

impl Default for CarouselOptions {
    fn default() -> Self {
        Self {
            auto_advance: Duration::from_secs(5),
            slide_duration: Duration::from_millis(300),
            max_image_dimension: 3840,
            loader_max_concurrent_decodes: 2,
        }
    }
}

impl CarouselOptions {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.auto_advance.is_zero(),
            "carousel.auto-advance must be greater than zero"
        );
        ensure!(
            self.slide_duration < self.auto_advance,
            "carousel.slide-duration ({}) must be shorter than carousel.auto-advance ({})",
            humantime::format_duration(self.slide_duration),
            humantime::format_duration(self.auto_advance)
        );
        ensure!(
            self.max_image_dimension > 0,
            "carousel.max-image-dimension must be greater than zero"
        );
        ensure!(
            self.loader_max_concurrent_decodes > 0,
            "carousel.loader-max-concurrent-decodes must be greater than zero"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ViewerOptions {
    pub fullscreen: bool,
    pub hide_cursor: bool,
    pub background: [u8; 3],
    /// How long a transient notice stays on screen.
    #[serde(with = "humantime_serde")]
    pub notice_duration: Duration,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            fullscreen: true,
            hide_cursor: true,
            background: [0, 0, 0],
            notice_duration: Duration::from_secs(2),
        }
    }
}

/// Sysfs backlight node written on every wake, e.g. `bl_power`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BacklightConfig {
    pub path: PathBuf,
    #[serde(default = "BacklightConfig::default_wake_value")]
    pub wake_value: String,
}

impl BacklightConfig {
    fn default_wake_value() -> String {
        "0".to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Shell command that powers the output on (e.g. `wlr-randr --output HDMI-A-1 --on`).
    pub wake_command: Option<String>,
    pub backlight: Option<BacklightConfig>,
    /// Repeat the wake at this period so screen blanking never sticks.
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Option<Duration>,
}

impl DisplayConfig {
    pub fn is_enabled(&self) -> bool {
        self.wake_command.is_some() || self.backlight.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(command) = self.wake_command.as_deref() {
            ensure!(
                !command.trim().is_empty(),
                "display.wake-command must not be blank"
            );
        }
        if let Some(backlight) = &self.backlight {
            ensure!(
                !backlight.path.as_os_str().is_empty(),
                "display.backlight.path must not be empty"
            );
            ensure!(
                !backlight.wake_value.trim().is_empty(),
                "display.backlight.wake-value must not be blank"
            );
        }
        if let Some(interval) = self.keep_alive_interval {
            ensure!(
                !interval.is_zero(),
                "display.keep-alive-interval must be greater than zero"
            );
            ensure!(
                self.is_enabled(),
                "display.keep-alive-interval needs a wake-command or backlight to repeat"
            );
        }
        Ok(())
    }
}
