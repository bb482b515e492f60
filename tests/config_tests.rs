use std::path::PathBuf;
use std::time::Duration;

use kiosk_carousel::config::{
    BacklightConfig, Configuration, HostRewrite, SourceConfig, WritePolicy,
};

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
source:
  type: gallery-api
  endpoint: "https://art.example/api/gallery"
cache:
  directory: "/tmp/carousel"
  write-policy: skip-existing
  clear-on-refresh: false
network:
  connect-timeout: 3s
  host-rewrites:
    - from: artlocal.example
      to: 10.0.2.2
carousel:
  auto-advance: 8s
  slide-duration: 450ms
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        cfg.source,
        SourceConfig::GalleryApi {
            endpoint: "https://art.example/api/gallery".to_string()
        }
    );
    assert_eq!(cfg.cache.directory, PathBuf::from("/tmp/carousel"));
    assert_eq!(cfg.cache.write_policy, WritePolicy::SkipExisting);
    assert!(!cfg.cache.clear_on_refresh);
    assert_eq!(cfg.network.connect_timeout, Duration::from_secs(3));
    assert_eq!(cfg.network.request_timeout, Duration::from_secs(30));
    assert_eq!(
        cfg.network.host_rewrites,
        vec![HostRewrite {
            from: "artlocal.example".to_string(),
            to: "10.0.2.2".to_string(),
        }]
    );
    assert_eq!(cfg.carousel.auto_advance, Duration::from_secs(8));
    assert_eq!(cfg.carousel.slide_duration, Duration::from_millis(450));
    cfg.validated().unwrap();
}

#[test]
fn defaults_fill_everything_but_the_source() {
    let yaml = r#"
source:
  type: gallery-api
  endpoint: "http://127.0.0.1:8080/gallery"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        cfg.cache.directory,
        PathBuf::from("/var/cache/kiosk-carousel")
    );
    assert_eq!(cfg.cache.write_policy, WritePolicy::Overwrite);
    assert!(cfg.cache.clear_on_refresh);
    assert!(cfg.network.host_rewrites.is_empty());
    assert_eq!(cfg.carousel.auto_advance, Duration::from_secs(5));
    assert_eq!(cfg.carousel.slide_duration, Duration::from_millis(300));
    assert_eq!(cfg.carousel.loader_max_concurrent_decodes, 2);
    assert!(cfg.viewer.fullscreen);
    assert!(cfg.viewer.hide_cursor);
    assert_eq!(cfg.viewer.background, [0, 0, 0]);
    cfg.validated().unwrap();
}

#[test]
fn parse_numbered_probe_source() {
    let yaml = r#"
source:
  type: numbered-probe
  base-url: "http://images.example/photos/"
  first-index: 1
  max-images: 40
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        cfg.source,
        SourceConfig::NumberedProbe {
            base_url: "http://images.example/photos/".to_string(),
            extension: "jpg".to_string(),
            first_index: 1,
            max_images: Some(40),
        }
    );
    cfg.validated().unwrap();
}

#[test]
fn unknown_keys_are_rejected() {
    let yaml = r#"
carousel:
  auto-advance: 5s
  autoplay: true
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn missing_source_fails_validation() {
    let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(format!("{err:#}").contains("source"));
}

#[test]
fn slide_must_be_shorter_than_advance() {
    let yaml = r#"
source:
  type: gallery-api
  endpoint: "http://127.0.0.1/gallery"
carousel:
  auto-advance: 1s
  slide-duration: 2s
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(format!("{err:#}").contains("slide-duration"));
}

#[test]
fn probe_rejects_zero_limit_and_dotted_extension() {
    for source in [
        r#"{type: numbered-probe, base-url: "http://a/", max-images: 0}"#,
        r#"{type: numbered-probe, base-url: "http://a/", extension: ".jpg"}"#,
        r#"{type: numbered-probe, base-url: "ftp://a/"}"#,
    ] {
        let yaml = format!("source: {source}\n");
        let cfg: Configuration = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validated().is_err(), "expected {source} to be rejected");
    }
}

#[test]
fn load_from_yaml_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        tmp.path(),
        "source:\n  type: gallery-api\n  endpoint: http://127.0.0.1/g\n",
    )
    .unwrap();
    let cfg = Configuration::from_yaml_file(tmp.path())
        .unwrap()
        .validated()
        .unwrap();
    assert!(matches!(cfg.source, SourceConfig::GalleryApi { .. }));
}

#[test]
fn parse_display_keep_awake_section() {
    let yaml = r#"
source:
  type: gallery-api
  endpoint: "http://127.0.0.1/gallery"
display:
  wake-command: "wlr-randr --output HDMI-A-1 --on"
  backlight:
    path: /sys/class/backlight/rpi_backlight/bl_power
  keep-alive-interval: 1m
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(
        cfg.display.wake_command.as_deref(),
        Some("wlr-randr --output HDMI-A-1 --on")
    );
    assert_eq!(
        cfg.display.backlight,
        Some(BacklightConfig {
            path: PathBuf::from("/sys/class/backlight/rpi_backlight/bl_power"),
            wake_value: "0".to_string(),
        })
    );
    assert_eq!(cfg.display.keep_alive_interval, Some(Duration::from_secs(60)));
    assert!(cfg.display.is_enabled());
    cfg.validated().unwrap();
}

#[test]
fn display_is_disabled_by_default() {
    let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
    assert!(!cfg.display.is_enabled());
    assert_eq!(cfg.display.keep_alive_interval, None);
}

#[test]
fn display_rejects_bad_keep_awake_settings() {
    for display in [
        r#"{wake-command: "   "}"#,
        r#"{backlight: {path: "/sys/bl_power", wake-value: ""}}"#,
        r#"{wake-command: "true", keep-alive-interval: 0s}"#,
        r#"{keep-alive-interval: 30s}"#,
    ] {
        let yaml = format!(
            "source: {{type: gallery-api, endpoint: \"http://127.0.0.1/g\"}}\ndisplay: {display}\n"
        );
        let cfg: Configuration = serde_yaml::from_str(&yaml).unwrap();
        let err = cfg.validated().unwrap_err();
        assert!(
            format!("{err:#}").contains("display"),
            "expected {display} to be rejected"
        );
    }
}
