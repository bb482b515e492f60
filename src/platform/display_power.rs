use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BacklightConfig, DisplayConfig};

/// Turns the panel on and keeps it on: backlight write and/or wake command.
#[derive(Debug, Clone)]
pub struct DisplayPower {
    inner: Arc<DisplayPowerInner>,
}

#[derive(Debug)]
struct DisplayPowerInner {
    backlight: Option<BacklightConfig>,
    wake_command: Option<String>,
}

impl DisplayPower {
    /// `None` when the config names neither a backlight nor a wake command.
    pub fn from_config(cfg: &DisplayConfig) -> Option<Self> {
        if !cfg.is_enabled() {
            return None;
        }
        Some(Self {
            inner: Arc::new(DisplayPowerInner {
                backlight: cfg.backlight.clone(),
                wake_command: cfg.wake_command.clone(),
            }),
        })
    }

    /// Blocking; every configured action is attempted even if an earlier one fails.
    pub fn wake(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(backlight) = &self.inner.backlight
            && let Err(err) = fs::write(&backlight.path, &backlight.wake_value)
        {
            errors.push(format!(
                "failed to write '{}' to {}: {err}",
                backlight.wake_value,
                backlight.path.display()
            ));
        }

        if let Some(command) = self.inner.wake_command.as_deref()
            && let Err(err) = run_command(command)
        {
            errors.push(format!("wake command '{command}' failed: {err:#}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(errors.join("; ")))
        }
    }

    async fn wake_blocking(&self) -> Result<()> {
        let power = self.clone();
        tokio::task::spawn_blocking(move || power.wake())
            .await
            .context("display wake task failed")?
    }
}

fn run_command(command: &str) -> Result<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .with_context(|| format!("failed to spawn shell for command: {command}"))?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!(
            "command exited with status {}",
            status.code().unwrap_or(-1)
        ))
    }
}

/// Wakes the display once, then again every `keep_alive` until cancelled.
///
/// Failures are logged and never end the task; a blank screen is better
/// retried than given up on.
pub async fn run(
    power: DisplayPower,
    keep_alive: Option<Duration>,
    cancel: CancellationToken,
) -> Result<()> {
    match power.wake_blocking().await {
        Ok(()) => info!("display woken at startup"),
        Err(err) => warn!(error = %err, "failed to wake display at startup"),
    }

    let Some(period) = keep_alive else {
        return Ok(());
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match power.wake_blocking().await {
                    Ok(()) => debug!("display keep-alive"),
                    Err(err) => warn!(error = %err, "display keep-alive failed"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        wake_command: Option<String>,
        backlight: Option<BacklightConfig>,
        keep_alive_interval: Option<Duration>,
    ) -> DisplayConfig {
        DisplayConfig {
            wake_command,
            backlight,
            keep_alive_interval,
        }
    }

    #[test]
    fn disabled_without_any_action() {
        assert!(DisplayPower::from_config(&DisplayConfig::default()).is_none());
    }

    #[test]
    fn wake_writes_backlight_value() {
        let tmp = tempfile::tempdir().unwrap();
        let node = tmp.path().join("bl_power");
        std::fs::write(&node, "4").unwrap();
        let backlight = BacklightConfig {
            path: node.clone(),
            wake_value: "0".to_string(),
        };

        let power = DisplayPower::from_config(&config(None, Some(backlight), None)).unwrap();
        power.wake().unwrap();
        assert_eq!(std::fs::read_to_string(&node).unwrap(), "0");
    }

    #[test]
    fn failing_command_does_not_skip_backlight() {
        let tmp = tempfile::tempdir().unwrap();
        let node = tmp.path().join("bl_power");
        let backlight = BacklightConfig {
            path: node.clone(),
            wake_value: "0".to_string(),
        };

        let power =
            DisplayPower::from_config(&config(Some("exit 3".into()), Some(backlight), None))
                .unwrap();
        let err = power.wake().unwrap_err();
        assert!(err.to_string().contains("status 3"));
        assert_eq!(std::fs::read_to_string(&node).unwrap(), "0");
    }

    #[test]
    fn missing_backlight_node_is_an_error() {
        let backlight = BacklightConfig {
            path: "/nonexistent/backlight/bl_power".into(),
            wake_value: "0".to_string(),
        };
        let power = DisplayPower::from_config(&config(None, Some(backlight), None)).unwrap();
        assert!(power.wake().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn keep_alive_repeats_wake_until_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("wakes.log");
        let command = format!("echo wake >> '{}'", log.display());
        let power = DisplayPower::from_config(&config(
            Some(command),
            None,
            Some(Duration::from_millis(50)),
        ))
        .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(power, Some(Duration::from_millis(50)), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("display task should stop promptly")
            .unwrap()
            .unwrap();

        let wakes = std::fs::read_to_string(&log).unwrap().lines().count();
        assert!(wakes >= 3, "expected startup wake plus keep-alives, got {wakes}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_wake_without_keep_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("wakes.log");
        let command = format!("echo wake >> '{}'", log.display());
        let power = DisplayPower::from_config(&config(Some(command), None, None)).unwrap();

        run(power, None, CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);
    }
}
