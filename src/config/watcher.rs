//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Delay before re-reading, so editors can finish writing
const SETTLE: Duration = Duration::from_millis(100);

/// Watches the config file and yields each valid new version
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the file once and start watching it
    pub async fn new(config_path: String) -> Result<(Self, AppConfig)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path).await.context("Failed to load initial config")?;

        // notify callbacks run on their own OS thread, outside the runtime
        let runtime_handle = tokio::runtime::Handle::current();
        let path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) if matches!(event.kind, EventKind::Modify(_)) => {
                debug!("Config file modified: {:?}", event.paths);
                let path = path.clone();
                let tx = tx.clone();
                runtime_handle.spawn(async move {
                    tokio::time::sleep(SETTLE).await;
                    match AppConfig::load(&path).await {
                        Ok(config) => {
                            info!("Configuration reloaded");
                            if let Err(e) = tx.send(config).await {
                                error!("Failed to send config update: {}", e);
                            }
                        }
                        Err(e) => warn!("Failed to reload config (keeping old config): {:#}", e),
                    }
                });
            }
            Ok(_) => {}
            Err(e) => error!("Watch error: {}", e),
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Config file watcher started for: {}", config_path);

        Ok((Self { _watcher: watcher, rx }, initial_config))
    }

    /// Wait for the next config update; `None` once the watcher is closed
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

/// What a reload changed, as far as a running engine is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadScope {
    Unchanged,
    /// Only timing changed; can be applied live
    Timing,
    /// Surfaces changed; needs a restart
    Restart,
}

pub fn reload_scope(old: &AppConfig, new: &AppConfig) -> ReloadScope {
    if old.surfaces != new.surfaces {
        ReloadScope::Restart
    } else if old.timing != new.timing {
        ReloadScope::Timing
    } else {
        ReloadScope::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
surfaces:
  - name: main
    protocol: hui
    input_port: "test-in"
    output_port: "test-out"
"#;

    #[tokio::test]
    async fn test_config_watcher_basic() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("test-config.yaml");
        fs::write(&config_path, CONFIG)?;

        let (mut watcher, config) = ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.surfaces[0].input_port, "test-in");

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, format!("{}timing:\n  blink_tick_ms: 125\n", CONFIG))?;

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;
        if let Some(new_config) = new_config {
            assert_eq!(new_config.timing.blink_tick_ms, 125);
            assert_eq!(reload_scope(&config, &new_config), ReloadScope::Timing);
        }

        Ok(())
    }

    #[test]
    fn test_reload_scope() {
        let old = AppConfig::parse(CONFIG).unwrap();
        assert_eq!(reload_scope(&old, &old.clone()), ReloadScope::Unchanged);

        let mut moved = old.clone();
        moved.surfaces[0].index_offset = 8;
        assert_eq!(reload_scope(&old, &moved), ReloadScope::Restart);
    }
}
