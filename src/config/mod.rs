//! Configuration management
//!
//! Handles loading, validation and hot-reloading of the YAML configuration.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

pub use watcher::ConfigWatcher;

use crate::chain::check_range;
use crate::codec::EncoderConfig;
use crate::protocol::{ProtocolFamily, ProtocolOptions};
use crate::surface::{BlinkTiming, OutputKind, SurfaceOptions};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    /// Physical units, chained into one logical surface
    pub surfaces: Vec<SurfaceConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// One physical unit
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SurfaceConfig {
    pub name: String,
    pub protocol: ProtocolFamily,
    /// Case-insensitive substring of the MIDI input port name
    pub input_port: String,
    pub output_port: String,
    #[serde(default)]
    pub index_offset: u16,
    /// Mackie extender (device id 0x15)
    #[serde(default)]
    pub extender: bool,
    /// Pad family set-mode byte
    #[serde(default = "default_user_mode")]
    pub user_mode: u8,
    /// Defaults to the protocol family's encoder convention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<EncoderConfig>,
}

impl SurfaceConfig {
    pub fn protocol_options(&self) -> ProtocolOptions {
        ProtocolOptions {
            encoder: self.encoder.unwrap_or_else(|| self.protocol.default_encoder()),
            extender: self.extender,
            user_mode: self.user_mode,
        }
    }
}

/// Timing of deferred work; the only section applied on hot reload
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_blink_tick_ms")]
    pub blink_tick_ms: u64,
    #[serde(default = "default_blink_fast_ticks")]
    pub blink_fast_ticks: u32,
    #[serde(default = "default_blink_slow_ticks")]
    pub blink_slow_ticks: u32,
    #[serde(default = "default_reconfirm_ms")]
    pub reconfirm_ms: u64,
    #[serde(default = "default_reconfirm_kinds")]
    pub reconfirm_kinds: Vec<OutputKind>,
    /// 0 disables long-press detection
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,
    /// 0 disables keepalive pings
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            blink_tick_ms: default_blink_tick_ms(),
            blink_fast_ticks: default_blink_fast_ticks(),
            blink_slow_ticks: default_blink_slow_ticks(),
            reconfirm_ms: default_reconfirm_ms(),
            reconfirm_kinds: default_reconfirm_kinds(),
            long_press_ms: default_long_press_ms(),
            keepalive_ms: default_keepalive_ms(),
        }
    }
}

impl TimingConfig {
    pub fn surface_options(&self) -> SurfaceOptions {
        let optional = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        SurfaceOptions {
            reconfirm_kinds: self.reconfirm_kinds.clone(),
            reconfirm_delay: Duration::from_millis(self.reconfirm_ms),
            blink: BlinkTiming {
                tick: Duration::from_millis(self.blink_tick_ms),
                fast_ticks: self.blink_fast_ticks,
                slow_ticks: self.blink_slow_ticks,
            },
            long_press: optional(self.long_press_ms),
            keepalive: optional(self.keepalive_ms),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate YAML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.surfaces.is_empty() {
            anyhow::bail!("At least one surface must be defined");
        }

        let mut ranges = Vec::new();
        let mut names = HashSet::new();
        for (idx, surface) in self.surfaces.iter().enumerate() {
            if surface.name.trim().is_empty() {
                anyhow::bail!("Surface {} name cannot be empty", idx);
            }
            if !names.insert(surface.name.as_str()) {
                anyhow::bail!("Duplicate surface name '{}'", surface.name);
            }
            if surface.input_port.trim().is_empty() {
                anyhow::bail!("Surface '{}' input_port cannot be empty", surface.name);
            }
            if surface.output_port.trim().is_empty() {
                anyhow::bail!("Surface '{}' output_port cannot be empty", surface.name);
            }
            let span = surface.protocol.span();
            if let Err(e) = check_range(surface.index_offset, span, ranges.iter().copied()) {
                anyhow::bail!("Surface '{}' index_offset: {}", surface.name, e);
            }
            ranges.push((surface.index_offset, span));
            if surface.user_mode > 0x7F {
                anyhow::bail!("Surface '{}' user_mode {} is not a 7-bit value", surface.name, surface.user_mode);
            }
            if let Some(encoder) = &surface.encoder {
                if !(1..=7).contains(&encoder.bits) {
                    anyhow::bail!("Surface '{}' encoder bits {} (must be 1-7)", surface.name, encoder.bits);
                }
                if encoder.step < 1 {
                    anyhow::bail!("Surface '{}' encoder step must be at least 1", surface.name);
                }
            }
        }

        let timing = &self.timing;
        if timing.blink_tick_ms == 0 {
            anyhow::bail!("timing.blink_tick_ms must be greater than 0");
        }
        if timing.blink_fast_ticks == 0 || timing.blink_slow_ticks == 0 {
            anyhow::bail!("timing blink tick counts must be greater than 0");
        }
        if timing.reconfirm_ms == 0 && !timing.reconfirm_kinds.is_empty() {
            anyhow::bail!("timing.reconfirm_ms must be greater than 0 when reconfirm_kinds is set");
        }

        Ok(())
    }
}

fn default_user_mode() -> u8 { 1 }
fn default_blink_tick_ms() -> u64 { 250 }
fn default_blink_fast_ticks() -> u32 { 1 }
fn default_blink_slow_ticks() -> u32 { 2 }
fn default_reconfirm_ms() -> u64 { 120 }
fn default_reconfirm_kinds() -> Vec<OutputKind> { vec![OutputKind::KnobRing] }
fn default_long_press_ms() -> u64 { 500 }
fn default_keepalive_ms() -> u64 { 1000 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncoderEncoding;
    use std::io::Write;

    const MINIMAL: &str = r#"
surfaces:
  - name: main
    protocol: mcu
    input_port: "X-Touch"
    output_port: "X-Touch"
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::parse(MINIMAL).unwrap();
        let surface = &config.surfaces[0];
        assert_eq!(surface.index_offset, 0);
        assert!(!surface.extender);
        assert_eq!(surface.protocol_options().encoder.encoding, EncoderEncoding::SignMagnitude);
        assert_eq!(config.timing, TimingConfig::default());

        let options = config.timing.surface_options();
        assert_eq!(options, SurfaceOptions::default());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
surfaces:
  - name: grid
    protocol: pad
    input_port: "Ableton Push"
    output_port: "Ableton Push"
    user_mode: 1
    encoder: { encoding: twos_complement, bits: 7, step: 2 }
  - name: hui
    protocol: hui
    input_port: "HUI"
    output_port: "HUI"
    index_offset: 512
timing:
  blink_tick_ms: 200
  reconfirm_kinds: [knob_ring, fader]
  long_press_ms: 0
  keepalive_ms: 0
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert_eq!(config.surfaces[0].protocol, ProtocolFamily::Pad);
        assert_eq!(config.surfaces[0].protocol_options().encoder.step, 2);
        assert_eq!(config.surfaces[1].index_offset, 512);

        let options = config.timing.surface_options();
        assert_eq!(options.blink.tick, Duration::from_millis(200));
        assert_eq!(options.reconfirm_kinds, vec![OutputKind::KnobRing, OutputKind::Fader]);
        assert_eq!(options.long_press, None);
        assert_eq!(options.keepalive, None);
    }

    #[test]
    fn test_validation_errors() {
        assert!(AppConfig::parse("surfaces: []").is_err());

        let duplicate_offsets = r#"
surfaces:
  - { name: a, protocol: mcu, input_port: a, output_port: a }
  - { name: b, protocol: mcu, input_port: b, output_port: b }
"#;
        let err = AppConfig::parse(duplicate_offsets).unwrap_err();
        assert!(err.to_string().contains("index_offset"));

        let extender_too_close = r#"
surfaces:
  - { name: a, protocol: mcu, input_port: a, output_port: a }
  - { name: b, protocol: mcu, input_port: b, output_port: b, index_offset: 8, extender: true }
"#;
        let err = AppConfig::parse(extender_too_close).unwrap_err();
        assert!(err.to_string().contains("overlaps"));

        let bad_bits = r#"
surfaces:
  - name: a
    protocol: pad
    input_port: a
    output_port: a
    encoder: { encoding: twos_complement, bits: 9 }
"#;
        assert!(AppConfig::parse(bad_bits).is_err());

        let zero_tick = format!("{}timing:\n  blink_tick_ms: 0\n", MINIMAL);
        assert!(AppConfig::parse(&zero_tick).is_err());

        let unknown_protocol = MINIMAL.replace("mcu", "launchpad");
        assert!(AppConfig::parse(&unknown_protocol).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.surfaces[0].name, "main");

        assert!(AppConfig::load("/nonexistent/config.yaml").await.is_err());
    }
}
