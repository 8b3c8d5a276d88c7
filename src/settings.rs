//! Persisted device settings.
//!
//! Settings live in a flat JSON object (`settings.json`). The control loop
//! reads them once at startup; later edits are picked up by
//! [`SettingsWatcher`], which reloads the file on a background thread and
//! hands a fresh [`RangerSettings`] snapshot to the loop over a channel, so
//! the controller is only ever touched from the loop itself.

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::calibration::{DEFAULT_REFERENCE_CM, DEFAULT_TARGET_SAMPLES};
use crate::error::{RangingError, RangingResult};
use crate::ftm::{SessionConfig, DEFAULT_TIMEOUT_MS};
use crate::smoothing::DEFAULT_WINDOW;

pub const KEY_FRAME_COUNT: &str = "ftm_frame_count";
pub const KEY_BURST_PERIOD: &str = "ftm_burst_period";
pub const KEY_TIMEOUT_MS: &str = "ftm_timeout_ms";
pub const KEY_CALIBRATION_REFERENCE_CM: &str = "calibration_reference_cm";
pub const KEY_CALIBRATION_SAMPLES: &str = "calibration_samples";
pub const KEY_CALIBRATION_OFFSET_CM: &str = "calibration_offset_cm";
pub const KEY_FILTER_WINDOW: &str = "filter_window";

/// Read access to persisted key/value settings
pub trait SettingsSource {
    fn number(&self, key: &str) -> Option<f64>;
    fn text(&self, key: &str) -> Option<String>;
}

type ChangeListener = Box<dyn FnMut(&SettingsStore) + Send>;

/// JSON-file-backed settings with a single change listener
pub struct SettingsStore {
    path: PathBuf,
    values: Map<String, Value>,
    listener: Option<ChangeListener>,
}

impl SettingsStore {
    /// Load `path`; a missing file yields an empty store (all defaults)
    pub fn load(path: impl AsRef<Path>) -> RangingResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            read_values(&path)?
        } else {
            info!("No settings file at {}, using defaults", path.display());
            Map::new()
        };
        Ok(Self {
            path,
            values,
            listener: None,
        })
    }

    /// Register the listener called after a reload changed any value.
    /// Replaces any previous listener.
    pub fn on_changed<F>(&mut self, listener: F)
    where
        F: FnMut(&SettingsStore) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Re-read the file. Returns true (and notifies) when values changed.
    pub fn reload(&mut self) -> RangingResult<bool> {
        let fresh = if self.path.exists() {
            read_values(&self.path)?
        } else {
            Map::new()
        };
        if fresh == self.values {
            return Ok(false);
        }

        self.values = fresh;
        debug!("Settings changed in {}", self.path.display());
        if let Some(mut listener) = self.listener.take() {
            listener(self);
            self.listener = Some(listener);
        }
        Ok(true)
    }

    pub fn set_number(&mut self, key: &str, value: f64) {
        match serde_json::Number::from_f64(value) {
            Some(n) => {
                self.values.insert(key.to_string(), Value::Number(n));
            }
            None => warn!("Refusing to store non-finite value for '{}'", key),
        }
    }

    pub fn set_text(&mut self, key: &str, value: &str) {
        self.values
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn save(&self) -> RangingResult<()> {
        let json = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsSource for SettingsStore {
    fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

fn read_values(path: &Path) -> RangingResult<Map<String, Value>> {
    let raw = fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(RangingError::Settings(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
    }
}

/// Settings the ranging loop cares about, with defaults applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangerSettings {
    pub session: SessionConfig,
    pub timeout_ms: u64,
    pub calibration_reference_cm: f32,
    pub calibration_samples: u32,
    pub calibration_offset_cm: Option<f32>,
    pub filter_window: usize,
}

impl Default for RangerSettings {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            calibration_reference_cm: DEFAULT_REFERENCE_CM,
            calibration_samples: DEFAULT_TARGET_SAMPLES,
            calibration_offset_cm: None,
            filter_window: DEFAULT_WINDOW,
        }
    }
}

impl RangerSettings {
    pub fn from_source(source: &dyn SettingsSource) -> Self {
        let defaults = Self::default();

        let frames = source
            .number(KEY_FRAME_COUNT)
            .unwrap_or(defaults.session.frame_count.as_u8() as f64);
        let burst = source
            .number(KEY_BURST_PERIOD)
            .unwrap_or(defaults.session.burst_period as f64);
        let session = if frames < 0.0 || burst < 0.0 {
            warn!("Negative FTM settings ({frames}, {burst}), using defaults");
            defaults.session
        } else {
            SessionConfig::from_raw(frames as u32, burst as u32).unwrap_or_else(|e| {
                warn!("Ignoring FTM settings: {}", e);
                defaults.session
            })
        };

        Self {
            session,
            timeout_ms: positive(source.number(KEY_TIMEOUT_MS))
                .map(|v| v as u64)
                .unwrap_or(defaults.timeout_ms),
            calibration_reference_cm: source
                .number(KEY_CALIBRATION_REFERENCE_CM)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as f32)
                .unwrap_or(defaults.calibration_reference_cm),
            calibration_samples: positive(source.number(KEY_CALIBRATION_SAMPLES))
                .map(|v| v as u32)
                .unwrap_or(defaults.calibration_samples),
            calibration_offset_cm: source
                .number(KEY_CALIBRATION_OFFSET_CM)
                .filter(|v| v.is_finite())
                .map(|v| v as f32),
            filter_window: positive(source.number(KEY_FILTER_WINDOW))
                .map(|v| v as usize)
                .unwrap_or(defaults.filter_window),
        }
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 1.0)
}

/// Polls the settings file from a background thread and forwards a fresh
/// [`RangerSettings`] snapshot whenever its contents change.
pub struct SettingsWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SettingsWatcher {
    pub fn spawn(
        path: impl AsRef<Path>,
        interval: Duration,
    ) -> RangingResult<(Self, Receiver<RangerSettings>)> {
        let mut store = SettingsStore::load(path)?;
        let (tx, rx): (Sender<RangerSettings>, Receiver<RangerSettings>) = channel::bounded(4);

        store.on_changed(move |store| {
            let snapshot = RangerSettings::from_source(store);
            if tx.try_send(snapshot).is_err() {
                warn!("Settings change dropped, control loop is not draining");
            }
        });

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("settings-watcher".to_string())
            .spawn(move || {
                let mut last_modified = modified_time(store.path());
                while !stop_flag.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    let modified = modified_time(store.path());
                    if modified == last_modified {
                        continue;
                    }
                    last_modified = modified;
                    if let Err(e) = store.reload() {
                        warn!("Could not reload settings: {}", e);
                    }
                }
            })?;

        Ok((
            Self {
                stop,
                handle: Some(handle),
            },
            rx,
        ))
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            join_watcher(handle);
        }
    }
}

impl Drop for SettingsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns false when the watcher thread had panicked
fn join_watcher(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            warn!("Settings watcher thread panicked; settings changes were no longer applied");
            false
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
