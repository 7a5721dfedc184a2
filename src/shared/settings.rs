use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::watch;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use directories::ProjectDirs;

use crate::core::hotkey::{Chord, PointerGesture};
use super::error::{OverlayError, OverlayResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub trigger: TriggerSettings,
    pub placement: PlacementSettings,
    pub focus: FocusSettings,
    pub paste: PasteSettings,
    pub close_key: String,
    pub debug_logging: bool,
    /// Set once the accessibility prompt has been shown; it is never shown again
    pub accessibility_prompted: bool,
}

/// The user-configurable trigger binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub hotkey: String,
    pub pointer_gesture: Option<String>,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementSettings {
    pub offset: f64,
    pub padding: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteSettings {
    pub activation_timeout_ms: u64,
    /// Bundle ids that receive typed characters instead of a paste shortcut
    pub terminal_apps: Vec<String>,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            trigger: TriggerSettings::default(),
            placement: PlacementSettings::default(),
            focus: FocusSettings::default(),
            paste: PasteSettings::default(),
            close_key: "Escape".to_string(),
            debug_logging: false,
            accessibility_prompted: false,
        }
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            hotkey: "Control+Shift+Space".to_string(),
            pointer_gesture: None,
            debounce_ms: 300,
        }
    }
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            offset: 12.0,
            padding: 10.0,
        }
    }
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            retry_interval_ms: 50,
        }
    }
}

impl Default for PasteSettings {
    fn default() -> Self {
        Self {
            activation_timeout_ms: 1500,
            terminal_apps: vec![
                "com.apple.Terminal".to_string(),
                "com.googlecode.iterm2".to_string(),
                "dev.warp.Warp-Stable".to_string(),
                "net.kovidgoyal.kitty".to_string(),
                "org.alacritty".to_string(),
                "com.github.wez.wezterm".to_string(),
            ],
        }
    }
}

impl TriggerSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> OverlayResult<()> {
        self.hotkey.parse::<Chord>()?;
        if let Some(gesture) = &self.pointer_gesture {
            gesture.parse::<PointerGesture>()?;
        }
        Ok(())
    }
}

impl OverlaySettings {
    pub fn validate(&self) -> OverlayResult<()> {
        self.trigger.validate()?;
        self.close_key.parse::<Chord>()?;
        if self.focus.max_attempts == 0 {
            return Err(OverlayError::Settings("focus.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Settings file plus the "hotkey changed" broadcast.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<OverlaySettings>,
    trigger_tx: watch::Sender<TriggerSettings>,
}

impl SettingsStore {
    pub fn settings_path() -> OverlayResult<PathBuf> {
        ProjectDirs::from("com", "tool-suite", "cursor-overlay")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .ok_or_else(|| OverlayError::Settings("Failed to determine config directory".to_string()))
    }

    pub fn open_default() -> OverlayResult<Self> {
        Ok(Self::at(Self::settings_path()?))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        let defaults = OverlaySettings::default();
        let (trigger_tx, _) = watch::channel(defaults.trigger.clone());
        Self {
            path: path.into(),
            current: RwLock::new(defaults),
            trigger_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file (defaults when missing) and make it current.
    pub async fn load(&self) -> OverlayResult<OverlaySettings> {
        let settings = if !self.path.exists() {
            // Don't save defaults here, wait for an explicit save
            OverlaySettings::default()
        } else {
            let content = fs::read_to_string(&self.path).await?;
            let parsed: OverlaySettings = serde_json::from_str(&content)?;
            if let Err(e) = parsed.validate() {
                tracing::warn!(path = %self.path.display(), "Ignoring invalid settings file: {}", e);
                OverlaySettings::default()
            } else {
                parsed
            }
        };

        self.replace_current(settings.clone());
        Ok(settings)
    }

    /// Validate, write to disk, then broadcast a trigger change if there was one.
    pub async fn save(&self, settings: OverlaySettings) -> OverlayResult<()> {
        settings.validate()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&settings)?;
        fs::write(&self.path, content).await?;

        self.replace_current(settings);
        Ok(())
    }

    /// Persist that onboarding already asked for accessibility access.
    pub async fn mark_accessibility_prompted(&self) -> OverlayResult<()> {
        let mut settings = self.current();
        if settings.accessibility_prompted {
            return Ok(());
        }
        settings.accessibility_prompted = true;
        self.save(settings).await
    }

    pub fn current(&self) -> OverlaySettings {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Receiver that changes whenever the trigger binding changes.
    pub fn subscribe(&self) -> watch::Receiver<TriggerSettings> {
        self.trigger_tx.subscribe()
    }

    fn replace_current(&self, settings: OverlaySettings) {
        let trigger = settings.trigger.clone();
        match self.current.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }

        let changed = self.trigger_tx.send_if_modified(|current| {
            if *current != trigger {
                *current = trigger;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!("Trigger binding changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.json"));

        let settings = store.load().await.unwrap();
        assert_eq!(settings, OverlaySettings::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::at(&path);

        let mut settings = OverlaySettings::default();
        settings.trigger.hotkey = "Command+Alt+K".to_string();
        settings.paste.activation_timeout_ms = 900;
        store.save(settings.clone()).await.unwrap();

        let reopened = SettingsStore::at(&path);
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.trigger.hotkey, "Command+Alt+K");
        assert_eq!(loaded.paste.activation_timeout_ms, 900);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "trigger": { "hotkey": "Control+Alt+P" } }"#).unwrap();

        let store = SettingsStore::at(&path);
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.trigger.hotkey, "Control+Alt+P");
        assert_eq!(loaded.trigger.debounce_ms, 300);
        assert_eq!(loaded.close_key, "Escape");
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_hotkey() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.json"));

        let mut settings = OverlaySettings::default();
        settings.trigger.hotkey = "Control+Banana".to_string();

        let result = store.save(settings).await;
        assert!(matches!(result, Err(OverlayError::InvalidHotkey(_))));
        assert!(!store.path().exists());
        assert_eq!(store.current().trigger.hotkey, "Control+Shift+Space");
    }

    #[tokio::test]
    async fn test_accessibility_prompt_flag_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::at(&path);
        let mut rx = store.subscribe();
        assert!(!store.load().await.unwrap().accessibility_prompted);

        store.mark_accessibility_prompted().await.unwrap();
        assert!(store.current().accessibility_prompted);
        assert!(!rx.has_changed().unwrap());

        let reopened = SettingsStore::at(&path);
        assert!(reopened.load().await.unwrap().accessibility_prompted);
    }

    #[tokio::test]
    async fn test_hotkey_change_is_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.json"));
        let mut rx = store.subscribe();

        // Saving something unrelated to the trigger stays quiet
        let mut settings = OverlaySettings::default();
        settings.focus.max_attempts = 3;
        store.save(settings.clone()).await.unwrap();
        assert!(!rx.has_changed().unwrap());

        settings.trigger.hotkey = "Command+Shift+O".to_string();
        store.save(settings).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().hotkey, "Command+Shift+O");
    }
}
