use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, runtime_dir};

fn default_max_output() -> usize {
    2_800
}

/// Engine configuration, persisted as `settings.json` under the runtime
/// directory. Every field has a default so partial settings files merge
/// cleanly over the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run code without asking for confirmation first.
    pub auto_run: bool,
    /// No network side channels: implies telemetry stays off.
    pub offline: bool,
    pub verbose: bool,
    pub debug: bool,
    /// Console-output bound, in bytes retained per entry.
    pub max_output: usize,
    pub conversation: ConversationConfig,
    pub capture: CaptureConfig,
    pub telemetry: TelemetryConfig,
    pub task_loop: LoopConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_run: false,
            offline: false,
            verbose: false,
            debug: false,
            max_output: default_max_output(),
            conversation: ConversationConfig::default(),
            capture: CaptureConfig::default(),
            telemetry: TelemetryConfig::default(),
            task_loop: LoopConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Snapshot every one-off call's full log to disk.
    pub history: bool,
    /// Fixed snapshot filename; derived from the first message when unset.
    pub filename: Option<String>,
    /// Snapshot directory; `<runtime dir>/conversations` when unset.
    pub dir: Option<PathBuf>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history: true,
            filename: None,
            dir: None,
        }
    }
}

impl ConversationConfig {
    #[must_use]
    pub fn resolved_dir(&self, workspace: &Path) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| runtime_dir(workspace).join("conversations"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    /// Capture command tokens; `{path}` is replaced with the target file.
    /// Capture is effectively disabled while this is empty.
    pub command: Vec<String>,
    /// Screenshot directory; `<runtime dir>/screenshots` when unset.
    pub dir: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: Vec::new(),
            dir: None,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn resolved_dir(&self, workspace: &Path) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| runtime_dir(workspace).join("screenshots"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

fn default_loop_message() -> String {
    "Proceed. You CAN run code on my machine. If the entire task is done, say exactly \
     'The task is done.' If you need specific information, say EXACTLY 'Please provide \
     more information.' If it's impossible, say 'The task is impossible.' (If no task \
     was given, say exactly 'Let me know what you'd like to do next.') Otherwise keep \
     going."
        .to_string()
}

fn default_loop_breakers() -> Vec<String> {
    [
        "The task is done.",
        "The task is impossible.",
        "Let me know what you'd like to do next.",
        "Please provide more information.",
    ]
    .map(str::to_string)
    .to_vec()
}

/// Settings for front-ends that keep prompting until a termination phrase
/// appears in the model's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub enabled: bool,
    /// Follow-up prompt re-sent between iterations.
    pub message: String,
    /// Phrases that end the loop when they appear in an assistant message.
    pub breakers: Vec<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            message: default_loop_message(),
            breakers: default_loop_breakers(),
        }
    }
}

impl EngineConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".deskpilot/settings.json"))
    }

    pub fn settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    /// Telemetry is sent only when configured on and not offline.
    #[must_use]
    pub fn anonymous_telemetry(&self) -> bool {
        self.telemetry.enabled && !self.offline
    }

    /// Defaults, overlaid with user settings, overlaid with workspace settings.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    /// Loads settings, writing the defaults first when nothing exists yet.
    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::settings_path(workspace);
        if path.exists() || Self::user_settings_path().is_some_and(|p| p.exists()) {
            return Self::load(workspace);
        }
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid settings path"))?,
        )?;
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid settings path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
