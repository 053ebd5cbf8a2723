use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::merge::{
    BoneNameMap, DEFAULT_ORIENTATION_SEED, DEFAULT_ROOT_BONE_NAME, DEFAULT_SAMPLE_SIZE,
    DEFAULT_TIE_TOLERANCE, MAX_INFLUENCES, MergeOptions, OrientationOptions,
};

/// Orientation search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationSettings {
    pub sample_size: usize,
    /// `null` draws a fresh subsample on every run.
    pub seed: Option<u64>,
    /// Relative loss gap under which the winner is reported as ambiguous.
    pub tie_tolerance: f32,
}

impl Default for OrientationSettings {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: Some(DEFAULT_ORIENTATION_SEED),
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
        }
    }
}

/// Where output bone names come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMapSetting {
    /// Keep predicted names.
    #[default]
    None,
    /// Built-in Mixamo-to-VRM humanoid table.
    Humanoid,
    /// JSON object of `source: target` names.
    File(PathBuf),
}

impl FromStr for NameMapSetting {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "none" => NameMapSetting::None,
            "humanoid" => NameMapSetting::Humanoid,
            path => NameMapSetting::File(PathBuf::from(path)),
        })
    }
}

impl NameMapSetting {
    pub fn resolve(&self) -> Result<Option<BoneNameMap>> {
        match self {
            NameMapSetting::None => Ok(None),
            NameMapSetting::Humanoid => Ok(Some(BoneNameMap::humanoid())),
            NameMapSetting::File(path) => load_name_map(path).map(Some),
        }
    }
}

/// Persisted merge settings used by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    pub add_synthetic_root: bool,
    pub root_bone_name: String,
    pub max_influences: usize,
    pub orientation: OrientationSettings,
    pub name_map: NameMapSetting,
    /// Write `<output>.diagnostic.json` beside each exported file.
    pub write_diagnostics: bool,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            add_synthetic_root: false,
            root_bone_name: DEFAULT_ROOT_BONE_NAME.to_string(),
            max_influences: MAX_INFLUENCES,
            orientation: OrientationSettings::default(),
            name_map: NameMapSetting::None,
            write_diagnostics: false,
        }
    }
}

impl MergeSettings {
    /// Validate the settings and resolve them into engine options.
    pub fn to_options(&self) -> Result<MergeOptions> {
        self.validate()?;
        Ok(MergeOptions {
            add_synthetic_root: self.add_synthetic_root,
            root_bone_name: self.root_bone_name.clone(),
            max_influences: self.max_influences,
            orientation: OrientationOptions {
                sample_size: self.orientation.sample_size,
                seed: self.orientation.seed,
                tie_tolerance: self.orientation.tie_tolerance,
            },
            name_map: self.name_map.resolve()?,
        })
    }

    fn validate(&self) -> Result<(), MergeError> {
        if !(1..=MAX_INFLUENCES).contains(&self.max_influences) {
            return Err(MergeError::InvalidOption(format!(
                "max_influences must be between 1 and {MAX_INFLUENCES}, got {}",
                self.max_influences
            )));
        }
        if self.orientation.sample_size == 0 {
            return Err(MergeError::InvalidOption(
                "orientation.sample_size must be positive".to_string(),
            ));
        }
        let tolerance = self.orientation.tie_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(MergeError::InvalidOption(format!(
                "orientation.tie_tolerance must be a non-negative number, got {tolerance}"
            )));
        }
        if self.add_synthetic_root && self.root_bone_name.trim().is_empty() {
            return Err(MergeError::InvalidOption(
                "root_bone_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Save merge settings to a JSON file.
pub fn save_settings(path: &Path, settings: &MergeSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to serialize merge settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save merge settings: {}", path.display()))?;
    Ok(())
}

/// Load merge settings from a JSON file. Missing keys take their defaults.
pub fn load_settings(path: &Path) -> Result<MergeSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load merge settings: {}", path.display()))?;
    let settings: MergeSettings =
        serde_json::from_str(&content).context("failed to parse merge settings JSON")?;
    Ok(settings)
}

fn load_name_map(path: &Path) -> Result<BoneNameMap> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load bone name map: {}", path.display()))?;
    serde_json::from_str(&content).context("failed to parse bone name map JSON")
}
