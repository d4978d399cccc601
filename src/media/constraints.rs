//! Acquisition constraints and device capabilities

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which way the camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera
    User,
    /// Rear camera
    Environment,
    Left,
    Right,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Environment => "environment",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// A numeric hint for a track setting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hint {
    Exact(f64),
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ideal: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
}

/// Video track constraints used to select and configure the camera
///
/// Sessions compare constraints by identity: pass a new `Arc` to force
/// reconfiguration even if the contents are equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing_mode: Option<FacingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Hint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Hint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<Hint>,
}

impl VideoConstraints {
    pub fn facing(mode: FacingMode) -> Self {
        Self {
            facing_mode: Some(mode),
            ..Self::default()
        }
    }

    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Full acquisition request handed to the platform. Audio is always off.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConstraints {
    pub audio: bool,
    pub video: Arc<VideoConstraints>,
}

impl StreamConstraints {
    pub fn video_only(video: Arc<VideoConstraints>) -> Self {
        Self { audio: false, video }
    }
}

/// One entry of the `advanced` constraint list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torch: Option<bool>,
}

/// Constraint update applied to a live track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackConstraints {
    #[serde(default)]
    pub advanced: Vec<AdvancedConstraint>,
}

impl TrackConstraints {
    pub fn torch(enabled: bool) -> Self {
        Self {
            advanced: vec![AdvancedConstraint {
                torch: Some(enabled),
            }],
        }
    }

    /// Torch value requested by this update, if any
    pub fn requested_torch(&self) -> Option<bool> {
        self.advanced.iter().find_map(|c| c.torch)
    }
}

/// Feature name to supported range or values, as reported by a track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeMap<String, Value>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether the device declares torch support.
    /// Platforms report either `true` or a list of supported states.
    pub fn supports_torch(&self) -> bool {
        match self.0.get("torch") {
            Some(Value::Bool(supported)) => *supported,
            Some(Value::Array(states)) => states.iter().any(|s| s == &Value::Bool(true)),
            _ => false,
        }
    }
}
