//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address values the control plane reports before a sensor has a real one
const PLACEHOLDER_ADDRESSES: &[&str] = &["", "null", "no-ip", "unknown"];

/// Lifecycle status of a sensor as reported by the inventory API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Pending,
    Running,
    Stopped,
    Error,
    Deleted,
    Unknown,
}

impl SensorStatus {
    /// Map a raw API status string onto the lifecycle enum.
    ///
    /// `terminated` instances are treated as deleted so the inventory can be
    /// garbage-collected; an empty status is `Unknown`.
    pub fn from_api(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => SensorStatus::Pending,
            "running" => SensorStatus::Running,
            "stopped" => SensorStatus::Stopped,
            "error" => SensorStatus::Error,
            "deleted" | "terminated" => SensorStatus::Deleted,
            _ => SensorStatus::Unknown,
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorStatus::Pending => write!(f, "pending"),
            SensorStatus::Running => write!(f, "running"),
            SensorStatus::Stopped => write!(f, "stopped"),
            SensorStatus::Error => write!(f, "error"),
            SensorStatus::Deleted => write!(f, "deleted"),
            SensorStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Resource usage collected from a sensor over SSH
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorMetrics {
    /// CPU usage percentage
    pub cpu: u32,
    /// Memory usage percentage
    pub memory: u32,
    /// Root disk usage percentage
    pub disk: u32,
    /// Number of healthy services/pods
    pub pods: u32,
}

impl SensorMetrics {
    /// Parse the `cpu|mem|disk|pods` line printed by the metrics command.
    ///
    /// Individual fields that fail to parse count as zero; a line without
    /// exactly four fields is rejected.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() != 4 {
            return None;
        }
        let field = |s: &str| s.trim().parse::<u32>().unwrap_or(0);
        Some(Self {
            cpu: field(parts[0]),
            memory: field(parts[1]),
            disk: field(parts[2]),
            pods: field(parts[3]),
        })
    }
}

/// Sensor record exactly as the control-plane API returns it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorRecord {
    #[serde(default)]
    pub ec2_sensor_name: String,
    #[serde(default)]
    pub sensor_ip: Option<String>,
    #[serde(default)]
    pub sensor_username: Option<String>,
    #[serde(default)]
    pub sensor_status: Option<String>,
    #[serde(default)]
    pub sensor_type: Option<String>,
    #[serde(default)]
    pub dev_branch: Option<String>,
    #[serde(default)]
    pub stack_name: Option<String>,
    #[serde(default)]
    pub brolin_version: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl SensorRecord {
    /// Convert into the domain type, using `requested` when the API omits the name
    pub fn into_sensor(self, requested: &str) -> Sensor {
        let name = if self.ec2_sensor_name.is_empty() {
            requested.to_string()
        } else {
            self.ec2_sensor_name
        };
        Sensor {
            name,
            address: self.sensor_ip,
            status: SensorStatus::from_api(self.sensor_status.as_deref().unwrap_or("")),
            username: self.sensor_username,
            sensor_type: self.sensor_type,
            dev_branch: self.dev_branch,
            stack_name: self.stack_name,
            version: self.brolin_version,
            created_at: self.created_at,
            metrics: None,
            error: None,
        }
    }
}

/// A remote network-monitoring instance tracked in the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Stable sensor name
    pub name: String,
    /// Current address; reassigned when the instance is redeployed
    pub address: Option<String>,
    /// Lifecycle status
    pub status: SensorStatus,
    pub username: Option<String>,
    pub sensor_type: Option<String>,
    pub dev_branch: Option<String>,
    pub stack_name: Option<String>,
    pub version: Option<String>,
    pub created_at: Option<String>,
    /// Metrics from the last collection, if any
    pub metrics: Option<SensorMetrics>,
    /// Why the sensor is in its current state, when known
    pub error: Option<String>,
}

impl Sensor {
    /// Synthetic record for a sensor the control plane no longer knows about
    pub fn deleted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            status: SensorStatus::Deleted,
            username: None,
            sensor_type: None,
            dev_branch: None,
            stack_name: None,
            version: None,
            created_at: None,
            metrics: None,
            error: Some("Sensor does not exist".to_string()),
        }
    }

    /// The address, if it is a real value rather than a provisioning placeholder
    pub fn valid_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|addr| !PLACEHOLDER_ADDRESSES.contains(addr))
    }

    /// Running with a usable address
    pub fn is_ready(&self) -> bool {
        self.status == SensorStatus::Running && self.valid_address().is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.status == SensorStatus::Deleted
    }

    /// Last eight characters of the name, for compact display
    pub fn short_id(&self) -> &str {
        short_id(&self.name)
    }
}

/// Last eight characters of a sensor name
pub fn short_id(name: &str) -> &str {
    let count = name.chars().count();
    if count <= 8 {
        return name;
    }
    match name.char_indices().nth(count - 8) {
        Some((idx, _)) => &name[idx..],
        None => name,
    }
}

/// Numeric suffix of a sensor name (`ec2-sensor-1700000000` → 1700000000), 0 if absent
pub fn numeric_suffix(name: &str) -> i64 {
    name.rsplit('-')
        .next()
        .and_then(|part| part.parse::<i64>().ok())
        .unwrap_or(0)
}
