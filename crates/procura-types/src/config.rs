//! Engine configuration types for Procura.
//!
//! `EngineConfig` represents the top-level `config.toml` in the data
//! directory. Every section and field has a default, so an empty file (or
//! no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.procura/config.toml` (or `$PROCURA_DATA_DIR/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub vendor_onboarding: VendorOnboardingConfig,

    #[serde(default)]
    pub purchase_order: PurchaseOrderConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Run-loop guard rails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum nodes executed within one start/resume call.
    #[serde(default = "default_max_steps_per_call")]
    pub max_steps_per_call: u32,

    /// Per-node execution timeout in seconds.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
}

fn default_max_steps_per_call() -> u32 {
    64
}

fn default_node_timeout_secs() -> u64 {
    30
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_steps_per_call: default_max_steps_per_call(),
            node_timeout_secs: default_node_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorOnboardingConfig {
    /// Department approval branches opened after central approval.
    #[serde(default = "default_departments")]
    pub departments: Vec<String>,

    /// Payload fields (camelCase) that must be present and non-blank.
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
}

fn default_departments() -> Vec<String> {
    vec![
        "finance".to_string(),
        "legal".to_string(),
        "business".to_string(),
    ]
}

fn default_required_fields() -> Vec<String> {
    vec!["name".to_string(), "taxId".to_string()]
}

impl Default for VendorOnboardingConfig {
    fn default() -> Self {
        Self {
            departments: default_departments(),
            required_fields: default_required_fields(),
        }
    }
}

/// Amount thresholds for purchase order approval tiers.
///
/// `amount < l1_limit` routes to L1, `amount < l2_limit` to L2, anything
/// larger to L3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderConfig {
    #[serde(default = "default_l1_limit")]
    pub l1_limit: f64,

    #[serde(default = "default_l2_limit")]
    pub l2_limit: f64,
}

fn default_l1_limit() -> f64 {
    100_000.0
}

fn default_l2_limit() -> f64 {
    1_000_000.0
}

impl Default for PurchaseOrderConfig {
    fn default() -> Self {
        Self {
            l1_limit: default_l1_limit(),
            l2_limit: default_l2_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Export spans through the OpenTelemetry stdout exporter.
    #[serde(default)]
    pub otel: bool,
}
