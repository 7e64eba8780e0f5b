//! Client metrics configuration
//!
//! Loaded from `GRPC_CLIENT_METRICS_*` environment variables:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `GRPC_CLIENT_METRICS_NAMESPACE` | prefix for every metric name |
//! | `GRPC_CLIENT_METRICS_CONST_LABELS` | `key=value,key=value` labels added to every metric |
//! | `GRPC_CLIENT_METRICS_HANDLING_TIME_HISTOGRAM` | enable `grpc_client_handling_seconds` |
//! | `GRPC_CLIENT_METRICS_HANDLING_TIME_BUCKETS` | comma separated bucket bounds in seconds |
//! | `GRPC_CLIENT_METRICS_STREAM_RECEIVE_TIME_HISTOGRAM` | enable per-receive timing |
//! | `GRPC_CLIENT_METRICS_STREAM_SEND_TIME_HISTOGRAM` | enable per-send timing |

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use crate::error::Result;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "GRPC_CLIENT_METRICS_";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientMetricsConfig {
    /// Prefix joined to every metric name with `_`
    pub namespace: Option<String>,

    /// Constant labels attached to every metric
    #[serde(deserialize_with = "deserialize_const_labels")]
    pub const_labels: HashMap<String, String>,

    /// Record `grpc_client_handling_seconds`
    pub handling_time_histogram: bool,

    /// Custom handling-time buckets; the default ladder is used when unset
    pub handling_time_buckets: Option<Vec<f64>>,

    /// Record `grpc_client_msg_recv_handling_seconds`
    pub stream_receive_time_histogram: bool,

    /// Record `grpc_client_msg_send_handling_seconds`
    pub stream_send_time_histogram: bool,
}

impl ClientMetricsConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Self>()?)
    }

    /// Load configuration from explicit key/value pairs (keys keep the prefix)
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?)
    }
}

fn deserialize_const_labels<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_const_labels(&raw).map_err(serde::de::Error::custom)
}

fn parse_const_labels(raw: &str) -> std::result::Result<HashMap<String, String>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(format!("const label `{pair}` must be in key=value form")),
        })
        .collect()
}
