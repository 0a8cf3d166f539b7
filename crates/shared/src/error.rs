use thiserror::Error;

/// Pre-flight rejection of a recipe draft. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("target weight must be greater than 0 g (got {total_weight_grams})")]
    InvalidWeight { total_weight_grams: f64 },
    #[error("bean ratios sum to {sum}%; they must add up to 100%")]
    InvalidRatioSum { sum: f64 },
}

/// A telemetry frame body that could not be read as a [`crate::protocol::TelemetryEvent`].
#[derive(Debug, Error)]
#[error("malformed telemetry: {source}")]
pub struct TelemetryDecodeError {
    #[from]
    source: serde_json::Error,
}
