use shared::error::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("a production run is already in progress")]
    Busy,
    #[error("recipe form is read-only while the machine is processing")]
    FormLocked,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("communication failure: {0}")]
    CommunicationFailure(String),
}

impl DashboardError {
    /// True for rejections decided locally, before anything touched the network.
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::CommunicationFailure(_))
    }
}
