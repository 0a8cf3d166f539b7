//! Single-owner dashboard state: the recipe form plus the current machine snapshot.

use shared::{
    error::TelemetryDecodeError,
    protocol::TelemetryEvent,
    recipe::{validate, RecipeDraft, RecipeField, ValidRecipe},
    telemetry::MachineSnapshot,
};

use crate::error::DashboardError;

pub const START_MESSAGE: &str = "[SYSTEM] production run requested...";
pub const COMMUNICATION_FAILURE_MESSAGE: &str = "!! SERVER ERROR: communication failure";
pub const MALFORMED_TELEMETRY_MESSAGE: &str = "!! COMM FAULT: dropped malformed telemetry frame";

#[derive(Debug, Clone, Default)]
pub struct DashboardSession {
    draft: RecipeDraft,
    snapshot: MachineSnapshot,
    submission_in_flight: bool,
}

impl DashboardSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draft(draft: RecipeDraft) -> Self {
        Self {
            draft,
            ..Self::default()
        }
    }

    pub fn draft(&self) -> &RecipeDraft {
        &self.draft
    }

    pub fn snapshot(&self) -> &MachineSnapshot {
        &self.snapshot
    }

    pub fn is_processing(&self) -> bool {
        self.snapshot.is_processing()
    }

    /// Form inputs are read-only while a run is in flight.
    pub fn is_form_locked(&self) -> bool {
        self.is_processing()
    }

    pub fn progress_percent(&self) -> f64 {
        self.snapshot
            .progress_percent(self.draft.total_weight_grams)
    }

    pub fn edit_field(&mut self, field: RecipeField, raw: &str) -> Result<f64, DashboardError> {
        if self.is_form_locked() {
            return Err(DashboardError::FormLocked);
        }
        Ok(self.draft.set_field(field, raw))
    }

    pub fn replace_draft(&mut self, draft: RecipeDraft) -> Result<(), DashboardError> {
        if self.is_form_locked() {
            return Err(DashboardError::FormLocked);
        }
        self.draft = draft;
        Ok(())
    }

    /// Gate and validate the current draft. On success the snapshot restarts
    /// (scale zeroed, log = start message) before the server has answered.
    pub fn begin_submission(&mut self) -> Result<ValidRecipe, DashboardError> {
        if self.is_processing() || self.submission_in_flight {
            return Err(DashboardError::Busy);
        }
        let recipe = validate(&self.draft)?;
        self.snapshot = self.snapshot.restarted(START_MESSAGE);
        self.submission_in_flight = true;
        Ok(recipe)
    }

    pub fn finish_submission(&mut self) {
        self.submission_in_flight = false;
    }

    /// One log line per failed POST; status is left for telemetry to correct.
    pub fn record_submit_failure(&mut self, reason: &str) {
        self.submission_in_flight = false;
        self.snapshot = self
            .snapshot
            .with_log_entry(format!("{COMMUNICATION_FAILURE_MESSAGE} ({reason})"));
    }

    pub fn apply_event(&mut self, event: &TelemetryEvent) {
        self.snapshot = self.snapshot.apply(event);
    }

    /// Decode and fold one frame body. Undecodable frames are dropped and
    /// noted in the log; the snapshot otherwise stays as it was.
    pub fn ingest_frame(&mut self, body: &str) -> Result<(), TelemetryDecodeError> {
        match TelemetryEvent::from_json(body) {
            Ok(event) => {
                self.apply_event(&event);
                Ok(())
            }
            Err(err) => {
                self.snapshot = self.snapshot.with_log_entry(MALFORMED_TELEMETRY_MESSAGE);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
