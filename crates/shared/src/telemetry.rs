//! Displayed machine state and the fold that advances it from telemetry.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{MotorId, ProcessStatus},
    protocol::TelemetryEvent,
};

/// Dashboard view of the machine, rebuilt from telemetry.
///
/// Never edited in place by readers: every transition yields a new value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub current_weight_grams: f64,
    pub status: ProcessStatus,
    pub active_motor: MotorId,
    pub log: Vec<String>,
}

impl MachineSnapshot {
    /// Folds one telemetry event. Weight, status, and motor are last-write-wins;
    /// a non-empty message becomes the new last log entry.
    #[must_use]
    pub fn apply(&self, event: &TelemetryEvent) -> Self {
        let mut log = self.log.clone();
        if let Some(message) = event.message.as_deref().filter(|m| !m.is_empty()) {
            log.push(message.to_string());
        }
        Self {
            current_weight_grams: event.current_weight,
            status: event.status,
            active_motor: event.active_motor,
            log,
        }
    }

    /// Snapshot shown the moment a run is accepted locally: scale zeroed,
    /// log restarted with `starter`. Status and motor wait for telemetry.
    #[must_use]
    pub fn restarted(&self, starter: impl Into<String>) -> Self {
        Self {
            current_weight_grams: 0.0,
            status: self.status,
            active_motor: self.active_motor,
            log: vec![starter.into()],
        }
    }

    #[must_use]
    pub fn with_log_entry(&self, entry: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.log.push(entry.into());
        next
    }

    pub fn is_processing(&self) -> bool {
        self.status.is_processing()
    }

    pub fn motor_active(&self, motor: MotorId) -> bool {
        motor != MotorId::None && self.active_motor == motor
    }

    pub fn progress_percent(&self, target_weight_grams: f64) -> f64 {
        progress_percent(self.current_weight_grams, target_weight_grams)
    }
}

/// Fill level against the recipe target, clamped to `0..=100`.
/// A zero target (or any non-finite ratio) reads as 0.
pub fn progress_percent(current_weight_grams: f64, target_weight_grams: f64) -> f64 {
    if target_weight_grams == 0.0 {
        return 0.0;
    }
    let percent = current_weight_grams / target_weight_grams * 100.0;
    if !percent.is_finite() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}

/// Render hint for a process log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTone {
    Plain,
    Section,
    Step,
    Info,
}

const INFO_KEYWORDS: [&str; 4] = ["완료", "배출", "complete", "discharg"];

/// Later rules override earlier ones: info beats step beats section.
pub fn classify_log_line(line: &str) -> LogTone {
    let lower = line.to_lowercase();
    if INFO_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        LogTone::Info
    } else if line.contains(">>>") {
        LogTone::Step
    } else if line.contains("---") {
        LogTone::Section
    } else {
        LogTone::Plain
    }
}
