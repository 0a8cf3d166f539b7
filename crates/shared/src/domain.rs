use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine phase as reported by the controller.
///
/// Anything the controller sends outside the known set lands in
/// [`ProcessStatus::Unknown`] and counts as an in-flight run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    #[default]
    Idle,
    Dispensing,
    Grinding,
    Blending,
    Discharging,
    Completed,
    #[serde(other)]
    Unknown,
}

impl ProcessStatus {
    /// True when no production run is in flight.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Completed)
    }

    pub fn is_processing(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Dispensing => "DISPENSING",
            Self::Grinding => "GRINDING",
            Self::Blending => "BLENDING",
            Self::Discharging => "DISCHARGING",
            Self::Completed => "COMPLETED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Motor currently driven by the controller.
///
/// Hoppers travel as single letters on the wire; the long form is accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MotorId {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "A", alias = "HOPPER_A")]
    HopperA,
    #[serde(rename = "B", alias = "HOPPER_B")]
    HopperB,
    #[serde(rename = "C", alias = "HOPPER_C")]
    HopperC,
    #[serde(rename = "BLENDER")]
    Blender,
    #[serde(rename = "GRINDER")]
    Grinder,
    #[serde(rename = "UNKNOWN", other)]
    Unknown,
}

impl MotorId {
    pub const HOPPERS: [MotorId; 3] = [Self::HopperA, Self::HopperB, Self::HopperC];

    pub fn is_hopper(self) -> bool {
        matches!(self, Self::HopperA | Self::HopperB | Self::HopperC)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::HopperA => "A",
            Self::HopperB => "B",
            Self::HopperC => "C",
            Self::Blender => "BLENDER",
            Self::Grinder => "GRINDER",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
