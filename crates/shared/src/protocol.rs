use serde::{Deserialize, Serialize};

use crate::{
    domain::{MotorId, ProcessStatus},
    error::TelemetryDecodeError,
    recipe::ValidRecipe,
};

/// Topic the controller publishes scale and motor telemetry on.
pub const TELEMETRY_TOPIC: &str = "/topic/scale";
/// Path, relative to the API base, that starts a production run.
pub const MAKE_COFFEE_PATH: &str = "/coffee/make";

/// One telemetry push from the machine controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub current_weight: f64,
    pub status: ProcessStatus,
    pub active_motor: MotorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TelemetryEvent {
    pub fn from_json(body: &str) -> Result<Self, TelemetryDecodeError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Body of `POST {api}/coffee/make`. Field names are fixed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeCoffeeRequest {
    pub total_weight: f64,
    pub ra: f64,
    pub rb: f64,
    pub rc: f64,
    pub rpm: f64,
    pub blend_time: f64,
}

impl From<&ValidRecipe> for MakeCoffeeRequest {
    fn from(recipe: &ValidRecipe) -> Self {
        let draft = recipe.as_draft();
        Self {
            total_weight: draft.total_weight_grams,
            ra: draft.ratio_a,
            rb: draft.ratio_b,
            rc: draft.ratio_c,
            rpm: draft.blender_rpm,
            blend_time: draft.blend_time_seconds,
        }
    }
}
