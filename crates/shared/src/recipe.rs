//! Recipe form state and the pre-flight rules a draft must pass before a run starts.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Absolute tolerance, in percentage points, on the bean ratio sum.
pub const RATIO_SUM_TOLERANCE: f64 = 0.01;

/// Operator-editable recipe. Values are kept non-negative at entry time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecipeDraft {
    pub total_weight_grams: f64,
    pub ratio_a: f64,
    pub ratio_b: f64,
    pub ratio_c: f64,
    pub blender_rpm: f64,
    pub blend_time_seconds: f64,
}

impl Default for RecipeDraft {
    fn default() -> Self {
        Self {
            total_weight_grams: 20.0,
            ratio_a: 60.0,
            ratio_b: 20.0,
            ratio_c: 20.0,
            blender_rpm: 1000.0,
            blend_time_seconds: 2.0,
        }
    }
}

impl RecipeDraft {
    pub fn ratio_sum(&self) -> f64 {
        self.ratio_a + self.ratio_b + self.ratio_c
    }

    pub fn field(&self, field: RecipeField) -> f64 {
        match field {
            RecipeField::TotalWeight => self.total_weight_grams,
            RecipeField::RatioA => self.ratio_a,
            RecipeField::RatioB => self.ratio_b,
            RecipeField::RatioC => self.ratio_c,
            RecipeField::BlenderRpm => self.blender_rpm,
            RecipeField::BlendTime => self.blend_time_seconds,
        }
    }

    /// Stores raw form input for `field`, sanitized with [`sanitize_input`].
    pub fn set_field(&mut self, field: RecipeField, raw: &str) -> f64 {
        let value = sanitize_input(raw);
        let slot = match field {
            RecipeField::TotalWeight => &mut self.total_weight_grams,
            RecipeField::RatioA => &mut self.ratio_a,
            RecipeField::RatioB => &mut self.ratio_b,
            RecipeField::RatioC => &mut self.ratio_c,
            RecipeField::BlenderRpm => &mut self.blender_rpm,
            RecipeField::BlendTime => &mut self.blend_time_seconds,
        };
        *slot = value;
        value
    }

    /// Form rendering of a field: zero shows as an empty box.
    pub fn display_value(&self, field: RecipeField) -> String {
        let value = self.field(field);
        if value == 0.0 {
            String::new()
        } else {
            value.to_string()
        }
    }
}

/// A draft that passed [`validate`]. Only obtainable through validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidRecipe(RecipeDraft);

impl ValidRecipe {
    pub fn as_draft(&self) -> &RecipeDraft {
        &self.0
    }

    pub fn total_weight_grams(&self) -> f64 {
        self.0.total_weight_grams
    }
}

/// Checks a draft in operator-facing priority order; the first failure wins.
pub fn validate(draft: &RecipeDraft) -> Result<ValidRecipe, ValidationError> {
    // NaN fails both comparisons.
    if !(draft.total_weight_grams > 0.0) {
        return Err(ValidationError::InvalidWeight {
            total_weight_grams: draft.total_weight_grams,
        });
    }

    let sum = draft.ratio_sum();
    if !((sum - 100.0).abs() <= RATIO_SUM_TOLERANCE) {
        return Err(ValidationError::InvalidRatioSum { sum });
    }

    Ok(ValidRecipe(*draft))
}

/// Keystroke-level parse of a numeric form field.
///
/// Empty, unparsable, and non-finite text all read as 0; negatives clamp to 0.
pub fn sanitize_input(raw: &str) -> f64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0.0;
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipeField {
    TotalWeight,
    RatioA,
    RatioB,
    RatioC,
    BlenderRpm,
    BlendTime,
}

impl RecipeField {
    pub const ALL: [RecipeField; 6] = [
        Self::TotalWeight,
        Self::BlenderRpm,
        Self::BlendTime,
        Self::RatioA,
        Self::RatioB,
        Self::RatioC,
    ];

    /// Key used both by the form and by the make-coffee request body.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::TotalWeight => "totalWeight",
            Self::RatioA => "ra",
            Self::RatioB => "rb",
            Self::RatioC => "rc",
            Self::BlenderRpm => "rpm",
            Self::BlendTime => "blendTime",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TotalWeight => "Total Weight(g)",
            Self::RatioA => "Bean A (%)",
            Self::RatioB => "Bean B (%)",
            Self::RatioC => "Bean C (%)",
            Self::BlenderRpm => "Blender RPM",
            Self::BlendTime => "Mix Time(sec)",
        }
    }
}

impl fmt::Display for RecipeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown recipe field '{0}'")]
pub struct UnknownRecipeField(pub String);

impl FromStr for RecipeField {
    type Err = UnknownRecipeField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "totalweight" | "total_weight" | "weight" => Ok(Self::TotalWeight),
            "ra" | "a" => Ok(Self::RatioA),
            "rb" | "b" => Ok(Self::RatioB),
            "rc" | "c" => Ok(Self::RatioC),
            "rpm" | "blender_rpm" => Ok(Self::BlenderRpm),
            "blendtime" | "blend_time" | "time" => Ok(Self::BlendTime),
            _ => Err(UnknownRecipeField(s.to_string())),
        }
    }
}
