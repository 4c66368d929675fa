//! Age/gender decoding of the attribute network's raw outputs.
//!
//! The network predicts a coarse age level (0–6) plus a soft weight vector over
//! age bins; the estimate interpolates reference ages around the predicted
//! level and is clamped to that level's plausible range.

use crate::network::{Network, NetworkError};
use crate::pipeline::FaceFailure;
use ndarray::{Array4, ArrayD};

/// Reference age for each bin.
pub const AGE_BINS: [f32; 8] = [0.0, 3.0, 10.5, 20.5, 30.5, 40.5, 53.0, 70.0];
/// Upper clamp per age level.
pub const AGE_UPPER: [f32; 8] = [5.0, 15.0, 25.0, 35.0, 45.0, 60.0, 80.0, 0.0];
/// Lower clamp per age level.
pub const AGE_LOWER: [f32; 8] = [0.0, 6.0, 16.0, 26.0, 36.0, 46.0, 61.0, 0.0];

/// Highest age level the clamp tables define meaningfully.
pub const MAX_AGE_LEVEL: usize = 6;

const ATTRIBUTE_OUTPUTS: usize = 5;
const LEVEL_OUTPUT: usize = 0;
const GENDER_OUTPUT: usize = 2;
const WEIGHTS_OUTPUT: usize = 4;

/// The three attribute-network outputs the decoder uses.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeGenderRaw {
    pub age_level: f32,
    pub gender: f32,
    pub weights: Vec<f32>,
}

impl AgeGenderRaw {
    /// Pick the level, gender and weight outputs out of the network's five tensors.
    pub fn from_outputs(
        network: &dyn Network,
        outputs: &[ArrayD<f32>],
    ) -> Result<Self, NetworkError> {
        let shape_err = |expected: String, actual: String| NetworkError::ShapeMismatch {
            network: network.name().to_string(),
            expected,
            actual,
        };
        if outputs.len() < ATTRIBUTE_OUTPUTS {
            return Err(shape_err(
                format!("{ATTRIBUTE_OUTPUTS} outputs"),
                format!("{} outputs", outputs.len()),
            ));
        }
        let scalar = |idx: usize| -> Result<f32, NetworkError> {
            outputs[idx]
                .iter()
                .next()
                .copied()
                .ok_or_else(|| shape_err(format!("a value in output {idx}"), "empty".into()))
        };
        let weights: Vec<f32> = outputs[WEIGHTS_OUTPUT].iter().copied().collect();
        if weights.len() <= MAX_AGE_LEVEL {
            return Err(shape_err(
                format!("at least {} age weights", MAX_AGE_LEVEL + 1),
                format!("{:?}", outputs[WEIGHTS_OUTPUT].shape()),
            ));
        }
        Ok(Self {
            age_level: scalar(LEVEL_OUTPUT)?,
            gender: scalar(GENDER_OUTPUT)?,
            weights,
        })
    }
}

/// Decoded attribute estimate for one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeGender {
    pub age: f32,
    /// Raw gender score, passed through unchanged.
    pub gender: f32,
}

pub fn decode(raw: &AgeGenderRaw) -> Result<AgeGender, FaceFailure> {
    let level = raw.age_level;
    if !(0.0..=MAX_AGE_LEVEL as f32).contains(&level) || level.fract() != 0.0 {
        return Err(FaceFailure::AgeLevelOutOfRange(level));
    }
    let age = estimate_age(level as usize, &raw.weights)?;
    Ok(AgeGender {
        age,
        gender: raw.gender,
    })
}

/// Interpolated age for `level`, clamped to `[AGE_LOWER[level], AGE_UPPER[level]]`.
pub fn estimate_age(level: usize, weights: &[f32]) -> Result<f32, FaceFailure> {
    if level > MAX_AGE_LEVEL {
        return Err(FaceFailure::AgeLevelOutOfRange(level as f32));
    }
    let needed = (level + 2).min(MAX_AGE_LEVEL + 1);
    if weights.len() < needed {
        return Err(FaceFailure::MalformedAttributes(format!(
            "age weights need {needed} entries, got {}",
            weights.len()
        )));
    }

    let age = match level {
        0 => weights[1] * AGE_BINS[2] + weights[0] * AGE_BINS[0],
        MAX_AGE_LEVEL => weights[6] * AGE_BINS[7] + weights[5] * AGE_BINS[6],
        l => {
            weights[l - 1] * AGE_BINS[l]
                + weights[l] * AGE_BINS[l + 1]
                + weights[l + 1] * AGE_BINS[l + 2]
        }
    };

    Ok(age.clamp(AGE_LOWER[level], AGE_UPPER[level]))
}
