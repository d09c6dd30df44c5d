//! Lower-leg orientation from knee, ankle and foot landmarks
//!
//! Two corrections are applied in world space:
//! 1. the limb's lateral axis is swung onto the ankle -> knee direction
//!    (left leg: `-right`, right leg: `+right`)
//! 2. `forward` is swung onto the normal of the foot plane spanned by the
//!    ankle -> heel and ankle -> foot index vectors (mirrored for the right leg)

use super::{from_to_rotation, Correction, JointTransform, LandmarkSet, PoseLandmark, Side};
use crate::config::SolverConfig;

#[derive(Debug, Clone, Copy)]
pub struct KneeSolver {
    side: Side,
    epsilon_sq: f32,
}

impl KneeSolver {
    pub fn new(side: Side) -> Self {
        Self::from_config(side, &SolverConfig::default())
    }

    pub fn from_config(side: Side, config: &SolverConfig) -> Self {
        Self {
            side,
            epsilon_sq: config.degenerate_epsilon,
        }
    }

    fn landmarks(&self) -> [PoseLandmark; 4] {
        match self.side {
            Side::Left => [
                PoseLandmark::LeftKnee,
                PoseLandmark::LeftAnkle,
                PoseLandmark::LeftHeel,
                PoseLandmark::LeftFootIndex,
            ],
            Side::Right => [
                PoseLandmark::RightKnee,
                PoseLandmark::RightAnkle,
                PoseLandmark::RightHeel,
                PoseLandmark::RightFootIndex,
            ],
        }
    }

    /// Correct `transform` from the tracked landmarks. Does nothing without
    /// landmarks or when one of the four leg landmarks is missing.
    pub fn apply(
        &self,
        landmarks: Option<&LandmarkSet>,
        transform: &mut JointTransform,
    ) -> Correction {
        let mut correction = Correction::default();

        let Some(landmarks) = landmarks else {
            return correction;
        };

        let [knee, ankle, heel, index] = self.landmarks();
        let (Some(knee), Some(ankle), Some(heel), Some(index)) = (
            landmarks.get(knee),
            landmarks.get(ankle),
            landmarks.get(heel),
            landmarks.get(index),
        ) else {
            tracing::trace!("{:?} knee: missing landmarks", self.side);
            return correction;
        };

        let lateral = match self.side {
            Side::Left => -transform.right(),
            Side::Right => transform.right(),
        };
        if let Some(q) = from_to_rotation(lateral, knee - ankle, self.epsilon_sq) {
            transform.rotate_world(q);
            correction.axis_aligned = true;
        }

        let to_heel = heel - ankle;
        let to_index = index - ankle;
        let normal = match self.side {
            Side::Left => to_index.cross(to_heel),
            Side::Right => to_heel.cross(to_index),
        };
        if let Some(q) = from_to_rotation(transform.forward(), normal, self.epsilon_sq) {
            transform.rotate_world(q);
            correction.twist_corrected = true;
        }

        if !correction.axis_aligned || !correction.twist_corrected {
            tracing::trace!(
                "{:?} knee: degenerate landmarks, applied {:?}",
                self.side,
                correction
            );
        }

        correction
    }
}
