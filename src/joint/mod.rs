//! Joint orientation from tracked body landmarks.
//!
//! Landmarks use MediaPipe Pose naming (`leftKnee`, `rightFootIndex`, ...)
//! and world-space coordinates. Solvers rotate a [`JointTransform`] in place
//! so that its local axes follow the tracked limb.

pub mod knee;

pub use knee::KneeSolver;

use glam::{Quat, Vec3};
use std::collections::HashMap;

/// Lower-body pose landmarks used by the joint solvers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoseLandmark {
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

/// (landmark, MediaPipe key)
const LANDMARK_NAMES: &[(PoseLandmark, &str)] = &[
    (PoseLandmark::LeftHip, "leftHip"),
    (PoseLandmark::RightHip, "rightHip"),
    (PoseLandmark::LeftKnee, "leftKnee"),
    (PoseLandmark::RightKnee, "rightKnee"),
    (PoseLandmark::LeftAnkle, "leftAnkle"),
    (PoseLandmark::RightAnkle, "rightAnkle"),
    (PoseLandmark::LeftHeel, "leftHeel"),
    (PoseLandmark::RightHeel, "rightHeel"),
    (PoseLandmark::LeftFootIndex, "leftFootIndex"),
    (PoseLandmark::RightFootIndex, "rightFootIndex"),
];

impl PoseLandmark {
    pub fn name(self) -> &'static str {
        LANDMARK_NAMES
            .iter()
            .find(|(lm, _)| *lm == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        LANDMARK_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(lm, _)| *lm)
    }
}

/// Which limb of a mirrored pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Tracked landmark positions for one frame
#[derive(Debug, Clone, Default)]
pub struct LandmarkSet {
    positions: HashMap<PoseLandmark, Vec3>,
}

impl LandmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from MediaPipe-style named positions, skipping unknown names
    pub fn from_named(named: &HashMap<String, [f32; 3]>) -> Self {
        let positions = named
            .iter()
            .filter_map(|(name, pos)| {
                PoseLandmark::from_name(name).map(|lm| (lm, Vec3::from_array(*pos)))
            })
            .collect();
        Self { positions }
    }

    pub fn insert(&mut self, landmark: PoseLandmark, position: Vec3) {
        self.positions.insert(landmark, position);
    }

    pub fn with(mut self, landmark: PoseLandmark, position: Vec3) -> Self {
        self.insert(landmark, position);
        self
    }

    pub fn get(&self, landmark: PoseLandmark) -> Option<Vec3> {
        self.positions.get(&landmark).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// World rotation of one limb segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointTransform {
    pub rotation: Quat,
}

impl Default for JointTransform {
    fn default() -> Self {
        Self {
            rotation: Quat::IDENTITY,
        }
    }
}

impl JointTransform {
    pub fn new(rotation: Quat) -> Self {
        Self { rotation }
    }

    /// Local +X in world space
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Local +Y in world space
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Local +Z in world space
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    /// Apply a world-space rotation on top of the current one
    pub fn rotate_world(&mut self, rotation: Quat) {
        self.rotation = (rotation * self.rotation).normalize();
    }
}

/// Which corrections a solver applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Correction {
    /// The limb axis was aligned with the segment direction
    pub axis_aligned: bool,
    /// The forward axis was aligned with the foot plane normal
    pub twist_corrected: bool,
}

impl Correction {
    pub fn any(&self) -> bool {
        self.axis_aligned || self.twist_corrected
    }
}

/// Shortest-arc rotation taking `from` onto `to`.
///
/// `None` if either vector's squared length is below `epsilon_sq`.
pub fn from_to_rotation(from: Vec3, to: Vec3, epsilon_sq: f32) -> Option<Quat> {
    if from.length_squared() < epsilon_sq || to.length_squared() < epsilon_sq {
        return None;
    }
    let from = from.try_normalize()?;
    let to = to.try_normalize()?;
    Some(Quat::from_rotation_arc(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_names_round_trip() {
        for &(lm, name) in LANDMARK_NAMES {
            assert_eq!(PoseLandmark::from_name(name), Some(lm));
            assert_eq!(lm.name(), name);
        }
        assert_eq!(PoseLandmark::from_name("nose"), None);
    }

    #[test]
    fn test_from_named_skips_unknown() {
        let mut named = HashMap::new();
        named.insert("leftKnee".to_string(), [0.0, 1.0, 0.0]);
        named.insert("nose".to_string(), [0.0, 2.0, 0.0]);

        let set = LandmarkSet::from_named(&named);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(PoseLandmark::LeftKnee), Some(Vec3::Y));
    }

    #[test]
    fn test_rotate_world_composes_on_the_left() {
        let mut t = JointTransform::default();
        t.rotate_world(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        assert!((t.right() - Vec3::Y).length() < 1e-5);

        t.rotate_world(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2));
        // World X rotation carries +Y to +Z
        assert!((t.right() - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_from_to_rotation() {
        let q = from_to_rotation(Vec3::X, Vec3::new(0.0, 3.0, 0.0), 1e-10).unwrap();
        assert!((q * Vec3::X - Vec3::Y).length() < 1e-5);

        assert!(from_to_rotation(Vec3::ZERO, Vec3::Y, 1e-10).is_none());
        assert!(from_to_rotation(Vec3::X, Vec3::splat(1e-6), 1e-10).is_none());
    }

    #[test]
    fn test_from_to_rotation_opposite() {
        let q = from_to_rotation(Vec3::X, -Vec3::X, 1e-10).unwrap();
        assert!((q * Vec3::X + Vec3::X).length() < 1e-5);
    }
}
