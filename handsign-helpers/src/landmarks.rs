//! Hand landmarks and the wrist-relative feature normalizer.
//!
//! A hand pose is the ordered set of 21 keypoints reported by the pose
//! detector for one frame. The classifier never sees raw positions: every
//! landmark is expressed relative to the wrist and flattened to 63 floats,
//! which makes the features invariant to where the hand sits in the image.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Number of keypoints in one detected hand.
pub const LANDMARK_COUNT: usize = 21;
/// Length of a normalized feature vector (21 landmarks x 3 axes).
pub const FEATURE_LEN: usize = LANDMARK_COUNT * 3;
/// Index of the wrist landmark, the origin of the normalized frame.
pub const WRIST: usize = 0;

/// A 3D keypoint in image-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Errors raised when building a [`HandPose`] from detector output.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseError {
    /// The detector returned a landmark set of the wrong size.
    WrongLandmarkCount(usize),
}

impl Display for PoseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PoseError::WrongLandmarkCount(n) => write!(
                f,
                "expected {} hand landmarks, got {}",
                LANDMARK_COUNT, n
            ),
        }
    }
}

impl Error for PoseError {}

/// The full ordered landmark set for one detected hand.
///
/// Only constructible with exactly [`LANDMARK_COUNT`] landmarks, so
/// [`normalize`] never has to deal with a partial detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct HandPose([Landmark; LANDMARK_COUNT]);

impl HandPose {
    pub fn new(landmarks: [Landmark; LANDMARK_COUNT]) -> Self {
        Self(landmarks)
    }

    pub fn from_slice(landmarks: &[Landmark]) -> Result<Self, PoseError> {
        let array: [Landmark; LANDMARK_COUNT] = landmarks
            .try_into()
            .map_err(|_| PoseError::WrongLandmarkCount(landmarks.len()))?;
        Ok(Self(array))
    }

    pub fn landmarks(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.0
    }

    pub fn wrist(&self) -> Landmark {
        self.0[WRIST]
    }

    /// Returns a copy with every landmark shifted by the same offset.
    pub fn translated(&self, dx: f32, dy: f32, dz: f32) -> Self {
        let mut out = self.0;
        for lm in out.iter_mut() {
            lm.x += dx;
            lm.y += dy;
            lm.z += dz;
        }
        Self(out)
    }
}

impl TryFrom<Vec<Landmark>> for HandPose {
    type Error = PoseError;

    fn try_from(value: Vec<Landmark>) -> Result<Self, Self::Error> {
        Self::from_slice(&value)
    }
}

impl From<HandPose> for Vec<Landmark> {
    fn from(pose: HandPose) -> Self {
        pose.0.to_vec()
    }
}

/// Flattens a hand pose into a wrist-relative feature vector.
///
/// Output layout is `[x0, y0, z0, x1, y1, z1, ...]` with landmark 0 subtracted
/// from every landmark, so the first three values are always exactly zero.
pub fn normalize(pose: &HandPose) -> Array1<f32> {
    let wrist = pose.wrist();
    let mut features = Vec::with_capacity(FEATURE_LEN);
    for lm in pose.landmarks() {
        features.push(lm.x - wrist.x);
        features.push(lm.y - wrist.y);
        features.push(lm.z - wrist.z);
    }
    Array1::from(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn random_pose(rng: &mut Xoshiro256PlusPlus) -> HandPose {
        let mut landmarks = [Landmark::default(); LANDMARK_COUNT];
        for lm in landmarks.iter_mut() {
            *lm = Landmark::new(
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
                rng.random_range(-0.1..0.1),
            );
        }
        HandPose::new(landmarks)
    }

    #[test]
    fn test_normalize_length_and_wrist_origin() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for _ in 0..50 {
            let pose = random_pose(&mut rng);
            let features = normalize(&pose);
            assert_eq!(features.len(), FEATURE_LEN);
            assert_eq!(features[0], 0.0);
            assert_eq!(features[1], 0.0);
            assert_eq!(features[2], 0.0);
        }
    }

    #[test]
    fn test_normalize_layout() {
        let mut landmarks = [Landmark::new(0.5, 0.5, 0.0); LANDMARK_COUNT];
        landmarks[3] = Landmark::new(0.75, 0.25, 0.125);
        let features = normalize(&HandPose::new(landmarks));
        assert_eq!(features[9], 0.25);
        assert_eq!(features[10], -0.25);
        assert_eq!(features[11], 0.125);
        assert_eq!(features.iter().filter(|&&v| v != 0.0).count(), 3);
    }

    #[test]
    fn test_normalize_translation_invariance() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        for _ in 0..20 {
            let pose = random_pose(&mut rng);
            let shifted = pose.translated(0.125, -0.25, 0.0625);
            let a = normalize(&pose);
            let b = normalize(&shifted);
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_from_slice_rejects_partial_detection() {
        let landmarks = vec![Landmark::default(); 20];
        assert_eq!(
            HandPose::from_slice(&landmarks),
            Err(PoseError::WrongLandmarkCount(20))
        );
        let landmarks = vec![Landmark::default(); LANDMARK_COUNT];
        assert!(HandPose::try_from(landmarks).is_ok());
    }
}
