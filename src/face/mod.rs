//! Facial landmark types
//!
//! Groups the standard 68-point facial landmark layout into named point
//! sequences, in the unmirrored camera frame's pixel coordinate space.
//!
//! # Landmark layout (68-point model)
//!
//! - 0-16: jaw outline
//! - 17-21: left eyebrow (image left)
//! - 22-26: right eyebrow
//! - 27-35: nose
//! - 36-41: left eye
//! - 42-47: right eye
//! - 48-67: lips (unused here)

pub mod detector;

pub use detector::{DetectionOutcome, FaceLandmarkDetector};

pub const LANDMARK_COUNT: usize = 68;

const JAW: std::ops::Range<usize> = 0..17;
const LEFT_EYEBROW: std::ops::Range<usize> = 17..22;
const RIGHT_EYEBROW: std::ops::Range<usize> = 22..27;
const NOSE: std::ops::Range<usize> = 27..36;
const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;

/// A 2D landmark point in frame pixel coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One detected face's landmarks, grouped by feature
#[derive(Clone, Debug, Default)]
pub struct LandmarkSet {
    pub jaw: Vec<Point>,
    pub left_eyebrow: Vec<Point>,
    pub right_eyebrow: Vec<Point>,
    pub nose: Vec<Point>,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
}

impl LandmarkSet {
    /// Group a flat 68-point sequence into named features.
    ///
    /// Returns None if fewer than 68 points are supplied.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.len() < LANDMARK_COUNT {
            return None;
        }
        Some(Self {
            jaw: points[JAW].to_vec(),
            left_eyebrow: points[LEFT_EYEBROW].to_vec(),
            right_eyebrow: points[RIGHT_EYEBROW].to_vec(),
            nose: points[NOSE].to_vec(),
            left_eye: points[LEFT_EYE].to_vec(),
            right_eye: points[RIGHT_EYE].to_vec(),
        })
    }

    /// Outermost point of the left eyebrow (first in the group)
    pub fn left_brow_outer(&self) -> Option<Point> {
        self.left_eyebrow.first().copied()
    }

    /// Outermost point of the right eyebrow (last in the group)
    pub fn right_brow_outer(&self) -> Option<Point> {
        self.right_eyebrow.last().copied()
    }

    /// Topmost (minimum) Y across both eyebrow groups
    pub fn brow_top_y(&self) -> Option<f32> {
        let ys = self
            .left_eyebrow
            .iter()
            .chain(self.right_eyebrow.iter())
            .map(|p| p.y);
        ys.fold(None, |min, y| match min {
            Some(m) if m <= y => Some(m),
            _ => Some(y),
        })
    }

    /// Mean Y of the two upper-lid points of each eye (four points total).
    ///
    /// Approximates the bridge of the nose; used to anchor glasses.
    pub fn eye_bridge_y(&self) -> Option<f32> {
        let upper = [
            self.left_eye.get(1)?,
            self.left_eye.get(2)?,
            self.right_eye.get(1)?,
            self.right_eye.get(2)?,
        ];
        Some(upper.iter().map(|p| p.y).sum::<f32>() / upper.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_points() -> Vec<Point> {
        (0..LANDMARK_COUNT)
            .map(|i| Point::new(i as f32, 100.0 + i as f32))
            .collect()
    }

    #[test]
    fn groups_cover_the_68_point_layout() {
        let set = LandmarkSet::from_points(&flat_points()).unwrap();
        assert_eq!(set.jaw.len(), 17);
        assert_eq!(set.left_eyebrow.len(), 5);
        assert_eq!(set.right_eyebrow.len(), 5);
        assert_eq!(set.nose.len(), 9);
        assert_eq!(set.left_eye.len(), 6);
        assert_eq!(set.right_eye.len(), 6);
        // Outer brow points are 17 and 26 in the flat layout
        assert_eq!(set.left_brow_outer().unwrap().x, 17.0);
        assert_eq!(set.right_brow_outer().unwrap().x, 26.0);
    }

    #[test]
    fn too_few_points_is_rejected() {
        let points = vec![Point::default(); 40];
        assert!(LandmarkSet::from_points(&points).is_none());
    }

    #[test]
    fn brow_top_is_minimum_y_over_both_brows() {
        let mut points = flat_points();
        points[24].y = 3.0; // dip one right-brow point
        let set = LandmarkSet::from_points(&points).unwrap();
        assert_eq!(set.brow_top_y(), Some(3.0));
    }

    #[test]
    fn eye_bridge_averages_upper_lid_points() {
        let mut points = flat_points();
        // Upper lids: left eye points 37, 38; right eye points 43, 44
        points[37].y = 10.0;
        points[38].y = 20.0;
        points[43].y = 30.0;
        points[44].y = 40.0;
        let set = LandmarkSet::from_points(&points).unwrap();
        assert_eq!(set.eye_bridge_y(), Some(25.0));
    }
}
