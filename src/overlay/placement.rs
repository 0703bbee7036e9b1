//! Placement geometry
//!
//! Maps a landmark set, a mask category and the mask's intrinsic size to
//! the rectangle the mask is drawn into. Landmark coordinates arrive in
//! the unmirrored frame space; the preview is mirrored, so the final X
//! is reflected across the surface width before drawing.

use crate::face::LandmarkSet;
use crate::mask::MaskCategory;

/// Tuning constants for mask placement.
///
/// These are empirical values carried as data rather than derived; they
/// can be overridden from the config file.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PlacementParams {
    /// Masks are drawn slightly larger than the measured face width
    pub oversize: f32,
    /// Crowns are a little narrower than the face
    pub crown_width_scale: f32,
    /// Fraction of the crown's own height it floats above the brow line
    pub crown_lift: f32,
}

impl Default for PlacementParams {
    fn default() -> Self {
        Self {
            oversize: 1.1,
            crown_width_scale: 0.9,
            crown_lift: 0.6,
        }
    }
}

/// Where and how large to draw the active mask, in unmirrored frame space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacementRect {
    /// Top-left X
    pub x: f32,
    /// Top-left Y
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PlacementRect {
    /// Reflect the rectangle horizontally across a surface of the given
    /// width, compensating for the mirrored preview. Y is untouched.
    pub fn mirrored(self, surface_width: f32) -> Self {
        Self {
            x: surface_width - (self.x + self.width),
            ..self
        }
    }
}

/// Compute the placement rectangle for one frame.
///
/// Returns None when the landmarks are malformed, the mask's intrinsic
/// size is degenerate, or any computed dimension comes out non-finite or
/// non-positive — the caller skips drawing for that frame.
pub fn place_mask(
    landmarks: &LandmarkSet,
    category: MaskCategory,
    intrinsic_width: u32,
    intrinsic_height: u32,
    params: &PlacementParams,
) -> Option<PlacementRect> {
    if intrinsic_width == 0 || intrinsic_height == 0 {
        return None;
    }
    let aspect = intrinsic_width as f32 / intrinsic_height as f32;

    let left = landmarks.left_brow_outer()?;
    let right = landmarks.right_brow_outer()?;
    let face_width = right.x - left.x;
    let center_x = (left.x + right.x) / 2.0;

    let (width, center_y) = match category {
        MaskCategory::Crown => {
            let width = face_width * params.crown_width_scale * params.oversize;
            let height = width / aspect;
            let center_y = landmarks.brow_top_y()? - height * params.crown_lift;
            (width, center_y)
        }
        MaskCategory::Glasses => {
            let width = face_width * params.oversize;
            (width, landmarks.eye_bridge_y()?)
        }
    };
    let height = width / aspect;

    let rect = PlacementRect {
        x: center_x - width / 2.0,
        y: center_y - height / 2.0,
        width,
        height,
    };

    let valid = rect.width.is_finite()
        && rect.height.is_finite()
        && rect.x.is_finite()
        && rect.y.is_finite()
        && rect.width > 0.0
        && rect.height > 0.0;
    valid.then_some(rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{LandmarkSet, Point, LANDMARK_COUNT};

    /// Landmarks with brow outer points at the given Xs, all brow points
    /// at `brow_y`, and all upper eyelid points at `lid_y`.
    fn landmarks(left_outer_x: f32, right_outer_x: f32, brow_y: f32, lid_y: f32) -> LandmarkSet {
        let mut points = vec![Point::new(200.0, 200.0); LANDMARK_COUNT];
        for i in 17..27 {
            points[i] = Point::new(200.0, brow_y);
        }
        points[17].x = left_outer_x;
        points[26].x = right_outer_x;
        for i in [37, 38, 43, 44] {
            points[i] = Point::new(200.0, lid_y);
        }
        LandmarkSet::from_points(&points).unwrap()
    }

    #[test]
    fn glasses_width_and_center_from_brow_outers() {
        let lm = landmarks(100.0, 300.0, 140.0, 180.0);
        let rect = place_mask(&lm, MaskCategory::Glasses, 200, 100, &PlacementParams::default())
            .unwrap();
        // face width 200, oversize 1.1 -> width 220, center X 200
        assert!((rect.width - 220.0).abs() < 1e-3);
        assert!((rect.x + rect.width / 2.0 - 200.0).abs() < 1e-3);
        // centered on the upper-lid mean Y
        assert!((rect.y + rect.height / 2.0 - 180.0).abs() < 1e-3);
    }

    #[test]
    fn crown_floats_above_the_brow_line() {
        let lm = landmarks(100.0, 300.0, 150.0, 180.0);
        let params = PlacementParams::default();
        let rect = place_mask(&lm, MaskCategory::Crown, 300, 150, &params).unwrap();
        // width = 200 * 0.9 * 1.1 = 198; aspect 2 -> height 99
        assert!((rect.width - 198.0).abs() < 1e-3);
        assert!((rect.height - 99.0).abs() < 1e-3);
        let center_y = rect.y + rect.height / 2.0;
        assert!((center_y - (150.0 - 0.6 * 99.0)).abs() < 1e-3);
    }

    #[test]
    fn aspect_ratio_is_preserved_for_both_categories() {
        let lm = landmarks(100.0, 300.0, 150.0, 180.0);
        let params = PlacementParams::default();
        for category in [MaskCategory::Glasses, MaskCategory::Crown] {
            let rect = place_mask(&lm, category, 640, 256, &params).unwrap();
            assert!((rect.width / rect.height - 640.0 / 256.0).abs() < 1e-3);
        }
    }

    #[test]
    fn zero_intrinsic_size_yields_no_rectangle() {
        let lm = landmarks(100.0, 300.0, 150.0, 180.0);
        let params = PlacementParams::default();
        assert!(place_mask(&lm, MaskCategory::Glasses, 0, 100, &params).is_none());
        assert!(place_mask(&lm, MaskCategory::Crown, 100, 0, &params).is_none());
    }

    #[test]
    fn reversed_brow_outers_yield_no_rectangle() {
        // Right outer left of left outer: face width would be negative
        let lm = landmarks(300.0, 100.0, 150.0, 180.0);
        let params = PlacementParams::default();
        assert!(place_mask(&lm, MaskCategory::Glasses, 200, 100, &params).is_none());
    }

    #[test]
    fn mirror_reflects_x_only() {
        let rect = PlacementRect {
            x: 90.0,
            y: 130.0,
            width: 220.0,
            height: 110.0,
        };
        let mirrored = rect.mirrored(720.0);
        assert_eq!(mirrored.x, 720.0 - (90.0 + 220.0));
        assert_eq!(mirrored.y, 130.0);
        assert_eq!(mirrored.width, 220.0);
        assert_eq!(mirrored.height, 110.0);
    }
}
