use geo::{prelude::*, Point, Rect};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bins in the colour histogram attached to a detection.
pub const APPEARANCE_BINS: usize = 16;

/// Colour histogram a detector may attach to a detection. It is carried along
/// for re-identification but does not take part in matching.
pub type Appearance = [f32; APPEARANCE_BINS];

/// Axis-aligned box in normalized image coordinates, origin at the top-left.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The closed label set produced by the upstream detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Player,
    Referee,
    Ball,
    Other,
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectClass::Player => "player",
            ObjectClass::Referee => "referee",
            ObjectClass::Ball => "ball",
            ObjectClass::Other => "other",
        };
        f.write_str(name)
    }
}

/// One frame's raw observation, before association with a track.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: ObjectClass,
    pub confidence: f64,
    pub appearance: Option<Appearance>,
}

impl Detection {
    /// Confidence is clamped to `[0, 1]`; a non-finite score counts as 0.
    pub fn new(bbox: BoundingBox, class: ObjectClass, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            bbox,
            class,
            confidence,
            appearance: None,
        }
    }

    pub fn with_appearance(self, appearance: Appearance) -> Self {
        Self {
            appearance: Some(appearance),
            ..self
        }
    }

    pub fn center(&self) -> Vector2<f64> {
        self.bbox.center()
    }
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box of the given size around `center`.
    pub fn from_center(center: Vector2<f64>, width: f64, height: f64) -> Self {
        Self {
            x: center.x - width / 2.0,
            y: center.y - height / 2.0,
            width,
            height,
        }
    }

    pub fn center(&self) -> Vector2<f64> {
        Vector2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn center_point(&self) -> Point<f64> {
        let center = self.center();
        Point::new(center.x, center.y)
    }

    /// Same box moved so that its center sits at `center`.
    pub fn recentered(&self, center: Vector2<f64>) -> Self {
        Self::from_center(center, self.width, self.height)
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new((self.x, self.y), (self.x + self.width, self.y + self.height))
    }

    pub fn area(&self) -> f64 {
        self.to_rect().unsigned_area()
    }

    pub fn intersection_area(&self, other: &Self) -> f64 {
        let (lhs, rhs) = (self.to_rect(), other.to_rect());
        let width = lhs.max().x.min(rhs.max().x) - lhs.min().x.max(rhs.min().x);
        let height = lhs.max().y.min(rhs.max().y) - lhs.min().y.max(rhs.min().y);
        if width <= 0.0 || height <= 0.0 {
            return 0.0;
        }
        width * height
    }

    pub fn iou_with(&self, other: &Self) -> f64 {
        let intersec = self.intersection_area(other);
        let union = self.area() + other.area() - intersec;
        if union > 0.0 && union.is_finite() {
            intersec / union
        } else {
            0.0
        }
    }

    /// Distance between the two box centers.
    pub fn center_distance(&self, other: &Self) -> f64 {
        self.center_point().euclidean_distance(&other.center_point())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn iou_of_overlapping_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 0.2, 0.2);
        let b = BoundingBox::new(0.1, 0.1, 0.2, 0.2);
        assert_abs_diff_eq!(a.iou_with(&b), 0.01 / 0.07, epsilon = 1e-9);
        assert_abs_diff_eq!(a.iou_with(&a), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn iou_of_disjoint_or_degenerate_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 0.1, 0.1);
        let b = BoundingBox::new(0.5, 0.5, 0.1, 0.1);
        assert_eq!(a.iou_with(&b), 0.0);
        let empty = BoundingBox::new(0.3, 0.3, 0.0, 0.0);
        assert_eq!(empty.iou_with(&empty), 0.0);
    }

    #[test]
    fn center_round_trip() {
        let bbox = BoundingBox::new(0.1, 0.2, 0.3, 0.4);
        assert_abs_diff_eq!(bbox.center(), Vector2::new(0.25, 0.4), epsilon = 1e-12);
        let moved = bbox.recentered(Vector2::new(0.5, 0.5));
        assert_abs_diff_eq!(moved.x, 0.35, epsilon = 1e-12);
        assert_abs_diff_eq!(moved.height, 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(bbox.center_distance(&moved), (0.0625f64 + 0.01).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn detection_confidence_is_clamped() {
        let det = Detection::new(BoundingBox::new(0., 0., 0.1, 0.1), ObjectClass::Ball, 1.7);
        assert_eq!(det.confidence, 1.0);
        assert_eq!(ObjectClass::Referee.to_string(), "referee");

        for score in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let det = Detection::new(BoundingBox::new(0., 0., 0.1, 0.1), ObjectClass::Ball, score);
            assert_eq!(det.confidence, 0.0);
        }
    }

    #[test]
    fn appearance_is_carried_along() {
        let mut histogram = [0.0f32; APPEARANCE_BINS];
        histogram[3] = 0.75;
        histogram[12] = 0.25;

        let det = Detection::new(BoundingBox::new(0.2, 0.2, 0.1, 0.2), ObjectClass::Player, 0.8)
            .with_appearance(histogram);
        assert_eq!(det.appearance, Some(histogram));
        assert_eq!(det.confidence, 0.8);
        assert_eq!(det.bbox, BoundingBox::new(0.2, 0.2, 0.1, 0.2));
    }
}
