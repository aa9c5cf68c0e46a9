use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Shared error type for the lightweight infrastructure crates.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("{message}")]
    Message { message: String },
}

impl CoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Identity of one replay run. Concurrent sessions never share mutable state
/// except the status dispatch map, which is keyed by this id.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned rectangle in page coordinates, as captured at record time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
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

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box, in `[0, 1]`.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        (intersection / union).clamp(0.0, 1.0)
    }
}

/// Overlap of two optional boxes; absent boxes never overlap.
pub fn overlap(a: Option<&BoundingBox>, b: Option<&BoundingBox>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => a.iou(b),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_boxes_overlap_fully() {
        let a = BoundingBox::new(10.0, 20.0, 100.0, 40.0);
        assert!((a.iou(&a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disjoint_and_touching_boxes_do_not_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(50.0, 50.0, 10.0, 10.0);
        let touching = BoundingBox::new(10.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(a.iou(&touching), 0.0);
    }

    #[test]
    fn overlap_is_symmetric_and_bounded() {
        let boxes = [
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            BoundingBox::new(5.0, 5.0, 10.0, 10.0),
            BoundingBox::new(-3.0, 2.0, 30.0, 4.0),
            BoundingBox::new(1.0, 1.0, 0.0, 0.0),
        ];
        for a in &boxes {
            for b in &boxes {
                let ab = a.iou(b);
                assert_eq!(ab, b.iou(a));
                assert!((0.0..=1.0).contains(&ab));
            }
        }
        // 25 / (100 + 100 - 25)
        let half = boxes[0].iou(&boxes[1]);
        assert!((half - 25.0 / 175.0).abs() < 1e-9);
    }

    #[test]
    fn missing_box_means_zero_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(overlap(Some(&a), None), 0.0);
        assert_eq!(overlap(None, None), 0.0);
        assert_eq!(overlap(Some(&a), Some(&a)), 1.0);
    }
}
