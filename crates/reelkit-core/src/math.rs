use serde::{Deserialize, Serialize};

/// A 2D point in canvas space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl Default for Point2D {
    fn default() -> Self {
        Self::zero()
    }
}

/// Normalized (0-1) coordinate inside a source image that zoom is anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub x: f32,
    pub y: f32,
}

impl FocalPoint {
    pub const CENTER: FocalPoint = FocalPoint { x: 0.5, y: 0.5 };

    /// Build a focal point, clamping both axes into [0, 1].
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }

    pub fn as_array(&self) -> [f32; 2] {
        [self.x, self.y]
    }
}

impl Default for FocalPoint {
    fn default() -> Self {
        Self::CENTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(300.0, 400.0);
        assert!((a.distance(&b) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_focal_point_default_is_center() {
        assert_eq!(FocalPoint::default(), FocalPoint::CENTER);
        assert_eq!(FocalPoint::new(1.4, -0.2), FocalPoint { x: 1.0, y: 0.0 });
    }
}
