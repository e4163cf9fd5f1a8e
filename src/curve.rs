//! Piecewise cubic Bezier curves mapping x to y.

use glam::Vec2;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("a curve needs at least two points, got {0}")]
    TooFewPoints(usize),
    #[error("curve point {0} lies left of its predecessor")]
    Unsorted(usize),
}

/// A control point. Tangents are offsets from `position`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub position: Vec2,
    pub in_tangent: Vec2,
    pub out_tangent: Vec2,
}

impl CurvePoint {
    /// A point with flat tangents.
    pub fn linear(x: f32, y: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            in_tangent: Vec2::ZERO,
            out_tangent: Vec2::ZERO,
        }
    }
}

/// Function curve evaluated by x. Outside the first and last point the
/// curve holds the end values.
#[derive(Debug, Clone, PartialEq)]
pub struct BezierCurve {
    points: Vec<CurvePoint>,
}

const BISECTION_STEPS: usize = 32;

fn bezier(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let s = 1.0 - t;
    s * s * s * p0 + 3.0 * s * s * t * p1 + 3.0 * s * t * t * p2 + t * t * t * p3
}

impl BezierCurve {
    pub fn new(points: Vec<CurvePoint>) -> Result<Self, CurveError> {
        if points.len() < 2 {
            return Err(CurveError::TooFewPoints(points.len()));
        }
        if let Some(i) = (1..points.len()).find(|&i| points[i].position.x < points[i - 1].position.x) {
            return Err(CurveError::Unsorted(i));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if x.is_nan() {
            return x;
        }
        if x <= first.position.x {
            return first.position.y;
        }
        if x >= last.position.x {
            return last.position.y;
        }

        let i = self
            .points
            .windows(2)
            .position(|w| x <= w[1].position.x)
            .unwrap_or(self.points.len() - 2);
        let (a, b) = (self.points[i], self.points[i + 1]);
        let p0 = a.position;
        let p1 = a.position + a.out_tangent;
        let p2 = b.position + b.in_tangent;
        let p3 = b.position;

        // x(t) is assumed monotonic within a segment.
        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if bezier(p0.x, p1.x, p2.x, p3.x, mid) < x {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        bezier(p0.y, p1.y, p2.y, p3.y, 0.5 * (lo + hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_segments_interpolate() {
        let curve = BezierCurve::new(vec![
            CurvePoint::linear(0.0, 0.0),
            CurvePoint::linear(1.0, 2.0),
            CurvePoint::linear(2.0, 0.0),
        ])
        .unwrap();
        assert!((curve.evaluate(0.5) - 1.0).abs() < 1e-4);
        assert!((curve.evaluate(1.5) - 1.0).abs() < 1e-4);
        assert_eq!(curve.evaluate(-3.0), 0.0);
        assert_eq!(curve.evaluate(9.0), 0.0);
    }

    #[test]
    fn rejects_bad_point_lists() {
        assert_eq!(
            BezierCurve::new(vec![CurvePoint::linear(0.0, 0.0)]),
            Err(CurveError::TooFewPoints(1))
        );
        assert_eq!(
            BezierCurve::new(vec![CurvePoint::linear(1.0, 0.0), CurvePoint::linear(0.0, 0.0)]),
            Err(CurveError::Unsorted(1))
        );
    }
}
