//! Derived per-frame feature series
//!
//! Scalar series computed from one or more keypoints: inter-keypoint
//! distances, facing and bend angles, midpoints and speeds.

use crate::types::FrameSeries;

/// Guard added to vector-magnitude products before dividing
const ANGLE_EPSILON: f64 = 1e-8;

/// Frame-wise Euclidean distance between two keypoints
pub fn euclidean_distance(a: &FrameSeries, b: &FrameSeries) -> Vec<f64> {
    a.x.iter()
        .zip(&a.y)
        .zip(b.x.iter().zip(&b.y))
        .map(|((ax, ay), (bx, by))| ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt())
        .collect()
}

/// Frame-wise minimum distance from any of `sources` to `target`
pub fn min_distance_to(sources: &[&FrameSeries], target: &FrameSeries) -> Vec<f64> {
    let mut out = vec![f64::NAN; target.len()];
    for source in sources {
        for (slot, d) in out.iter_mut().zip(euclidean_distance(source, target)) {
            // NaN never wins a comparison, so take the other operand
            *slot = if slot.is_nan() { d } else { slot.min(d) };
        }
    }
    out
}

/// Frame-wise centroid of several keypoints
pub fn centroid(points: &[&FrameSeries]) -> (Vec<f64>, Vec<f64>) {
    let n = points.first().map_or(0, |p| p.len());
    let count = points.len() as f64;
    let mut cx = vec![0.0; n];
    let mut cy = vec![0.0; n];
    for series in points {
        for i in 0..n {
            cx[i] += series.x[i] / count;
            cy[i] += series.y[i] / count;
        }
    }
    (cx, cy)
}

/// Angle in degrees between two per-frame vectors, in [0, 180]
pub fn angle_between(v1: (&[f64], &[f64]), v2: (&[f64], &[f64])) -> Vec<f64> {
    (0..v1.0.len())
        .map(|i| {
            let (ax, ay, bx, by) = (v1.0[i], v1.1[i], v2.0[i], v2.1[i]);
            let dot = ax * bx + ay * by;
            let magnitude = (ax * ax + ay * ay).sqrt() * (bx * bx + by * by).sqrt();
            let cos = (dot / (magnitude + ANGLE_EPSILON)).clamp(-1.0, 1.0);
            cos.acos().to_degrees()
        })
        .collect()
}

/// Head-direction vectors (ear midpoint → mouth) of one animal
pub struct HeadPose<'a> {
    pub mouth: &'a FrameSeries,
    pub left_ear: &'a FrameSeries,
    pub right_ear: &'a FrameSeries,
}

impl HeadPose<'_> {
    fn ear_center(&self) -> (Vec<f64>, Vec<f64>) {
        centroid(&[self.left_ear, self.right_ear])
    }
}

/// Angle between each animal's head direction and the line joining the two
/// heads. 0° means looking straight at the other animal.
pub fn facing_angles(first: &HeadPose, second: &HeadPose) -> (Vec<f64>, Vec<f64>) {
    let (e1x, e1y) = first.ear_center();
    let (e2x, e2y) = second.ear_center();
    let n = e1x.len();

    let head1x: Vec<f64> = (0..n).map(|i| first.mouth.x[i] - e1x[i]).collect();
    let head1y: Vec<f64> = (0..n).map(|i| first.mouth.y[i] - e1y[i]).collect();
    let head2x: Vec<f64> = (0..n).map(|i| second.mouth.x[i] - e2x[i]).collect();
    let head2y: Vec<f64> = (0..n).map(|i| second.mouth.y[i] - e2y[i]).collect();

    let conn_x: Vec<f64> = (0..n).map(|i| e2x[i] - e1x[i]).collect();
    let conn_y: Vec<f64> = (0..n).map(|i| e2y[i] - e1y[i]).collect();
    let back_x: Vec<f64> = conn_x.iter().map(|v| -v).collect();
    let back_y: Vec<f64> = conn_y.iter().map(|v| -v).collect();

    (
        angle_between((&head1x[..], &head1y[..]), (&conn_x[..], &conn_y[..])),
        angle_between((&head2x[..], &head2y[..]), (&back_x[..], &back_y[..])),
    )
}

/// Bend angle between the head→body and body→tail segments, in degrees.
///
/// Frames where either segment has zero length yield NaN.
pub fn body_bend_angle(head: &FrameSeries, body: &FrameSeries, tail: &FrameSeries) -> Vec<f64> {
    (0..head.len())
        .map(|i| {
            let (ax, ay) = (body.x[i] - head.x[i], body.y[i] - head.y[i]);
            let (bx, by) = (tail.x[i] - body.x[i], tail.y[i] - body.y[i]);
            let magnitude = ((ax * ax + ay * ay) * (bx * bx + by * by)).sqrt();
            if magnitude == 0.0 {
                return f64::NAN;
            }
            ((ax * bx + ay * by) / magnitude).clamp(-1.0, 1.0).acos().to_degrees()
        })
        .collect()
}

/// Frame-to-frame speed in px/s; frame 0 is 0
pub fn frame_speed(series: &FrameSeries, fps: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(series.len());
    if series.is_empty() {
        return out;
    }
    out.push(0.0);
    for i in 1..series.len() {
        let d = ((series.x[i] - series.x[i - 1]).powi(2) + (series.y[i] - series.y[i - 1]).powi(2))
            .sqrt();
        out.push(d * fps);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_euclidean_distance() {
        let a = FrameSeries::from_points(&[(0.0, 0.0), (1.0, 1.0)]);
        let b = FrameSeries::from_points(&[(3.0, 4.0), (1.0, 1.0)]);
        assert_eq!(euclidean_distance(&a, &b), vec![5.0, 0.0]);
    }

    #[test]
    fn test_min_distance_ignores_nan_source() {
        let target = FrameSeries::from_points(&[(0.0, 0.0)]);
        let mut left = FrameSeries::from_points(&[(0.0, 0.0)]);
        left.invalidate(0);
        let right = FrameSeries::from_points(&[(6.0, 8.0)]);
        assert_eq!(min_distance_to(&[&left, &right], &target), vec![10.0]);
    }

    #[test]
    fn test_facing_angles_face_to_face() {
        // Two animals on the x axis looking at each other
        let first = (
            FrameSeries::from_points(&[(10.0, 0.0)]),
            FrameSeries::from_points(&[(0.0, -1.0)]),
            FrameSeries::from_points(&[(0.0, 1.0)]),
        );
        let second = (
            FrameSeries::from_points(&[(90.0, 0.0)]),
            FrameSeries::from_points(&[(100.0, 1.0)]),
            FrameSeries::from_points(&[(100.0, -1.0)]),
        );
        let (a1, a2) = facing_angles(
            &HeadPose {
                mouth: &first.0,
                left_ear: &first.1,
                right_ear: &first.2,
            },
            &HeadPose {
                mouth: &second.0,
                left_ear: &second.1,
                right_ear: &second.2,
            },
        );
        assert_abs_diff_eq!(a1[0], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(a2[0], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_angle_between_orthogonal() {
        let angles = angle_between((&[1.0][..], &[0.0][..]), (&[0.0][..], &[2.0][..]));
        assert_abs_diff_eq!(angles[0], 90.0, epsilon = 1e-6);
    }

    #[test]
    fn test_body_bend_angle() {
        let head = FrameSeries::from_points(&[(0.0, 0.0), (0.0, 0.0)]);
        let body = FrameSeries::from_points(&[(10.0, 0.0), (0.0, 0.0)]);
        let tail = FrameSeries::from_points(&[(10.0, 10.0), (5.0, 0.0)]);
        let angles = body_bend_angle(&head, &body, &tail);
        assert_abs_diff_eq!(angles[0], 90.0, epsilon = 1e-9);
        assert!(angles[1].is_nan());
    }

    #[test]
    fn test_frame_speed() {
        let series = FrameSeries::from_points(&[(0.0, 0.0), (3.0, 4.0), (3.0, 4.0)]);
        assert_eq!(frame_speed(&series, 30.0), vec![0.0, 150.0, 0.0]);
        assert!(frame_speed(&FrameSeries::from_points(&[]), 30.0).is_empty());
    }

    #[test]
    fn test_centroid() {
        let a = FrameSeries::from_points(&[(0.0, 0.0)]);
        let b = FrameSeries::from_points(&[(10.0, 4.0)]);
        assert_eq!(centroid(&[&a, &b]), (vec![5.0], vec![2.0]));
    }
}
