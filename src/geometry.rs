//! 関節角度計算のためのベクトル演算。
//!
//! 状態を持たない純粋関数のみ。座標はランドマークの正規化座標をそのまま使う。

/// b - a を成分ごとに計算
pub fn vector_between(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [b[0] - a[0], b[1] - a[1], b[2] - a[2]]
}

/// 内積
pub fn dot(u: [f32; 3], v: [f32; 3]) -> f32 {
    u[0] * v[0] + u[1] * v[1] + u[2] * v[2]
}

/// ベクトル長
pub fn magnitude(v: [f32; 3]) -> f32 {
    dot(v, v).sqrt()
}

/// vertex を頂点とした proximal / distal 方向のなす角(度、0〜180)
///
/// ゼロ長ベクトルは分母を 1 に置き換える。縮退した入力でも NaN にならず、
/// 90° 相当の値を返す。
pub fn angle_between(proximal: [f32; 3], vertex: [f32; 3], distal: [f32; 3]) -> f32 {
    let u = vector_between(vertex, proximal);
    let v = vector_between(vertex, distal);

    let denom = magnitude(u) * magnitude(v);
    let denom = if denom == 0.0 { 1.0 } else { denom };

    let cos = (dot(u, v) / denom).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_vector_between() {
        let v = vector_between([1.0, 2.0, 3.0], [4.0, 6.0, 3.0]);
        assert_eq!(v, [3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_dot_orthogonal() {
        assert_eq!(dot([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_magnitude() {
        assert!(approx_eq(magnitude([3.0, 4.0, 0.0]), 5.0, 1e-6));
        assert_eq!(magnitude([0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_straight_line_is_180() {
        // 肘が完全に伸びた形
        let angle = angle_between([0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert!(approx_eq(angle, 180.0, 1e-3), "angle = {}", angle);
    }

    #[test]
    fn test_right_angle_is_90() {
        let angle = angle_between([0.0, 1.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert!(approx_eq(angle, 90.0, 1e-3), "angle = {}", angle);
    }

    #[test]
    fn test_collinear_same_direction_is_0() {
        let angle = angle_between([1.0, 1.0, 0.0], [0.0, 0.0, 0.0], [2.0, 2.0, 0.0]);
        assert!(approx_eq(angle, 0.0, 1e-3), "angle = {}", angle);
    }

    #[test]
    fn test_degenerate_same_point_is_finite() {
        // 三点ともに同一点: 分母を 1 に置き換えるので cos=0 → 90°
        let p = [0.3, 0.7, 0.1];
        let angle = angle_between(p, p, p);
        assert!(angle.is_finite());
        assert!((0.0..=180.0).contains(&angle));
        assert!(approx_eq(angle, 90.0, 1e-3), "angle = {}", angle);
    }

    #[test]
    fn test_one_zero_length_side_is_finite() {
        let vertex = [0.5, 0.5, 0.0];
        let angle = angle_between(vertex, vertex, [1.0, 0.5, 0.0]);
        assert!(angle.is_finite());
        assert!((0.0..=180.0).contains(&angle));
    }

    #[test]
    fn test_angle_uses_z() {
        // 奥行き方向の直角
        let angle = angle_between([0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert!(approx_eq(angle, 90.0, 1e-3), "angle = {}", angle);
    }
}
