//! フレームごとのランドマークから追跡対象の腕の角度と姿勢判定を抽出する。
//!
//! 必要な関節が欠けている(可視性が低い)フレームは None を返し、
//! 呼び出し側はそのフレームをスキップする。

use crate::geometry::angle_between;
use crate::landmark::{Landmark, LandmarkFrame, LandmarkIndex};

/// 追跡している腕
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// どの腕を追跡するか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideSelection {
    Left,
    Right,
    /// 両腕を計算し、より曲がっている(角度が小さい)側を採用
    Both,
}

/// 姿勢ゲートの戦略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostureGate {
    /// ゲートなし(常に通過)
    None,
    /// 肩-腰-膝の角度が min_degrees 以上(体がほぼ一直線)
    PlankStraightness { min_degrees: f32 },
    /// 肩→腰の鉛直からの傾きが min_degrees 以上、かつ少なくとも片方の腰が可視
    TorsoTilt { min_degrees: f32, min_visibility: f32 },
}

/// 1フレームから抽出した角度サンプル
#[derive(Debug, Clone, Copy)]
pub struct ArmSample {
    /// 肘の関節角度(度)
    pub angle: f32,
    /// 採用した側
    pub side: Side,
    /// 画面注釈用の基準点(採用した側の肘)
    pub reference: Landmark,
    /// 姿勢ゲートを通過したか
    pub posture_ok: bool,
}

/// ランドマークフレーム → 角度サンプルの変換器
#[derive(Debug, Clone)]
pub struct FrameAdapter {
    selection: SideSelection,
    gate: PostureGate,
    /// 腕関節に要求する最低可視性
    min_visibility: f32,
}

fn arm_joints(side: Side) -> (LandmarkIndex, LandmarkIndex, LandmarkIndex) {
    match side {
        Side::Left => (
            LandmarkIndex::LeftShoulder,
            LandmarkIndex::LeftElbow,
            LandmarkIndex::LeftWrist,
        ),
        Side::Right => (
            LandmarkIndex::RightShoulder,
            LandmarkIndex::RightElbow,
            LandmarkIndex::RightWrist,
        ),
    }
}

fn leg_joints(side: Side) -> (LandmarkIndex, LandmarkIndex, LandmarkIndex) {
    match side {
        Side::Left => (
            LandmarkIndex::LeftShoulder,
            LandmarkIndex::LeftHip,
            LandmarkIndex::LeftKnee,
        ),
        Side::Right => (
            LandmarkIndex::RightShoulder,
            LandmarkIndex::RightHip,
            LandmarkIndex::RightKnee,
        ),
    }
}

impl FrameAdapter {
    pub fn new(selection: SideSelection, gate: PostureGate, min_visibility: f32) -> Self {
        Self {
            selection,
            gate,
            min_visibility,
        }
    }

    /// フレームから腕の角度サンプルを抽出する。
    /// 使える側がなければ None。
    pub fn sample(&self, frame: &LandmarkFrame) -> Option<ArmSample> {
        let (side, angle, reference) = match self.selection {
            SideSelection::Left => self.arm_angle(frame, Side::Left)?,
            SideSelection::Right => self.arm_angle(frame, Side::Right)?,
            SideSelection::Both => {
                let left = self.arm_angle(frame, Side::Left);
                let right = self.arm_angle(frame, Side::Right);
                match (left, right) {
                    // 両側が使えるときは小さい(曲がっている)方を採用
                    (Some(l), Some(r)) => {
                        if l.1 <= r.1 {
                            l
                        } else {
                            r
                        }
                    }
                    (Some(l), None) => l,
                    (None, Some(r)) => r,
                    (None, None) => return None,
                }
            }
        };

        let posture_ok = self.posture_ok(frame, side);
        Some(ArmSample {
            angle,
            side,
            reference,
            posture_ok,
        })
    }

    /// 片側の肘角度。肩・肘・手首のどれかが見えなければ None
    fn arm_angle(&self, frame: &LandmarkFrame, side: Side) -> Option<(Side, f32, Landmark)> {
        let (s, e, w) = arm_joints(side);
        let shoulder = frame.get(s);
        let elbow = frame.get(e);
        let wrist = frame.get(w);

        if !shoulder.is_visible(self.min_visibility)
            || !elbow.is_visible(self.min_visibility)
            || !wrist.is_visible(self.min_visibility)
        {
            return None;
        }

        let angle = angle_between(shoulder.position(), elbow.position(), wrist.position());
        Some((side, angle, *elbow))
    }

    fn posture_ok(&self, frame: &LandmarkFrame, side: Side) -> bool {
        match self.gate {
            PostureGate::None => true,
            PostureGate::PlankStraightness { min_degrees } => {
                let (s, h, k) = leg_joints(side);
                let shoulder = frame.get(s);
                let hip = frame.get(h);
                let knee = frame.get(k);

                // 姿勢が確認できないフレームはカウントさせない
                if !shoulder.is_visible(self.min_visibility)
                    || !hip.is_visible(self.min_visibility)
                    || !knee.is_visible(self.min_visibility)
                {
                    return false;
                }

                let hip_angle =
                    angle_between(shoulder.position(), hip.position(), knee.position());
                hip_angle >= min_degrees
            }
            PostureGate::TorsoTilt {
                min_degrees,
                min_visibility,
            } => {
                let left_hip = frame.get(LandmarkIndex::LeftHip);
                let right_hip = frame.get(LandmarkIndex::RightHip);
                // 腰はどちらか一方が見えていればよい
                if !left_hip.is_visible(min_visibility) && !right_hip.is_visible(min_visibility) {
                    return false;
                }

                let left = torso_tilt_degrees(frame.get(LandmarkIndex::LeftShoulder), left_hip);
                let right = torso_tilt_degrees(frame.get(LandmarkIndex::RightShoulder), right_hip);
                (left + right) / 2.0 >= min_degrees
            }
        }
    }
}

/// 肩→腰の線分の、鉛直からの傾き(度)。直立で 0、水平で 90
fn torso_tilt_degrees(shoulder: &Landmark, hip: &Landmark) -> f32 {
    let vx = hip.x - shoulder.x;
    let vy = hip.y - shoulder.y;
    f32::atan2(vx.abs(), vy.abs()).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(points: &[(LandmarkIndex, f32, f32)]) -> LandmarkFrame {
        let mut frame = LandmarkFrame::default();
        for &(idx, x, y) in points {
            frame.landmarks[idx as usize] = Landmark::new(x, y, 0.0, 0.9);
        }
        frame
    }

    fn straight_left_arm() -> Vec<(LandmarkIndex, f32, f32)> {
        vec![
            (LandmarkIndex::LeftShoulder, 0.3, 0.2),
            (LandmarkIndex::LeftElbow, 0.3, 0.4),
            (LandmarkIndex::LeftWrist, 0.3, 0.6),
        ]
    }

    fn bent_right_arm() -> Vec<(LandmarkIndex, f32, f32)> {
        vec![
            (LandmarkIndex::RightShoulder, 0.7, 0.2),
            (LandmarkIndex::RightElbow, 0.7, 0.4),
            (LandmarkIndex::RightWrist, 0.5, 0.4),
        ]
    }

    #[test]
    fn test_left_side_straight_arm() {
        let adapter = FrameAdapter::new(SideSelection::Left, PostureGate::None, 0.5);
        let frame = frame_with(&straight_left_arm());

        let sample = adapter.sample(&frame).unwrap();
        assert_eq!(sample.side, Side::Left);
        assert!((sample.angle - 180.0).abs() < 1e-3, "angle = {}", sample.angle);
        assert!(sample.posture_ok);
        // 基準点は採用した側の肘
        assert_eq!(sample.reference.x, 0.3);
        assert_eq!(sample.reference.y, 0.4);
    }

    #[test]
    fn test_missing_joint_yields_none() {
        let adapter = FrameAdapter::new(SideSelection::Left, PostureGate::None, 0.5);
        let mut points = straight_left_arm();
        points.pop(); // 手首なし
        let frame = frame_with(&points);
        assert!(adapter.sample(&frame).is_none());
    }

    #[test]
    fn test_low_visibility_counts_as_missing() {
        let adapter = FrameAdapter::new(SideSelection::Left, PostureGate::None, 0.5);
        let mut frame = frame_with(&straight_left_arm());
        frame.landmarks[LandmarkIndex::LeftWrist as usize].visibility = 0.2;
        assert!(adapter.sample(&frame).is_none());
    }

    #[test]
    fn test_both_picks_minimum_angle() {
        let adapter = FrameAdapter::new(SideSelection::Both, PostureGate::None, 0.5);
        let mut points = straight_left_arm();
        points.extend(bent_right_arm());
        let frame = frame_with(&points);

        // 左=180°、右=90° → 右を採用
        let sample = adapter.sample(&frame).unwrap();
        assert_eq!(sample.side, Side::Right);
        assert!((sample.angle - 90.0).abs() < 1e-3, "angle = {}", sample.angle);
        assert_eq!(sample.reference.x, 0.7);
    }

    #[test]
    fn test_both_falls_back_to_single_usable_side() {
        let adapter = FrameAdapter::new(SideSelection::Both, PostureGate::None, 0.5);
        let frame = frame_with(&bent_right_arm());

        let sample = adapter.sample(&frame).unwrap();
        assert_eq!(sample.side, Side::Right);
    }

    #[test]
    fn test_both_with_no_usable_side() {
        let adapter = FrameAdapter::new(SideSelection::Both, PostureGate::None, 0.5);
        assert!(adapter.sample(&LandmarkFrame::default()).is_none());
    }

    #[test]
    fn test_plank_gate_straight_body_passes() {
        let gate = PostureGate::PlankStraightness { min_degrees: 165.0 };
        let adapter = FrameAdapter::new(SideSelection::Left, gate, 0.5);
        let frame = frame_with(&[
            // 肩-腰-膝が一直線
            (LandmarkIndex::LeftShoulder, 0.2, 0.3),
            (LandmarkIndex::LeftHip, 0.5, 0.5),
            (LandmarkIndex::LeftKnee, 0.8, 0.7),
            (LandmarkIndex::LeftElbow, 0.3, 0.4),
            (LandmarkIndex::LeftWrist, 0.4, 0.5),
        ]);

        let sample = adapter.sample(&frame).unwrap();
        assert!(sample.posture_ok, "straight body should pass the gate");
    }

    #[test]
    fn test_plank_gate_bent_body_fails() {
        let gate = PostureGate::PlankStraightness { min_degrees: 165.0 };
        let adapter = FrameAdapter::new(SideSelection::Left, gate, 0.5);
        let mut points = straight_left_arm();
        points.extend([
            (LandmarkIndex::LeftHip, 0.5, 0.5),
            (LandmarkIndex::LeftKnee, 0.5, 0.8), // 腰で折れている
        ]);
        let frame = frame_with(&points);

        let sample = adapter.sample(&frame).unwrap();
        assert!(!sample.posture_ok);
    }

    #[test]
    fn test_plank_gate_missing_knee_fails() {
        let gate = PostureGate::PlankStraightness { min_degrees: 165.0 };
        let adapter = FrameAdapter::new(SideSelection::Left, gate, 0.5);
        let mut points = straight_left_arm();
        points.push((LandmarkIndex::LeftHip, 0.5, 0.5));
        let frame = frame_with(&points);

        let sample = adapter.sample(&frame).unwrap();
        assert!(!sample.posture_ok, "unverifiable posture must not pass");
    }

    #[test]
    fn test_torso_tilt_upright_fails() {
        let gate = PostureGate::TorsoTilt {
            min_degrees: 13.0,
            min_visibility: 0.4,
        };
        let adapter = FrameAdapter::new(SideSelection::Left, gate, 0.5);
        let mut points = straight_left_arm();
        points.extend([
            (LandmarkIndex::RightShoulder, 0.5, 0.2),
            (LandmarkIndex::LeftHip, 0.3, 0.6),
            (LandmarkIndex::RightHip, 0.5, 0.6),
        ]);
        let frame = frame_with(&points);

        // 肩の真下に腰がある(直立) → 傾き 0°
        let sample = adapter.sample(&frame).unwrap();
        assert!(!sample.posture_ok);
    }

    #[test]
    fn test_torso_tilt_leaning_passes() {
        let gate = PostureGate::TorsoTilt {
            min_degrees: 13.0,
            min_visibility: 0.4,
        };
        let adapter = FrameAdapter::new(SideSelection::Left, gate, 0.5);
        let mut points = straight_left_arm();
        points.extend([
            (LandmarkIndex::RightShoulder, 0.5, 0.2),
            // 腰を横にずらす → atan2(0.15, 0.3) ≈ 26.6°
            (LandmarkIndex::LeftHip, 0.45, 0.5),
            (LandmarkIndex::RightHip, 0.65, 0.5),
        ]);
        let frame = frame_with(&points);

        let sample = adapter.sample(&frame).unwrap();
        assert!(sample.posture_ok);
    }

    #[test]
    fn test_torso_tilt_one_visible_hip_passes() {
        let gate = PostureGate::TorsoTilt {
            min_degrees: 13.0,
            min_visibility: 0.4,
        };
        let adapter = FrameAdapter::new(SideSelection::Left, gate, 0.5);
        let mut points = straight_left_arm();
        points.extend([
            (LandmarkIndex::RightShoulder, 0.5, 0.2),
            (LandmarkIndex::LeftHip, 0.45, 0.5),
            (LandmarkIndex::RightHip, 0.65, 0.5),
        ]);
        let mut frame = frame_with(&points);
        // 右腰が隠れていても左腰が見えていれば判定は続く
        frame.landmarks[LandmarkIndex::RightHip as usize].visibility = 0.1;

        let sample = adapter.sample(&frame).unwrap();
        assert!(sample.posture_ok, "one visible hip is enough for the gate");
    }

    #[test]
    fn test_torso_tilt_no_visible_hip_fails() {
        let gate = PostureGate::TorsoTilt {
            min_degrees: 13.0,
            min_visibility: 0.4,
        };
        let adapter = FrameAdapter::new(SideSelection::Left, gate, 0.5);
        let mut points = straight_left_arm();
        points.extend([
            (LandmarkIndex::RightShoulder, 0.5, 0.2),
            (LandmarkIndex::LeftHip, 0.45, 0.5),
            (LandmarkIndex::RightHip, 0.65, 0.5),
        ]);
        let mut frame = frame_with(&points);
        frame.landmarks[LandmarkIndex::LeftHip as usize].visibility = 0.3;
        frame.landmarks[LandmarkIndex::RightHip as usize].visibility = 0.1;

        let sample = adapter.sample(&frame).unwrap();
        assert!(!sample.posture_ok);
    }

    #[test]
    fn test_torso_tilt_degrees() {
        let shoulder = Landmark::new(0.5, 0.2, 0.0, 0.9);
        let upright_hip = Landmark::new(0.5, 0.6, 0.0, 0.9);
        assert!(torso_tilt_degrees(&shoulder, &upright_hip) < 1e-3);

        let horizontal_hip = Landmark::new(0.9, 0.2, 0.0, 0.9);
        assert!((torso_tilt_degrees(&shoulder, &horizontal_hip) - 90.0).abs() < 1e-3);
    }
}
