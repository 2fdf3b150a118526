//! レップ検出の状態マシン。
//!
//! ヒステリシス2相(Up/Down)+ボトム保持+デバウンスで、ノイズの乗った
//! 角度列から確定レップだけを取り出す。時刻は入力で受け取り、内部では
//! 時計を持たない。

use std::collections::VecDeque;

/// 検出パラメータ。どのバリアントの定数も決め打ちしない
#[derive(Debug, Clone)]
pub struct RepConfig {
    /// この角度以上で「伸びた」(度)
    pub up_threshold: f32,
    /// この角度以下で「曲がった」(度)
    pub down_threshold: f32,
    /// レップ間の最小間隔(ms)。ジッタによる二重カウントを防ぐ
    pub min_rep_interval_ms: f64,
    /// ボトム保持の最小時間(ms)。0 で無効
    pub min_bottom_hold_ms: f64,
    /// 中央値スムージングの窓幅。0 または 1 で無効
    pub smoothing_window: usize,
    /// 姿勢ゲート失敗時に深さフラグとフェーズを捨てるか
    pub reset_on_posture_fail: bool,
}

impl Default for RepConfig {
    fn default() -> Self {
        Self {
            up_threshold: 160.0,
            down_threshold: 90.0,
            min_rep_interval_ms: 600.0,
            min_bottom_hold_ms: 0.0,
            smoothing_window: 1,
            reset_on_posture_fail: true,
        }
    }
}

/// 腕のフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 伸びている
    Up,
    /// 曲がっている
    Down,
}

/// 1フレーム分の検出入力
#[derive(Debug, Clone, Copy)]
pub struct FrameInput {
    /// 肘角度(度)。関節が取れなかったフレームは None
    pub angle: Option<f32>,
    /// 姿勢ゲートの判定
    pub posture_ok: bool,
    /// フレームの時刻(ms)。単調増加を仮定
    pub timestamp_ms: f64,
}

/// 確定した1レップ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepEvent {
    /// 累計レップ数(今回を含む)
    pub count: u32,
    /// 判定時の作業角度(スムージング後)
    pub angle: f32,
}

/// 検出器の状態。step 以外から書き換えない
#[derive(Debug, Clone)]
pub struct RepDetectorState {
    pub phase: Phase,
    pub depth_reached: bool,
    pub last_rep_at: Option<f64>,
    pub bottom_hold_start: Option<f64>,
    pub rep_count: u32,
    angle_history: VecDeque<f32>,
}

impl RepDetectorState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Up,
            depth_reached: false,
            last_rep_at: None,
            bottom_hold_start: None,
            rep_count: 0,
            angle_history: VecDeque::new(),
        }
    }

    /// 初期状態へ戻す
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 1フレーム分進める。確定レップがあれば返す。
    ///
    /// angle が None のフレームは履歴にもフェーズにも触れない
    /// (検出が飛んだフレームはフェーズ変化として扱わない)。
    pub fn step(&mut self, input: FrameInput, config: &RepConfig) -> Option<RepEvent> {
        let raw = input.angle?;
        let now = input.timestamp_ms;
        let angle = self.smoothed(raw, config);

        if !input.posture_ok && config.reset_on_posture_fail {
            // 姿勢が崩れたら途中の深さは捨てて伸展状態に戻す
            self.depth_reached = false;
            self.bottom_hold_start = None;
            self.phase = Phase::Up;
            return None;
        }

        // ヒステリシス: 閾値の間は現フェーズを維持
        let candidate = if angle >= config.up_threshold {
            Phase::Up
        } else if angle <= config.down_threshold {
            Phase::Down
        } else {
            self.phase
        };

        // 深さ到達は「姿勢が正しいまま閾値以下」の瞬間にだけ立てる
        if angle <= config.down_threshold && input.posture_ok {
            self.depth_reached = true;
        }

        match (self.phase, candidate) {
            (_, Phase::Down) => {
                if self.bottom_hold_start.is_none() {
                    self.bottom_hold_start = Some(now);
                }
                self.phase = Phase::Down;
                None
            }
            (Phase::Up, Phase::Up) => None,
            (Phase::Down, Phase::Up) => {
                let hold_ok = config.min_bottom_hold_ms <= 0.0
                    || self
                        .bottom_hold_start
                        .map_or(false, |t| now - t >= config.min_bottom_hold_ms);
                let interval_ok = self
                    .last_rep_at
                    .map_or(true, |t| now - t >= config.min_rep_interval_ms);

                self.phase = Phase::Up;
                self.bottom_hold_start = None;

                if self.depth_reached && hold_ok && interval_ok && input.posture_ok {
                    self.rep_count += 1;
                    self.last_rep_at = Some(now);
                    self.depth_reached = false;
                    Some(RepEvent {
                        count: self.rep_count,
                        angle,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// 中央値スムージング。窓幅 2 未満なら素通し
    fn smoothed(&mut self, raw: f32, config: &RepConfig) -> f32 {
        if config.smoothing_window < 2 {
            return raw;
        }
        self.angle_history.push_back(raw);
        while self.angle_history.len() > config.smoothing_window {
            self.angle_history.pop_front();
        }
        median(&self.angle_history)
    }
}

impl Default for RepDetectorState {
    fn default() -> Self {
        Self::new()
    }
}

fn median(values: &VecDeque<f32>) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
