use anyhow::{bail, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::adapter::{PostureGate, SideSelection};
use crate::detector::RepConfig;
use crate::session::DEFAULT_WIN_THRESHOLD;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub arena: ArenaConfig,
    #[serde(default)]
    pub gladiator: GladiatorConfig,
    #[serde(default)]
    pub rep_counter: RepCounterConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArenaConfig {
    /// コントロール接続の待ち受けアドレス
    #[serde(default = "default_arena_listen")]
    pub listen_addr: String,
    /// 映像接続の待ち受けアドレス
    #[serde(default = "default_arena_media_listen")]
    pub media_listen_addr: String,
    /// 綱の勝敗ライン(±この値で決着)
    #[serde(default = "default_win_threshold")]
    pub win_threshold: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GladiatorConfig {
    /// アリーナのコントロールアドレス
    #[serde(default = "default_arena_addr")]
    pub arena_addr: String,
    /// アリーナの映像アドレス
    #[serde(default = "default_arena_media_addr")]
    pub arena_media_addr: String,
    /// ポーズエンジンが接続してくるフィードの待ち受けアドレス
    #[serde(default = "default_gladiator_feed_listen")]
    pub feed_listen_addr: String,
    /// intro で名乗るプレイヤー名
    #[serde(default = "default_player_name")]
    pub name: String,
    /// フィードに映像が載っていればアリーナへ転送する
    #[serde(default = "default_relay_media")]
    pub relay_media: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepCounterConfig {
    /// 単体カウンターのフィード待ち受けアドレス
    #[serde(default = "default_counter_feed_listen")]
    pub feed_listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    /// 伸ばしきり判定の角度(度)
    #[serde(default = "default_up_threshold")]
    pub up_threshold: f32,
    /// 曲げきり判定の角度(度)
    #[serde(default = "default_down_threshold")]
    pub down_threshold: f32,
    /// レップ間の最小間隔(ミリ秒)
    #[serde(default = "default_min_rep_interval_ms")]
    pub min_rep_interval_ms: f64,
    /// 底での最低保持時間(ミリ秒、0で無効)
    #[serde(default = "default_min_bottom_hold_ms")]
    pub min_bottom_hold_ms: f64,
    /// 角度の中央値スムージング窓(2未満で無効)
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    /// 姿勢ゲートが崩れたらサイクルをやり直す
    #[serde(default = "default_reset_on_posture_fail")]
    pub reset_on_posture_fail: bool,
    /// 追跡する腕 ("left" / "right" / "both")
    #[serde(default = "default_side")]
    pub side: String,
    /// 姿勢ゲート ("none" / "plank" / "torso_tilt")。未指定ならビンごとの既定
    #[serde(default)]
    pub posture_gate: Option<String>,
    /// plank ゲート: 肩-腰-膝の最低角度(度)
    #[serde(default = "default_plank_min_degrees")]
    pub plank_min_degrees: f32,
    /// torso_tilt ゲート: 肩→腰の鉛直からの最低傾き(度)
    #[serde(default = "default_tilt_min_degrees")]
    pub tilt_min_degrees: f32,
    /// 関節を使うのに必要な visibility
    #[serde(default = "default_min_visibility")]
    pub min_visibility: f32,
    /// torso_tilt ゲートで腰に要求する visibility
    #[serde(default = "default_hip_min_visibility")]
    pub hip_min_visibility: f32,
    /// ランドマーク無しがこの時間続いたら警告(ミリ秒)
    #[serde(default = "default_no_detection_warn_ms")]
    pub no_detection_warn_ms: u64,
}

fn default_arena_listen() -> String { "0.0.0.0:9800".to_string() }
fn default_arena_media_listen() -> String { "0.0.0.0:9801".to_string() }
fn default_win_threshold() -> i32 { DEFAULT_WIN_THRESHOLD }
fn default_arena_addr() -> String { "127.0.0.1:9800".to_string() }
fn default_arena_media_addr() -> String { "127.0.0.1:9801".to_string() }
fn default_gladiator_feed_listen() -> String { "127.0.0.1:9810".to_string() }
fn default_player_name() -> String { "player".to_string() }
fn default_relay_media() -> bool { true }
fn default_counter_feed_listen() -> String { "127.0.0.1:9811".to_string() }
fn default_up_threshold() -> f32 { 160.0 }
fn default_down_threshold() -> f32 { 90.0 }
fn default_min_rep_interval_ms() -> f64 { 600.0 }
fn default_min_bottom_hold_ms() -> f64 { 0.0 }
fn default_smoothing_window() -> usize { 5 }
fn default_reset_on_posture_fail() -> bool { true }
fn default_side() -> String { "both".to_string() }
fn default_plank_min_degrees() -> f32 { 165.0 }
fn default_tilt_min_degrees() -> f32 { 13.0 }
fn default_min_visibility() -> f32 { 0.5 }
fn default_hip_min_visibility() -> f32 { 0.4 }
fn default_no_detection_warn_ms() -> u64 { 2000 }

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_arena_listen(),
            media_listen_addr: default_arena_media_listen(),
            win_threshold: default_win_threshold(),
        }
    }
}

impl Default for GladiatorConfig {
    fn default() -> Self {
        Self {
            arena_addr: default_arena_addr(),
            arena_media_addr: default_arena_media_addr(),
            feed_listen_addr: default_gladiator_feed_listen(),
            name: default_player_name(),
            relay_media: default_relay_media(),
        }
    }
}

impl Default for RepCounterConfig {
    fn default() -> Self {
        Self {
            feed_listen_addr: default_counter_feed_listen(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            up_threshold: default_up_threshold(),
            down_threshold: default_down_threshold(),
            min_rep_interval_ms: default_min_rep_interval_ms(),
            min_bottom_hold_ms: default_min_bottom_hold_ms(),
            smoothing_window: default_smoothing_window(),
            reset_on_posture_fail: default_reset_on_posture_fail(),
            side: default_side(),
            posture_gate: None,
            plank_min_degrees: default_plank_min_degrees(),
            tilt_min_degrees: default_tilt_min_degrees(),
            min_visibility: default_min_visibility(),
            hip_min_visibility: default_hip_min_visibility(),
            no_detection_warn_ms: default_no_detection_warn_ms(),
        }
    }
}

impl DetectorConfig {
    pub fn rep_config(&self) -> RepConfig {
        RepConfig {
            up_threshold: self.up_threshold,
            down_threshold: self.down_threshold,
            min_rep_interval_ms: self.min_rep_interval_ms,
            min_bottom_hold_ms: self.min_bottom_hold_ms,
            smoothing_window: self.smoothing_window,
            reset_on_posture_fail: self.reset_on_posture_fail,
        }
    }

    pub fn side_selection(&self) -> Result<SideSelection> {
        match self.side.as_str() {
            "left" => Ok(SideSelection::Left),
            "right" => Ok(SideSelection::Right),
            "both" => Ok(SideSelection::Both),
            other => bail!("unknown side: {} (use left / right / both)", other),
        }
    }

    /// 姿勢ゲートを組み立てる。未指定なら fallback の名前を使う
    pub fn gate(&self, fallback: &str) -> Result<PostureGate> {
        let name = self.posture_gate.as_deref().unwrap_or(fallback);
        match name {
            "none" => Ok(PostureGate::None),
            "plank" => Ok(PostureGate::PlankStraightness {
                min_degrees: self.plank_min_degrees,
            }),
            "torso_tilt" => Ok(PostureGate::TorsoTilt {
                min_degrees: self.tilt_min_degrees,
                min_visibility: self.hip_min_visibility,
            }),
            other => bail!(
                "unknown posture_gate: {} (use none / plank / torso_tilt)",
                other
            ),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "[config] {} not loaded ({}), using defaults",
                    path.as_ref().display(),
                    e
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.arena.win_threshold, 4);
        assert_eq!(config.detector.smoothing_window, 5);
        assert_eq!(config.detector.up_threshold, 160.0);
        assert!(config.detector.posture_gate.is_none());
        assert_eq!(config.gladiator.name, "player");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [detector]
            down_threshold = 95.0
            side = "left"
            "#,
        )
        .unwrap();
        assert_eq!(config.detector.down_threshold, 95.0);
        assert_eq!(config.detector.up_threshold, 160.0);
        assert_eq!(
            config.detector.side_selection().unwrap(),
            SideSelection::Left
        );
    }

    #[test]
    fn test_gate_uses_fallback_when_unset() {
        let config = DetectorConfig::default();
        assert_eq!(
            config.gate("torso_tilt").unwrap(),
            PostureGate::TorsoTilt {
                min_degrees: 13.0,
                min_visibility: 0.4
            }
        );
        assert_eq!(
            config.gate("plank").unwrap(),
            PostureGate::PlankStraightness { min_degrees: 165.0 }
        );
    }

    #[test]
    fn test_configured_gate_wins_over_fallback() {
        let config: Config = toml::from_str(
            r#"
            [detector]
            posture_gate = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.detector.gate("plank").unwrap(), PostureGate::None);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let mut config = DetectorConfig::default();
        config.side = "middle".to_string();
        assert!(config.side_selection().is_err());
        config.posture_gate = Some("handstand".to_string());
        assert!(config.gate("none").is_err());
    }
}
