//! アリーナ側のマッチ状態。
//!
//! 綱の位置とゲーム状態を書き換えるのはこのモジュールだけ。プレイヤー側は
//! pull / ready の意思表示を送り、結果のブロードキャストを受け取るのみ。
//! 状態は前進しかしない(Idle→Countdown→Running→Finished)。やり直しは
//! 新しいアリーナ ID でセッションを作り直す。

use std::collections::{HashMap, HashSet};

use crate::protocol::{GameState, PeerMessage};

pub type PeerId = u64;

/// 綱の勝敗ライン(±この値で決着)
pub const DEFAULT_WIN_THRESHOLD: i32 = 4;
/// カウントダウンの開始値
pub const COUNTDOWN_START: u32 = 3;

/// 綱のどちら側を引くか。接続順で決まり、セッション中は変わらない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopeSide {
    /// 先に接続した側。負方向へ引く
    Left,
    /// 後から接続した側。正方向へ引く
    Right,
}

impl RopeSide {
    pub fn pull_delta(&self) -> i32 {
        match self {
            Self::Left => -1,
            Self::Right => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// セッション更新の結果、外へ伝えるべきこと
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 全接続へ送るメッセージ
    Broadcast(PeerMessage),
    /// カウントダウン開始。呼び出し側が 1 秒タイマーを起動する
    CountdownStarted,
    /// 勝敗確定
    Finished { winner: PeerId },
}

/// アリーナ1セッション分の状態
#[derive(Debug)]
pub struct ArenaSession {
    id: String,
    win_threshold: i32,
    /// 接続順。先頭2つだけがスロットを持つ
    peers: Vec<PeerId>,
    names: HashMap<PeerId, String>,
    ready: HashSet<PeerId>,
    rope_position: i32,
    state: GameState,
    countdown: Option<u32>,
    winner: Option<PeerId>,
}

impl ArenaSession {
    pub fn new(id: String, win_threshold: i32) -> Self {
        Self {
            id,
            win_threshold,
            peers: Vec::new(),
            names: HashMap::new(),
            ready: HashSet::new(),
            rope_position: 0,
            state: GameState::Idle,
            countdown: None,
            winner: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn rope_position(&self) -> i32 {
        self.rope_position
    }

    pub fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    pub fn winner(&self) -> Option<PeerId> {
        self.winner
    }

    pub fn name_of(&self, peer: PeerId) -> Option<&str> {
        self.names.get(&peer).map(|s| s.as_str())
    }

    /// スロットを持つピアの側。持たなければ None
    pub fn side_of(&self, peer: PeerId) -> Option<RopeSide> {
        match self.peers.iter().position(|&p| p == peer) {
            Some(0) => Some(RopeSide::Left),
            Some(1) => Some(RopeSide::Right),
            _ => None,
        }
    }

    /// 新しい接続。最初の2ピアだけがスロットを得る。
    /// 3つ目以降は接続したままでも試合には関与しない
    pub fn peer_joined(&mut self, peer: PeerId) -> Option<RopeSide> {
        if self.peers.contains(&peer) {
            return self.side_of(peer);
        }
        self.peers.push(peer);
        self.side_of(peer)
    }

    /// 切断。スロットは再割り当てしない(セッション中は固定)
    pub fn peer_left(&mut self, peer: PeerId) {
        if self.state == GameState::Idle {
            self.ready.remove(&peer);
        }
    }

    /// 受信メッセージを状態へ適用する。
    /// クライアントから来た gameState / countdown は権限がないので無視
    pub fn handle_message(&mut self, peer: PeerId, msg: PeerMessage) -> Vec<SessionEvent> {
        match msg {
            PeerMessage::Intro { name } => {
                self.names.insert(peer, name);
                Vec::new()
            }
            PeerMessage::Ready => self.mark_ready(peer),
            PeerMessage::Pull { .. } => self.apply_pull(peer),
            PeerMessage::GameState { .. } | PeerMessage::Countdown { .. } => Vec::new(),
        }
    }

    /// 準備完了。スロットを持つ2ピアが揃ったらカウントダウンへ
    fn mark_ready(&mut self, peer: PeerId) -> Vec<SessionEvent> {
        if self.state != GameState::Idle || self.side_of(peer).is_none() {
            return Vec::new();
        }
        self.ready.insert(peer);
        if self.ready.len() < 2 {
            return Vec::new();
        }

        self.state = GameState::Countdown;
        self.rope_position = 0;
        self.countdown = Some(COUNTDOWN_START);
        vec![
            SessionEvent::Broadcast(PeerMessage::GameState {
                state: GameState::Countdown,
            }),
            SessionEvent::Broadcast(PeerMessage::Countdown {
                count: Some(COUNTDOWN_START),
            }),
            SessionEvent::CountdownStarted,
        ]
    }

    /// 1秒ごとのカウントダウン刻み。0 に達したら Running へ
    pub fn countdown_tick(&mut self) -> Vec<SessionEvent> {
        let n = match self.countdown {
            Some(n) if n > 0 => n - 1,
            // タイマーの余分な tick は無視
            _ => return Vec::new(),
        };

        let mut events = vec![SessionEvent::Broadcast(PeerMessage::Countdown {
            count: Some(n),
        })];
        if n == 0 {
            self.countdown = None;
            self.state = GameState::Running;
            events.push(SessionEvent::Broadcast(PeerMessage::GameState {
                state: GameState::Running,
            }));
        } else {
            self.countdown = Some(n);
        }
        events
    }

    /// pull 1回分。Running 以外とスロット外のピアは無視。
    /// 引いた方向は送信者のスロットで決まり、ペイロードの delta は見ない
    fn apply_pull(&mut self, peer: PeerId) -> Vec<SessionEvent> {
        if self.state != GameState::Running {
            return Vec::new();
        }
        let side = match self.side_of(peer) {
            Some(s) => s,
            None => return Vec::new(),
        };

        self.rope_position = (self.rope_position + side.pull_delta())
            .clamp(-self.win_threshold, self.win_threshold);

        if self.rope_position.abs() >= self.win_threshold {
            self.state = GameState::Finished;
            self.winner = Some(peer);
            return vec![
                SessionEvent::Broadcast(PeerMessage::GameState {
                    state: GameState::Finished,
                }),
                SessionEvent::Finished { winner: peer },
            ];
        }
        Vec::new()
    }
}
