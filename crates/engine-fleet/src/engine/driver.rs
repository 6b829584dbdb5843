//! 1リクエスト分の UCI 往復。
//!
//! プロトコルにリクエスト ID が無いため、応答の帰属は「1プロセスにつき
//! 同時に1リクエストだけ」という直列化に依存している（`Worker` のロック）。
//! 先読みのパイプライン化はしない。

use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::error::DriverError;
use super::info::InfoSnapshot;
use super::process::EngineIo;
use crate::position::{Fen, Side};
use crate::types::WorkItem;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MATE_SCORE: i32 = 100_000;

/// 会話の状態。`search` の途中でエラーになると `Searching` のまま残り、
/// そのドライバは再利用できない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitingHandshake,
    Ready,
    Searching,
    ResultAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// `bestmove` の指し手を答えとする（テストスイート）
    BestMove,
    /// 最後の score を白視点の評価値にする（ラベル生成）
    Evaluate { mate_score: i32 },
}

impl SearchMode {
    pub fn is_evaluate(self) -> bool {
        matches!(self, SearchMode::Evaluate { .. })
    }
}

/// `go` に付ける探索制限。少なくとも一方は指定されている。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimit {
    depth: Option<u32>,
    movetime_ms: Option<u64>,
}

impl SearchLimit {
    pub fn new(depth: Option<u32>, movetime_ms: Option<u64>) -> Option<Self> {
        if depth.is_none() && movetime_ms.is_none() {
            return None;
        }
        Some(Self { depth, movetime_ms })
    }

    pub fn depth(depth: u32) -> Self {
        Self {
            depth: Some(depth),
            movetime_ms: None,
        }
    }

    pub fn movetime(ms: u64) -> Self {
        Self {
            depth: None,
            movetime_ms: Some(ms),
        }
    }

    pub fn go_command(&self) -> String {
        let mut cmd = String::from("go");
        if let Some(d) = self.depth {
            cmd.push_str(&format!(" depth {d}"));
        }
        if let Some(ms) = self.movetime_ms {
            cmd.push_str(&format!(" movetime {ms}"));
        }
        cmd
    }
}

/// ハンドシェイクと各リクエストで使う設定。全ワーカーで共有する。
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub mode: SearchMode,
    pub limit: SearchLimit,
    pub threads: usize,
    pub hash_mb: Option<u32>,
    /// 追加のUCIオプション (Name=Value 形式)
    pub options: Vec<String>,
    /// 1リクエスト全体の期限。`None` なら無期限に待つ
    pub request_timeout: Option<Duration>,
    pub handshake_timeout: Duration,
}

impl DriverSettings {
    pub fn new(mode: SearchMode, limit: SearchLimit) -> Self {
        Self {
            mode,
            limit,
            threads: 1,
            hash_mb: None,
            options: Vec::new(),
            request_timeout: None,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// 期限付きの待ち。タイムアウト時には設定値 `limit` を報告する。
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }
}

/// `go` から `bestmove` までに得たもの。
#[derive(Debug, Clone)]
pub struct Exchange {
    pub best_move: Option<String>,
    pub lines: Vec<String>,
    pub snapshot: InfoSnapshot,
    pub side_to_move: Side,
}

pub struct Driver<E: EngineIo> {
    io: E,
    state: ProtocolState,
    option_names: HashSet<String>,
    limit: SearchLimit,
    request_timeout: Option<Duration>,
}

impl<E: EngineIo> Driver<E> {
    /// `uci` → `uciok` までのバナーを読み捨て、オプションを設定して `readyok` を待つ。
    pub fn handshake(io: E, settings: &DriverSettings) -> Result<Self, DriverError> {
        let mut driver = Self {
            io,
            state: ProtocolState::AwaitingHandshake,
            option_names: HashSet::new(),
            limit: settings.limit,
            request_timeout: settings.request_timeout,
        };
        let deadline = Some(Deadline::after(settings.handshake_timeout));
        driver.io.send_line("uci")?;
        loop {
            let line = driver.recv(deadline).map_err(|e| handshake_error("uciok", e))?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    driver.option_names.insert(name.to_ascii_lowercase());
                }
            } else if line.trim() == "uciok" {
                break;
            }
        }

        driver.set_option_if_available("Threads", &settings.threads.to_string())?;
        if let Some(mb) = settings.hash_mb {
            driver.set_option_if_available("Hash", &mb.to_string())?;
        }
        for opt in &settings.options {
            if let Some((name, value)) = opt.split_once('=') {
                driver.set_option_if_available(name.trim(), value.trim())?;
            } else {
                // "=" がない場合はボタン型オプションとみなし、値なしで送る
                driver.io.send_line(&format!("setoption name {}", opt.trim()))?;
            }
        }
        driver.wait_ready(deadline).map_err(|e| handshake_error("readyok", e))?;
        driver.state = ProtocolState::Ready;
        Ok(driver)
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// 1局面を探索させ、`bestmove` 行までを読み取る。
    ///
    /// 局面が不正な場合はエンジンに何も送らずに `InvalidPosition` を返す。
    pub fn search(&mut self, item: &WorkItem) -> Result<Exchange, DriverError> {
        if self.state != ProtocolState::Ready {
            return Err(DriverError::OutOfSync(self.state));
        }
        let fen = Fen::parse(&item.position).map_err(|source| DriverError::InvalidPosition {
            position: item.position.clone(),
            source,
        })?;
        let deadline = self.request_timeout.map(Deadline::after);

        self.state = ProtocolState::Searching;
        self.io.send_line("ucinewgame")?;
        self.wait_ready(deadline)?;
        self.io.send_line(&format!("position fen {}", fen.canonical()))?;
        self.io.send_line(&self.limit.go_command())?;

        let mut lines = Vec::new();
        let mut snapshot = InfoSnapshot::default();
        let best_move = loop {
            let line = self.recv(deadline)?;
            if line.starts_with("info") {
                snapshot.update_from_line(&line);
            }
            let terminal = line
                .strip_prefix("bestmove")
                .map(|rest| rest.split_whitespace().next().map(str::to_string));
            lines.push(line);
            if let Some(mv) = terminal {
                break mv;
            }
        };
        self.state = ProtocolState::ResultAvailable;

        let exchange = Exchange {
            best_move,
            lines,
            snapshot,
            side_to_move: fen.side_to_move,
        };
        self.state = ProtocolState::Ready;
        Ok(exchange)
    }

    /// `quit` を送ってプロセスを閉じる。
    pub fn shutdown(mut self) -> Result<(), DriverError> {
        self.io.close()
    }

    pub fn kill(mut self) {
        self.io.kill();
    }

    fn wait_ready(&mut self, deadline: Option<Deadline>) -> Result<(), DriverError> {
        self.io.send_line("isready")?;
        loop {
            if self.recv(deadline)?.trim() == "readyok" {
                return Ok(());
            }
        }
    }

    fn recv(&mut self, deadline: Option<Deadline>) -> Result<String, DriverError> {
        let Some(deadline) = deadline else {
            return self.io.recv_line(None);
        };
        let remaining = deadline.at.saturating_duration_since(Instant::now());
        self.io.recv_line(Some(remaining)).map_err(|e| match e {
            DriverError::Timeout(_) => DriverError::Timeout(deadline.limit),
            other => other,
        })
    }

    fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<(), DriverError> {
        if self.option_names.is_empty() || self.option_names.contains(&name.to_ascii_lowercase()) {
            self.io.send_line(&format!("setoption name {name} value {value}"))?;
        } else {
            log::debug!("engine does not advertise option '{name}', skipping");
        }
        Ok(())
    }
}

fn handshake_error(waiting_for: &str, err: DriverError) -> DriverError {
    match err {
        DriverError::Timeout(_) | DriverError::Closed => {
            DriverError::Handshake(format!("no '{waiting_for}' from engine ({err})"))
        }
        other => other,
    }
}

/// `option name <Name...> type ...` からオプション名を取り出す。
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().skip_while(|tok| *tok != "name").skip(1);
    let mut parts = Vec::new();
    for tok in tokens.by_ref() {
        if tok == "type" {
            break;
        }
        parts.push(tok);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// 探索結果の score を白視点の整数値にする。
///
/// UCI の score は手番側から見た値なので、黒番の局面では符号を反転する。
/// 詰みは手数によらず ±`mate_score`（`mate N`, N > 0 なら手番側の勝ち）。
pub fn white_score(exchange: &Exchange, mate_score: i32) -> Result<i32, DriverError> {
    let snapshot = &exchange.snapshot;
    if let Some(bad) = &snapshot.malformed {
        return Err(DriverError::Malformed(format!("unparsable score in '{bad}'")));
    }
    let relative = match (snapshot.score_cp, snapshot.score_mate) {
        (Some(cp), _) => cp,
        (None, Some(n)) if n > 0 => mate_score,
        (None, Some(_)) => -mate_score,
        (None, None) => {
            return Err(DriverError::Malformed("search ended without a score".to_string()));
        }
    };
    match exchange.side_to_move {
        Side::White => Ok(relative),
        Side::Black => relative
            .checked_neg()
            .ok_or_else(|| DriverError::Malformed(format!("score {relative} cannot be negated"))),
    }
}
