//! テスト用のスクリプトエンジン。プロセスを起こさずにドライバ以上の層を動かす。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};

use super::error::DriverError;
use super::process::{EngineIo, EngineLauncher};

/// `go` を受け取ったときの振る舞い。
pub enum Reply {
    Lines(Vec<String>),
    /// 何も返さない（応答停止）
    Hang,
    /// 出力を閉じる（異常終了）
    Exit,
}

type Responder = dyn Fn(&str) -> Reply + Send + Sync;

pub struct Script {
    /// `position fen` で渡された局面を受け取り、`go` への応答を返す
    pub respond: Arc<Responder>,
    /// `go` 受信時に入れる待ち時間
    pub delay: Arc<dyn Fn(&str) -> Duration + Send + Sync>,
    /// false なら `uciok` を返さない
    pub handshake: bool,
    pub options: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            respond: Arc::new(|_: &str| answer_lines("info depth 1 score cp 0 pv e2e4", "e2e4")),
            delay: Arc::new(|_: &str| Duration::ZERO),
            handshake: true,
            options: vec!["Threads".to_string(), "Hash".to_string()],
        }
    }
}

impl Script {
    pub fn responding(respond: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            respond: Arc::new(respond),
            ..Self::default()
        }
    }
}

pub fn answer_lines(info: &str, best: &str) -> Reply {
    Reply::Lines(vec![info.to_string(), format!("bestmove {best}")])
}

/// 送受信した行を (エンジン番号, 行) で記録する共有ログ。
pub type CommandLog = Arc<Mutex<Vec<(usize, String)>>>;

pub struct ScriptedEngine {
    id: usize,
    script: Arc<Script>,
    pending: VecDeque<String>,
    position: String,
    hanging: bool,
    closed: bool,
    log: CommandLog,
    closes: Arc<AtomicUsize>,
}

impl EngineIo for ScriptedEngine {
    fn send_line(&mut self, line: &str) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.log.lock().unwrap().push((self.id, line.to_string()));
        if line == "uci" {
            self.pending.push_back("id name scripted".to_string());
            for name in &self.script.options {
                self.pending.push_back(format!("option name {name} type spin default 1 min 1 max 512"));
            }
            if self.script.handshake {
                self.pending.push_back("uciok".to_string());
            } else {
                self.hanging = true;
            }
        } else if line == "isready" {
            self.pending.push_back("readyok".to_string());
        } else if let Some(fen) = line.strip_prefix("position fen ") {
            self.position = fen.to_string();
        } else if line.starts_with("go") {
            std::thread::sleep((self.script.delay)(&self.position));
            match (self.script.respond)(&self.position) {
                Reply::Lines(lines) => self.pending.extend(lines),
                Reply::Hang => self.hanging = true,
                Reply::Exit => self.closed = true,
            }
        }
        Ok(())
    }

    fn recv_line(&mut self, timeout: Option<Duration>) -> Result<String, DriverError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(line);
        }
        if self.hanging && !self.closed {
            let limit = timeout.expect("scripted engine would block forever");
            std::thread::sleep(limit);
            return Err(DriverError::Timeout(limit));
        }
        Err(DriverError::Closed)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if !self.closed {
            self.log.lock().unwrap().push((self.id, "quit".to_string()));
            self.closed = true;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn kill(&mut self) {
        self.closed = true;
    }
}

#[derive(Default)]
pub struct ScriptedLauncher {
    pub script: Arc<Script>,
    pub log: CommandLog,
    pub launches: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    /// この回数目以降の launch を失敗させる
    pub fail_from: Option<usize>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            ..Self::default()
        }
    }

    pub fn commands_of(&self, engine: usize) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == engine)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl EngineLauncher for ScriptedLauncher {
    type Io = ScriptedEngine;

    fn launch(&self, worker_id: usize) -> Result<ScriptedEngine> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_from.is_some_and(|from| n >= from) {
            bail!("scripted launch #{n} refused");
        }
        Ok(ScriptedEngine {
            id: worker_id,
            script: self.script.clone(),
            pending: VecDeque::new(),
            position: String::new(),
            hanging: false,
            closed: false,
            log: self.log.clone(),
            closes: self.closes.clone(),
        })
    }
}
