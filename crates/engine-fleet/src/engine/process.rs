use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

use super::error::DriverError;

pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(500);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// エンジンとの行単位の入出力。
///
/// 実プロセス (`EngineProcess`) とテスト用のスクリプトエンジンが実装する。
pub trait EngineIo: Send {
    /// 1行送る（改行は実装側で付ける）。
    fn send_line(&mut self, line: &str) -> Result<(), DriverError>;

    /// 次の1行を待つ。`timeout` が `None` なら無期限に待つ。
    fn recv_line(&mut self, timeout: Option<Duration>) -> Result<String, DriverError>;

    /// `quit` を送って終了を待つ。猶予を過ぎたら kill する。
    fn close(&mut self) -> Result<(), DriverError>;

    /// 応答しないエンジンを即座に止める。
    fn kill(&mut self);
}

/// ワーカーがエンジンを起動（および再起動）するための生成器。
pub trait EngineLauncher: Send + Sync {
    type Io: EngineIo;

    fn launch(&self, worker_id: usize) -> Result<Self::Io>;
}

/// エンジンプロセス起動時の設定。UCI オプションは `DriverSettings` 側で持つ。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
}

/// 1本のエンジンプロセスに対する入出力をカプセル化する。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    closed: bool,
    pub label: String,
}

impl EngineProcess {
    pub fn spawn(cfg: &EngineConfig, label: String) -> Result<Self> {
        let mut cmd = Command::new(&cfg.path);
        cmd.args(&cfg.args).stdin(Stdio::piped()).stdout(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // 端末の Ctrl-C はプール側で受け、エンジンには quit で終了させる。
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn engine at {}", cfg.path.display()))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("{label}: no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("{label}: no stdout"))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::Builder::new()
            .name(format!("{label}-stdout"))
            .spawn(move || pump_lines(BufReader::new(stdout), &tx))
            .context("failed to spawn engine reader thread")?;

        log::debug!("{label}: spawned {} (pid {})", cfg.path.display(), child.id());
        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            closed: false,
            label,
        })
    }

    fn reap(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.closed = true;
    }
}

/// 行を読んで送り続ける。UTF-8 として壊れたバイトは置換文字にして流し、
/// EOF か読み取りエラーで終わる（チャネルが閉じて `Closed` として見える）。
fn pump_lines<R: BufRead>(mut reader: R, tx: &Sender<String>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
            break;
        }
    }
}

impl EngineIo for EngineProcess {
    fn send_line(&mut self, line: &str) -> Result<(), DriverError> {
        log::trace!("{} <- {line}", self.label);
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn recv_line(&mut self, timeout: Option<Duration>) -> Result<String, DriverError> {
        let line = match timeout {
            None => self.rx.recv().map_err(|_| DriverError::Closed)?,
            Some(limit) => self.rx.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => DriverError::Timeout(limit),
                RecvTimeoutError::Disconnected => DriverError::Closed,
            })?,
        };
        log::trace!("{} -> {line}", self.label);
        Ok(line)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        let sent = self.send_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                log::debug!("{}: exited with {status}", self.label);
                self.closed = true;
                return sent;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        log::warn!("{}: did not exit after quit, killing", self.label);
        self.reap();
        sent
    }

    fn kill(&mut self) {
        if !self.closed {
            self.reap();
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// `EngineConfig` から実プロセスを起動するランチャー。
pub struct ProcessLauncher {
    pub config: EngineConfig,
}

impl ProcessLauncher {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl EngineLauncher for ProcessLauncher {
    type Io = EngineProcess;

    fn launch(&self, worker_id: usize) -> Result<EngineProcess> {
        EngineProcess::spawn(&self.config, format!("engine#{worker_id}"))
    }
}
