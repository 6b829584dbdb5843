//! EPD テストスイートでエンジンの最善手を検証する。

use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Local;
use serde::Serialize;

use super::{JobPhase, enter};
use crate::engine::{EngineLauncher, WorkerPool};
use crate::position::parse_suite_line;
use crate::types::{ItemResult, ItemStatus, WorkItem};

const JOB: &str = "epd_suite";

/// スイートを読み込む。空行と `#` 行は飛ばし、壊れた行は行番号付きでエラーにする。
pub fn load_suite<R: BufRead>(reader: R) -> Result<Vec<WorkItem>> {
    enter(JOB, JobPhase::Loading);
    let mut items = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", lineno + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let entry = parse_suite_line(trimmed)
            .with_context(|| format!("invalid test case at line {}: {trimmed}", lineno + 1))?;
        items.push(
            WorkItem::new(items.len(), entry.position)
                .with_expected(entry.best_moves)
                .with_label(entry.label),
        );
    }
    if items.is_empty() {
        bail!("test suite contains no positions");
    }
    log::info!("loaded {} test positions", items.len());
    Ok(items)
}

/// 解答が正解手集合に含まれていれば合格。
pub fn classify(item: &WorkItem, result: &ItemResult) -> bool {
    result.value.best_move().is_some_and(|mv| item.accepts(mv))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub position: String,
    pub pv: String,
    pub actual: Option<String>,
    pub accepted: Vec<String>,
    pub status: String,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => writeln!(f, "FAILED: id {label} fen {}", self.position)?,
            None => writeln!(f, "FAILED: #{} fen {}", self.index + 1, self.position)?,
        }
        writeln!(f, "  {}", self.pv)?;
        write!(
            f,
            "  found {} expected {}",
            self.actual.as_deref().unwrap_or("(none)"),
            self.accepted.join(" ")
        )?;
        if self.status != "ok" {
            write!(f, " [{}]", self.status)?;
        }
        Ok(())
    }
}

/// 合否の集計。結果を受け取るスレッドだけが更新する。
#[derive(Debug, Clone, Default, Serialize)]
pub struct Aggregate {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub fallbacks: usize,
    pub failures: Vec<FailureRecord>,
}

impl Aggregate {
    pub fn record(&mut self, item: &WorkItem, result: &ItemResult) -> bool {
        match result.status {
            ItemStatus::Ok => {}
            ItemStatus::TimedOut => self.timed_out += 1,
            ItemStatus::Fallback(_) | ItemStatus::EngineLost(_) => self.fallbacks += 1,
        }
        if classify(item, result) {
            self.passed += 1;
            return true;
        }
        self.failed += 1;
        let record = FailureRecord {
            index: item.index,
            label: item.label.clone(),
            position: item.position.clone(),
            pv: result.pv_summary().to_string(),
            actual: result.raw_answer.clone(),
            accepted: item.expected.clone().unwrap_or_default(),
            status: result.status.to_string(),
        };
        log::warn!("{record}");
        self.failures.push(record);
        false
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed
    }
}

/// 全問をプールに流して集計する。中断された場合はエラー。
pub fn run_suite<L: EngineLauncher>(
    pool: &WorkerPool<L>,
    items: &[WorkItem],
    shutdown: &AtomicBool,
) -> Result<(Aggregate, Duration)> {
    let total = items.len();
    let started = Instant::now();
    let mut aggregate = Aggregate::default();

    enter(JOB, JobPhase::Dispatching);
    log::info!("running {total} test positions on {} engines", pool.size());
    enter(JOB, JobPhase::Collecting);
    let delivered = pool.run(items.to_vec(), shutdown, |result| match items.get(result.index) {
        Some(item) => {
            aggregate.record(item, &result);
        }
        None => log::error!("result for unknown test index {}", result.index),
    })?;
    if delivered < total {
        bail!("interrupted after {delivered}/{total} test positions");
    }
    if aggregate.total() != total {
        bail!("{} results classified for {total} test positions", aggregate.total());
    }
    Ok((aggregate, started.elapsed()))
}

/// JSON レポートに残す実行条件。
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSettings {
    pub depth: Option<u32>,
    pub movetime_ms: Option<u64>,
    pub pool_size: usize,
    pub threads: usize,
    pub hash_mb: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub timestamp: String,
    pub engine: String,
    pub settings: ReportSettings,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub fallbacks: usize,
    pub elapsed_secs: f64,
    pub failures: Vec<FailureRecord>,
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

impl SuiteReport {
    pub fn new(engine: String, settings: ReportSettings, aggregate: Aggregate, elapsed: Duration) -> Self {
        enter(JOB, JobPhase::Reporting);
        Self {
            timestamp: Local::now().to_rfc3339(),
            engine,
            settings,
            total: aggregate.total(),
            passed: aggregate.passed,
            failed: aggregate.failed,
            timed_out: aggregate.timed_out,
            fallbacks: aggregate.fallbacks,
            elapsed_secs: elapsed.as_secs_f64(),
            failures: aggregate.failures,
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Total tests: {}\nPassed: {} ({:.2}%)\nFailed: {} ({:.2}%)\n",
            self.total,
            self.passed,
            percent(self.passed, self.total),
            self.failed,
            percent(self.failed, self.total),
        );
        if self.timed_out > 0 {
            out.push_str(&format!("Timed out: {}\n", self.timed_out));
        }
        if self.fallbacks > 0 {
            out.push_str(&format!("Fallbacks: {}\n", self.fallbacks));
        }
        out.push_str(&format!("Elapsed: {:.2}s", self.elapsed_secs));
        out
    }

    /// 集計を標準出力に表示し、指定があれば JSON も書き出す。
    pub fn publish(&self, json: Option<&Path>) -> Result<()> {
        println!("{}", self.render());
        if let Some(path) = json {
            self.write_json(path)?;
        }
        enter(JOB, JobPhase::Done);
        Ok(())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        log::info!("report written to {}", path.display());
        Ok(())
    }
}
