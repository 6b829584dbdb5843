//! 局面ファイルを評価して `<fen>;<score>` 形式のラベルを作る。
//!
//! 結果は到着順に `ResultBuffer` へ入れ、全件揃ってから入力順に書き出す。
//! 途中経過のファイルは作らない。

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use thiserror::Error;

use super::{JobPhase, enter};
use crate::common::io::OutputSink;
use crate::engine::{EngineLauncher, WorkerPool};
use crate::position::strip_annotation;
use crate::types::{ItemStatus, WorkItem};

pub const DEFAULT_MAX_FENS: usize = 10_000_000;
pub const DEFAULT_PROGRESS_INTERVAL: usize = 10_000;

const JOB: &str = "gen_evals";

/// 入力のうちどこを評価するか。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub limit: Option<usize>,
    /// 読み込む行数の上限（`start` を適用する前）
    pub max_fens: usize,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            start: 0,
            limit: None,
            max_fens: DEFAULT_MAX_FENS,
        }
    }
}

/// 局面を読み込み、注記を落として `[start, start + limit)` を返す。
pub fn load_positions<R: BufRead>(reader: R, selection: Selection) -> Result<Vec<String>> {
    enter(JOB, JobPhase::Loading);
    let mut positions = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        if positions.len() >= selection.max_fens {
            log::info!("reached max-fens ({}), ignoring the rest of the input", selection.max_fens);
            break;
        }
        let line = line.with_context(|| format!("failed to read line {}", lineno + 1))?;
        let fen = strip_annotation(&line);
        if !fen.is_empty() {
            positions.push(fen.to_string());
        }
    }
    if positions.is_empty() {
        bail!("no positions found in input");
    }
    let total = positions.len();
    if selection.start >= total {
        bail!("start index {} is beyond the {total} positions loaded", selection.start);
    }
    let end = selection.limit.map_or(total, |n| total.min(selection.start.saturating_add(n)));
    log::info!("loaded {total} positions, evaluating [{}, {end})", selection.start);
    Ok(positions.drain(selection.start..end).collect())
}

/// `--output` 未指定時の出力先。
pub fn default_output_path(start: usize, count: usize) -> PathBuf {
    PathBuf::from(format!("fens_evals_{start}_{}.txt", start + count))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("result index {index} is out of range for a batch of {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("result for index {0} delivered twice")]
    Duplicate(usize),
    #[error("no result for index {0}")]
    Missing(usize),
}

/// バッチと同じ長さの並べ直し用バッファ。
#[derive(Debug)]
pub struct ResultBuffer<T> {
    slots: Vec<Option<T>>,
    filled: usize,
}

impl<T> ResultBuffer<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
            filled: 0,
        }
    }

    pub fn insert(&mut self, index: usize, value: T) -> Result<(), BufferError> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or(BufferError::OutOfRange { index, len })?;
        if slot.is_some() {
            return Err(BufferError::Duplicate(index));
        }
        *slot = Some(value);
        self.filled += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// 入力順の値を取り出す。空きが残っていればエラー。
    pub fn into_values(self) -> Result<Vec<T>, BufferError> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or(BufferError::Missing(i)))
            .collect()
    }
}

/// 評価結果。`scores[i]` が入力 `i` 番目の白視点評価値。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalOutcome {
    pub scores: Vec<i32>,
    pub fallbacks: usize,
    pub timed_out: usize,
    pub engine_lost: usize,
}

/// 全局面をプールに流し、入力順に並べ直した評価値を返す。
///
/// 中断された場合は書き出しをせずにエラーを返す。
pub fn evaluate<L: EngineLauncher>(
    pool: &WorkerPool<L>,
    positions: &[String],
    shutdown: &AtomicBool,
    progress_interval: usize,
) -> Result<EvalOutcome> {
    let total = positions.len();
    let items: Vec<WorkItem> =
        positions.iter().enumerate().map(|(i, fen)| WorkItem::new(i, fen.as_str())).collect();
    let interval = progress_interval.max(1);
    let mut buffer = ResultBuffer::new(total);
    let mut outcome = EvalOutcome::default();
    let mut buffer_err = None;

    enter(JOB, JobPhase::Dispatching);
    log::info!("evaluating {total} positions with {} engines", pool.size());
    enter(JOB, JobPhase::Collecting);
    let delivered = pool.run(items, shutdown, |result| {
        match &result.status {
            ItemStatus::Ok => {}
            ItemStatus::Fallback(_) => outcome.fallbacks += 1,
            ItemStatus::TimedOut => outcome.timed_out += 1,
            ItemStatus::EngineLost(_) => outcome.engine_lost += 1,
        }
        let score = result.value.score().unwrap_or(0);
        if let Err(e) = buffer.insert(result.index, score) {
            buffer_err.get_or_insert(e);
            return;
        }
        let done = buffer.filled();
        if done % interval == 0 && done < total {
            log::info!("Evaluated {done}/{total} positions");
        }
    })?;
    if let Some(e) = buffer_err {
        return Err(e).context("result bookkeeping failed");
    }
    if delivered < total {
        bail!("interrupted after {delivered}/{total} positions, no output written");
    }
    log::info!("Evaluated {total}/{total} positions");
    if outcome.fallbacks + outcome.timed_out + outcome.engine_lost > 0 {
        log::warn!(
            "{} fallback, {} timed out, {} lost-engine positions were scored 0",
            outcome.fallbacks,
            outcome.timed_out,
            outcome.engine_lost
        );
    }
    outcome.scores = buffer.into_values()?;
    Ok(outcome)
}

pub fn write_labels<W: Write>(out: &mut W, positions: &[String], scores: &[i32]) -> std::io::Result<()> {
    for (fen, score) in positions.iter().zip(scores) {
        writeln!(out, "{fen};{score}")?;
    }
    Ok(())
}

/// 入力順に `<fen>;<score>` を書き出す。`.gz` なら圧縮する。
pub fn persist(path: &Path, positions: &[String], scores: &[i32]) -> Result<()> {
    enter(JOB, JobPhase::Persisting);
    let mut sink = OutputSink::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_labels(&mut sink, positions, scores)
        .with_context(|| format!("failed to write {}", path.display()))?;
    sink.finish().with_context(|| format!("failed to finish {}", path.display()))?;
    log::info!("wrote {} labels to {}", scores.len(), path.display());
    enter(JOB, JobPhase::Done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::testing::{Script, ScriptedLauncher, answer_lines};
    use crate::engine::{DEFAULT_MATE_SCORE, Dispatch, DriverSettings, SearchLimit, SearchMode};

    fn fen(n: usize, side: char) -> String {
        format!("4k3/8/8/8/8/8/8/4K3 {side} - - 0 {n}")
    }

    /// 手番側から見て fullmove と同じ値を返すエンジン
    fn pool(size: usize) -> WorkerPool<ScriptedLauncher> {
        let script = Script {
            delay: Arc::new(|_: &str| Duration::from_millis(rand::random_range(0..10))),
            ..Script::responding(|fen: &str| {
                let n = fen.rsplit(' ').next().unwrap_or("0");
                answer_lines(&format!("info depth 6 score cp {n} pv e1d1"), "e1d1")
            })
        };
        let settings = DriverSettings::new(
            SearchMode::Evaluate {
                mate_score: DEFAULT_MATE_SCORE,
            },
            SearchLimit::depth(6),
        );
        WorkerPool::start(size, ScriptedLauncher::new(script), settings, Dispatch::FirstAvailable)
            .unwrap()
    }

    #[test]
    fn load_strips_annotations_and_slices() {
        let input = concat!(
            "8/8/8/8/8/8/8/K6k w - - 0 1 [1.0]\n",
            "\n",
            "8/8/8/8/8/8/8/K6k b - - 0 2 [0.5]\n",
            "8/8/8/8/8/8/8/K6k w - - 0 3\n",
            "8/8/8/8/8/8/8/K6k w - - 0 4\n",
        );
        let all = load_positions(Cursor::new(input), Selection::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0], "8/8/8/8/8/8/8/K6k w - - 0 1");
        assert_eq!(all[1], "8/8/8/8/8/8/8/K6k b - - 0 2");

        let sliced = load_positions(
            Cursor::new(input),
            Selection {
                start: 1,
                limit: Some(2),
                ..Selection::default()
            },
        )
        .unwrap();
        assert_eq!(sliced, all[1..3].to_vec());

        let capped = load_positions(
            Cursor::new(input),
            Selection {
                max_fens: 3,
                start: 2,
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(capped, vec!["8/8/8/8/8/8/8/K6k w - - 0 3".to_string()]);
    }

    #[test]
    fn load_rejects_empty_input_and_bad_start() {
        assert!(load_positions(Cursor::new("\n\n"), Selection::default()).is_err());
        let past_end = Selection {
            start: 5,
            ..Selection::default()
        };
        assert!(load_positions(Cursor::new("8/8/8/8/8/8/8/K6k w - -\n"), past_end).is_err());
    }

    #[test]
    fn default_output_path_names_the_range() {
        assert_eq!(default_output_path(100, 50), PathBuf::from("fens_evals_100_150.txt"));
    }

    #[test]
    fn result_buffer_rejects_duplicates_and_out_of_range() {
        let mut buf = ResultBuffer::new(3);
        buf.insert(2, 'c').unwrap();
        buf.insert(0, 'a').unwrap();
        assert_eq!(buf.insert(2, 'x'), Err(BufferError::Duplicate(2)));
        assert_eq!(buf.insert(3, 'x'), Err(BufferError::OutOfRange { index: 3, len: 3 }));
        assert!(!buf.is_full());

        let mut partial = ResultBuffer::new(2);
        partial.insert(1, 'b').unwrap();
        assert_eq!(partial.into_values(), Err(BufferError::Missing(0)));

        buf.insert(1, 'b').unwrap();
        assert!(buf.is_full());
        assert_eq!(buf.into_values().unwrap(), vec!['a', 'b', 'c']);
    }

    #[test]
    fn labels_come_out_in_input_order() {
        let positions: Vec<String> =
            (0..10).map(|i| fen(i + 1, if i % 3 == 0 { 'b' } else { 'w' })).collect();
        let pool = pool(4);
        let outcome = evaluate(&pool, &positions, &AtomicBool::new(false), 3).unwrap();
        pool.shutdown().unwrap();

        let mut out = Vec::new();
        write_labels(&mut out, &positions, &outcome.scores).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 10);
        for (i, line) in lines.iter().enumerate() {
            let n = i as i32 + 1;
            let expected = if i % 3 == 0 { -n } else { n };
            assert_eq!(*line, format!("{};{expected}", positions[i]));
        }
    }

    #[test]
    fn unusable_positions_are_scored_zero() {
        let positions = vec![fen(7, 'w'), "not a position".to_string(), fen(9, 'w')];
        let pool = pool(2);
        let outcome = evaluate(&pool, &positions, &AtomicBool::new(false), 100).unwrap();
        pool.shutdown().unwrap();
        assert_eq!(outcome.scores, vec![7, 0, 9]);
        assert_eq!(outcome.fallbacks, 1);
    }

    #[test]
    fn interrupted_batch_writes_nothing() {
        let positions = vec![fen(1, 'w'), fen(2, 'w')];
        let pool = pool(1);
        let err = evaluate(&pool, &positions, &AtomicBool::new(true), 1).unwrap_err();
        pool.shutdown().unwrap();
        assert!(err.to_string().contains("interrupted"));
    }

    #[test]
    fn persist_writes_gzip_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt.gz");
        let positions = vec![fen(1, 'w'), fen(2, 'b')];
        persist(&path, &positions, &[12, -40]).unwrap();

        let lines: Vec<String> = crate::common::io::open_input(&path)
            .unwrap()
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec![format!("{};12", positions[0]), format!("{};-40", positions[1])]);
    }
}
