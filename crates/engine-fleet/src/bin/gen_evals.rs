use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use engine_fleet::common::io::open_input;
use engine_fleet::engine::{
    DEFAULT_MATE_SCORE, Dispatch, DriverSettings, EngineConfig, ProcessLauncher, SearchLimit,
    SearchMode, WorkerPool,
};
use engine_fleet::jobs::evaluate::{
    DEFAULT_MAX_FENS, DEFAULT_PROGRESS_INTERVAL, Selection, default_output_path, evaluate,
    load_positions, persist,
};

/// `--depth` も `--movetime-ms` も無いときの探索深さ
const DEFAULT_DEPTH: u32 = 6;

#[derive(Parser, Debug)]
#[command(author, version, about = "Label positions with UCI engine evaluations (<fen>;<score>)")]
struct Cli {
    /// 局面ファイル（1行1局面、`.gz` 可、`-` で標準入力）
    #[arg(long)]
    fens: PathBuf,

    /// 出力先（未指定時: fens_evals_<start>_<end>.txt、`.gz` なら圧縮）
    #[arg(long)]
    output: Option<PathBuf>,

    /// エンジンバイナリパス
    #[arg(long)]
    engine_path: PathBuf,

    /// エンジン追加引数
    #[arg(long, num_args = 1..)]
    engine_args: Option<Vec<String>>,

    /// 並列に動かすエンジン数（未指定時: 論理CPU数）
    #[arg(long)]
    workers: Option<usize>,

    /// 探索深さ（`--movetime-ms` と併用可。どちらも無ければ 6）
    #[arg(long)]
    depth: Option<u32>,

    /// 1局面あたりの思考時間(ms)
    #[arg(long)]
    movetime_ms: Option<u64>,

    /// Threads option
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Hash (MiB)
    #[arg(long)]
    hash_mb: Option<u32>,

    /// 追加のUCIオプション (Name=Value)。複数指定可
    #[arg(long = "engine-option")]
    engine_options: Vec<String>,

    /// 詰みを表す評価値の絶対値
    #[arg(long, default_value_t = DEFAULT_MATE_SCORE)]
    mate_score: i32,

    /// 評価を始める局面番号（0始まり）
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// 評価する局面数（未指定時: 最後まで）
    #[arg(long)]
    limit: Option<usize>,

    /// 読み込む局面数の上限
    #[arg(long, default_value_t = DEFAULT_MAX_FENS)]
    max_fens: usize,

    /// 進捗ログの間隔（局面数）
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: usize,

    /// 1局面あたりの応答期限(ms)。超えたらエンジンを再起動し 0 点とする
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if cli.workers == Some(0) {
        bail!("--workers must be >= 1");
    }
    if cli.limit == Some(0) {
        bail!("--limit must be >= 1");
    }
    if cli.max_fens == 0 {
        bail!("--max-fens must be >= 1");
    }
    if cli.mate_score <= 0 {
        bail!("--mate-score must be positive");
    }
    if cli.timeout_ms == Some(0) {
        bail!("--timeout-ms must be >= 1");
    }
    if cli.engine_options.iter().any(|opt| opt.trim().is_empty()) {
        bail!("--engine-option must not be empty");
    }

    let reader = open_input(&cli.fens)
        .with_context(|| format!("failed to open {}", cli.fens.display()))?;
    let positions = load_positions(
        reader,
        Selection {
            start: cli.start,
            limit: cli.limit,
            max_fens: cli.max_fens,
        },
    )
    .with_context(|| format!("failed to load positions from {}", cli.fens.display()))?;
    let output = cli.output.clone().unwrap_or_else(|| default_output_path(cli.start, positions.len()));

    let limit = SearchLimit::new(cli.depth, cli.movetime_ms).unwrap_or(SearchLimit::depth(DEFAULT_DEPTH));
    let settings = DriverSettings {
        threads: cli.threads,
        hash_mb: cli.hash_mb,
        options: cli.engine_options.clone(),
        request_timeout: cli.timeout_ms.map(Duration::from_millis),
        ..DriverSettings::new(
            SearchMode::Evaluate {
                mate_score: cli.mate_score,
            },
            limit,
        )
    };
    let workers = cli
        .workers
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nShutting down gracefully...");
            shutdown_clone.store(true, Ordering::Relaxed);
        })
        .ok();
    }

    let launcher = ProcessLauncher::new(EngineConfig {
        path: cli.engine_path.clone(),
        args: cli.engine_args.clone().unwrap_or_default(),
    });
    log::info!(
        "gen_evals: {} positions, {workers} engines, {}, output {}",
        positions.len(),
        limit.go_command(),
        output.display()
    );
    let start_time = Instant::now();
    let pool = WorkerPool::start(workers, launcher, settings, Dispatch::FirstAvailable)
        .context("failed to start engine pool")?;
    let evaluated = evaluate(&pool, &positions, &shutdown, cli.progress_interval);
    let stopped = pool.shutdown();
    let outcome = evaluated?;

    persist(&output, &positions, &outcome.scores)?;
    log::info!(
        "gen_evals: {} positions in {:.1}s ({} fallback, {} timed out, {} engine lost)",
        outcome.scores.len(),
        start_time.elapsed().as_secs_f64(),
        outcome.fallbacks,
        outcome.timed_out,
        outcome.engine_lost
    );
    stopped
}
