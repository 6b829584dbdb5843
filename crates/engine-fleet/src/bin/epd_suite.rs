use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use engine_fleet::common::io::open_input;
use engine_fleet::engine::{
    Dispatch, DriverSettings, EngineConfig, ProcessLauncher, SearchLimit, SearchMode, WorkerPool,
};
use engine_fleet::jobs::suite::{ReportSettings, SuiteReport, load_suite, run_suite};

/// `--depth` も `--movetime-ms` も無いときの思考時間(ms)
const DEFAULT_MOVETIME_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(author, version, about = "Check a UCI engine's best moves against an EPD test suite")]
struct Cli {
    /// エンジンバイナリパス
    #[arg(long)]
    engine: PathBuf,

    /// エンジン追加引数
    #[arg(long, num_args = 1..)]
    engine_args: Option<Vec<String>>,

    /// テストスイート（`<fen> bm <move>...; id "<label>";`、`.gz` 可、`-` で標準入力）
    #[arg(long)]
    suite: PathBuf,

    /// 1問あたりの思考時間(ms)（`--depth` も無ければ 1000）
    #[arg(long)]
    movetime_ms: Option<u64>,

    /// 探索深さ
    #[arg(long)]
    depth: Option<u32>,

    /// 同時に動かすエンジン数
    #[arg(long, default_value_t = 1)]
    pool_size: usize,

    /// Threads option
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Hash (MiB)
    #[arg(long)]
    hash_mb: Option<u32>,

    /// 追加のUCIオプション (Name=Value)。複数指定可
    #[arg(long = "engine-option")]
    engine_options: Vec<String>,

    /// 1問あたりの応答期限(ms)。超えたらエンジンを再起動し不正解とする
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// 集計を JSON で書き出す先
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if cli.pool_size == 0 {
        bail!("--pool-size must be >= 1");
    }
    if cli.timeout_ms == Some(0) {
        bail!("--timeout-ms must be >= 1");
    }
    if cli.engine_options.iter().any(|opt| opt.trim().is_empty()) {
        bail!("--engine-option must not be empty");
    }

    let reader =
        open_input(&cli.suite).with_context(|| format!("failed to open {}", cli.suite.display()))?;
    let items = load_suite(reader)
        .with_context(|| format!("failed to load test suite {}", cli.suite.display()))?;

    let movetime_ms = match (cli.depth, cli.movetime_ms) {
        (None, None) => Some(DEFAULT_MOVETIME_MS),
        (_, ms) => ms,
    };
    let limit = SearchLimit::new(cli.depth, movetime_ms)
        .unwrap_or(SearchLimit::movetime(DEFAULT_MOVETIME_MS));
    let settings = DriverSettings {
        threads: cli.threads,
        hash_mb: cli.hash_mb,
        options: cli.engine_options.clone(),
        request_timeout: cli.timeout_ms.map(Duration::from_millis),
        ..DriverSettings::new(SearchMode::BestMove, limit)
    };

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
        path: cli.engine.clone(),
        args: cli.engine_args.clone().unwrap_or_default(),
    });
    log::info!(
        "epd_suite: {} positions, {} engines, {}",
        items.len(),
        cli.pool_size,
        limit.go_command()
    );
    let pool = WorkerPool::start(cli.pool_size, launcher, settings, Dispatch::RoundRobin)
        .context("failed to start engine pool")?;
    let ran = run_suite(&pool, &items, &shutdown);
    let stopped = pool.shutdown();
    let (aggregate, elapsed) = ran?;

    let report = SuiteReport::new(
        cli.engine.display().to_string(),
        ReportSettings {
            depth: cli.depth,
            movetime_ms,
            pool_size: cli.pool_size,
            threads: cli.threads,
            hash_mb: cli.hash_mb,
            timeout_ms: cli.timeout_ms,
        },
        aggregate,
        elapsed,
    );
    report.publish(cli.json.as_deref())?;
    stopped
}
