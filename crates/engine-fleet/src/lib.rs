//! UCI エンジンプロセス群の監督と、それを使った 2 種類のジョブ。
//!
//! - `gen_evals`: 大量の局面を評価し `<fen>;<score>` 形式の教師ラベルを生成する
//! - `epd_suite`: EPD テストスイート（`bm` 付き局面）でエンジンの解答を検証する
//!
//! 層構成は葉から順に `engine::process` (子プロセス) → `engine::driver`
//! (1リクエスト分のプロトコル往復) → `engine::worker` (排他付きの1エンジン)
//! → `engine::pool` (N ワーカーへの分配) → `jobs` (並べ直し / 集計)。

pub mod common;
pub mod engine;
pub mod jobs;
pub mod position;
pub mod types;

pub use types::{Answer, ItemResult, ItemStatus, WorkItem};
