//! プールを使うジョブ。
//!
//! どちらのジョブも結果を受け取るのは呼び出し元の1スレッドだけで、
//! 並べ直し用のバッファや集計はそのスレッドからしか触らない。

pub mod evaluate;
pub mod suite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Loading,
    Dispatching,
    Collecting,
    Persisting,
    Reporting,
    Done,
}

pub(crate) fn enter(job: &str, phase: JobPhase) {
    log::debug!("{job}: {phase:?}");
}
