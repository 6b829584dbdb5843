//! 固定数のワーカーへの分配。
//!
//! crossbeam-channel のランデブーチャネルで仕事を渡し、結果は呼び出し元の
//! スレッドが1本で受け取る。結果の到着順は保証しない。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Result, anyhow, bail};
use crossbeam_channel as chan;

use super::driver::DriverSettings;
use super::process::EngineLauncher;
use super::worker::Worker;
use crate::types::{ItemResult, WorkItem};

/// 仕事をどのワーカーに渡すか。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// プールスレッドごとに専用のワーカーを持ち、空いたスレッドが次を取る
    FirstAvailable,
    /// `index % size` 番のワーカーへ固定で割り当てる
    RoundRobin,
}

pub struct WorkerPool<L: EngineLauncher> {
    workers: Vec<Worker<L>>,
    dispatch: Dispatch,
}

impl<L: EngineLauncher> WorkerPool<L> {
    /// `size` 本のエンジンを並列に起動する。
    ///
    /// 1本でも起動に失敗したら、起動済みのワーカーを全て停止してからエラーを返す。
    pub fn start(
        size: usize,
        launcher: L,
        settings: DriverSettings,
        dispatch: Dispatch,
    ) -> Result<Self> {
        if size == 0 {
            bail!("pool size must be at least 1");
        }
        let launcher = Arc::new(launcher);
        let settings = Arc::new(settings);
        let started: Vec<Result<Worker<L>>> = thread::scope(|s| {
            let handles: Vec<_> = (0..size)
                .map(|id| {
                    let launcher = launcher.clone();
                    let settings = settings.clone();
                    s.spawn(move || Worker::start(id, launcher, settings))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("worker start panicked"))))
                .collect()
        });

        let mut workers = Vec::with_capacity(size);
        let mut first_err = None;
        for res in started {
            match res {
                Ok(worker) => workers.push(worker),
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(e) => log::warn!("{e:#}"),
            }
        }
        if let Some(err) = first_err {
            for worker in workers {
                if let Err(e) = worker.shutdown() {
                    log::warn!("{e:#}");
                }
            }
            return Err(err);
        }
        log::info!("pool: {size} engines ready ({dispatch:?})");
        Ok(Self { workers, dispatch })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// 全件を流し、結果が届くたびに `on_result` を呼ぶ。
    ///
    /// `shutdown` が立つと新規の投入をやめ、処理中の分だけ受け取って戻る。
    /// 戻り値は受け取った結果の件数で、中断が無ければ `items.len()` と一致する。
    pub fn run<F>(&self, items: Vec<WorkItem>, shutdown: &AtomicBool, mut on_result: F) -> Result<usize>
    where
        F: FnMut(ItemResult),
    {
        let workers = &self.workers;
        let dispatch = self.dispatch;
        thread::scope(|s| {
            let (item_tx, item_rx) = chan::bounded::<WorkItem>(0);
            let (result_tx, result_rx) = chan::bounded::<ItemResult>(0);
            for slot in 0..workers.len() {
                let rx = item_rx.clone();
                let tx = result_tx.clone();
                s.spawn(move || {
                    for item in rx.iter() {
                        let worker = match dispatch {
                            Dispatch::FirstAvailable => &workers[slot],
                            Dispatch::RoundRobin => &workers[item.index % workers.len()],
                        };
                        if tx.send(worker.submit(&item)).is_err() {
                            break;
                        }
                    }
                });
            }
            // 呼び出し側スレッドは結果の送信側を持たない
            drop(item_rx);
            drop(result_tx);

            let mut pending = items.into_iter();
            let mut next_item = pending.next();
            let mut feeder = Some(item_tx);
            let mut dispatched = 0usize;
            let mut delivered = 0usize;
            loop {
                if next_item.is_some() && shutdown.load(Ordering::Relaxed) {
                    log::warn!("pool: interrupted, {} items left undispatched", 1 + pending.len());
                    next_item = None;
                }
                if next_item.is_none() {
                    // 送信側を閉じると、各スレッドは手持ちを終えてから抜ける
                    feeder = None;
                }
                let received = match (&feeder, &next_item) {
                    (Some(tx), Some(item)) => {
                        chan::select! {
                            send(tx, item.clone()) -> res => {
                                if res.is_err() {
                                    bail!("pool: all worker threads exited");
                                }
                                dispatched += 1;
                                next_item = pending.next();
                                None
                            }
                            recv(result_rx) -> msg => msg.ok(),
                        }
                    }
                    _ => match result_rx.recv() {
                        Ok(result) => Some(result),
                        Err(_) => break,
                    },
                };
                if let Some(result) = received {
                    delivered += 1;
                    on_result(result);
                }
            }
            if delivered != dispatched {
                bail!("pool: {dispatched} items dispatched but {delivered} results received");
            }
            Ok(delivered)
        })
    }

    /// 全ワーカーに quit を送る。途中で失敗しても残りのワーカーも必ず停止させる。
    pub fn shutdown(self) -> Result<()> {
        let mut first_err = None;
        for worker in self.workers {
            let id = worker.id();
            match worker.shutdown() {
                Ok(()) => log::debug!("worker {id}: stopped"),
                Err(e) => {
                    log::warn!("{e:#}");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
