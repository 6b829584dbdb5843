use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use super::driver::{Driver, DriverSettings, Exchange, SearchMode, white_score};
use super::error::DriverError;
use super::process::EngineLauncher;
use crate::common::sync::lock_or_recover;
use crate::types::{Answer, ItemResult, ItemStatus, WorkItem};

/// 1本のエンジンを専有するワーカー。
///
/// `submit` は複数スレッドから呼べるが、ロックを往復の最初から `bestmove`
/// まで保持するため、同じエンジンへのコマンドが混ざることはない。
/// `driver` が `None` のときはエンジンを失っており、次の `submit` で起動し直す。
pub struct Worker<L: EngineLauncher> {
    id: usize,
    launcher: Arc<L>,
    settings: Arc<DriverSettings>,
    driver: Mutex<Option<Driver<L::Io>>>,
}

impl<L: EngineLauncher> Worker<L> {
    /// エンジンを起動し、ハンドシェイクとオプション設定を済ませる。
    pub fn start(id: usize, launcher: Arc<L>, settings: Arc<DriverSettings>) -> Result<Self> {
        let driver = connect(id, &*launcher, &settings)?;
        log::debug!("worker {id}: engine ready");
        Ok(Self {
            id,
            launcher,
            settings,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// 1件を処理する。どんな失敗でも必ず結果を1つ返す。
    pub fn submit(&self, item: &WorkItem) -> ItemResult {
        let evaluate = self.settings.mode.is_evaluate();
        let mut slot = lock_or_recover(&self.driver);
        let mut driver = match slot.take() {
            Some(driver) => driver,
            None => match connect(self.id, &*self.launcher, &self.settings) {
                Ok(driver) => {
                    log::info!("worker {}: engine relaunched", self.id);
                    driver
                }
                Err(e) => {
                    log::warn!("worker {}: item {} skipped, relaunch failed: {e:#}", self.id, item.index);
                    return ItemResult::fallback(item.index, evaluate, ItemStatus::EngineLost(format!("{e:#}")));
                }
            },
        };

        match driver.search(item) {
            Ok(exchange) => {
                *slot = Some(driver);
                self.finish(item, exchange)
            }
            Err(e) if e.is_item_local() => {
                *slot = Some(driver);
                log::warn!("worker {}: item {} '{}': {e}", self.id, item.index, item.position);
                ItemResult::fallback(item.index, evaluate, ItemStatus::Fallback(e.to_string()))
            }
            Err(DriverError::Timeout(limit)) => {
                log::warn!(
                    "worker {}: item {} '{}' timed out after {limit:?}, restarting engine",
                    self.id,
                    item.index,
                    item.position
                );
                driver.kill();
                match connect(self.id, &*self.launcher, &self.settings) {
                    Ok(fresh) => *slot = Some(fresh),
                    Err(e) => log::warn!("worker {}: restart failed: {e:#}", self.id),
                }
                ItemResult::fallback(item.index, evaluate, ItemStatus::TimedOut)
            }
            Err(e) => {
                log::warn!("worker {}: item {} '{}': engine lost: {e}", self.id, item.index, item.position);
                driver.kill();
                ItemResult::fallback(item.index, evaluate, ItemStatus::EngineLost(e.to_string()))
            }
        }
    }

    fn finish(&self, item: &WorkItem, exchange: Exchange) -> ItemResult {
        let raw_answer = exchange.best_move.clone();
        let (value, status) = match self.settings.mode {
            SearchMode::BestMove => match &raw_answer {
                Some(mv) => (Answer::Move(mv.clone()), ItemStatus::Ok),
                None => (Answer::None, ItemStatus::Fallback("bestmove without a move".to_string())),
            },
            SearchMode::Evaluate { mate_score } => match white_score(&exchange, mate_score) {
                Ok(score) => (Answer::Score(score), ItemStatus::Ok),
                Err(e) => {
                    log::warn!("worker {}: item {} '{}': {e}", self.id, item.index, item.position);
                    (Answer::Score(0), ItemStatus::Fallback(e.to_string()))
                }
            },
        };
        ItemResult {
            index: item.index,
            raw_answer,
            value,
            diagnostic: exchange.lines,
            status,
        }
    }

    /// `quit` を送って終了を待つ。所有権を取るので1ワーカーにつき1回だけ呼ばれる。
    pub fn shutdown(self) -> Result<()> {
        let driver = self.driver.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        match driver {
            Some(driver) => {
                driver.shutdown().with_context(|| format!("worker {}: engine shutdown failed", self.id))
            }
            None => Ok(()),
        }
    }
}

fn connect<L: EngineLauncher>(
    id: usize,
    launcher: &L,
    settings: &DriverSettings,
) -> Result<Driver<L::Io>> {
    let io = launcher.launch(id).with_context(|| format!("worker {id}: failed to launch engine"))?;
    Driver::handshake(io, settings).with_context(|| format!("worker {id}: engine handshake failed"))
}
