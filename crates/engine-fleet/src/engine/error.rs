use std::io;
use std::time::Duration;

use thiserror::Error;

use super::driver::ProtocolState;
use crate::position::PositionError;

/// ドライバ層のエラー。
///
/// `InvalidPosition` / `Malformed` は1件分の失敗で、エンジンはそのまま使い続けられる。
/// それ以外はプロセスとの会話が壊れているため、ワーカーがエンジンを作り直す。
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid position '{position}': {source}")]
    InvalidPosition {
        position: String,
        #[source]
        source: PositionError,
    },

    #[error("malformed engine output: {0}")]
    Malformed(String),

    #[error("engine output closed")]
    Closed,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("engine conversation out of sync (state {0:?})")]
    OutOfSync(ProtocolState),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DriverError {
    /// エンジンを再利用できる（1件分だけの）失敗か。
    pub fn is_item_local(&self) -> bool {
        matches!(self, DriverError::InvalidPosition { .. } | DriverError::Malformed(_))
    }
}
