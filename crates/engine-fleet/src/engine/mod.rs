//! UCI エンジンの起動と対話、ワーカーとプール。

pub mod driver;
pub mod error;
pub mod info;
pub mod pool;
pub mod process;
#[cfg(test)]
pub(crate) mod testing;
pub mod worker;

pub use driver::{
    DEFAULT_MATE_SCORE, Driver, DriverSettings, Exchange, HANDSHAKE_TIMEOUT, ProtocolState,
    SearchLimit, SearchMode,
};
pub use error::DriverError;
pub use pool::{Dispatch, WorkerPool};
pub use process::{EngineConfig, EngineIo, EngineLauncher, EngineProcess, ProcessLauncher};
pub use worker::Worker;
