use std::sync::{Mutex, MutexGuard};

/// poison されたロックでも中身を取り出して処理を続ける。
///
/// ガード対象はエンジンハンドルそのもので、パニックしたスレッドが
/// 途中状態を残していてもドライバ側が次のリクエスト開始時に検出する。
pub fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::error!("Mutex was poisoned, attempting recovery");
            poisoned.into_inner()
        }
    }
}
