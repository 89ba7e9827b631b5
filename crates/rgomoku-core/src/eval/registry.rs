//! 重みレジストリ
//!
//! プロセス全体で重みを共有するためのプール。ほとんどの評価器は同じ
//! 重みファイルを使うため、パスで同定して1インスタンスを参照カウント
//! 付きで使い回す。ロード済み重みは不変なので並行読み出しは安全。

use super::error::{EvalError, EvalResult};
use super::loader::WeightLoader;
use super::weight::Mix8Weight;
use log::debug;
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct PoolEntry<W> {
    path: PathBuf,
    weight: Arc<W>,
    ref_count: usize,
}

/// ロード済み重みのプール
///
/// `load` / `unload` は単一のミューテックスで直列化される。
pub struct WeightRegistry<W> {
    pool: Mutex<Vec<PoolEntry<W>>>,
}

impl<W> WeightRegistry<W> {
    /// 空のレジストリ
    pub const fn new() -> Self {
        WeightRegistry { pool: Mutex::new(Vec::new()) }
    }

    /// ファイルから重みをロードする
    ///
    /// 同じパスでロード済みならその重みを使い回す。ロード失敗時は
    /// プールに何も残さない。
    pub fn load(
        &self,
        path: &Path,
        loader: &dyn WeightLoader<Weight = W>,
    ) -> EvalResult<Arc<W>> {
        let mut pool = self.pool.lock();

        if let Some(entry) = pool.iter_mut().find(|e| e.path == path) {
            entry.ref_count += 1;
            debug!("weight registry: reuse {} (refs={})", path.display(), entry.ref_count);
            return Ok(entry.weight.clone());
        }

        let file = File::open(path)
            .map_err(|e| EvalError::Io(format!("{}: {e}", path.display())))?;
        let mut reader = BufReader::new(file);
        let weight: Arc<W> = Arc::from(loader.load(&mut reader)?);

        debug!("weight registry: loaded {}", path.display());
        pool.push(PoolEntry { path: path.to_path_buf(), weight: weight.clone(), ref_count: 1 });
        Ok(weight)
    }

    /// ロード済み重みを解放する
    ///
    /// 参照カウントが0になった時点でプールから除去され、最後の `Arc`
    /// が落ちたところで実体も破棄される。
    pub fn unload(&self, weight: &Arc<W>) {
        let mut pool = self.pool.lock();
        if let Some(idx) = pool.iter().position(|e| Arc::ptr_eq(&e.weight, weight)) {
            pool[idx].ref_count -= 1;
            if pool[idx].ref_count == 0 {
                let entry = pool.swap_remove(idx);
                debug!("weight registry: unloaded {}", entry.path.display());
            }
        }
    }

    /// プール中のエントリ数
    pub fn pool_len(&self) -> usize {
        self.pool.lock().len()
    }
}

impl<W> Default for WeightRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Mix8 重みのプロセス共有レジストリ
static MIX8_REGISTRY: WeightRegistry<Mix8Weight> = WeightRegistry::new();

/// Mix8 重みレジストリへの参照を返す
pub fn mix8_weight_registry() -> &'static WeightRegistry<Mix8Weight> {
    &MIX8_REGISTRY
}
