//! 置換表本体
//!
//! - `Bucket`: キャッシュライン1本に収まるエントリ4本
//! - `HashTable`: probe / store / resize / clear / dump / load
//!
//! probe / store は共有参照で並行に呼べる。エントリは 8バイト語 ×2 の
//! アトミックストアで書かれ、torn write は XOR チェックサムで検出される。
//! resize / clear は `&mut self` を要求するため、探索ワーカーが止まって
//! いることは借用規則が保証する。

use super::alloc::{AllocKind, Allocation};
use super::entry::{TTData, TTEntry};
use super::{ENTRIES_PER_BUCKET, HASH_DUMP_MAGIC};
use crate::types::{Bound, HashKey, Pos, Value, DEPTH_LOWER_BOUND};
use log::{error, warn};
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// エントリのアトミック格納域（8バイト語 ×2）
#[repr(C)]
struct AtomicEntry {
    lo: AtomicU64,
    hi: AtomicU64,
}

impl AtomicEntry {
    #[inline]
    fn load(&self) -> TTEntry {
        TTEntry::from_words(self.lo.load(Ordering::Relaxed), self.hi.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, entry: TTEntry) {
        let (lo, hi) = entry.to_words();
        self.lo.store(lo, Ordering::Relaxed);
        self.hi.store(hi, Ordering::Relaxed);
    }
}

/// キャッシュライン1本ぶんのバケット
#[repr(C, align(64))]
struct Bucket {
    entries: [AtomicEntry; ENTRIES_PER_BUCKET],
}

// バケットは64バイト（キャッシュラインサイズ）であることを保証
const _: () = assert!(std::mem::size_of::<Bucket>() == 64);

/// 確保済みメモリ上のバケット配列
struct BucketArray {
    alloc: Option<Allocation>,
    len: usize,
}

impl BucketArray {
    const fn empty() -> Self {
        BucketArray { alloc: None, len: 0 }
    }

    /// 確保してゼロクリアする。確保失敗時は `None`。
    fn try_new(len: usize) -> Option<Self> {
        let bytes = len * std::mem::size_of::<Bucket>();
        let alloc = Allocation::try_allocate(bytes, std::mem::align_of::<Bucket>())?;
        unsafe {
            std::ptr::write_bytes(alloc.ptr().as_ptr(), 0, bytes);
        }
        Some(BucketArray { alloc: Some(alloc), len })
    }

    fn uses_large_pages(&self) -> bool {
        self.alloc.as_ref().is_some_and(|a| a.kind() == AllocKind::LargePages)
    }
}

impl Deref for BucketArray {
    type Target = [Bucket];

    fn deref(&self) -> &[Bucket] {
        match &self.alloc {
            Some(alloc) => unsafe {
                std::slice::from_raw_parts(alloc.ptr().as_ptr() as *const Bucket, self.len)
            },
            None => &[],
        }
    }
}

impl DerefMut for BucketArray {
    fn deref_mut(&mut self) -> &mut [Bucket] {
        match &self.alloc {
            Some(alloc) => unsafe {
                std::slice::from_raw_parts_mut(alloc.ptr().as_ptr() as *mut Bucket, self.len)
            },
            None => &mut [],
        }
    }
}

/// 置換表
pub struct HashTable {
    table: BucketArray,
    num_buckets: usize,
    generation: AtomicU8,
}

impl HashTable {
    /// 指定サイズ（KB単位）の置換表を作る
    pub fn new(hash_size_kb: usize) -> Self {
        let mut tt = HashTable {
            table: BucketArray::empty(),
            num_buckets: 0,
            generation: AtomicU8::new(0),
        };
        tt.resize(hash_size_kb);
        tt
    }

    /// サイズを変更する（KB単位）
    ///
    /// 確保に失敗した場合はサイズを半分にしてリトライし、確保できた
    /// サイズを警告で報告する。1バケットすら確保できなければプロセスを
    /// 終了する。
    pub fn resize(&mut self, hash_size_kb: usize) {
        let requested = (hash_size_kb * 1024 / std::mem::size_of::<Bucket>()).max(1);
        if requested == self.num_buckets {
            return;
        }

        // 旧テーブルを先に解放してから確保する
        self.table = BucketArray::empty();
        self.num_buckets = 0;

        let mut try_buckets = requested;
        let table = loop {
            if try_buckets == 0 {
                error!("failed to allocate a single transposition table bucket, exiting");
                std::process::exit(1);
            }
            match BucketArray::try_new(try_buckets) {
                Some(t) => break t,
                None => try_buckets /= 2,
            }
        };

        if try_buckets != requested {
            warn!(
                "failed to allocate {hash_size_kb} KB for transposition table, allocated {} KB",
                try_buckets * std::mem::size_of::<Bucket>() / 1024
            );
        }

        self.table = table;
        self.num_buckets = try_buckets;
        self.clear();
    }

    /// 全エントリをゼロクリアし、世代を0に戻す
    ///
    /// バケット列をスレッドへ分割して並列にクリアする。
    pub fn clear(&mut self) {
        self.generation.store(0, Ordering::Relaxed);

        let len = self.table.len();
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        if threads <= 1 || len < threads * 1024 {
            let ptr = self.table.as_mut_ptr();
            unsafe {
                std::ptr::write_bytes(ptr, 0, len);
            }
            return;
        }

        let chunk = len.div_ceil(threads);
        let ptr = self.table.as_mut_ptr();

        std::thread::scope(|scope| {
            for i in 0..threads {
                let start = i * chunk;
                if start >= len {
                    break;
                }
                let count = (start + chunk).min(len) - start;
                let ptr_addr = unsafe { ptr.add(start) } as usize;

                scope.spawn(move || unsafe {
                    // 各スレッドが自分のスラブをゼロクリアする（first-touch）
                    std::ptr::write_bytes(ptr_addr as *mut Bucket, 0, count);
                });
            }
        });
    }

    /// 新しい探索の開始（世代を進める）
    pub fn new_search(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// 現在の世代
    #[inline]
    pub fn generation(&self) -> u8 {
        self.generation.load(Ordering::Relaxed)
    }

    /// バケット数
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Large Pages 上に確保されているか
    pub fn uses_large_pages(&self) -> bool {
        self.table.uses_large_pages()
    }

    /// キーからバケットを選ぶ
    ///
    /// 上位ビットを使う widening multiply。バケット数が2冪である必要がない。
    #[inline]
    fn bucket_index(&self, key: HashKey) -> usize {
        ((key as u128 * self.num_buckets as u128) >> 64) as usize
    }

    /// 指定キーのバケットをプリフェッチする
    #[inline]
    pub fn prefetch(&self, key: HashKey) {
        let bucket = &self.table[self.bucket_index(key)];

        #[cfg(target_arch = "x86_64")]
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            _mm_prefetch::<_MM_HINT_T0>(bucket as *const Bucket as *const i8);
        }

        #[cfg(not(target_arch = "x86_64"))]
        let _ = bucket;
    }

    /// 置換表を検索する
    ///
    /// ヒット時はエントリの世代を現世代へ引き上げる（格納キーも
    /// 整合するよう詰め直す）。`ply` は詰み距離の復元に使う。
    pub fn probe(&self, key: HashKey, ply: i32) -> Option<TTData> {
        let bucket = &self.table[self.bucket_index(key)];
        let key32 = key as u32;

        for slot in &bucket.entries {
            // 共有メモリからローカルへコピーしてから検査する
            let entry = slot.load();
            if entry.key() == key32 {
                let generation = self.generation();
                if entry.generation8 != generation {
                    // 世代を引き上げ、格納キーを新しい畳み込みに合わせ直す
                    let mut refreshed = entry;
                    refreshed.generation8 = generation;
                    refreshed.key32 = key32 ^ refreshed.nonkey_fold();
                    slot.store(refreshed);
                }
                return Some(entry.decode(ply));
            }
        }

        None
    }

    /// 探索レコードを格納する
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        key: HashKey,
        value: Value,
        eval: Value,
        is_pv: bool,
        bound: Bound,
        mut mv: Pos,
        depth: i32,
        ply: i32,
    ) {
        debug_assert!(value.is_valid());
        debug_assert!(depth > DEPTH_LOWER_BOUND && depth < DEPTH_LOWER_BOUND + 256);

        let bucket = &self.table[self.bucket_index(key)];
        let key32 = key as u32;
        let generation = self.generation();

        // 一致エントリ、なければ最も価値の低いエントリを選ぶ
        let mut replace_slot = 0;
        let mut replace_entry = bucket.entries[0].load();
        for (i, slot) in bucket.entries.iter().enumerate() {
            let entry = slot.load();
            if entry.key() == key32 {
                replace_slot = i;
                replace_entry = entry;
                break;
            }
            if i > 0 && entry.replace_rank(generation) < replace_entry.replace_rank(generation) {
                replace_slot = i;
                replace_entry = entry;
            }
        }

        let old_key32 = replace_entry.key();

        // 同一局面では、確定値でない浅い探索結果で深い記録を潰さない
        if bound != Bound::Exact
            && key32 == old_key32
            && depth + 2 < replace_entry.depth()
        {
            return;
        }

        // 今回最善手がなければ前回の最善手を引き継ぐ
        if mv == Pos::NONE && key32 == old_key32 {
            mv = replace_entry.stored_move();
        }

        let entry = TTEntry::new(
            key32,
            value.to_tt(ply),
            eval,
            is_pv,
            bound,
            mv,
            depth,
            generation,
        );
        bucket.entries[replace_slot].store(entry);
    }

    /// 使用率をパーミルで返す
    ///
    /// 先頭の一部バケットをサンプルし、現世代の使用中エントリを数える。
    pub fn hash_usage(&self) -> i32 {
        let generation = self.generation();
        let sample = (self.num_buckets >> 10).max(1).min(self.num_buckets);

        let mut count = 0usize;
        for bucket in self.table.iter().take(sample) {
            for slot in &bucket.entries {
                let entry = slot.load();
                if entry.is_occupied() && entry.generation8 == generation {
                    count += 1;
                }
            }
        }

        (count * 1000 / (ENTRIES_PER_BUCKET * sample)) as i32
    }

    /// テーブル全体をLZ4フレームで圧縮して書き出す
    pub fn dump(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut encoder = lz4_flex::frame::FrameEncoder::new(out);

        encoder.write_all(&HASH_DUMP_MAGIC)?;
        encoder.write_all(&(self.num_buckets as u64).to_le_bytes())?;
        encoder.write_all(&[self.generation()])?;

        for bucket in self.table.iter() {
            for slot in &bucket.entries {
                let (lo, hi) = slot.load().to_words();
                encoder.write_all(&lo.to_le_bytes())?;
                encoder.write_all(&hi.to_le_bytes())?;
            }
        }

        encoder.finish().map_err(std::io::Error::other)?;
        Ok(())
    }

    /// ダンプからテーブルを復元する
    ///
    /// マジック不一致・確保失敗・読み残しがあれば `false` を返し、
    /// 既存テーブルは変更しない。
    pub fn load(&mut self, input: &mut dyn Read) -> bool {
        let mut decoder = lz4_flex::frame::FrameDecoder::new(input);

        let mut magic = [0u8; 32];
        if decoder.read_exact(&mut magic).is_err() || magic != HASH_DUMP_MAGIC {
            return false;
        }

        let mut buf8 = [0u8; 8];
        if decoder.read_exact(&mut buf8).is_err() {
            return false;
        }
        let num_buckets = u64::from_le_bytes(buf8) as usize;
        if num_buckets == 0 {
            return false;
        }

        let mut gen_buf = [0u8; 1];
        if decoder.read_exact(&mut gen_buf).is_err() {
            return false;
        }

        let mut table = match BucketArray::try_new(num_buckets) {
            Some(t) => t,
            None => return false,
        };

        for bucket in table.iter_mut() {
            for slot in &mut bucket.entries {
                let mut words = [0u8; 16];
                if decoder.read_exact(&mut words).is_err() {
                    return false;
                }
                let mut lo = [0u8; 8];
                let mut hi = [0u8; 8];
                lo.copy_from_slice(&words[..8]);
                hi.copy_from_slice(&words[8..]);
                slot.store(TTEntry::from_words(u64::from_le_bytes(lo), u64::from_le_bytes(hi)));
            }
        }

        // ダンプ末尾の後に余りがあれば不正
        let mut probe = [0u8; 1];
        match decoder.read(&mut probe) {
            Ok(0) => {}
            _ => return false,
        }

        self.table = table;
        self.num_buckets = num_buckets;
        self.generation.store(gen_buf[0], Ordering::Relaxed);
        true
    }
}
