//! Mix8 評価器
//!
//! 盤面イベントとアキュムレータ更新を分離するラッパー。着手/待ったは
//! いったん `move_cache` に積み、評価直前にまとめて適用する。直前の
//! エントリと打ち消し合うイベント（着手→即待った）は挿入時に相殺され、
//! アキュムレータには一切触れない。
//!
//! 黒視点・白視点のアキュムレータを別々に持ち、白視点にはイベントの色を
//! 反転して適用する。value 集計のスナップショット履歴も視点別に持つ。

use super::accumulator::{Mix8Accumulator, ValueSum};
use super::error::{EvalError, EvalResult};
use super::loader::{CompressedLoader, Mix8BinaryLoader, StandardHeaderLoader};
use super::registry::{mix8_weight_registry, WeightRegistry};
use super::weight::{Mix8Weight, ARCH_HASH};
use super::{EvalBoard, Evaluator, PolicyBuffer, ValueType};
use crate::types::{board_size_contained_in, Color, Pos, Rule};
use std::path::Path;
use std::sync::Arc;

/// 対応する盤サイズの範囲
///
/// 下限は形状テーブル初期化の前提（盤端5セルの壁エンコード）、
/// 上限は `Pos` の10bitパックから来る。
pub const MIN_BOARD_SIZE: usize = 6;
pub const MAX_BOARD_SIZE: usize = 22;

/// 遅延適用される盤面イベント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MoveCache {
    old_color: Color,
    new_color: Color,
    x: u8,
    y: u8,
}

impl MoveCache {
    /// 互いに打ち消し合うイベントか
    ///
    /// 同一座標で色遷移が逆向きのとき真。
    fn is_contrary(&self, other: &MoveCache) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.old_color == other.new_color
            && self.new_color == other.old_color
    }
}

/// Mix8 NNUE 評価器
pub struct Mix8Evaluator {
    board_size: usize,
    rule: Rule,
    registry: &'static WeightRegistry<Mix8Weight>,
    weights: [Arc<Mix8Weight>; Color::SIDE_NUM],
    accumulators: [Mix8Accumulator; Color::SIDE_NUM],
    move_caches: [Vec<MoveCache>; Color::SIDE_NUM],
    value_sum_histories: [Vec<ValueSum>; Color::SIDE_NUM],
}

impl Mix8Evaluator {
    /// プロセス共有レジストリ経由で評価器を構築する
    pub fn new(
        board_size: usize,
        rule: Rule,
        black_weight_path: &Path,
        white_weight_path: &Path,
    ) -> EvalResult<Self> {
        Self::with_registry(board_size, rule, black_weight_path, white_weight_path, mix8_weight_registry())
    }

    /// レジストリを指定して評価器を構築する
    pub fn with_registry(
        board_size: usize,
        rule: Rule,
        black_weight_path: &Path,
        white_weight_path: &Path,
        registry: &'static WeightRegistry<Mix8Weight>,
    ) -> EvalResult<Self> {
        if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&board_size) {
            return Err(EvalError::UnsupportedBoardSize(board_size));
        }

        let loader = CompressedLoader::new(
            StandardHeaderLoader::new(Mix8BinaryLoader).with_validator(Box::new(
                move |header| {
                    if header.arch_hash != ARCH_HASH {
                        return Err(EvalError::IncompatibleWeight(format!(
                            "arch hash mismatch: file=0x{:08x} build=0x{ARCH_HASH:08x}",
                            header.arch_hash
                        )));
                    }
                    if !rule.contained_in(header.rule_mask) {
                        return Err(EvalError::UnsupportedRule(rule));
                    }
                    if !board_size_contained_in(board_size, header.board_size_mask) {
                        return Err(EvalError::UnsupportedBoardSize(board_size));
                    }
                    Ok(())
                },
            )),
        );

        let black_weight = registry.load(black_weight_path, &loader)?;
        let white_weight = match registry.load(white_weight_path, &loader) {
            Ok(w) => w,
            Err(e) => {
                registry.unload(&black_weight);
                return Err(e);
            }
        };

        let n_cells = board_size * board_size;
        let mut evaluator = Mix8Evaluator {
            board_size,
            rule,
            registry,
            weights: [black_weight, white_weight],
            accumulators: [Mix8Accumulator::new(board_size), Mix8Accumulator::new(board_size)],
            move_caches: [Vec::with_capacity(n_cells), Vec::with_capacity(n_cells)],
            value_sum_histories: [Vec::with_capacity(n_cells), Vec::with_capacity(n_cells)],
        };
        evaluator.init_empty_board();
        Ok(evaluator)
    }

    /// 盤サイズ
    pub fn board_size(&self) -> usize {
        self.board_size
    }

    /// ルール
    pub fn rule(&self) -> Rule {
        self.rule
    }

    /// イベントを両視点のキャッシュへ積む
    fn add_cache(&mut self, side: Color, x: u8, y: u8, is_undo: bool) {
        debug_assert!(side.is_side());
        let (old_color, new_color) =
            if is_undo { (side, Color::Empty) } else { (Color::Empty, side) };
        let entry = MoveCache { old_color, new_color, x, y };

        for cache in self.move_caches.iter_mut() {
            match cache.last() {
                Some(last) if entry.is_contrary(last) => {
                    cache.pop();
                }
                _ => cache.push(entry),
            }
            debug_assert!(cache.len() < self.board_size * self.board_size);
        }
    }

    /// 指定視点のキャッシュをアキュムレータへ適用する
    fn drain_cache(&mut self, side: Color) {
        let side_idx = side.index();
        let Self { weights, accumulators, move_caches, value_sum_histories, .. } = self;
        let weight = &weights[side_idx];
        let acc = &mut accumulators[side_idx];
        let history = &mut value_sum_histories[side_idx];

        for mc in move_caches[side_idx].drain(..) {
            // 白視点は盤面を色反転して見る
            let (old_color, new_color) = if side == Color::White {
                (mc.old_color.opponent(), mc.new_color.opponent())
            } else {
                (mc.old_color, mc.new_color)
            };

            if old_color == Color::Empty {
                history.push(*acc.value_sum());
                acc.update_move(weight, new_color, mc.x as usize, mc.y as usize);
            } else {
                debug_assert!(!history.is_empty());
                if let Some(backup) = history.pop() {
                    acc.update_undo(weight, old_color, mc.x as usize, mc.y as usize, &backup);
                }
            }
        }
    }

    #[cfg(test)]
    fn accumulator(&self, side: Color) -> &Mix8Accumulator {
        &self.accumulators[side.index()]
    }
}

impl Evaluator for Mix8Evaluator {
    fn init_empty_board(&mut self) {
        for cache in self.move_caches.iter_mut() {
            cache.clear();
        }
        for history in self.value_sum_histories.iter_mut() {
            history.clear();
        }
        for (acc, weight) in self.accumulators.iter_mut().zip(&self.weights) {
            acc.clear(weight);
        }
    }

    fn before_move(&mut self, board: &dyn EvalBoard, pos: Pos) {
        self.add_cache(board.side_to_move(), pos.x() as u8, pos.y() as u8, false);
    }

    fn after_undo(&mut self, board: &dyn EvalBoard, pos: Pos) {
        self.add_cache(board.side_to_move(), pos.x() as u8, pos.y() as u8, true);
    }

    fn evaluate_value(&mut self, board: &dyn EvalBoard) -> ValueType {
        let side = board.side_to_move();
        self.drain_cache(side);

        let (win, loss, draw) =
            self.accumulators[side.index()].evaluate_value(&self.weights[side.index()]);
        ValueType::from_wld_logits(win, loss, draw)
    }

    fn evaluate_policy(&mut self, board: &dyn EvalBoard, policy: &mut PolicyBuffer) {
        let side = board.side_to_move();
        self.drain_cache(side);

        self.accumulators[side.index()].evaluate_policy(&self.weights[side.index()], policy);
    }
}

impl Drop for Mix8Evaluator {
    fn drop(&mut self) {
        for weight in &self.weights {
            self.registry.unload(weight);
        }
    }
}
