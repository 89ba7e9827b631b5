//! 評価器モジュール
//!
//! 盤面イベント（着手/待った）のフックと、value / policy 評価の
//! インターフェースを定義する。実装は Mix8 NNUE（`accumulator` /
//! `evaluator`）のみだが、評価器は差し替え可能な能力セットとして
//! トレイトで切ってある。
//!
//! - `EvalBoard`: 評価器が参照する盤面フック
//! - `Evaluator`: 評価器の能力セット（既定の `sync_with_board` 付き）
//! - `ValueType`: 勝敗分布付きの評価値コンテナ
//! - `PolicyBuffer`: セル別 policy 値と計算フラグ

pub mod accumulator;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod registry;
pub mod simd;
pub mod weight;

pub use error::{EvalError, EvalResult};
pub use evaluator::Mix8Evaluator;
pub use registry::{mix8_weight_registry, WeightRegistry};

use crate::types::{Color, Pos, Value};

/// 評価器が参照する盤面のフック
///
/// 盤面表現そのものはこのクレートの範囲外。評価器が必要とする
/// 読み出しだけをトレイトに切り出してある。
pub trait EvalBoard {
    /// 盤の一辺のサイズ
    fn board_size(&self) -> usize;
    /// 現在の手番
    fn side_to_move(&self) -> Color;
    /// 現在の手数（盤上の石数）
    fn ply(&self) -> usize;
    /// 指定座標の状態
    fn stone_at(&self, pos: Pos) -> Color;
    /// i 手目の着手（手番と座標）
    fn history_move(&self, i: usize) -> (Color, Pos);
}

/// `sync_with_board` の再生用ビュー
///
/// 過去の時点での手番を返す以外は元の盤面へ委譲する。
struct ReplayBoard<'a> {
    inner: &'a dyn EvalBoard,
    ply: usize,
}

impl EvalBoard for ReplayBoard<'_> {
    fn board_size(&self) -> usize {
        self.inner.board_size()
    }

    fn side_to_move(&self) -> Color {
        self.inner.history_move(self.ply).0
    }

    fn ply(&self) -> usize {
        self.ply
    }

    fn stone_at(&self, pos: Pos) -> Color {
        self.inner.stone_at(pos)
    }

    fn history_move(&self, i: usize) -> (Color, Pos) {
        self.inner.history_move(i)
    }
}

/// 評価器の能力セット
///
/// 実装は `init_empty_board` と評価2種が必須。盤面フックは必要なものだけ
/// オーバーライドすればよい。`sync_with_board` は既定で「空盤に戻して
/// 履歴を再生する」実装を持つ。
pub trait Evaluator {
    /// 空盤状態へリセットする
    fn init_empty_board(&mut self);

    /// `board.do_move()` の直前に呼ばれるフック
    fn before_move(&mut self, board: &dyn EvalBoard, pos: Pos) {
        let _ = (board, pos);
    }

    /// `board.do_move()` の直後に呼ばれるフック
    fn after_move(&mut self, board: &dyn EvalBoard, pos: Pos) {
        let _ = (board, pos);
    }

    /// `board.undo_move()` の直前に呼ばれるフック
    fn before_undo(&mut self, board: &dyn EvalBoard, pos: Pos) {
        let _ = (board, pos);
    }

    /// `board.undo_move()` の直後に呼ばれるフック
    fn after_undo(&mut self, board: &dyn EvalBoard, pos: Pos) {
        let _ = (board, pos);
    }

    /// 評価器の状態を盤面に同期する
    fn sync_with_board(&mut self, board: &dyn EvalBoard) {
        self.init_empty_board();
        for i in 0..board.ply() {
            let (_, pos) = board.history_move(i);
            let view = ReplayBoard { inner: board, ply: i };
            self.before_move(&view, pos);
            self.after_move(&view, pos);
        }
    }

    /// 手番側から見た value を評価する
    fn evaluate_value(&mut self, board: &dyn EvalBoard) -> ValueType;

    /// 手番側から見た policy を評価する
    fn evaluate_policy(&mut self, board: &dyn EvalBoard, policy: &mut PolicyBuffer);
}

/// 勝敗分布付きの評価値
///
/// 勝率・敗率・引き分け率はロジットから softmax で正規化して保持する。
/// 分布を持たない評価値（古典評価など）は `from_value` で作る。
#[derive(Debug, Clone, Copy)]
pub struct ValueType {
    value: Value,
    rates: Option<(f32, f32, f32)>,
}

impl ValueType {
    /// 勝敗分布と整数値の変換スケール
    const VALUE_SCALE: f32 = 600.0;

    /// 分布なしの評価値
    pub fn from_value(value: Value) -> Self {
        ValueType { value, rates: None }
    }

    /// (win, loss, draw) ロジットから生成する
    ///
    /// softmax 後の勝敗率差を整数評価値へ射影する。
    pub fn from_wld_logits(win: f32, loss: f32, draw: f32) -> Self {
        let max = win.max(loss).max(draw);
        let (ew, el, ed) = ((win - max).exp(), (loss - max).exp(), (draw - max).exp());
        let sum = ew + el + ed;
        let (w, l, d) = (ew / sum, el / sum, ed / sum);

        let raw = ((w - l) * Self::VALUE_SCALE).round() as i32;
        let value = Value::new(raw.clamp(-Value::EVAL_MAX.raw(), Value::EVAL_MAX.raw()));
        ValueType { value, rates: Some((w, l, d)) }
    }

    /// 整数評価値
    #[inline]
    pub fn value(&self) -> Value {
        debug_assert!(self.value != Value::NONE);
        self.value
    }

    /// 勝敗分布を持つか
    #[inline]
    pub fn has_rates(&self) -> bool {
        self.rates.is_some()
    }

    /// 勝率（分布なしなら0）
    #[inline]
    pub fn win(&self) -> f32 {
        self.rates.map_or(0.0, |(w, _, _)| w)
    }

    /// 敗率（分布なしなら0）
    #[inline]
    pub fn loss(&self) -> f32 {
        self.rates.map_or(0.0, |(_, l, _)| l)
    }

    /// 引き分け率（分布なしなら0）
    #[inline]
    pub fn draw(&self) -> f32 {
        self.rates.map_or(0.0, |(_, _, d)| d)
    }

    /// 勝率 - 敗率
    #[inline]
    pub fn winloss_rate(&self) -> f32 {
        self.win() - self.loss()
    }
}

/// セル別 policy 値のバッファ
///
/// 計算フラグが立ったセルだけが評価・softmax の対象になる。
pub struct PolicyBuffer {
    board_size: usize,
    policy: Vec<f32>,
    compute_flag: Vec<bool>,
    score_bias: i32,
}

impl PolicyBuffer {
    /// policy 値から整数スコアへの変換スケール
    pub const SCORE_SCALE: f32 = 32.0;
    /// 整数スコアの基準バイアス
    pub const SCORE_BIAS: i32 = 300;

    /// 指定盤サイズのバッファ（全フラグOFF）
    pub fn new(board_size: usize) -> Self {
        let n = board_size * board_size;
        PolicyBuffer {
            board_size,
            policy: vec![0.0; n],
            compute_flag: vec![false; n],
            score_bias: Self::SCORE_BIAS,
        }
    }

    #[inline]
    fn index(&self, pos: Pos) -> usize {
        debug_assert!(pos.x() < self.board_size && pos.y() < self.board_size);
        pos.y() * self.board_size + pos.x()
    }

    /// セルの policy 値
    #[inline]
    pub fn get(&self, pos: Pos) -> f32 {
        self.policy[self.index(pos)]
    }

    /// セルの policy 値を書き込む
    #[inline]
    pub fn set(&mut self, pos: Pos, value: f32) {
        let idx = self.index(pos);
        self.policy[idx] = value;
    }

    /// 内部インデックスでの書き込み（評価器用）
    #[inline]
    pub(crate) fn set_by_index(&mut self, index: usize, value: f32) {
        self.policy[index] = value;
    }

    /// 計算フラグを設定する
    #[inline]
    pub fn set_compute_flag(&mut self, pos: Pos, enabled: bool) {
        let idx = self.index(pos);
        self.compute_flag[idx] = enabled;
    }

    /// 計算フラグを取得する
    #[inline]
    pub fn compute_flag(&self, pos: Pos) -> bool {
        self.compute_flag[self.index(pos)]
    }

    #[inline]
    pub(crate) fn compute_flag_by_index(&self, index: usize) -> bool {
        self.compute_flag[index]
    }

    /// 盤上の全空点に計算フラグを立てる
    pub fn set_compute_flag_for_empty_cells(&mut self, board: &dyn EvalBoard) {
        debug_assert_eq!(board.board_size(), self.board_size);
        for y in 0..self.board_size {
            for x in 0..self.board_size {
                let pos = Pos::new(x, y);
                let idx = self.index(pos);
                self.compute_flag[idx] = board.stone_at(pos) == Color::Empty;
            }
        }
    }

    /// スコア変換の追加バイアスを設定する
    pub fn set_score_bias(&mut self, bias: i32) {
        self.score_bias = Self::SCORE_BIAS + bias;
    }

    /// policy 値の整数スコア射影
    #[inline]
    pub fn score(&self, pos: Pos) -> i32 {
        (self.get(pos) * Self::SCORE_SCALE) as i32 + self.score_bias
    }

    /// フラグが立ったセル全体で softmax を適用する
    ///
    /// フラグのないセルは 0 になる。
    pub fn apply_softmax(&mut self) {
        let mut max = f32::NEG_INFINITY;
        for (p, &f) in self.policy.iter().zip(&self.compute_flag) {
            if f && *p > max {
                max = *p;
            }
        }
        if max == f32::NEG_INFINITY {
            return; // 対象セルなし
        }

        let mut sum = 0.0f32;
        for (p, &f) in self.policy.iter_mut().zip(&self.compute_flag) {
            if f {
                *p = (*p - max).exp();
                sum += *p;
            } else {
                *p = 0.0;
            }
        }
        for (p, &f) in self.policy.iter_mut().zip(&self.compute_flag) {
            if f {
                *p /= sum;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_from_value() {
        let v = ValueType::from_value(Value::new(77));
        assert_eq!(v.value(), Value::new(77));
        assert!(!v.has_rates());
        assert_eq!(v.winloss_rate(), 0.0);
    }

    #[test]
    fn test_value_type_softmax_normalized() {
        let v = ValueType::from_wld_logits(2.0, -1.0, 0.5);
        assert!(v.has_rates());
        let total = v.win() + v.loss() + v.draw();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(v.win() > v.draw() && v.draw() > v.loss());
        assert!(v.value() > Value::ZERO);
    }

    #[test]
    fn test_value_type_symmetric_logits() {
        let v = ValueType::from_wld_logits(1.0, 1.0, 1.0);
        assert!((v.win() - v.loss()).abs() < 1e-6);
        assert_eq!(v.value(), Value::ZERO);
    }

    #[test]
    fn test_policy_buffer_softmax_masked() {
        let mut buf = PolicyBuffer::new(4);
        buf.set(Pos::new(0, 0), 1.0);
        buf.set(Pos::new(1, 0), 1.0);
        buf.set(Pos::new(2, 0), 99.0); // フラグなし → 無視される
        buf.set_compute_flag(Pos::new(0, 0), true);
        buf.set_compute_flag(Pos::new(1, 0), true);

        buf.apply_softmax();
        assert!((buf.get(Pos::new(0, 0)) - 0.5).abs() < 1e-6);
        assert!((buf.get(Pos::new(1, 0)) - 0.5).abs() < 1e-6);
        assert_eq!(buf.get(Pos::new(2, 0)), 0.0);
    }

    #[test]
    fn test_policy_buffer_softmax_empty_mask() {
        let mut buf = PolicyBuffer::new(4);
        buf.set(Pos::new(0, 0), 3.0);
        buf.apply_softmax(); // フラグゼロでも落ちない
        assert_eq!(buf.get(Pos::new(0, 0)), 3.0);
    }

    #[test]
    fn test_policy_buffer_score() {
        let mut buf = PolicyBuffer::new(4);
        buf.set(Pos::new(1, 1), 2.0);
        assert_eq!(buf.score(Pos::new(1, 1)), 64 + PolicyBuffer::SCORE_BIAS);

        buf.set_score_bias(10);
        assert_eq!(buf.score(Pos::new(1, 1)), 64 + PolicyBuffer::SCORE_BIAS + 10);
    }
}
