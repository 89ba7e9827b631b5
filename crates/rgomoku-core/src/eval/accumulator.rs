//! Mix8 アキュムレータ
//!
//! 盤面の各空点×4方向の形状インデックスから、セル別特徴和
//! （`map_sum`）、3×3 depth-wise conv 済み特徴（`map_after_dwconv`）、
//! グループ別 value 集計（`value_sum`）を差分更新で維持する。
//!
//! 着手1回で触るのは、着手点を通る長さ11のライン4本（最大44セル）と、
//! その周囲の conv 近傍だけ。UNDO は value 集計をスナップショットから
//! 書き戻すことで、丸めを含めビット単位の復元を保証する。
//!
//! 盤面座標は2系統ある。
//!
//! - inner: `x + y * board_size`（盤上セルのみ）
//! - outer: `(x+1) + (y+1) * full_board_size`（1セルの外周ハローを含む。
//!   conv の境界分岐をなくすため）

use super::simd;
use super::weight::{
    ConvRow, FeatureRow, Mix8Weight, FEATURE_DIM, FEATURE_DWCONV_DIM, POLICY_DIM, SHAPE_NUM,
    VALUE_DIM, VALUE_GROUP_DIM, VALUE_LAYER0_DIM,
};
use super::PolicyBuffer;
use crate::types::Color;
use smallvec::SmallVec;

/// 3の冪テーブル
pub const POWER3: [i32; 16] = {
    let mut t = [0i32; 16];
    let mut i = 0;
    while i < 16 {
        t[i] = 3i32.pow(i as u32);
        i += 1;
    }
    t
};

/// ライン4方向の x ステップ
const DX: [i32; 4] = [1, 0, 1, 1];
/// ライン4方向の y ステップ
const DY: [i32; 4] = [0, 1, 1, -1];

/// 3×3 グループ分割の軸あたり分割数
pub const NUM_GROUPS: usize = 3;

/// value 集計（グローバル + 3×3 グループ別）
///
/// conv 経由チャネル（先頭 `FEATURE_DWCONV_DIM`）と直結チャネルが
/// 同じ配列に同居する。UNDO 時はこの構造体を丸ごと書き戻す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct ValueSum {
    pub global: [i32; FEATURE_DIM],
    pub group: [[[i32; FEATURE_DIM]; NUM_GROUPS]; NUM_GROUPS],
}

impl ValueSum {
    pub const ZERO: ValueSum =
        ValueSum { global: [0; FEATURE_DIM], group: [[[0; FEATURE_DIM]; NUM_GROUPS]; NUM_GROUPS] };
}

/// 1セル×1方向の形状変化
struct OnePointChange {
    x: i32,
    y: i32,
    inner_idx: usize,
    old_shape: u32,
    new_shape: u32,
}

/// Mix8 アキュムレータ本体
///
/// 片側の視点1つぶんの状態を持つ。評価器は黒視点・白視点の2つを持つ。
pub struct Mix8Accumulator {
    board_size: usize,
    full_board_size: usize,
    board_size_scale: f32,

    /// 軸座標 → グループ番号
    group_index: [usize; 32],
    /// 1 / グループ内セル数
    group_size_scale: [[f32; NUM_GROUPS]; NUM_GROUPS],

    /// 盤上の石数（ヘッドバケット選択に使う局面フェーズ）
    stone_count: usize,
    /// clear 以降に適用した update の回数（検証用カウンタ）
    update_count: u64,

    /// セル×4方向の形状インデックス
    index_table: Vec<[u32; 4]>,
    /// セル別特徴和（4方向の mapping の和）
    map_sum: Vec<FeatureRow>,
    /// PReLU 済み特徴の 3×3 depth-wise conv（ハロー込み）
    map_after_dwconv: Vec<ConvRow>,
    /// value 集計
    value_sum: ValueSum,
}

impl Mix8Accumulator {
    /// 指定盤サイズのアキュムレータを作る（状態は未初期化、`clear` が必要）
    pub fn new(board_size: usize) -> Self {
        debug_assert!((6..=22).contains(&board_size));
        let full_board_size = board_size + 2;
        let n_cells = board_size * board_size;

        // 軸を3つの連続区間へほぼ等分する
        let mut group_index = [0usize; 32];
        let size1 = board_size / 3 + usize::from(board_size % 3 == 2);
        let size2 = (board_size / 3) * 2 + usize::from(board_size % 3 > 0);
        for (i, g) in group_index.iter_mut().enumerate().take(board_size) {
            *g = usize::from(i >= size1) + usize::from(i >= size2);
        }

        let mut group_size = [[0usize; NUM_GROUPS]; NUM_GROUPS];
        for y in 0..board_size {
            for x in 0..board_size {
                group_size[group_index[y]][group_index[x]] += 1;
            }
        }
        let mut group_size_scale = [[0.0f32; NUM_GROUPS]; NUM_GROUPS];
        for i in 0..NUM_GROUPS {
            for j in 0..NUM_GROUPS {
                group_size_scale[i][j] = 1.0 / group_size[i][j] as f32;
            }
        }

        Mix8Accumulator {
            board_size,
            full_board_size,
            board_size_scale: 1.0 / (n_cells as f32),
            group_index,
            group_size_scale,
            stone_count: 0,
            update_count: 0,
            index_table: vec![[0u32; 4]; n_cells],
            map_sum: vec![FeatureRow::ZERO; n_cells],
            map_after_dwconv: vec![ConvRow::ZERO; full_board_size * full_board_size],
            value_sum: ValueSum::ZERO,
        }
    }

    /// 盤サイズ
    #[inline]
    pub fn board_size(&self) -> usize {
        self.board_size
    }

    /// clear 以降に適用した update の回数
    #[inline]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// 現在の value 集計（UNDO 用スナップショットの取得元）
    #[inline]
    pub fn value_sum(&self) -> &ValueSum {
        &self.value_sum
    }

    /// 整数状態の完全一致判定（検証用）
    pub fn state_eq(&self, other: &Self) -> bool {
        self.board_size == other.board_size
            && self.stone_count == other.stone_count
            && self.index_table == other.index_table
            && self.map_sum.iter().zip(&other.map_sum).all(|(a, b)| a.0 == b.0)
            && self
                .map_after_dwconv
                .iter()
                .zip(&other.map_after_dwconv)
                .all(|(a, b)| a.0 == b.0)
            && self.value_sum == other.value_sum
    }

    /// 形状テーブルを空盤状態に初期化する
    ///
    /// 盤端から5セル以内のセルには壁の位置をエンコードしたコードが入る。
    /// 3パスの代入順は差分更新との整合に関わるため固定。
    fn init_index_table(&mut self) {
        for cell in self.index_table.iter_mut() {
            *cell = [0; 4];
        }

        let bs = self.board_size;
        let idx = |x: usize, y: usize| x + y * bs;

        // 右/下側に壁があるライン
        for thick in 1..=5usize {
            let mut c = 0u32;
            for j in 0..thick {
                c += POWER3[11 - j] as u32;
            }
            for i in 0..bs {
                self.index_table[idx(bs - 6 + thick, i)][0] = c;
                self.index_table[idx(i, bs - 6 + thick)][1] = c;
                self.index_table[idx(bs - 6 + thick, i)][2] = c;
                self.index_table[idx(i, bs - 6 + thick)][2] = c;
                self.index_table[idx(bs - 6 + thick, i)][3] = c;
                self.index_table[idx(i, 6 - 1 - thick)][3] = c;
            }
        }

        // 左/上側に壁があるライン
        for thick in 1..=5usize {
            let mut c = 2 * POWER3[11] as u32;
            for j in 0..thick - 1 {
                c += POWER3[j] as u32;
            }
            for i in 0..bs {
                self.index_table[idx(6 - 1 - thick, i)][0] = c;
                self.index_table[idx(i, 6 - 1 - thick)][1] = c;
                self.index_table[idx(6 - 1 - thick, i)][2] = c;
                self.index_table[idx(i, 6 - 1 - thick)][2] = c;
                self.index_table[idx(6 - 1 - thick, i)][3] = c;
                self.index_table[idx(i, bs - 6 + thick)][3] = c;
            }
        }

        // 両側に壁がある斜めライン（角近傍）
        for a in 1..=5usize {
            for b in 1..=5usize {
                let mut c = 3 * POWER3[11] as u32;
                for i in 0..a - 1 {
                    c += POWER3[10 - i] as u32;
                }
                for i in 0..b - 1 {
                    c += POWER3[i] as u32;
                }

                self.index_table[idx(bs - 6 + a, 5 - b)][2] = c;
                self.index_table[idx(5 - b, bs - 6 + a)][2] = c;
                self.index_table[idx(5 - b, 5 - a)][3] = c;
                self.index_table[idx(bs - 6 + a, bs - 6 + b)][3] = c;
            }
        }
    }

    /// 空盤から全状態を再構築する
    pub fn clear(&mut self, w: &Mix8Weight) {
        self.init_index_table();
        self.stone_count = 0;
        self.update_count = 0;

        let bs = self.board_size;
        let full = self.full_board_size;

        // conv マップはバイアスで初期化、value 集計はゼロ
        for conv in self.map_after_dwconv.iter_mut() {
            *conv = w.feature_dwconv_bias;
        }
        self.value_sum = ValueSum::ZERO;

        let Self { index_table, map_sum, map_after_dwconv, value_sum, group_index, .. } = self;

        for y in 0..bs {
            for x in 0..bs {
                let inner = x + y * bs;

                // 4方向の mapping を合算
                let sum = &mut map_sum[inner].0;
                *sum = [0; FEATURE_DIM];
                for dir in 0..4 {
                    simd::add_assign_i16(sum, w.mapping_row(index_table[inner][dir]));
                }

                let mut feat = [0i16; FEATURE_DIM];
                simd::prelu_i16(&mut feat, sum, &w.map_prelu_weight.0);

                // conv チャネルは周囲9セルへ畳み込む
                for dy in 0..3usize {
                    for dx in 0..3usize {
                        let outer = (x + dx) + (y + dy) * full;
                        simd::dwconv_accum_i16(
                            &mut map_after_dwconv[outer].0,
                            &feat[..FEATURE_DWCONV_DIM],
                            &w.feature_dwconv_weight[8 - dy * 3 - dx].0,
                        );
                    }
                }

                // 直結チャネルはそのまま value 集計へ
                simd::add_widened_i32(
                    &mut value_sum.global[FEATURE_DWCONV_DIM..],
                    &feat[FEATURE_DWCONV_DIM..],
                );
                let g = &mut value_sum.group[group_index[y]][group_index[x]];
                simd::add_widened_i32(&mut g[FEATURE_DWCONV_DIM..], &feat[FEATURE_DWCONV_DIM..]);
            }
        }

        // conv 済み特徴の ReLU を value 集計へ加算
        for y in 0..bs {
            for x in 0..bs {
                let outer = (x + 1) + (y + 1) * full;
                let conv = &map_after_dwconv[outer].0;
                simd::add_relu_widened_i32(&mut value_sum.global[..FEATURE_DWCONV_DIM], conv);
                let g = &mut value_sum.group[group_index[y]][group_index[x]];
                simd::add_relu_widened_i32(&mut g[..FEATURE_DWCONV_DIM], conv);
            }
        }
    }

    /// conv の影響範囲（outer 座標の矩形、両端含む）
    ///
    /// 着手点を通るライン上の変化セル `[x-5, x+5]` に 3×3 ステンシルが
    /// 触れる conv セルを覆う。value 集計に参加するのは盤上セルに対応する
    /// outer `[1, board_size]` のみなのでそこへクリップする。
    #[inline]
    fn conv_dirty_rect(&self, x: usize, y: usize) -> (usize, usize, usize, usize) {
        let bs = self.board_size as i32;
        let (x, y) = (x as i32, y as i32);
        let x0 = (x - 6 + 1).max(1) as usize;
        let y0 = (y - 6 + 1).max(1) as usize;
        let x1 = (x + 6 + 1).min(bs) as usize;
        let y1 = (y + 6 + 1).min(bs) as usize;
        (x0, y0, x1, y1)
    }

    /// 矩形内の conv 済み特徴の ReLU を value 集計へ加算/減算する
    fn accumulate_conv_rect(&mut self, rect: (usize, usize, usize, usize), add: bool) {
        let (x0, y0, x1, y1) = rect;
        let full = self.full_board_size;
        let Self { map_after_dwconv, value_sum, group_index, .. } = self;

        for yi in y0..=y1 {
            let gy = group_index[yi - 1];
            for xi in x0..=x1 {
                let gx = group_index[xi - 1];
                let conv = &map_after_dwconv[xi + yi * full].0;
                if add {
                    simd::add_relu_widened_i32(&mut value_sum.global[..FEATURE_DWCONV_DIM], conv);
                    let g = &mut value_sum.group[gy][gx];
                    simd::add_relu_widened_i32(&mut g[..FEATURE_DWCONV_DIM], conv);
                } else {
                    simd::sub_relu_widened_i32(&mut value_sum.global[..FEATURE_DWCONV_DIM], conv);
                    let g = &mut value_sum.group[gy][gx];
                    simd::sub_relu_widened_i32(&mut g[..FEATURE_DWCONV_DIM], conv);
                }
            }
        }
    }

    /// 形状テーブルを更新し、変化一覧を返す
    fn record_changes(
        &mut self,
        color: Color,
        x: usize,
        y: usize,
        is_move: bool,
    ) -> SmallVec<[OnePointChange; 44]> {
        debug_assert!(color.is_side());
        let bs = self.board_size as i32;
        let bs_sub1 = bs - 1;
        let d_power3: i32 = if is_move {
            color.index() as i32 + 1
        } else {
            -(color.index() as i32) - 1
        };

        let mut changes = SmallVec::new();
        for dir in 0..4usize {
            for dist in -5i32..=5 {
                let xi = x as i32 - dist * DX[dir];
                let yi = y as i32 - dist * DY[dir];

                // 分岐の少ない盤外判定
                if (xi | (bs_sub1 - xi) | yi | (bs_sub1 - yi)) < 0 {
                    continue;
                }

                let inner_idx = (yi * bs + xi) as usize;
                let old_shape = self.index_table[inner_idx][dir];
                let new_shape =
                    (old_shape as i32 + d_power3 * POWER3[(dist + 5) as usize]) as u32;
                debug_assert!((new_shape as usize) < SHAPE_NUM);
                self.index_table[inner_idx][dir] = new_shape;

                changes.push(OnePointChange { x: xi, y: yi, inner_idx, old_shape, new_shape });
            }
        }
        changes
    }

    /// 変化一覧を map_sum / map_after_dwconv / value 集計へ反映する
    ///
    /// `update_values` が偽の場合（UNDO）、直結チャネルの value 更新は
    /// 行わない（スナップショット書き戻しで復元されるため）。
    fn apply_changes(
        &mut self,
        w: &Mix8Weight,
        changes: &[OnePointChange],
        update_values: bool,
    ) {
        let full = self.full_board_size;
        let Self { map_sum, map_after_dwconv, value_sum, group_index, .. } = self;

        for (i, c) in changes.iter().enumerate() {
            if let Some(next) = changes.get(i + 1) {
                simd::prefetch_row(w.mapping_row(next.old_shape));
                simd::prefetch_row(w.mapping_row(next.new_shape));
            }

            let sum = &mut map_sum[c.inner_idx].0;
            let old_sum = *sum;
            simd::delta_i16(sum, w.mapping_row(c.old_shape), w.mapping_row(c.new_shape));

            let mut old_feat = [0i16; FEATURE_DIM];
            let mut new_feat = [0i16; FEATURE_DIM];
            simd::prelu_i16(&mut old_feat, &old_sum, &w.map_prelu_weight.0);
            simd::prelu_i16(&mut new_feat, sum, &w.map_prelu_weight.0);

            // conv チャネル: 周囲9セルから旧特徴を抜き、新特徴を入れる
            for dy in 0..3usize {
                for dx in 0..3usize {
                    let outer = (c.x as usize + dx) + (c.y as usize + dy) * full;
                    simd::dwconv_delta_i16(
                        &mut map_after_dwconv[outer].0,
                        &old_feat[..FEATURE_DWCONV_DIM],
                        &new_feat[..FEATURE_DWCONV_DIM],
                        &w.feature_dwconv_weight[8 - dy * 3 - dx].0,
                    );
                }
            }

            if update_values {
                simd::sub_widened_i32(
                    &mut value_sum.global[FEATURE_DWCONV_DIM..],
                    &old_feat[FEATURE_DWCONV_DIM..],
                );
                simd::add_widened_i32(
                    &mut value_sum.global[FEATURE_DWCONV_DIM..],
                    &new_feat[FEATURE_DWCONV_DIM..],
                );
                let g = &mut value_sum.group[group_index[c.y as usize]][group_index[c.x as usize]];
                simd::sub_widened_i32(&mut g[FEATURE_DWCONV_DIM..], &old_feat[FEATURE_DWCONV_DIM..]);
                simd::add_widened_i32(&mut g[FEATURE_DWCONV_DIM..], &new_feat[FEATURE_DWCONV_DIM..]);
            }
        }
    }

    /// 着手を反映する
    ///
    /// 呼び出し側は実行前の `value_sum` スナップショットを保存しておき、
    /// 対応する `update_undo` に渡すこと。
    pub fn update_move(&mut self, w: &Mix8Weight, color: Color, x: usize, y: usize) {
        self.update_count += 1;
        self.stone_count += 1;

        let rect = self.conv_dirty_rect(x, y);
        self.accumulate_conv_rect(rect, false);

        let changes = self.record_changes(color, x, y, true);
        self.apply_changes(w, &changes, true);

        self.accumulate_conv_rect(rect, true);
    }

    /// 着手を取り消す
    ///
    /// `backup` は対応する `update_move` 直前の `value_sum`。矩形の再計算を
    /// せず丸ごと書き戻すことで、i32 集計のビット単位の復元を保証する。
    pub fn update_undo(
        &mut self,
        w: &Mix8Weight,
        color: Color,
        x: usize,
        y: usize,
        backup: &ValueSum,
    ) {
        self.update_count += 1;
        self.stone_count -= 1;

        let changes = self.record_changes(color, x, y, false);
        self.apply_changes(w, &changes, false);

        self.value_sum = *backup;
    }

    /// 局面フェーズから使用するヘッドバケットを選ぶ
    #[inline]
    fn bucket_index(&self, w: &Mix8Weight) -> usize {
        let n_cells = self.board_size * self.board_size;
        self.stone_count * w.num_head_buckets as usize / (n_cells + 1)
    }

    /// value 集計を float に変換する
    ///
    /// conv 経由チャネルと直結チャネルでスケールが異なる。
    fn value_sum_to_float(
        &self,
        w: &Mix8Weight,
        out: &mut [f32; FEATURE_DIM],
        vsum: &[i32; FEATURE_DIM],
        size_scale: f32,
    ) {
        let scale_conv = size_scale * w.value_sum_scale_after_conv;
        let scale_direct = size_scale * w.value_sum_scale_direct;
        for (i, (o, v)) in out.iter_mut().zip(vsum).enumerate() {
            let scale = if i < FEATURE_DWCONV_DIM { scale_conv } else { scale_direct };
            *o = *v as f32 * scale;
        }
    }

    /// value ヘッドを評価して (win, loss, draw) ロジットを返す
    pub fn evaluate_value(&self, w: &Mix8Weight) -> (f32, f32, f32) {
        let bucket = &w.buckets[self.bucket_index(w)];

        // value 集計 → float 特徴
        let mut layer0 = [0.0f32; VALUE_LAYER0_DIM];
        let mut global = [0.0f32; FEATURE_DIM];
        self.value_sum_to_float(w, &mut global, &self.value_sum.global, self.board_size_scale);
        layer0[..FEATURE_DIM].copy_from_slice(&global);

        let mut group0 = [[[0.0f32; FEATURE_DIM]; NUM_GROUPS]; NUM_GROUPS];
        for i in 0..NUM_GROUPS {
            for j in 0..NUM_GROUPS {
                self.value_sum_to_float(
                    w,
                    &mut group0[i][j],
                    &self.value_sum.group[i][j],
                    self.group_size_scale[i][j],
                );
            }
        }

        // グループ線形層（角/辺/中央で重み共有）
        let mut group1 = [[[0.0f32; VALUE_GROUP_DIM]; NUM_GROUPS]; NUM_GROUPS];
        for i in 0..NUM_GROUPS {
            for j in 0..NUM_GROUPS {
                let (wt, bias, prelu) = match (i, j) {
                    (1, 1) => (
                        &bucket.value_center_weight,
                        &bucket.value_center_bias,
                        &bucket.value_center_prelu,
                    ),
                    (0, 1) | (1, 0) | (1, 2) | (2, 1) => (
                        &bucket.value_edge_weight,
                        &bucket.value_edge_bias,
                        &bucket.value_edge_prelu,
                    ),
                    _ => (
                        &bucket.value_corner_weight,
                        &bucket.value_corner_bias,
                        &bucket.value_corner_prelu,
                    ),
                };
                simd::linear_layer(&mut group1[i][j], &group0[i][j], wt, bias);
                simd::prelu_f32(&mut group1[i][j], prelu);
            }
        }

        // 2×2 象限和 → 共有線形層
        for i in 0..2usize {
            for j in 0..2usize {
                let mut quad0 = group1[i][j];
                simd::add_assign_f32(&mut quad0, &group1[i][j + 1]);
                simd::add_assign_f32(&mut quad0, &group1[i + 1][j]);
                simd::add_assign_f32(&mut quad0, &group1[i + 1][j + 1]);

                let mut quad1 = [0.0f32; VALUE_GROUP_DIM];
                simd::linear_layer(&mut quad1, &quad0, &bucket.value_quad_weight, &bucket.value_quad_bias);
                simd::prelu_f32(&mut quad1, &bucket.value_quad_prelu);

                let offset = FEATURE_DIM + (i * 2 + j) * VALUE_GROUP_DIM;
                layer0[offset..offset + VALUE_GROUP_DIM].copy_from_slice(&quad1);
            }
        }

        // value MLP
        let mut layer1 = [0.0f32; VALUE_DIM];
        simd::linear_layer(&mut layer1, &layer0, &bucket.value_l1_weight, &bucket.value_l1_bias);
        simd::relu_f32(&mut layer1);

        let mut layer2 = [0.0f32; VALUE_DIM];
        simd::linear_layer(&mut layer2, &layer1, &bucket.value_l2_weight, &bucket.value_l2_bias);
        simd::relu_f32(&mut layer2);

        let mut out = [0.0f32; 3];
        simd::linear_layer(&mut out, &layer2, &bucket.value_l3_weight, &bucket.value_l3_bias);
        (out[0], out[1], out[2])
    }

    /// policy ヘッドを評価してバッファへ書き込む
    ///
    /// 計算フラグの立ったセルだけが対象。softmax は呼び出し側が
    /// `PolicyBuffer::apply_softmax` で適用する。
    pub fn evaluate_policy(&self, w: &Mix8Weight, policy: &mut PolicyBuffer) {
        let bucket = &w.buckets[self.bucket_index(w)];

        // グローバル value 平均から point-wise conv の重みを生成
        let mut global = [0.0f32; FEATURE_DIM];
        self.value_sum_to_float(w, &mut global, &self.value_sum.global, self.board_size_scale);

        let mut pwconv_weight1 = [0.0f32; POLICY_DIM];
        simd::linear_layer(
            &mut pwconv_weight1,
            &global,
            &bucket.policy_pwconv_l1_weight,
            &bucket.policy_pwconv_l1_bias,
        );
        simd::prelu_f32(&mut pwconv_weight1, &bucket.policy_pwconv_l1_prelu);

        let mut pwconv_weight2 = [0.0f32; 4 * POLICY_DIM];
        simd::linear_layer(
            &mut pwconv_weight2,
            &pwconv_weight1,
            &bucket.policy_pwconv_l2_weight,
            &bucket.policy_pwconv_l2_bias,
        );

        let bs = self.board_size;
        let full = self.full_board_size;
        for y in 0..bs {
            for x in 0..bs {
                let inner = x + y * bs;
                if !policy.compute_flag_by_index(inner) {
                    continue;
                }

                let conv = &self.map_after_dwconv[(x + 1) + (y + 1) * full].0;
                let mut slots = [0.0f32; 4];
                for (c, &v) in conv.iter().take(POLICY_DIM).enumerate() {
                    let f = v.max(0) as f32;
                    for (i, slot) in slots.iter_mut().enumerate() {
                        *slot += f * pwconv_weight2[i * POLICY_DIM + c];
                    }
                }

                // スロット別の両側PReLUと線形結合
                let mut sum = bucket.policy_output_bias;
                for (i, &s) in slots.iter().enumerate() {
                    let wgt = if s < 0.0 {
                        bucket.policy_output_neg_weight[i]
                    } else {
                        bucket.policy_output_pos_weight[i]
                    };
                    sum += s * wgt;
                }
                policy.set_by_index(inner, sum);
            }
        }
    }
}
