//! Mix8 ネットワークの重み定義
//!
//! 次元はすべてコンパイル時定数。ファイル本体のレイアウトは
//! `loader.rs` を参照。

/// セルごとの特徴チャネル数（i16）
pub const FEATURE_DIM: usize = 64;
/// 3×3 depth-wise conv を通るチャネル数（先頭側）
pub const FEATURE_DWCONV_DIM: usize = 32;
/// policy ヘッドが消費する conv チャネル数
pub const POLICY_DIM: usize = 32;
/// value MLP の隠れ層幅
pub const VALUE_DIM: usize = 64;
/// グループ/象限特徴ベクトルの幅
pub const VALUE_GROUP_DIM: usize = 64;
/// 重みファイルが持つヘッドバケットのスロット数
pub const MAX_NUM_BUCKETS: usize = 4;
/// 形状コード総数（4 * 3^11、壁エンコード込み）
pub const SHAPE_NUM: usize = 708588;
/// SIMD 可視な行の必要アラインメント
pub const ALIGNMENT: usize = 64;

/// value MLP 第1層の入力幅（グローバル平均 + 象限特徴×4）
pub const VALUE_LAYER0_DIM: usize = FEATURE_DIM + 4 * VALUE_GROUP_DIM;

// 次元制約（バッチ処理とファイルレイアウトの前提）
const _: () = assert!(POLICY_DIM <= FEATURE_DWCONV_DIM);
const _: () = assert!(FEATURE_DWCONV_DIM <= FEATURE_DIM);
const _: () = assert!(FEATURE_DIM % 16 == 0);
const _: () = assert!(FEATURE_DWCONV_DIM % 16 == 0);
const _: () = assert!(POLICY_DIM % 16 == 0);
const _: () = assert!(SHAPE_NUM == 4 * 177147);

/// アーキテクチャハッシュの基底値
pub const ARCH_HASH_BASE: u32 = 0x92c1_7e4b;

/// ネットワーク構造から導出されるアーキテクチャハッシュ
///
/// 各次元を 8 で割った値を 6bit ずつ詰めて基底値と XOR する。
/// 重みファイルヘッダの `arch_hash` と一致しなければロードを拒否する。
pub const ARCH_HASH: u32 = ARCH_HASH_BASE
    ^ ((((FEATURE_DWCONV_DIM / 8) as u32) << 26)
        | (((VALUE_GROUP_DIM / 8) as u32) << 20)
        | (((VALUE_DIM / 8) as u32) << 14)
        | (((POLICY_DIM / 8) as u32) << 8)
        | ((FEATURE_DIM / 8) as u32));

/// 64バイト境界に揃えた特徴行
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct FeatureRow(pub [i16; FEATURE_DIM]);

impl FeatureRow {
    pub const ZERO: FeatureRow = FeatureRow([0; FEATURE_DIM]);
}

/// 64バイト境界に揃えた conv チャネル行
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct ConvRow(pub [i16; FEATURE_DWCONV_DIM]);

impl ConvRow {
    pub const ZERO: ConvRow = ConvRow([0; FEATURE_DWCONV_DIM]);
}

/// ヘッドバケット1つぶんの重み
///
/// 行列は row-major（出力行 × 入力列）で、`simd::linear_layer` の
/// 期待レイアウトと一致する。
#[derive(Debug, Clone)]
pub struct HeadBucket {
    // 3×3 グループ特徴の共有線形層（角/辺/中央）
    pub value_corner_weight: Vec<f32>, // [VALUE_GROUP_DIM][FEATURE_DIM]
    pub value_corner_bias: Vec<f32>,   // [VALUE_GROUP_DIM]
    pub value_corner_prelu: Vec<f32>,  // [VALUE_GROUP_DIM]
    pub value_edge_weight: Vec<f32>,
    pub value_edge_bias: Vec<f32>,
    pub value_edge_prelu: Vec<f32>,
    pub value_center_weight: Vec<f32>,
    pub value_center_bias: Vec<f32>,
    pub value_center_prelu: Vec<f32>,

    // 2×2 象限和の共有線形層
    pub value_quad_weight: Vec<f32>, // [VALUE_GROUP_DIM][VALUE_GROUP_DIM]
    pub value_quad_bias: Vec<f32>,
    pub value_quad_prelu: Vec<f32>,

    // value MLP
    pub value_l1_weight: Vec<f32>, // [VALUE_DIM][VALUE_LAYER0_DIM]
    pub value_l1_bias: Vec<f32>,
    pub value_l2_weight: Vec<f32>, // [VALUE_DIM][VALUE_DIM]
    pub value_l2_bias: Vec<f32>,
    pub value_l3_weight: Vec<f32>, // [3][VALUE_DIM]
    pub value_l3_bias: Vec<f32>,   // [3]

    // policy point-wise conv の重み生成層
    pub policy_pwconv_l1_weight: Vec<f32>, // [POLICY_DIM][FEATURE_DIM]
    pub policy_pwconv_l1_bias: Vec<f32>,
    pub policy_pwconv_l1_prelu: Vec<f32>,
    pub policy_pwconv_l2_weight: Vec<f32>, // [4 * POLICY_DIM][POLICY_DIM]
    pub policy_pwconv_l2_bias: Vec<f32>,   // [4 * POLICY_DIM]

    // policy 出力の両側PReLUとバイアス
    pub policy_output_pos_weight: [f32; 4],
    pub policy_output_neg_weight: [f32; 4],
    pub policy_output_bias: f32,
}

impl HeadBucket {
    /// ゼロ初期化されたバケット
    pub fn zeroed() -> Self {
        HeadBucket {
            value_corner_weight: vec![0.0; VALUE_GROUP_DIM * FEATURE_DIM],
            value_corner_bias: vec![0.0; VALUE_GROUP_DIM],
            value_corner_prelu: vec![0.0; VALUE_GROUP_DIM],
            value_edge_weight: vec![0.0; VALUE_GROUP_DIM * FEATURE_DIM],
            value_edge_bias: vec![0.0; VALUE_GROUP_DIM],
            value_edge_prelu: vec![0.0; VALUE_GROUP_DIM],
            value_center_weight: vec![0.0; VALUE_GROUP_DIM * FEATURE_DIM],
            value_center_bias: vec![0.0; VALUE_GROUP_DIM],
            value_center_prelu: vec![0.0; VALUE_GROUP_DIM],
            value_quad_weight: vec![0.0; VALUE_GROUP_DIM * VALUE_GROUP_DIM],
            value_quad_bias: vec![0.0; VALUE_GROUP_DIM],
            value_quad_prelu: vec![0.0; VALUE_GROUP_DIM],
            value_l1_weight: vec![0.0; VALUE_DIM * VALUE_LAYER0_DIM],
            value_l1_bias: vec![0.0; VALUE_DIM],
            value_l2_weight: vec![0.0; VALUE_DIM * VALUE_DIM],
            value_l2_bias: vec![0.0; VALUE_DIM],
            value_l3_weight: vec![0.0; 3 * VALUE_DIM],
            value_l3_bias: vec![0.0; 3],
            policy_pwconv_l1_weight: vec![0.0; POLICY_DIM * FEATURE_DIM],
            policy_pwconv_l1_bias: vec![0.0; POLICY_DIM],
            policy_pwconv_l1_prelu: vec![0.0; POLICY_DIM],
            policy_pwconv_l2_weight: vec![0.0; 4 * POLICY_DIM * POLICY_DIM],
            policy_pwconv_l2_bias: vec![0.0; 4 * POLICY_DIM],
            policy_output_pos_weight: [0.0; 4],
            policy_output_neg_weight: [0.0; 4],
            policy_output_bias: 0.0,
        }
    }

    /// ファイル中の f32 要素数（バケット1つぶん）
    pub const FILE_F32_LEN: usize = 3 * (VALUE_GROUP_DIM * FEATURE_DIM + 2 * VALUE_GROUP_DIM)
        + VALUE_GROUP_DIM * VALUE_GROUP_DIM
        + 2 * VALUE_GROUP_DIM
        + VALUE_DIM * VALUE_LAYER0_DIM
        + VALUE_DIM
        + VALUE_DIM * VALUE_DIM
        + VALUE_DIM
        + 3 * VALUE_DIM
        + 3
        + POLICY_DIM * FEATURE_DIM
        + 2 * POLICY_DIM
        + 4 * POLICY_DIM * POLICY_DIM
        + 4 * POLICY_DIM
        + 4
        + 4
        + 1;
}

/// Mix8 ネットワークの全重み
///
/// ロード後は不変。複数の評価器から `Arc` 共有される。
#[derive(Debug, Clone)]
pub struct Mix8Weight {
    /// 形状コード → 特徴行
    pub mapping: Vec<FeatureRow>, // [SHAPE_NUM]
    /// mapSum に適用するチャネル別PReLU傾き（Q15）
    pub map_prelu_weight: FeatureRow,
    /// 3×3 depth-wise conv の重み（Q15、9近傍ぶん）
    pub feature_dwconv_weight: [ConvRow; 9],
    /// depth-wise conv のバイアス
    pub feature_dwconv_bias: ConvRow,
    /// conv 経由チャネルの value 集計スケール
    pub value_sum_scale_after_conv: f32,
    /// 直結チャネルの value 集計スケール
    pub value_sum_scale_direct: f32,
    /// 有効なヘッドバケット数（`[1, MAX_NUM_BUCKETS]`）
    pub num_head_buckets: i32,
    /// ヘッドバケット（`num_head_buckets` 以降はゼロ埋め）
    pub buckets: Vec<HeadBucket>, // [MAX_NUM_BUCKETS]
}

impl Mix8Weight {
    /// ゼロ初期化された重み（テスト・ローダ用）
    pub fn zeroed() -> Box<Self> {
        Box::new(Mix8Weight {
            mapping: vec![FeatureRow::ZERO; SHAPE_NUM],
            map_prelu_weight: FeatureRow::ZERO,
            feature_dwconv_weight: [ConvRow::ZERO; 9],
            feature_dwconv_bias: ConvRow::ZERO,
            value_sum_scale_after_conv: 0.0,
            value_sum_scale_direct: 0.0,
            num_head_buckets: 1,
            buckets: (0..MAX_NUM_BUCKETS).map(|_| HeadBucket::zeroed()).collect(),
        })
    }

    /// 形状コードに対応する特徴行
    #[inline]
    pub fn mapping_row(&self, shape: u32) -> &[i16; FEATURE_DIM] {
        &self.mapping[shape as usize].0
    }
}
