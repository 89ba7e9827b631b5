//! 重みファイルのローダ
//!
//! ローダは3層のラッパーとして合成する。
//!
//! 1. `Mix8BinaryLoader`: 本体バイナリの厳密パース（EOF必須）
//! 2. `StandardHeaderLoader`: 標準ヘッダの検証と説明文の読み飛ばし
//! 3. `CompressedLoader`: LZ4 フレーム封筒の展開
//!
//! どの層も失敗時は `EvalError` を返すのみで、部分的な副作用を残さない。

use super::error::{EvalError, EvalResult};
use super::weight::{
    HeadBucket, Mix8Weight, FEATURE_DIM, FEATURE_DWCONV_DIM, MAX_NUM_BUCKETS, SHAPE_NUM,
};
use log::debug;
use std::io::Read;

/// 標準重みヘッダのマジックナンバー
pub const WEIGHT_MAGIC: u32 = 0xacd8_cc6a;

/// 重みローダのインターフェース
///
/// 入力ストリームから重みを構築する。合成はラッパー構造体で行う。
pub trait WeightLoader {
    type Weight;

    /// ストリームから重みを読み込む
    fn load(&self, reader: &mut dyn Read) -> EvalResult<Box<Self::Weight>>;
}

/// 標準重みヘッダ
#[derive(Debug, Clone)]
pub struct StandardHeader {
    /// ネットワーク構造のハッシュ
    pub arch_hash: u32,
    /// 対応ルールのビットマスク（bit0=freestyle, bit1=standard, bit2=renju）
    pub rule_mask: u32,
    /// 対応盤サイズのビットマスク（bit i → サイズ i+1）
    pub board_size_mask: u32,
    /// 説明文（UTF-8）
    pub description: String,
}

/// ヘッダ検証コールバック
pub type HeaderValidator = Box<dyn Fn(&StandardHeader) -> EvalResult<()> + Send + Sync>;

fn read_u32(reader: &mut dyn Read) -> EvalResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32(reader: &mut dyn Read) -> EvalResult<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f32(reader: &mut dyn Read) -> EvalResult<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_i16_into(reader: &mut dyn Read, out: &mut [i16]) -> EvalResult<()> {
    let mut buf = vec![0u8; out.len() * 2];
    reader.read_exact(&mut buf)?;
    for (v, chunk) in out.iter_mut().zip(buf.chunks_exact(2)) {
        *v = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
    Ok(())
}

fn read_f32_into(reader: &mut dyn Read, out: &mut [f32]) -> EvalResult<()> {
    let mut buf = vec![0u8; out.len() * 4];
    reader.read_exact(&mut buf)?;
    for (v, chunk) in out.iter_mut().zip(buf.chunks_exact(4)) {
        *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

/// ストリームが終端に達していることを要求する
fn expect_eof(reader: &mut dyn Read) -> EvalResult<()> {
    let mut probe = [0u8; 1];
    match reader.read(&mut probe) {
        Ok(0) => Ok(()),
        Ok(_) => Err(EvalError::InvalidWeightFile("trailing bytes after weight body".into())),
        Err(e) => Err(e.into()),
    }
}

/// Mix8 本体バイナリのローダ
///
/// フィールド順・リトルエンディアン・固定長。読み残しがあれば失敗。
#[derive(Default)]
pub struct Mix8BinaryLoader;

impl Mix8BinaryLoader {
    /// 固定部（mapping〜num_head_buckets）末尾の64バイト境界パディング
    const PREAMBLE_PADDING: usize = {
        let fixed = SHAPE_NUM * FEATURE_DIM * 2
            + FEATURE_DIM * 2
            + 9 * FEATURE_DWCONV_DIM * 2
            + FEATURE_DWCONV_DIM * 2
            + 4 // value_sum_scale_after_conv
            + 4 // value_sum_scale_direct
            + 4; // num_head_buckets
        (64 - fixed % 64) % 64
    };

    fn load_bucket(reader: &mut dyn Read, bucket: &mut HeadBucket) -> EvalResult<()> {
        read_f32_into(reader, &mut bucket.value_corner_weight)?;
        read_f32_into(reader, &mut bucket.value_corner_bias)?;
        read_f32_into(reader, &mut bucket.value_corner_prelu)?;
        read_f32_into(reader, &mut bucket.value_edge_weight)?;
        read_f32_into(reader, &mut bucket.value_edge_bias)?;
        read_f32_into(reader, &mut bucket.value_edge_prelu)?;
        read_f32_into(reader, &mut bucket.value_center_weight)?;
        read_f32_into(reader, &mut bucket.value_center_bias)?;
        read_f32_into(reader, &mut bucket.value_center_prelu)?;
        read_f32_into(reader, &mut bucket.value_quad_weight)?;
        read_f32_into(reader, &mut bucket.value_quad_bias)?;
        read_f32_into(reader, &mut bucket.value_quad_prelu)?;
        read_f32_into(reader, &mut bucket.value_l1_weight)?;
        read_f32_into(reader, &mut bucket.value_l1_bias)?;
        read_f32_into(reader, &mut bucket.value_l2_weight)?;
        read_f32_into(reader, &mut bucket.value_l2_bias)?;
        read_f32_into(reader, &mut bucket.value_l3_weight)?;
        read_f32_into(reader, &mut bucket.value_l3_bias)?;
        read_f32_into(reader, &mut bucket.policy_pwconv_l1_weight)?;
        read_f32_into(reader, &mut bucket.policy_pwconv_l1_bias)?;
        read_f32_into(reader, &mut bucket.policy_pwconv_l1_prelu)?;
        read_f32_into(reader, &mut bucket.policy_pwconv_l2_weight)?;
        read_f32_into(reader, &mut bucket.policy_pwconv_l2_bias)?;
        read_f32_into(reader, &mut bucket.policy_output_pos_weight)?;
        read_f32_into(reader, &mut bucket.policy_output_neg_weight)?;
        bucket.policy_output_bias = read_f32(reader)?;
        Ok(())
    }
}

impl WeightLoader for Mix8BinaryLoader {
    type Weight = Mix8Weight;

    fn load(&self, reader: &mut dyn Read) -> EvalResult<Box<Mix8Weight>> {
        let mut w = Mix8Weight::zeroed();

        // mapping はフィールド単位で一括読みしてから行へ変換する
        {
            let mut buf = vec![0u8; SHAPE_NUM * FEATURE_DIM * 2];
            reader.read_exact(&mut buf)?;
            for (row, chunk) in w.mapping.iter_mut().zip(buf.chunks_exact(FEATURE_DIM * 2)) {
                for (v, b) in row.0.iter_mut().zip(chunk.chunks_exact(2)) {
                    *v = i16::from_le_bytes([b[0], b[1]]);
                }
            }
        }

        read_i16_into(reader, &mut w.map_prelu_weight.0)?;
        for conv in w.feature_dwconv_weight.iter_mut() {
            read_i16_into(reader, &mut conv.0)?;
        }
        read_i16_into(reader, &mut w.feature_dwconv_bias.0)?;
        w.value_sum_scale_after_conv = read_f32(reader)?;
        w.value_sum_scale_direct = read_f32(reader)?;

        w.num_head_buckets = read_i32(reader)?;
        if w.num_head_buckets < 1 || w.num_head_buckets as usize > MAX_NUM_BUCKETS {
            return Err(EvalError::InvalidWeightFile(format!(
                "invalid num_head_buckets: {}",
                w.num_head_buckets
            )));
        }

        let mut padding = [0u8; 64];
        reader.read_exact(&mut padding[..Self::PREAMBLE_PADDING])?;

        // ファイルには有効バケットのみが含まれる。残りスロットはゼロのまま。
        for i in 0..w.num_head_buckets as usize {
            let mut bucket = HeadBucket::zeroed();
            Self::load_bucket(reader, &mut bucket)?;
            w.buckets[i] = bucket;
        }

        expect_eof(reader)?;
        Ok(w)
    }
}

/// 標準ヘッダを解釈するラッパー
pub struct StandardHeaderLoader<L> {
    inner: L,
    validator: Option<HeaderValidator>,
}

impl<L> StandardHeaderLoader<L> {
    pub fn new(inner: L) -> Self {
        StandardHeaderLoader { inner, validator: None }
    }

    /// ヘッダ検証コールバックを設定する
    ///
    /// 検証が `Err` を返した場合、内側のローダには一切触れない。
    pub fn with_validator(mut self, validator: HeaderValidator) -> Self {
        self.validator = Some(validator);
        self
    }
}

impl<L: WeightLoader> WeightLoader for StandardHeaderLoader<L> {
    type Weight = L::Weight;

    fn load(&self, reader: &mut dyn Read) -> EvalResult<Box<L::Weight>> {
        let magic = read_u32(reader)?;
        if magic != WEIGHT_MAGIC {
            return Err(EvalError::InvalidWeightFile(format!(
                "bad weight magic: 0x{magic:08x}"
            )));
        }

        let arch_hash = read_u32(reader)?;
        let rule_mask = read_u32(reader)?;
        let board_size_mask = read_u32(reader)?;
        let desc_len = read_u32(reader)? as usize;

        let mut desc_bytes = vec![0u8; desc_len];
        reader.read_exact(&mut desc_bytes)?;

        if let Some(validator) = &self.validator {
            let header = StandardHeader {
                arch_hash,
                rule_mask,
                board_size_mask,
                description: String::from_utf8_lossy(&desc_bytes).into_owned(),
            };
            validator(&header)?;
            if !header.description.is_empty() {
                debug!("weight description: {}", header.description);
            }
        }

        self.inner.load(reader)
    }
}

/// LZ4 フレーム封筒を展開するラッパー
pub struct CompressedLoader<L> {
    inner: L,
}

impl<L> CompressedLoader<L> {
    pub fn new(inner: L) -> Self {
        CompressedLoader { inner }
    }
}

impl<L: WeightLoader> WeightLoader for CompressedLoader<L> {
    type Weight = L::Weight;

    fn load(&self, reader: &mut dyn Read) -> EvalResult<Box<L::Weight>> {
        let mut decoder = lz4_flex::frame::FrameDecoder::new(reader);
        self.inner.load(&mut decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::weight::ARCH_HASH;
    use std::io::{Cursor, Write};

    /// ヘッダ + ゼロ本体の重みファイルを合成する（非圧縮）
    pub(crate) fn build_plain_weight_file(
        arch_hash: u32,
        rule_mask: u32,
        board_size_mask: u32,
        desc: &str,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&WEIGHT_MAGIC.to_le_bytes());
        out.extend_from_slice(&arch_hash.to_le_bytes());
        out.extend_from_slice(&rule_mask.to_le_bytes());
        out.extend_from_slice(&board_size_mask.to_le_bytes());
        out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        out.extend_from_slice(desc.as_bytes());
        append_zero_body(&mut out, 1);
        out
    }

    /// ゼロ重みの本体（num_buckets 個のバケットを含む）を書き足す
    pub(crate) fn append_zero_body(out: &mut Vec<u8>, num_buckets: i32) {
        out.extend_from_slice(&vec![0u8; SHAPE_NUM * FEATURE_DIM * 2]);
        out.extend_from_slice(&vec![0u8; FEATURE_DIM * 2]);
        out.extend_from_slice(&vec![0u8; 9 * FEATURE_DWCONV_DIM * 2]);
        out.extend_from_slice(&vec![0u8; FEATURE_DWCONV_DIM * 2]);
        out.extend_from_slice(&1.0f32.to_le_bytes());
        out.extend_from_slice(&1.0f32.to_le_bytes());
        out.extend_from_slice(&num_buckets.to_le_bytes());
        out.extend_from_slice(&vec![0u8; Mix8BinaryLoader::PREAMBLE_PADDING]);
        for _ in 0..num_buckets.max(0) {
            out.extend_from_slice(&vec![0u8; HeadBucket::FILE_F32_LEN * 4]);
        }
    }

    #[test]
    fn test_preamble_padding_alignment() {
        let fixed = SHAPE_NUM * FEATURE_DIM * 2
            + FEATURE_DIM * 2
            + 9 * FEATURE_DWCONV_DIM * 2
            + FEATURE_DWCONV_DIM * 2
            + 12;
        assert_eq!((fixed + Mix8BinaryLoader::PREAMBLE_PADDING) % 64, 0);
    }

    #[test]
    fn test_binary_loader_zero_body() {
        let mut bytes = Vec::new();
        append_zero_body(&mut bytes, 2);
        let mut cursor = Cursor::new(bytes);
        let w = Mix8BinaryLoader.load(&mut cursor).unwrap();
        assert_eq!(w.num_head_buckets, 2);
        assert_eq!(w.value_sum_scale_after_conv, 1.0);
    }

    #[test]
    fn test_binary_loader_truncated() {
        let mut bytes = Vec::new();
        append_zero_body(&mut bytes, 1);
        bytes.truncate(bytes.len() - 100);
        let mut cursor = Cursor::new(bytes);
        assert!(Mix8BinaryLoader.load(&mut cursor).is_err());
    }

    #[test]
    fn test_binary_loader_trailing_bytes() {
        let mut bytes = Vec::new();
        append_zero_body(&mut bytes, 1);
        bytes.push(0);
        let mut cursor = Cursor::new(bytes);
        assert!(Mix8BinaryLoader.load(&mut cursor).is_err());
    }

    #[test]
    fn test_binary_loader_bad_bucket_count() {
        let mut bytes = Vec::new();
        append_zero_body(&mut bytes, (MAX_NUM_BUCKETS + 1) as i32);
        let mut cursor = Cursor::new(bytes);
        assert!(Mix8BinaryLoader.load(&mut cursor).is_err());
    }

    #[test]
    fn test_header_loader_ok() {
        let bytes = build_plain_weight_file(ARCH_HASH, 0b111, u32::MAX, "test net");
        let loader = StandardHeaderLoader::new(Mix8BinaryLoader);
        let mut cursor = Cursor::new(bytes);
        assert!(loader.load(&mut cursor).is_ok());
    }

    #[test]
    fn test_header_loader_bad_magic() {
        let mut bytes = build_plain_weight_file(ARCH_HASH, 0b111, u32::MAX, "");
        bytes[0] ^= 0xff;
        let loader = StandardHeaderLoader::new(Mix8BinaryLoader);
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            loader.load(&mut cursor),
            Err(EvalError::InvalidWeightFile(_))
        ));
    }

    #[test]
    fn test_header_loader_validator_reject() {
        let bytes = build_plain_weight_file(ARCH_HASH, 0b100, u32::MAX, "");
        let loader = StandardHeaderLoader::new(Mix8BinaryLoader).with_validator(Box::new(|h| {
            if h.rule_mask & 0b001 == 0 {
                Err(EvalError::UnsupportedRule(crate::types::Rule::Freestyle))
            } else {
                Ok(())
            }
        }));
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            loader.load(&mut cursor),
            Err(EvalError::UnsupportedRule(_))
        ));
    }

    #[test]
    fn test_compressed_loader_roundtrip() {
        let plain = build_plain_weight_file(ARCH_HASH, 0b111, u32::MAX, "lz4");
        let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let loader = CompressedLoader::new(StandardHeaderLoader::new(Mix8BinaryLoader));
        let mut cursor = Cursor::new(compressed);
        assert!(loader.load(&mut cursor).is_ok());
    }
}
