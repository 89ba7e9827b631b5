//! 評価器のエラー型

use crate::types::Rule;
use std::error::Error;
use std::fmt;

/// 評価器・重みロード関連のエラー
#[derive(Debug, Clone)]
pub enum EvalError {
    /// 重みファイルが指定ルールに対応していない
    UnsupportedRule(Rule),

    /// 重みファイルが指定盤サイズに対応していない
    UnsupportedBoardSize(usize),

    /// アーキテクチャ不一致などの非互換な重みファイル
    IncompatibleWeight(String),

    /// 重みファイルが壊れている・途中で切れている・マジック不一致
    InvalidWeightFile(String),

    /// ファイルI/Oエラー
    Io(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnsupportedRule(rule) => {
                write!(f, "weight file does not support rule {rule}")
            }
            EvalError::UnsupportedBoardSize(size) => {
                write!(f, "weight file does not support board size {size}")
            }
            EvalError::IncompatibleWeight(msg) => {
                write!(f, "incompatible weight file: {msg}")
            }
            EvalError::InvalidWeightFile(msg) => {
                write!(f, "invalid weight file: {msg}")
            }
            EvalError::Io(msg) => {
                write!(f, "I/O error: {msg}")
            }
        }
    }
}

impl Error for EvalError {}

impl From<std::io::Error> for EvalError {
    fn from(err: std::io::Error) -> Self {
        EvalError::Io(err.to_string())
    }
}

/// 評価器操作の結果型
pub type EvalResult<T> = Result<T, EvalError>;
