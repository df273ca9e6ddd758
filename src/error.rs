//! 前処理パイプラインのエラー定義
//!
//! ディレクトリ・設定レベルのエラーは即座に伝播して実行を止めます。
//! ファイル単位のデコード失敗はエラーではなく [`crate::dataset::FileOutcome`] で表現します。

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Split;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// 生データ・クラスディレクトリが存在しない
    #[error("ディレクトリが見つかりません: {}", .0.display())]
    NotFound(PathBuf),

    /// 分割比率などの設定が不正
    #[error("不正な設定: {0}")]
    InvalidConfiguration(String),

    /// 書き出し後に split/class が空になった
    #[error("出力が空です: {split}/{class}")]
    EmptyOutput { split: Split, class: String },

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
