//! データセットの前処理
//!
//! 生画像ディレクトリ `{raw}/{class}/` を走査し、シード固定で train/val/test に分割、
//! 正規化した画像を `{processed}/{split}/{class}/` に書き出す。

pub mod augmentation;
pub mod materializer;
pub mod normalizer;
pub mod orchestrator;
pub mod scanner;
pub mod splitter;
pub mod tree;

pub use augmentation::{eval_transform, train_transform, AugmentationConfig};
pub use materializer::{FileOutcome, MaterializeReport, Materializer, JPEG_QUALITY};
pub use normalizer::{decode_path, normalize, normalize_bytes, normalize_path, NormalizeError, NormalizedImage};
pub use orchestrator::{preprocess_dataset, ClassSummary, Orchestrator, PreprocessOptions, PreprocessSummary};
pub use scanner::{is_image_path, scan_images};
pub use splitter::{split_files, SplitAssignment, SplitRatios};
pub use tree::DatasetTree;
