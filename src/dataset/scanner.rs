//! 画像ファイルの走査

use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::{ImageFile, IMAGE_EXTENSIONS};

/// 拡張子が許可リストに含まれるか（大文字小文字は区別しない）
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// ディレクトリ直下の画像ファイルを列挙する
///
/// サブディレクトリは再帰しない。結果はファイル名順に並べるので、
/// 同じ内容のディレクトリからは常に同じ順序が得られる。
pub fn scan_images(dir: &Path) -> Result<Vec<ImageFile>> {
    if !dir.is_dir() {
        return Err(PipelineError::NotFound(dir.to_path_buf()));
    }

    let class_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && is_image_path(&path) {
            files.push(ImageFile::new(path, class_name.clone()));
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
