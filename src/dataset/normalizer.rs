//! 画像の正規化
//!
//! デコード → RGB変換 → Lanczosリサイズ → 255で割って [0, 1] にスケール。
//! 失敗は `Result` で返し、呼び出し側がスキップとして集計する。

use image::{imageops::FilterType, DynamicImage, RgbImage};
use std::path::Path;

use crate::types::ImageSize;

/// 正規化済み画像（HWC レイアウト、値は [0, 1]）
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl NormalizedImage {
    pub const CHANNELS: usize = 3;

    /// (height, width, channels)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, Self::CHANNELS)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// (y, x, c) の画素値
    pub fn get(&self, y: usize, x: usize, c: usize) -> Option<f32> {
        if y >= self.height || x >= self.width || c >= Self::CHANNELS {
            return None;
        }
        self.data.get((y * self.width + x) * Self::CHANNELS + c).copied()
    }

    pub fn min_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// 8bit RGB 画像に戻す（再エンコード用）
    pub fn to_rgb8(&self) -> RgbImage {
        let bytes = self
            .data
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        // data の長さは height * width * 3 で構築時に保証されている
        RgbImage::from_raw(self.width as u32, self.height as u32, bytes)
            .unwrap_or_else(|| RgbImage::new(self.width as u32, self.height as u32))
    }

    fn from_rgb8(img: &RgbImage) -> Self {
        let (width, height) = img.dimensions();
        let data = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self {
            height: height as usize,
            width: width as usize,
            data,
        }
    }
}

/// 正規化の失敗理由
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("読み込みに失敗しました: {0}")]
    Io(#[from] std::io::Error),

    #[error("デコードに失敗しました: {0}")]
    Decode(#[from] image::ImageError),

    #[error("目標サイズが不正です: {0}")]
    InvalidSize(ImageSize),
}

/// デコード済み画像を正規化する
pub fn normalize(img: &DynamicImage, target: ImageSize) -> Result<NormalizedImage, NormalizeError> {
    if target.height == 0 || target.width == 0 {
        return Err(NormalizeError::InvalidSize(target));
    }

    // アルファは捨て、グレースケールは3チャネルに展開される
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let resized = rgb.resize_exact(target.width, target.height, FilterType::Lanczos3);
    Ok(NormalizedImage::from_rgb8(&resized.to_rgb8()))
}

/// メモリ上のバイト列を正規化する（フォーマットは内容から判定）
pub fn normalize_bytes(bytes: &[u8], target: ImageSize) -> Result<NormalizedImage, NormalizeError> {
    let img = image::load_from_memory(bytes)?;
    normalize(&img, target)
}

/// ファイルをデコードする
///
/// 書き出し済みファイルは拡張子と中身の形式が一致しないことがあるため、内容から判定する。
pub fn decode_path(path: &Path) -> Result<DynamicImage, NormalizeError> {
    Ok(image::ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// ファイルを読み込んで正規化する
pub fn normalize_path(path: &Path, target: ImageSize) -> Result<NormalizedImage, NormalizeError> {
    normalize(&decode_path(path)?, target)
}
