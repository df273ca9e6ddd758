//! モデル入力用の変換とデータ拡張
//!
//! 評価・推論時: RGB → リサイズ → [0,1] → ImageNet 平均/標準偏差で正規化（CHW）。
//! 学習時はその前に左右反転・回転・平行移動・色調ジッターをランダムに適用する。

use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use rand::Rng;

use crate::types::ImageSize;

/// ImageNetの平均（RGB）
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNetの標準偏差（RGB）
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 学習時のデータ拡張パラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentationConfig {
    /// 左右反転の確率
    pub horizontal_flip: f64,
    /// 回転角の範囲（度、±）
    pub rotation_degrees: f32,
    /// 平行移動の最大量（画像サイズ比）
    pub translate: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: 0.5,
            rotation_degrees: 15.0,
            translate: 0.1,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
        }
    }
}

/// 評価・推論用の変換（CHW、ImageNet正規化）
pub fn eval_transform(img: &DynamicImage, size: ImageSize) -> Vec<f32> {
    let resized = image::imageops::resize(
        &img.to_rgb8(),
        size.width,
        size.height,
        FilterType::Lanczos3,
    );
    to_chw_normalized(&resized)
}

/// 学習用の変換（データ拡張 + 評価用変換）
pub fn train_transform<R: Rng>(
    img: &DynamicImage,
    size: ImageSize,
    config: &AugmentationConfig,
    rng: &mut R,
) -> Vec<f32> {
    let rgb = image::imageops::resize(&img.to_rgb8(), size.width, size.height, FilterType::Triangle);
    let augmented = augment(rgb, config, rng);
    to_chw_normalized(&augmented)
}

/// ランダムなデータ拡張を適用する
pub fn augment<R: Rng>(img: RgbImage, config: &AugmentationConfig, rng: &mut R) -> RgbImage {
    let mut img = img;

    if config.horizontal_flip > 0.0 && rng.gen_bool(config.horizontal_flip.min(1.0)) {
        img = image::imageops::flip_horizontal(&img);
    }

    let angle = symmetric(rng, config.rotation_degrees);
    let (w, h) = img.dimensions();
    let tx = symmetric(rng, config.translate) * w as f32;
    let ty = symmetric(rng, config.translate) * h as f32;
    if angle != 0.0 || tx != 0.0 || ty != 0.0 {
        img = affine(&img, angle, tx, ty);
    }

    let brightness = 1.0 + symmetric(rng, config.brightness);
    let contrast = 1.0 + symmetric(rng, config.contrast);
    let saturation = 1.0 + symmetric(rng, config.saturation);
    color_jitter(&img, brightness, contrast, saturation)
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

/// 中心回りの回転と平行移動（最近傍補間、はみ出しは黒）
fn affine(img: &RgbImage, angle_degrees: f32, tx: f32, ty: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;

    RgbImage::from_fn(w, h, |x, y| {
        // 出力座標から入力座標への逆写像
        let dx = x as f32 - cx - tx;
        let dy = y as f32 - cy - ty;
        let sx = (cos * dx + sin * dy + cx).round();
        let sy = (-sin * dx + cos * dy + cy).round();

        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < w && (sy as u32) < h {
            *img.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// 明るさ・コントラスト・彩度の調整
fn color_jitter(img: &RgbImage, brightness: f32, contrast: f32, saturation: f32) -> RgbImage {
    let pixels = (img.width() * img.height()).max(1) as f32;
    let mean_gray = img.pixels().map(|p| luma(p) * brightness).sum::<f32>() / pixels;

    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let mut rgb = [
            p[0] as f32 * brightness,
            p[1] as f32 * brightness,
            p[2] as f32 * brightness,
        ];
        for v in rgb.iter_mut() {
            *v = mean_gray + (*v - mean_gray) * contrast;
        }
        let gray = 0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2];
        for v in rgb.iter_mut() {
            *v = gray + (*v - gray) * saturation;
        }
        Rgb(rgb.map(|v| v.clamp(0.0, 255.0).round() as u8))
    })
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// CHW に並べ替えて ImageNet 正規化
pub fn to_chw_normalized(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let num_pixels = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            data[c * num_pixels + i] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    data
}
