//! 学習用データセットとバッチャー
//!
//! `{split_dir}/{class}/{file}` 形式のディレクトリを読み込み、テンソルのバッチに変換します。

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::dataset::augmentation::{eval_transform, train_transform, AugmentationConfig};
use crate::dataset::normalizer::decode_path;
use crate::dataset::scanner::scan_images;
use crate::types::ImageSize;

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

/// ラベル付き画像フォルダ
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    samples: Vec<ImageItem>,
    class_names: Vec<String>,
}

impl ImageFolderDataset {
    /// サブディレクトリをクラスとして読み込む（名前順にラベルを割り当て）
    pub fn new(split_dir: &Path) -> Result<Self> {
        let mut class_names = Vec::new();
        for entry in std::fs::read_dir(split_dir)
            .with_context(|| format!("ディレクトリを読み込めません: {}", split_dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                if let Some(name) = path.file_name() {
                    class_names.push(name.to_string_lossy().to_string());
                }
            }
        }
        class_names.sort();
        Self::with_classes(split_dir, &class_names)
    }

    /// 指定した順序でクラスを読み込む（存在しないクラスは0枚として扱う）
    pub fn with_classes(split_dir: &Path, class_names: &[String]) -> Result<Self> {
        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = split_dir.join(class_name);
            if !class_dir.is_dir() {
                warn!("クラスディレクトリが存在しません: {}", class_dir.display());
                continue;
            }
            for file in scan_images(&class_dir)? {
                samples.push(ImageItem {
                    path: file.path().to_path_buf(),
                    label,
                });
            }
        }

        if samples.is_empty() {
            anyhow::bail!("画像が見つかりません: {}", split_dir.display());
        }

        let dataset = Self {
            samples,
            class_names: class_names.to_vec(),
        };
        dataset.log_summary(split_dir);
        Ok(dataset)
    }

    fn log_summary(&self, split_dir: &Path) {
        info!(
            "{}: {} 枚 / {} クラス",
            split_dir.display(),
            self.samples.len(),
            self.class_names.len()
        );
        for (i, name) in self.class_names.iter().enumerate() {
            let count = self.samples.iter().filter(|s| s.label == i).count();
            info!("  Class {}: {} ({} samples)", i, name, count);
        }
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
///
/// 学習用はシード固定の乱数でデータ拡張を行い、評価用は拡張なし。
#[derive(Clone)]
pub struct ImageBatcher {
    image_size: ImageSize,
    augmentation: Option<(AugmentationConfig, Arc<Mutex<ChaCha8Rng>>)>,
}

impl ImageBatcher {
    pub fn eval(image_size: ImageSize) -> Self {
        Self {
            image_size,
            augmentation: None,
        }
    }

    pub fn train(image_size: ImageSize, config: AugmentationConfig, seed: u64) -> Self {
        Self {
            image_size,
            augmentation: Some((config, Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))))),
        }
    }

    /// 1枚分の CHW データ（読み込み失敗時は `None`）
    fn load(&self, item: &ImageItem) -> Option<Vec<f32>> {
        let img = match decode_path(&item.path) {
            Ok(img) => img,
            Err(e) => {
                warn!("画像読み込み失敗 {}: {}", item.path.display(), e);
                return None;
            }
        };

        Some(match &self.augmentation {
            Some((config, rng)) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                train_transform(&img, self.image_size, config, &mut *rng)
            }
            None => eval_transform(&img, self.image_size),
        })
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let height = self.image_size.height as usize;
        let width = self.image_size.width as usize;
        let per_image = 3 * height * width;

        let mut all_pixels = Vec::with_capacity(batch_size * per_image);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in &items {
            match self.load(item) {
                Some(data) => all_pixels.extend_from_slice(&data),
                // エラーの場合はゼロで埋める
                None => all_pixels.extend(std::iter::repeat(0.0f32).take(per_image)),
            }
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 3, height, width]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};
    use std::fs;

    type TestBackend = NdArray<f32>;

    fn make_split(root: &Path) {
        for (class, n) in [("dog", 2), ("cat", 3)] {
            let dir = root.join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..n {
                RgbImage::from_pixel(20, 20, Rgb([i as u8 * 50, 0, 0]))
                    .save(dir.join(format!("{}.{}.png", class, i)))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_classes_sorted_and_labeled() {
        let tmp = tempfile::tempdir().unwrap();
        make_split(tmp.path());
        let dataset = ImageFolderDataset::new(tmp.path()).unwrap();
        assert_eq!(dataset.class_names(), ["cat", "dog"]);
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.get(0).unwrap().label, 0);
        assert_eq!(dataset.get(4).unwrap().label, 1);
        assert!(dataset.get(5).is_none());
    }

    #[test]
    fn test_empty_split_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("cat")).unwrap();
        assert!(ImageFolderDataset::new(tmp.path()).is_err());
    }

    #[test]
    fn test_batch_shapes_and_unreadable_file() {
        let tmp = tempfile::tempdir().unwrap();
        make_split(tmp.path());
        // JPEGの中身をPNGの名前で保存しても読める
        let jpeg_path = tmp.path().join("cat/renamed.png");
        let bytes = {
            let mut buf = std::io::Cursor::new(Vec::new());
            RgbImage::from_pixel(20, 20, Rgb([0, 200, 0]))
                .write_to(&mut buf, image::ImageFormat::Jpeg)
                .unwrap();
            buf.into_inner()
        };
        fs::write(&jpeg_path, bytes).unwrap();
        fs::write(tmp.path().join("cat/broken.jpg"), b"nope").unwrap();

        let items = vec![
            ImageItem { path: jpeg_path, label: 0 },
            ImageItem { path: tmp.path().join("cat/broken.jpg"), label: 0 },
            ImageItem { path: tmp.path().join("dog/dog.0.png"), label: 1 },
        ];

        let device = NdArrayDevice::default();
        let batcher = ImageBatcher::eval(ImageSize::square(16));
        let batch: ImageBatch<TestBackend> = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 16, 16]);
        assert_eq!(batch.targets.dims(), [3]);

        let values: Vec<f32> = batch.images.into_data().iter::<f32>().collect();
        let per_image = 3 * 16 * 16;
        // 読めなかった画像はゼロ
        assert!(values[per_image..2 * per_image].iter().all(|&v| v == 0.0));
        assert!(values[..per_image].iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_train_batcher_shape() {
        let tmp = tempfile::tempdir().unwrap();
        make_split(tmp.path());
        let dataset = ImageFolderDataset::new(tmp.path()).unwrap();
        let items: Vec<_> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();

        let batcher = ImageBatcher::train(ImageSize::square(16), AugmentationConfig::default(), 7);
        let batch: ImageBatch<TestBackend> = batcher.batch(items, &NdArrayDevice::default());
        assert_eq!(batch.images.dims(), [5, 3, 16, 16]);
    }
}
