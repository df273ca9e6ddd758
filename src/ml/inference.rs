//! モデル推論機能

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::dataset::augmentation::eval_transform;
use crate::dataset::normalizer::decode_path;
use crate::ml::ml_model::{CatDogCnn, ModelConfig};
use crate::ml::training::{BEST_MODEL_FILE, FINAL_MODEL_FILE};
use crate::model::config::{AppConfig, DeviceType};
use crate::model::model_storage::load_checkpoint;
use crate::model::{InferenceConfig, MODEL_TYPE};
use crate::service::state::{Classifier, ModelInfo};
use crate::types::Prediction;

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: Mutex<CatDogCnn<B>>,
    config: InferenceConfig,
    device: B::Device,
    checkpoint_path: PathBuf,
}

impl<B: Backend> InferenceEngine<B> {
    /// チェックポイントを読み込んで推論エンジンを初期化
    pub fn load(model_path: &Path, app_config: &AppConfig, device: B::Device) -> Result<Self> {
        let checkpoint = load_checkpoint(model_path)?;
        let config = InferenceConfig::resolve(&checkpoint, app_config)?;
        if config.image_size.height != config.image_size.width {
            anyhow::bail!("入力画像は正方形である必要があります: {}", config.image_size);
        }

        // 推論時はドロップアウトなし
        let model_config = ModelConfig::new(config.num_classes())
            .with_dropout(0.0)
            .with_image_size(config.image_size.height as usize);
        let model: CatDogCnn<B> = model_config.init(&device)?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(checkpoint.into_weights(), &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        info!(
            "モデルを読み込みました: {} ({}, クラス: {:?})",
            model_path.display(),
            config.checkpoint_kind,
            config.class_names
        );

        Ok(Self {
            model: Mutex::new(model),
            config,
            device,
            checkpoint_path: model_path.to_path_buf(),
        })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// デコード済み画像を分類
    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        let size = self.config.image_size;
        let data = eval_transform(image, size);
        let tensor = Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([
            1,
            3,
            size.height as usize,
            size.width as usize,
        ]);

        let probabilities: Vec<f32> = {
            let model = self
                .model
                .lock()
                .map_err(|_| anyhow::anyhow!("モデルのロックに失敗しました"))?;
            model.forward_softmax(tensor).into_data().iter::<f32>().collect()
        };

        Prediction::from_probabilities(&probabilities, &self.config.class_names).ok_or_else(|| {
            anyhow::anyhow!(
                "出力次元 {} がクラス数 {} と一致しません",
                probabilities.len(),
                self.config.num_classes()
            )
        })
    }

    /// エンコード済みバイト列を分類
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let image = image::load_from_memory(bytes).context("画像をデコードできません")?;
        self.predict_image(&image)
    }

    /// 画像ファイルを分類
    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        let image = decode_path(path)?;
        self.predict_image(&image)
    }
}

impl<B: Backend> Classifier for InferenceEngine<B> {
    fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        self.predict_image(image)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            model_type: MODEL_TYPE.to_string(),
            input_size: self.config.image_size.to_string(),
            classes: self.config.class_names.clone(),
            device: format!("{:?}", self.device),
            checkpoint: self.config.checkpoint_kind.to_string(),
        }
    }
}

/// デバイス種別に応じたバックエンドで分類器を読み込む
pub fn load_classifier(
    device_type: DeviceType,
    model_path: &Path,
    config: &AppConfig,
) -> Result<Arc<dyn Classifier>> {
    Ok(match device_type {
        DeviceType::Wgpu => Arc::new(InferenceEngine::<Wgpu>::load(
            model_path,
            config,
            WgpuDevice::default(),
        )?),
        DeviceType::Cpu => Arc::new(InferenceEngine::<NdArray<f32>>::load(
            model_path,
            config,
            NdArrayDevice::default(),
        )?),
    })
}

/// `models_dir` から最良モデル、なければ最終モデルを探して読み込む
///
/// どちらも読めない場合は `None`（サービスはモデルなしで起動する）。
pub fn load_from_models_dir(config: &AppConfig) -> Option<Arc<dyn Classifier>> {
    let device_type = config.training.device_type;
    for file_name in [BEST_MODEL_FILE, FINAL_MODEL_FILE] {
        let path = config.paths.models_dir.join(file_name);
        if !path.exists() {
            continue;
        }
        match load_classifier(device_type, &path, config) {
            Ok(classifier) => return Some(classifier),
            Err(e) => warn!("モデルを読み込めません {}: {:#}", path.display(), e),
        }
    }
    warn!(
        "モデルが見つかりません: {}。モデルなしで起動します",
        config.paths.models_dir.display()
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::training::model_to_bytes;
    use crate::model::{save_bare_weights, save_model_with_metadata, ModelMetadata};
    use crate::types::ImageSize;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.image.height = 32;
        config.image.width = 32;
        config.training.device_type = DeviceType::Cpu;
        config
    }

    fn weights() -> Vec<u8> {
        let model: CatDogCnn<TestBackend> = ModelConfig::new(2)
            .with_image_size(32)
            .init(&NdArrayDevice::default())
            .unwrap();
        model_to_bytes(model).unwrap()
    }

    #[test]
    fn test_packaged_checkpoint_prediction() {
        let tmp = tempfile::tempdir().unwrap();
        let metadata = ModelMetadata::new(
            vec!["cat".to_string(), "dog".to_string()],
            ImageSize::square(32),
            0.5,
            1,
        );
        let path = save_model_with_metadata(&tmp.path().join("best_model.tar.gz"), &metadata, &weights())
            .unwrap();

        // 設定の入力サイズより、メタデータが優先される
        let engine =
            InferenceEngine::<TestBackend>::load(&path, &AppConfig::default(), NdArrayDevice::default())
                .unwrap();
        assert_eq!(engine.config().checkpoint_kind, "packaged");

        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 40, Rgb([120, 80, 40])));
        let prediction = engine.predict_image(&image).unwrap();
        assert!(["cat", "dog"].contains(&prediction.predicted_class.as_str()));
        let sum: f32 = prediction.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-4);

        let info = engine.info();
        assert_eq!(info.model_type, "CatDogCNN");
        assert_eq!(info.input_size, "32x32");
    }

    #[test]
    fn test_bare_weights_use_app_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("final_model.bin");
        save_bare_weights(&path, &weights()).unwrap();

        let engine =
            InferenceEngine::<TestBackend>::load(&path, &small_config(), NdArrayDevice::default()).unwrap();
        assert_eq!(engine.config().checkpoint_kind, "bare");
        assert_eq!(engine.config().class_names, ["cat", "dog"]);
        assert!(engine.predict_bytes(b"not an image").is_err());

        // JPEG の中身を .png の名前で保存しても読める
        let image_path = tmp.path().join("cat.0.png");
        let mut buf = std::io::Cursor::new(Vec::new());
        RgbImage::from_pixel(40, 40, Rgb([200, 100, 50]))
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        std::fs::write(&image_path, buf.into_inner()).unwrap();
        let from_path = engine.predict_path(&image_path).unwrap();
        assert_eq!(from_path.probabilities.len(), 2);
        assert!(engine.predict_path(&tmp.path().join("missing.png")).is_err());
    }

    #[test]
    fn test_models_dir_without_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.paths.models_dir = tmp.path().to_path_buf();
        assert!(load_from_models_dir(&config).is_none());

        save_bare_weights(&tmp.path().join(FINAL_MODEL_FILE), &weights()).unwrap();
        assert!(load_from_models_dir(&config).is_some());
    }
}
