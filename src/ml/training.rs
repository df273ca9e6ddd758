//! モデル学習
//!
//! Adam + 交差エントロピーの独自ループで学習し、検証損失で学習率を調整する。
//! 検証精度が更新されるたびにベストモデルをメタデータ付きで保存し、
//! 学習後にテストデータで評価して最終モデルを重みのみで保存する。

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use crate::dataset::augmentation::AugmentationConfig;
use crate::evaluation::{classification_report, ClassificationMetrics, ConfusionMatrix};
use crate::ml::data::{ImageBatcher, ImageFolderDataset, ImageItem};
use crate::ml::ml_model::{CatDogCnn, ModelConfig};
use crate::ml::scheduler::PlateauScheduler;
use crate::model::config::AppConfig;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{save_bare_weights, save_model_with_metadata};
use crate::model::MODEL_TYPE;
use crate::tracking::{EpochRecord, ExperimentTracker, RunStatus, RunTracker};
use crate::types::Split;

/// ベストモデルのファイル名
pub const BEST_MODEL_FILE: &str = "best_model.tar.gz";
/// 最終モデルのファイル名
pub const FINAL_MODEL_FILE: &str = "final_model.bin";

/// 1回の評価結果
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    pub loss: f64,
    pub accuracy: f64,
    pub y_true: Vec<usize>,
    pub y_pred: Vec<usize>,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub run_name: String,
    pub run_dir: PathBuf,
    pub history: Vec<EpochRecord>,
    pub best_val_acc: f64,
    pub test_metrics: ClassificationMetrics,
    pub confusion_matrix: ConfusionMatrix,
    pub best_model_path: Option<PathBuf>,
    pub final_model_path: PathBuf,
}

/// モデルの重みをバイト列に変換
pub fn model_to_bytes<B: Backend>(model: CatDogCnn<B>) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
}

/// 設定に従ってモデルを学習する
pub fn train_model<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> Result<TrainingReport> {
    let tracker = ExperimentTracker::new(
        config.tracking.tracking_dir.clone(),
        config.tracking.experiment_name.clone(),
    );
    let mut run = tracker.start_run(None)?;

    match run_training::<B>(config, &device, &mut run) {
        Ok(report) => {
            run.finish(RunStatus::Finished)?;
            Ok(report)
        }
        Err(e) => {
            if let Err(finish_err) = run.finish(RunStatus::Failed) {
                warn!("ランの終了記録に失敗しました: {}", finish_err);
            }
            Err(e)
        }
    }
}

fn run_training<B: AutodiffBackend>(
    config: &AppConfig,
    device: &B::Device,
    run: &mut RunTracker,
) -> Result<TrainingReport> {
    let settings = &config.training;
    let image_size = config.image.size();
    if image_size.height != image_size.width {
        anyhow::bail!("入力画像は正方形である必要があります: {}", image_size);
    }
    if settings.batch_size == 0 {
        anyhow::bail!("バッチサイズは1以上である必要があります");
    }

    let processed = &config.paths.processed_dir;
    let train_set = ImageFolderDataset::new(&processed.join(Split::Train.dir_name()))?;
    let class_names = train_set.class_names().to_vec();
    if class_names != config.classes {
        warn!(
            "学習データのクラス {:?} が設定 {:?} と異なります。学習データの順序を使用します",
            class_names, config.classes
        );
    }
    let val_set = ImageFolderDataset::with_classes(&processed.join(Split::Val.dir_name()), &class_names)?;
    let test_set = ImageFolderDataset::with_classes(&processed.join(Split::Test.dir_name()), &class_names)?;

    info!("Train samples: {}", train_set.len());
    info!("Val samples: {}", val_set.len());
    info!("Test samples: {}", test_set.len());

    run.log_param("model_architecture", MODEL_TYPE)?;
    run.log_param("num_classes", class_names.len())?;
    run.log_param("class_names", &class_names)?;
    run.log_param("batch_size", settings.batch_size)?;
    run.log_param("epochs", settings.num_epochs)?;
    run.log_param("learning_rate", settings.learning_rate)?;
    run.log_param("optimizer", "Adam")?;
    run.log_param("scheduler", "ReduceLROnPlateau(factor=0.5, patience=3)")?;
    run.log_param("image_size", image_size.height)?;
    run.log_param("dropout", config.model.dropout)?;
    run.log_param("seed", settings.seed)?;
    run.log_param("device", settings.device_type.to_string())?;

    let model_config = ModelConfig::new(class_names.len())
        .with_dropout(config.model.dropout)
        .with_image_size(image_size.height as usize);
    let mut model: CatDogCnn<B> = model_config.init(device)?;
    info!("モデルパラメータ数: {}", model.num_params());

    let mut optimizer = AdamConfig::new().init();
    let mut scheduler = PlateauScheduler::new(settings.learning_rate);

    let train_batcher = ImageBatcher::train(image_size, AugmentationConfig::default(), settings.seed);
    let eval_batcher = ImageBatcher::eval(image_size);

    let models_dir = &config.paths.models_dir;
    std::fs::create_dir_all(models_dir)
        .with_context(|| format!("モデル保存先を作成できません: {}", models_dir.display()))?;

    let mut epoch_rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let mut history = Vec::with_capacity(settings.num_epochs);
    let mut best_val_acc = 0.0f64;
    let mut best_model_path = None;

    for epoch in 0..settings.num_epochs {
        let started = Instant::now();
        let learning_rate = scheduler.lr();

        let mut indices: Vec<usize> = (0..train_set.len()).collect();
        indices.shuffle(&mut epoch_rng);

        let mut epoch_loss = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;
        let mut num_batches = 0usize;

        for chunk in indices.chunks(settings.batch_size) {
            let items: Vec<ImageItem> = chunk.iter().filter_map(|&i| train_set.get(i)).collect();
            if items.is_empty() {
                continue;
            }
            let batch = Batcher::<B, _, _>::batch(&train_batcher, items, device);

            let output = model.forward_classification(batch.images, batch.targets);
            let loss_value: f64 = output.loss.clone().into_scalar().elem();
            epoch_loss += loss_value;
            num_batches += 1;

            let predictions = argmax_labels::<B>(output.output.clone());
            let targets = int_labels::<B>(output.targets.clone());
            correct += predictions.iter().zip(&targets).filter(|(p, t)| p == t).count();
            seen += targets.len();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(learning_rate, model, grads);
        }

        let train_loss = epoch_loss / num_batches.max(1) as f64;
        let train_acc = correct as f64 / seen.max(1) as f64;

        let val = evaluate(&model.valid(), &val_set, &eval_batcher, settings.batch_size, device);
        scheduler.step(val.loss);

        let record = EpochRecord {
            epoch: epoch + 1,
            train_loss,
            train_acc,
            val_loss: val.loss,
            val_acc: val.accuracy,
            learning_rate,
        };
        history.push(record);

        run.log_metric("train_loss", train_loss, epoch)?;
        run.log_metric("train_acc", train_acc, epoch)?;
        run.log_metric("val_loss", val.loss, epoch)?;
        run.log_metric("val_acc", val.accuracy, epoch)?;
        run.log_metric("learning_rate", learning_rate, epoch)?;

        info!(
            "Epoch {}/{}: train loss {:.4} acc {:.4} | val loss {:.4} acc {:.4} | lr {:.6} ({:.1}s)",
            epoch + 1,
            settings.num_epochs,
            train_loss,
            train_acc,
            val.loss,
            val.accuracy,
            learning_rate,
            started.elapsed().as_secs_f64()
        );

        if val.accuracy > best_val_acc {
            best_val_acc = val.accuracy;
            let metadata = ModelMetadata::new(
                class_names.clone(),
                image_size,
                config.model.dropout,
                settings.num_epochs as u32,
            )
            .with_validation((epoch + 1) as u32, val.accuracy, val.loss);
            let bytes = model_to_bytes(model.valid())?;
            let path = save_model_with_metadata(&models_dir.join(BEST_MODEL_FILE), &metadata, &bytes)?;
            info!("  ✓ ベストモデルを保存しました (Val Acc: {:.4})", val.accuracy);
            best_model_path = Some(path);
        }
    }

    info!("Best validation accuracy: {:.4}", best_val_acc);
    run.log_history(&history)?;

    // テストデータで最終モデルを評価
    let test = evaluate(&model.valid(), &test_set, &eval_batcher, settings.batch_size, device);
    let test_metrics = ClassificationMetrics::binary(&test.y_true, &test.y_pred);
    let confusion_matrix =
        ConfusionMatrix::from_predictions(&test.y_true, &test.y_pred, class_names.len());
    let report = classification_report(&test.y_true, &test.y_pred, &class_names);

    info!("Test loss: {:.4}", test.loss);
    run.log_metric("test_loss", test.loss, settings.num_epochs)?;
    for (key, value) in test_metrics.as_pairs() {
        info!("{}: {:.4}", key, value);
        run.log_metric(key, value, settings.num_epochs)?;
    }
    println!("\nClassification Report:");
    println!("{}", "=".repeat(60));
    println!("{}", report);

    run.log_json("confusion_matrix.json", &confusion_matrix)?;
    run.log_text("classification_report.txt", &report)?;

    let final_model_path = models_dir.join(FINAL_MODEL_FILE);
    save_bare_weights(&final_model_path, &model_to_bytes(model.valid())?)?;
    run.log_artifact(&final_model_path)?;
    if let Some(path) = &best_model_path {
        run.log_artifact(path)?;
    }

    info!("✓ 学習が完了しました。モデル保存先: {}", models_dir.display());

    Ok(TrainingReport {
        run_name: run.run_name().to_string(),
        run_dir: run.dir().to_path_buf(),
        history,
        best_val_acc,
        test_metrics,
        confusion_matrix,
        best_model_path,
        final_model_path,
    })
}

/// データセット全体を評価する
pub fn evaluate<B: Backend>(
    model: &CatDogCnn<B>,
    dataset: &ImageFolderDataset,
    batcher: &ImageBatcher,
    batch_size: usize,
    device: &B::Device,
) -> EvalOutcome {
    let len = dataset.len();
    let mut outcome = EvalOutcome::default();
    let mut total_loss = 0.0f64;
    let mut num_batches = 0usize;

    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(len);
        let items: Vec<ImageItem> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }

        let batch = Batcher::<B, _, _>::batch(batcher, items, device);
        let output = model.forward_classification(batch.images, batch.targets);
        let loss_value: f64 = output.loss.into_scalar().elem();
        total_loss += loss_value;
        num_batches += 1;

        outcome.y_pred.extend(argmax_labels::<B>(output.output));
        outcome.y_true.extend(int_labels::<B>(output.targets));
    }

    let correct = outcome
        .y_true
        .iter()
        .zip(&outcome.y_pred)
        .filter(|(t, p)| t == p)
        .count();
    outcome.loss = total_loss / num_batches.max(1) as f64;
    outcome.accuracy = correct as f64 / outcome.y_true.len().max(1) as f64;
    outcome
}

fn argmax_labels<B: Backend>(logits: burn::tensor::Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|v| v as usize)
        .collect()
}

fn int_labels<B: Backend>(labels: burn::tensor::Tensor<B, 1, burn::tensor::Int>) -> Vec<usize> {
    labels.into_data().iter::<i64>().map(|v| v as usize).collect()
}
