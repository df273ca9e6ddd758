//! 犬猫分類器 CLI
//!
//! 前処理・学習・推論・APIサーバーをサブコマンドとして提供する。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pet_classifier_lib::dataset::{preprocess_dataset, PreprocessOptions, SplitRatios};
use pet_classifier_lib::model::{load_checkpoint, print_checkpoint_info, AppConfig, DeviceType};
use pet_classifier_lib::service::{self, RequestLogger, ServiceState};
use pet_classifier_lib::types::ImageSize;

#[derive(Parser, Debug)]
#[command(name = "pet_classifier", version, about = "Cats vs Dogs classifier", long_about = None)]
struct Cli {
    /// 設定ファイル（JSON）
    #[arg(short, long, default_value_os_t = AppConfig::default_path())]
    config: PathBuf,

    /// デバッグログを出力
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 生画像を train/val/test に分割して正規化
    Preprocess {
        #[arg(long)]
        raw_dir: Option<PathBuf>,

        #[arg(long)]
        processed_dir: Option<PathBuf>,

        /// 出力サイズ（正方形）
        #[arg(long)]
        size: Option<u32>,

        /// train,val,test
        #[arg(long, value_delimiter = ',')]
        ratios: Option<Vec<f64>>,

        #[arg(long)]
        seed: Option<u64>,

        /// クラス名（カンマ区切り）
        #[arg(long, value_delimiter = ',')]
        classes: Option<Vec<String>>,

        /// 並列数（0 = 論理コア数）
        #[arg(long, default_value = "0")]
        workers: usize,
    },

    /// 前処理済みデータでモデルを学習
    Train {
        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        learning_rate: Option<f64>,

        /// wgpu / cpu
        #[arg(long)]
        device: Option<DeviceType>,
    },

    /// 1枚の画像を分類
    Predict {
        #[arg(short, long)]
        image: PathBuf,

        /// 省略時は models_dir の best_model.tar.gz
        #[arg(short, long)]
        model: Option<PathBuf>,

        #[arg(long)]
        device: Option<DeviceType>,
    },

    /// 推論APIサーバーを起動
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// 省略時は models_dir から探す
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// 設定とチェックポイントの情報を表示
    Info {
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(&cli.config)?;
    config.apply_env_overrides()?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Preprocess {
            raw_dir,
            processed_dir,
            size,
            ratios,
            seed,
            classes,
            workers,
        } => {
            let mut options = PreprocessOptions::from_config(&config);
            if let Some(dir) = raw_dir {
                options.raw_dir = dir;
            }
            if let Some(dir) = processed_dir {
                options.processed_dir = dir;
            }
            if let Some(size) = size {
                options.image_size = ImageSize::square(size);
            }
            if let Some(r) = ratios {
                let &[train, val, test] = r.as_slice() else {
                    anyhow::bail!("--ratios は train,val,test の3値で指定してください");
                };
                options.ratios = SplitRatios::new(train, val, test)?;
            }
            if let Some(seed) = seed {
                options.seed = seed;
            }
            if let Some(classes) = classes {
                options.class_names = classes;
            }
            run_preprocess(options, workers)
        }
        Commands::Train {
            epochs,
            batch_size,
            learning_rate,
            device,
        } => {
            if let Some(epochs) = epochs {
                config.training.num_epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(lr) = learning_rate {
                config.training.learning_rate = lr;
            }
            if let Some(device) = device {
                config.training.device_type = device;
            }
            run_train(&config)
        }
        Commands::Predict { image, model, device } => {
            if let Some(device) = device {
                config.training.device_type = device;
            }
            let model = model.unwrap_or_else(|| config.paths.models_dir.join("best_model.tar.gz"));
            run_predict(&config, &model, &image)
        }
        Commands::Serve { host, port, model } => {
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            run_serve(config, model)
        }
        Commands::Info { model } => {
            config.display();
            if let Some(path) = model {
                let checkpoint = load_checkpoint(&path)?;
                print_checkpoint_info(&path, &checkpoint);
            }
            Ok(())
        }
    }
}

/// `RUST_LOG` があれば優先し、なければ設定のログレベルを使う
fn init_logging(config: &AppConfig, verbose: bool) {
    let default_filter = if verbose {
        "debug".to_string()
    } else {
        config.log_filter()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_preprocess(options: PreprocessOptions, workers: usize) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("スレッドプールを作成できません")?;
    let summary = pool.install(|| preprocess_dataset(options))?;

    for (class_name, class_summary) in &summary.classes {
        info!("{}: {} 枚を処理", class_name, class_summary.scanned);
    }
    Ok(())
}

#[cfg(feature = "ml")]
fn run_train(config: &AppConfig) -> Result<()> {
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use burn_wgpu::{Wgpu, WgpuDevice};
    use pet_classifier_lib::ml::train_model;

    info!("学習を開始します（デバイス: {}）", config.training.device_type);
    let report = match config.training.device_type {
        DeviceType::Wgpu => train_model::<Autodiff<Wgpu>>(config, WgpuDevice::default())?,
        DeviceType::Cpu => train_model::<Autodiff<NdArray<f32>>>(config, NdArrayDevice::default())?,
    };

    println!("\n=== 学習完了 ===");
    println!("ラン: {} ({})", report.run_name, report.run_dir.display());
    println!("最良検証精度: {:.4}", report.best_val_acc);
    for (name, value) in report.test_metrics.as_pairs() {
        println!("{}: {:.4}", name, value);
    }
    if let Some(path) = &report.best_model_path {
        println!("最良モデル: {}", path.display());
    }
    println!("最終モデル: {}", report.final_model_path.display());
    Ok(())
}

#[cfg(not(feature = "ml"))]
fn run_train(_config: &AppConfig) -> Result<()> {
    anyhow::bail!("学習には `ml` フィーチャーが必要です")
}

#[cfg(feature = "ml")]
fn run_predict(config: &AppConfig, model: &Path, image: &Path) -> Result<()> {
    use burn_ndarray::{NdArray, NdArrayDevice};
    use burn_wgpu::{Wgpu, WgpuDevice};

    match config.training.device_type {
        DeviceType::Wgpu => predict_with::<Wgpu>(config, model, image, WgpuDevice::default()),
        DeviceType::Cpu => predict_with::<NdArray<f32>>(config, model, image, NdArrayDevice::default()),
    }
}

#[cfg(feature = "ml")]
fn predict_with<B: burn::tensor::backend::Backend>(
    config: &AppConfig,
    model: &Path,
    image: &Path,
    device: B::Device,
) -> Result<()> {
    let engine = pet_classifier_lib::ml::InferenceEngine::<B>::load(model, config, device)?;
    engine.config().print_info();
    let prediction = engine.predict_path(image)?;

    println!("画像: {}", image.display());
    println!(
        "予測: {} (確信度 {:.2}%)",
        prediction.predicted_class,
        prediction.confidence * 100.0
    );
    for (class_name, p) in &prediction.probabilities {
        println!("  {}: {:.4}", class_name, p);
    }
    Ok(())
}

#[cfg(not(feature = "ml"))]
fn run_predict(_config: &AppConfig, _model: &Path, _image: &Path) -> Result<()> {
    anyhow::bail!("推論には `ml` フィーチャーが必要です")
}

fn run_serve(config: AppConfig, model: Option<PathBuf>) -> Result<()> {
    let classifier = load_service_classifier(&config, model)?;
    let state = ServiceState::new(classifier, &config.classes)
        .with_request_logger(RequestLogger::in_dir(&config.paths.logs_dir)?);
    let metrics_path = config.paths.logs_dir.join("metrics.json");

    let runtime = tokio::runtime::Runtime::new().context("Tokioランタイムを作成できません")?;
    runtime.block_on(service::start_server(
        &config.api.bind_address(),
        state,
        Some(metrics_path),
    ))
}

#[cfg(feature = "ml")]
fn load_service_classifier(
    config: &AppConfig,
    model: Option<PathBuf>,
) -> Result<Option<std::sync::Arc<dyn service::Classifier>>> {
    use pet_classifier_lib::ml::{load_classifier, load_from_models_dir};

    Ok(match model {
        Some(path) => Some(load_classifier(config.training.device_type, &path, config)?),
        None => load_from_models_dir(config),
    })
}

#[cfg(not(feature = "ml"))]
fn load_service_classifier(
    _config: &AppConfig,
    _model: Option<PathBuf>,
) -> Result<Option<std::sync::Arc<dyn service::Classifier>>> {
    tracing::warn!("`ml` フィーチャーが無効のため、モデルなしで起動します");
    Ok(None)
}
