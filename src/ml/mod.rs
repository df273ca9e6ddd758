//! 学習と推論（Burn）

pub mod data;
pub mod inference;
pub mod ml_model;
pub mod scheduler;
pub mod training;

pub use data::{ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem};
pub use inference::{load_classifier, load_from_models_dir, InferenceEngine};
pub use ml_model::{CatDogCnn, ModelConfig};
pub use scheduler::PlateauScheduler;
pub use training::{evaluate, model_to_bytes, train_model, TrainingReport, BEST_MODEL_FILE, FINAL_MODEL_FILE};
