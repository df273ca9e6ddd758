pub mod config;
pub mod inference_config;
pub mod model_metadata;
pub mod model_storage;

pub use config::{
    ApiSettings, AppConfig, DeviceType, ImageSettings, ModelSettings, PathSettings, SplitSettings,
    TrackingSettings, TrainingSettings,
};
pub use inference_config::{InferenceConfig, MODEL_TYPE};
pub use model_metadata::ModelMetadata;
pub use model_storage::{
    load_checkpoint, load_model_with_metadata, print_checkpoint_info,
    print_metadata_info, save_bare_weights, save_model_with_metadata, Checkpoint,
};
