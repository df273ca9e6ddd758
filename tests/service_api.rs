//! 推論APIの結合テスト

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pet_classifier_lib::service::{self, Classifier, ModelInfo, ServiceState};
use pet_classifier_lib::types::Prediction;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

/// 赤みが強ければ cat、そうでなければ dog を返す
struct FakeClassifier {
    classes: Vec<String>,
}

impl Classifier for FakeClassifier {
    fn predict(&self, image: &DynamicImage) -> anyhow::Result<Prediction> {
        let pixel = image.to_rgb8().get_pixel(0, 0).0;
        let cat = if pixel[0] > pixel[2] { 0.9 } else { 0.2 };
        Prediction::from_probabilities(&[cat, 1.0 - cat], &self.classes)
            .ok_or_else(|| anyhow::anyhow!("bad output"))
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            model_type: "CatDogCNN".to_string(),
            input_size: "224x224".to_string(),
            classes: self.classes.clone(),
            device: "Cpu".to_string(),
            checkpoint: "packaged".to_string(),
        }
    }
}

struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn predict(&self, _image: &DynamicImage) -> anyhow::Result<Prediction> {
        anyhow::bail!("backend exploded")
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            model_type: "CatDogCNN".to_string(),
            input_size: "224x224".to_string(),
            classes: vec![],
            device: "Cpu".to_string(),
            checkpoint: "bare".to_string(),
        }
    }
}

fn classes() -> Vec<String> {
    vec!["cat".to_string(), "dog".to_string()]
}

async fn spawn_server(state: ServiceState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        service::serve(listener, state).await.unwrap();
    });
    format!("http://{addr}")
}

fn with_model() -> ServiceState {
    let classifier: Arc<dyn Classifier> = Arc::new(FakeClassifier { classes: classes() });
    ServiceState::new(Some(classifier), &classes())
}

fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(32, 32, Rgb(color))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn image_form(bytes: Vec<u8>, mime: &str) -> Form {
    let part = Part::bytes(bytes).file_name("upload.png").mime_str(mime).unwrap();
    Form::new().part("file", part)
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let base = spawn_server(with_model()).await;
    let body: Value = reqwest::get(format!("{base}/")).await.unwrap().json().await.unwrap();
    assert_eq!(body["message"], "Cats vs Dogs Classifier API");
    assert_eq!(body["endpoints"]["predict"], "/predict");
}

#[tokio::test]
async fn test_health_with_and_without_model() {
    let base = spawn_server(with_model()).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert!(body.get("message").is_none());

    let base = spawn_server(ServiceState::new(None, &classes())).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["message"], "Model not loaded");
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_predict_and_metrics() {
    let tmp = tempfile::tempdir().unwrap();
    let state = with_model().with_request_logger(
        pet_classifier_lib::service::RequestLogger::in_dir(tmp.path()).unwrap(),
    );
    let base = spawn_server(state).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/predict"))
        .multipart(image_form(png_bytes([250, 10, 10]), "image/png"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["predicted_class"], "cat");
    assert_eq!(body["class_index"], 0);
    assert!(body["probabilities"]["dog"].as_f64().unwrap() < 0.5);
    assert!(body["inference_time_ms"].as_f64().unwrap() >= 0.0);
    assert!(body["timestamp"].is_string());

    let resp = client
        .post(format!("{base}/predict"))
        .multipart(image_form(png_bytes([10, 10, 250]), "image/png"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["predicted_class"], "dog");

    let metrics: Value = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["total_requests"], 2);
    assert_eq!(metrics["errors"], 0);
    assert_eq!(metrics["predictions"]["cat"], 1);
    assert_eq!(metrics["predictions"]["dog"], 1);
    assert_eq!(metrics["model_loaded"], true);

    // 1リクエスト1行
    let log_file = std::fs::read_dir(tmp.path()).unwrap().next().unwrap().unwrap().path();
    let content = std::fs::read_to_string(log_file).unwrap();
    assert_eq!(content.lines().count(), 2);
}

#[tokio::test]
async fn test_predict_rejects_non_image() {
    let base = spawn_server(with_model()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/predict"))
        .multipart(image_form(b"hello".to_vec(), "text/plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "File must be an image");

    // 画像と名乗っていてもデコードできなければ 400
    let resp = client
        .post(format!("{base}/predict"))
        .multipart(image_form(b"not really a png".to_vec(), "image/png"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_without_model_is_unavailable() {
    let base = spawn_server(ServiceState::new(None, &classes())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/predict"))
        .multipart(image_form(png_bytes([1, 2, 3]), "image/png"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = client.get(format!("{base}/model-info")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_prediction_failure_counts_as_error() {
    let classifier: Arc<dyn Classifier> = Arc::new(FailingClassifier);
    let base = spawn_server(ServiceState::new(Some(classifier), &classes())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/predict"))
        .multipart(image_form(png_bytes([1, 2, 3]), "image/png"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.text().await.unwrap().contains("backend exploded"));

    let metrics: Value = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["errors"], 1);
    assert_eq!(metrics["error_rate"], 1.0);
}

#[tokio::test]
async fn test_model_info() {
    let base = spawn_server(with_model()).await;
    let body: Value = reqwest::get(format!("{base}/model-info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["model_type"], "CatDogCNN");
    assert_eq!(body["input_size"], "224x224");
    assert_eq!(body["classes"], serde_json::json!(["cat", "dog"]));
}
