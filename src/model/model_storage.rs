//! モデルとメタデータの永続化
//!
//! チェックポイントは2種類：
//! - パッケージ形式: tar.gz に `metadata.json` と `model.bin` を格納（ベストモデル用）
//! - 重みのみ: レコーダーのバイト列をそのまま保存（最終モデル用）
//!
//! 読み込み時はファイル内容から形式を判定し、[`Checkpoint`] として返します。

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 読み込んだチェックポイント
#[derive(Debug, Clone, PartialEq)]
pub enum Checkpoint {
    /// メタデータ付き（tar.gz）
    Packaged {
        metadata: ModelMetadata,
        weights: Vec<u8>,
    },
    /// 重みのみ
    Bare { weights: Vec<u8> },
}

impl Checkpoint {
    pub fn weights(&self) -> &[u8] {
        match self {
            Checkpoint::Packaged { weights, .. } | Checkpoint::Bare { weights } => weights,
        }
    }

    pub fn into_weights(self) -> Vec<u8> {
        match self {
            Checkpoint::Packaged { weights, .. } | Checkpoint::Bare { weights } => weights,
        }
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        match self {
            Checkpoint::Packaged { metadata, .. } => Some(metadata),
            Checkpoint::Bare { .. } => None,
        }
    }

    /// 形式名
    pub fn kind(&self) -> &'static str {
        match self {
            Checkpoint::Packaged { .. } => "packaged",
            Checkpoint::Bare { .. } => "bare",
        }
    }
}

/// `.tar.gz` で終わるパスに揃える
pub fn packaged_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }
    Ok(())
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存先のパスを返す（拡張子が `.gz` でなければ `.tar.gz` を付ける）。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = packaged_path(output_path);
    ensure_parent(&tar_gz_path)?;

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームも閉じる
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// 重みのみを保存
pub fn save_bare_weights(output_path: &Path, model_binary: &[u8]) -> Result<()> {
    ensure_parent(output_path)?;
    fs::write(output_path, model_binary)
        .with_context(|| format!("Failed to write model file: {:?}", output_path))
}

/// tar.gz を展開して (メタデータ, 重み) を取り出す
fn read_package(bytes: &[u8]) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    let mut metadata_opt = None;
    let mut model_binary_opt = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            MODEL_ENTRY => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    Ok((metadata_opt, model_binary_opt))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let bytes = fs::read(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    match read_package(&bytes)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// チェックポイントを読み込み、形式を判定する
///
/// gzipのマジックナンバーで始まり、tarとして読めればパッケージ形式。
/// それ以外は重みのみとして扱う。パッケージ内に必要なエントリが無い場合はエラー。
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read checkpoint: {:?}", path))?;

    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(Checkpoint::Bare { weights: bytes });
    }

    let (metadata, weights) = match read_package(&bytes) {
        Ok(parts) => parts,
        Err(_) => return Ok(Checkpoint::Bare { weights: bytes }),
    };

    match (metadata, weights) {
        (Some(metadata), Some(weights)) => Ok(Checkpoint::Packaged { metadata, weights }),
        (None, _) => Err(anyhow::anyhow!(
            "metadata.json not found in checkpoint: {:?}",
            path
        )),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in checkpoint: {:?}", path)),
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス: {}", metadata.class_names.join(", "));
    println!("モデル入力サイズ: {}x{}", metadata.image_height, metadata.image_width);
    println!("ドロップアウト率: {}", metadata.dropout);
    println!("学習エポック数: {}", metadata.num_epochs);
    if let Some(epoch) = metadata.epoch {
        println!("保存時エポック: {}", epoch);
    }
    if let Some(acc) = metadata.val_acc {
        println!("検証精度: {:.4}", acc);
    }
    if let Some(loss) = metadata.val_loss {
        println!("検証損失: {:.4}", loss);
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

/// チェックポイントの概要を表示
pub fn print_checkpoint_info(path: &Path, checkpoint: &Checkpoint) {
    println!("チェックポイント: {}", path.display());
    println!("形式: {}", checkpoint.kind());
    println!(
        "重みサイズ: {} バイト ({:.2} MB)",
        checkpoint.weights().len(),
        checkpoint.weights().len() as f64 / 1024.0 / 1024.0
    );
    match checkpoint.metadata() {
        Some(metadata) => print_metadata_info(metadata),
        None => println!("メタデータなし（クラスと入力サイズは設定ファイルから取得します）"),
    }
}
