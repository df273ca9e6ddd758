//! 前処理パイプラインの結合テスト

use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use pet_classifier_lib::dataset::{
    decode_path, preprocess_dataset, scan_images, split_files, DatasetTree, PreprocessOptions, SplitRatios,
};
use pet_classifier_lib::types::{ImageSize, Split};
use pet_classifier_lib::PipelineError;
use std::fs;
use std::path::Path;

const CLASSES: [&str; 2] = ["cat", "dog"];

fn make_raw(raw: &Path, per_class: usize) {
    for class_name in CLASSES {
        let dir = raw.join(class_name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let shade = (i * 2) as u8;
            match i % 3 {
                0 => RgbImage::from_pixel(40, 30, Rgb([shade, 100, 200]))
                    .save_with_format(dir.join(format!("{class_name}.{i}.jpg")), ImageFormat::Jpeg)
                    .unwrap(),
                1 => RgbImage::from_pixel(25, 50, Rgb([200, shade, 50]))
                    .save(dir.join(format!("{class_name}.{i}.png")))
                    .unwrap(),
                _ => RgbaImage::from_pixel(33, 33, Rgba([10, 20, shade, 128]))
                    .save(dir.join(format!("{class_name}.{i}.png")))
                    .unwrap(),
            }
        }
        // 画像以外は無視される
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }
}

fn options(root: &Path) -> PreprocessOptions {
    PreprocessOptions {
        raw_dir: root.join("raw"),
        processed_dir: root.join("processed"),
        class_names: CLASSES.iter().map(|s| s.to_string()).collect(),
        image_size: ImageSize::square(16),
        ratios: SplitRatios::default(),
        seed: 42,
        show_progress: false,
    }
}

fn membership(processed: &Path) -> Vec<(Split, String, Vec<String>)> {
    let tree = DatasetTree::new(processed);
    let mut all = Vec::new();
    for split in Split::ALL {
        for class_name in CLASSES {
            all.push((split, class_name.to_string(), tree.file_names(split, class_name).unwrap()));
        }
    }
    all
}

#[test]
fn test_hundred_per_class_split_80_10_10() {
    let tmp = tempfile::tempdir().unwrap();
    make_raw(&tmp.path().join("raw"), 100);

    let summary = preprocess_dataset(options(tmp.path())).unwrap();
    for class_name in CLASSES {
        assert_eq!(summary.final_count(Split::Train, class_name), 80);
        assert_eq!(summary.final_count(Split::Val, class_name), 10);
        assert_eq!(summary.final_count(Split::Test, class_name), 10);
    }

    // 全出力が 16x16 の RGB（.png の名前でも中身は JPEG）
    let sample_dir = tmp.path().join("processed/val/cat");
    for entry in fs::read_dir(&sample_dir).unwrap() {
        let path = entry.unwrap().path();
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8]), "{} is not JPEG", path.display());
        let img = decode_path(&path).unwrap();
        assert_eq!((img.width(), img.height()), (16, 16));
        assert_eq!(img.color(), image::ColorType::Rgb8);
    }

    // 分割間で重複しない
    let all = membership(&tmp.path().join("processed"));
    for class_name in CLASSES {
        let mut names: Vec<&String> = all
            .iter()
            .filter(|(_, c, _)| c == class_name)
            .flat_map(|(_, _, n)| n)
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 100);
    }
}

#[test]
fn test_rerun_gives_identical_membership() {
    let tmp = tempfile::tempdir().unwrap();
    make_raw(&tmp.path().join("raw"), 100);
    let processed = tmp.path().join("processed");

    preprocess_dataset(options(tmp.path())).unwrap();
    let first = membership(&processed);

    // 前回の出力に紛れ込んだファイルは再実行で消える
    fs::write(processed.join("train/cat/stale.jpg"), b"stale").unwrap();

    preprocess_dataset(options(tmp.path())).unwrap();
    assert_eq!(membership(&processed), first);
}

#[test]
fn test_different_seed_changes_membership() {
    let tmp = tempfile::tempdir().unwrap();
    make_raw(&tmp.path().join("raw"), 100);
    let processed = tmp.path().join("processed");

    preprocess_dataset(options(tmp.path())).unwrap();
    let first = membership(&processed);

    let mut opts = options(tmp.path());
    opts.seed = 7;
    preprocess_dataset(opts).unwrap();
    assert_ne!(membership(&processed), first);
}

#[test]
fn test_all_test_dogs_unreadable_is_empty_output() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    make_raw(&raw, 100);

    // 同じシードで分割を計算し、test に入る犬画像を壊す
    let files = scan_images(&raw.join("dog")).unwrap();
    let assignment = split_files(files, &SplitRatios::default(), 42).unwrap();
    assert_eq!(assignment.test.len(), 10);
    for file in &assignment.test {
        fs::write(file.path(), b"corrupted").unwrap();
    }

    let err = preprocess_dataset(options(tmp.path())).unwrap_err();
    match err {
        PipelineError::EmptyOutput { split, class } => {
            assert_eq!(split, Split::Test);
            assert_eq!(class, "dog");
        }
        other => panic!("unexpected error: {other}"),
    }

    // 読めた分は書き出されている
    let tree = DatasetTree::new(tmp.path().join("processed"));
    assert_eq!(tree.count(Split::Train, "dog").unwrap(), 80);
}
