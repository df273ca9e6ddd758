//! 出力データセットのディレクトリ構成 `{split}/{class}/{filename}`

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::types::Split;

#[derive(Debug, Clone)]
pub struct DatasetTree {
    root: PathBuf,
}

impl DatasetTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn split_dir(&self, split: Split) -> PathBuf {
        self.root.join(split.dir_name())
    }

    pub fn class_dir(&self, split: Split, class_name: &str) -> PathBuf {
        self.split_dir(split).join(class_name)
    }

    /// 各 split 配下の既存サブディレクトリを削除し、`{split}/{class}` を作り直す
    ///
    /// 以前の実行で残ったクラスも消えるので、繰り返し実行しても結果が変わらない。
    pub fn reset(&self, class_names: &[String]) -> Result<()> {
        for split in Split::ALL {
            let split_dir = self.split_dir(split);
            if split_dir.is_dir() {
                for entry in fs::read_dir(&split_dir)? {
                    let path = entry?.path();
                    if path.is_dir() {
                        fs::remove_dir_all(&path)?;
                    }
                }
            }
            for class_name in class_names {
                fs::create_dir_all(self.class_dir(split, class_name))?;
            }
        }
        Ok(())
    }

    /// `{split}/{class}` 直下のファイル数（ディレクトリが無ければ0）
    pub fn count(&self, split: Split, class_name: &str) -> Result<usize> {
        let dir = self.class_dir(split, class_name);
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in fs::read_dir(&dir)? {
            if entry?.path().is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// 全 split × class のファイル数
    pub fn counts(&self, class_names: &[String]) -> Result<Vec<(Split, String, usize)>> {
        let mut counts = Vec::new();
        for split in Split::ALL {
            for class_name in class_names {
                counts.push((split, class_name.clone(), self.count(split, class_name)?));
            }
        }
        Ok(counts)
    }

    /// 空の `{split}/{class}` があれば `EmptyOutput` を返す
    pub fn verify_non_empty(&self, class_names: &[String]) -> Result<()> {
        for (split, class, count) in self.counts(class_names)? {
            if count == 0 {
                return Err(PipelineError::EmptyOutput { split, class });
            }
        }
        Ok(())
    }

    /// `{split}/{class}` のファイル名一覧（ソート済み）
    pub fn file_names(&self, split: Split, class_name: &str) -> Result<Vec<String>> {
        let dir = self.class_dir(split, class_name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["cat".to_string(), "dog".to_string()]
    }

    #[test]
    fn test_reset_removes_stale_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = DatasetTree::new(tmp.path());
        fs::create_dir_all(tree.class_dir(Split::Train, "bird")).unwrap();
        fs::create_dir_all(tree.class_dir(Split::Train, "cat")).unwrap();
        fs::write(tree.class_dir(Split::Train, "cat").join("old.jpg"), b"x").unwrap();

        tree.reset(&classes()).unwrap();

        assert!(!tree.class_dir(Split::Train, "bird").exists());
        assert_eq!(tree.count(Split::Train, "cat").unwrap(), 0);
        for split in Split::ALL {
            assert!(tree.class_dir(split, "dog").is_dir());
        }
    }

    #[test]
    fn test_verify_reports_first_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = DatasetTree::new(tmp.path());
        tree.reset(&classes()).unwrap();
        for split in Split::ALL {
            for class in classes() {
                if (split, class.as_str()) != (Split::Test, "dog") {
                    fs::write(tree.class_dir(split, &class).join("1.jpg"), b"x").unwrap();
                }
            }
        }

        match tree.verify_non_empty(&classes()).unwrap_err() {
            PipelineError::EmptyOutput { split, class } => {
                assert_eq!(split, Split::Test);
                assert_eq!(class, "dog");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
