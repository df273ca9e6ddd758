//! シード固定の train/val/test 分割
//!
//! 同じ入力順序・比率・シードからは、プロセスをまたいでも同一の3リストが得られる。
//! 乱数には `ChaCha8Rng` を使う（`StdRng` はバージョン間で出力が保証されない）。

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::Split;

/// 比率の合計に許容する誤差
pub const RATIO_EPSILON: f64 = 1e-6;

/// 分割比率
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

impl SplitRatios {
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self> {
        let ratios = Self { train, val, test };
        ratios.validate()?;
        Ok(ratios)
    }

    /// 各比率が [0, 1] にあり、合計が 1 であることを確認する
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::InvalidConfiguration(format!(
                    "{} の比率は 0.0〜1.0 である必要があります: {}",
                    name, value
                )));
            }
        }

        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() >= RATIO_EPSILON {
            return Err(PipelineError::InvalidConfiguration(format!(
                "分割比率の合計が1になりません: {} + {} + {} = {}",
                self.train, self.val, self.test, sum
            )));
        }
        Ok(())
    }

    /// `n` 件を分割したときの (train_end, val_end)
    ///
    /// 端数はすべて test に回る。
    pub fn boundaries(&self, n: usize) -> (usize, usize) {
        let train_end = ((n as f64 * self.train).floor() as usize).min(n);
        let val_len = (n as f64 * self.val).floor() as usize;
        let val_end = (train_end + val_len).min(n);
        (train_end, val_end)
    }
}

/// 分割結果
///
/// 入力の各要素はちょうど1つの分割に含まれる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAssignment<T> {
    pub train: Vec<T>,
    pub val: Vec<T>,
    pub test: Vec<T>,
}

impl<T> SplitAssignment<T> {
    pub fn get(&self, split: Split) -> &[T] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.val.len(), self.test.len())
    }
}

/// 入力をシャッフルして比率で3分割する
///
/// 比率が不正な場合はシャッフル前に `InvalidConfiguration` を返す。
pub fn split_files<T>(files: Vec<T>, ratios: &SplitRatios, seed: u64) -> Result<SplitAssignment<T>> {
    ratios.validate()?;

    let mut files = files;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    files.shuffle(&mut rng);

    let (train_end, val_end) = ratios.boundaries(files.len());
    let test = files.split_off(val_end);
    let val = files.split_off(train_end);

    Ok(SplitAssignment {
        train: files,
        val,
        test,
    })
}
