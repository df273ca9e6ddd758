//! 分類評価指標
//!
//! 混同行列は行が正解、列が予測。分母が0になる指標は0とする。

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// 混同行列（actual x predicted）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            matrix: vec![vec![0; num_classes]; num_classes],
        }
    }

    /// ラベル列から作成（範囲外のラベルは無視）
    pub fn from_predictions(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&actual, &predicted) in y_true.iter().zip(y_pred) {
            cm.update(actual, predicted);
        }
        cm
    }

    pub fn update(&mut self, actual: usize, predicted: usize) {
        let n = self.num_classes();
        if actual < n && predicted < n {
            self.matrix[actual][predicted] += 1;
        }
    }

    pub fn num_classes(&self) -> usize {
        self.matrix.len()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|i| self.matrix[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct() as f64, self.total() as f64)
    }

    /// 正解が `class_id` のサンプル数
    pub fn support(&self, class_id: usize) -> usize {
        self.matrix.get(class_id).map(|row| row.iter().sum()).unwrap_or(0)
    }

    /// クラス単位の (precision, recall, f1)
    pub fn class_scores(&self, class_id: usize) -> ClassScores {
        let n = self.num_classes();
        if class_id >= n {
            return ClassScores::default();
        }

        let tp = self.matrix[class_id][class_id] as f64;
        let fp: f64 = (0..n)
            .filter(|&i| i != class_id)
            .map(|i| self.matrix[i][class_id] as f64)
            .sum();
        let fn_: f64 = (0..n)
            .filter(|&i| i != class_id)
            .map(|i| self.matrix[class_id][i] as f64)
            .sum();

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        ClassScores {
            precision,
            recall,
            f1_score: f1(precision, recall),
            support: self.support(class_id),
        }
    }
}

/// 1クラス分の指標
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// 二値分類の指標（陽性ラベルは1）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl ClassificationMetrics {
    pub fn binary(y_true: &[usize], y_pred: &[usize]) -> Self {
        let cm = ConfusionMatrix::from_predictions(y_true, y_pred, 2);
        let positive = cm.class_scores(1);
        Self {
            accuracy: cm.accuracy(),
            precision: positive.precision,
            recall: positive.recall,
            f1_score: positive.f1_score,
        }
    }

    /// (名前, 値) の一覧（トラッキング用）
    pub fn as_pairs(&self) -> [(&'static str, f64); 4] {
        [
            ("test_accuracy", self.accuracy),
            ("test_precision", self.precision),
            ("test_recall", self.recall),
            ("test_f1_score", self.f1_score),
        ]
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// クラスごとの precision / recall / f1 / support とその平均をテキストで返す
pub fn classification_report(y_true: &[usize], y_pred: &[usize], class_names: &[String]) -> String {
    let cm = ConfusionMatrix::from_predictions(y_true, y_pred, class_names.len());
    let scores: Vec<ClassScores> = (0..class_names.len()).map(|i| cm.class_scores(i)).collect();
    let total = cm.total();

    let width = class_names
        .iter()
        .map(|n| n.len())
        .chain(std::iter::once("weighted avg".len()))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>width$} {:>9} {:>9} {:>9} {:>9}\n",
        "", "precision", "recall", "f1-score", "support"
    );
    for (name, s) in class_names.iter().zip(&scores) {
        let _ = writeln!(
            out,
            "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
            name, s.precision, s.recall, s.f1_score, s.support
        );
    }
    out.push('\n');
    let _ = writeln!(
        out,
        "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
        "accuracy",
        "",
        "",
        cm.accuracy(),
        total
    );

    let n = scores.len().max(1) as f64;
    let macro_avg = |f: fn(&ClassScores) -> f64| scores.iter().map(f).sum::<f64>() / n;
    let _ = writeln!(
        out,
        "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        "macro avg",
        macro_avg(|s| s.precision),
        macro_avg(|s| s.recall),
        macro_avg(|s| s.f1_score),
        total
    );

    let weighted = |f: fn(&ClassScores) -> f64| {
        ratio(
            scores.iter().map(|s| f(s) * s.support as f64).sum::<f64>(),
            total as f64,
        )
    };
    let _ = writeln!(
        out,
        "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        "weighted avg",
        weighted(|s| s.precision),
        weighted(|s| s.recall),
        weighted(|s| s.f1_score),
        total
    );

    out
}
