//! 機械学習モデルの共通定義
//!
//! 犬猫分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// 畳み込みブロックのチャネル数
pub const CONV_CHANNELS: [usize; 4] = [32, 64, 128, 256];

/// 4回の 2x2 プーリングで入力は 1/16 になる
pub const SIZE_DIVISOR: usize = 16;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// 全結合層に入る特徴次元 `256 * (size/16)^2`
    pub fn feature_dim(&self) -> anyhow::Result<usize> {
        if self.image_size == 0 || self.image_size % SIZE_DIVISOR != 0 {
            anyhow::bail!(
                "入力サイズは{}の正の倍数である必要があります: {}",
                SIZE_DIVISOR,
                self.image_size
            );
        }
        let feature_map_size = self.image_size / SIZE_DIVISOR;
        Ok(CONV_CHANNELS[3] * feature_map_size * feature_map_size)
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> anyhow::Result<CatDogCnn<B>> {
        if self.num_classes == 0 {
            anyhow::bail!("クラス数が0です");
        }
        let d = self.feature_dim()?;

        tracing::debug!(
            "[Model] 入力: {0}x{0}, 特徴次元: {1}, FC: {1} -> 512 -> 128 -> {2}",
            self.image_size,
            d,
            self.num_classes
        );

        Ok(CatDogCnn {
            block1: ConvBlock::new(3, CONV_CHANNELS[0], device),
            block2: ConvBlock::new(CONV_CHANNELS[0], CONV_CHANNELS[1], device),
            block3: ConvBlock::new(CONV_CHANNELS[1], CONV_CHANNELS[2], device),
            block4: ConvBlock::new(CONV_CHANNELS[2], CONV_CHANNELS[3], device),
            fc1: LinearConfig::new(d, 512).init(device),
            fc2: LinearConfig::new(512, 128).init(device),
            fc3: LinearConfig::new(128, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        })
    }
}

/// Conv 3x3 (same) + BatchNorm + ReLU + MaxPool 2x2
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

/// 犬猫分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (same) + BatchNorm + ReLU + MaxPool 2x2} x 4 (32/64/128/256ch)
/// - Flatten
/// - FC: d -> 512 + ReLU + Dropout
/// - FC: 512 -> 128 + ReLU + Dropout
/// - FC: 128 -> num_classes
///
/// 特徴次元 d = 256 * (size/16)^2
#[derive(Module, Debug)]
pub struct CatDogCnn<B: Backend> {
    block1: ConvBlock<B>,
    block2: ConvBlock<B>,
    block3: ConvBlock<B>,
    block4: ConvBlock<B>,

    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,

    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> CatDogCnn<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(images);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);
        let x = self.block4.forward(x);

        let [batch_size, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        let x = self.fc2.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc3.forward(x)
    }

    /// 確率（softmax）を返す
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
