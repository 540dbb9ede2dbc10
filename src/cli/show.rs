use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use opencv::core::Mat;

use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, Opts};
use crate::draw::{self, DrawStyle};
use crate::error::Error;
use crate::image::{imread, imwrite};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 图片路径
    pub image: PathBuf,
    /// 输出图片路径
    pub output: PathBuf,
    /// 绘制方式
    #[arg(long, value_enum, default_value_t = DrawStyle::RichKeypoints)]
    pub style: DrawStyle,
}

impl SubCommandExtend for ShowCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let image = imread(&self.image, Some(self.feature.max_size))?;

        let mut feature = self.feature.config(&opts.conf_dir)?.build()?;
        let detector = feature.as_detect().ok_or(Error::Unsupported("detect"))?;
        let kps = detector.detect(&image, None)?;
        info!("{} 个特征点", kps.len());

        let mut output = Mat::default();
        draw::draw_keypoints(&image, &kps, &mut output, draw::random_color(), self.style)?;
        imwrite(&self.output, &output)?;
        Ok(())
    }
}
