use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;
use serde::Serialize;

use crate::cli::{SubCommandExtend, compute_all, kind_name, scan_images, stack_descriptors};
use crate::config::{FeatureOptions, Opts};
use crate::keypoint::KeyPointRecord;
use crate::matrix::Descriptors;

#[derive(Parser, Debug, Clone)]
pub struct DescribeCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 描述符输出文件 (.npy)，特征点会写入同名的 .json 文件
    pub output: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
}

#[derive(Serialize)]
struct ImageEntry<'a> {
    path: String,
    /// 该图片的第一个描述符在 .npy 中的行号
    offset: usize,
    keypoints: &'a [KeyPointRecord],
}

#[derive(Serialize)]
struct Manifest<'a> {
    descriptor: &'static str,
    cols: usize,
    images: Vec<ImageEntry<'a>>,
}

impl SubCommandExtend for DescribeCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let config = self.feature.config(&opts.conf_dir)?;
        info!("开始扫描目录: {}", self.path.display());
        let paths = scan_images(&self.path, &self.suffix);
        info!("扫描完成，共 {} 张图片", paths.len());

        let images = compute_all(&paths, &config, self.feature.max_size);
        let (stacked, offsets) = stack_descriptors(&images)?;
        match &stacked {
            Descriptors::Binary(m) => write_npy(&self.output, &m.to_array2()?)?,
            Descriptors::Float(m) => write_npy(&self.output, &m.to_array2()?)?,
        }

        let manifest = Manifest {
            descriptor: kind_name(stacked.kind()),
            cols: stacked.cols(),
            images: images
                .iter()
                .zip(offsets)
                .filter_map(|(image, offset)| {
                    Some(ImageEntry {
                        path: image.path.to_string_lossy().to_string(),
                        offset: offset?,
                        keypoints: &image.keypoints,
                    })
                })
                .collect(),
        };
        let json_path = self.output.with_extension("json");
        serde_json::to_writer(BufWriter::new(File::create(&json_path)?), &manifest)?;

        info!(
            "导出 {} 个描述符到 {}，特征点写入 {}",
            stacked.rows(),
            self.output.display(),
            json_path.display()
        );
        Ok(())
    }
}
