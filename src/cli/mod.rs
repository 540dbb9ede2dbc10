mod describe;
mod r#match;
mod search;
mod show;

pub use describe::*;
pub use r#match::*;
pub use search::*;
pub use show::*;

use std::path::{Path, PathBuf};

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::config::Opts;
use crate::features::FeatureConfig;
use crate::image::imread;
use crate::keypoint::{KeyPointRecord, to_records};
use crate::matrix::{DescriptorKind, Descriptors};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// 扫描目录下指定后缀的文件，后缀不区分大小写
pub fn scan_images(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let suffixes: Vec<String> = suffix.split(',').map(|s| s.trim().to_lowercase()).collect();
    let mut entries: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| suffixes.contains(&ext.to_string_lossy().to_lowercase()))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();
    entries
}

/// 一张图片的特征
pub struct ImageFeatures {
    pub path: PathBuf,
    pub keypoints: Vec<KeyPointRecord>,
    pub descriptors: Descriptors,
}

/// 并行计算所有图片的特征，每个线程持有自己的特征对象；失败的图片会被跳过
pub fn compute_all(
    paths: &[PathBuf],
    config: &FeatureConfig,
    max_size: (i32, i32),
) -> Vec<ImageFeatures> {
    let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());
    let result: Vec<ImageFeatures> = paths
        .par_iter()
        .progress_with(pb.clone())
        .map_init(
            || config.build(),
            |feature, path| {
                let feature = match feature {
                    Ok(feature) => feature,
                    Err(e) => {
                        pb.println(format!("创建特征对象失败: {}", e));
                        return None;
                    }
                };
                let computed = imread(path, Some(max_size))
                    .and_then(|image| feature.detect_and_compute(&image, None));
                match computed {
                    Ok((kps, descriptors)) => Some(ImageFeatures {
                        path: path.clone(),
                        keypoints: to_records(&kps),
                        descriptors,
                    }),
                    Err(e) => {
                        pb.println(format!("计算特征点失败: {}: {}", path.display(), e));
                        None
                    }
                }
            },
        )
        .flatten()
        .collect();
    pb.finish_with_message("特征计算完成");
    info!("{} / {} 张图片计算成功", result.len(), paths.len());
    result
}

/// 将所有图片的描述符按顺序拼接，返回拼接结果与每张图片的起始行号
///
/// 与第一张图片描述符类型或宽度不一致的图片会被跳过
pub fn stack_descriptors(
    images: &[ImageFeatures],
) -> anyhow::Result<(Descriptors, Vec<Option<usize>>)> {
    let Some(first) = images.iter().find(|i| i.descriptors.rows() > 0) else {
        anyhow::bail!("没有任何图片包含描述符");
    };
    let (kind, cols) = (first.descriptors.kind(), first.descriptors.cols());
    let mut offsets = Vec::with_capacity(images.len());
    let mut stacked = Descriptors::empty(kind, cols);
    for image in images {
        let offset = stacked.rows();
        let appended = match (&mut stacked, &image.descriptors) {
            (Descriptors::Binary(dst), Descriptors::Binary(src)) if src.cols() == cols => {
                dst.extend(src).is_ok()
            }
            (Descriptors::Float(dst), Descriptors::Float(src)) if src.cols() == cols => {
                dst.extend(src).is_ok()
            }
            _ if image.descriptors.rows() == 0 => true,
            _ => false,
        };
        if appended {
            offsets.push(Some(offset));
        } else {
            warn!("跳过描述符格式不一致的图片: {}", image.path.display());
            offsets.push(None);
        }
    }
    Ok((stacked, offsets))
}

pub fn kind_name(kind: DescriptorKind) -> &'static str {
    match kind {
        DescriptorKind::Binary => "binary",
        DescriptorKind::Float => "float",
    }
}
