use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::{debug, info};
use serde::Serialize;

use crate::cli::{SubCommandExtend, compute_all, kind_name, scan_images, stack_descriptors};
use crate::config::{FeatureOptions, Opts};
use crate::flann::{Checks, FlannIndex, IndexParams, IndexSearch};
use crate::image::imread;
use crate::matrix::DescriptorKind;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 图片库所在目录
    pub path: PathBuf,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
    /// 输出的结果数量
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub count: usize,
    /// 每个描述符搜索的近邻数量
    #[arg(short, value_name = "K", default_value_t = 2)]
    pub k: usize,
    /// FLANN 检查的叶子数量，0 为自动，负数为精确搜索
    #[arg(long, value_name = "N", default_value_t = 32, allow_negative_numbers = true)]
    pub checks: i32,
    /// 距离超过该值的近邻不参与投票
    #[arg(long, value_name = "DISTANCE")]
    pub max_distance: Option<f32>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Serialize)]
struct SearchHit {
    score: f32,
    path: String,
}

impl SubCommandExtend for SearchCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let config = self.feature.config(&opts.conf_dir)?;

        let paths = scan_images(&self.path, &self.suffix);
        let images = compute_all(&paths, &config, self.feature.max_size);
        let (stacked, offsets) = stack_descriptors(&images)?;

        // 描述符行号到图片序号的映射
        let mut owners = Vec::with_capacity(stacked.rows());
        for (i, (image, offset)) in images.iter().zip(&offsets).enumerate() {
            if offset.is_some() {
                owners.extend(std::iter::repeat_n(i, image.descriptors.rows()));
            }
        }

        let params = match stacked.kind() {
            DescriptorKind::Float => IndexParams::KdTree { trees: 4 },
            DescriptorKind::Binary => IndexParams::lsh_default(),
        };
        let start = Instant::now();
        let mut index = FlannIndex::build(&stacked, &params)?;
        info!(
            "索引构建完成: {} 个 {} 描述符, 用时 {:.2}s",
            index.len(),
            kind_name(stacked.kind()),
            start.elapsed().as_secs_f32()
        );

        let image = imread(&self.image, Some(self.feature.max_size))?;
        let mut feature = config.build()?;
        let (_, query) = feature.detect_and_compute(&image, None)?;
        if query.rows() == 0 {
            anyhow::bail!("被搜索的图片中没有检测到特征点");
        }

        let start = Instant::now();
        let k = self.k.clamp(1, index.len());
        let matches = index.knn_search(&query, k, Checks::from_raw(self.checks))?;
        debug!("search time: {:.2}ms", start.elapsed().as_secs_f32() * 1000.);

        let mut votes: HashMap<usize, usize> = HashMap::new();
        for row in 0..matches.rows() {
            for (idx, dist) in matches.neighbors(row) {
                if self.max_distance.is_some_and(|max| dist > max) {
                    continue;
                }
                if let Some(&owner) = owners.get(idx) {
                    *votes.entry(owner).or_default() += 1;
                }
            }
        }

        let mut result: Vec<SearchHit> = votes
            .into_iter()
            .map(|(owner, n)| SearchHit {
                score: n as f32 / query.rows() as f32,
                path: images[owner].path.to_string_lossy().to_string(),
            })
            .collect();
        result.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        result.truncate(self.count);

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[SearchHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.2}\t{}", hit.score, hit.path);
            }
        }
    }
    Ok(())
}
