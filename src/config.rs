use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use log::debug;

use crate::cli::*;
use crate::features::{
    FastParams, FeatureConfig, GridParams, MserParams, OrbParams, SiftParams,
};
use crate::tracker::TrackerParams;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "", "featurekit")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".featurekit"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".featurekit")
}

/// 可以在命令行直接选择的检测器
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detector {
    Orb,
    Sift,
    Fast,
    Mser,
    #[cfg(feature = "contrib")]
    Surf,
    #[cfg(feature = "contrib")]
    Star,
}

#[derive(Parser, Debug, Clone)]
pub struct FeatureOptions {
    /// 检测器类型，未指定时读取配置目录下的 features.json，不存在则使用 ORB
    #[arg(short, long, value_enum)]
    pub detector: Option<Detector>,
    /// 从 JSON 文件读取特征配置
    #[arg(long, value_name = "FILE", conflicts_with = "detector")]
    pub feature_config: Option<PathBuf>,
    /// 最大特征点数量，只对 ORB 和 SIFT 有效
    #[arg(short = 'n', long, value_name = "N")]
    pub nfeatures: Option<i32>,
    /// 将图片分块检测，使特征点分布更均匀
    #[arg(long, value_name = "ROWSxCOLS", value_parser = parse_size)]
    pub grid: Option<(i32, i32)>,
    /// 图片最大尺寸，如果宽高**均**超过这个尺寸，则等比缩放
    #[arg(short = 'S', long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, verbatim_doc_comment, default_value = "1080x768")]
    pub max_size: (i32, i32),
}

impl FeatureOptions {
    /// 解析出最终使用的特征配置
    pub fn config(&self, conf_dir: &ConfDir) -> anyhow::Result<FeatureConfig> {
        let mut config = match (&self.feature_config, self.detector) {
            (Some(file), _) => read_feature_config(file)?,
            (None, Some(detector)) => detector_config(detector),
            (None, None) if conf_dir.features().exists() => read_feature_config(&conf_dir.features())?,
            (None, None) => FeatureConfig::default(),
        };
        if let Some(n) = self.nfeatures {
            match &mut config {
                FeatureConfig::Orb(p) => p.nfeatures = n,
                FeatureConfig::Sift(p) => p.nfeatures = n,
                _ => {}
            }
        }
        if let Some((rows, cols)) = self.grid {
            anyhow::ensure!(rows > 0 && cols > 0, "网格行列数必须为正数");
            config = FeatureConfig::Grid(GridParams {
                detector: Box::new(config),
                max_total_keypoints: self.nfeatures.map_or(1000, |n| n.max(0) as usize),
                grid_rows: rows as usize,
                grid_cols: cols as usize,
            });
        }
        debug!("feature config: {:?}", config);
        Ok(config)
    }
}

fn detector_config(detector: Detector) -> FeatureConfig {
    match detector {
        Detector::Orb => FeatureConfig::Orb(OrbParams::default()),
        Detector::Sift => FeatureConfig::Sift(SiftParams::default()),
        Detector::Fast => FeatureConfig::Fast(FastParams::default()),
        Detector::Mser => FeatureConfig::Mser(MserParams::default()),
        #[cfg(feature = "contrib")]
        Detector::Surf => FeatureConfig::Surf(Default::default()),
        #[cfg(feature = "contrib")]
        Detector::Star => FeatureConfig::Star(Default::default()),
    }
}

fn read_feature_config(path: &Path) -> anyhow::Result<FeatureConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取特征配置: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("特征配置格式错误: {}", path.display()))
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyOptions {
    /// 最近与次近距离之比的上限
    #[arg(long, value_name = "RATIO", default_value_t = 0.8)]
    pub uniqueness: f64,
    /// 尺度投票的分组步长（倍数）
    #[arg(long, value_name = "SCALE", default_value_t = 1.5)]
    pub scale_increment: f64,
    /// 旋转投票的分组数量
    #[arg(long, value_name = "N", default_value_t = 20)]
    pub rotation_bins: usize,
    /// RANSAC 最大重投影误差
    #[arg(long, value_name = "PIXELS", default_value_t = 2.)]
    pub ransac_threshold: f64,
}

impl VerifyOptions {
    pub fn tracker_params(&self) -> TrackerParams {
        TrackerParams {
            uniqueness_threshold: self.uniqueness,
            scale_increment: self.scale_increment,
            rotation_bins: self.rotation_bins,
            ransac_threshold: self.ransac_threshold,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "featurekit", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 检测并绘制特征点
    Show(ShowCommand),
    /// 匹配两张图片并校验几何关系
    Match(MatchCommand),
    /// 批量计算目录中图片的描述符并导出
    Describe(DescribeCommand),
    /// 在目录中搜索与给定图片相似的图片
    Search(SearchCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回默认特征配置文件的路径
    pub fn features(&self) -> PathBuf {
        self.path.join("features.json")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_size(s: &str) -> anyhow::Result<(i32, i32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("无效的尺寸: {}", s));
    }
    Ok((parts[0].parse()?, parts[1].parse()?))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use opencv::prelude::*;

    use super::*;

    fn options(args: &[&str]) -> FeatureOptions {
        let mut argv = vec!["test"];
        argv.extend_from_slice(args);
        FeatureOptions::parse_from(argv)
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size("1080x768").unwrap(), (1080, 768));
        assert!(parse_size("1080").is_err());
    }

    #[test]
    fn max_size_is_width_by_height() {
        use clap::CommandFactory;

        let command = FeatureOptions::command();
        let arg = command.get_arguments().find(|a| a.get_id() == "max_size").unwrap();
        let names: Vec<String> =
            arg.get_value_names().unwrap().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["WIDTHxHEIGHT"]);

        // 1000x600 的图片按 500x300 限制缩放后正好是一半
        let max_size = options(&["-S", "500x300"]).max_size;
        let img = crate::image::random_pattern(600, 1000, 1).unwrap();
        let img = crate::image::adjust_image_size(img, Some(max_size)).unwrap();
        assert_eq!((img.cols(), img.rows()), (500, 300));
    }

    #[test]
    fn detector_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let conf = ConfDir::from_str(dir.path().to_str().unwrap()).unwrap();
        let config = options(&["-d", "sift", "-n", "300"]).config(&conf).unwrap();
        assert!(matches!(config, FeatureConfig::Sift(SiftParams { nfeatures: 300, .. })));

        let config = options(&["--grid", "2x3"]).config(&conf).unwrap();
        match config {
            FeatureConfig::Grid(p) => {
                assert_eq!((p.grid_rows, p.grid_cols), (2, 3));
                assert_eq!(*p.detector, FeatureConfig::default());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn features_json_in_conf_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("features.json"), r#"{"type": "fast", "threshold": 30}"#).unwrap();
        let conf = ConfDir::from_str(dir.path().to_str().unwrap()).unwrap();
        let config = options(&[]).config(&conf).unwrap();
        assert_eq!(config, FeatureConfig::Fast(FastParams { threshold: 30, nonmax_suppression: true }));
    }
}
