use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::debug;
use opencv::core::{Mat, Point2f};
use opencv::prelude::*;
use serde::Serialize;

use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, Opts, VerifyOptions};
use crate::draw::{self, DrawStyle};
use crate::error::Error;
use crate::homography::{
    Homography, estimate_homography, vote_for_size_and_orientation, vote_for_uniqueness,
};
use crate::image::{imread, imwrite};
use crate::matcher::{BruteForceMatcher, Match};
use crate::matrix::Matrix;

#[derive(Parser, Debug, Clone)]
pub struct MatchCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    #[command(flatten)]
    pub verify: VerifyOptions,
    /// 模型图片
    pub image1: PathBuf,
    /// 观测图片
    pub image2: PathBuf,
    /// 将匹配结果绘制到该文件
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct MatchReport {
    keypoints: [usize; 2],
    /// 通过比值检验的匹配数量
    unique: usize,
    /// 通过尺度和旋转投票的匹配数量
    voted: usize,
    /// RANSAC 内点数量，未找到单应矩阵时为 0
    inliers: usize,
    homography: Option<Homography>,
    /// 图片1的四个角在图片2中的位置
    corners: Option<Vec<[f32; 2]>>,
}

impl SubCommandExtend for MatchCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let img1 = imread(&self.image1, Some(self.feature.max_size))?;
        let img2 = imread(&self.image2, Some(self.feature.max_size))?;

        let mut feature = self.feature.config(&opts.conf_dir)?.build()?;
        let norm = feature
            .as_describe_ref()
            .ok_or(Error::Unsupported("compute"))?
            .default_norm()?;
        let (kps1, des1) = feature.detect_and_compute(&img1, None)?;
        let (kps2, des2) = feature.detect_and_compute(&img2, None)?;
        debug!("keypoints: {} / {}", kps1.len(), kps2.len());

        let mut matcher = BruteForceMatcher::new(norm, false)?;
        matcher.add(&des1)?;
        let matches = matcher.knn_match(&des2, 2, None)?;

        let params = self.verify.tracker_params();
        let mut mask = Matrix::filled(matches.rows(), 1, 1u8);
        let unique = vote_for_uniqueness(&matches.distances, params.uniqueness_threshold, &mut mask)?;
        let voted = vote_for_size_and_orientation(
            &kps1,
            &kps2,
            &matches.indices,
            &mut mask,
            params.scale_increment,
            params.rotation_bins,
        )?;
        let homography = estimate_homography(
            &kps1,
            &kps2,
            &matches.indices,
            &mut mask,
            params.ransac_threshold,
        )?;

        let (w, h) = (img1.cols() as f32, img1.rows() as f32);
        let corners = homography.and_then(|hm| {
            hm.project_all(&[
                Point2f::new(0., 0.),
                Point2f::new(w, 0.),
                Point2f::new(w, h),
                Point2f::new(0., h),
            ])
        });
        let report = MatchReport {
            keypoints: [kps1.len(), kps2.len()],
            unique,
            voted,
            inliers: if homography.is_some() {
                mask.as_slice().iter().filter(|v| **v != 0).count()
            } else {
                0
            },
            homography,
            corners: corners.map(|c| c.iter().map(|p| [p.x, p.y]).collect()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);

        if let Some(file) = &self.output {
            let mut output = Mat::default();
            draw::draw_matched_features(
                &img1,
                &kps1,
                &img2,
                &kps2,
                &matches.indices.column(0),
                &mut output,
                draw::bgr(0., 255., 0.),
                draw::bgr(255., 0., 0.),
                Some(&mask),
                DrawStyle::NotDrawSinglePoints,
            )?;
            imwrite(file, &output)?;
        }
        Ok(())
    }
}
