use opencv::core::{DMatch, Mat, Scalar, Vector};
use opencv::features2d::{self, DrawMatchesFlags};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::check_image;
use crate::keypoint::KeyPoints;
use crate::matrix::Matrix;

/// 绘制方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DrawStyle {
    /// 创建新的输出图片，特征点只画圆心
    #[default]
    Default,
    /// 直接在已有的输出图片上绘制
    DrawOverOutput,
    /// 不绘制未匹配的特征点
    NotDrawSinglePoints,
    /// 绘制特征点的尺寸和方向
    RichKeypoints,
}

impl DrawStyle {
    pub fn to_cv(self) -> DrawMatchesFlags {
        match self {
            Self::Default => DrawMatchesFlags::DEFAULT,
            Self::DrawOverOutput => DrawMatchesFlags::DRAW_OVER_OUTIMG,
            Self::NotDrawSinglePoints => DrawMatchesFlags::NOT_DRAW_SINGLE_POINTS,
            Self::RichKeypoints => DrawMatchesFlags::DRAW_RICH_KEYPOINTS,
        }
    }
}

/// 每个特征点使用随机颜色
pub fn random_color() -> Scalar {
    Scalar::all(-1.)
}

pub fn bgr(b: f64, g: f64, r: f64) -> Scalar {
    Scalar::new(b, g, r, 0.)
}

fn check_output(out: &Mat, style: DrawStyle) -> Result<()> {
    if style == DrawStyle::DrawOverOutput && out.empty() {
        return Err(Error::invalid("drawing over an empty output image"));
    }
    Ok(())
}

/// 在 `out` 上绘制特征点
pub fn draw_keypoints(
    image: &Mat,
    keypoints: &KeyPoints,
    out: &mut Mat,
    color: Scalar,
    style: DrawStyle,
) -> Result<()> {
    check_image(image)?;
    check_output(out, style)?;
    features2d::draw_keypoints(image, keypoints, out, color, style.to_cv())?;
    Ok(())
}

/// 将两张图片左右拼接并绘制匹配连线
///
/// `indices` 的第 i 行是 `keypoints2[i]` 在 `keypoints1` 中的近邻，
/// 负数索引会被跳过；`mask` 为 0 的行不绘制
#[allow(clippy::too_many_arguments)]
pub fn draw_matched_features(
    img1: &Mat,
    keypoints1: &KeyPoints,
    img2: &Mat,
    keypoints2: &KeyPoints,
    indices: &Matrix<i32>,
    out: &mut Mat,
    match_color: Scalar,
    single_point_color: Scalar,
    mask: Option<&Matrix<u8>>,
    style: DrawStyle,
) -> Result<()> {
    check_image(img1)?;
    check_image(img2)?;
    check_output(out, style)?;
    if indices.rows() != keypoints2.len() {
        return Err(Error::invalid(format!(
            "indices has {} rows but there are {} keypoints",
            indices.rows(),
            keypoints2.len()
        )));
    }
    if let Some(mask) = mask {
        mask.ensure_shape(indices.rows(), 1, "mask")?;
    }

    let mut matches = Vector::<DMatch>::new();
    let mut matches_mask = Vector::<i8>::new();
    for (i, row) in indices.iter_rows().enumerate() {
        let enabled = mask.and_then(|m| m.get(i, 0)).is_none_or(|v| v != 0);
        for &idx in row {
            if idx < 0 {
                continue;
            }
            if idx as usize >= keypoints1.len() {
                return Err(Error::invalid(format!(
                    "match {} refers to keypoint {} of {}",
                    i,
                    idx,
                    keypoints1.len()
                )));
            }
            matches.push(DMatch::new_index(idx, i as i32, -1, 0.)?);
            matches_mask.push(enabled as i8);
        }
    }

    features2d::draw_matches(
        img1,
        keypoints1,
        img2,
        keypoints2,
        &matches,
        out,
        match_color,
        single_point_color,
        &matches_mask,
        style.to_cv(),
    )?;
    Ok(())
}
