use opencv::core::{Mat, Point2f, Rect};
use opencv::features2d::KeyPointsFilter;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Detect, Feature, FeatureConfig, OrbParams};
use crate::error::{Error, Result};
use crate::image::{check_image, check_mask};
use crate::keypoint::KeyPoints;

/// 分块检测参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    /// 实际执行检测的检测器
    pub detector: Box<FeatureConfig>,
    /// 所有格子合计最多保留的特征点数量
    pub max_total_keypoints: usize,
    pub grid_rows: usize,
    pub grid_cols: usize,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            detector: Box::new(FeatureConfig::Orb(OrbParams::default())),
            max_total_keypoints: 1000,
            grid_rows: 4,
            grid_cols: 4,
        }
    }
}

/// 将图片划分为网格，在每个格子内独立检测并保留响应最强的特征点，
/// 使特征点在整张图上分布更均匀
pub struct GridAdapted {
    inner: Box<dyn Feature>,
    max_per_cell: usize,
    grid_rows: usize,
    grid_cols: usize,
}

impl GridAdapted {
    pub fn create(params: &GridParams) -> Result<Self> {
        let inner = params.detector.build()?;
        Self::new(inner, params.max_total_keypoints, params.grid_rows, params.grid_cols)
    }

    pub fn new(
        mut inner: Box<dyn Feature>,
        max_total_keypoints: usize,
        grid_rows: usize,
        grid_cols: usize,
    ) -> Result<Self> {
        if grid_rows == 0 || grid_cols == 0 {
            return Err(Error::invalid("grid must have at least one row and one column"));
        }
        if inner.as_detect().is_none() {
            return Err(Error::Unsupported("grid adaption of a non-detector"));
        }
        let cells = grid_rows
            .checked_mul(grid_cols)
            .ok_or_else(|| Error::invalid(format!("grid {}x{} is too large", grid_rows, grid_cols)))?;
        let max_per_cell = max_total_keypoints / cells;
        Ok(Self { inner, max_per_cell, grid_rows, grid_cols })
    }

    fn cell(&self, image: &Mat, i: usize, j: usize) -> Rect {
        let (rows, cols) = (image.rows() as usize, image.cols() as usize);
        let y0 = i * rows / self.grid_rows;
        let y1 = (i + 1) * rows / self.grid_rows;
        let x0 = j * cols / self.grid_cols;
        let x1 = (j + 1) * cols / self.grid_cols;
        Rect::new(x0 as i32, y0 as i32, (x1 - x0) as i32, (y1 - y0) as i32)
    }
}

impl Detect for GridAdapted {
    fn detect(&mut self, image: &Mat, mask: Option<&Mat>) -> Result<KeyPoints> {
        let mut keypoints = KeyPoints::new();
        if image.empty() {
            return Ok(keypoints);
        }
        check_image(image)?;
        if let Some(mask) = mask {
            check_mask(image, mask)?;
        }

        for i in 0..self.grid_rows {
            for j in 0..self.grid_cols {
                let rect = self.cell(image, i, j);
                if rect.width == 0 || rect.height == 0 {
                    continue;
                }
                let sub_image = Mat::roi(image, rect)?.try_clone()?;
                let sub_mask = match mask {
                    Some(mask) => Some(Mat::roi(mask, rect)?.try_clone()?),
                    None => None,
                };
                let detector = self.inner.as_detect().ok_or(Error::Unsupported("detect"))?;
                let mut sub_keypoints = detector.detect(&sub_image, sub_mask.as_ref())?;
                let keep = i32::try_from(self.max_per_cell).unwrap_or(i32::MAX);
                KeyPointsFilter::retain_best(&mut sub_keypoints, keep)?;
                for mut kp in sub_keypoints {
                    let pt = kp.pt();
                    kp.set_pt(Point2f::new(pt.x + rect.x as f32, pt.y + rect.y as f32));
                    keypoints.push(kp);
                }
            }
        }
        Ok(keypoints)
    }
}

impl Feature for GridAdapted {
    fn name(&self) -> &'static str {
        "GridAdapted"
    }

    fn as_detect(&mut self) -> Option<&mut dyn Detect> {
        Some(self)
    }
}
