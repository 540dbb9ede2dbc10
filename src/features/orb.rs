use opencv::core::{Mat, Ptr};
use opencv::features2d::{self, ORB_ScoreType};
use serde::{Deserialize, Serialize};

use super::{Describe, Detect, Feature, detect_and_compute_with, impl_describe, impl_detect};
use crate::error::Result;
use crate::keypoint::KeyPoints;
use crate::matrix::Descriptors;

/// ORB 参数，默认值与 OpenCV 一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// 最大保留的特征点数量
    pub nfeatures: i32,
    /// 金字塔缩放因子
    pub scale_factor: f32,
    /// 金字塔层数
    pub nlevels: i32,
    /// 边缘处不检测特征点的宽度，应与 patch_size 大致相同
    pub edge_threshold: i32,
    pub first_level: i32,
    /// 每个描述符比较位产生的点数，只能为 2、3、4
    pub wta_k: i32,
    /// 使用 Harris 评分，否则使用 FAST 评分
    pub harris_score: bool,
    pub patch_size: i32,
    pub fast_threshold: i32,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            nfeatures: 500,
            scale_factor: 1.2,
            nlevels: 8,
            edge_threshold: 31,
            first_level: 0,
            wta_k: 2,
            harris_score: true,
            patch_size: 31,
            fast_threshold: 20,
        }
    }
}

pub struct Orb {
    inner: Ptr<features2d::ORB>,
}

impl Orb {
    pub fn create(params: &OrbParams) -> Result<Self> {
        let score_type = if params.harris_score {
            ORB_ScoreType::HARRIS_SCORE
        } else {
            ORB_ScoreType::FAST_SCORE
        };
        let inner = features2d::ORB::create(
            params.nfeatures,
            params.scale_factor,
            params.nlevels,
            params.edge_threshold,
            params.first_level,
            params.wta_k,
            score_type,
            params.patch_size,
            params.fast_threshold,
        )?;
        Ok(Self { inner })
    }
}

impl_detect!(Orb);
impl_describe!(Orb);

impl Feature for Orb {
    fn name(&self) -> &'static str {
        "ORB"
    }

    fn as_detect(&mut self) -> Option<&mut dyn Detect> {
        Some(self)
    }

    fn as_describe(&mut self) -> Option<&mut dyn Describe> {
        Some(self)
    }

    fn as_describe_ref(&self) -> Option<&dyn Describe> {
        Some(self)
    }

    fn detect_and_compute(
        &mut self,
        image: &Mat,
        mask: Option<&Mat>,
    ) -> Result<(KeyPoints, Descriptors)> {
        detect_and_compute_with(&mut self.inner, image, mask)
    }
}
