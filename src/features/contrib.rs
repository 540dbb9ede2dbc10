//! 来自 opencv_contrib (xfeatures2d) 的特征，需要启用 `contrib` feature

use opencv::core::{Mat, Ptr};
use opencv::xfeatures2d;
use serde::{Deserialize, Serialize};

use super::{Describe, Detect, Feature, detect_and_compute_with, impl_describe, impl_detect};
use crate::error::{Error, Result};
use crate::keypoint::KeyPoints;
use crate::matrix::Descriptors;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefParams {
    /// 描述符字节数，只能为 16、32、64
    pub bytes: i32,
    pub use_orientation: bool,
}

impl Default for BriefParams {
    fn default() -> Self {
        Self { bytes: 32, use_orientation: false }
    }
}

/// BRIEF 只提取描述符，需要配合其他检测器使用
pub struct Brief {
    inner: Ptr<xfeatures2d::BriefDescriptorExtractor>,
}

impl Brief {
    pub fn create(params: &BriefParams) -> Result<Self> {
        if ![16, 32, 64].contains(&params.bytes) {
            return Err(Error::invalid(format!(
                "BRIEF descriptor size must be 16, 32 or 64, got {}",
                params.bytes
            )));
        }
        let inner = xfeatures2d::BriefDescriptorExtractor::create(
            params.bytes,
            params.use_orientation,
        )?;
        Ok(Self { inner })
    }
}

impl_describe!(Brief);

impl Feature for Brief {
    fn name(&self) -> &'static str {
        "BRIEF"
    }

    fn as_describe(&mut self) -> Option<&mut dyn Describe> {
        Some(self)
    }

    fn as_describe_ref(&self) -> Option<&dyn Describe> {
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfParams {
    pub hessian_threshold: f64,
    pub n_octaves: i32,
    pub n_octave_layers: i32,
    /// 使用 128 维扩展描述符，否则为 64 维
    pub extended: bool,
    /// 不计算特征点方向
    pub upright: bool,
}

impl Default for SurfParams {
    fn default() -> Self {
        Self {
            hessian_threshold: 100.,
            n_octaves: 4,
            n_octave_layers: 3,
            extended: false,
            upright: false,
        }
    }
}

/// SURF 受专利限制，OpenCV 未开启 OPENCV_ENABLE_NONFREE 时创建会失败
pub struct Surf {
    inner: Ptr<xfeatures2d::SURF>,
}

impl Surf {
    pub fn create(params: &SurfParams) -> Result<Self> {
        let inner = xfeatures2d::SURF::create(
            params.hessian_threshold,
            params.n_octaves,
            params.n_octave_layers,
            params.extended,
            params.upright,
        )?;
        Ok(Self { inner })
    }
}

impl_detect!(Surf);
impl_describe!(Surf);

impl Feature for Surf {
    fn name(&self) -> &'static str {
        "SURF"
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarParams {
    pub max_size: i32,
    pub response_threshold: i32,
    pub line_threshold_projected: i32,
    pub line_threshold_binarized: i32,
    pub suppress_nonmax_size: i32,
}

impl Default for StarParams {
    fn default() -> Self {
        Self {
            max_size: 45,
            response_threshold: 30,
            line_threshold_projected: 10,
            line_threshold_binarized: 8,
            suppress_nonmax_size: 5,
        }
    }
}

/// CenSurE (Star) 检测器
pub struct Star {
    inner: Ptr<xfeatures2d::StarDetector>,
}

impl Star {
    pub fn create(params: &StarParams) -> Result<Self> {
        let inner = xfeatures2d::StarDetector::create(
            params.max_size,
            params.response_threshold,
            params.line_threshold_projected,
            params.line_threshold_binarized,
            params.suppress_nonmax_size,
        )?;
        Ok(Self { inner })
    }
}

impl_detect!(Star);

impl Feature for Star {
    fn name(&self) -> &'static str {
        "Star"
    }

    fn as_detect(&mut self) -> Option<&mut dyn Detect> {
        Some(self)
    }
}
