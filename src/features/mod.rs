//! 特征检测与描述符提取
//!
//! 所有算法均由 OpenCV 实现，这里只负责参数、输入校验和结果的形状约束

#[cfg(feature = "contrib")]
mod contrib;
mod fast;
mod grid;
mod mser;
mod orb;
mod sift;

#[cfg(feature = "contrib")]
pub use contrib::*;
pub use fast::*;
pub use grid::*;
pub use mser::*;
pub use orb::*;
pub use sift::*;

use opencv::core::Mat;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::{check_image, check_mask};
use crate::keypoint::KeyPoints;
use crate::matcher::Norm;
use crate::matrix::{DescriptorKind, Descriptors};

/// 特征点检测能力
pub trait Detect {
    /// 检测特征点，`mask` 非零处才会检测
    ///
    /// 空图片返回空序列
    fn detect(&mut self, image: &Mat, mask: Option<&Mat>) -> Result<KeyPoints>;
}

/// 描述符提取能力
pub trait Describe {
    /// 每个描述符的元素个数
    fn descriptor_size(&self) -> Result<usize>;
    fn descriptor_kind(&self) -> Result<DescriptorKind>;
    /// 该描述符推荐使用的距离
    fn default_norm(&self) -> Result<Norm>;
    /// 为 `keypoints` 计算描述符
    ///
    /// 无法计算描述符的特征点（例如太靠近边缘）会从 `keypoints` 中移除，
    /// 返回的矩阵行数总是等于调用后的 `keypoints.len()`
    fn compute(&mut self, image: &Mat, keypoints: &mut KeyPoints) -> Result<Descriptors>;
}

/// 一个已配置的特征对象，可能只具备检测或描述中的一种能力
pub trait Feature {
    fn name(&self) -> &'static str;

    fn as_detect(&mut self) -> Option<&mut dyn Detect> {
        None
    }

    fn as_describe(&mut self) -> Option<&mut dyn Describe> {
        None
    }

    fn as_describe_ref(&self) -> Option<&dyn Describe> {
        None
    }

    fn detect_and_compute(
        &mut self,
        image: &Mat,
        mask: Option<&Mat>,
    ) -> Result<(KeyPoints, Descriptors)> {
        let mut keypoints =
            self.as_detect().ok_or(Error::Unsupported("detect"))?.detect(image, mask)?;
        let descriptors = self
            .as_describe()
            .ok_or(Error::Unsupported("compute"))?
            .compute(image, &mut keypoints)?;
        Ok((keypoints, descriptors))
    }
}

pub(crate) fn detect_with(
    inner: &mut impl Feature2DTrait,
    image: &Mat,
    mask: Option<&Mat>,
) -> Result<KeyPoints> {
    let mut keypoints = KeyPoints::new();
    if image.empty() {
        return Ok(keypoints);
    }
    check_image(image)?;
    match mask {
        Some(mask) => {
            check_mask(image, mask)?;
            inner.detect(image, &mut keypoints, mask)?;
        }
        None => inner.detect(image, &mut keypoints, &Mat::default())?,
    }
    Ok(keypoints)
}

pub(crate) fn descriptor_shape(
    inner: &impl Feature2DTraitConst,
) -> Result<(DescriptorKind, usize)> {
    let kind = DescriptorKind::from_depth(inner.descriptor_type()?)?;
    Ok((kind, inner.descriptor_size()? as usize))
}

pub(crate) fn compute_with(
    inner: &mut (impl Feature2DTrait + Feature2DTraitConst),
    image: &Mat,
    keypoints: &mut KeyPoints,
) -> Result<Descriptors> {
    let (kind, cols) = descriptor_shape(inner)?;
    if image.empty() {
        keypoints.clear();
    }
    if keypoints.is_empty() {
        return Ok(Descriptors::empty(kind, cols));
    }
    check_image(image)?;
    let mut descriptors = Mat::default();
    inner.compute(image, keypoints, &mut descriptors)?;
    let descriptors = Descriptors::from_mat(&descriptors, kind, cols)?;
    ensure_descriptor_shape(&descriptors, keypoints, cols)?;
    Ok(descriptors)
}

pub(crate) fn detect_and_compute_with(
    inner: &mut (impl Feature2DTrait + Feature2DTraitConst),
    image: &Mat,
    mask: Option<&Mat>,
) -> Result<(KeyPoints, Descriptors)> {
    let (kind, cols) = descriptor_shape(inner)?;
    let mut keypoints = KeyPoints::new();
    if image.empty() {
        return Ok((keypoints, Descriptors::empty(kind, cols)));
    }
    check_image(image)?;
    let mut descriptors = Mat::default();
    match mask {
        Some(mask) => {
            check_mask(image, mask)?;
            inner.detect_and_compute(image, mask, &mut keypoints, &mut descriptors, false)?;
        }
        None => {
            inner.detect_and_compute(
                image,
                &Mat::default(),
                &mut keypoints,
                &mut descriptors,
                false,
            )?;
        }
    }
    let descriptors = Descriptors::from_mat(&descriptors, kind, cols)?;
    ensure_descriptor_shape(&descriptors, &keypoints, cols)?;
    Ok((keypoints, descriptors))
}

fn ensure_descriptor_shape(
    descriptors: &Descriptors,
    keypoints: &KeyPoints,
    cols: usize,
) -> Result<()> {
    if descriptors.rows() != keypoints.len() || descriptors.cols() != cols {
        return Err(Error::invalid(format!(
            "backend returned {}x{} descriptors for {} keypoints of size {}",
            descriptors.rows(),
            descriptors.cols(),
            keypoints.len(),
            cols
        )));
    }
    Ok(())
}

pub(crate) fn norm_of(inner: &impl Feature2DTraitConst) -> Result<Norm> {
    Norm::from_cv(inner.default_norm()?)
}

/// 实现 [`Detect`]，要求类型带有 `inner: Ptr<_>` 字段
macro_rules! impl_detect {
    ($ty:ty) => {
        impl $crate::features::Detect for $ty {
            fn detect(
                &mut self,
                image: &::opencv::core::Mat,
                mask: Option<&::opencv::core::Mat>,
            ) -> $crate::error::Result<$crate::keypoint::KeyPoints> {
                $crate::features::detect_with(&mut self.inner, image, mask)
            }
        }
    };
}

/// 实现 [`Describe`]，要求类型带有 `inner: Ptr<_>` 字段
macro_rules! impl_describe {
    ($ty:ty) => {
        impl $crate::features::Describe for $ty {
            fn descriptor_size(&self) -> $crate::error::Result<usize> {
                Ok($crate::features::descriptor_shape(&self.inner)?.1)
            }

            fn descriptor_kind(&self) -> $crate::error::Result<$crate::matrix::DescriptorKind> {
                Ok($crate::features::descriptor_shape(&self.inner)?.0)
            }

            fn default_norm(&self) -> $crate::error::Result<$crate::matcher::Norm> {
                $crate::features::norm_of(&self.inner)
            }

            fn compute(
                &mut self,
                image: &::opencv::core::Mat,
                keypoints: &mut $crate::keypoint::KeyPoints,
            ) -> $crate::error::Result<$crate::matrix::Descriptors> {
                $crate::features::compute_with(&mut self.inner, image, keypoints)
            }
        }
    };
}

pub(crate) use impl_describe;
pub(crate) use impl_detect;

/// 特征对象的配置，可以从 JSON 读取
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureConfig {
    Orb(OrbParams),
    Sift(SiftParams),
    Fast(FastParams),
    Mser(MserParams),
    /// 将图片分块后分别检测
    Grid(GridParams),
    #[cfg(feature = "contrib")]
    Brief(BriefParams),
    #[cfg(feature = "contrib")]
    Surf(SurfParams),
    #[cfg(feature = "contrib")]
    Star(StarParams),
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self::Orb(OrbParams::default())
    }
}

impl FeatureConfig {
    pub fn build(&self) -> Result<Box<dyn Feature>> {
        let feature: Box<dyn Feature> = match self {
            Self::Orb(p) => Box::new(Orb::create(p)?),
            Self::Sift(p) => Box::new(Sift::create(p)?),
            Self::Fast(p) => Box::new(Fast::create(p)?),
            Self::Mser(p) => Box::new(Mser::create(p)?),
            Self::Grid(p) => Box::new(GridAdapted::create(p)?),
            #[cfg(feature = "contrib")]
            Self::Brief(p) => Box::new(Brief::create(p)?),
            #[cfg(feature = "contrib")]
            Self::Surf(p) => Box::new(Surf::create(p)?),
            #[cfg(feature = "contrib")]
            Self::Star(p) => Box::new(Star::create(p)?),
        };
        log::debug!("created {} from {:?}", feature.name(), self);
        Ok(feature)
    }
}
