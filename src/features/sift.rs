use opencv::core::{Mat, Ptr};
use opencv::features2d;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Describe, Detect, Feature, detect_and_compute_with, impl_describe, impl_detect};
use crate::error::Result;
use crate::keypoint::KeyPoints;
use crate::matrix::Descriptors;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftParams {
    /// 保留的特征点数量，0 表示全部保留
    pub nfeatures: i32,
    pub n_octave_layers: i32,
    /// 低对比度过滤阈值，越大特征点越少
    pub contrast_threshold: f64,
    /// 边缘响应过滤阈值，越大特征点越多
    pub edge_threshold: f64,
    pub sigma: f64,
}

impl Default for SiftParams {
    fn default() -> Self {
        Self {
            nfeatures: 0,
            n_octave_layers: 3,
            contrast_threshold: 0.04,
            edge_threshold: 10.,
            sigma: 1.6,
        }
    }
}

pub struct Sift {
    inner: Ptr<features2d::SIFT>,
}

impl Sift {
    pub fn create(params: &SiftParams) -> Result<Self> {
        // SIFT::create 的参数个数随 OpenCV 版本变化，这里统一用 setter 设置
        let mut inner = features2d::SIFT::create_def()?;
        inner.set_n_features(params.nfeatures)?;
        inner.set_n_octave_layers(params.n_octave_layers)?;
        inner.set_contrast_threshold(params.contrast_threshold)?;
        inner.set_edge_threshold(params.edge_threshold)?;
        inner.set_sigma(params.sigma)?;
        Ok(Self { inner })
    }
}

impl_detect!(Sift);
impl_describe!(Sift);

impl Feature for Sift {
    fn name(&self) -> &'static str {
        "SIFT"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::random_pattern;
    use crate::matcher::Norm;
    use crate::matrix::DescriptorKind;

    #[test]
    fn float_descriptors() {
        let mut sift = Sift::create(&SiftParams::default()).unwrap();
        assert_eq!(sift.descriptor_size().unwrap(), 128);
        assert_eq!(sift.descriptor_kind().unwrap(), DescriptorKind::Float);
        assert_eq!(sift.default_norm().unwrap(), Norm::L2);

        let img = random_pattern(200, 200, 3).unwrap();
        let (kps, des) = sift.detect_and_compute(&img, None).unwrap();
        assert_eq!(des.rows(), kps.len());
        assert!(matches!(des, Descriptors::Float(_)));
    }
}
