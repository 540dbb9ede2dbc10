use opencv::core::Ptr;
use opencv::features2d::{self, FastFeatureDetector_DetectorType};
use serde::{Deserialize, Serialize};

use super::{Detect, Feature, impl_detect};
use crate::error::Result;

/// FAST 角点检测参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastParams {
    /// 中心像素与圆周像素的亮度差阈值
    pub threshold: i32,
    pub nonmax_suppression: bool,
}

impl Default for FastParams {
    fn default() -> Self {
        Self { threshold: 10, nonmax_suppression: true }
    }
}

pub struct Fast {
    inner: Ptr<features2d::FastFeatureDetector>,
}

impl Fast {
    pub fn create(params: &FastParams) -> Result<Self> {
        let inner = features2d::FastFeatureDetector::create(
            params.threshold,
            params.nonmax_suppression,
            FastFeatureDetector_DetectorType::TYPE_9_16,
        )?;
        Ok(Self { inner })
    }
}

impl_detect!(Fast);

impl Feature for Fast {
    fn name(&self) -> &'static str {
        "FAST"
    }

    fn as_detect(&mut self) -> Option<&mut dyn Detect> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::random_pattern;

    #[test]
    fn higher_threshold_fewer_corners() {
        let img = random_pattern(240, 320, 11).unwrap();
        let mut loose = Fast::create(&FastParams { threshold: 5, ..Default::default() }).unwrap();
        let mut strict = Fast::create(&FastParams { threshold: 60, ..Default::default() }).unwrap();
        let n1 = loose.detect(&img, None).unwrap().len();
        let n2 = strict.detect(&img, None).unwrap().len();
        assert!(n1 > 0);
        assert!(n2 <= n1);
    }
}
