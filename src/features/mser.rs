use opencv::core::Ptr;
use opencv::features2d;
use serde::{Deserialize, Serialize};

use super::{Detect, Feature, impl_detect};
use crate::error::Result;

/// MSER 区域检测参数，默认值与 OpenCV 一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MserParams {
    pub delta: i32,
    pub min_area: i32,
    pub max_area: i32,
    pub max_variation: f64,
    pub min_diversity: f64,
    // 以下参数只对彩色图片有效
    pub max_evolution: i32,
    pub area_threshold: f64,
    pub min_margin: f64,
    pub edge_blur_size: i32,
}

impl Default for MserParams {
    fn default() -> Self {
        Self {
            delta: 5,
            min_area: 60,
            max_area: 14400,
            max_variation: 0.25,
            min_diversity: 0.2,
            max_evolution: 200,
            area_threshold: 1.01,
            min_margin: 0.003,
            edge_blur_size: 5,
        }
    }
}

pub struct Mser {
    inner: Ptr<features2d::MSER>,
}

impl Mser {
    pub fn create(params: &MserParams) -> Result<Self> {
        let inner = features2d::MSER::create(
            params.delta,
            params.min_area,
            params.max_area,
            params.max_variation,
            params.min_diversity,
            params.max_evolution,
            params.area_threshold,
            params.min_margin,
            params.edge_blur_size,
        )?;
        Ok(Self { inner })
    }
}

impl_detect!(Mser);

impl Feature for Mser {
    fn name(&self) -> &'static str {
        "MSER"
    }

    fn as_detect(&mut self) -> Option<&mut dyn Detect> {
        Some(self)
    }
}
