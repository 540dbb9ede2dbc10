use log::debug;
use opencv::core::{Mat, Point2f};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::Feature;
use crate::homography::{
    Homography, estimate_homography, vote_for_size_and_orientation, vote_for_uniqueness,
};
use crate::keypoint::KeyPoints;
use crate::matcher::{BruteForceMatcher, Match};
use crate::matrix::Matrix;

/// 平面目标跟踪参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// 最近与次近距离之比的上限
    pub uniqueness_threshold: f64,
    pub scale_increment: f64,
    pub rotation_bins: usize,
    pub ransac_threshold: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self { uniqueness_threshold: 0.8, scale_increment: 1.5, rotation_bins: 20, ransac_threshold: 2. }
    }
}

/// 一次成功的检测
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub homography: Homography,
    /// 模型图片四个角在观测图片中的位置，顺序为左上、右上、右下、左下
    #[serde(serialize_with = "serialize_points")]
    pub corners: [Point2f; 4],
    /// 通过所有校验的匹配数量
    pub inliers: usize,
    /// 观测图片的特征点数量
    pub observed: usize,
}

fn serialize_points<S: serde::Serializer>(
    points: &[Point2f; 4],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(points.len()))?;
    for p in points {
        seq.serialize_element(&[p.x, p.y])?;
    }
    seq.end()
}

/// 在观测图片中寻找一个平面模型图片
pub struct PlanarTracker {
    feature: Box<dyn Feature>,
    matcher: BruteForceMatcher,
    keypoints: KeyPoints,
    size: (f32, f32),
    params: TrackerParams,
}

impl PlanarTracker {
    /// `feature` 必须同时支持检测和描述
    pub fn new(mut feature: Box<dyn Feature>, model: &Mat, params: TrackerParams) -> Result<Self> {
        let norm = feature
            .as_describe_ref()
            .ok_or(Error::Unsupported("compute"))?
            .default_norm()?;
        let (keypoints, descriptors) = feature.detect_and_compute(model, None)?;
        let mut matcher = BruteForceMatcher::new(norm, false)?;
        matcher.add(&descriptors)?;
        debug!("planar model has {} keypoints", keypoints.len());
        Ok(Self {
            feature,
            matcher,
            keypoints,
            size: (model.cols() as f32, model.rows() as f32),
            params,
        })
    }

    pub fn model_keypoints(&self) -> &KeyPoints {
        &self.keypoints
    }

    pub fn model_corners(&self) -> [Point2f; 4] {
        let (w, h) = self.size;
        [Point2f::new(0., 0.), Point2f::new(w, 0.), Point2f::new(w, h), Point2f::new(0., h)]
    }

    /// 未找到模型时返回 `Ok(None)`
    pub fn detect(&mut self, observed: &Mat) -> Result<Option<Detection>> {
        let (keypoints, descriptors) = self.feature.detect_and_compute(observed, None)?;
        if keypoints.len() < 4 || self.matcher.train_len() < 4 {
            return Ok(None);
        }

        let matches = self.matcher.knn_match(&descriptors, 2, None)?;
        let mut mask = Matrix::filled(matches.rows(), 1, 1u8);
        let unique =
            vote_for_uniqueness(&matches.distances, self.params.uniqueness_threshold, &mut mask)?;
        if unique < 4 {
            debug!("only {} unique matches", unique);
            return Ok(None);
        }
        let voted = vote_for_size_and_orientation(
            &self.keypoints,
            &keypoints,
            &matches.indices,
            &mut mask,
            self.params.scale_increment,
            self.params.rotation_bins,
        )?;
        if voted < 4 {
            debug!("only {} matches survive the size and orientation vote", voted);
            return Ok(None);
        }

        let Some(homography) = estimate_homography(
            &self.keypoints,
            &keypoints,
            &matches.indices,
            &mut mask,
            self.params.ransac_threshold,
        )?
        else {
            return Ok(None);
        };
        let Some(corners) = homography.project_all(&self.model_corners()) else {
            return Ok(None);
        };
        let inliers = mask.as_slice().iter().filter(|v| **v != 0).count();
        Ok(Some(Detection {
            homography,
            corners: [corners[0], corners[1], corners[2], corners[3]],
            inliers,
            observed: keypoints.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{self, Size};
    use opencv::imgproc;

    use super::*;
    use crate::features::{FastParams, FeatureConfig, OrbParams};
    use crate::image::{blank, random_pattern};

    fn orb() -> Box<dyn Feature> {
        FeatureConfig::Orb(OrbParams { nfeatures: 1000, ..Default::default() }).build().unwrap()
    }

    #[test]
    fn finds_shifted_model() {
        let model = random_pattern(240, 320, 21).unwrap();
        // 平移 (40, 30) 后放到更大的画布上
        let m = Mat::from_slice_2d(&[[1., 0., 40.], [0., 1., 30.]]).unwrap();
        let mut observed = Mat::default();
        imgproc::warp_affine(
            &model,
            &mut observed,
            &m,
            Size::new(420, 320),
            imgproc::INTER_LINEAR,
            core::BORDER_CONSTANT,
            core::Scalar::default(),
        )
        .unwrap();

        let mut tracker = PlanarTracker::new(orb(), &model, TrackerParams::default()).unwrap();
        let detection = tracker.detect(&observed).unwrap().expect("model should be found");
        let expected = [(40., 30.), (360., 30.), (360., 270.), (40., 270.)];
        for (c, (x, y)) in detection.corners.iter().zip(expected) {
            assert!((c.x - x).abs() < 3. && (c.y - y).abs() < 3., "{:?}", detection.corners);
        }
        assert!(detection.inliers >= crate::homography::MIN_INLIERS);
    }

    #[test]
    fn blank_scene_has_no_model() {
        let model = random_pattern(240, 320, 21).unwrap();
        let mut tracker = PlanarTracker::new(orb(), &model, TrackerParams::default()).unwrap();
        assert!(tracker.detect(&blank(240, 320, 0.).unwrap()).unwrap().is_none());
    }

    #[test]
    fn detector_only_feature_is_rejected() {
        let model = random_pattern(64, 64, 1).unwrap();
        let fast = FeatureConfig::Fast(FastParams::default()).build().unwrap();
        assert!(matches!(
            PlanarTracker::new(fast, &model, TrackerParams::default()),
            Err(Error::Unsupported(_))
        ));
    }
}
