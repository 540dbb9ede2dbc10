use opencv::core::{KeyPoint, Point2f, Vector};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 特征点序列，直接使用 OpenCV 的向量以免来回拷贝
pub type KeyPoints = Vector<KeyPoint>;

/// 可序列化的特征点，内存布局与 C 接口中的特征点一致
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct KeyPointRecord {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
    pub class_id: i32,
}

impl KeyPointRecord {
    pub fn at(x: f32, y: f32, size: f32, angle: f32) -> Self {
        Self { x, y, size, angle, response: 0., octave: 0, class_id: -1 }
    }

    pub fn to_keypoint(&self) -> Result<KeyPoint> {
        Ok(KeyPoint::new_point(
            Point2f::new(self.x, self.y),
            self.size,
            self.angle,
            self.response,
            self.octave,
            self.class_id,
        )?)
    }
}

impl From<&KeyPoint> for KeyPointRecord {
    fn from(kp: &KeyPoint) -> Self {
        let pt = kp.pt();
        Self {
            x: pt.x,
            y: pt.y,
            size: kp.size(),
            angle: kp.angle(),
            response: kp.response(),
            octave: kp.octave(),
            class_id: kp.class_id(),
        }
    }
}

pub fn to_records(keypoints: &KeyPoints) -> Vec<KeyPointRecord> {
    keypoints.iter().map(|kp| KeyPointRecord::from(&kp)).collect()
}

pub fn from_records(records: &[KeyPointRecord]) -> Result<KeyPoints> {
    let mut keypoints = KeyPoints::with_capacity(records.len());
    for r in records {
        keypoints.push(r.to_keypoint()?);
    }
    Ok(keypoints)
}

/// 取出所有特征点的坐标
pub fn points(keypoints: &KeyPoints) -> Vec<Point2f> {
    keypoints.iter().map(|kp| kp.pt()).collect()
}
