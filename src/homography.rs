//! 匹配结果的几何校验
//!
//! 所有函数都以 `indices`（每个观测特征点对应的模型特征点索引，形状为
//! `观测数 x k`，只使用第一列）和 `mask`（`观测数 x 1`，非零表示该匹配有效）
//! 描述匹配关系，投票会就地清除被淘汰的匹配

use log::debug;
use opencv::calib3d;
use opencv::core::{Mat, Point2f, Vector};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keypoint::KeyPoints;
use crate::matrix::Matrix;

/// 认为单应矩阵可信所需的最少内点数
pub const MIN_INLIERS: usize = 8;

/// 尺度旋转投票直方图的最大格数
pub const MAX_VOTE_BINS: usize = 1 << 20;

/// 3x3 单应矩阵，行优先
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Homography(pub [[f64; 3]; 3]);

impl Homography {
    pub fn identity() -> Self {
        Self([[1., 0., 0.], [0., 1., 0.], [0., 0., 1.]])
    }

    pub fn from_mat(mat: &Mat) -> Result<Self> {
        let m = Matrix::<f64>::from_mat(mat)?;
        m.ensure_shape(3, 3, "homography")?;
        let mut h = [[0.; 3]; 3];
        for (r, row) in m.iter_rows().enumerate() {
            h[r].copy_from_slice(row);
        }
        Ok(Self(h))
    }

    pub fn to_mat(&self) -> Result<Mat> {
        Ok(Mat::from_slice_2d(&self.0)?)
    }

    /// 缩放使右下角元素为 1
    pub fn normalized(&self) -> Option<Self> {
        let s = self.0[2][2];
        if s.abs() < f64::EPSILON || !s.is_finite() {
            return None;
        }
        Some(Self(self.0.map(|row| row.map(|v| v / s))))
    }

    pub fn determinant(&self) -> f64 {
        let h = &self.0;
        h[0][0] * (h[1][1] * h[2][2] - h[1][2] * h[2][1])
            - h[0][1] * (h[1][0] * h[2][2] - h[1][2] * h[2][0])
            + h[0][2] * (h[1][0] * h[2][1] - h[1][1] * h[2][0])
    }

    /// 含非有限值或接近奇异的矩阵视为退化
    pub fn is_degenerate(&self) -> bool {
        match self.normalized() {
            Some(h) => h.0.iter().flatten().any(|v| !v.is_finite()) || h.determinant().abs() < 1e-6,
            None => true,
        }
    }

    /// 投影一个点，落在无穷远处时返回 None
    pub fn project(&self, p: Point2f) -> Option<Point2f> {
        let h = &self.0;
        let (x, y) = (p.x as f64, p.y as f64);
        let w = h[2][0] * x + h[2][1] * y + h[2][2];
        if w.abs() < f64::EPSILON {
            return None;
        }
        let u = (h[0][0] * x + h[0][1] * y + h[0][2]) / w;
        let v = (h[1][0] * x + h[1][1] * y + h[1][2]) / w;
        Some(Point2f::new(u as f32, v as f32))
    }

    pub fn project_all(&self, points: &[Point2f]) -> Option<Vec<Point2f>> {
        points.iter().map(|p| self.project(*p)).collect()
    }
}

/// 单应矩阵估计能力
pub trait Estimate {
    /// 估计 `src -> dst` 的单应矩阵，成功时在 `inliers` 中标记内点
    ///
    /// 内点不足或结果退化时返回 `Ok(None)`，此时 `inliers` 不被修改
    fn estimate(
        &self,
        src: &[Point2f],
        dst: &[Point2f],
        inliers: &mut [bool],
    ) -> Result<Option<Homography>>;
}

/// OpenCV 的 RANSAC 单应矩阵估计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ransac {
    /// 最大重投影误差（像素）
    pub threshold: f64,
    pub min_inliers: usize,
}

impl Ransac {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, min_inliers: MIN_INLIERS }
    }
}

impl Estimate for Ransac {
    fn estimate(
        &self,
        src: &[Point2f],
        dst: &[Point2f],
        inliers: &mut [bool],
    ) -> Result<Option<Homography>> {
        if src.len() != dst.len() || src.len() != inliers.len() {
            return Err(Error::invalid("point sets and inlier flags must have the same length"));
        }
        if src.len() < 4 || src.len() < self.min_inliers {
            return Ok(None);
        }
        let src_points = Vector::<Point2f>::from_slice(src);
        let dst_points = Vector::<Point2f>::from_slice(dst);
        let mut flags = Mat::default();
        let h = calib3d::find_homography(
            &src_points,
            &dst_points,
            &mut flags,
            calib3d::RANSAC,
            self.threshold,
        )?;
        if h.empty() {
            return Ok(None);
        }
        let flags = Matrix::<u8>::from_mat(&flags)?;
        let count = flags.as_slice().iter().filter(|f| **f != 0).count();
        if count < self.min_inliers || flags.as_slice().len() != inliers.len() {
            debug!("homography rejected: {} inliers", count);
            return Ok(None);
        }
        let homography = Homography::from_mat(&h)?;
        if homography.is_degenerate() {
            debug!("homography rejected: degenerate matrix");
            return Ok(None);
        }
        for (dst, f) in inliers.iter_mut().zip(flags.as_slice()) {
            *dst = *f != 0;
        }
        Ok(Some(homography))
    }
}

fn check_match_layout(
    model: &KeyPoints,
    observed: &KeyPoints,
    indices: &Matrix<i32>,
    mask: &Matrix<u8>,
) -> Result<()> {
    if indices.rows() != observed.len() || indices.cols() == 0 {
        return Err(Error::invalid(format!(
            "indices must have {} rows and at least one column, got {}x{}",
            observed.len(),
            indices.rows(),
            indices.cols()
        )));
    }
    mask.ensure_shape(observed.len(), 1, "mask")?;
    for (i, row) in indices.iter_rows().enumerate() {
        if mask.as_slice()[i] != 0 && row[0] >= model.len() as i32 {
            return Err(Error::invalid(format!(
                "match {} refers to model keypoint {} of {}",
                i,
                row[0],
                model.len()
            )));
        }
    }
    Ok(())
}

/// 有效匹配：mask 非零且索引非负
fn active_matches<'a>(
    indices: &'a Matrix<i32>,
    mask: &'a Matrix<u8>,
) -> impl Iterator<Item = (usize, usize)> + 'a {
    (0..indices.rows()).filter_map(move |i| {
        let idx = indices.row(i)[0];
        (mask.as_slice()[i] != 0 && idx >= 0).then_some((i, idx as usize))
    })
}

/// 使用任意 [`Estimate`] 实现估计模型到观测图像的单应矩阵
///
/// 成功时 `mask` 被更新为内点，失败时 `mask` 保持不变且不产生任何矩阵
pub fn estimate_homography_with(
    estimator: &impl Estimate,
    model: &KeyPoints,
    observed: &KeyPoints,
    indices: &Matrix<i32>,
    mask: &mut Matrix<u8>,
) -> Result<Option<Homography>> {
    check_match_layout(model, observed, indices, mask)?;

    let pairs: Vec<(usize, usize)> = active_matches(indices, mask).collect();
    if pairs.len() < 4 {
        return Ok(None);
    }
    let mut src = Vec::with_capacity(pairs.len());
    let mut dst = Vec::with_capacity(pairs.len());
    for &(i, m) in &pairs {
        src.push(model.get(m)?.pt());
        dst.push(observed.get(i)?.pt());
    }

    let mut inliers = vec![false; pairs.len()];
    let Some(homography) = estimator.estimate(&src, &dst, &mut inliers)? else {
        return Ok(None);
    };
    for (&(i, _), inlier) in pairs.iter().zip(inliers) {
        if !inlier {
            mask.set(i, 0, 0);
        }
    }
    Ok(Some(homography))
}

/// 使用 RANSAC 估计单应矩阵，`ransac_threshold` 为最大重投影误差
pub fn estimate_homography(
    model: &KeyPoints,
    observed: &KeyPoints,
    indices: &Matrix<i32>,
    mask: &mut Matrix<u8>,
    ransac_threshold: f64,
) -> Result<Option<Homography>> {
    estimate_homography_with(&Ransac::new(ransac_threshold), model, observed, indices, mask)
}

/// 索引为负的匹配视为无效
fn clear_negative(indices: &Matrix<i32>, mask: &mut Matrix<u8>) {
    for i in 0..mask.rows() {
        if indices.row(i)[0] < 0 {
            mask.set(i, 0, 0);
        }
    }
}

/// 按尺度比和旋转角差对匹配投票，淘汰票数不足最高票一半的组合
///
/// 尺度按 `log10(观测尺寸 / 模型尺寸)` 以 `log10(scale_increment)` 为步长分组，
/// 旋转按 `360 / rotation_bins` 度分组，返回剩余有效匹配数量。
/// 直方图超过 [`MAX_VOTE_BINS`] 格时返回 `InvalidArgument`，`mask` 保持不变
pub fn vote_for_size_and_orientation(
    model: &KeyPoints,
    observed: &KeyPoints,
    indices: &Matrix<i32>,
    mask: &mut Matrix<u8>,
    scale_increment: f64,
    rotation_bins: usize,
) -> Result<usize> {
    check_match_layout(model, observed, indices, mask)?;
    if !(scale_increment > 1.) {
        return Err(Error::invalid("scale_increment must be greater than 1"));
    }
    if rotation_bins == 0 {
        return Err(Error::invalid("rotation_bins must be positive"));
    }

    let mut votes = vec![];
    for (i, m) in active_matches(indices, mask) {
        let (o, m) = (observed.get(i)?, model.get(m)?);
        let s = if o.size() > 0. && m.size() > 0. {
            (o.size() as f64 / m.size() as f64).log10()
        } else {
            0.
        };
        let mut r = (o.angle() - m.angle()) as f64;
        if r < 0. {
            r += 360.;
        }
        votes.push((i, s, r.rem_euclid(360.)));
    }
    if votes.is_empty() {
        clear_negative(indices, mask);
        return Ok(0);
    }

    let min_s = votes.iter().map(|v| v.1).fold(f64::MAX, f64::min);
    let max_s = votes.iter().map(|v| v.1).fold(f64::MIN, f64::max);
    let step = scale_increment.log10();
    let span = ((max_s - min_s) / step).ceil();
    if !span.is_finite() || span > MAX_VOTE_BINS as f64 {
        return Err(Error::invalid(format!(
            "scale_increment {} is too fine for a scale range of {:.3}",
            scale_increment,
            max_s - min_s
        )));
    }
    let scale_bins = (span as usize).max(2);
    let total_bins = scale_bins
        .checked_mul(rotation_bins)
        .filter(|n| *n <= MAX_VOTE_BINS)
        .ok_or_else(|| {
            Error::invalid(format!(
                "{} scale bins x {} rotation bins exceed {}",
                scale_bins, rotation_bins, MAX_VOTE_BINS
            ))
        })?;
    let rotation_step = 360. / rotation_bins as f64;
    clear_negative(indices, mask);

    let bin_of = |s: f64, r: f64| {
        let sb = (((s - min_s) / step) as usize).min(scale_bins - 1);
        let rb = ((r / rotation_step) as usize).min(rotation_bins - 1);
        sb * rotation_bins + rb
    };
    let mut hist = vec![0usize; total_bins];
    for &(_, s, r) in &votes {
        hist[bin_of(s, r)] += 1;
    }
    let max_votes = hist.iter().copied().max().unwrap_or(0);
    let threshold = max_votes as f64 * 0.5;
    for &(i, s, r) in &votes {
        if (hist[bin_of(s, r)] as f64) <= threshold {
            mask.set(i, 0, 0);
        }
    }
    Ok(mask.as_slice().iter().filter(|v| **v != 0).count())
}

/// 比值检验：最近距离与次近距离之比超过 `threshold` 的匹配被清除
///
/// 次近距离为 0 时比值按 0 计，两个近邻距离都为 0 的完全重复匹配会被保留。
/// `distances` 至少需要两列，返回剩余有效匹配数量
pub fn vote_for_uniqueness(
    distances: &Matrix<f32>,
    threshold: f64,
    mask: &mut Matrix<u8>,
) -> Result<usize> {
    if distances.cols() < 2 {
        return Err(Error::invalid("uniqueness vote needs at least two neighbors per row"));
    }
    mask.ensure_shape(distances.rows(), 1, "mask")?;
    for (i, row) in distances.iter_rows().enumerate() {
        let (d0, d1) = (row[0] as f64, row[1] as f64);
        let ratio = if d1 > 0. { d0 / d1 } else { 0. };
        if ratio > threshold || d0 == f32::MAX as f64 {
            mask.set(i, 0, 0);
        }
    }
    Ok(mask.as_slice().iter().filter(|v| **v != 0).count())
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::keypoint::{KeyPointRecord, from_records};

    fn affine(p: Point2f) -> Point2f {
        let (s, c) = 15f32.to_radians().sin_cos();
        Point2f::new(1.2 * (c * p.x - s * p.y) + 30., 1.2 * (s * p.x + c * p.y) - 12.)
    }

    fn identity_matches(n: usize) -> (Matrix<i32>, Matrix<u8>) {
        let indices = Matrix::from_vec(n, 1, (0..n as i32).collect()).unwrap();
        (indices, Matrix::filled(n, 1, 1))
    }

    fn records(points: &[Point2f], size: f32, angle: f32) -> KeyPoints {
        let r: Vec<_> = points.iter().map(|p| KeyPointRecord::at(p.x, p.y, size, angle)).collect();
        from_records(&r).unwrap()
    }

    #[test]
    fn recovers_affine_transform() {
        let mut rng = StdRng::seed_from_u64(1);
        let src: Vec<Point2f> = (0..40)
            .map(|_| Point2f::new(rng.random_range(0.0..400.), rng.random_range(0.0..300.)))
            .collect();
        let dst: Vec<Point2f> = src.iter().copied().map(affine).collect();
        let (indices, mut mask) = identity_matches(40);

        let h = estimate_homography(
            &records(&src, 10., 0.),
            &records(&dst, 12., 15.),
            &indices,
            &mut mask,
            3.,
        )
        .unwrap()
        .expect("homography should be found");

        for p in [Point2f::new(0., 0.), Point2f::new(200., 100.), Point2f::new(400., 300.)] {
            let (got, want) = (h.project(p).unwrap(), affine(p));
            assert!((got.x - want.x).abs() < 0.05, "{:?} vs {:?}", got, want);
            assert!((got.y - want.y).abs() < 0.05, "{:?} vs {:?}", got, want);
        }
        assert_eq!(mask.as_slice().iter().filter(|v| **v != 0).count(), 40);
    }

    #[test]
    fn random_pairs_fail() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut random_points = |n| -> Vec<Point2f> {
            (0..n)
                .map(|_| Point2f::new(rng.random_range(0.0..640.), rng.random_range(0.0..480.)))
                .collect()
        };
        let (src, dst) = (random_points(50), random_points(50));
        let (indices, mut mask) = identity_matches(50);
        let before = mask.clone();
        let h = estimate_homography(
            &records(&src, 10., 0.),
            &records(&dst, 10., 0.),
            &indices,
            &mut mask,
            3.,
        )
        .unwrap();
        assert!(h.is_none());
        assert_eq!(mask, before);
    }

    #[test]
    fn too_few_matches() {
        let pts = [Point2f::new(0., 0.), Point2f::new(1., 0.), Point2f::new(0., 1.)];
        let (indices, mut mask) = identity_matches(3);
        let kps = records(&pts, 1., 0.);
        assert!(estimate_homography(&kps, &kps, &indices, &mut mask, 3.).unwrap().is_none());
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let pts = [Point2f::new(0., 0.), Point2f::new(1., 0.)];
        let kps = records(&pts, 1., 0.);
        let indices = Matrix::from_vec(2, 1, vec![0, 5]).unwrap();
        let mut mask = Matrix::filled(2, 1, 1u8);
        assert!(matches!(
            estimate_homography(&kps, &kps, &indices, &mut mask, 3.),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn size_orientation_vote_drops_outliers() {
        let pts: Vec<Point2f> = (0..12).map(|i| Point2f::new(i as f32 * 10., 5.)).collect();
        let model = records(&pts, 10., 10.);
        // 前 10 个匹配尺度翻倍、旋转 90 度，后两个与之不一致
        let mut observed = vec![];
        for (i, p) in pts.iter().enumerate() {
            let (size, angle) = if i < 10 { (20., 100.) } else { (5., 300.) };
            observed.push(KeyPointRecord::at(p.x, p.y, size, angle));
        }
        let observed = from_records(&observed).unwrap();
        let (indices, mut mask) = identity_matches(12);

        let n = vote_for_size_and_orientation(&model, &observed, &indices, &mut mask, 1.5, 20)
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(mask.get(10, 0), Some(0));
        assert_eq!(mask.get(11, 0), Some(0));
    }

    #[test]
    fn uniqueness_vote() {
        let distances = Matrix::from_rows(&[[1f32, 10.], [9., 10.], [0., f32::MAX]]).unwrap();
        let mut mask = Matrix::filled(3, 1, 1u8);
        assert_eq!(vote_for_uniqueness(&distances, 0.8, &mut mask).unwrap(), 2);
        assert_eq!(mask.as_slice(), &[1, 0, 1]);
    }

    #[test]
    fn uniqueness_vote_keeps_exact_duplicates() {
        let distances = Matrix::from_rows(&[[0f32, 0.], [0., 3.], [2., 2.]]).unwrap();
        let mut mask = Matrix::filled(3, 1, 1u8);
        assert_eq!(vote_for_uniqueness(&distances, 0.8, &mut mask).unwrap(), 2);
        assert_eq!(mask.as_slice(), &[1, 1, 0]);
    }

    #[test]
    fn size_orientation_vote_rejects_oversized_histogram() {
        let pts = [Point2f::new(0., 0.), Point2f::new(10., 0.)];
        let model = records(&pts, 1., 0.);
        let observed = from_records(&[
            KeyPointRecord::at(0., 0., 1., 0.),
            KeyPointRecord::at(10., 0., 100., 0.),
        ])
        .unwrap();
        let (indices, mut mask) = identity_matches(2);

        let result =
            vote_for_size_and_orientation(&model, &observed, &indices, &mut mask, 1.0000001, 20);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        // 尺度格数不大但与旋转格数相乘后超限
        let result =
            vote_for_size_and_orientation(&model, &observed, &indices, &mut mask, 1.5, usize::MAX);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn degenerate_matrix() {
        assert!(!Homography::identity().is_degenerate());
        assert!(Homography([[0.; 3]; 3]).is_degenerate());
        assert!(Homography([[1., 2., 0.], [2., 4., 0.], [0., 0., 1.]]).is_degenerate());
    }
}
