//! 基于随机森林的图像块分类器
//!
//! 每个训练点是一个类别，训练样本由 [`PatchGenerator`] 对该点周围的图像块做随机仿射变换得到，
//! 查询时返回各类别的归一化投票数，可作为特征点的签名

use log::debug;
use opencv::core::{self, Mat, Point, Point2f, Ptr, Size, TermCriteria};
use opencv::imgproc;
use opencv::ml;
use opencv::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::check_image;
use crate::matrix::Matrix;

/// 随机生成图像块的视角变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchGenerator {
    /// 最大旋转角度（度），实际角度在 `[-max_rotation, max_rotation]` 内均匀分布
    pub max_rotation: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    /// 每个像素叠加的均匀噪声幅度
    pub noise: f64,
}

impl Default for PatchGenerator {
    fn default() -> Self {
        Self { max_rotation: 180., min_scale: 0.6, max_scale: 1.5, noise: 5. }
    }
}

/// 边长为 `patch_size` 的图像块中心在块内的坐标
fn patch_center(patch_size: i32) -> f64 {
    (patch_size as f64 - 1.) / 2.
}

/// 不做任何变换，直接截取以 `center` 为中心的图像块
fn extract_patch(image: &Mat, center: Point2f, patch_size: i32) -> Result<Mat> {
    let mut patch = Mat::default();
    imgproc::get_rect_sub_pix(image, Size::new(patch_size, patch_size), center, &mut patch, -1)?;
    Ok(patch)
}

impl PatchGenerator {
    fn validate(&self) -> Result<()> {
        if !(self.min_scale > 0. && self.min_scale <= self.max_scale) {
            return Err(Error::invalid("patch scale range must be positive and ordered"));
        }
        if self.max_rotation < 0. || self.noise < 0. {
            return Err(Error::invalid("rotation and noise must not be negative"));
        }
        Ok(())
    }

    /// 生成以 `center` 为中心、边长为 `patch_size` 的随机视角图像块
    pub fn generate(
        &self,
        image: &Mat,
        center: Point2f,
        patch_size: i32,
        rng: &mut impl Rng,
    ) -> Result<Mat> {
        let angle = if self.max_rotation > 0. {
            rng.random_range(-self.max_rotation..=self.max_rotation)
        } else {
            0.
        };
        let scale = if self.max_scale > self.min_scale {
            rng.random_range(self.min_scale..=self.max_scale)
        } else {
            self.min_scale
        };

        // 以 center 为中心旋转缩放后，把 center 平移到图像块中心，与 get_rect_sub_pix 的取法一致
        let rotation = imgproc::get_rotation_matrix_2d(center, angle, scale)?;
        let mut m = Matrix::<f64>::from_mat(&rotation)?;
        let half = patch_center(patch_size);
        let (tx, ty) = (m.row(0)[2], m.row(1)[2]);
        m.set(0, 2, tx + half - center.x as f64);
        m.set(1, 2, ty + half - center.y as f64);

        let mut patch = Mat::default();
        imgproc::warp_affine(
            image,
            &mut patch,
            &m.to_mat()?,
            Size::new(patch_size, patch_size),
            imgproc::INTER_LINEAR,
            core::BORDER_REPLICATE,
            core::Scalar::default(),
        )?;

        if self.noise > 0. {
            let mut pixels = Matrix::<u8>::from_mat(&patch)?;
            for p in pixels.as_mut_slice() {
                let v = *p as f64 + rng.random_range(-self.noise..=self.noise);
                *p = v.clamp(0., 255.) as u8;
            }
            patch = pixels.to_mat()?;
        }
        Ok(patch)
    }
}

/// 训练参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    pub num_trees: i32,
    pub depth: i32,
    /// 每个训练点生成的视角数量
    pub views: usize,
    pub patch_size: i32,
    pub generator: PatchGenerator,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            num_trees: 48,
            depth: 9,
            views: 100,
            patch_size: 32,
            generator: PatchGenerator::default(),
        }
    }
}

/// 随机森林图像块分类器
pub struct RTreeClassifier {
    model: Option<Ptr<ml::RTrees>>,
    classes: usize,
    patch_size: i32,
}

impl Default for RTreeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn patch_to_sample(patch: &Mat, samples: &mut Matrix<f32>) -> Result<()> {
    let pixels = Matrix::<u8>::from_mat(patch)?;
    let row: Vec<f32> = pixels.as_slice().iter().map(|p| *p as f32 / 255.).collect();
    samples.push(&row)
}

impl RTreeClassifier {
    /// 创建一个未训练的分类器
    pub fn new() -> Self {
        Self { model: None, classes: 0, patch_size: 0 }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// 类别数量，即训练点数量
    pub fn num_classes(&self) -> usize {
        self.classes
    }

    pub fn patch_size(&self) -> i32 {
        self.patch_size
    }

    /// 以 `points` 中的每个点为一个类别训练分类器，重复训练会覆盖之前的模型
    pub fn train(
        &mut self,
        image: &Mat,
        points: &[Point],
        params: &ClassifierParams,
        rng: &mut impl Rng,
    ) -> Result<()> {
        check_image(image)?;
        if points.is_empty() {
            return Err(Error::invalid("no training points"));
        }
        if params.num_trees <= 0 || params.depth <= 0 || params.views == 0 || params.patch_size <= 0 {
            return Err(Error::invalid("trees, depth, views and patch size must be positive"));
        }
        params.generator.validate()?;

        let dim = (params.patch_size * params.patch_size) as usize;
        let mut samples = Matrix::<f32>::new(dim);
        let mut responses = Matrix::<i32>::new(1);
        for (class, point) in points.iter().enumerate() {
            let center = Point2f::new(point.x as f32, point.y as f32);
            for _ in 0..params.views {
                let patch = params.generator.generate(image, center, params.patch_size, rng)?;
                patch_to_sample(&patch, &mut samples)?;
                responses.push(&[class as i32])?;
            }
        }
        debug!(
            "training random trees: {} classes, {} samples of {} dims",
            points.len(),
            samples.rows(),
            dim
        );

        let mut model = ml::RTrees::create()?;
        model.set_max_depth(params.depth)?;
        model.set_min_sample_count(2)?;
        model.set_calculate_var_importance(false)?;
        model.set_term_criteria(TermCriteria::new(
            core::TermCriteria_Type::COUNT as i32,
            params.num_trees,
            0.,
        )?)?;
        if !model.train(&samples.to_mat()?, ml::ROW_SAMPLE, &responses.to_mat()?)? {
            return Err(Error::invalid("random trees training failed"));
        }

        self.model = Some(model);
        self.classes = points.len();
        self.patch_size = params.patch_size;
        Ok(())
    }

    /// 计算 `point` 周围图像块的签名：各类别的得票比例，长度为 [`num_classes`](Self::num_classes)
    pub fn signature(&self, image: &Mat, point: Point) -> Result<Vec<f32>> {
        let model = self.model.as_ref().ok_or(Error::NotTrained)?;
        check_image(image)?;

        let patch = extract_patch(image, Point2f::new(point.x as f32, point.y as f32), self.patch_size)?;
        let mut sample = Matrix::<f32>::new((self.patch_size * self.patch_size) as usize);
        patch_to_sample(&patch, &mut sample)?;

        // 第一行是类别标签，第二行是对应的票数
        let mut votes = Mat::default();
        model.get_votes(&sample.to_mat()?, &mut votes, 0)?;
        let votes = Matrix::<i32>::from_mat(&votes)?;

        let mut signature = vec![0f32; self.classes];
        if votes.rows() < 2 {
            return Ok(signature);
        }
        let total: i32 = votes.row(1).iter().sum();
        if total <= 0 {
            return Ok(signature);
        }
        for (&label, &count) in votes.row(0).iter().zip(votes.row(1)) {
            if let Some(slot) = usize::try_from(label).ok().and_then(|l| signature.get_mut(l)) {
                *slot = count as f32 / total as f32;
            }
        }
        Ok(signature)
    }
}
