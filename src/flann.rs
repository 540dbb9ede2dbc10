use log::debug;
use opencv::core::{CV_32F, CV_32S, Mat};
use opencv::flann;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matcher::KnnMatches;
use crate::matrix::{DescriptorKind, Descriptors, Matrix};

/// k-means 初始聚类中心的选择方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentersInit {
    #[default]
    Random,
    Gonzales,
    KMeansPP,
}

impl CentersInit {
    fn to_cv(self) -> flann::flann_centers_init_t {
        match self {
            Self::Random => flann::flann_centers_init_t::FLANN_CENTERS_RANDOM,
            Self::Gonzales => flann::flann_centers_init_t::FLANN_CENTERS_GONZALES,
            Self::KMeansPP => flann::flann_centers_init_t::FLANN_CENTERS_KMEANSPP,
        }
    }
}

/// 索引算法及其参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum IndexParams {
    /// 线性扫描，结果精确
    Linear,
    /// 随机 k-d 树
    KdTree { trees: i32 },
    /// 层次 k-means 树
    KMeans { branching: i32, iterations: i32, centers_init: CentersInit, cb_index: f32 },
    /// k-d 树与 k-means 树的组合
    Composite {
        trees: i32,
        branching: i32,
        iterations: i32,
        centers_init: CentersInit,
        cb_index: f32,
    },
    /// 自动选择算法和参数以达到目标精度
    Autotuned { target_precision: f32, build_weight: f32, memory_weight: f32, sample_fraction: f32 },
    /// 局部敏感哈希，只用于二进制描述符
    Lsh { table_number: i32, key_size: i32, multi_probe_level: i32 },
}

impl Default for IndexParams {
    fn default() -> Self {
        Self::KdTree { trees: 4 }
    }
}

impl IndexParams {
    pub fn kmeans_default() -> Self {
        Self::KMeans { branching: 32, iterations: 11, centers_init: CentersInit::Random, cb_index: 0.2 }
    }

    pub fn composite_default() -> Self {
        Self::Composite {
            trees: 4,
            branching: 32,
            iterations: 11,
            centers_init: CentersInit::Random,
            cb_index: 0.2,
        }
    }

    pub fn autotuned_default() -> Self {
        Self::Autotuned {
            target_precision: 0.9,
            build_weight: 0.01,
            memory_weight: 0.,
            sample_fraction: 0.1,
        }
    }

    pub fn lsh_default() -> Self {
        Self::Lsh { table_number: 6, key_size: 12, multi_probe_level: 1 }
    }

    /// 该算法接受的特征类型
    pub fn feature_kind(&self) -> DescriptorKind {
        match self {
            Self::Lsh { .. } => DescriptorKind::Binary,
            _ => DescriptorKind::Float,
        }
    }

    fn to_cv(&self) -> Result<flann::IndexParams> {
        let params = match *self {
            Self::Linear => flann::IndexParams::from(flann::LinearIndexParams::default()?),
            Self::KdTree { trees } => flann::IndexParams::from(flann::KDTreeIndexParams::new(trees)?),
            Self::KMeans { branching, iterations, centers_init, cb_index } => {
                flann::IndexParams::from(flann::KMeansIndexParams::new(
                    branching,
                    iterations,
                    centers_init.to_cv(),
                    cb_index,
                )?)
            }
            Self::Composite { trees, branching, iterations, centers_init, cb_index } => {
                flann::IndexParams::from(flann::CompositeIndexParams::new(
                    trees,
                    branching,
                    iterations,
                    centers_init.to_cv(),
                    cb_index,
                )?)
            }
            Self::Autotuned { target_precision, build_weight, memory_weight, sample_fraction } => {
                flann::IndexParams::from(flann::AutotunedIndexParams::new(
                    target_precision,
                    build_weight,
                    memory_weight,
                    sample_fraction,
                )?)
            }
            Self::Lsh { table_number, key_size, multi_probe_level } => flann::IndexParams::from(
                flann::LshIndexParams::new(table_number, key_size, multi_probe_level)?,
            ),
        };
        Ok(params)
    }
}

// 与 cvflann 中的定义一致
const CHECKS_UNLIMITED: i32 = -1;
const CHECKS_AUTOTUNED: i32 = -2;

/// 搜索时检查的叶子数量，越大越精确也越慢
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checks {
    /// 使用自动调优时得到的参数
    Autotuned,
    /// 不限制，等价于精确搜索
    Unlimited,
    Exact(i32),
}

impl Checks {
    /// 0 表示自动，负数表示不限制
    pub fn from_raw(checks: i32) -> Self {
        match checks {
            0 => Self::Autotuned,
            c if c < 0 => Self::Unlimited,
            c => Self::Exact(c),
        }
    }

    fn to_cv(self) -> i32 {
        match self {
            Self::Autotuned => CHECKS_AUTOTUNED,
            Self::Unlimited => CHECKS_UNLIMITED,
            Self::Exact(c) => c,
        }
    }

    fn search_params(self) -> Result<flann::SearchParams> {
        Ok(flann::SearchParams::new_1(self.to_cv(), 0.0, true)?)
    }
}

/// 半径搜索的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusMatches {
    /// 半径内找到的数量
    pub count: usize,
    /// 最多 `max_results` 个 (索引, 距离)，按距离升序
    pub neighbors: Vec<(usize, f32)>,
}

/// 近邻索引能力
pub trait IndexSearch {
    /// 索引中的向量数量
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// 向量维度
    fn dim(&self) -> usize;
    /// 对每行查询返回 k 个近邻
    ///
    /// 浮点特征的距离为 L2 的平方，二进制特征为汉明距离
    fn knn_search(&mut self, queries: &Descriptors, k: usize, checks: Checks)
    -> Result<KnnMatches>;
    /// 返回距离不超过 `radius` 的近邻，`radius` 与距离使用相同的单位
    fn radius_search(
        &mut self,
        query: &Descriptors,
        radius: f32,
        max_results: usize,
        checks: Checks,
    ) -> Result<RadiusMatches>;
}

/// 基于 OpenCV FLANN 的近邻索引，构建后不可修改
pub struct FlannIndex {
    inner: flann::Index,
    // 索引内部引用了特征数据，需要保证其生命周期
    _features: Mat,
    rows: usize,
    cols: usize,
    kind: DescriptorKind,
}

impl FlannIndex {
    pub fn build(features: &Descriptors, params: &IndexParams) -> Result<Self> {
        if features.kind() != params.feature_kind() {
            return Err(Error::invalid(format!(
                "{:?} index requires {:?} features, got {:?}",
                params,
                params.feature_kind(),
                features.kind()
            )));
        }
        if features.rows() == 0 || features.cols() == 0 {
            return Err(Error::invalid("cannot build an index from an empty feature matrix"));
        }
        let distance = match features.kind() {
            DescriptorKind::Float => flann::flann_distance_t::FLANN_DIST_L2,
            DescriptorKind::Binary => flann::flann_distance_t::FLANN_DIST_HAMMING,
        };
        let mat = features.to_mat()?;
        let inner = flann::Index::new(&mat, &params.to_cv()?, distance)?;
        debug!("built {:?} index over {}x{} features", params, features.rows(), features.cols());
        Ok(Self {
            inner,
            _features: mat,
            rows: features.rows(),
            cols: features.cols(),
            kind: features.kind(),
        })
    }

    pub fn build_float(features: &Matrix<f32>, params: &IndexParams) -> Result<Self> {
        Self::build(&Descriptors::Float(features.clone()), params)
    }

    /// 二进制特征只能使用 LSH 索引
    pub fn build_binary(features: &Matrix<u8>, params: &IndexParams) -> Result<Self> {
        Self::build(&Descriptors::Binary(features.clone()), params)
    }

    fn check_queries(&self, queries: &Descriptors) -> Result<()> {
        if queries.kind() != self.kind || queries.cols() != self.cols {
            return Err(Error::invalid(format!(
                "queries {:?}x{} do not match index features {:?}x{}",
                queries.kind(),
                queries.cols(),
                self.kind,
                self.cols
            )));
        }
        Ok(())
    }
}

/// FLANN 对汉明距离返回整数矩阵，统一转换为 f32
fn distances_to_f32(dists: &Mat) -> Result<Matrix<f32>> {
    if dists.typ() == CV_32S {
        let mut converted = Mat::default();
        dists.convert_to(&mut converted, CV_32F, 1.0, 0.0)?;
        return Matrix::from_mat(&converted);
    }
    Matrix::from_mat(dists)
}

impl IndexSearch for FlannIndex {
    fn len(&self) -> usize {
        self.rows
    }

    fn dim(&self) -> usize {
        self.cols
    }

    fn knn_search(
        &mut self,
        queries: &Descriptors,
        k: usize,
        checks: Checks,
    ) -> Result<KnnMatches> {
        self.check_queries(queries)?;
        if k == 0 || k > self.rows {
            return Err(Error::invalid(format!("k must be in 1..={}, got {}", self.rows, k)));
        }
        let knn = i32::try_from(k).map_err(|_| Error::invalid(format!("k {} is too large", k)))?;
        let mut result = KnnMatches::new(queries.rows(), k);
        if queries.rows() == 0 {
            return Ok(result);
        }

        let mut indices = Mat::default();
        let mut dists = Mat::default();
        self.inner.knn_search(
            &queries.to_mat()?,
            &mut indices,
            &mut dists,
            knn,
            &checks.search_params()?,
        )?;
        let indices = Matrix::<i32>::from_mat(&indices)?;
        let dists = distances_to_f32(&dists)?;
        indices.ensure_shape(queries.rows(), k, "knn indices")?;
        dists.ensure_shape(queries.rows(), k, "knn distances")?;

        for row in 0..queries.rows() {
            for col in 0..k {
                let idx = indices.row(row)[col];
                if idx >= 0 && (idx as usize) < self.rows {
                    result.indices.set(row, col, idx);
                    result.distances.set(row, col, dists.row(row)[col]);
                }
            }
        }
        Ok(result)
    }

    fn radius_search(
        &mut self,
        query: &Descriptors,
        radius: f32,
        max_results: usize,
        checks: Checks,
    ) -> Result<RadiusMatches> {
        self.check_queries(query)?;
        if query.rows() != 1 {
            return Err(Error::invalid(format!(
                "radius search takes exactly one query row, got {}",
                query.rows()
            )));
        }
        if max_results == 0 {
            return Err(Error::invalid("max_results must be positive"));
        }
        let max_count = i32::try_from(max_results)
            .map_err(|_| Error::invalid(format!("max_results {} is too large", max_results)))?;

        let mut indices = Mat::default();
        let mut dists = Mat::default();
        let count = self.inner.radius_search(
            &query.to_mat()?,
            &mut indices,
            &mut dists,
            radius as f64,
            max_count,
            &checks.search_params()?,
        )?;
        let count = count.max(0) as usize;
        let indices = Matrix::<i32>::from_mat(&indices)?;
        let dists = distances_to_f32(&dists)?;

        let found = count.min(max_results).min(indices.cols()).min(dists.cols());
        let mut neighbors: Vec<(usize, f32)> = (0..found)
            .filter_map(|i| {
                let idx = indices.get(0, i)?;
                (idx >= 0).then(|| (idx as usize, dists.get(0, i).unwrap_or(f32::MAX)))
            })
            .collect();
        neighbors.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(RadiusMatches { count, neighbors })
    }
}
