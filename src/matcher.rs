use clap::ValueEnum;
use log::debug;
use opencv::core::{self, DMatch, Mat, Ptr, Vector};
use opencv::features2d::BFMatcher;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matrix::{DescriptorKind, Descriptors, Matrix};

/// 描述符之间的距离
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Norm {
    L1,
    L2,
    Hamming,
    /// 每两位作为一个单元计算汉明距离，用于 WTA_K 为 3 或 4 的 ORB
    Hamming2,
}

impl Norm {
    pub fn to_cv(self) -> i32 {
        match self {
            Self::L1 => core::NORM_L1,
            Self::L2 => core::NORM_L2,
            Self::Hamming => core::NORM_HAMMING,
            Self::Hamming2 => core::NORM_HAMMING2,
        }
    }

    pub fn from_cv(norm: i32) -> Result<Self> {
        match norm {
            core::NORM_L1 => Ok(Self::L1),
            core::NORM_L2 => Ok(Self::L2),
            core::NORM_HAMMING => Ok(Self::Hamming),
            core::NORM_HAMMING2 => Ok(Self::Hamming2),
            _ => Err(Error::invalid(format!("unsupported norm type {}", norm))),
        }
    }

    /// 描述符类型对应的默认距离
    pub fn for_kind(kind: DescriptorKind) -> Self {
        match kind {
            DescriptorKind::Binary => Self::Hamming,
            DescriptorKind::Float => Self::L2,
        }
    }

    fn accepts(self, kind: DescriptorKind) -> bool {
        !matches!((self, kind), (Self::Hamming | Self::Hamming2, DescriptorKind::Float))
    }
}

/// k 近邻结果，形状均为 `查询行数 x k`
///
/// 候选不足 k 个时，剩余位置的索引为 -1，距离为 `f32::MAX`
#[derive(Debug, Clone, PartialEq)]
pub struct KnnMatches {
    pub indices: Matrix<i32>,
    pub distances: Matrix<f32>,
}

impl KnnMatches {
    pub fn new(rows: usize, k: usize) -> Self {
        Self { indices: Matrix::filled(rows, k, -1), distances: Matrix::filled(rows, k, f32::MAX) }
    }

    pub fn rows(&self) -> usize {
        self.indices.rows()
    }

    pub fn k(&self) -> usize {
        self.indices.cols()
    }

    /// 第 `row` 个查询的有效近邻，按距离升序
    pub fn neighbors(&self, row: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices
            .row(row)
            .iter()
            .zip(self.distances.row(row))
            .filter(|(i, _)| **i >= 0)
            .map(|(i, d)| (*i as usize, *d))
    }

    pub fn best(&self, row: usize) -> Option<(usize, f32)> {
        self.neighbors(row).next()
    }
}

/// 描述符匹配能力
pub trait Match {
    /// 追加一组训练描述符，其行号接在已有训练集之后
    fn add(&mut self, descriptors: &Descriptors) -> Result<()>;
    /// 所有训练集的总行数
    fn train_len(&self) -> usize;
    fn clear(&mut self) -> Result<()>;
    /// 对每个查询描述符找出 k 个最近的训练描述符
    ///
    /// `mask` 的形状为 `查询行数 x 训练总行数`，值为 0 的组合不参与匹配
    fn knn_match(
        &mut self,
        query: &Descriptors,
        k: usize,
        mask: Option<&Matrix<u8>>,
    ) -> Result<KnnMatches>;
}

/// 暴力匹配器
pub struct BruteForceMatcher {
    inner: Ptr<BFMatcher>,
    norm: Norm,
    cross_check: bool,
    kind: Option<DescriptorKind>,
    width: usize,
    /// 每个训练集的起始行号
    offsets: Vec<usize>,
    total: usize,
}

impl BruteForceMatcher {
    pub fn new(norm: Norm, cross_check: bool) -> Result<Self> {
        let inner = BFMatcher::create(norm.to_cv(), cross_check)?;
        Ok(Self { inner, norm, cross_check, kind: None, width: 0, offsets: vec![], total: 0 })
    }

    pub fn norm(&self) -> Norm {
        self.norm
    }

    fn check_descriptors(&self, descriptors: &Descriptors) -> Result<()> {
        if !self.norm.accepts(descriptors.kind()) {
            return Err(Error::invalid(format!(
                "{:?} norm cannot be used with {:?} descriptors",
                self.norm,
                descriptors.kind()
            )));
        }
        if let Some(kind) = self.kind {
            if kind != descriptors.kind() || self.width != descriptors.cols() {
                return Err(Error::invalid(format!(
                    "descriptors {:?}x{} do not match training set {:?}x{}",
                    descriptors.kind(),
                    descriptors.cols(),
                    kind,
                    self.width
                )));
            }
        }
        Ok(())
    }

    /// 将全局掩码按训练集拆分成 OpenCV 需要的多个掩码
    fn split_mask(&self, mask: &Matrix<u8>) -> Result<Vector<Mat>> {
        let mut masks = Vector::<Mat>::with_capacity(self.offsets.len());
        let ends = self.offsets.iter().skip(1).copied().chain([self.total]);
        for (start, end) in self.offsets.iter().copied().zip(ends) {
            let mut part = Matrix::<u8>::new(end - start);
            for row in mask.iter_rows() {
                part.push(&row[start..end])?;
            }
            masks.push(part.to_mat()?);
        }
        Ok(masks)
    }

    fn global_index(&self, m: &DMatch) -> i32 {
        match self.offsets.get(m.img_idx.max(0) as usize) {
            Some(offset) => (*offset as i32) + m.train_idx,
            None => -1,
        }
    }
}

impl Match for BruteForceMatcher {
    fn add(&mut self, descriptors: &Descriptors) -> Result<()> {
        self.check_descriptors(descriptors)?;
        if descriptors.rows() == 0 {
            debug!("skip empty training set");
            return Ok(());
        }
        let mut collection = Vector::<Mat>::new();
        collection.push(descriptors.to_mat()?);
        self.inner.add(&collection)?;

        self.kind = Some(descriptors.kind());
        self.width = descriptors.cols();
        self.offsets.push(self.total);
        self.total += descriptors.rows();
        debug!("training set #{} added, {} rows in total", self.offsets.len(), self.total);
        Ok(())
    }

    fn train_len(&self) -> usize {
        self.total
    }

    fn clear(&mut self) -> Result<()> {
        DescriptorMatcherTrait::clear(&mut self.inner)?;
        self.kind = None;
        self.width = 0;
        self.offsets.clear();
        self.total = 0;
        Ok(())
    }

    fn knn_match(
        &mut self,
        query: &Descriptors,
        k: usize,
        mask: Option<&Matrix<u8>>,
    ) -> Result<KnnMatches> {
        if k == 0 {
            return Err(Error::invalid("k must be positive"));
        }
        if self.cross_check && k != 1 {
            return Err(Error::invalid("cross check matcher only supports k = 1"));
        }
        let knn = i32::try_from(k).map_err(|_| Error::invalid(format!("k {} is too large", k)))?;
        self.check_descriptors(query)?;
        if let Some(mask) = mask {
            mask.ensure_shape(query.rows(), self.total, "match mask")?;
        }

        let mut result = KnnMatches::new(query.rows(), k);
        if query.rows() == 0 || self.total == 0 {
            return Ok(result);
        }

        let masks = match mask {
            Some(mask) => self.split_mask(mask)?,
            None => Vector::new(),
        };
        let mut matches = Vector::<Vector<DMatch>>::new();
        self.inner.knn_match(&query.to_mat()?, &mut matches, knn, &masks, false)?;

        for (row, candidates) in matches.iter().enumerate().take(query.rows()) {
            for (col, m) in candidates.iter().enumerate().take(k) {
                result.indices.set(row, col, self.global_index(&m));
                result.distances.set(row, col, m.distance);
            }
        }
        Ok(result)
    }
}
