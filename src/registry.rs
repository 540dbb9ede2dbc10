//! 句柄表形式的扁平接口
//!
//! 每种对象都有 create / 操作 / release 三类函数，对象由 [`Registry`] 持有，
//! 调用方只拿到 [`Handle`]。所有修改操作都需要 `&mut self`，调用方负责串行化

use log::debug;
use opencv::core::{Mat, Point};
use rand::Rng;

use crate::classifier::{ClassifierParams, RTreeClassifier};
use crate::error::{Error, Result};
use crate::features::{Feature, FeatureConfig, GridAdapted};
use crate::flann::{Checks, FlannIndex, IndexParams, IndexSearch, RadiusMatches};
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::keypoint::KeyPoints;
use crate::matcher::{BruteForceMatcher, KnnMatches, Match, Norm};
use crate::matrix::{DescriptorKind, Descriptors, Matrix};

pub struct Registry {
    features: HandleTable<Box<dyn Feature>>,
    matchers: HandleTable<BruteForceMatcher>,
    indexes: HandleTable<FlannIndex>,
    classifiers: HandleTable<RTreeClassifier>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            features: HandleTable::new(HandleKind::Feature),
            matchers: HandleTable::new(HandleKind::Matcher),
            indexes: HandleTable::new(HandleKind::Index),
            classifiers: HandleTable::new(HandleKind::Classifier),
        }
    }

    /// 所有未释放的对象数量
    pub fn live(&self) -> usize {
        self.features.len() + self.matchers.len() + self.indexes.len() + self.classifiers.len()
    }

    /// 按句柄类别释放任意对象，空句柄为空操作
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        match handle.kind() {
            _ if handle.is_null() => Ok(()),
            Some(HandleKind::Feature) => self.release_feature(handle),
            Some(HandleKind::Matcher) => self.release_matcher(handle),
            Some(HandleKind::Index) => self.release_index(handle),
            Some(HandleKind::Classifier) => self.release_classifier(handle),
            None => Err(Error::StaleHandle(handle)),
        }
    }

    // 特征

    pub fn create_feature(&mut self, config: &FeatureConfig) -> Result<Handle> {
        let feature = config.build()?;
        Ok(self.insert_feature(feature))
    }

    pub fn insert_feature(&mut self, feature: Box<dyn Feature>) -> Handle {
        let name = feature.name();
        let handle = self.features.insert(feature);
        debug!("created {} as {:?}", name, handle);
        handle
    }

    /// 用已有的检测器创建分块检测器，原句柄的所有权转移给新对象并随之失效
    pub fn create_grid_adapted(
        &mut self,
        detector: Handle,
        max_total_keypoints: usize,
        grid_rows: usize,
        grid_cols: usize,
    ) -> Result<Handle> {
        if self.features.get_mut(detector)?.as_detect().is_none() {
            return Err(Error::Unsupported("grid adaption of a non-detector"));
        }
        if grid_rows == 0 || grid_cols == 0 || grid_rows.checked_mul(grid_cols).is_none() {
            return Err(Error::invalid(format!("invalid grid {}x{}", grid_rows, grid_cols)));
        }
        let inner = self.features.remove(detector)?.ok_or(Error::NullHandle)?;
        let grid = GridAdapted::new(inner, max_total_keypoints, grid_rows, grid_cols)?;
        Ok(self.insert_feature(Box::new(grid)))
    }

    pub fn release_feature(&mut self, handle: Handle) -> Result<()> {
        self.features.remove(handle).map(drop)
    }

    pub fn feature_name(&self, handle: Handle) -> Result<&'static str> {
        Ok(self.features.get(handle)?.name())
    }

    pub fn detect(&mut self, handle: Handle, image: &Mat, mask: Option<&Mat>) -> Result<KeyPoints> {
        let detector = self.features.get_mut(handle)?.as_detect().ok_or(Error::Unsupported("detect"))?;
        detector.detect(image, mask)
    }

    /// 计算描述符，无法计算的特征点会从 `keypoints` 中移除
    pub fn compute(
        &mut self,
        handle: Handle,
        image: &Mat,
        keypoints: &mut KeyPoints,
    ) -> Result<Descriptors> {
        let extractor =
            self.features.get_mut(handle)?.as_describe().ok_or(Error::Unsupported("compute"))?;
        extractor.compute(image, keypoints)
    }

    pub fn detect_and_compute(
        &mut self,
        handle: Handle,
        image: &Mat,
        mask: Option<&Mat>,
    ) -> Result<(KeyPoints, Descriptors)> {
        self.features.get_mut(handle)?.detect_and_compute(image, mask)
    }

    pub fn descriptor_size(&self, handle: Handle) -> Result<usize> {
        let extractor =
            self.features.get(handle)?.as_describe_ref().ok_or(Error::Unsupported("compute"))?;
        extractor.descriptor_size()
    }

    pub fn descriptor_kind(&self, handle: Handle) -> Result<DescriptorKind> {
        let extractor =
            self.features.get(handle)?.as_describe_ref().ok_or(Error::Unsupported("compute"))?;
        extractor.descriptor_kind()
    }

    // 匹配器

    pub fn create_matcher(&mut self, norm: Norm, cross_check: bool) -> Result<Handle> {
        let handle = self.matchers.insert(BruteForceMatcher::new(norm, cross_check)?);
        debug!("created {:?} brute force matcher as {:?}", norm, handle);
        Ok(handle)
    }

    pub fn release_matcher(&mut self, handle: Handle) -> Result<()> {
        self.matchers.remove(handle).map(drop)
    }

    pub fn matcher_add(&mut self, handle: Handle, descriptors: &Descriptors) -> Result<()> {
        self.matchers.get_mut(handle)?.add(descriptors)
    }

    pub fn matcher_train_len(&self, handle: Handle) -> Result<usize> {
        Ok(self.matchers.get(handle)?.train_len())
    }

    pub fn matcher_clear(&mut self, handle: Handle) -> Result<()> {
        self.matchers.get_mut(handle)?.clear()
    }

    pub fn knn_match(
        &mut self,
        handle: Handle,
        query: &Descriptors,
        k: usize,
        mask: Option<&Matrix<u8>>,
    ) -> Result<KnnMatches> {
        self.matchers.get_mut(handle)?.knn_match(query, k, mask)
    }

    // 索引

    pub fn build_index(&mut self, features: &Descriptors, params: &IndexParams) -> Result<Handle> {
        let handle = self.indexes.insert(FlannIndex::build(features, params)?);
        debug!("created index as {:?}", handle);
        Ok(handle)
    }

    pub fn release_index(&mut self, handle: Handle) -> Result<()> {
        self.indexes.remove(handle).map(drop)
    }

    pub fn knn_search(
        &mut self,
        handle: Handle,
        queries: &Descriptors,
        k: usize,
        checks: Checks,
    ) -> Result<KnnMatches> {
        self.indexes.get_mut(handle)?.knn_search(queries, k, checks)
    }

    pub fn radius_search(
        &mut self,
        handle: Handle,
        query: &Descriptors,
        radius: f32,
        max_results: usize,
        checks: Checks,
    ) -> Result<RadiusMatches> {
        self.indexes.get_mut(handle)?.radius_search(query, radius, max_results, checks)
    }

    // 分类器

    pub fn create_classifier(&mut self) -> Handle {
        let handle = self.classifiers.insert(RTreeClassifier::new());
        debug!("created classifier as {:?}", handle);
        handle
    }

    pub fn release_classifier(&mut self, handle: Handle) -> Result<()> {
        self.classifiers.remove(handle).map(drop)
    }

    pub fn classifier_train(
        &mut self,
        handle: Handle,
        image: &Mat,
        points: &[Point],
        params: &ClassifierParams,
        rng: &mut impl Rng,
    ) -> Result<()> {
        self.classifiers.get_mut(handle)?.train(image, points, params, rng)
    }

    pub fn classifier_num_classes(&self, handle: Handle) -> Result<usize> {
        Ok(self.classifiers.get(handle)?.num_classes())
    }

    pub fn signature(&self, handle: Handle, image: &Mat, point: Point) -> Result<Vec<f32>> {
        self.classifiers.get(handle)?.signature(image, point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FastParams, OrbParams};
    use crate::image::random_pattern;

    #[test]
    fn create_and_release_every_kind() {
        let mut reg = Registry::new();
        let f = reg.create_feature(&FeatureConfig::default()).unwrap();
        let m = reg.create_matcher(Norm::Hamming, false).unwrap();
        let c = reg.create_classifier();
        let features = Descriptors::Float(Matrix::from_rows(&[[0f32, 1.], [1., 0.]]).unwrap());
        let i = reg.build_index(&features, &IndexParams::Linear).unwrap();
        assert_eq!(reg.live(), 4);

        for h in [f, m, c, i] {
            reg.release(h).unwrap();
        }
        assert_eq!(reg.live(), 0);
        reg.release(Handle::NULL).unwrap();
    }

    #[test]
    fn released_handle_is_stale() {
        let mut reg = Registry::new();
        let m = reg.create_matcher(Norm::L2, false).unwrap();
        reg.release_matcher(m).unwrap();
        assert!(matches!(reg.release_matcher(m), Err(Error::StaleHandle(_))));
        assert!(matches!(reg.matcher_train_len(m), Err(Error::StaleHandle(_))));
    }

    #[test]
    fn handle_kind_is_checked() {
        let mut reg = Registry::new();
        let c = reg.create_classifier();
        assert!(matches!(
            reg.descriptor_size(c),
            Err(Error::WrongHandleKind { expected: HandleKind::Feature, found: HandleKind::Classifier })
        ));
    }

    #[test]
    fn detect_compute_match() {
        let mut reg = Registry::new();
        let orb = reg.create_feature(&FeatureConfig::Orb(OrbParams::default())).unwrap();
        let img = random_pattern(240, 320, 3).unwrap();

        let mut kps = reg.detect(orb, &img, None).unwrap();
        let des = reg.compute(orb, &img, &mut kps).unwrap();
        assert_eq!(des.rows(), kps.len());
        assert_eq!(des.cols(), reg.descriptor_size(orb).unwrap());

        let m = reg.create_matcher(Norm::Hamming, false).unwrap();
        reg.matcher_add(m, &des).unwrap();
        let matches = reg.knn_match(m, &des, 1, None).unwrap();
        for row in 0..matches.rows() {
            assert_eq!(matches.best(row).map(|(_, d)| d), Some(0.));
        }
    }

    #[test]
    fn grid_adaption_consumes_detector() {
        let mut reg = Registry::new();
        let fast = reg.create_feature(&FeatureConfig::Fast(FastParams::default())).unwrap();
        let grid = reg.create_grid_adapted(fast, 100, 2, 2).unwrap();
        assert_eq!(reg.live(), 1);
        assert!(matches!(reg.feature_name(fast), Err(Error::StaleHandle(_))));
        assert_eq!(reg.feature_name(grid).unwrap(), "GridAdapted");
        assert!(matches!(reg.compute(grid, &Mat::default(), &mut KeyPoints::new()), Err(Error::Unsupported(_))));
    }

    #[test]
    fn rejected_grid_keeps_detector() {
        let mut reg = Registry::new();
        let fast = reg.create_feature(&FeatureConfig::Fast(FastParams::default())).unwrap();
        for (rows, cols) in [(0, 2), (usize::MAX, 2)] {
            assert!(matches!(
                reg.create_grid_adapted(fast, 100, rows, cols),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert_eq!(reg.feature_name(fast).unwrap(), "FAST");
    }
}
