use std::ffi::{CStr, CString, c_void};
use std::ptr;

use featurekit::ffi::*;
use featurekit::image::random_pattern;
use opencv::core::Mat;
use opencv::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;

struct Registry(*mut featurekit::Registry);

impl Drop for Registry {
    fn drop(&mut self) {
        unsafe { fk_registry_release(self.0) };
    }
}

#[fixture]
fn registry() -> Registry {
    Registry(fk_registry_create())
}

#[fixture]
fn pattern() -> Mat {
    random_pattern(240, 320, 11).unwrap()
}

fn image_of(mat: &Mat) -> FkImage {
    FkImage {
        data: mat.data_bytes().unwrap().as_ptr(),
        rows: mat.rows(),
        cols: mat.cols(),
        step: mat.cols() as usize,
    }
}

/// 每行末尾带 `padding` 字节填充的 BGR 输出缓冲区，初始内容为 0xee
struct Canvas {
    buf: Vec<u8>,
    rows: i32,
    cols: i32,
    step: usize,
}

impl Canvas {
    fn new(rows: i32, cols: i32, padding: usize) -> Self {
        let step = cols as usize * 3 + padding;
        Self { buf: vec![0xee; step * rows as usize], rows, cols, step }
    }

    fn image(&mut self) -> FkImageMut {
        FkImageMut { data: self.buf.as_mut_ptr(), rows: self.rows, cols: self.cols, step: self.step }
    }

    fn pixel(&self, row: usize, col: usize) -> [u8; 3] {
        let at = row * self.step + col * 3;
        [self.buf[at], self.buf[at + 1], self.buf[at + 2]]
    }

    fn padding_untouched(&self) -> bool {
        let width = self.cols as usize * 3;
        self.buf.chunks(self.step).all(|row| row[width..].iter().all(|b| *b == 0xee))
    }
}

const RANDOM_COLOR: FkColor = FkColor { b: -1., g: -1., r: -1., a: -1. };

fn last_error() -> String {
    unsafe { CStr::from_ptr(fk_last_error()) }.to_string_lossy().to_string()
}

fn orb(reg: &Registry) -> u64 {
    let config = CString::new(r#"{"type": "orb", "nfeatures": 300}"#).unwrap();
    let mut handle = 0;
    let status = unsafe { fk_feature_create(reg.0, config.as_ptr(), &mut handle) };
    assert_eq!(status, FkStatus::Ok);
    handle
}

#[rstest]
fn detect_reports_length_when_capacity_is_short(registry: Registry, pattern: Mat) {
    let handle = orb(&registry);
    let image = image_of(&pattern);

    let mut needed = 0usize;
    let status =
        unsafe { fk_detect(registry.0, handle, &image, ptr::null(), ptr::null_mut(), 0, &mut needed) };
    assert_eq!(status, FkStatus::CapacityTooSmall);
    assert!(needed > 0);

    let mut buffer = vec![FkKeyPoint::at(-1., -1., 0., 0.); needed - 1];
    let status = unsafe {
        fk_detect(registry.0, handle, &image, ptr::null(), buffer.as_mut_ptr(), buffer.len(), &mut needed)
    };
    assert_eq!(status, FkStatus::CapacityTooSmall);
    assert!(buffer.iter().all(|kp| kp.x == -1.));

    let mut buffer = vec![FkKeyPoint::at(-1., -1., 0., 0.); needed];
    let mut len = 0usize;
    let status = unsafe {
        fk_detect(registry.0, handle, &image, ptr::null(), buffer.as_mut_ptr(), buffer.len(), &mut len)
    };
    assert_eq!(status, FkStatus::Ok);
    assert_eq!(len, needed);
    assert!(buffer.iter().all(|kp| kp.x >= 0. && kp.x < 320.));
}

#[rstest]
fn descriptor_shape_and_detect_and_compute(registry: Registry, pattern: Mat) {
    let handle = orb(&registry);
    let (mut size, mut kind) = (0usize, -1i32);
    let status = unsafe { fk_feature_descriptor_shape(registry.0, handle, &mut size, &mut kind) };
    assert_eq!(status, FkStatus::Ok);
    assert_eq!((size, kind), (32, FK_DESCRIPTOR_BINARY));

    let image = image_of(&pattern);
    let mut kps = vec![FkKeyPoint::at(0., 0., 0., 0.); 300];
    let mut descriptors = vec![0u8; 300 * 32];
    let mut len = 0usize;
    let status = unsafe {
        fk_detect_and_compute(
            registry.0,
            handle,
            &image,
            ptr::null(),
            kps.as_mut_ptr(),
            kps.len(),
            &mut len,
            descriptors.as_mut_ptr() as *mut c_void,
            descriptors.len(),
        )
    };
    assert_eq!(status, FkStatus::Ok);
    assert!(len > 0 && len <= 300);
    assert!(descriptors[..len * 32].iter().any(|b| *b != 0));
}

#[rstest]
fn double_release_is_an_invalid_handle(registry: Registry) {
    let handle = orb(&registry);
    assert_eq!(unsafe { fk_feature_release(registry.0, handle) }, FkStatus::Ok);
    assert_eq!(unsafe { fk_feature_release(registry.0, handle) }, FkStatus::InvalidHandle);
    assert!(last_error().contains("stale handle"));
    // 空句柄为空操作
    assert_eq!(unsafe { fk_release(registry.0, 0) }, FkStatus::Ok);
}

#[rstest]
fn wrong_kind_is_rejected(registry: Registry) {
    let handle = orb(&registry);
    let mut matcher = 0u64;
    assert_eq!(unsafe { fk_matcher_create(registry.0, 6, false, &mut matcher) }, FkStatus::Ok);
    assert_eq!(unsafe { fk_matcher_release(registry.0, handle) }, FkStatus::WrongHandleKind);
    assert_eq!(unsafe { fk_release(registry.0, matcher) }, FkStatus::Ok);
    assert_eq!(unsafe { fk_release(registry.0, handle) }, FkStatus::Ok);
}

#[rstest]
fn null_pointers_are_reported(registry: Registry) {
    let status = unsafe { fk_feature_create(registry.0, ptr::null(), ptr::null_mut()) };
    assert_eq!(status, FkStatus::NullPointer);
    assert!(last_error().contains("config_json"));

    let mut handle = 0;
    let status = unsafe { fk_orb_create(ptr::null_mut(), 500, 1.2, 8, 31, 0, 2, true, 31, 20, &mut handle) };
    assert_eq!(status, FkStatus::NullPointer);
}

#[rstest]
fn matcher_knn_match(registry: Registry) {
    let train: Vec<f32> = vec![0., 0., 10., 10., 20., 20.];
    let query: Vec<f32> = vec![9., 9., 1., 1.];
    let train = FkMatrix { data: train.as_ptr() as *const c_void, rows: 3, cols: 2, kind: FK_DESCRIPTOR_FLOAT };
    let query = FkMatrix { data: query.as_ptr() as *const c_void, rows: 2, cols: 2, kind: FK_DESCRIPTOR_FLOAT };

    let mut matcher = 0u64;
    // NORM_L2
    assert_eq!(unsafe { fk_matcher_create(registry.0, 4, false, &mut matcher) }, FkStatus::Ok);
    assert_eq!(unsafe { fk_matcher_add(registry.0, matcher, &train) }, FkStatus::Ok);

    let mut indices = [0i32; 4];
    let mut distances = [0f32; 4];
    let status = unsafe {
        fk_matcher_knn_match(
            registry.0,
            matcher,
            &query,
            2,
            ptr::null(),
            indices.as_mut_ptr(),
            distances.as_mut_ptr(),
            3,
        )
    };
    assert_eq!(status, FkStatus::CapacityTooSmall);
    assert_eq!(indices, [0; 4]);

    let status = unsafe {
        fk_matcher_knn_match(
            registry.0,
            matcher,
            &query,
            2,
            ptr::null(),
            indices.as_mut_ptr(),
            distances.as_mut_ptr(),
            4,
        )
    };
    assert_eq!(status, FkStatus::Ok);
    assert_eq!(indices, [1, 0, 0, 1]);
    assert!(distances[0] < distances[1]);
}

#[rstest]
fn index_radius_search(registry: Registry) {
    let features: Vec<f32> = (0..10).flat_map(|i| [i as f32, 0.]).collect();
    let features =
        FkMatrix { data: features.as_ptr() as *const c_void, rows: 10, cols: 2, kind: FK_DESCRIPTOR_FLOAT };
    let mut index = 0u64;
    assert_eq!(unsafe { fk_index_create_linear(registry.0, &features, &mut index) }, FkStatus::Ok);

    let query = [0f32, 0.];
    let query = FkMatrix { data: query.as_ptr() as *const c_void, rows: 1, cols: 2, kind: FK_DESCRIPTOR_FLOAT };
    let mut indices = [-1i32; 2];
    let mut distances = [0f32; 2];
    let mut count = 0usize;
    // 平方距离 <= 4.5，即前三个点
    let status = unsafe {
        fk_index_radius_search(
            registry.0,
            index,
            &query,
            4.5,
            -1,
            indices.as_mut_ptr(),
            distances.as_mut_ptr(),
            2,
            &mut count,
        )
    };
    assert_eq!(status, FkStatus::Ok);
    assert_eq!(count, 3);
    assert_eq!(indices, [0, 1]);
    assert_eq!(distances, [0., 1.]);
    assert_eq!(unsafe { fk_index_release(registry.0, index) }, FkStatus::Ok);
}

#[test]
fn uniqueness_vote_through_c_interface() {
    // 第三行两个近邻距离都为 0，是完全重复的匹配
    let distances = [1f32, 10., 9., 10., 0., 0.];
    let mut mask = [1u8, 1, 1];
    let mut count = 0usize;
    let status =
        unsafe { fk_vote_for_uniqueness(distances.as_ptr(), 3, 2, 0.8, mask.as_mut_ptr(), &mut count) };
    assert_eq!(status, FkStatus::Ok);
    assert_eq!(mask, [1, 0, 1]);
    assert_eq!(count, 2);
}

#[test]
fn homography_failure_zeroes_output() {
    let model = [FkKeyPoint::at(1., 1., 4., 0.), FkKeyPoint::at(5., 5., 4., 0.)];
    let observed = model;
    let indices = [0i32, 1];
    let mut mask = [1u8, 1];
    let mut h = [7f64; 9];
    let mut found = true;
    let status = unsafe {
        fk_estimate_homography(
            model.as_ptr(),
            2,
            observed.as_ptr(),
            2,
            indices.as_ptr(),
            1,
            mask.as_mut_ptr(),
            3.,
            h.as_mut_ptr(),
            &mut found,
        )
    };
    assert_eq!(status, FkStatus::Ok);
    assert!(!found);
    assert_eq!(h, [0.; 9]);
    assert_eq!(mask, [1, 1]);
}

#[test]
fn classifier_requires_training() {
    let reg = Registry(fk_registry_create());
    let pattern = random_pattern(64, 64, 3).unwrap();
    let image = image_of(&pattern);
    let mut handle = 0u64;
    assert_eq!(unsafe { fk_classifier_create(reg.0, &mut handle) }, FkStatus::Ok);
    let mut out = [0f32; 4];
    let status = unsafe {
        fk_classifier_signature(reg.0, handle, &image, FkPoint { x: 32, y: 32 }, out.as_mut_ptr(), out.len())
    };
    assert_eq!(status, FkStatus::NotTrained);
}

#[rstest]
fn compute_drops_border_keypoints(registry: Registry, pattern: Mat) {
    let handle = orb(&registry);
    let image = image_of(&pattern);
    let original = [
        FkKeyPoint::at(2., 2., 31., 0.),
        FkKeyPoint::at(160., 120., 31., 0.),
        FkKeyPoint::at(318., 238., 31., 0.),
        FkKeyPoint::at(100., 100., 31., 0.),
    ];

    // 容量不足时特征点和数量都保持不变
    let mut kps = original;
    let mut len = kps.len();
    let mut descriptors = vec![0xabu8; 32];
    let status = unsafe {
        fk_compute(
            registry.0,
            handle,
            &image,
            kps.as_mut_ptr(),
            &mut len,
            descriptors.as_mut_ptr() as *mut c_void,
            descriptors.len(),
        )
    };
    assert_eq!(status, FkStatus::CapacityTooSmall);
    assert_eq!(len, 4);
    assert_eq!(kps, original);
    assert!(descriptors.iter().all(|b| *b == 0xab));

    let mut descriptors = vec![0xabu8; 4 * 32];
    let status = unsafe {
        fk_compute(
            registry.0,
            handle,
            &image,
            kps.as_mut_ptr(),
            &mut len,
            descriptors.as_mut_ptr() as *mut c_void,
            descriptors.len(),
        )
    };
    assert_eq!(status, FkStatus::Ok);
    assert_eq!(len, 2);
    let mut kept: Vec<(f32, f32)> = kps[..len].iter().map(|kp| (kp.x, kp.y)).collect();
    kept.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert_eq!(kept, [(100., 100.), (160., 120.)]);
    // 描述符行数与写回的特征点数量一致
    assert!(descriptors[..len * 32].iter().any(|b| *b != 0xab));
    assert!(descriptors[len * 32..].iter().all(|b| *b == 0xab));
}

#[rstest]
#[case::linear(None)]
#[case::single_kdtree(Some(1))]
fn index_knn_search(registry: Registry, #[case] trees: Option<i32>) {
    let features: Vec<f32> = (0..10).flat_map(|i| [i as f32, 0.]).collect();
    let features =
        FkMatrix { data: features.as_ptr() as *const c_void, rows: 10, cols: 2, kind: FK_DESCRIPTOR_FLOAT };
    let mut index = 0u64;
    let status = match trees {
        None => unsafe { fk_index_create_linear(registry.0, &features, &mut index) },
        Some(trees) => unsafe { fk_index_create_kdtree(registry.0, &features, trees, &mut index) },
    };
    assert_eq!(status, FkStatus::Ok);

    let queries = [3.2f32, 0., 8.9, 0.];
    let queries = FkMatrix { data: queries.as_ptr() as *const c_void, rows: 2, cols: 2, kind: FK_DESCRIPTOR_FLOAT };
    let mut indices = [-7i32; 4];
    let mut distances = [0f32; 4];
    let search = |checks: i32, indices: &mut [i32; 4], distances: &mut [f32; 4], capacity: usize| unsafe {
        fk_index_knn_search(
            registry.0,
            index,
            &queries,
            2,
            checks,
            indices.as_mut_ptr(),
            distances.as_mut_ptr(),
            capacity,
        )
    };

    assert_eq!(search(-1, &mut indices, &mut distances, 3), FkStatus::CapacityTooSmall);
    assert_eq!(indices, [-7; 4]);

    for checks in [-1, 32] {
        assert_eq!(search(checks, &mut indices, &mut distances, 4), FkStatus::Ok);
        assert_eq!(indices, [3, 4, 9, 8]);
        // L2 的平方
        for (got, want) in distances.iter().zip([0.04f32, 0.64, 0.01, 0.81]) {
            assert!((got - want).abs() < 1e-4, "{} vs {}", got, want);
        }
    }

    // k 超过索引大小
    let status = unsafe {
        fk_index_knn_search(registry.0, index, &queries, 11, -1, indices.as_mut_ptr(), distances.as_mut_ptr(), 22)
    };
    assert_eq!(status, FkStatus::InvalidArgument);
}

#[rstest]
fn draw_keypoints_respects_stride(pattern: Mat) {
    let image = image_of(&pattern);
    let gray = pattern.data_bytes().unwrap();
    let mut canvas = Canvas::new(240, 320, 13);
    let out = canvas.image();
    let status = unsafe { fk_draw_keypoints(&image, ptr::null(), 0, &out, RANDOM_COLOR, 0) };
    assert_eq!(status, FkStatus::Ok);
    assert!(canvas.padding_untouched());
    for (r, c) in [(0, 0), (17, 301), (120, 160), (239, 319)] {
        let v = gray[r * 320 + c];
        assert_eq!(canvas.pixel(r, c), [v, v, v]);
    }

    let kps = [FkKeyPoint::at(160., 120., 20., 0.)];
    let out = canvas.image();
    let status = unsafe { fk_draw_keypoints(&image, kps.as_ptr(), 1, &out, RANDOM_COLOR, 4) };
    assert_eq!(status, FkStatus::Ok);
    assert!(canvas.padding_untouched());

    let mut small = Canvas::new(240, 300, 0);
    let out = small.image();
    let status = unsafe { fk_draw_keypoints(&image, kps.as_ptr(), 1, &out, RANDOM_COLOR, 0) };
    assert_eq!(status, FkStatus::InvalidArgument);
    assert!(small.buf.iter().all(|b| *b == 0xee));

    let status = unsafe { fk_draw_keypoints(&image, kps.as_ptr(), 1, &out, RANDOM_COLOR, 3) };
    assert_eq!(status, FkStatus::InvalidArgument);
}

#[rstest]
fn draw_matched_features_side_by_side(pattern: Mat) {
    let other = random_pattern(200, 300, 12).unwrap();
    let (img1, img2) = (image_of(&pattern), image_of(&other));
    let (gray1, gray2) = (pattern.data_bytes().unwrap(), other.data_bytes().unwrap());

    // 高度取较高者，宽度为两者之和
    let mut canvas = Canvas::new(240, 620, 5);
    let out = canvas.image();
    let status = unsafe {
        fk_draw_matched_features(
            &img1,
            ptr::null(),
            0,
            &img2,
            ptr::null(),
            0,
            ptr::null(),
            1,
            &out,
            RANDOM_COLOR,
            RANDOM_COLOR,
            ptr::null(),
            0,
        )
    };
    assert_eq!(status, FkStatus::Ok);
    assert!(canvas.padding_untouched());
    let v = gray1[100 * 320 + 50];
    assert_eq!(canvas.pixel(100, 50), [v, v, v]);
    let v = gray2[150 * 300 + 299];
    assert_eq!(canvas.pixel(150, 320 + 299), [v, v, v]);
    // 右图下方没有内容
    assert_eq!(canvas.pixel(230, 400), [0, 0, 0]);

    let kps1 = [FkKeyPoint::at(100., 100., 10., 0.)];
    let kps2 = [FkKeyPoint::at(50., 60., 10., 0.), FkKeyPoint::at(80., 90., 10., 0.)];
    let indices = [0i32, -1];
    let mask = [1u8, 0];
    let out = canvas.image();
    let status = unsafe {
        fk_draw_matched_features(
            &img1,
            kps1.as_ptr(),
            1,
            &img2,
            kps2.as_ptr(),
            2,
            indices.as_ptr(),
            1,
            &out,
            RANDOM_COLOR,
            RANDOM_COLOR,
            mask.as_ptr(),
            2,
        )
    };
    assert_eq!(status, FkStatus::Ok);
    assert!(canvas.padding_untouched());

    let mut narrow = Canvas::new(240, 320, 0);
    let out = narrow.image();
    let status = unsafe {
        fk_draw_matched_features(
            &img1,
            ptr::null(),
            0,
            &img2,
            ptr::null(),
            0,
            ptr::null(),
            1,
            &out,
            RANDOM_COLOR,
            RANDOM_COLOR,
            ptr::null(),
            0,
        )
    };
    assert_eq!(status, FkStatus::InvalidArgument);
}

#[rstest]
fn grid_adapted_consumes_detector(registry: Registry, pattern: Mat) {
    let mut fast = 0u64;
    assert_eq!(unsafe { fk_fast_create(registry.0, 10, true, &mut fast) }, FkStatus::Ok);
    let mut grid = 0u64;
    assert_eq!(unsafe { fk_grid_adapted_create(registry.0, fast, 40, 2, 2, &mut grid) }, FkStatus::Ok);
    assert_eq!(unsafe { fk_feature_release(registry.0, fast) }, FkStatus::InvalidHandle);

    let image = image_of(&pattern);
    let mut kps = vec![FkKeyPoint::at(-1., -1., 0., 0.); 64];
    let mut len = 0usize;
    let status =
        unsafe { fk_detect(registry.0, grid, &image, ptr::null(), kps.as_mut_ptr(), kps.len(), &mut len) };
    assert_eq!(status, FkStatus::Ok);
    assert!(len > 0 && len <= 40);
    assert!(kps[..len].iter().all(|kp| kp.x >= 0. && kp.x < 320. && kp.y >= 0. && kp.y < 240.));

    let mut again = 0u64;
    assert_eq!(
        unsafe { fk_grid_adapted_create(registry.0, grid, 40, 0, 2, &mut again) },
        FkStatus::InvalidArgument
    );
    let mut matcher = 0u64;
    assert_eq!(unsafe { fk_matcher_create(registry.0, 6, false, &mut matcher) }, FkStatus::Ok);
    assert_eq!(
        unsafe { fk_grid_adapted_create(registry.0, matcher, 40, 2, 2, &mut again) },
        FkStatus::WrongHandleKind
    );
}

#[rstest]
fn classifier_train_and_signature(registry: Registry) {
    let pattern = random_pattern(200, 200, 4).unwrap();
    let image = image_of(&pattern);
    let points = [FkPoint { x: 40, y: 40 }, FkPoint { x: 150, y: 60 }, FkPoint { x: 100, y: 160 }];
    let mut handle = 0u64;
    assert_eq!(unsafe { fk_classifier_create(registry.0, &mut handle) }, FkStatus::Ok);
    let status = unsafe {
        fk_classifier_train(registry.0, handle, &image, points.as_ptr(), points.len(), 7, 20, 8, 30, 16)
    };
    assert_eq!(status, FkStatus::Ok);

    let mut classes = 0usize;
    assert_eq!(unsafe { fk_classifier_num_classes(registry.0, handle, &mut classes) }, FkStatus::Ok);
    assert_eq!(classes, 3);

    let mut signature = [-1f32; 3];
    let status =
        unsafe { fk_classifier_signature(registry.0, handle, &image, points[1], signature.as_mut_ptr(), 2) };
    assert_eq!(status, FkStatus::CapacityTooSmall);
    assert_eq!(signature, [-1.; 3]);

    let status =
        unsafe { fk_classifier_signature(registry.0, handle, &image, points[1], signature.as_mut_ptr(), 3) };
    assert_eq!(status, FkStatus::Ok);
    assert!(signature.iter().all(|v| (0. ..=1.).contains(v)));
    assert!((signature.iter().sum::<f32>() - 1.).abs() < 1e-4);

    // 没有训练点
    let status =
        unsafe { fk_classifier_train(registry.0, handle, &image, ptr::null(), 0, 7, 20, 8, 30, 16) };
    assert_eq!(status, FkStatus::InvalidArgument);
}

fn homography_through_c_interface(
    model: &[FkKeyPoint],
    observed: &[FkKeyPoint],
    mask: &mut [u8],
) -> (FkStatus, [f64; 9], bool) {
    let indices: Vec<i32> = (0..observed.len() as i32).collect();
    let mut h = [7f64; 9];
    let mut found = false;
    let status = unsafe {
        fk_estimate_homography(
            model.as_ptr(),
            model.len(),
            observed.as_ptr(),
            observed.len(),
            indices.as_ptr(),
            1,
            mask.as_mut_ptr(),
            2.,
            h.as_mut_ptr(),
            &mut found,
        )
    };
    (status, h, found)
}

#[test]
fn homography_through_ransac() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut random_points = |n: usize| -> Vec<FkKeyPoint> {
        (0..n)
            .map(|_| FkKeyPoint::at(rng.random_range(0.0..640.), rng.random_range(0.0..480.), 10., 0.))
            .collect()
    };

    // 平移 (30, -12) 后全部是内点
    let model = random_points(30);
    let observed: Vec<FkKeyPoint> =
        model.iter().map(|kp| FkKeyPoint::at(kp.x + 30., kp.y - 12., 10., 0.)).collect();
    let mut mask = vec![1u8; 30];
    let (status, h, found) = homography_through_c_interface(&model, &observed, &mut mask);
    assert_eq!(status, FkStatus::Ok);
    assert!(found);
    assert!((h[2] / h[8] - 30.).abs() < 0.05, "{:?}", h);
    assert!((h[5] / h[8] + 12.).abs() < 0.05, "{:?}", h);
    assert!(mask.iter().all(|m| *m == 1));

    // 随机点对经过 RANSAC 也凑不够内点
    let (model, observed) = (random_points(50), random_points(50));
    let mut mask = vec![1u8; 50];
    mask[3] = 0;
    let before = mask.clone();
    let (status, h, found) = homography_through_c_interface(&model, &observed, &mut mask);
    assert_eq!(status, FkStatus::Ok);
    assert!(!found);
    assert_eq!(h, [0.; 9]);
    assert_eq!(mask, before);
}

#[test]
fn oversized_size_orientation_vote_is_rejected() {
    let model = [FkKeyPoint::at(0., 0., 1., 0.), FkKeyPoint::at(10., 0., 1., 0.)];
    let observed = [FkKeyPoint::at(0., 0., 1., 0.), FkKeyPoint::at(10., 0., 100., 0.)];
    let indices = [0i32, 1];
    let mut mask = [1u8, 1];
    let mut count = 0usize;
    let status = unsafe {
        fk_vote_for_size_and_orientation(
            model.as_ptr(),
            2,
            observed.as_ptr(),
            2,
            indices.as_ptr(),
            1,
            mask.as_mut_ptr(),
            1.0000001,
            20,
            &mut count,
        )
    };
    assert_eq!(status, FkStatus::InvalidArgument);
    assert_eq!(mask, [1, 1]);

    let status = unsafe {
        fk_vote_for_size_and_orientation(
            model.as_ptr(),
            2,
            observed.as_ptr(),
            usize::MAX,
            indices.as_ptr(),
            2,
            mask.as_mut_ptr(),
            1.5,
            20,
            &mut count,
        )
    };
    assert_eq!(status, FkStatus::InvalidArgument);
}
