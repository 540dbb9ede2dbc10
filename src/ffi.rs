//! C 接口
//!
//! - 每个函数都返回 [`FkStatus`]，结果通过输出指针写回
//! - 输出缓冲区由调用方分配，写入前先校验容量；容量不足时返回
//!   `CapacityTooSmall`，缓冲区保持不变，只通过长度指针（如果有）报告所需大小
//! - 失败信息可以通过 [`fk_last_error`] 取得
//! - panic 在边界处被捕获，返回 `Panic`
//!
//! 对象都属于某个 [`Registry`]，同一个 registry 不能被多个线程同时使用

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use log::{debug, error};
use opencv::core::{self, Mat, Point, Scalar};
use opencv::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::classifier::ClassifierParams;
use crate::draw::{self, DrawStyle};
use crate::error::{Error, ensure_capacity};
use crate::features::{FastParams, FeatureConfig, MserParams, OrbParams, SiftParams};
use crate::flann::{CentersInit, Checks, IndexParams};
use crate::handle::Handle;
use crate::homography;
use crate::keypoint::{KeyPointRecord, KeyPoints, from_records, to_records};
use crate::matcher::{KnnMatches, Norm};
use crate::matrix::{DescriptorKind, Descriptors, Matrix};
use crate::registry::Registry;

/// 调用结果
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkStatus {
    Ok = 0,
    NullPointer = -1,
    InvalidArgument = -2,
    CapacityTooSmall = -3,
    InvalidHandle = -4,
    WrongHandleKind = -5,
    Unsupported = -6,
    NotTrained = -7,
    Backend = -8,
    Panic = -9,
}

pub const FK_DESCRIPTOR_BINARY: i32 = 0;
pub const FK_DESCRIPTOR_FLOAT: i32 = 1;

/// 单通道 8 位图片，`step` 为每行的字节数
#[repr(C)]
pub struct FkImage {
    pub data: *const u8,
    pub rows: i32,
    pub cols: i32,
    pub step: usize,
}

/// 调用方分配的 BGR 8 位输出图片
#[repr(C)]
pub struct FkImageMut {
    pub data: *mut u8,
    pub rows: i32,
    pub cols: i32,
    pub step: usize,
}

/// 行优先的描述符矩阵，`kind` 为 `FK_DESCRIPTOR_BINARY` (u8) 或 `FK_DESCRIPTOR_FLOAT` (f32)
#[repr(C)]
pub struct FkMatrix {
    pub data: *const c_void,
    pub rows: usize,
    pub cols: usize,
    pub kind: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FkPoint {
    pub x: i32,
    pub y: i32,
}

/// BGR 颜色，全部为 -1 时使用随机颜色
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FkColor {
    pub b: f64,
    pub g: f64,
    pub r: f64,
    pub a: f64,
}

pub type FkKeyPoint = KeyPointRecord;

enum Failure {
    NullPointer(&'static str),
    Error(Error),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Self::Error(e)
    }
}

impl From<opencv::Error> for Failure {
    fn from(e: opencv::Error) -> Self {
        Self::Error(e.into())
    }
}

impl Failure {
    fn status(&self) -> FkStatus {
        match self {
            Self::NullPointer(_) => FkStatus::NullPointer,
            Self::Error(e) => match e {
                Error::InvalidArgument(_) => FkStatus::InvalidArgument,
                Error::CapacityTooSmall { .. } => FkStatus::CapacityTooSmall,
                Error::NullHandle | Error::StaleHandle(_) => FkStatus::InvalidHandle,
                Error::WrongHandleKind { .. } => FkStatus::WrongHandleKind,
                Error::Unsupported(_) => FkStatus::Unsupported,
                Error::NotTrained => FkStatus::NotTrained,
                Error::Backend(_) | Error::Io(_) => FkStatus::Backend,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::NullPointer(what) => format!("{} is a null pointer", what),
            Self::Error(e) => e.to_string(),
        }
    }
}

type FfiResult<T = ()> = std::result::Result<T, Failure>;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: String) {
    let msg = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with_borrow_mut(|e| *e = Some(msg));
}

fn guard(name: &'static str, f: impl FnOnce() -> FfiResult) -> FkStatus {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => FkStatus::Ok,
        Ok(Err(failure)) => {
            let msg = failure.message();
            debug!("{}: {}", name, msg);
            set_last_error(msg);
            failure.status()
        }
        Err(_) => {
            error!("{}: panic caught at the C boundary", name);
            set_last_error(format!("{} panicked", name));
            FkStatus::Panic
        }
    }
}

unsafe fn deref<'a, T>(ptr: *const T, what: &'static str) -> FfiResult<&'a T> {
    unsafe { ptr.as_ref() }.ok_or(Failure::NullPointer(what))
}

unsafe fn deref_mut<'a, T>(ptr: *mut T, what: &'static str) -> FfiResult<&'a mut T> {
    unsafe { ptr.as_mut() }.ok_or(Failure::NullPointer(what))
}

unsafe fn slice<'a, T>(ptr: *const T, len: usize, what: &'static str) -> FfiResult<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(Failure::NullPointer(what));
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

unsafe fn slice_mut<'a, T>(ptr: *mut T, len: usize, what: &'static str) -> FfiResult<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(Failure::NullPointer(what));
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
}

unsafe fn write<T>(out: *mut T, value: T, what: &'static str) -> FfiResult {
    if out.is_null() {
        return Err(Failure::NullPointer(what));
    }
    unsafe { out.write(value) };
    Ok(())
}

/// 校验容量后整体写入
unsafe fn write_slice<T: Copy>(
    out: *mut T,
    capacity: usize,
    data: &[T],
    what: &'static str,
) -> FfiResult {
    ensure_capacity(data.len(), capacity)?;
    if data.is_empty() {
        return Ok(());
    }
    if out.is_null() {
        return Err(Failure::NullPointer(what));
    }
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), out, data.len()) };
    Ok(())
}

/// 缓冲区长度 `a * b`，溢出视为非法参数
fn checked_len(a: usize, b: usize, what: &'static str) -> FfiResult<usize> {
    a.checked_mul(b)
        .ok_or_else(|| Error::invalid(format!("{} is too large: {} x {}", what, a, b)).into())
}

/// 按行跨度存放的图片所占的字节数，最后一行只算 `width`
fn strided_len(step: usize, rows: usize, width: usize, what: &'static str) -> FfiResult<usize> {
    checked_len(step, rows.saturating_sub(1), what)?
        .checked_add(width)
        .ok_or_else(|| Error::invalid(format!("{} is too large", what)).into())
}

/// 报告长度，允许为空指针
unsafe fn report_len(out: *mut usize, len: usize) {
    if !out.is_null() {
        unsafe { out.write(len) };
    }
}

unsafe fn str_arg<'a>(s: *const c_char, what: &'static str) -> FfiResult<&'a str> {
    if s.is_null() {
        return Err(Failure::NullPointer(what));
    }
    unsafe { CStr::from_ptr(s) }
        .to_str()
        .map_err(|e| Error::invalid(format!("{} is not UTF-8: {}", what, e)).into())
}

unsafe fn image_arg(image: *const FkImage, what: &'static str) -> FfiResult<Mat> {
    let img = unsafe { deref(image, what) }?;
    if img.rows < 0 || img.cols < 0 {
        return Err(Error::invalid(format!("{} has negative size", what)).into());
    }
    if img.rows == 0 || img.cols == 0 {
        return Ok(Mat::default());
    }
    let (rows, cols) = (img.rows as usize, img.cols as usize);
    if img.step < cols {
        return Err(Error::invalid(format!("{} step {} is less than width {}", what, img.step, cols)).into());
    }
    let bytes = unsafe { slice(img.data, strided_len(img.step, rows, cols, what)?, what) }?;
    let mut pixels = Matrix::<u8>::new(cols);
    for r in 0..rows {
        pixels.push(&bytes[r * img.step..r * img.step + cols])?;
    }
    Ok(pixels.to_mat()?)
}

unsafe fn optional_image_arg(image: *const FkImage, what: &'static str) -> FfiResult<Option<Mat>> {
    if image.is_null() {
        return Ok(None);
    }
    unsafe { image_arg(image, what) }.map(Some)
}

fn kind_arg(kind: i32) -> FfiResult<DescriptorKind> {
    match kind {
        FK_DESCRIPTOR_BINARY => Ok(DescriptorKind::Binary),
        FK_DESCRIPTOR_FLOAT => Ok(DescriptorKind::Float),
        _ => Err(Error::invalid(format!("unknown descriptor kind {}", kind)).into()),
    }
}

fn kind_code(kind: DescriptorKind) -> i32 {
    match kind {
        DescriptorKind::Binary => FK_DESCRIPTOR_BINARY,
        DescriptorKind::Float => FK_DESCRIPTOR_FLOAT,
    }
}

unsafe fn descriptors_arg(matrix: *const FkMatrix, what: &'static str) -> FfiResult<Descriptors> {
    let m = unsafe { deref(matrix, what) }?;
    let kind = kind_arg(m.kind)?;
    let len = m
        .rows
        .checked_mul(m.cols)
        .and_then(|n| n.checked_mul(kind.element_size()))
        .ok_or_else(|| Error::invalid(format!("{} is too large", what)))?;
    let bytes = unsafe { slice(m.data as *const u8, len, what) }?;
    let descriptors = match kind {
        DescriptorKind::Binary => Descriptors::Binary(Matrix::from_vec(m.rows, m.cols, bytes.to_vec())?),
        DescriptorKind::Float => {
            Descriptors::Float(Matrix::from_vec(m.rows, m.cols, bytemuck::pod_collect_to_vec(bytes))?)
        }
    };
    Ok(descriptors)
}

unsafe fn keypoints_arg(keypoints: *const FkKeyPoint, len: usize) -> FfiResult<KeyPoints> {
    let records = unsafe { slice(keypoints, len, "keypoints") }?;
    Ok(from_records(records)?)
}

unsafe fn write_knn(
    matches: &KnnMatches,
    out_indices: *mut i32,
    out_distances: *mut f32,
    capacity: usize,
) -> FfiResult {
    let len = matches.indices.as_slice().len();
    ensure_capacity(len, capacity)?;
    unsafe {
        write_slice(out_indices, capacity, matches.indices.as_slice(), "indices")?;
        write_slice(out_distances, capacity, matches.distances.as_slice(), "distances")
    }
}

fn style_arg(style: i32) -> FfiResult<DrawStyle> {
    // 取值与 OpenCV 的 DrawMatchesFlags 一致
    match style {
        0 => Ok(DrawStyle::Default),
        1 => Ok(DrawStyle::DrawOverOutput),
        2 => Ok(DrawStyle::NotDrawSinglePoints),
        4 => Ok(DrawStyle::RichKeypoints),
        _ => Err(Error::invalid(format!("unknown draw style {}", style)).into()),
    }
}

fn color_arg(c: FkColor) -> Scalar {
    Scalar::new(c.b, c.g, c.r, c.a)
}

/// 校验输出图片尺寸，需要时读入原有内容
unsafe fn output_image_arg<'a>(
    out: *const FkImageMut,
    rows: i32,
    cols: i32,
    style: DrawStyle,
) -> FfiResult<(&'a FkImageMut, Mat)> {
    let o = unsafe { deref(out, "output image") }?;
    if rows <= 0 || cols <= 0 {
        return Err(Error::invalid("nothing to draw on an empty image").into());
    }
    if o.rows != rows || o.cols != cols {
        return Err(Error::invalid(format!(
            "output image must be {}x{}, got {}x{}",
            rows, cols, o.rows, o.cols
        ))
        .into());
    }
    let width = checked_len(cols as usize, 3, "output image")?;
    if o.step < width {
        return Err(Error::invalid(format!("output step {} is less than {}", o.step, width)).into());
    }
    let mut mat = Mat::default();
    if style == DrawStyle::DrawOverOutput {
        mat = Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC3, Scalar::all(0.))?;
        let len = strided_len(o.step, rows as usize, width, "output image")?;
        let src = unsafe { slice(o.data as *const u8, len, "output image") }?;
        let dst = mat.data_bytes_mut()?;
        for r in 0..rows as usize {
            dst[r * width..(r + 1) * width].copy_from_slice(&src[r * o.step..r * o.step + width]);
        }
    }
    Ok((o, mat))
}

unsafe fn write_image(o: &FkImageMut, mat: &Mat) -> FfiResult {
    if mat.typ() != core::CV_8UC3 || mat.rows() != o.rows || mat.cols() != o.cols {
        return Err(Error::invalid("drawing produced an unexpected image").into());
    }
    let width = checked_len(o.cols as usize, 3, "output image")?;
    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };
    let src = mat.data_bytes()?;
    let rows = o.rows as usize;
    let len = strided_len(o.step, rows, width, "output image")?;
    let dst = unsafe { slice_mut(o.data, len, "output image") }?;
    for r in 0..rows {
        dst[r * o.step..r * o.step + width].copy_from_slice(&src[r * width..(r + 1) * width]);
    }
    Ok(())
}

/// 最近一次失败的错误信息，在同一线程的下一次失败之前有效；没有失败过时返回空指针
#[unsafe(no_mangle)]
pub extern "C" fn fk_last_error() -> *const c_char {
    LAST_ERROR.with_borrow(|e| e.as_ref().map_or(ptr::null(), |s| s.as_ptr()))
}

#[unsafe(no_mangle)]
pub extern "C" fn fk_registry_create() -> *mut Registry {
    Box::into_raw(Box::new(Registry::new()))
}

/// 释放 registry 及其中所有未释放的对象，空指针为空操作
///
/// # Safety
/// `registry` 必须来自 [`fk_registry_create`] 且未被释放
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_registry_release(registry: *mut Registry) {
    if !registry.is_null() {
        let registry = unsafe { Box::from_raw(registry) };
        debug!("releasing registry with {} live objects", registry.live());
    }
}

/// 按句柄类别释放任意对象，空句柄为空操作
///
/// # Safety
/// `registry` 必须来自 [`fk_registry_create`]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_release(registry: *mut Registry, handle: u64) -> FkStatus {
    guard("fk_release", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        Ok(reg.release(Handle::from_raw(handle))?)
    })
}

unsafe fn create_feature(
    registry: *mut Registry,
    config: &FeatureConfig,
    out_handle: *mut u64,
) -> FfiResult {
    let reg = unsafe { deref_mut(registry, "registry") }?;
    if out_handle.is_null() {
        return Err(Failure::NullPointer("out_handle"));
    }
    let handle = reg.create_feature(config)?;
    unsafe { write(out_handle, handle.into_raw(), "out_handle") }
}

/// 从 JSON 配置创建特征对象，例如 `{"type": "orb", "nfeatures": 1000}`
///
/// # Safety
/// 指针参数必须有效，`config_json` 以 NUL 结尾
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_feature_create(
    registry: *mut Registry,
    config_json: *const c_char,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_feature_create", || {
        let json = unsafe { str_arg(config_json, "config_json") }?;
        let config: FeatureConfig = serde_json::from_str(json)
            .map_err(|e| Error::invalid(format!("bad feature config: {}", e)))?;
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_orb_create(
    registry: *mut Registry,
    nfeatures: i32,
    scale_factor: f32,
    nlevels: i32,
    edge_threshold: i32,
    first_level: i32,
    wta_k: i32,
    harris_score: bool,
    patch_size: i32,
    fast_threshold: i32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_orb_create", || {
        let config = FeatureConfig::Orb(OrbParams {
            nfeatures,
            scale_factor,
            nlevels,
            edge_threshold,
            first_level,
            wta_k,
            harris_score,
            patch_size,
            fast_threshold,
        });
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_sift_create(
    registry: *mut Registry,
    nfeatures: i32,
    n_octave_layers: i32,
    contrast_threshold: f64,
    edge_threshold: f64,
    sigma: f64,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_sift_create", || {
        let config = FeatureConfig::Sift(SiftParams {
            nfeatures,
            n_octave_layers,
            contrast_threshold,
            edge_threshold,
            sigma,
        });
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_fast_create(
    registry: *mut Registry,
    threshold: i32,
    nonmax_suppression: bool,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_fast_create", || {
        let config = FeatureConfig::Fast(FastParams { threshold, nonmax_suppression });
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_mser_create(
    registry: *mut Registry,
    delta: i32,
    min_area: i32,
    max_area: i32,
    max_variation: f64,
    min_diversity: f64,
    max_evolution: i32,
    area_threshold: f64,
    min_margin: f64,
    edge_blur_size: i32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_mser_create", || {
        let config = FeatureConfig::Mser(MserParams {
            delta,
            min_area,
            max_area,
            max_variation,
            min_diversity,
            max_evolution,
            area_threshold,
            min_margin,
            edge_blur_size,
        });
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[cfg(feature = "contrib")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_brief_create(
    registry: *mut Registry,
    bytes: i32,
    use_orientation: bool,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_brief_create", || {
        let config = FeatureConfig::Brief(crate::features::BriefParams { bytes, use_orientation });
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[cfg(feature = "contrib")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_surf_create(
    registry: *mut Registry,
    hessian_threshold: f64,
    n_octaves: i32,
    n_octave_layers: i32,
    extended: bool,
    upright: bool,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_surf_create", || {
        let config = FeatureConfig::Surf(crate::features::SurfParams {
            hessian_threshold,
            n_octaves,
            n_octave_layers,
            extended,
            upright,
        });
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[cfg(feature = "contrib")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_star_create(
    registry: *mut Registry,
    max_size: i32,
    response_threshold: i32,
    line_threshold_projected: i32,
    line_threshold_binarized: i32,
    suppress_nonmax_size: i32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_star_create", || {
        let config = FeatureConfig::Star(crate::features::StarParams {
            max_size,
            response_threshold,
            line_threshold_projected,
            line_threshold_binarized,
            suppress_nonmax_size,
        });
        unsafe { create_feature(registry, &config, out_handle) }
    })
}

/// 用已有检测器创建分块检测器，成功后 `detector` 句柄失效
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_grid_adapted_create(
    registry: *mut Registry,
    detector: u64,
    max_total_keypoints: usize,
    grid_rows: usize,
    grid_cols: usize,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_grid_adapted_create", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        if out_handle.is_null() {
            return Err(Failure::NullPointer("out_handle"));
        }
        let handle = reg.create_grid_adapted(
            Handle::from_raw(detector),
            max_total_keypoints,
            grid_rows,
            grid_cols,
        )?;
        unsafe { write(out_handle, handle.into_raw(), "out_handle") }
    })
}

/// # Safety
/// `registry` 必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_feature_release(registry: *mut Registry, handle: u64) -> FkStatus {
    guard("fk_feature_release", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        Ok(reg.release_feature(Handle::from_raw(handle))?)
    })
}

/// 描述符的列数和元素类型
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_feature_descriptor_shape(
    registry: *mut Registry,
    handle: u64,
    out_size: *mut usize,
    out_kind: *mut i32,
) -> FkStatus {
    guard("fk_feature_descriptor_shape", || {
        let reg = unsafe { deref(registry, "registry") }?;
        let handle = Handle::from_raw(handle);
        let size = reg.descriptor_size(handle)?;
        let kind = reg.descriptor_kind(handle)?;
        unsafe {
            write(out_size, size, "out_size")?;
            write(out_kind, kind_code(kind), "out_kind")
        }
    })
}

/// 检测特征点，`mask` 可以为空
///
/// `out_len` 总是写入检测到的数量，容量不足时 `out_keypoints` 保持不变
///
/// # Safety
/// 指针参数必须有效，`out_keypoints` 至少能容纳 `capacity` 个元素
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_detect(
    registry: *mut Registry,
    handle: u64,
    image: *const FkImage,
    mask: *const FkImage,
    out_keypoints: *mut FkKeyPoint,
    capacity: usize,
    out_len: *mut usize,
) -> FkStatus {
    guard("fk_detect", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let image = unsafe { image_arg(image, "image") }?;
        let mask = unsafe { optional_image_arg(mask, "mask") }?;
        let keypoints = reg.detect(Handle::from_raw(handle), &image, mask.as_ref())?;
        let records = to_records(&keypoints);
        unsafe {
            report_len(out_len, records.len());
            write_slice(out_keypoints, capacity, &records, "out_keypoints")
        }
    })
}

/// 计算描述符
///
/// `keypoints` 为输入输出参数：无法计算描述符的特征点会被移除，剩余数量写回 `keypoints_len`。
/// 描述符按行优先写入 `out_descriptors`，容量以字节计；容量不足时所有输出保持不变
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_compute(
    registry: *mut Registry,
    handle: u64,
    image: *const FkImage,
    keypoints: *mut FkKeyPoint,
    keypoints_len: *mut usize,
    out_descriptors: *mut c_void,
    capacity_bytes: usize,
) -> FkStatus {
    guard("fk_compute", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let image = unsafe { image_arg(image, "image") }?;
        let len = unsafe { deref_mut(keypoints_len, "keypoints_len") }?;
        let mut kps = unsafe { keypoints_arg(keypoints, *len) }?;
        let descriptors = reg.compute(Handle::from_raw(handle), &image, &mut kps)?;
        let bytes = descriptors.as_bytes();
        ensure_capacity(bytes.len(), capacity_bytes)?;

        let records = to_records(&kps);
        unsafe {
            write_slice(out_descriptors as *mut u8, capacity_bytes, bytes, "out_descriptors")?;
            write_slice(keypoints, *len, &records, "keypoints")?;
        }
        *len = records.len();
        Ok(())
    })
}

/// 同时检测和计算，容量不足时所有输出保持不变，只写回所需的特征点数量
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_detect_and_compute(
    registry: *mut Registry,
    handle: u64,
    image: *const FkImage,
    mask: *const FkImage,
    out_keypoints: *mut FkKeyPoint,
    keypoints_capacity: usize,
    out_len: *mut usize,
    out_descriptors: *mut c_void,
    capacity_bytes: usize,
) -> FkStatus {
    guard("fk_detect_and_compute", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let image = unsafe { image_arg(image, "image") }?;
        let mask = unsafe { optional_image_arg(mask, "mask") }?;
        let (kps, descriptors) =
            reg.detect_and_compute(Handle::from_raw(handle), &image, mask.as_ref())?;
        let records = to_records(&kps);
        unsafe { report_len(out_len, records.len()) };
        ensure_capacity(records.len(), keypoints_capacity)?;
        ensure_capacity(descriptors.as_bytes().len(), capacity_bytes)?;
        unsafe {
            write_slice(out_keypoints, keypoints_capacity, &records, "out_keypoints")?;
            write_slice(
                out_descriptors as *mut u8,
                capacity_bytes,
                descriptors.as_bytes(),
                "out_descriptors",
            )
        }
    })
}

/// `norm` 使用 OpenCV 的 NORM_* 取值
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_matcher_create(
    registry: *mut Registry,
    norm: i32,
    cross_check: bool,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_matcher_create", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        if out_handle.is_null() {
            return Err(Failure::NullPointer("out_handle"));
        }
        let handle = reg.create_matcher(Norm::from_cv(norm)?, cross_check)?;
        unsafe { write(out_handle, handle.into_raw(), "out_handle") }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_matcher_add(
    registry: *mut Registry,
    handle: u64,
    descriptors: *const FkMatrix,
) -> FkStatus {
    guard("fk_matcher_add", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let descriptors = unsafe { descriptors_arg(descriptors, "descriptors") }?;
        Ok(reg.matcher_add(Handle::from_raw(handle), &descriptors)?)
    })
}

/// # Safety
/// `registry` 必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_matcher_clear(registry: *mut Registry, handle: u64) -> FkStatus {
    guard("fk_matcher_clear", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        Ok(reg.matcher_clear(Handle::from_raw(handle))?)
    })
}

/// k 近邻匹配，输出为 `查询行数 x k` 的行优先矩阵，候选不足时索引为 -1、距离为 FLT_MAX
///
/// `mask` 可以为空，否则为 `查询行数 x 训练总行数` 个字节
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_matcher_knn_match(
    registry: *mut Registry,
    handle: u64,
    query: *const FkMatrix,
    k: usize,
    mask: *const u8,
    out_indices: *mut i32,
    out_distances: *mut f32,
    capacity: usize,
) -> FkStatus {
    guard("fk_matcher_knn_match", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let handle = Handle::from_raw(handle);
        let query = unsafe { descriptors_arg(query, "query") }?;
        ensure_capacity(checked_len(query.rows(), k, "matches")?, capacity)?;
        let mask = if mask.is_null() {
            None
        } else {
            let train = reg.matcher_train_len(handle)?;
            let bytes = unsafe { slice(mask, checked_len(query.rows(), train, "mask")?, "mask") }?;
            Some(Matrix::from_vec(query.rows(), train, bytes.to_vec())?)
        };
        let matches = reg.knn_match(handle, &query, k, mask.as_ref())?;
        unsafe { write_knn(&matches, out_indices, out_distances, capacity) }
    })
}

/// # Safety
/// `registry` 必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_matcher_release(registry: *mut Registry, handle: u64) -> FkStatus {
    guard("fk_matcher_release", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        Ok(reg.release_matcher(Handle::from_raw(handle))?)
    })
}

unsafe fn build_index(
    registry: *mut Registry,
    features: *const FkMatrix,
    params: &IndexParams,
    out_handle: *mut u64,
) -> FfiResult {
    let reg = unsafe { deref_mut(registry, "registry") }?;
    let features = unsafe { descriptors_arg(features, "features") }?;
    if out_handle.is_null() {
        return Err(Failure::NullPointer("out_handle"));
    }
    let handle = reg.build_index(&features, params)?;
    unsafe { write(out_handle, handle.into_raw(), "out_handle") }
}

fn centers_init_arg(centers_init: i32) -> FfiResult<CentersInit> {
    // 取值与 cvflann::flann_centers_init_t 一致
    match centers_init {
        0 => Ok(CentersInit::Random),
        1 => Ok(CentersInit::Gonzales),
        2 => Ok(CentersInit::KMeansPP),
        _ => Err(Error::invalid(format!("unknown centers init {}", centers_init)).into()),
    }
}

/// 从 JSON 参数构建索引，例如 `{"algorithm": "kd_tree", "trees": 4}`
///
/// # Safety
/// 指针参数必须有效，`params_json` 以 NUL 结尾
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_index_create(
    registry: *mut Registry,
    features: *const FkMatrix,
    params_json: *const c_char,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_index_create", || {
        let json = unsafe { str_arg(params_json, "params_json") }?;
        let params: IndexParams = serde_json::from_str(json)
            .map_err(|e| Error::invalid(format!("bad index params: {}", e)))?;
        unsafe { build_index(registry, features, &params, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_index_create_linear(
    registry: *mut Registry,
    features: *const FkMatrix,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_index_create_linear", || unsafe {
        build_index(registry, features, &IndexParams::Linear, out_handle)
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_index_create_kdtree(
    registry: *mut Registry,
    features: *const FkMatrix,
    trees: i32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_index_create_kdtree", || unsafe {
        build_index(registry, features, &IndexParams::KdTree { trees }, out_handle)
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_index_create_kmeans(
    registry: *mut Registry,
    features: *const FkMatrix,
    branching: i32,
    iterations: i32,
    centers_init: i32,
    cb_index: f32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_index_create_kmeans", || {
        let params = IndexParams::KMeans {
            branching,
            iterations,
            centers_init: centers_init_arg(centers_init)?,
            cb_index,
        };
        unsafe { build_index(registry, features, &params, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_index_create_composite(
    registry: *mut Registry,
    features: *const FkMatrix,
    trees: i32,
    branching: i32,
    iterations: i32,
    centers_init: i32,
    cb_index: f32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_index_create_composite", || {
        let params = IndexParams::Composite {
            trees,
            branching,
            iterations,
            centers_init: centers_init_arg(centers_init)?,
            cb_index,
        };
        unsafe { build_index(registry, features, &params, out_handle) }
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_index_create_autotuned(
    registry: *mut Registry,
    features: *const FkMatrix,
    target_precision: f32,
    build_weight: f32,
    memory_weight: f32,
    sample_fraction: f32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_index_create_autotuned", || {
        let params = IndexParams::Autotuned {
            target_precision,
            build_weight,
            memory_weight,
            sample_fraction,
        };
        unsafe { build_index(registry, features, &params, out_handle) }
    })
}

/// LSH 索引，只接受二进制特征
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_index_create_lsh(
    registry: *mut Registry,
    features: *const FkMatrix,
    table_number: i32,
    key_size: i32,
    multi_probe_level: i32,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_index_create_lsh", || {
        let params = IndexParams::Lsh { table_number, key_size, multi_probe_level };
        unsafe { build_index(registry, features, &params, out_handle) }
    })
}

/// k 近邻搜索；`checks` 为 0 表示使用自动调优的参数，负数表示不限制。
/// 浮点特征的距离为 L2 的平方
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_index_knn_search(
    registry: *mut Registry,
    handle: u64,
    queries: *const FkMatrix,
    k: usize,
    checks: i32,
    out_indices: *mut i32,
    out_distances: *mut f32,
    capacity: usize,
) -> FkStatus {
    guard("fk_index_knn_search", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let queries = unsafe { descriptors_arg(queries, "queries") }?;
        ensure_capacity(checked_len(queries.rows(), k, "matches")?, capacity)?;
        let matches =
            reg.knn_search(Handle::from_raw(handle), &queries, k, Checks::from_raw(checks))?;
        unsafe { write_knn(&matches, out_indices, out_distances, capacity) }
    })
}

/// 半径搜索，`query` 只能有一行。最多写入 `capacity` 个结果，
/// `out_count` 为半径内找到的总数，可能大于 `capacity`
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_index_radius_search(
    registry: *mut Registry,
    handle: u64,
    query: *const FkMatrix,
    radius: f32,
    checks: i32,
    out_indices: *mut i32,
    out_distances: *mut f32,
    capacity: usize,
    out_count: *mut usize,
) -> FkStatus {
    guard("fk_index_radius_search", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let query = unsafe { descriptors_arg(query, "query") }?;
        if out_count.is_null() {
            return Err(Failure::NullPointer("out_count"));
        }
        let result = reg.radius_search(
            Handle::from_raw(handle),
            &query,
            radius,
            capacity,
            Checks::from_raw(checks),
        )?;
        let indices: Vec<i32> = result.neighbors.iter().map(|(i, _)| *i as i32).collect();
        let distances: Vec<f32> = result.neighbors.iter().map(|(_, d)| *d).collect();
        unsafe {
            write_slice(out_indices, capacity, &indices, "out_indices")?;
            write_slice(out_distances, capacity, &distances, "out_distances")?;
            write(out_count, result.count, "out_count")
        }
    })
}

/// # Safety
/// `registry` 必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_index_release(registry: *mut Registry, handle: u64) -> FkStatus {
    guard("fk_index_release", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        Ok(reg.release_index(Handle::from_raw(handle))?)
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_classifier_create(
    registry: *mut Registry,
    out_handle: *mut u64,
) -> FkStatus {
    guard("fk_classifier_create", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        if out_handle.is_null() {
            return Err(Failure::NullPointer("out_handle"));
        }
        let handle = reg.create_classifier();
        unsafe { write(out_handle, handle.into_raw(), "out_handle") }
    })
}

/// 以每个训练点为一个类别训练分类器，`seed` 决定随机视角的生成
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_classifier_train(
    registry: *mut Registry,
    handle: u64,
    image: *const FkImage,
    points: *const FkPoint,
    num_points: usize,
    seed: u64,
    num_trees: i32,
    depth: i32,
    views: usize,
    patch_size: i32,
) -> FkStatus {
    guard("fk_classifier_train", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        let image = unsafe { image_arg(image, "image") }?;
        let points: Vec<Point> = unsafe { slice(points, num_points, "points") }?
            .iter()
            .map(|p| Point::new(p.x, p.y))
            .collect();
        let params = ClassifierParams { num_trees, depth, views, patch_size, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(reg.classifier_train(Handle::from_raw(handle), &image, &points, &params, &mut rng)?)
    })
}

/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_classifier_num_classes(
    registry: *mut Registry,
    handle: u64,
    out_classes: *mut usize,
) -> FkStatus {
    guard("fk_classifier_num_classes", || {
        let reg = unsafe { deref(registry, "registry") }?;
        let classes = reg.classifier_num_classes(Handle::from_raw(handle))?;
        unsafe { write(out_classes, classes, "out_classes") }
    })
}

/// 计算图像块签名，`out_signature` 至少需要类别数量个元素
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_classifier_signature(
    registry: *mut Registry,
    handle: u64,
    image: *const FkImage,
    point: FkPoint,
    out_signature: *mut f32,
    capacity: usize,
) -> FkStatus {
    guard("fk_classifier_signature", || {
        let reg = unsafe { deref(registry, "registry") }?;
        let handle = Handle::from_raw(handle);
        ensure_capacity(reg.classifier_num_classes(handle)?, capacity)?;
        let image = unsafe { image_arg(image, "image") }?;
        let signature = reg.signature(handle, &image, Point::new(point.x, point.y))?;
        unsafe { write_slice(out_signature, capacity, &signature, "out_signature") }
    })
}

/// # Safety
/// `registry` 必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_classifier_release(registry: *mut Registry, handle: u64) -> FkStatus {
    guard("fk_classifier_release", || {
        let reg = unsafe { deref_mut(registry, "registry") }?;
        Ok(reg.release_classifier(Handle::from_raw(handle))?)
    })
}

struct MatchArgs {
    model: KeyPoints,
    observed: KeyPoints,
    indices: Matrix<i32>,
    mask: Matrix<u8>,
}

unsafe fn match_args(
    model: *const FkKeyPoint,
    model_len: usize,
    observed: *const FkKeyPoint,
    observed_len: usize,
    indices: *const i32,
    k: usize,
    mask: *mut u8,
) -> FfiResult<MatchArgs> {
    if k == 0 {
        return Err(Error::invalid("indices must have at least one column").into());
    }
    unsafe {
        let indices = slice(indices, checked_len(observed_len, k, "indices")?, "indices")?;
        let mask = slice(mask as *const u8, observed_len, "mask")?;
        Ok(MatchArgs {
            model: keypoints_arg(model, model_len)?,
            observed: keypoints_arg(observed, observed_len)?,
            indices: Matrix::from_vec(observed_len, k, indices.to_vec())?,
            mask: Matrix::from_vec(observed_len, 1, mask.to_vec())?,
        })
    }
}

/// 用 RANSAC 估计模型到观测图像的单应矩阵
///
/// `indices` 为 `observed_len x k`，只使用第一列；`mask` 为输入输出参数，成功时只保留内点。
/// 失败时 `out_homography` 的 9 个元素被置零，`out_found` 为 false，`mask` 不变
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_estimate_homography(
    model: *const FkKeyPoint,
    model_len: usize,
    observed: *const FkKeyPoint,
    observed_len: usize,
    indices: *const i32,
    k: usize,
    mask: *mut u8,
    ransac_threshold: f64,
    out_homography: *mut f64,
    out_found: *mut bool,
) -> FkStatus {
    guard("fk_estimate_homography", || {
        let mut args =
            unsafe { match_args(model, model_len, observed, observed_len, indices, k, mask) }?;
        let out = unsafe { slice_mut(out_homography, 9, "out_homography") }?;
        if out_found.is_null() {
            return Err(Failure::NullPointer("out_found"));
        }
        let homography = homography::estimate_homography(
            &args.model,
            &args.observed,
            &args.indices,
            &mut args.mask,
            ransac_threshold,
        )?;
        match homography {
            Some(h) => {
                out.copy_from_slice(h.0.as_flattened());
                unsafe { slice_mut(mask, observed_len, "mask") }?.copy_from_slice(args.mask.as_slice());
            }
            None => out.fill(0.),
        }
        unsafe { write(out_found, homography.is_some(), "out_found") }
    })
}

/// 按尺度和旋转投票，就地更新 `mask`，`out_count` 为剩余的有效匹配数量
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_vote_for_size_and_orientation(
    model: *const FkKeyPoint,
    model_len: usize,
    observed: *const FkKeyPoint,
    observed_len: usize,
    indices: *const i32,
    k: usize,
    mask: *mut u8,
    scale_increment: f64,
    rotation_bins: usize,
    out_count: *mut usize,
) -> FkStatus {
    guard("fk_vote_for_size_and_orientation", || {
        let mut args =
            unsafe { match_args(model, model_len, observed, observed_len, indices, k, mask) }?;
        if out_count.is_null() {
            return Err(Failure::NullPointer("out_count"));
        }
        let count = homography::vote_for_size_and_orientation(
            &args.model,
            &args.observed,
            &args.indices,
            &mut args.mask,
            scale_increment,
            rotation_bins,
        )?;
        unsafe {
            slice_mut(mask, observed_len, "mask")?.copy_from_slice(args.mask.as_slice());
            write(out_count, count, "out_count")
        }
    })
}

/// 比值检验，`distances` 为 `rows x k`（k >= 2），就地更新 `mask`
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_vote_for_uniqueness(
    distances: *const f32,
    rows: usize,
    k: usize,
    threshold: f64,
    mask: *mut u8,
    out_count: *mut usize,
) -> FkStatus {
    guard("fk_vote_for_uniqueness", || {
        let distances = unsafe { slice(distances, checked_len(rows, k, "distances")?, "distances") }?;
        let distances = Matrix::from_vec(rows, k, distances.to_vec())?;
        let mask_buf = unsafe { slice_mut(mask, rows, "mask") }?;
        let mut m = Matrix::from_vec(rows, 1, mask_buf.to_vec())?;
        if out_count.is_null() {
            return Err(Failure::NullPointer("out_count"));
        }
        let count = homography::vote_for_uniqueness(&distances, threshold, &mut m)?;
        mask_buf.copy_from_slice(m.as_slice());
        unsafe { write(out_count, count, "out_count") }
    })
}

/// 绘制特征点，输出图片与输入同样大小
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fk_draw_keypoints(
    image: *const FkImage,
    keypoints: *const FkKeyPoint,
    keypoints_len: usize,
    out_image: *const FkImageMut,
    color: FkColor,
    style: i32,
) -> FkStatus {
    guard("fk_draw_keypoints", || {
        let style = style_arg(style)?;
        let image = unsafe { image_arg(image, "image") }?;
        let kps = unsafe { keypoints_arg(keypoints, keypoints_len) }?;
        let (out, mut mat) =
            unsafe { output_image_arg(out_image, image.rows(), image.cols(), style) }?;
        draw::draw_keypoints(&image, &kps, &mut mat, color_arg(color), style)?;
        unsafe { write_image(out, &mat) }
    })
}

/// 左右拼接绘制匹配，输出图片高度为两图中较高者，宽度为两图之和
///
/// `indices` 为 `keypoints2_len x k`，`mask` 可以为空
///
/// # Safety
/// 指针参数必须有效
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn fk_draw_matched_features(
    img1: *const FkImage,
    keypoints1: *const FkKeyPoint,
    keypoints1_len: usize,
    img2: *const FkImage,
    keypoints2: *const FkKeyPoint,
    keypoints2_len: usize,
    indices: *const i32,
    k: usize,
    out_image: *const FkImageMut,
    match_color: FkColor,
    single_point_color: FkColor,
    mask: *const u8,
    style: i32,
) -> FkStatus {
    guard("fk_draw_matched_features", || {
        let style = style_arg(style)?;
        let img1 = unsafe { image_arg(img1, "img1") }?;
        let img2 = unsafe { image_arg(img2, "img2") }?;
        let kps1 = unsafe { keypoints_arg(keypoints1, keypoints1_len) }?;
        let kps2 = unsafe { keypoints_arg(keypoints2, keypoints2_len) }?;
        let indices = unsafe { slice(indices, checked_len(keypoints2_len, k, "indices")?, "indices") }?;
        let indices = Matrix::from_vec(keypoints2_len, k, indices.to_vec())?;
        let mask = if mask.is_null() {
            None
        } else {
            let bytes = unsafe { slice(mask, keypoints2_len, "mask") }?;
            Some(Matrix::from_vec(keypoints2_len, 1, bytes.to_vec())?)
        };
        let cols = img1
            .cols()
            .checked_add(img2.cols())
            .ok_or_else(|| Error::invalid("combined image is too wide"))?;
        let rows = img1.rows().max(img2.rows());
        let (out, mut mat) = unsafe { output_image_arg(out_image, rows, cols, style) }?;
        draw::draw_matched_features(
            &img1,
            &kps1,
            &img2,
            &kps2,
            &indices,
            &mut mat,
            color_arg(match_color),
            color_arg(single_point_color),
            mask.as_ref(),
            style,
        )?;
        unsafe { write_image(out, &mat) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (Failure::NullPointer("x"), FkStatus::NullPointer),
            (Error::invalid("x").into(), FkStatus::InvalidArgument),
            (Error::CapacityTooSmall { required: 2, provided: 1 }.into(), FkStatus::CapacityTooSmall),
            (Error::StaleHandle(Handle::NULL).into(), FkStatus::InvalidHandle),
            (Error::NotTrained.into(), FkStatus::NotTrained),
        ];
        for (failure, status) in cases {
            assert_eq!(failure.status(), status);
        }
    }

    #[test]
    fn panic_is_caught() {
        let status = guard("test", || panic!("boom"));
        assert_eq!(status, FkStatus::Panic);
        let msg = unsafe { CStr::from_ptr(fk_last_error()) };
        assert_eq!(msg.to_str().unwrap(), "test panicked");
    }

    #[test]
    fn oversized_lengths_are_invalid() {
        assert!(matches!(checked_len(usize::MAX, 2, "x"), Err(Failure::Error(Error::InvalidArgument(_)))));
        assert!(matches!(
            strided_len(usize::MAX / 2, 3, 1, "x"),
            Err(Failure::Error(Error::InvalidArgument(_)))
        ));
        assert_eq!(checked_len(4, 8, "x").ok(), Some(32));
        assert_eq!(strided_len(10, 3, 6, "x").ok(), Some(26));
        assert_eq!(strided_len(10, 0, 0, "x").ok(), Some(0));
    }

    #[test]
    fn write_slice_checks_capacity_first() {
        let mut buf = [7i32; 2];
        let res = unsafe { write_slice(buf.as_mut_ptr(), buf.len(), &[1, 2, 3], "buf") };
        assert!(matches!(res, Err(Failure::Error(Error::CapacityTooSmall { required: 3, provided: 2 }))));
        assert_eq!(buf, [7, 7]);
    }
}
