use std::path::Path;

use opencv::core::{self, CV_8U, Mat, Size, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// 以灰度模式读取图片，宽高**均**超过 `max_size` 时等比缩小
pub fn imread(path: impl AsRef<Path>, max_size: Option<(i32, i32)>) -> Result<Mat> {
    let path = path.as_ref();
    let img = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_GRAYSCALE)?;
    if img.empty() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to decode {}", path.display()),
        )));
    }
    adjust_image_size(img, max_size)
}

pub fn imdecode(bytes: &[u8], max_size: Option<(i32, i32)>) -> Result<Mat> {
    let buf = Vector::<u8>::from_slice(bytes);
    let img = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_GRAYSCALE)?;
    if img.empty() {
        return Err(Error::invalid("failed to decode image bytes"));
    }
    adjust_image_size(img, max_size)
}

pub fn imwrite(path: impl AsRef<Path>, img: &Mat) -> Result<()> {
    let path = path.as_ref();
    let flags = Vector::<i32>::new();
    if !imgcodecs::imwrite(&path.to_string_lossy(), img, &flags)? {
        return Err(Error::Io(std::io::Error::other(format!(
            "failed to write {}",
            path.display()
        ))));
    }
    Ok(())
}

pub fn adjust_image_size(img: Mat, max_size: Option<(i32, i32)>) -> Result<Mat> {
    let Some((width, height)) = max_size else {
        return Ok(img);
    };
    if img.cols() <= width || img.rows() <= height {
        return Ok(img);
    }
    let (ow, oh) = (img.cols() as f64, img.rows() as f64);
    let scale = (height as f64 / oh).max(width as f64 / ow);
    let mut output = Mat::default();
    imgproc::resize(
        &img,
        &mut output,
        Size::default(),
        scale,
        scale,
        imgproc::INTER_AREA,
    )?;
    Ok(output)
}

/// 转换为单通道 8 位灰度图
pub fn to_gray(img: &Mat) -> Result<Mat> {
    check_image(img)?;
    let gray = match img.channels() {
        1 => img.try_clone()?,
        3 => {
            let mut output = Mat::default();
            imgproc::cvt_color_def(img, &mut output, imgproc::COLOR_BGR2GRAY)?;
            output
        }
        4 => {
            let mut output = Mat::default();
            imgproc::cvt_color_def(img, &mut output, imgproc::COLOR_BGRA2GRAY)?;
            output
        }
        n => return Err(Error::invalid(format!("unsupported channel count {}", n))),
    };
    Ok(gray)
}

/// 输入图片必须非空且为 8 位
pub fn check_image(img: &Mat) -> Result<()> {
    if img.empty() {
        return Err(Error::invalid("image is empty"));
    }
    if img.depth() != CV_8U {
        return Err(Error::invalid(format!("image depth must be 8 bit, got {}", img.depth())));
    }
    Ok(())
}

/// 掩码必须为单通道 8 位，且尺寸与图片一致
pub fn check_mask(img: &Mat, mask: &Mat) -> Result<()> {
    if mask.typ() != core::CV_8UC1 {
        return Err(Error::invalid("mask must be CV_8UC1"));
    }
    if mask.rows() != img.rows() || mask.cols() != img.cols() {
        return Err(Error::invalid(format!(
            "mask size {}x{} does not match image size {}x{}",
            mask.cols(),
            mask.rows(),
            img.cols(),
            img.rows()
        )));
    }
    Ok(())
}

/// 创建一张纯色的单通道图片
pub fn blank(rows: i32, cols: i32, value: f64) -> Result<Mat> {
    Ok(Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC1, core::Scalar::all(value))?)
}

/// 生成由随机矩形和圆组成的纹理图，用于测试和基准
pub fn random_pattern(rows: i32, cols: i32, seed: u64) -> Result<Mat> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = blank(rows, cols, 0.)?;
    let shapes = (rows * cols / 1500).max(8);
    for _ in 0..shapes {
        let color = core::Scalar::all(rng.random_range(40.0..255.0));
        let x = rng.random_range(0..cols);
        let y = rng.random_range(0..rows);
        let w = rng.random_range(6..(cols / 6).max(7));
        let h = rng.random_range(6..(rows / 6).max(7));
        if rng.random_bool(0.5) {
            imgproc::rectangle(&mut img, core::Rect::new(x, y, w, h), color, -1, imgproc::LINE_8, 0)?;
        } else {
            let center = core::Point::new(x, y);
            imgproc::circle(&mut img, center, w.min(h) / 2 + 2, color, -1, imgproc::LINE_8, 0)?;
        }
    }
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_must_match_image() {
        let img = blank(32, 48, 0.).unwrap();
        let good = blank(32, 48, 255.).unwrap();
        let bad = blank(48, 32, 255.).unwrap();
        check_mask(&img, &good).unwrap();
        assert!(matches!(check_mask(&img, &bad), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(check_image(&Mat::default()).is_err());
    }

    #[test]
    fn shrink_only_when_both_sides_exceed() {
        let img = blank(100, 400, 0.).unwrap();
        let same = adjust_image_size(img, Some((200, 200))).unwrap();
        assert_eq!(same.cols(), 400);

        let img = blank(400, 400, 0.).unwrap();
        let small = adjust_image_size(img, Some((200, 100))).unwrap();
        assert_eq!(small.cols(), 200);
    }
}
