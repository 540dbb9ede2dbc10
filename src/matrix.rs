use ndarray::Array2;
use opencv::core::{CV_8U, CV_32F, DataType, Mat, Scalar};
use opencv::prelude::*;

use crate::error::{Error, Result};

/// 行优先存储的二维矩阵，行列数在构造时校验
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: DataType + Default> Matrix<T> {
    /// 创建宽度为 `cols` 的空矩阵
    pub fn new(cols: usize) -> Self {
        Self { rows: 0, cols, data: vec![] }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![T::default(); rows * cols] }
    }

    /// 创建一个所有元素都为 `value` 的矩阵
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self { rows, cols, data: vec![value; rows * cols] }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::invalid(format!(
                "matrix {}x{} needs {} elements, got {}",
                rows,
                cols,
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut matrix = Self::new(cols);
        for row in rows {
            matrix.push(row.as_ref())?;
        }
        Ok(matrix)
    }

    /// 追加一行
    pub fn push(&mut self, row: &[T]) -> Result<()> {
        if row.len() != self.cols {
            return Err(Error::invalid(format!(
                "row width {} does not match matrix width {}",
                row.len(),
                self.cols
            )));
        }
        self.rows += 1;
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// 追加另一个同宽矩阵的所有行
    pub fn extend(&mut self, other: &Matrix<T>) -> Result<()> {
        if self.rows == 0 && self.cols == 0 {
            self.cols = other.cols;
        }
        if other.cols != self.cols {
            return Err(Error::invalid(format!(
                "matrix width {} does not match {}",
                other.cols, self.cols
            )));
        }
        self.rows += other.rows;
        self.data.extend_from_slice(&other.data);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.rows = 0;
        self.data.clear();
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn row(&self, n: usize) -> &[T] {
        &self.data[n * self.cols..(n + 1) * self.cols]
    }

    pub fn row_mut(&mut self, n: usize) -> &mut [T] {
        &mut self.data[n * self.cols..(n + 1) * self.cols]
    }

    pub fn get(&self, r: usize, c: usize) -> Option<T> {
        if r < self.rows && c < self.cols { Some(self.data[r * self.cols + c]) } else { None }
    }

    pub fn set(&mut self, r: usize, c: usize, value: T) {
        self.data[r * self.cols + c] = value;
    }

    pub fn iter_rows(&self) -> impl ExactSizeIterator<Item = &[T]> + '_ {
        (0..self.rows).map(move |n| self.row(n))
    }

    /// 取出第 `c` 列作为单列矩阵
    pub fn column(&self, c: usize) -> Matrix<T> {
        Self { rows: self.rows, cols: 1, data: self.iter_rows().map(|r| r[c]).collect() }
    }

    /// 要求形状恰好为 `rows x cols`
    pub fn ensure_shape(&self, rows: usize, cols: usize, what: &str) -> Result<()> {
        if self.rows != rows || self.cols != cols {
            return Err(Error::invalid(format!(
                "{} must be {}x{}, got {}x{}",
                what, rows, cols, self.rows, self.cols
            )));
        }
        Ok(())
    }

    /// 复制到一个新的 OpenCV 矩阵
    pub fn to_mat(&self) -> Result<Mat> {
        let mut mat = Mat::new_rows_cols_with_default(
            self.rows as i32,
            self.cols as i32,
            T::opencv_type(),
            Scalar::all(0.),
        )?;
        if !self.data.is_empty() {
            mat.data_typed_mut::<T>()?.copy_from_slice(&self.data);
        }
        Ok(mat)
    }

    /// 从 OpenCV 矩阵复制，元素类型必须一致
    pub fn from_mat(mat: &Mat) -> Result<Self> {
        if mat.empty() {
            return Ok(Self::new(mat.cols().max(0) as usize));
        }
        if mat.typ() != T::opencv_type() {
            return Err(Error::invalid(format!(
                "mat type {} does not match element type {}",
                mat.typ(),
                T::opencv_type()
            )));
        }
        let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
        let data = if mat.is_continuous() {
            mat.data_typed::<T>()?.to_vec()
        } else {
            mat.try_clone()?.data_typed::<T>()?.to_vec()
        };
        Self::from_vec(rows, cols, data)
    }

    pub fn to_array2(&self) -> Result<Array2<T>> {
        Array2::from_shape_vec((self.rows, self.cols), self.data.clone())
            .map_err(|e| Error::invalid(e.to_string()))
    }

    pub fn from_array2(array: &Array2<T>) -> Self {
        let (rows, cols) = array.dim();
        Self { rows, cols, data: array.iter().copied().collect() }
    }
}

/// 描述符的元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DescriptorKind {
    /// 二进制描述符（ORB、BRIEF），每个元素 8 位
    Binary,
    /// 浮点描述符（SIFT、SURF）
    Float,
}

impl DescriptorKind {
    pub fn from_depth(depth: i32) -> Result<Self> {
        match depth {
            CV_8U => Ok(Self::Binary),
            CV_32F => Ok(Self::Float),
            _ => Err(Error::invalid(format!("unsupported descriptor depth {}", depth))),
        }
    }

    pub fn element_size(self) -> usize {
        match self {
            Self::Binary => 1,
            Self::Float => 4,
        }
    }
}

/// 描述符矩阵，每行对应一个特征点
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    Binary(Matrix<u8>),
    Float(Matrix<f32>),
}

impl Descriptors {
    pub fn empty(kind: DescriptorKind, cols: usize) -> Self {
        match kind {
            DescriptorKind::Binary => Self::Binary(Matrix::new(cols)),
            DescriptorKind::Float => Self::Float(Matrix::new(cols)),
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Binary(_) => DescriptorKind::Binary,
            Self::Float(_) => DescriptorKind::Float,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            Self::Binary(m) => m.rows(),
            Self::Float(m) => m.rows(),
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            Self::Binary(m) => m.cols(),
            Self::Float(m) => m.cols(),
        }
    }

    /// 以字节视图访问数据，用于按字节拷贝到调用方缓冲区
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Binary(m) => m.as_slice(),
            Self::Float(m) => bytemuck::cast_slice(m.as_slice()),
        }
    }

    pub fn to_mat(&self) -> Result<Mat> {
        match self {
            Self::Binary(m) => m.to_mat(),
            Self::Float(m) => m.to_mat(),
        }
    }

    /// 从 OpenCV 的描述符矩阵转换，空矩阵按 `kind` 和 `cols` 补全形状
    pub fn from_mat(mat: &Mat, kind: DescriptorKind, cols: usize) -> Result<Self> {
        if mat.empty() {
            return Ok(Self::empty(kind, cols));
        }
        match DescriptorKind::from_depth(mat.depth())? {
            DescriptorKind::Binary => Ok(Self::Binary(Matrix::from_mat(mat)?)),
            DescriptorKind::Float => Ok(Self::Float(Matrix::from_mat(mat)?)),
        }
    }
}
