use thiserror::Error;

use crate::handle::{Handle, HandleKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// featurekit 的错误类型
///
/// 算法层面的失败（例如内点不足）不属于错误，通过 `Option` 或计数返回
#[derive(Debug, Error)]
pub enum Error {
    /// 参数不合法：尺寸不匹配、元素类型错误等
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// 调用方提供的输出缓冲区容量不足
    #[error("output buffer too small: required {required}, provided {provided}")]
    CapacityTooSmall { required: usize, provided: usize },
    #[error("null handle")]
    NullHandle,
    /// 句柄已被释放，或者从未由当前 registry 分配
    #[error("stale handle {0:?}")]
    StaleHandle(Handle),
    #[error("expected a {expected:?} handle, found {found:?}")]
    WrongHandleKind { expected: HandleKind, found: HandleKind },
    /// 对象不具备请求的能力，例如对纯检测器调用 compute
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("classifier is not trained")]
    NotTrained,
    #[error(transparent)]
    Backend(#[from] opencv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// 校验输出缓冲区容量
pub(crate) fn ensure_capacity(required: usize, provided: usize) -> Result<()> {
    if provided < required {
        return Err(Error::CapacityTooSmall { required, provided });
    }
    Ok(())
}
