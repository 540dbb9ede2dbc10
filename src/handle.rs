use std::fmt;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const GENERATION_MASK: u32 = 0x00ff_ffff;

/// 句柄所指向的对象类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HandleKind {
    Feature = 1,
    Matcher = 2,
    Index = 3,
    Classifier = 4,
}

impl HandleKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Feature),
            2 => Some(Self::Matcher),
            3 => Some(Self::Index),
            4 => Some(Self::Classifier),
            _ => None,
        }
    }
}

/// 不透明句柄
///
/// 位布局：`[kind: 8][generation: 24][slot: 32]`，全 0 表示空句柄。
/// kind 从 1 开始，因此任何有效句柄都不为 0
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    fn new(kind: HandleKind, generation: u32, slot: u32) -> Self {
        Self(((kind as u64) << 56) | (((generation & GENERATION_MASK) as u64) << 32) | slot as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// 返回句柄类别，非法编码返回 None
    pub fn kind(self) -> Option<HandleKind> {
        HandleKind::from_u8((self.0 >> 56) as u8)
    }

    fn generation(self) -> u32 {
        ((self.0 >> 32) as u32) & GENERATION_MASK
    }

    fn slot(self) -> usize {
        self.0 as u32 as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "Handle(null)");
        }
        match self.kind() {
            Some(kind) => write!(f, "Handle({:?}#{}@{})", kind, self.slot(), self.generation()),
            None => write!(f, "Handle({:#x})", self.0),
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// 带代数校验的句柄表
///
/// 释放后的槽位会被复用，但代数加一，因此旧句柄不会误指向新对象
pub struct HandleTable<T> {
    kind: HandleKind,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> HandleTable<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self { kind, slots: vec![], free: vec![], len: 0 }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// 当前存活的对象数量
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Handle {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot].value = Some(value);
                slot
            }
            None => {
                self.slots.push(Slot { generation: 0, value: Some(value) });
                self.slots.len() - 1
            }
        };
        self.len += 1;
        let handle = Handle::new(self.kind, self.slots[slot].generation, slot as u32);
        trace!("allocate {:?}", handle);
        handle
    }

    fn check(&self, handle: Handle) -> Result<usize> {
        if handle.is_null() {
            return Err(Error::NullHandle);
        }
        match handle.kind() {
            Some(kind) if kind == self.kind => {}
            Some(kind) => return Err(Error::WrongHandleKind { expected: self.kind, found: kind }),
            None => return Err(Error::StaleHandle(handle)),
        }
        let slot = handle.slot();
        match self.slots.get(slot) {
            Some(s) if s.generation == handle.generation() && s.value.is_some() => Ok(slot),
            _ => Err(Error::StaleHandle(handle)),
        }
    }

    pub fn get(&self, handle: Handle) -> Result<&T> {
        let slot = self.check(handle)?;
        self.slots[slot].value.as_ref().ok_or(Error::StaleHandle(handle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        let slot = self.check(handle)?;
        self.slots[slot].value.as_mut().ok_or(Error::StaleHandle(handle))
    }

    /// 释放句柄并取回对象
    ///
    /// 空句柄直接返回 `Ok(None)`；重复释放返回 `StaleHandle`
    pub fn remove(&mut self, handle: Handle) -> Result<Option<T>> {
        if handle.is_null() {
            return Ok(None);
        }
        let slot = self.check(handle)?;
        let s = &mut self.slots[slot];
        let value = s.value.take();
        // 代数用尽的槽位不再复用，否则回绕后旧句柄会重新生效
        if s.generation < GENERATION_MASK {
            s.generation += 1;
            self.free.push(slot);
        }
        self.len -= 1;
        trace!("release {:?}", handle);
        Ok(value)
    }
}
