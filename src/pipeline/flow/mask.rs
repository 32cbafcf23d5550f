//! Bit mask over the heads of a socket group.

use crate::pipeline::value::{Value, ValueKind};
use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeMask(u8);

impl TypeMask {
    pub const EMPTY: TypeMask = TypeMask(0);
    pub const NO_OBJECT: TypeMask = TypeMask(1 << 0);
    pub const NORMAL: TypeMask = TypeMask(1 << 1);
    pub const START: TypeMask = TypeMask(1 << 2);
    pub const END: TypeMask = TypeMask(1 << 3);
    pub const STOP: TypeMask = TypeMask(1 << 4);
    pub const PAUSE: TypeMask = TypeMask(1 << 5);
    pub const RESUME: TypeMask = TypeMask(1 << 6);
    pub const RECONFIGURE: TypeMask = TypeMask(1 << 7);

    /// Bit describing one queue head.
    pub fn of(head: Option<&Value>) -> Self {
        match head {
            None => Self::NO_OBJECT,
            Some(value) => Self::from_kind(value.kind()),
        }
    }

    pub fn from_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Object => Self::NORMAL,
            ValueKind::Start => Self::START,
            ValueKind::End => Self::END,
            ValueKind::Stop => Self::STOP,
            ValueKind::Pause => Self::PAUSE,
            ValueKind::Resume => Self::RESUME,
            ValueKind::Reconfigure => Self::RECONFIGURE,
        }
    }

    #[inline]
    pub fn contains(self, other: TypeMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Exactly one kind of head was seen.
    #[inline]
    pub fn is_uniform(self) -> bool {
        self.0.count_ones() == 1
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for TypeMask {
    type Output = TypeMask;

    fn bitor(self, rhs: TypeMask) -> TypeMask {
        TypeMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for TypeMask {
    fn bitor_assign(&mut self, rhs: TypeMask) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_accumulates() {
        let mut mask = TypeMask::EMPTY;
        mask |= TypeMask::of(Some(&Value::object(1u8)));
        assert!(mask.is_uniform());
        mask |= TypeMask::of(Some(&Value::Pause));
        assert!(!mask.is_uniform());
        assert!(mask.contains(TypeMask::PAUSE));
        assert!(mask.contains(TypeMask::NORMAL));
        assert!(!mask.contains(TypeMask::NO_OBJECT));
        assert!(TypeMask::of(None).contains(TypeMask::NO_OBJECT));
        assert!(!mask.contains(TypeMask::EMPTY));
    }
}
