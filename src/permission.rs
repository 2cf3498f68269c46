//! Well-known permission masks and a builder for combining them.

/// Standard permission bit ladder. Higher permissions do not imply lower
/// ones at the bit level; combine them with [`MaskBuilder`] as needed.
pub mod masks {
    pub const VIEW: u32 = 1;
    pub const CREATE: u32 = 1 << 1;
    pub const EDIT: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const UNDELETE: u32 = 1 << 4;
    pub const OPERATOR: u32 = 1 << 5;
    pub const MASTER: u32 = 1 << 6;
    pub const OWNER: u32 = 1 << 7;
}

/// Accumulates permission bits into one mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskBuilder {
    mask: u32,
}

impl MaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, mask: u32) -> Self {
        self.mask |= mask;
        self
    }

    pub fn remove(mut self, mask: u32) -> Self {
        self.mask &= !mask;
        self
    }

    pub fn get(self) -> u32 {
        self.mask
    }

    pub fn reset(mut self) -> Self {
        self.mask = 0;
        self
    }
}
