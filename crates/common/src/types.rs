//! Geometry newtypes shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Pixel dimensions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self::new(1280, 720);
    pub const FHD: Self = Self::new(1920, 1080);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are non-zero.
    pub fn is_set(self) -> bool {
        self.width != 0 && self.height != 0
    }

    /// Count of 16x16 macroblocks, truncating partial blocks.
    pub fn macroblocks(self) -> u64 {
        u64::from(self.width >> 4) * u64::from(self.height >> 4)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel rectangle, right/bottom exclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// A crop is only in effect when both far edges are non-zero.
    pub fn is_set(self) -> bool {
        self.right != 0 && self.bottom != 0
    }

    pub fn width(self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn size(self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macroblock_count_truncates() {
        assert_eq!(Resolution::FHD.macroblocks(), 120 * 67);
        assert_eq!(Resolution::new(15, 15).macroblocks(), 0);
    }

    #[test]
    fn rect_requires_far_edges() {
        assert!(!Rect::default().is_set());
        assert!(!Rect::new(0, 0, 640, 0).is_set());
        assert!(Rect::new(10, 20, 650, 500).is_set());
    }

    #[test]
    fn rect_size_clamps_inverted_edges() {
        let r = Rect::new(10, 20, 650, 500);
        assert_eq!(r.size(), Resolution::new(640, 480));
        assert_eq!(Rect::new(100, 100, 50, 50).size(), Resolution::new(0, 0));
    }
}
