//! Integer device-pixel geometry shared by every compositing crate.

use serde::{Deserialize, Serialize};

/// Unit tag for physical (device) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevicePixel {}

pub type Rect = euclid::Rect<i32, DevicePixel>;
pub type Size = euclid::Size2D<i32, DevicePixel>;
pub type Point = euclid::Point2D<i32, DevicePixel>;
pub type Vector = euclid::Vector2D<i32, DevicePixel>;

pub fn rect(x: i32, y: i32, width: i32, height: i32) -> Rect {
    Rect::new(Point::new(x, y), Size::new(width, height))
}

pub fn size(width: i32, height: i32) -> Size {
    Size::new(width, height)
}

pub fn size_is_empty(size: Size) -> bool {
    size.width <= 0 || size.height <= 0
}

/// Scales a physical-pixel size into DIPs, flooring each axis.
pub fn scale_to_floored_size(buffer_size: Size, device_scale_factor: f32) -> Size {
    assert!(
        device_scale_factor.is_finite() && device_scale_factor > 0.0,
        "device scale factor must be positive and finite, got {device_scale_factor}"
    );
    let inverse = 1.0 / device_scale_factor;
    Size::new(
        (buffer_size.width as f32 * inverse).floor() as i32,
        (buffer_size.height as f32 * inverse).floor() as i32,
    )
}

/// Bounding box of two optional rects.
pub fn union_rect(current: Option<Rect>, incoming: Rect) -> Rect {
    match current {
        Some(existing) if !size_is_empty(existing.size) => {
            if size_is_empty(incoming.size) {
                existing
            } else {
                existing.union(&incoming)
            }
        }
        _ => incoming,
    }
}

/// ARGB color packed like Skia's `SkColor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Self = Self::argb(255, 255, 255, 255);
    pub const TRANSPARENT: Self = Self::argb(0, 0, 0, 0);
    /// Placeholder painted over a crashed or gone child frame.
    pub const GONE_GREEN: Self = Self::argb(255, 0, 128, 0);

    pub const fn argb(alpha: u8, red: u8, green: u8, blue: u8) -> Self {
        Self(((alpha as u32) << 24) | ((red as u32) << 16) | ((green as u32) << 8) | blue as u32)
    }

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn is_opaque(self) -> bool {
        self.alpha() == 255
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floored_size_divides_by_scale_factor() {
        assert_eq!(scale_to_floored_size(size(100, 100), 1.0), size(100, 100));
        assert_eq!(scale_to_floored_size(size(101, 75), 2.0), size(50, 37));
    }

    #[test]
    #[should_panic(expected = "device scale factor must be positive")]
    fn floored_size_rejects_zero_scale() {
        let _ = scale_to_floored_size(size(10, 10), 0.0);
    }

    #[test]
    fn union_ignores_empty_rects() {
        let first = rect(0, 0, 10, 10);
        assert_eq!(union_rect(None, first), first);
        assert_eq!(union_rect(Some(first), rect(5, 5, 0, 0)), first);
        assert_eq!(
            union_rect(Some(first), rect(20, 0, 10, 10)),
            rect(0, 0, 30, 10)
        );
    }

    #[test]
    fn gone_green_is_opaque() {
        assert!(Color::GONE_GREEN.is_opaque());
        assert_eq!(Color::GONE_GREEN.0, 0xFF00_8000);
        assert!(!Color::TRANSPARENT.is_opaque());
    }
}
