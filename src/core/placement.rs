//! Position resolver
//!
//! Pure geometry: given the pointer, the panel size and the attached displays,
//! pick an origin that keeps the panel on one display and off the pointer.

use crate::shared::settings::PlacementSettings;
use crate::shared::types::{Display, Point, Rect, Size};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementConfig {
    /// Gap between the pointer and the nearest panel corner
    pub offset: f64,
    /// Minimum distance from the visible frame edges
    pub padding: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self { offset: 12.0, padding: 10.0 }
    }
}

impl From<&PlacementSettings> for PlacementConfig {
    fn from(settings: &PlacementSettings) -> Self {
        Self {
            offset: settings.offset,
            padding: settings.padding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub origin: Point,
    pub flipped_horizontally: bool,
    pub flipped_vertically: bool,
    /// The origin had to be pulled in after flipping (oversized or cornered panel)
    pub clamped: bool,
}

impl Placement {
    pub fn frame(&self, size: Size) -> Rect {
        Rect::new(self.origin.x, self.origin.y, size.width, size.height)
    }
}

/// Display whose full frame holds the pointer, else the primary, else the first.
pub fn display_for_point(point: Point, displays: &[Display]) -> Option<&Display> {
    displays
        .iter()
        .find(|d| d.frame.contains(point))
        .or_else(|| displays.iter().find(|d| d.is_primary))
        .or_else(|| displays.first())
}

/// Clamp into `[lo, hi]`, pinning to `lo` when the span is too small.
fn clamp_axis(value: f64, lo: f64, hi: f64) -> f64 {
    if hi < lo {
        lo
    } else {
        value.max(lo).min(hi)
    }
}

pub fn resolve(pointer: Point, size: Size, displays: &[Display], config: &PlacementConfig) -> Placement {
    let default_origin = Point::new(pointer.x + config.offset, pointer.y - config.offset - size.height);

    let display = match display_for_point(pointer, displays) {
        Some(display) => display,
        None => {
            return Placement {
                origin: default_origin,
                flipped_horizontally: false,
                flipped_vertically: false,
                clamped: false,
            }
        }
    };
    let visible = display.visible_frame;

    // Flip against the same padded frame the clamp enforces
    let (min_x, max_x) = (visible.left() + config.padding, visible.right() - config.padding);
    let (min_y, max_y) = (visible.top() + config.padding, visible.bottom() - config.padding);

    // Horizontal: right of the pointer, unless that crosses the right edge
    let mut x = default_origin.x;
    let mut flipped_horizontally = false;
    if x + size.width > max_x {
        let left = pointer.x - config.offset - size.width;
        if left >= min_x {
            x = left;
            flipped_horizontally = true;
        }
    }

    // Vertical: above the pointer, unless that crosses the top edge
    let mut y = default_origin.y;
    let mut flipped_vertically = false;
    if y < min_y {
        let below = pointer.y + config.offset;
        if below + size.height <= max_y {
            y = below;
            flipped_vertically = true;
        }
    }

    let clamped_x = clamp_axis(x, min_x, max_x - size.width);
    let clamped_y = clamp_axis(y, min_y, max_y - size.height);
    let clamped = clamped_x != x || clamped_y != y;

    if clamped {
        let display_id = display.id;
        tracing::debug!(
            "Placement clamped from ({:.0}, {:.0}) to ({:.0}, {:.0}) on display {}",
            x, y, clamped_x, clamped_y, display_id
        );
    }

    Placement {
        origin: Point::new(clamped_x, clamped_y),
        flipped_horizontally,
        flipped_vertically,
        clamped,
    }
}
