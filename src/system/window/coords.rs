#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

use crate::shared::types::{Point, Rect};

/// Convert between Cocoa screen coordinates (origin at the bottom-left of the
/// primary display, y up) and global top-left coordinates (y down).
///
/// The mapping is its own inverse, so the same call goes both ways.
pub fn flip_rect(rect: Rect, primary_height: f64) -> Rect {
    Rect::new(
        rect.origin.x,
        primary_height - rect.origin.y - rect.size.height,
        rect.size.width,
        rect.size.height,
    )
}

pub fn flip_point(point: Point, primary_height: f64) -> Point {
    Point::new(point.x, primary_height - point.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_display_maps_onto_itself() {
        let primary = Rect::new(0.0, 0.0, 1440.0, 900.0);
        assert_eq!(flip_rect(primary, 900.0), primary);
    }

    #[test]
    fn test_panel_near_top_of_primary() {
        // A 320x180 panel 22pt below the top edge
        let top_left = Rect::new(100.0, 22.0, 320.0, 180.0);
        let cocoa = flip_rect(top_left, 900.0);
        assert_eq!(cocoa, Rect::new(100.0, 698.0, 320.0, 180.0));
        assert_eq!(flip_rect(cocoa, 900.0), top_left);
    }

    #[test]
    fn test_display_above_primary_has_negative_top() {
        // Secondary display stacked above a 900pt primary, in Cocoa terms
        let secondary = Rect::new(0.0, 900.0, 1920.0, 1080.0);
        assert_eq!(flip_rect(secondary, 900.0), Rect::new(0.0, -1080.0, 1920.0, 1080.0));
    }

    #[test]
    fn test_point_flip() {
        assert_eq!(flip_point(Point::new(40.0, 850.0), 900.0), Point::new(40.0, 50.0));
        assert_eq!(flip_point(Point::new(40.0, 50.0), 900.0), Point::new(40.0, 850.0));
    }
}
