//! Layer-stack to visible-rectangle projection

use shared_protocol::Orientation;

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Rectangle anchored at the origin
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }
}

/// How a display's layer stack is placed on an output: the layer stack is
/// rotated clockwise by `orientation`, then scaled into `visible`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub orientation: Orientation,
    pub layer_stack: Rect,
    pub visible: Rect,
}

impl Projection {
    pub fn new(orientation: Orientation, layer_stack: Rect, visible: Rect) -> Self {
        Self {
            orientation,
            layer_stack,
            visible,
        }
    }

    /// Layer-stack pixel shown at output pixel `(x, y)`, or `None` outside the
    /// visible rectangle.
    pub fn map_to_layer_stack(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        if self.layer_stack.is_empty() || !self.visible.contains(x, y) {
            return None;
        }

        // Normalized position of the pixel centre inside the visible rect
        let u = ((x - self.visible.x) as f32 + 0.5) / self.visible.width as f32;
        let v = ((y - self.visible.y) as f32 + 0.5) / self.visible.height as f32;

        let (nx, ny) = match self.orientation {
            Orientation::Rotation0 => (u, v),
            Orientation::Rotation90 => (v, 1.0 - u),
            Orientation::Rotation180 => (1.0 - u, 1.0 - v),
            Orientation::Rotation270 => (1.0 - v, u),
        };

        let lx = scale(nx, self.layer_stack.width);
        let ly = scale(ny, self.layer_stack.height);
        Some((self.layer_stack.x + lx, self.layer_stack.y + ly))
    }
}

fn scale(normalized: f32, extent: u32) -> u32 {
    ((normalized * extent as f32) as u32).min(extent - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_scaling() {
        let projection = Projection::new(
            Orientation::Rotation0,
            Rect::from_size(100, 200),
            Rect::from_size(300, 600),
        );

        assert_eq!(projection.map_to_layer_stack(0, 0), Some((0, 0)));
        assert_eq!(projection.map_to_layer_stack(150, 300), Some((50, 100)));
        assert_eq!(projection.map_to_layer_stack(299, 599), Some((99, 199)));
        assert_eq!(projection.map_to_layer_stack(300, 0), None);
    }

    #[test]
    fn test_rotations_map_corners() {
        let layer = Rect::from_size(4, 2);

        let rot180 = Projection::new(Orientation::Rotation180, layer, Rect::from_size(4, 2));
        assert_eq!(rot180.map_to_layer_stack(0, 0), Some((3, 1)));

        // Clockwise quarter turn: the bottom-left layer pixel lands top-left
        let rot90 = Projection::new(Orientation::Rotation90, layer, Rect::from_size(2, 4));
        assert_eq!(rot90.map_to_layer_stack(0, 0), Some((0, 1)));
        assert_eq!(rot90.map_to_layer_stack(1, 0), Some((0, 0)));

        let rot270 = Projection::new(Orientation::Rotation270, layer, Rect::from_size(2, 4));
        assert_eq!(rot270.map_to_layer_stack(0, 0), Some((3, 0)));
    }

    #[test]
    fn test_offset_visible_rect() {
        let visible = Rect {
            x: 10,
            y: 20,
            width: 100,
            height: 100,
        };
        let projection =
            Projection::new(Orientation::Rotation0, Rect::from_size(100, 100), visible);

        assert_eq!(projection.map_to_layer_stack(5, 25), None);
        assert_eq!(projection.map_to_layer_stack(10, 20), Some((0, 0)));
    }
}
