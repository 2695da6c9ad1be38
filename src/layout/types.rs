use crate::ir::{NodeId, PinId};

/// Axis-aligned rectangle in graph space, y growing downward.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Per-side padding used to grow or shrink a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Margin {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Margin {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Same amount on the left/right sides and on the top/bottom sides.
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        Self::new(horizontal, vertical, horizontal, vertical)
    }

    pub fn bottom(amount: f32) -> Self {
        Self::new(0.0, 0.0, 0.0, amount)
    }
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_point_size(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) * 0.5,
            (self.top + self.bottom) * 0.5,
        )
    }

    /// Smallest rectangle covering both.
    pub fn expand(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn extend_by(&self, margin: Margin) -> Rect {
        Rect::new(
            self.left - margin.left,
            self.top - margin.top,
            self.right + margin.right,
            self.bottom + margin.bottom,
        )
    }

    pub fn offset_by(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Touching edges count as intersecting.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.right < other.left
            || self.left > other.right
            || self.bottom < other.top
            || self.top > other.bottom)
    }

    /// Intersection with positive area, used where touching is allowed.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    pub fn contains_point(&self, point: (f32, f32)) -> bool {
        point.0 >= self.left && point.0 <= self.right && point.1 >= self.top && point.1 <= self.bottom
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.top.is_finite() && self.right.is_finite() && self.bottom.is_finite()
    }

    /// Union of every rectangle, `None` when there are none.
    pub fn union_all<I: IntoIterator<Item = Rect>>(rects: I) -> Option<Rect> {
        rects.into_iter().reduce(|acc, rect| acc.expand(&rect))
    }
}

/// Outcome of a fan-out during vertical placement: the child reached through
/// `pin` from `parent_pin`, together with every node placed under it.
#[derive(Debug, Clone)]
pub struct ChildBranch {
    pub pin: PinId,
    pub parent_pin: PinId,
    pub nodes: Vec<NodeId>,
}

// ── Segment tests ────────────────────────────────────────────────────────

fn orient(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn on_segment(point: (f32, f32), a: (f32, f32), b: (f32, f32), eps: f32) -> bool {
    point.0 >= a.0.min(b.0) - eps
        && point.0 <= a.0.max(b.0) + eps
        && point.1 >= a.1.min(b.1) - eps
        && point.1 <= a.1.max(b.1) + eps
}

pub(super) fn segments_intersect(a: (f32, f32), b: (f32, f32), c: (f32, f32), d: (f32, f32)) -> bool {
    let eps = 1e-4;
    let o1 = orient(a, b, c);
    let o2 = orient(a, b, d);
    let o3 = orient(c, d, a);
    let o4 = orient(c, d, b);
    if ((o1 > eps && o2 < -eps) || (o1 < -eps && o2 > eps))
        && ((o3 > eps && o4 < -eps) || (o3 < -eps && o4 > eps))
    {
        return true;
    }
    (o1.abs() <= eps && on_segment(c, a, b, eps))
        || (o2.abs() <= eps && on_segment(d, a, b, eps))
        || (o3.abs() <= eps && on_segment(a, c, d, eps))
        || (o4.abs() <= eps && on_segment(b, c, d, eps))
}

/// Whether the segment `a`-`b` touches `rect` anywhere, endpoints included.
pub fn line_rect_intersection(rect: &Rect, a: (f32, f32), b: (f32, f32)) -> bool {
    if a.0.max(b.0) < rect.left
        || a.0.min(b.0) > rect.right
        || a.1.max(b.1) < rect.top
        || a.1.min(b.1) > rect.bottom
    {
        return false;
    }
    if rect.contains_point(a) || rect.contains_point(b) {
        return true;
    }
    let corners = [
        (rect.left, rect.top),
        (rect.right, rect.top),
        (rect.right, rect.bottom),
        (rect.left, rect.bottom),
    ];
    (0..4).any(|i| segments_intersect(a, b, corners[i], corners[(i + 1) % 4]))
}
