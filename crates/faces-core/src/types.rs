use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in a complete landmark set (iBUG 300-W convention).
pub const LANDMARK_COUNT: usize = 68;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("landmark range {start}..={end} is reversed")]
    Reversed { start: usize, end: usize },
    #[error("landmark range {start}..={end} exceeds the last landmark index {}", LANDMARK_COUNT - 1)]
    OutOfBounds { start: usize, end: usize },
}

/// A single landmark coordinate in image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Landmarks fitted to one face.
///
/// A complete set holds exactly [`LANDMARK_COUNT`] points. Any other length
/// means landmarking failed for that face; it is carried through rather than
/// treated as an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Point2D>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point2D>) -> Self {
        Self { points }
    }

    pub fn empty() -> Self {
        Self { points: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() == LANDMARK_COUNT
    }
}

/// Integer axis-aligned rectangle: top-left corner plus size.
///
/// `x`/`y` may be negative when a padded feature box extends past the
/// image origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: isize,
    pub y: isize,
    pub width: isize,
    pub height: isize,
}

impl Rectangle {
    pub const fn new(x: isize, y: isize, width: isize, height: isize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Round a floating-point box to integers, each scalar independently.
    pub fn from_f32(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x: x.round() as isize,
            y: y.round() as isize,
            width: width.round() as isize,
            height: height.round() as isize,
        }
    }
}

/// Inclusive, 0-based range of landmark indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(usize, usize)", into = "(usize, usize)")]
pub struct LandmarkRange {
    start: usize,
    end: usize,
}

impl LandmarkRange {
    pub const JAW: Self = Self::fixed(0, 16);
    pub const LEFT_EYEBROW: Self = Self::fixed(17, 21);
    pub const RIGHT_EYEBROW: Self = Self::fixed(22, 26);
    pub const NOSE_BRIDGE: Self = Self::fixed(27, 30);
    pub const LOWER_NOSE: Self = Self::fixed(30, 35);
    pub const LEFT_EYE: Self = Self::fixed(36, 41);
    pub const RIGHT_EYE: Self = Self::fixed(42, 47);
    pub const OUTER_LIP: Self = Self::fixed(48, 59);
    pub const INNER_LIP: Self = Self::fixed(60, 67);

    const fn fixed(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn new(start: usize, end: usize) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Reversed { start, end });
        }
        if end >= LANDMARK_COUNT {
            return Err(RangeError::OutOfBounds { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }
}

impl TryFrom<(usize, usize)> for LandmarkRange {
    type Error = RangeError;

    fn try_from((start, end): (usize, usize)) -> Result<Self, Self::Error> {
        Self::new(start, end)
    }
}

impl From<LandmarkRange> for (usize, usize) {
    fn from(range: LandmarkRange) -> Self {
        (range.start, range.end)
    }
}

/// Unrounded min/max bounds of a landmark subset.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Extent {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

impl Extent {
    fn of(points: &[Point2D]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut extent = Extent {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in rest {
            extent.min_x = extent.min_x.min(p.x);
            extent.max_x = extent.max_x.max(p.x);
            extent.min_y = extent.min_y.min(p.y);
            extent.max_y = extent.max_y.max(p.y);
        }
        Some(extent)
    }

    /// Grow by one raw width on the left and right, one raw height on top and bottom.
    fn pad_symmetric(self) -> Self {
        let x_padding = self.max_x - self.min_x;
        let y_padding = self.max_y - self.min_y;
        Extent {
            min_x: self.min_x - x_padding,
            max_x: self.max_x + x_padding,
            min_y: self.min_y - y_padding,
            max_y: self.max_y + y_padding,
        }
    }

    fn to_rect(self) -> Rectangle {
        Rectangle::from_f32(
            self.min_x,
            self.min_y,
            self.max_x - self.min_x,
            self.max_y - self.min_y,
        )
    }
}

fn range_extent(landmarks: &LandmarkSet, range: LandmarkRange) -> Option<Extent> {
    if !landmarks.is_complete() {
        return None;
    }
    Extent::of(&landmarks.points[range.start..=range.end])
}

/// Smallest rectangle enclosing the landmarks in `range`.
///
/// Returns `None` unless `landmarks` is complete.
pub fn plain_extent(landmarks: &LandmarkSet, range: LandmarkRange) -> Option<Rectangle> {
    range_extent(landmarks, range).map(Extent::to_rect)
}

/// Bounding rectangle of `range` expanded by its own width and height on
/// every side, centered on the raw box. The result is not clamped.
///
/// Returns `None` unless `landmarks` is complete.
pub fn padded_extent(landmarks: &LandmarkSet, range: LandmarkRange) -> Option<Rectangle> {
    range_extent(landmarks, range).map(|e| e.pad_symmetric().to_rect())
}

/// One detected face with its derived feature rectangles, in policy order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceResult {
    pub face: Rectangle,
    pub features: Vec<Rectangle>,
}

/// All faces found in one image, in detector order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub faces: Vec<FaceResult>,
}

impl DetectionResult {
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}
