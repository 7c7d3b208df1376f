// Core data models for the Mood Mirror application

use std::fmt;

/// Represents a single video frame with RGB data
#[derive(Clone, Debug)]
pub struct Frame {
    /// Raw RGB pixel data (width * height * 3 bytes)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl Frame {
    /// Creates a new Frame with the given parameters
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Frame dimensions as `(width, height)`
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// A 2D point in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned face region in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Expression probabilities in the order the classifier reported them.
///
/// Order matters: when two labels share the maximum probability the one
/// inserted first is the dominant expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpressionScores {
    entries: Vec<(String, f32)>,
}

impl ExpressionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label. A label that is already present keeps its original
    /// position and takes the new probability.
    pub fn insert(&mut self, label: impl Into<String>, probability: f32) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = probability,
            None => self.entries.push((label, probability)),
        }
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(l, p)| (l.as_str(), *p))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label with the highest probability, first-seen on ties.
    ///
    /// NaN probabilities never win; `None` if nothing comparable is left.
    pub fn dominant(&self) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (label, probability) in self.iter() {
            if probability.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, current)| probability > current) {
                best = Some((label, probability));
            }
        }
        best
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for ExpressionScores {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut scores = Self::new();
        for (label, probability) in iter {
            scores.insert(label, probability);
        }
        scores
    }
}

/// One located face with its landmarks and expression probabilities.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bounds: BoundingBox,
    pub landmarks: Vec<Point>,
    pub expressions: ExpressionScores,
}

impl Detection {
    pub fn new(bounds: BoundingBox, landmarks: Vec<Point>, expressions: ExpressionScores) -> Self {
        Self {
            bounds,
            landmarks,
            expressions,
        }
    }

    /// Rescales all geometry by independent horizontal and vertical factors
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            bounds: BoundingBox::new(
                self.bounds.x * sx,
                self.bounds.y * sy,
                self.bounds.width * sx,
                self.bounds.height * sy,
            ),
            landmarks: self
                .landmarks
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
            expressions: self.expressions.clone(),
        }
    }
}

/// Opaque RGB colour used for the mood background.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    /// Linear interpolation, `t` clamped to `0.0..=1.0`
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Self::rgb(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// What the label and background show after a tick
#[derive(Clone, Debug, PartialEq)]
pub struct UiState {
    pub displayed_label: String,
    pub background_color: Color,
    pub has_face: bool,
}

/// Size of the on-screen video image the overlay is aligned with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Everything the presentation layer needs for one redraw
#[derive(Clone, Debug)]
pub struct TickOutput {
    /// Sequence number the inference was issued with
    pub seq: u64,
    pub ui_state: UiState,
    /// Detections already scaled to `display_size`; empty means "clear"
    pub detections: Vec<Detection>,
    pub display_size: DisplaySize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(&str, f32)]) -> ExpressionScores {
        entries.iter().map(|(l, p)| (*l, *p)).collect()
    }

    #[test]
    fn dominant_picks_maximum() {
        let s = scores(&[("happy", 0.9), ("sad", 0.05), ("neutral", 0.05)]);
        assert_eq!(s.dominant(), Some(("happy", 0.9)));
    }

    #[test]
    fn dominant_ties_keep_first_seen() {
        let s = scores(&[("sad", 0.4), ("angry", 0.4), ("happy", 0.2)]);
        assert_eq!(s.dominant().map(|(l, _)| l), Some("sad"));

        let s = scores(&[("angry", 0.4), ("sad", 0.4), ("happy", 0.2)]);
        assert_eq!(s.dominant().map(|(l, _)| l), Some("angry"));
    }

    #[test]
    fn dominant_is_always_a_key() {
        let cases = [
            scores(&[("a", 0.1)]),
            scores(&[("a", 0.0), ("b", 0.0)]),
            scores(&[("a", -1.0), ("b", -2.0), ("c", 3.0)]),
            scores(&[("a", f32::NAN), ("b", 0.2)]),
        ];
        for s in &cases {
            let (label, _) = s.dominant().unwrap();
            assert!(s.get(label).is_some(), "{label} not in {s:?}");
        }
    }

    #[test]
    fn dominant_of_empty_or_nan_is_none() {
        assert_eq!(ExpressionScores::new().dominant(), None);
        assert_eq!(scores(&[("a", f32::NAN)]).dominant(), None);
    }

    #[test]
    fn insert_keeps_original_position() {
        let mut s = scores(&[("happy", 0.5), ("sad", 0.5)]);
        s.insert("happy", 0.1);
        let labels: Vec<_> = s.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ["happy", "sad"]);
        assert_eq!(s.get("happy"), Some(0.1));
    }

    #[test]
    fn detection_scaling() {
        let d = Detection::new(
            BoundingBox::new(10.0, 20.0, 30.0, 40.0),
            vec![Point::new(1.0, 2.0)],
            ExpressionScores::new(),
        );
        let scaled = d.scaled(2.0, 0.5);
        assert_eq!(scaled.bounds, BoundingBox::new(20.0, 10.0, 60.0, 20.0));
        assert_eq!(scaled.landmarks, vec![Point::new(2.0, 1.0)]);
    }

    #[test]
    fn color_hex_and_lerp() {
        assert_eq!(Color::from_hex("#ff8000"), Some(Color::rgb(255, 128, 0)));
        assert_eq!(Color::from_hex("00ff00"), Some(Color::rgb(0, 255, 0)));
        assert_eq!(Color::from_hex("#fff"), None);
        assert_eq!(Color::from_hex("#gg0000"), None);

        let black = Color::rgb(0, 0, 0);
        let white = Color::rgb(255, 255, 255);
        assert_eq!(black.lerp(white, 0.0), black);
        assert_eq!(black.lerp(white, 1.0), white);
        assert_eq!(black.lerp(white, 7.0), white);
        assert_eq!(white.to_string(), "#ffffff");
    }
}
