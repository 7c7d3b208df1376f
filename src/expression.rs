// Expression labels, translations and mood colours

use std::collections::HashMap;

use crate::config::PresentationConfig;
use crate::models::{Color, Detection, UiState};

/// Translations shipped with the application, keyed by classifier label
const DEFAULT_LABELS: &[(&str, &str)] = &[
    ("happy", "Feliz 😊"),
    ("sad", "Triste 😢"),
    ("angry", "Bravo 😠"),
    ("fearful", "Com medo 😨"),
    ("disgusted", "Enojado 🤢"),
    ("surprised", "Surpreso 😲"),
    ("neutral", "Neutro 😐"),
];

const DEFAULT_COLORS: &[(&str, Color)] = &[
    ("happy", Color::rgb(0xff, 0xd7, 0x00)),
    ("sad", Color::rgb(0x46, 0x82, 0xb4)),
    ("angry", Color::rgb(0xdc, 0x14, 0x3c)),
    ("fearful", Color::rgb(0x80, 0x00, 0x80)),
    ("disgusted", Color::rgb(0x22, 0x8b, 0x22)),
    ("surprised", Color::rgb(0xff, 0x8c, 0x00)),
    ("neutral", Color::rgb(0x80, 0x80, 0x80)),
];

pub const DEFAULT_NEUTRAL: Color = Color::rgb(0x80, 0x80, 0x80);
pub const DEFAULT_NO_FACE_LABEL: &str = "no face detected";

/// Maps classifier labels to display text and background colours.
///
/// Missing entries are not errors: the raw label and the neutral colour
/// are used instead.
#[derive(Clone, Debug)]
pub struct ExpressionTable {
    labels: HashMap<String, String>,
    colors: HashMap<String, Color>,
    neutral: Color,
    no_face_label: String,
}

impl Default for ExpressionTable {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            colors: DEFAULT_COLORS
                .iter()
                .map(|(k, c)| (k.to_string(), *c))
                .collect(),
            neutral: DEFAULT_NEUTRAL,
            no_face_label: DEFAULT_NO_FACE_LABEL.to_string(),
        }
    }
}

impl ExpressionTable {
    /// Built-in tables with the configured overrides applied on top.
    ///
    /// Colours that do not parse are skipped; `AppConfig::validate` rejects
    /// them before this point.
    pub fn from_config(config: &PresentationConfig) -> Self {
        let mut table = Self::default();
        table.no_face_label = config.no_face_label.clone();
        if let Some(neutral) = Color::from_hex(&config.neutral_color) {
            table.neutral = neutral;
        }
        for (label, text) in &config.labels {
            table.labels.insert(label.clone(), text.clone());
        }
        for (label, hex) in &config.colors {
            if let Some(color) = Color::from_hex(hex) {
                table.colors.insert(label.clone(), color);
            }
        }
        table
    }

    /// Display text for a label, the label itself when untranslated
    pub fn translate<'a>(&'a self, label: &'a str) -> &'a str {
        self.labels.get(label).map(String::as_str).unwrap_or(label)
    }

    /// Background colour for a label, the neutral colour when unmapped
    pub fn color_for(&self, label: &str) -> Color {
        self.colors.get(label).copied().unwrap_or(self.neutral)
    }

    pub fn neutral(&self) -> Color {
        self.neutral
    }

    /// State shown while no face is visible
    pub fn no_face(&self) -> UiState {
        UiState {
            displayed_label: self.no_face_label.clone(),
            background_color: self.neutral,
            has_face: false,
        }
    }

    /// Derives the UI state from one tick's detections.
    ///
    /// Only the first detection counts. A first detection without any
    /// comparable probability is treated as no face.
    pub fn ui_state(&self, detections: &[Detection]) -> UiState {
        let dominant = detections
            .first()
            .and_then(|detection| detection.expressions.dominant());

        match dominant {
            Some((label, _)) => UiState {
                displayed_label: self.translate(label).to_string(),
                background_color: self.color_for(label),
                has_face: true,
            },
            None => self.no_face(),
        }
    }
}
