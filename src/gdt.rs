use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GdtSymbol {
    Straightness,
    Flatness,
    Circularity,
    Cylindricity,
    ProfileOfLine,
    ProfileOfSurface,
    Angularity,
    Perpendicularity,
    Parallelism,
    Position,
    Concentricity,
    Symmetry,
    CircularRunout,
    TotalRunout,
}

// (symbol, glyph, alternative glyphs, human name)
const SYMBOLS: &[(GdtSymbol, char, &[char], &str)] = &[
    (GdtSymbol::Straightness, '⏤', &[], "Straightness"),
    (GdtSymbol::Flatness, '⏥', &['▱'], "Flatness"),
    (GdtSymbol::Circularity, '○', &['◯'], "Circularity"),
    (GdtSymbol::Cylindricity, '⌭', &[], "Cylindricity"),
    (GdtSymbol::ProfileOfLine, '⌒', &[], "Profile of a Line"),
    (GdtSymbol::ProfileOfSurface, '⌓', &[], "Profile of a Surface"),
    (GdtSymbol::Angularity, '∠', &[], "Angularity"),
    (GdtSymbol::Perpendicularity, '⟂', &['⊥'], "Perpendicularity"),
    (GdtSymbol::Parallelism, '∥', &['⫽'], "Parallelism"),
    (GdtSymbol::Position, '⌖', &['⊕'], "Position"),
    (GdtSymbol::Concentricity, '◎', &[], "Concentricity"),
    (GdtSymbol::Symmetry, '⌯', &[], "Symmetry"),
    (GdtSymbol::CircularRunout, '↗', &[], "Circular Runout"),
    (GdtSymbol::TotalRunout, '⌰', &[], "Total Runout"),
];

impl GdtSymbol {
    fn entry(self) -> &'static (GdtSymbol, char, &'static [char], &'static str) {
        SYMBOLS
            .iter()
            .find(|(symbol, ..)| *symbol == self)
            .unwrap_or(&SYMBOLS[0])
    }

    pub fn glyph(self) -> char {
        self.entry().1
    }

    pub fn name(self) -> &'static str {
        self.entry().3
    }

    pub fn from_glyph(glyph: char) -> Option<Self> {
        SYMBOLS
            .iter()
            .find(|(_, primary, alternatives, _)| *primary == glyph || alternatives.contains(&glyph))
            .map(|(symbol, ..)| *symbol)
    }

    pub fn find_in(text: &str) -> Option<Self> {
        if let Some(symbol) = text.chars().find_map(Self::from_glyph) {
            return Some(symbol);
        }
        let wanted = normalize_name(text);
        if wanted.is_empty() {
            return None;
        }
        SYMBOLS
            .iter()
            .find(|(.., name)| normalize_name(name) == wanted)
            .map(|(symbol, ..)| *symbol)
    }

    pub fn describe(self) -> String {
        format!("{} {}", self.glyph(), self.name())
    }
}

fn normalize_name(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .replace("ofa", "of")
}

/// A lone uppercase letter names a datum, never a tolerance.
pub fn is_datum_reference(text: &str) -> bool {
    let mut chars = text.trim().chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_uppercase())
}

pub fn is_modifier_token(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && text.chars().all(|c| matches!(c, 'M' | 'N'))
}

static MODIFIER_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[MN]+\b").expect("Invalid modifier regex"));

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("Invalid number regex")
});

pub fn strip_modifiers(text: &str) -> String {
    MODIFIER_RUN
        .replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_nominal(text: &str) -> Option<f32> {
    LEADING_NUMBER
        .find(text.trim())
        .and_then(|found| found.as_str().parse::<f32>().ok())
        .filter(|value| value.is_finite())
}

/// Drops leading sign glyphs so a synthesised `"+ "`/`"- "` prefix can be added.
pub(crate) fn unsigned(text: &str) -> &str {
    text.trim_start_matches(|c: char| matches!(c, '+' | '-' | '±' | '−') || c.is_whitespace())
        .trim_end()
}

pub(crate) fn is_complete_dimension(text: &str) -> bool {
    text.contains('±') || (text.contains('+') && (text.contains('-') || text.contains('−')))
}
