use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point size the UI scale factor is derived from (`point_size / BASE_POINT_SIZE`).
pub const BASE_POINT_SIZE: f64 = 22.0;

// ── Field text ──────────────────────────────────────────────────────────────

/// Raw text of a numeric field. The text is kept verbatim so half-typed or
/// invalid input survives re-rendering; numeric coercion happens only when a
/// computed value is needed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldText(String);

impl FieldText {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn raw_mut(&mut self) -> &mut String {
        &mut self.0
    }

    /// Flow-measure coercion: anything that does not parse as a finite number
    /// (including empty text) computes as 0.
    pub fn as_flow(&self) -> f64 {
        coerce_flow(&self.0)
    }

    /// Machine-count coercion: non-numeric or ≤0 computes as 1.
    pub fn as_machines(&self) -> f64 {
        coerce_machines(&self.0)
    }
}

impl From<&str> for FieldText {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Serialize for FieldText {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FieldText {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Self(format!("{n}")),
            Raw::Text(t) => Self(t),
        })
    }
}

pub fn coerce_flow(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn coerce_machines(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => v,
        _ => 1.0,
    }
}

/// Clamp a normalized coordinate into [0,1]; non-finite input lands at 0.
pub fn clamp01(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ── Flow measures ───────────────────────────────────────────────────────────

/// The five independent flow quantities tracked per point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Measure {
    Acid,
    Base,
    Voc,
    Heat,
    Dust,
}

impl Measure {
    pub const ALL: [Measure; 5] = [
        Measure::Acid,
        Measure::Base,
        Measure::Voc,
        Measure::Heat,
        Measure::Dust,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Measure::Acid => "酸",
            Measure::Base => "鹼",
            Measure::Voc => "有機",
            Measure::Heat => "熱",
            Measure::Dust => "集塵",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Measure::Acid => "acid",
            Measure::Base => "base",
            Measure::Voc => "voc",
            Measure::Heat => "heat",
            Measure::Dust => "dust",
        }
    }

    /// Chip background color.
    pub fn color(self) -> [u8; 3] {
        match self {
            Measure::Acid => [0x8b, 0xc3, 0x4a],
            Measure::Base => [0x60, 0xa5, 0xfa],
            Measure::Voc => [0xf4, 0xb1, 0x83],
            Measure::Heat => [0xf9, 0xa8, 0xd4],
            Measure::Dust => [0xbf, 0xdb, 0xfe],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    #[default]
    Row,
    Column,
}

// ── Entities ────────────────────────────────────────────────────────────────

/// A labeled location on the image carrying per-unit flow values and a
/// machine multiplier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub uid: String,
    #[serde(rename = "id")]
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub flow_direction: FlowDirection,
    pub acid: FieldText,
    pub base: FieldText,
    pub voc: FieldText,
    pub heat: FieldText,
    pub dust: FieldText,
    pub machines: FieldText,
}

impl Point {
    pub fn new(uid: String) -> Self {
        Self {
            uid,
            label: String::new(),
            x: 0.0,
            y: 0.0,
            flow_direction: FlowDirection::Row,
            acid: FieldText::default(),
            base: FieldText::default(),
            voc: FieldText::default(),
            heat: FieldText::default(),
            dust: FieldText::default(),
            machines: FieldText::new("1"),
        }
    }

    pub fn flow(&self, m: Measure) -> &FieldText {
        match m {
            Measure::Acid => &self.acid,
            Measure::Base => &self.base,
            Measure::Voc => &self.voc,
            Measure::Heat => &self.heat,
            Measure::Dust => &self.dust,
        }
    }

    pub fn flow_mut(&mut self, m: Measure) -> &mut FieldText {
        match m {
            Measure::Acid => &mut self.acid,
            Measure::Base => &mut self.base,
            Measure::Voc => &mut self.voc,
            Measure::Heat => &mut self.heat,
            Measure::Dust => &mut self.dust,
        }
    }

    pub fn set_position(&mut self, x: f64, y: f64) {
        self.x = clamp01(x);
        self.y = clamp01(y);
    }
}

/// Free-floating annotation text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    pub uid: String,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub font_size: f64,
}

impl TextBox {
    pub fn new(uid: String) -> Self {
        Self {
            uid,
            text: "文字".to_owned(),
            x: 0.5,
            y: 0.5,
            color: "#111111".to_owned(),
            font_size: 16.0,
        }
    }

    pub fn set_position(&mut self, x: f64, y: f64) {
        self.x = clamp01(x);
        self.y = clamp01(y);
    }
}

// ── Id generation ───────────────────────────────────────────────────────────

/// Entity id generator: a monotonic counter (unique within the session) plus
/// a random component (unique across sessions and merged documents).
#[derive(Debug, Default)]
pub struct UidGen {
    counter: u64,
}

impl UidGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> String {
        self.counter += 1;
        format!("{:04x}-{}", self.counter, Uuid::new_v4().simple())
    }
}

// ── Document ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormPoint {
    pub x: f64,
    pub y: f64,
}

impl NormPoint {
    pub fn clamped(x: f64, y: f64) -> Self {
        Self {
            x: clamp01(x),
            y: clamp01(y),
        }
    }
}

/// The aggregate root: one editing session's complete state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub background_data_url: Option<String>,
    pub opacity: f64,
    pub point_size: f64,
    pub point_opacity: f64,
    pub totals_position: NormPoint,
    pub decimal_places: u8,
    pub summary_sort_by_id: bool,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub points: Vec<Point>,
    pub text_boxes: Vec<TextBox>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            background_data_url: None,
            opacity: 0.7,
            point_size: BASE_POINT_SIZE,
            point_opacity: 0.9,
            totals_position: NormPoint { x: 0.02, y: 0.7 },
            decimal_places: 1,
            summary_sort_by_id: false,
            image_width: None,
            image_height: None,
            points: Vec::new(),
            text_boxes: Vec::new(),
        }
    }
}

impl Document {
    /// Create a point at a (clamped) normalized position and return its uid.
    pub fn create_point(&mut self, ids: &mut UidGen, x: f64, y: f64) -> String {
        let mut p = Point::new(ids.next());
        p.set_position(x, y);
        let uid = p.uid.clone();
        self.points.push(p);
        uid
    }

    pub fn create_text_box(&mut self, ids: &mut UidGen) -> String {
        let tb = TextBox::new(ids.next());
        let uid = tb.uid.clone();
        self.text_boxes.push(tb);
        uid
    }

    pub fn point(&self, uid: &str) -> Option<&Point> {
        self.points.iter().find(|p| p.uid == uid)
    }

    pub fn point_mut(&mut self, uid: &str) -> Option<&mut Point> {
        self.points.iter_mut().find(|p| p.uid == uid)
    }

    pub fn text_box_mut(&mut self, uid: &str) -> Option<&mut TextBox> {
        self.text_boxes.iter_mut().find(|t| t.uid == uid)
    }

    /// Remove a point; a no-op when the uid is unknown.
    pub fn delete_point(&mut self, uid: &str) -> bool {
        let before = self.points.len();
        self.points.retain(|p| p.uid != uid);
        self.points.len() != before
    }

    pub fn delete_text_box(&mut self, uid: &str) -> bool {
        let before = self.text_boxes.len();
        self.text_boxes.retain(|t| t.uid != uid);
        self.text_boxes.len() != before
    }

    /// UI scale baseline: 1.0 at the default point size.
    pub fn ui_scale(&self) -> f64 {
        self.point_size / BASE_POINT_SIZE
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_never_collide() {
        let mut ids = UidGen::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(ids.next()));
        }
    }

    #[test]
    fn create_point_applies_defaults_and_clamps() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        let uid = doc.create_point(&mut ids, 1.5, -0.3);
        let p = doc.point(&uid).unwrap();
        assert_eq!(p.x, 1.0);
        assert_eq!(p.y, 0.0);
        assert_eq!(p.flow_direction, FlowDirection::Row);
        assert_eq!(p.machines.as_str(), "1");
        assert_eq!(p.acid.as_str(), "");
    }

    #[test]
    fn set_position_clamps_on_every_write() {
        let mut p = Point::new("p1".into());
        p.set_position(0.25, 0.75);
        assert_eq!((p.x, p.y), (0.25, 0.75));
        p.set_position(1.5, 2.0);
        assert_eq!((p.x, p.y), (1.0, 1.0));
        p.set_position(-0.3, f64::NAN);
        assert_eq!((p.x, p.y), (0.0, 0.0));
    }

    #[test]
    fn delete_is_noop_when_absent() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        let uid = doc.create_point(&mut ids, 0.5, 0.5);
        assert!(!doc.delete_point("nope"));
        assert_eq!(doc.points.len(), 1);
        assert!(doc.delete_point(&uid));
        assert!(doc.points.is_empty());
        assert!(!doc.delete_point(&uid));
    }

    #[test]
    fn flow_coercion_defaults_invalid_to_zero() {
        assert_eq!(coerce_flow("2.5"), 2.5);
        assert_eq!(coerce_flow(" 3 "), 3.0);
        assert_eq!(coerce_flow(""), 0.0);
        assert_eq!(coerce_flow("abc"), 0.0);
        assert_eq!(coerce_flow("inf"), 0.0);
    }

    #[test]
    fn machines_coercion_defaults_invalid_to_one() {
        assert_eq!(coerce_machines("3"), 3.0);
        assert_eq!(coerce_machines("0"), 1.0);
        assert_eq!(coerce_machines("-2"), 1.0);
        assert_eq!(coerce_machines(""), 1.0);
        assert_eq!(coerce_machines("x"), 1.0);
    }

    #[test]
    fn coercion_never_mutates_raw_text() {
        let f = FieldText::new("abc");
        assert_eq!(f.as_flow(), 0.0);
        assert_eq!(f.as_str(), "abc");
    }
}
