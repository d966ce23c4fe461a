//! Document persistence: the editable state as a JSON object.
//!
//! Export is a straight serialization of [`Document`]. Import is deliberately
//! tolerant so documents written by older versions (or edited by hand) load:
//! a missing `points` array is the only hard failure, every other missing or
//! wrongly-typed field falls back to its default, and entities without a uid
//! get a fresh one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

use crate::model::{
    Document, FieldText, FlowDirection, Measure, NormPoint, Point, TextBox, UidGen,
};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("document has no points array")]
    MissingPoints,
    #[error("background is not a base64 data URL")]
    NotDataUrl,
    #[error("background data is not decodable: {0}")]
    BadBase64(#[from] base64::DecodeError),
}

pub fn export_json(doc: &Document) -> String {
    // Serialization of the model cannot fail: no maps with non-string keys.
    serde_json::to_string_pretty(doc).unwrap_or_default()
}

pub fn import_json(text: &str, ids: &mut UidGen) -> Result<Document, ImportError> {
    let v: Value = serde_json::from_str(text)?;
    let points = v
        .get("points")
        .and_then(Value::as_array)
        .ok_or(ImportError::MissingPoints)?;

    let defaults = Document::default();
    let totals = v.get("totalsPosition");
    let doc = Document {
        background_data_url: string(&v, "backgroundDataUrl"),
        opacity: num(&v, "opacity").unwrap_or(1.0),
        point_size: num(&v, "pointSize").unwrap_or(22.0),
        point_opacity: num(&v, "pointOpacity").unwrap_or(0.5),
        totals_position: NormPoint::clamped(
            totals
                .and_then(|t| t.get("x"))
                .and_then(Value::as_f64)
                .unwrap_or(defaults.totals_position.x),
            totals
                .and_then(|t| t.get("y"))
                .and_then(Value::as_f64)
                .unwrap_or(defaults.totals_position.y),
        ),
        decimal_places: num(&v, "decimalPlaces")
            .map(|d| d.round().clamp(0.0, 3.0) as u8)
            .unwrap_or(1),
        summary_sort_by_id: v
            .get("summarySortById")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        image_width: dimension(&v, "imageWidth"),
        image_height: dimension(&v, "imageHeight"),
        points: points.iter().map(|p| import_point(p, ids)).collect(),
        text_boxes: v
            .get("textBoxes")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(|t| import_text_box(t, ids)).collect())
            .unwrap_or_default(),
    };
    Ok(doc)
}

fn import_point(v: &Value, ids: &mut UidGen) -> Point {
    let mut p = Point::new(string(v, "uid").unwrap_or_else(|| ids.next()));
    p.label = string(v, "id").unwrap_or_default();
    p.set_position(num(v, "x").unwrap_or(0.0), num(v, "y").unwrap_or(0.0));
    p.flow_direction = match v.get("flowDirection").and_then(Value::as_str) {
        Some("column") => FlowDirection::Column,
        _ => FlowDirection::Row,
    };
    for m in Measure::ALL {
        *p.flow_mut(m) = field_text(v, m.key(), "");
    }
    p.machines = field_text(v, "machines", "1");
    p
}

fn import_text_box(v: &Value, ids: &mut UidGen) -> TextBox {
    let mut tb = TextBox::new(string(v, "uid").unwrap_or_else(|| ids.next()));
    tb.text = string(v, "text").unwrap_or_default();
    tb.set_position(num(v, "x").unwrap_or(0.5), num(v, "y").unwrap_or(0.5));
    tb.color = string(v, "color").unwrap_or_else(|| "#111111".to_owned());
    tb.font_size = match num(v, "fontSize") {
        Some(s) if s > 0.0 => s,
        _ => 16.0,
    };
    tb
}

fn num(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64)
}

/// Stored dimensions must be positive finite numbers; anything else reads as
/// absent, the same as a mistyped field.
fn dimension(v: &Value, key: &str) -> Option<u32> {
    num(v, key)
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d as u32)
}

fn string(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Numeric fields accept both the raw-text form this tool writes and the
/// plain numbers of older exports. A numeric zero reads back as `zero_as`,
/// matching the blank-when-zero editing view.
fn field_text(v: &Value, key: &str, zero_as: &str) -> FieldText {
    match v.get(key) {
        Some(Value::String(s)) => FieldText::new(s.clone()),
        Some(Value::Number(n)) => {
            let f = n.as_f64().unwrap_or(0.0);
            if f == 0.0 {
                FieldText::new(zero_as)
            } else {
                FieldText::new(format!("{f}"))
            }
        }
        _ => FieldText::new(zero_as),
    }
}

// ── Background data URLs ────────────────────────────────────────────────────

pub fn encode_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

pub fn decode_data_url(url: &str) -> Result<Vec<u8>, ImportError> {
    let payload = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, data)| data)
        .ok_or(ImportError::NotDataUrl)?;
    Ok(BASE64.decode(payload.trim())?)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc(ids: &mut UidGen) -> Document {
        let mut doc = Document::default();
        doc.opacity = 0.4;
        doc.point_size = 30.0;
        doc.point_opacity = 0.6;
        doc.decimal_places = 2;
        doc.summary_sort_by_id = true;
        doc.totals_position = NormPoint { x: 0.1, y: 0.2 };
        doc.image_width = Some(640);
        doc.image_height = Some(480);
        let uid = doc.create_point(ids, 0.25, 0.75);
        let p = doc.point_mut(&uid).unwrap();
        p.label = "A1".to_owned();
        p.flow_direction = FlowDirection::Column;
        p.acid = "2.5".into();
        p.machines = "3".into();
        let tb_uid = doc.create_text_box(ids);
        let tb = doc.text_box_mut(&tb_uid).unwrap();
        tb.text = "排氣區".to_owned();
        tb.color = "#ff0000".to_owned();
        tb.font_size = 24.0;
        doc
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let mut ids = UidGen::new();
        let doc = sample_doc(&mut ids);
        let json = export_json(&doc);
        let back = import_json(&json, &mut ids).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn missing_points_array_is_an_error() {
        let mut ids = UidGen::new();
        assert!(matches!(
            import_json(r#"{"textBoxes": []}"#, &mut ids),
            Err(ImportError::MissingPoints)
        ));
        assert!(matches!(
            import_json(r#"{"points": 5}"#, &mut ids),
            Err(ImportError::MissingPoints)
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let mut ids = UidGen::new();
        assert!(matches!(
            import_json("not json", &mut ids),
            Err(ImportError::Parse(_))
        ));
    }

    #[test]
    fn missing_fields_default() {
        let mut ids = UidGen::new();
        let doc = import_json(r#"{"points": []}"#, &mut ids).unwrap();
        assert_eq!(doc.opacity, 1.0);
        assert_eq!(doc.point_size, 22.0);
        assert_eq!(doc.point_opacity, 0.5);
        assert_eq!(doc.decimal_places, 1);
        assert!(!doc.summary_sort_by_id);
        assert_eq!(doc.totals_position, NormPoint { x: 0.02, y: 0.7 });
        assert!(doc.text_boxes.is_empty());
        assert_eq!(doc.image_width, None);
    }

    #[test]
    fn mismatched_types_default() {
        let mut ids = UidGen::new();
        let doc = import_json(
            r#"{"points": [], "opacity": "dark", "decimalPlaces": "two", "summarySortById": 1, "textBoxes": "nope"}"#,
            &mut ids,
        )
        .unwrap();
        assert_eq!(doc.opacity, 1.0);
        assert_eq!(doc.decimal_places, 1);
        assert!(!doc.summary_sort_by_id);
        assert!(doc.text_boxes.is_empty());
    }

    #[test]
    fn nonpositive_dimensions_read_as_absent() {
        let mut ids = UidGen::new();
        let doc = import_json(
            r#"{"points": [], "imageWidth": -4, "imageHeight": 0}"#,
            &mut ids,
        )
        .unwrap();
        assert_eq!(doc.image_width, None);
        assert_eq!(doc.image_height, None);
    }

    #[test]
    fn points_accept_numeric_fields_from_older_exports() {
        let mut ids = UidGen::new();
        let doc = import_json(
            r#"{"points": [{"id": "3", "x": 0.1, "y": 0.2, "acid": 2, "base": 0, "machines": 4}]}"#,
            &mut ids,
        )
        .unwrap();
        let p = &doc.points[0];
        assert_eq!(p.acid.as_str(), "2");
        assert_eq!(p.base.as_str(), "");
        assert_eq!(p.machines.as_str(), "4");
        assert_eq!(p.acid.as_flow(), 2.0);
    }

    #[test]
    fn missing_uid_is_regenerated_and_present_uid_kept() {
        let mut ids = UidGen::new();
        let doc = import_json(
            r#"{"points": [{"uid": "keep-me", "x": 0, "y": 0}, {"x": 0, "y": 0}]}"#,
            &mut ids,
        )
        .unwrap();
        assert_eq!(doc.points[0].uid, "keep-me");
        assert!(!doc.points[1].uid.is_empty());
        assert_ne!(doc.points[1].uid, doc.points[0].uid);
    }

    #[test]
    fn imported_positions_are_clamped() {
        let mut ids = UidGen::new();
        let doc = import_json(r#"{"points": [{"x": 1.5, "y": -0.3}]}"#, &mut ids).unwrap();
        assert_eq!((doc.points[0].x, doc.points[0].y), (1.0, 0.0));
    }

    #[test]
    fn data_url_round_trip() {
        let bytes = b"\x89PNG\r\n\x1a\n";
        let url = encode_data_url(bytes, "image/png");
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), bytes);
        assert!(matches!(
            decode_data_url("http://example.com/x.png"),
            Err(ImportError::NotDataUrl)
        ));
    }
}
