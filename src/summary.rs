//! Summary aggregation: per-point totals (per-unit × machines) and grand
//! totals across the five flow measures, plus the formatting rules shared by
//! the table, the canvas overlay and the raster export.

use std::cmp::Ordering;

use crate::model::{Document, Measure};

// ── Flow vectors ────────────────────────────────────────────────────────────

/// One value per flow measure.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlowVector {
    pub acid: f64,
    pub base: f64,
    pub voc: f64,
    pub heat: f64,
    pub dust: f64,
}

impl FlowVector {
    pub fn get(&self, m: Measure) -> f64 {
        match m {
            Measure::Acid => self.acid,
            Measure::Base => self.base,
            Measure::Voc => self.voc,
            Measure::Heat => self.heat,
            Measure::Dust => self.dust,
        }
    }

    fn set(&mut self, m: Measure, v: f64) {
        match m {
            Measure::Acid => self.acid = v,
            Measure::Base => self.base = v,
            Measure::Voc => self.voc = v,
            Measure::Heat => self.heat = v,
            Measure::Dust => self.dust = v,
        }
    }

    fn add(&mut self, other: &FlowVector) {
        for m in Measure::ALL {
            self.set(m, self.get(m) + other.get(m));
        }
    }
}

// ── Summary ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRow {
    pub uid: String,
    /// Display label: the point's label, or its 1-based insertion index when
    /// the label is empty.
    pub label: String,
    pub per_unit: FlowVector,
    pub machines: f64,
    pub totals: FlowVector,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub rows: Vec<SummaryRow>,
    pub grand: FlowVector,
}

/// Display label for a point at a given insertion index.
pub fn display_label(label: &str, index: usize) -> String {
    if label.is_empty() {
        (index + 1).to_string()
    } else {
        label.to_owned()
    }
}

/// Compute per-row and grand totals. Coercion reads the raw field text and
/// never writes it back. Row order follows point insertion order, or the
/// label sort when `summary_sort_by_id` is set.
pub fn summarize(doc: &Document) -> Summary {
    let mut rows = Vec::with_capacity(doc.points.len());
    let mut grand = FlowVector::default();
    for (idx, p) in doc.points.iter().enumerate() {
        let mut per_unit = FlowVector::default();
        for m in Measure::ALL {
            per_unit.set(m, p.flow(m).as_flow());
        }
        let machines = p.machines.as_machines();
        let mut totals = FlowVector::default();
        for m in Measure::ALL {
            totals.set(m, per_unit.get(m) * machines);
        }
        grand.add(&totals);
        rows.push(SummaryRow {
            uid: p.uid.clone(),
            label: display_label(&p.label, idx),
            per_unit,
            machines,
            totals,
        });
    }
    if doc.summary_sort_by_id {
        rows.sort_by(|a, b| compare_labels(&a.label, &b.label));
    }
    Summary { rows, grand }
}

// ── Label ordering ──────────────────────────────────────────────────────────

enum SortKey {
    Num(f64),
    Text(String),
}

fn sort_key(label: &str) -> SortKey {
    match label.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => SortKey::Num(n),
        _ => SortKey::Text(label.to_owned()),
    }
}

/// Total order over labels: numeric labels sort first, by value, ahead of
/// non-numeric labels, which compare as strings. Equal numeric values break
/// the tie on the raw text. `sort_by` requires a total order, so the two
/// groups never interleave.
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    match (sort_key(a), sort_key(b)) {
        (SortKey::Num(x), SortKey::Num(y)) => x
            .partial_cmp(&y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(b)),
        (SortKey::Num(_), SortKey::Text(_)) => Ordering::Less,
        (SortKey::Text(_), SortKey::Num(_)) => Ordering::Greater,
        (SortKey::Text(x), SortKey::Text(y)) => x.cmp(&y),
    }
}

// ── Numeric formatting ──────────────────────────────────────────────────────

/// Render a value at the configured precision (`decimal_places` clamped to
/// 0–3). Non-finite values format as 0.
///
/// * `always_show` forces the full configured precision (grand totals, chip
///   totals): `5` → `"5.0"` at one decimal.
/// * otherwise whole numbers drop the decimal point: `5` → `"5"`.
/// * `allow_blank_zero` renders a value that rounds to 0 as the empty string,
///   but only when `always_show` is off.
pub fn format_value(value: f64, decimal_places: u8, always_show: bool, allow_blank_zero: bool) -> String {
    let digits = decimal_places.min(3) as usize;
    let v = if value.is_finite() { value } else { 0.0 };
    let scale = 10f64.powi(digits as i32);
    let rounded = (v * scale).round() / scale;
    if !always_show && allow_blank_zero && rounded == 0.0 {
        return String::new();
    }
    if always_show {
        return format!("{v:.digits$}");
    }
    if v.fract() == 0.0 && v.abs() < 1e15 {
        return format!("{}", v as i64);
    }
    format!("{v:.digits$}")
}

/// Text of one flow chip: the per-unit value, extended with `×N台=total` when
/// more than one machine multiplies it. Used verbatim by the live overlay and
/// the raster export.
pub fn chip_text(per_unit: f64, machines: f64, decimal_places: u8) -> String {
    let base = format_value(per_unit, decimal_places, true, false);
    if machines > 1.0 {
        let total = format_value(per_unit * machines, decimal_places, true, false);
        format!("{base}×{machines}台={total}")
    } else {
        base
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, UidGen};

    fn point(ids: &mut UidGen, label: &str, acid: &str, machines: &str) -> Point {
        let mut p = Point::new(ids.next());
        p.label = label.to_owned();
        p.acid = acid.into();
        p.machines = machines.into();
        p
    }

    #[test]
    fn per_point_totals_multiply_by_machines() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        doc.points.push(point(&mut ids, "A", "2", "3"));
        let s = summarize(&doc);
        assert_eq!(s.rows[0].per_unit.acid, 2.0);
        assert_eq!(s.rows[0].machines, 3.0);
        assert_eq!(s.rows[0].totals.acid, 6.0);
        assert_eq!(s.grand.acid, 6.0);
    }

    #[test]
    fn grand_totals_sum_across_points() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        doc.points.push(point(&mut ids, "A", "2", "3"));
        doc.points.push(point(&mut ids, "B", "1", "1"));
        let s = summarize(&doc);
        assert_eq!(s.grand.acid, 7.0);
        assert_eq!(s.grand.base, 0.0);
    }

    #[test]
    fn invalid_fields_coerce_without_mutating() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        doc.points.push(point(&mut ids, "A", "abc", "0"));
        let s = summarize(&doc);
        assert_eq!(s.rows[0].per_unit.acid, 0.0);
        assert_eq!(s.rows[0].machines, 1.0);
        assert_eq!(doc.points[0].acid.as_str(), "abc");
        assert_eq!(doc.points[0].machines.as_str(), "0");
    }

    #[test]
    fn empty_collection_yields_zero_totals() {
        let s = summarize(&Document::default());
        assert!(s.rows.is_empty());
        assert_eq!(s.grand, FlowVector::default());
    }

    #[test]
    fn empty_labels_fall_back_to_position_index() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        doc.points.push(point(&mut ids, "", "1", "1"));
        doc.points.push(point(&mut ids, "X", "1", "1"));
        doc.points.push(point(&mut ids, "", "1", "1"));
        let s = summarize(&doc);
        let labels: Vec<_> = s.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["1", "X", "3"]);
    }

    #[test]
    fn label_sort_orders_numeric_then_string_fallback() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        for label in ["10", "2", "b", "a"] {
            doc.points.push(point(&mut ids, label, "1", "1"));
        }
        doc.summary_sort_by_id = true;
        let s = summarize(&doc);
        let labels: Vec<_> = s.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["2", "10", "a", "b"]);
    }

    #[test]
    fn insertion_order_kept_when_sort_disabled() {
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        for label in ["b", "a", "2"] {
            doc.points.push(point(&mut ids, label, "1", "1"));
        }
        let s = summarize(&doc);
        let labels: Vec<_> = s.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["b", "a", "2"]);
    }

    #[test]
    fn numeric_labels_order_ahead_of_string_labels() {
        assert_eq!(compare_labels("2", "a"), std::cmp::Ordering::Less);
        assert_eq!(compare_labels("a", "2"), std::cmp::Ordering::Greater);
        assert_eq!(compare_labels("10", "a"), std::cmp::Ordering::Less);
        // equal numeric values tie-break on the raw text
        assert_eq!(compare_labels("2", "2.0"), std::cmp::Ordering::Less);
    }

    #[test]
    fn label_sort_stays_total_over_mixed_labels() {
        // "10" < "3a" < "9" as strings but "9" < "10" numerically; a
        // comparator that mixes the two rules cycles and sort_by may panic.
        let mut ids = UidGen::new();
        let mut doc = Document::default();
        for label in ["3a", "10", "9", "2b", "100"] {
            doc.points.push(point(&mut ids, label, "1", "1"));
        }
        doc.summary_sort_by_id = true;
        let s = summarize(&doc);
        let labels: Vec<_> = s.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["9", "10", "100", "2b", "3a"]);
    }

    #[test]
    fn format_respects_always_show_flag() {
        assert_eq!(format_value(5.0, 1, true, false), "5.0");
        assert_eq!(format_value(5.0, 1, false, false), "5");
        assert_eq!(format_value(0.0, 1, true, false), "0.0");
        assert_eq!(format_value(0.0, 1, false, false), "0");
    }

    #[test]
    fn format_blank_on_zero_only_without_always_show() {
        assert_eq!(format_value(0.0, 1, false, true), "");
        assert_eq!(format_value(0.0, 1, true, true), "0.0");
        assert_eq!(format_value(0.04, 1, false, true), "");
        assert_eq!(format_value(5.0, 1, false, true), "5");
    }

    #[test]
    fn format_keeps_decimals_on_fractional_values() {
        // only values that are whole render bare; rounding to a whole does not
        assert_eq!(format_value(4.999, 1, false, false), "5.0");
        assert_eq!(format_value(0.04, 1, false, false), "0.0");
        assert_eq!(format_value(5.0, 1, false, false), "5");
    }

    #[test]
    fn format_clamps_precision_and_handles_non_finite() {
        assert_eq!(format_value(1.23456, 9, true, false), "1.235");
        assert_eq!(format_value(2.5, 1, false, false), "2.5");
        assert_eq!(format_value(f64::NAN, 1, true, false), "0.0");
        assert_eq!(format_value(f64::INFINITY, 2, false, false), "0");
    }

    #[test]
    fn chip_text_appends_machine_total() {
        assert_eq!(chip_text(2.0, 3.0, 1), "2.0×3台=6.0");
        assert_eq!(chip_text(2.0, 1.0, 1), "2.0");
        assert_eq!(chip_text(1.5, 2.0, 0), "2×2台=3");
    }
}
