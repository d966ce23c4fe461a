//! Raster export: replay the aggregation and projection onto an offscreen
//! RGBA canvas and encode a single flattened JPEG. Drawing happens at the
//! background image's intrinsic size so the output matches the live overlay
//! pixel for pixel.
//!
//! Back-to-front order: white fill (JPEG has no alpha, transparent areas
//! would otherwise go black), background at the configured opacity, point
//! circles with labels, flow chips, text boxes, totals panel.

use fontdue::{Font, FontSettings};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgba, RgbaImage};
use thiserror::Error;

use crate::model::{Document, FlowDirection, Measure, Point, TextBox};
use crate::summary::{chip_text, display_label, format_value, FlowVector, Summary};
use crate::viewport;

pub const EXPORT_FILE_NAME: &str = "factory-layout.jpg";
const JPEG_QUALITY: u8 = 92;

const INK: [u8; 3] = [0x11, 0x11, 0x11];
const BLACK: [u8; 3] = [0x00, 0x00, 0x00];
const WHITE: [u8; 3] = [0xff, 0xff, 0xff];
const POINT_STROKE: [u8; 3] = [0xef, 0x44, 0x44];
const TEXT_BOX_BORDER: [u8; 3] = [0xcb, 0xd5, 0xe1];
const TOTALS_BORDER: [u8; 3] = [0x94, 0xa3, 0xb8];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no background image loaded")]
    NoBackground,
    #[error("background dimensions are unknown")]
    NoDimensions,
    #[error("no usable label font found on this system")]
    NoFont,
    #[error("cannot parse font: {0}")]
    FontParse(&'static str),
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Refuse to export when no background is loaded or its intrinsic size never
/// became known; both would produce a malformed or misaligned file.
pub fn check_preconditions<'a>(
    doc: &Document,
    background: Option<&'a RgbaImage>,
) -> Result<&'a RgbaImage, ExportError> {
    let bg = background.ok_or(ExportError::NoBackground)?;
    if doc.image_width.is_none() || doc.image_height.is_none() {
        return Err(ExportError::NoDimensions);
    }
    Ok(bg)
}

pub fn export_jpeg(
    doc: &Document,
    summary: &Summary,
    background: Option<&RgbaImage>,
    font: &LabelFont,
) -> Result<Vec<u8>, ExportError> {
    let bg = check_preconditions(doc, background)?;
    let canvas = render_layout(doc, summary, bg, font);
    let rgb = DynamicImage::ImageRgba8(canvas).into_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder.encode_image(&rgb)?;
    Ok(out)
}

pub fn render_layout(
    doc: &Document,
    summary: &Summary,
    background: &RgbaImage,
    font: &LabelFont,
) -> RgbaImage {
    let (w, h) = background.dimensions();
    let mut canvas = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));

    let bg_alpha = doc.opacity.clamp(0.0, 1.0) as f32;
    for (x, y, px) in background.enumerate_pixels() {
        let a = bg_alpha * px[3] as f32 / 255.0;
        blend(&mut canvas, x as i32, y as i32, [px[0], px[1], px[2]], a);
    }

    for (idx, p) in doc.points.iter().enumerate() {
        draw_point(&mut canvas, doc, p, idx, font);
    }
    for tb in &doc.text_boxes {
        draw_text_box(&mut canvas, tb, font);
    }
    draw_totals_panel(&mut canvas, doc, &summary.grand, font);
    canvas
}

fn draw_point(canvas: &mut RgbaImage, doc: &Document, p: &Point, idx: usize, font: &LabelFont) {
    let (w, h) = canvas.dimensions();
    let (px, py) = viewport::to_pixel(p.x, p.y, w as f32, h as f32);
    let scale = doc.ui_scale() as f32;
    let point_alpha = doc.point_opacity.clamp(0.0, 1.0) as f32;
    let radius = scale * 11.0;

    fill_circle(canvas, px, py, radius, WHITE, 0.9 * point_alpha);
    stroke_circle(canvas, px, py, radius, 2.0, POINT_STROKE, point_alpha);
    font.draw(
        canvas,
        &display_label(&p.label, idx),
        px,
        py,
        radius.max(10.0),
        TextAlign::Center,
        INK,
        1.0,
    );

    let machines = p.machines.as_machines();
    let chips: Vec<(String, [u8; 3])> = Measure::ALL
        .iter()
        .filter_map(|&m| {
            let value = p.flow(m).as_flow();
            if value == 0.0 {
                return None;
            }
            Some((chip_text(value, machines, doc.decimal_places), m.color()))
        })
        .collect();
    if chips.is_empty() {
        return;
    }

    let chip_px = (12.0 * scale).max(10.0);
    let line_height = 14.0 * scale;
    let pad_x = 4.0 * scale;
    let pad_y = 2.0 * scale;
    let gap = 4.0 * scale;
    let chip_h = line_height + pad_y * 2.0;

    let widths: Vec<f32> = chips
        .iter()
        .map(|(text, _)| font.width(text, chip_px) + pad_x * 2.0)
        .collect();

    match p.flow_direction {
        FlowDirection::Row => {
            let total: f32 = widths.iter().sum::<f32>() + gap * (chips.len() - 1) as f32;
            let mut x = px - total / 2.0;
            let y = py - chip_h / 2.0 + 20.0 * scale;
            for ((text, color), chip_w) in chips.iter().zip(&widths) {
                draw_chip(canvas, text, *color, x, y, *chip_w, chip_h, chip_px, point_alpha, font);
                x += chip_w + gap;
            }
        }
        FlowDirection::Column => {
            let mut y = py + 16.0 * scale;
            for ((text, color), chip_w) in chips.iter().zip(&widths) {
                let x = px - chip_w / 2.0;
                draw_chip(canvas, text, *color, x, y, *chip_w, chip_h, chip_px, point_alpha, font);
                y += chip_h + gap;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_chip(
    canvas: &mut RgbaImage,
    text: &str,
    color: [u8; 3],
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    font_px: f32,
    alpha: f32,
    font: &LabelFont,
) {
    fill_round_rect(canvas, x, y, w, h, 4.0, color, alpha);
    font.draw(
        canvas,
        text,
        x + w / 2.0,
        y + h / 2.0,
        font_px,
        TextAlign::Center,
        BLACK,
        1.0,
    );
}

fn draw_text_box(canvas: &mut RgbaImage, tb: &TextBox, font: &LabelFont) {
    let (w, h) = canvas.dimensions();
    let (tx, ty) = viewport::to_pixel(tb.x, tb.y, w as f32, h as f32);
    let font_px = tb.font_size.max(1.0) as f32;
    let line_height = font_px * 1.2;
    let lines: Vec<&str> = tb.text.split('\n').collect();
    let box_w = lines
        .iter()
        .map(|ln| font.width(ln, font_px))
        .fold(30.0f32, f32::max);
    let box_h = lines.len() as f32 * line_height + 8.0;
    let box_x = tx - box_w / 2.0 - 8.0;
    let box_y = ty - box_h / 2.0;

    fill_round_rect(canvas, box_x, box_y, box_w + 16.0, box_h, 4.0, WHITE, 0.85);
    stroke_round_rect(canvas, box_x, box_y, box_w + 16.0, box_h, 4.0, 1.0, TEXT_BOX_BORDER, 1.0);

    let color = parse_hex_color(&tb.color).unwrap_or(INK);
    for (i, ln) in lines.iter().enumerate() {
        let y = box_y + 4.0 + line_height / 2.0 + i as f32 * line_height;
        font.draw(canvas, ln, tx, y, font_px, TextAlign::Center, color, 1.0);
    }
}

fn draw_totals_panel(canvas: &mut RgbaImage, doc: &Document, grand: &FlowVector, font: &LabelFont) {
    let (w, h) = canvas.dimensions();
    let (w, h) = (w as f32, h as f32);
    let scale = doc.ui_scale() as f32;
    let box_w = 180.0 * scale;
    let line_height = 18.0 * scale;
    let padding = 10.0 * scale;
    let header = 22.0 * scale;
    let box_h = header + Measure::ALL.len() as f32 * line_height + padding * 2.0;

    let (cx, cy) = viewport::to_pixel(doc.totals_position.x, doc.totals_position.y, w, h);
    // keep the panel fully inside the canvas
    let box_x = (cx - box_w / 2.0).clamp(0.0, (w - box_w).max(0.0));
    let box_y = (cy - box_h / 2.0).clamp(0.0, (h - box_h).max(0.0));

    fill_round_rect(canvas, box_x, box_y, box_w, box_h, 6.0, WHITE, 0.92);
    stroke_round_rect(canvas, box_x, box_y, box_w, box_h, 6.0, 1.0, TOTALS_BORDER, 1.0);

    font.draw(
        canvas,
        "總量",
        box_x + padding,
        box_y + padding + header / 2.0,
        (13.0 * scale).max(10.0),
        TextAlign::Left,
        INK,
        1.0,
    );

    let value_px = (12.0 * scale).max(10.0);
    for (i, m) in Measure::ALL.into_iter().enumerate() {
        let y = box_y + padding + header + i as f32 * line_height + line_height / 2.0;
        let swatch_w = 28.0 * scale;
        let swatch_h = 14.0 * scale;
        fill_rect(canvas, box_x + padding, y - swatch_h / 2.0, swatch_w, swatch_h, m.color(), 1.0);
        font.draw(
            canvas,
            m.label(),
            box_x + padding + swatch_w + 6.0 * scale,
            y,
            value_px,
            TextAlign::Left,
            BLACK,
            1.0,
        );
        font.draw(
            canvas,
            &format_value(grand.get(m), doc.decimal_places, true, false),
            box_x + box_w - padding,
            y,
            value_px,
            TextAlign::Right,
            BLACK,
            1.0,
        );
    }
}

// ── Label font ──────────────────────────────────────────────────────────────

const FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Clone, Copy)]
enum TextAlign {
    Left,
    Center,
    Right,
}

/// Glyph rasterizer for the export canvas.
pub struct LabelFont {
    font: Font,
}

impl LabelFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ExportError> {
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(ExportError::FontParse)?;
        Ok(Self { font })
    }

    /// Probe well-known font locations. CJK-capable fonts come first so the
    /// measure labels render.
    pub fn load_system() -> Result<Self, ExportError> {
        Self::load_system_bytes()
            .ok_or(ExportError::NoFont)
            .and_then(Self::from_bytes)
    }

    /// Raw bytes of the first usable system font; also fed to the live view
    /// so overlay and export shape text the same way.
    pub fn load_system_bytes() -> Option<Vec<u8>> {
        for path in FONT_PATHS {
            if let Ok(bytes) = std::fs::read(path) {
                if Font::from_bytes(bytes.as_slice(), FontSettings::default()).is_ok() {
                    return Some(bytes);
                }
            }
        }
        None
    }

    fn width(&self, text: &str, px: f32) -> f32 {
        text.chars()
            .map(|ch| self.font.metrics(ch, px).advance_width)
            .sum()
    }

    /// Draw one line of text with its vertical midpoint at `cy`.
    #[allow(clippy::too_many_arguments)]
    fn draw(
        &self,
        canvas: &mut RgbaImage,
        text: &str,
        x: f32,
        cy: f32,
        px: f32,
        align: TextAlign,
        color: [u8; 3],
        alpha: f32,
    ) {
        let width = self.width(text, px);
        let mut cursor = match align {
            TextAlign::Left => x,
            TextAlign::Center => x - width / 2.0,
            TextAlign::Right => x - width,
        };
        let (ascent, descent) = match self.font.horizontal_line_metrics(px) {
            Some(lm) => (lm.ascent, lm.descent),
            None => (px * 0.8, -px * 0.2),
        };
        let baseline = cy + (ascent + descent) / 2.0;

        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, px);
            let left = cursor + metrics.xmin as f32;
            let top = baseline - (metrics.height as i32 + metrics.ymin) as f32;
            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let coverage = bitmap[gy * metrics.width + gx] as f32 / 255.0;
                    if coverage > 0.0 {
                        blend(
                            canvas,
                            left as i32 + gx as i32,
                            top as i32 + gy as i32,
                            color,
                            alpha * coverage,
                        );
                    }
                }
            }
            cursor += metrics.advance_width;
        }
    }
}

// ── Pixel primitives ────────────────────────────────────────────────────────

fn blend(canvas: &mut RgbaImage, x: i32, y: i32, color: [u8; 3], alpha: f32) {
    if alpha <= 0.0 || x < 0 || y < 0 || x >= canvas.width() as i32 || y >= canvas.height() as i32 {
        return;
    }
    let a = alpha.min(1.0);
    let px = canvas.get_pixel_mut(x as u32, y as u32);
    for c in 0..3 {
        px[c] = (color[c] as f32 * a + px[c] as f32 * (1.0 - a)).round() as u8;
    }
    px[3] = 255;
}

fn fill_rect(canvas: &mut RgbaImage, x: f32, y: f32, w: f32, h: f32, color: [u8; 3], alpha: f32) {
    for py in y.floor() as i32..(y + h).ceil() as i32 {
        for px in x.floor() as i32..(x + w).ceil() as i32 {
            blend(canvas, px, py, color, alpha);
        }
    }
}

fn fill_circle(canvas: &mut RgbaImage, cx: f32, cy: f32, r: f32, color: [u8; 3], alpha: f32) {
    sdf_area(canvas, cx - r, cy - r, r * 2.0, r * 2.0, |px, py| {
        let d = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
        (r - d + 0.5).clamp(0.0, 1.0) * alpha
    }, color);
}

fn stroke_circle(canvas: &mut RgbaImage, cx: f32, cy: f32, r: f32, lw: f32, color: [u8; 3], alpha: f32) {
    let half = lw / 2.0;
    let pad = r + half;
    sdf_area(canvas, cx - pad, cy - pad, pad * 2.0, pad * 2.0, |px, py| {
        let d = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
        (half - (d - r).abs() + 0.5).clamp(0.0, 1.0) * alpha
    }, color);
}

/// Signed distance to a rounded rectangle boundary (negative inside).
fn round_rect_sdf(px: f32, py: f32, x: f32, y: f32, w: f32, h: f32, r: f32) -> f32 {
    let r = r.min(w / 2.0).min(h / 2.0);
    let dx = (px - x - w / 2.0).abs() - (w / 2.0 - r);
    let dy = (py - y - h / 2.0).abs() - (h / 2.0 - r);
    let ox = dx.max(0.0);
    let oy = dy.max(0.0);
    (ox * ox + oy * oy).sqrt() + dx.max(dy).min(0.0) - r
}

#[allow(clippy::too_many_arguments)]
fn fill_round_rect(canvas: &mut RgbaImage, x: f32, y: f32, w: f32, h: f32, r: f32, color: [u8; 3], alpha: f32) {
    sdf_area(canvas, x, y, w, h, |px, py| {
        (0.5 - round_rect_sdf(px, py, x, y, w, h, r)).clamp(0.0, 1.0) * alpha
    }, color);
}

#[allow(clippy::too_many_arguments)]
fn stroke_round_rect(canvas: &mut RgbaImage, x: f32, y: f32, w: f32, h: f32, r: f32, lw: f32, color: [u8; 3], alpha: f32) {
    let half = lw / 2.0;
    sdf_area(canvas, x - half, y - half, w + lw, h + lw, |px, py| {
        (half - round_rect_sdf(px, py, x, y, w, h, r).abs() + 0.5).clamp(0.0, 1.0) * alpha
    }, color);
}

/// Walk the bounding box and blend each pixel with the coverage the closure
/// reports for its center.
fn sdf_area(
    canvas: &mut RgbaImage,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    coverage: impl Fn(f32, f32) -> f32,
    color: [u8; 3],
) {
    for py in (y - 1.0).floor() as i32..=(y + h + 1.0).ceil() as i32 {
        for px in (x - 1.0).floor() as i32..=(x + w + 1.0).ceil() as i32 {
            let a = coverage(px as f32 + 0.5, py as f32 + 0.5);
            if a > 0.0 {
                blend(canvas, px, py, color, a);
            }
        }
    }
}

fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.trim().strip_prefix('#')?;
    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some([r, g, b])
        }
        3 => {
            let component = |i: usize| {
                u8::from_str_radix(&hex[i..i + 1], 16)
                    .ok()
                    .map(|v| v * 17)
            };
            Some([component(0)?, component(1)?, component(2)?])
        }
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::summarize;

    #[test]
    fn export_refuses_without_background() {
        let doc = Document::default();
        assert!(matches!(
            check_preconditions(&doc, None),
            Err(ExportError::NoBackground)
        ));
    }

    #[test]
    fn export_refuses_without_known_dimensions() {
        let doc = Document::default();
        let bg = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        assert!(matches!(
            check_preconditions(&doc, Some(&bg)),
            Err(ExportError::NoDimensions)
        ));
        let mut doc = doc;
        doc.image_width = Some(4);
        doc.image_height = Some(4);
        assert!(check_preconditions(&doc, Some(&bg)).is_ok());
    }

    #[test]
    fn hex_colors_parse_with_fallbacks() {
        assert_eq!(parse_hex_color("#ff0080"), Some([255, 0, 128]));
        assert_eq!(parse_hex_color("#f08"), Some([255, 0, 136]));
        assert_eq!(parse_hex_color("red"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
    }

    #[test]
    fn blend_is_src_over_on_opaque_canvas() {
        let mut canvas = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        blend(&mut canvas, 0, 0, [0, 0, 0], 0.5);
        assert_eq!(canvas.get_pixel(0, 0).0, [128, 128, 128, 255]);
        // out of bounds writes are dropped
        blend(&mut canvas, -1, 5, [0, 0, 0], 1.0);
    }

    #[test]
    fn fill_rect_covers_the_requested_area() {
        let mut canvas = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        fill_rect(&mut canvas, 1.0, 1.0, 2.0, 2.0, [0, 0, 0], 1.0);
        assert_eq!(canvas.get_pixel(1, 1).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(2, 2).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(canvas.get_pixel(3, 3).0, [255, 255, 255, 255]);
    }

    #[test]
    fn render_layout_matches_background_dimensions() {
        // Needs a system font; skipped on machines that have none.
        let Ok(font) = LabelFont::load_system() else {
            return;
        };
        let mut doc = Document::default();
        doc.image_width = Some(64);
        doc.image_height = Some(32);
        let mut ids = crate::model::UidGen::new();
        let uid = doc.create_point(&mut ids, 0.5, 0.5);
        doc.point_mut(&uid).unwrap().acid = "2".into();
        let bg = RgbaImage::from_pixel(64, 32, Rgba([200, 10, 10, 255]));
        let summary = summarize(&doc);
        let img = render_layout(&doc, &summary, &bg, &font);
        assert_eq!(img.dimensions(), (64, 32));
        let jpeg = export_jpeg(&doc, &summary, Some(&bg), &font).unwrap();
        assert!(!jpeg.is_empty());
    }
}
