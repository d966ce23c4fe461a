use std::path::{Path, PathBuf};

use anyhow::Context as _;
use eframe::egui;
use image::RgbaImage;
use tracing::{info, warn};

use crate::doc_io::{self, export_json, import_json};
use crate::export::{export_jpeg, LabelFont, EXPORT_FILE_NAME};
use crate::model::{Document, FlowDirection, Measure, NormPoint, UidGen};
use crate::summary::{display_label, format_value, summarize, Summary};
use crate::viewport;

const JSON_FILE_NAME: &str = "factory-layout.drawio.json";

const INK: egui::Color32 = egui::Color32::from_rgb(0x11, 0x11, 0x11);
const POINT_STROKE: egui::Color32 = egui::Color32::from_rgb(0xef, 0x44, 0x44);
const SELECTION: egui::Color32 = egui::Color32::from_rgb(0, 120, 255);
const TEXT_BOX_BORDER: egui::Color32 = egui::Color32::from_rgb(0xcb, 0xd5, 0xe1);
const TOTALS_BORDER: egui::Color32 = egui::Color32::from_rgb(0x94, 0xa3, 0xb8);

// ── Interaction state ───────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
enum Drag {
    #[default]
    None,
    Point(String),
    TextBox(String),
    Totals {
        grab: egui::Vec2,
    },
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct FlowmapApp {
    doc: Document,
    ids: UidGen,
    /// Decoded background, kept alongside the data URL stored in the document.
    background: Option<RgbaImage>,
    texture: Option<egui::TextureHandle>,
    selected_point: Option<String>,
    selected_text: Option<String>,
    drag: Drag,
    status: Option<String>,
}

impl FlowmapApp {
    pub fn new(ctx: &egui::Context, initial_image: Option<PathBuf>) -> Self {
        install_label_font(ctx);
        let mut app = Self {
            doc: Document::default(),
            ids: UidGen::new(),
            background: None,
            texture: None,
            selected_point: None,
            selected_text: None,
            drag: Drag::None,
            status: None,
        };
        if let Some(path) = initial_image {
            app.load_background_file(&path);
        }
        app
    }

    fn load_background_file(&mut self, path: &Path) {
        match std::fs::read(path) {
            Ok(bytes) => {
                let mime = mime_for_path(path);
                self.load_background_bytes(bytes, mime);
            }
            Err(e) => {
                warn!("cannot read background file {}: {e}", path.display());
                self.status = Some(format!("Cannot read {}", path.display()));
            }
        }
    }

    fn load_background_bytes(&mut self, bytes: Vec<u8>, mime: &str) {
        match image::load_from_memory(&bytes) {
            Ok(img) => {
                let rgba = img.to_rgba8();
                self.doc.background_data_url = Some(doc_io::encode_data_url(&bytes, mime));
                self.doc.image_width = Some(rgba.width());
                self.doc.image_height = Some(rgba.height());
                info!(width = rgba.width(), height = rgba.height(), "background loaded");
                self.background = Some(rgba);
                self.texture = None;
            }
            Err(e) => {
                warn!("background decode failed: {e}");
                self.status = Some("The selected file is not a decodable image".to_owned());
            }
        }
    }

    /// Replace the whole document (import path) and re-decode its background.
    /// The decoded intrinsic size wins over whatever the file recorded.
    fn apply_imported(&mut self, doc: Document) {
        self.doc = doc;
        self.background = None;
        self.texture = None;
        if let Some(url) = self.doc.background_data_url.clone() {
            match doc_io::decode_data_url(&url).map_err(anyhow::Error::from).and_then(|bytes| {
                image::load_from_memory(&bytes).context("background decode failed")
            }) {
                Ok(img) => {
                    let rgba = img.to_rgba8();
                    self.doc.image_width = Some(rgba.width());
                    self.doc.image_height = Some(rgba.height());
                    self.background = Some(rgba);
                }
                Err(e) => {
                    warn!("imported background unusable: {e}");
                    self.status = Some("Imported document's background could not be decoded".to_owned());
                }
            }
        }
        self.selected_point = self.doc.points.first().map(|p| p.uid.clone());
        self.selected_text = None;
        self.drag = Drag::None;
    }

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.texture.is_some() {
            return;
        }
        if let Some(ref img) = self.background {
            let size = [img.width() as usize, img.height() as usize];
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, img.as_flat_samples().as_slice());
            self.texture = Some(ctx.load_texture("background", color_image, egui::TextureOptions::LINEAR));
        }
    }

    // ── File operations ─────────────────────────────────────────────────────

    fn pick_background(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg", "gif", "bmp", "webp"])
            .pick_file()
        {
            self.load_background_file(&path);
        }
    }

    fn import_document(&mut self) {
        let Some(path) = rfd::FileDialog::new().add_filter("JSON", &["json"]).pick_file() else {
            return;
        };
        let loaded = std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|text| import_json(&text, &mut self.ids).map_err(anyhow::Error::from));
        match loaded {
            Ok(doc) => {
                info!("imported document from {}", path.display());
                self.apply_imported(doc);
                self.status = Some("Import complete".to_owned());
            }
            Err(e) => {
                // the current document stays untouched
                warn!("import failed: {e}");
                self.status = Some(format!("Import failed: {e}"));
            }
        }
    }

    fn export_document(&mut self) {
        let json = export_json(&self.doc);
        match save_bytes(JSON_FILE_NAME, json.as_bytes()) {
            Ok(Some(path)) => {
                info!("document saved to {}", path.display());
                self.status = Some(format!("Saved {}", path.display()));
            }
            Ok(None) => self.status = Some("Save cancelled".to_owned()),
            Err(e) => {
                warn!("document save failed: {e}");
                self.status = Some(format!("Save failed: {e}"));
            }
        }
    }

    fn export_image(&mut self) {
        let summary = summarize(&self.doc);
        let result = LabelFont::load_system()
            .map_err(anyhow::Error::from)
            .and_then(|font| {
                export_jpeg(&self.doc, &summary, self.background.as_ref(), &font)
                    .map_err(anyhow::Error::from)
            })
            .and_then(|bytes| save_bytes(EXPORT_FILE_NAME, &bytes));
        match result {
            Ok(Some(path)) => {
                info!("layout exported to {}", path.display());
                self.status = Some(format!("Exported {}", path.display()));
            }
            Ok(None) => self.status = Some("Export cancelled".to_owned()),
            Err(e) => {
                warn!("image export refused: {e}");
                self.status = Some(format!("Export failed: {e}"));
            }
        }
    }
}

impl eframe::App for FlowmapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.ensure_texture(ctx);
        let summary = summarize(&self.doc);

        if ctx.input(|i| i.key_pressed(egui::Key::Delete)) && !ctx.wants_keyboard_input() {
            if let Some(uid) = self.selected_point.take() {
                self.doc.delete_point(&uid);
            }
        }

        egui::SidePanel::right("controls").min_width(260.0).show(ctx, |ui| {
            self.controls_panel(ui);
        });

        egui::TopBottomPanel::bottom("summary")
            .resizable(true)
            .default_height(220.0)
            .show(ctx, |ui| {
                egui::ScrollArea::both().show(ui, |ui| {
                    summary_table(ui, &mut self.doc, &summary, &mut self.selected_point);
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.canvas(ui, &summary);
        });
    }
}

impl FlowmapApp {
    fn controls_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("flowmap");
        ui.horizontal_wrapped(|ui| {
            if ui.button("Load image").clicked() {
                self.pick_background();
            }
            if ui.button("Import JSON").clicked() {
                self.import_document();
            }
            if ui.button("Export JSON").clicked() {
                self.export_document();
            }
            if ui.button("Export image").clicked() {
                self.export_image();
            }
        });
        ui.separator();

        ui.add(egui::Slider::new(&mut self.doc.opacity, 0.0..=1.0).text("Background opacity"));
        ui.add(egui::Slider::new(&mut self.doc.point_size, 10.0..=60.0).text("Point size (px)"));
        ui.add(egui::Slider::new(&mut self.doc.point_opacity, 0.0..=1.0).text("Point opacity"));
        ui.horizontal(|ui| {
            ui.label("Decimal places");
            ui.add(egui::DragValue::new(&mut self.doc.decimal_places).range(0..=3));
        });
        ui.checkbox(&mut self.doc.summary_sort_by_id, "Sort summary by label");
        ui.separator();

        ui.horizontal(|ui| {
            if ui.button("New point").clicked() {
                let uid = self.doc.create_point(&mut self.ids, 0.5, 0.5);
                self.selected_point = Some(uid);
            }
            if ui.button("Delete point").clicked() {
                if let Some(uid) = self.selected_point.take() {
                    self.doc.delete_point(&uid);
                }
            }
        });
        self.point_editor(ui);
        ui.separator();

        ui.horizontal(|ui| {
            if ui.button("Add text box").clicked() {
                let uid = self.doc.create_text_box(&mut self.ids);
                self.selected_text = Some(uid);
            }
            if ui.button("Delete text box").clicked() {
                if let Some(uid) = self.selected_text.take() {
                    self.doc.delete_text_box(&uid);
                }
            }
        });
        self.text_box_editor(ui);

        if let Some(status) = &self.status {
            ui.separator();
            ui.label(status.clone());
        }
    }

    fn point_editor(&mut self, ui: &mut egui::Ui) {
        let Some(p) = self
            .selected_point
            .as_ref()
            .and_then(|uid| self.doc.point_mut(uid))
        else {
            ui.weak("No point selected");
            return;
        };
        egui::Grid::new("point_editor").num_columns(2).show(ui, |ui| {
            ui.label("Label");
            ui.text_edit_singleline(&mut p.label);
            ui.end_row();

            ui.label("Chips");
            egui::ComboBox::from_id_salt("flow_direction")
                .selected_text(match p.flow_direction {
                    FlowDirection::Row => "row",
                    FlowDirection::Column => "column",
                })
                .show_ui(ui, |ui| {
                    ui.selectable_value(&mut p.flow_direction, FlowDirection::Row, "row");
                    ui.selectable_value(&mut p.flow_direction, FlowDirection::Column, "column");
                });
            ui.end_row();

            for m in Measure::ALL {
                ui.label(m.key());
                ui.text_edit_singleline(p.flow_mut(m).raw_mut());
                ui.end_row();
            }
            ui.label("machines");
            ui.text_edit_singleline(p.machines.raw_mut());
            ui.end_row();
        });
    }

    fn text_box_editor(&mut self, ui: &mut egui::Ui) {
        let Some(tb) = self
            .selected_text
            .as_ref()
            .and_then(|uid| self.doc.text_box_mut(uid))
        else {
            ui.weak("No text box selected");
            return;
        };
        ui.add(egui::TextEdit::multiline(&mut tb.text).desired_rows(2));
        ui.horizontal(|ui| {
            ui.label("Color");
            let mut rgb = hex_to_rgb(&tb.color);
            if ui.color_edit_button_srgb(&mut rgb).changed() {
                tb.color = format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]);
            }
            ui.label("Size");
            ui.add(egui::Slider::new(&mut tb.font_size, 8.0..=72.0));
        });
    }

    // ── Canvas ──────────────────────────────────────────────────────────────

    fn canvas(&mut self, ui: &mut egui::Ui, summary: &Summary) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let canvas_rect = response.rect;
        painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

        let (Some(iw), Some(ih)) = (self.doc.image_width, self.doc.image_height) else {
            painter.text(
                canvas_rect.center(),
                egui::Align2::CENTER_CENTER,
                "Load a floor plan image to start",
                egui::FontId::proportional(16.0),
                egui::Color32::GRAY,
            );
            return;
        };

        // fit the image into the panel; all overlay geometry lives in the
        // image's rendered coordinate space so it matches the raster export
        let fit = (canvas_rect.width() / iw as f32)
            .min(canvas_rect.height() / ih as f32)
            .max(f32::EPSILON);
        let size = egui::vec2(iw as f32 * fit, ih as f32 * fit);
        let img_rect = egui::Rect::from_center_size(canvas_rect.center(), size);

        if let Some(ref tex) = self.texture {
            painter.image(
                tex.id(),
                img_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE.gamma_multiply(self.doc.opacity as f32),
            );
        }

        self.draw_points(&painter, img_rect, fit);
        self.draw_text_boxes(&painter, img_rect);
        let totals_rect = self.draw_totals_widget(&painter, img_rect, fit, summary);

        self.handle_canvas_input(&painter, &response, img_rect, fit, totals_rect);
    }

    fn point_center(&self, p: &crate::model::Point, img_rect: egui::Rect) -> egui::Pos2 {
        let (x, y) = viewport::to_pixel(p.x, p.y, img_rect.width(), img_rect.height());
        img_rect.min + egui::vec2(x, y)
    }

    fn draw_points(&self, painter: &egui::Painter, img_rect: egui::Rect, fit: f32) {
        let scale = self.doc.ui_scale() as f32 * fit;
        let alpha = self.doc.point_opacity as f32;
        let radius = scale * 11.0;
        for (idx, p) in self.doc.points.iter().enumerate() {
            let center = self.point_center(p, img_rect);
            painter.circle_filled(center, radius, egui::Color32::WHITE.gamma_multiply(0.9 * alpha));
            painter.circle_stroke(
                center,
                radius,
                egui::Stroke::new(2.0 * fit, POINT_STROKE.gamma_multiply(alpha)),
            );
            if self.selected_point.as_deref() == Some(p.uid.as_str()) {
                painter.circle_stroke(center, radius + 3.0, egui::Stroke::new(1.5, SELECTION));
            }
            painter.text(
                center,
                egui::Align2::CENTER_CENTER,
                display_label(&p.label, idx),
                egui::FontId::proportional(radius.max(10.0)),
                INK,
            );
            self.draw_flow_chips(painter, p, center, scale, alpha);
        }
    }

    fn draw_flow_chips(
        &self,
        painter: &egui::Painter,
        p: &crate::model::Point,
        center: egui::Pos2,
        scale: f32,
        alpha: f32,
    ) {
        let machines = p.machines.as_machines();
        let chip_px = (12.0 * scale).max(10.0);
        let pad_x = 4.0 * scale;
        let pad_y = 2.0 * scale;
        let gap = 4.0 * scale;
        let chip_h = 14.0 * scale + pad_y * 2.0;

        let chips: Vec<_> = Measure::ALL
            .iter()
            .filter_map(|&m| {
                let value = p.flow(m).as_flow();
                if value == 0.0 {
                    return None;
                }
                let text = crate::summary::chip_text(value, machines, self.doc.decimal_places);
                let galley = painter.layout_no_wrap(
                    text,
                    egui::FontId::proportional(chip_px),
                    egui::Color32::BLACK,
                );
                let [r, g, b] = m.color();
                Some((galley, egui::Color32::from_rgb(r, g, b)))
            })
            .collect();
        if chips.is_empty() {
            return;
        }

        let widths: Vec<f32> = chips.iter().map(|(g, _)| g.size().x + pad_x * 2.0).collect();
        let place = |painter: &egui::Painter, galley: &std::sync::Arc<egui::Galley>, color: egui::Color32, x: f32, y: f32, w: f32| {
            let rect = egui::Rect::from_min_size(egui::pos2(x, y), egui::vec2(w, chip_h));
            painter.rect_filled(rect, 4.0, color.gamma_multiply(alpha));
            let pos = rect.center() - galley.size() / 2.0;
            painter.galley(pos, galley.clone(), egui::Color32::BLACK);
        };

        match p.flow_direction {
            FlowDirection::Row => {
                let total: f32 = widths.iter().sum::<f32>() + gap * (chips.len() - 1) as f32;
                let mut x = center.x - total / 2.0;
                let y = center.y - chip_h / 2.0 + 20.0 * scale;
                for ((galley, color), w) in chips.iter().zip(&widths) {
                    place(painter, galley, *color, x, y, *w);
                    x += w + gap;
                }
            }
            FlowDirection::Column => {
                let mut y = center.y + 16.0 * scale;
                for ((galley, color), w) in chips.iter().zip(&widths) {
                    place(painter, galley, *color, center.x - w / 2.0, y, *w);
                    y += chip_h + gap;
                }
            }
        }
    }

    /// Rounded white panel behind each text box; also used for hit-testing.
    fn text_box_rect(&self, painter: &egui::Painter, tb: &crate::model::TextBox, img_rect: egui::Rect) -> egui::Rect {
        let (x, y) = viewport::to_pixel(tb.x, tb.y, img_rect.width(), img_rect.height());
        let center = img_rect.min + egui::vec2(x, y);
        let font_px = tb.font_size.max(1.0) as f32;
        let line_h = font_px * 1.2;
        let lines: Vec<&str> = tb.text.split('\n').collect();
        let widest = lines
            .iter()
            .map(|ln| {
                painter
                    .layout_no_wrap((*ln).to_owned(), egui::FontId::proportional(font_px), INK)
                    .size()
                    .x
            })
            .fold(30.0f32, f32::max);
        let box_h = lines.len() as f32 * line_h + 8.0;
        egui::Rect::from_center_size(center, egui::vec2(widest + 16.0, box_h))
    }

    fn draw_text_boxes(&self, painter: &egui::Painter, img_rect: egui::Rect) {
        for tb in &self.doc.text_boxes {
            let rect = self.text_box_rect(painter, tb, img_rect);
            painter.rect_filled(rect, 4.0, egui::Color32::WHITE.gamma_multiply(0.85));
            painter.rect_stroke(
                rect,
                4.0,
                egui::Stroke::new(1.0, TEXT_BOX_BORDER),
                egui::StrokeKind::Middle,
            );
            if self.selected_text.as_deref() == Some(tb.uid.as_str()) {
                painter.rect_stroke(
                    rect.expand(3.0),
                    4.0,
                    egui::Stroke::new(1.5, SELECTION),
                    egui::StrokeKind::Middle,
                );
            }
            let font_px = tb.font_size.max(1.0) as f32;
            let line_h = font_px * 1.2;
            let [r, g, b] = hex_to_rgb(&tb.color);
            let color = egui::Color32::from_rgb(r, g, b);
            for (i, ln) in tb.text.split('\n').enumerate() {
                painter.text(
                    egui::pos2(rect.center().x, rect.min.y + 4.0 + line_h / 2.0 + i as f32 * line_h),
                    egui::Align2::CENTER_CENTER,
                    ln,
                    egui::FontId::proportional(font_px),
                    color,
                );
            }
        }
    }

    fn totals_rect(&self, img_rect: egui::Rect, fit: f32) -> egui::Rect {
        let scale = self.doc.ui_scale() as f32 * fit;
        let box_w = 180.0 * scale;
        let box_h = 22.0 * scale + 5.0 * 18.0 * scale + 2.0 * 10.0 * scale;
        let (x, y) = viewport::to_pixel(
            self.doc.totals_position.x,
            self.doc.totals_position.y,
            img_rect.width(),
            img_rect.height(),
        );
        let center = img_rect.min + egui::vec2(x, y);
        let min_x = (center.x - box_w / 2.0)
            .clamp(img_rect.min.x, (img_rect.max.x - box_w).max(img_rect.min.x));
        let min_y = (center.y - box_h / 2.0)
            .clamp(img_rect.min.y, (img_rect.max.y - box_h).max(img_rect.min.y));
        egui::Rect::from_min_size(egui::pos2(min_x, min_y), egui::vec2(box_w, box_h))
    }

    fn draw_totals_widget(
        &self,
        painter: &egui::Painter,
        img_rect: egui::Rect,
        fit: f32,
        summary: &Summary,
    ) -> egui::Rect {
        let scale = self.doc.ui_scale() as f32 * fit;
        let rect = self.totals_rect(img_rect, fit);
        painter.rect_filled(rect, 6.0, egui::Color32::WHITE.gamma_multiply(0.92));
        painter.rect_stroke(rect, 6.0, egui::Stroke::new(1.0, TOTALS_BORDER), egui::StrokeKind::Middle);

        let padding = 10.0 * scale;
        let header = 22.0 * scale;
        let line_h = 18.0 * scale;
        painter.text(
            egui::pos2(rect.min.x + padding, rect.min.y + padding + header / 2.0),
            egui::Align2::LEFT_CENTER,
            "總量",
            egui::FontId::proportional((13.0 * scale).max(10.0)),
            INK,
        );
        let value_px = (12.0 * scale).max(10.0);
        for (i, m) in Measure::ALL.into_iter().enumerate() {
            let y = rect.min.y + padding + header + i as f32 * line_h + line_h / 2.0;
            let [r, g, b] = m.color();
            let swatch = egui::Rect::from_min_size(
                egui::pos2(rect.min.x + padding, y - 7.0 * scale),
                egui::vec2(28.0 * scale, 14.0 * scale),
            );
            painter.rect_filled(swatch, 0.0, egui::Color32::from_rgb(r, g, b));
            painter.text(
                egui::pos2(swatch.max.x + 6.0 * scale, y),
                egui::Align2::LEFT_CENTER,
                m.label(),
                egui::FontId::proportional(value_px),
                egui::Color32::BLACK,
            );
            painter.text(
                egui::pos2(rect.max.x - padding, y),
                egui::Align2::RIGHT_CENTER,
                format_value(summary.grand.get(m), self.doc.decimal_places, true, false),
                egui::FontId::proportional(value_px),
                egui::Color32::BLACK,
            );
        }
        rect
    }

    // ── Input ───────────────────────────────────────────────────────────────

    fn handle_canvas_input(
        &mut self,
        painter: &egui::Painter,
        response: &egui::Response,
        img_rect: egui::Rect,
        fit: f32,
        totals_rect: egui::Rect,
    ) {
        // right click adds a point under the cursor
        if response.secondary_clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                let (nx, ny) = viewport::to_normalized(
                    pos.x - img_rect.min.x,
                    pos.y - img_rect.min.y,
                    img_rect.width(),
                    img_rect.height(),
                );
                let uid = self.doc.create_point(&mut self.ids, nx, ny);
                self.selected_point = Some(uid);
            }
        }

        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.select_at(painter, pos, img_rect, fit, totals_rect);
            }
        }

        if response.drag_started_by(egui::PointerButton::Primary) {
            if let Some(pos) = response.interact_pointer_pos() {
                self.drag = self.begin_drag(painter, pos, img_rect, fit, totals_rect);
            }
        }

        if response.dragged_by(egui::PointerButton::Primary) {
            if let Some(pos) = response.interact_pointer_pos() {
                let norm = |p: egui::Pos2| {
                    viewport::to_normalized(
                        p.x - img_rect.min.x,
                        p.y - img_rect.min.y,
                        img_rect.width(),
                        img_rect.height(),
                    )
                };
                match &self.drag {
                    Drag::Point(uid) => {
                        let (nx, ny) = norm(pos);
                        if let Some(p) = self.doc.point_mut(&uid.clone()) {
                            p.set_position(nx, ny);
                        }
                    }
                    Drag::TextBox(uid) => {
                        let (nx, ny) = norm(pos);
                        if let Some(tb) = self.doc.text_box_mut(&uid.clone()) {
                            tb.set_position(nx, ny);
                        }
                    }
                    Drag::Totals { grab } => {
                        let (nx, ny) = norm(pos - *grab);
                        self.doc.totals_position = NormPoint::clamped(nx, ny);
                    }
                    Drag::None => {}
                }
            }
        }

        if response.drag_stopped_by(egui::PointerButton::Primary) {
            self.drag = Drag::None;
        }
    }

    fn select_at(
        &mut self,
        painter: &egui::Painter,
        pos: egui::Pos2,
        img_rect: egui::Rect,
        fit: f32,
        totals_rect: egui::Rect,
    ) {
        match self.hit_test(painter, pos, img_rect, fit, totals_rect) {
            Drag::Point(uid) => self.selected_point = Some(uid),
            Drag::TextBox(uid) => self.selected_text = Some(uid),
            _ => {}
        }
    }

    fn begin_drag(
        &mut self,
        painter: &egui::Painter,
        pos: egui::Pos2,
        img_rect: egui::Rect,
        fit: f32,
        totals_rect: egui::Rect,
    ) -> Drag {
        let hit = self.hit_test(painter, pos, img_rect, fit, totals_rect);
        match &hit {
            Drag::Point(uid) => self.selected_point = Some(uid.clone()),
            Drag::TextBox(uid) => self.selected_text = Some(uid.clone()),
            _ => {}
        }
        hit
    }

    /// Topmost entity under the cursor: totals widget, then text boxes, then
    /// points, each in front-to-back order.
    fn hit_test(
        &self,
        painter: &egui::Painter,
        pos: egui::Pos2,
        img_rect: egui::Rect,
        fit: f32,
        totals_rect: egui::Rect,
    ) -> Drag {
        if totals_rect.contains(pos) {
            return Drag::Totals {
                grab: pos - totals_rect.center(),
            };
        }
        for tb in self.doc.text_boxes.iter().rev() {
            if self.text_box_rect(painter, tb, img_rect).expand(2.0).contains(pos) {
                return Drag::TextBox(tb.uid.clone());
            }
        }
        let radius = self.doc.ui_scale() as f32 * fit * 11.0;
        for p in self.doc.points.iter().rev() {
            let center = self.point_center(p, img_rect);
            if center.distance(pos) <= radius + 4.0 {
                return Drag::Point(p.uid.clone());
            }
        }
        Drag::None
    }
}

// ── Summary table ───────────────────────────────────────────────────────────

fn summary_table(
    ui: &mut egui::Ui,
    doc: &mut Document,
    summary: &Summary,
    selected: &mut Option<String>,
) {
    use egui_extras::{Column, TableBuilder};

    TableBuilder::new(ui)
        .striped(true)
        .column(Column::auto().at_least(48.0))
        .columns(Column::auto().at_least(52.0), 6)
        .columns(Column::auto().at_least(52.0), 5)
        .header(20.0, |mut header| {
            for title in [
                "ID", "acid", "base", "voc", "heat", "dust", "machines", "Σ acid", "Σ base",
                "Σ voc", "Σ heat", "Σ dust",
            ] {
                header.col(|ui| {
                    ui.strong(title);
                });
            }
        })
        .body(|mut body| {
            for row in &summary.rows {
                body.row(22.0, |mut tr| {
                    tr.col(|ui| {
                        let active = selected.as_deref() == Some(row.uid.as_str());
                        if ui.selectable_label(active, &row.label).clicked() {
                            *selected = Some(row.uid.clone());
                        }
                    });
                    for m in Measure::ALL {
                        tr.col(|ui| {
                            if let Some(p) = doc.point_mut(&row.uid) {
                                ui.add(
                                    egui::TextEdit::singleline(p.flow_mut(m).raw_mut())
                                        .desired_width(46.0),
                                );
                            }
                        });
                    }
                    tr.col(|ui| {
                        if let Some(p) = doc.point_mut(&row.uid) {
                            ui.add(egui::TextEdit::singleline(p.machines.raw_mut()).desired_width(38.0));
                        }
                    });
                    for m in Measure::ALL {
                        tr.col(|ui| {
                            ui.label(format_value(row.totals.get(m), doc.decimal_places, false, false));
                        });
                    }
                });
            }
            // grand totals always render at full precision
            body.row(22.0, |mut tr| {
                tr.col(|ui| {
                    ui.strong("Total");
                });
                for _ in 0..6 {
                    tr.col(|_| {});
                }
                for m in Measure::ALL {
                    tr.col(|ui| {
                        ui.strong(format_value(summary.grand.get(m), doc.decimal_places, true, false));
                    });
                }
            });
        });
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Save through the native dialog. `Ok(None)` means the user dismissed it;
/// nothing is written in that case.
fn save_bytes(suggested_name: &str, bytes: &[u8]) -> anyhow::Result<Option<PathBuf>> {
    match rfd::FileDialog::new().set_file_name(suggested_name).save_file() {
        Some(path) => {
            std::fs::write(&path, bytes)
                .with_context(|| format!("cannot write {}", path.display()))?;
            Ok(Some(path))
        }
        None => Ok(None),
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

fn hex_to_rgb(s: &str) -> [u8; 3] {
    let hex = s.trim().strip_prefix('#').unwrap_or("");
    if hex.len() == 6 {
        if let (Ok(r), Ok(g), Ok(b)) = (
            u8::from_str_radix(&hex[0..2], 16),
            u8::from_str_radix(&hex[2..4], 16),
            u8::from_str_radix(&hex[4..6], 16),
        ) {
            return [r, g, b];
        }
    }
    [0x11, 0x11, 0x11]
}

/// Give egui a system font so the measure labels and chip text (CJK) render
/// in the live view as well as in the export.
fn install_label_font(ctx: &egui::Context) {
    let Some(bytes) = LabelFont::load_system_bytes() else {
        return;
    };
    let mut fonts = egui::FontDefinitions::default();
    fonts
        .font_data
        .insert("system".to_owned(), std::sync::Arc::new(egui::FontData::from_owned(bytes)));
    if let Some(family) = fonts.families.get_mut(&egui::FontFamily::Proportional) {
        family.push("system".to_owned());
    }
    ctx.set_fonts(fonts);
}
