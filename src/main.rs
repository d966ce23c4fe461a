mod app;
mod doc_io;
mod export;
mod model;
mod summary;
mod viewport;

use std::path::PathBuf;

use eframe::egui;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    // optional: a floor plan image to load at startup
    let image_path = std::env::args().nth(1).map(PathBuf::from);
    if let Some(ref path) = image_path {
        info!("starting with background {}", path.display());
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_title("flowmap"),
        ..Default::default()
    };

    eframe::run_native(
        "flowmap",
        options,
        Box::new(move |cc| Ok(Box::new(app::FlowmapApp::new(&cc.egui_ctx, image_path)))),
    )
    .expect("Failed to run eframe");
}
