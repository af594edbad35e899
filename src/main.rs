#![windows_subsystem = "windows"]
#![allow(clippy::too_many_arguments)]

mod app;
mod bubble;
mod compositor;
mod eraser;
mod geometry;
mod gesture;
mod io;
pub mod logger;
mod scene;
mod search;
mod stage;

use app::GachaStageApp;
use eframe::egui;

fn main() -> Result<(), eframe::Error> {
    // Initialize session log (overwrites previous session log)
    logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 720.0])
            .with_maximized(true)
            .with_title("GachaStage"),
        ..Default::default()
    };

    eframe::run_native(
        "GachaStage",
        options,
        Box::new(|cc| Box::new(GachaStageApp::new(cc))),
    )
}
