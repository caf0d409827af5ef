mod app;
mod window;

use anyhow::anyhow;
use app::OverlayApp;
use better_media_controller::{backend, logging, Config, ConsoleBuffer};
use eframe::egui::ViewportBuilder;
use tracing::{info, warn};

const WINDOW_TITLE: &str = "Better Windows Media Controller";
const MIN_WINDOW_SIZE: [f32; 2] = [500.0, 200.0];

fn main() -> anyhow::Result<()> {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };

    let console = ConsoleBuffer::default();
    logging::init(&config.logging.filter, &console);
    if let Some(err) = config_error {
        warn!("config unusable; using defaults: {err:#}");
    }
    info!(
        delay_secs = config.minecraft.delay.as_secs(),
        poll_ms = config.session.poll_interval.as_millis() as u64,
        "starting overlay"
    );

    let backend = backend::default_backend(&config);

    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_title(WINDOW_TITLE)
            .with_decorations(false)
            .with_inner_size(MIN_WINDOW_SIZE)
            .with_min_inner_size(MIN_WINDOW_SIZE),
        ..Default::default()
    };

    eframe::run_native(
        WINDOW_TITLE,
        native_options,
        Box::new(
            move |_cc| -> std::result::Result<
                Box<dyn eframe::App>,
                Box<dyn std::error::Error + Send + Sync>,
            > { Ok(Box::new(OverlayApp::new(&config, backend, console))) },
        ),
    )
    .map_err(|e| anyhow!("failed to run the overlay window: {e}"))?;

    Ok(())
}
