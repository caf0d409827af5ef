use crate::window::{self, WindowLevelSync};
use better_media_controller::{
    config::Config,
    minecraft::{format_countdown, MinecraftTimer, TimerState},
    session::{Capability, PlaybackStatus, SessionMirror, SessionSnapshot},
    ConsoleBuffer, MediaBackend,
};
use eframe::egui::{
    self, Align2, Color32, ColorImage, CornerRadius, FontId, RichText, TextureHandle,
    TextureOptions,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

const BG: Color32 = Color32::from_rgb(18, 18, 18);
const FG: Color32 = Color32::from_rgb(230, 230, 230);
const MUTED: Color32 = Color32::from_rgb(150, 150, 150);
const CHIP_BG: Color32 = Color32::from_rgb(28, 28, 28);
const COVER_BG: Color32 = Color32::from_rgba_premultiplied(18, 18, 18, 18);
const ACCENT: Color32 = Color32::from_rgb(100, 180, 255);
const OK: Color32 = Color32::from_rgb(120, 220, 160);
const TRACK_BG: Color32 = Color32::from_rgb(40, 40, 40);
const TIMER_FILL: Color32 = Color32::from_rgb(210, 60, 60);
const CONSOLE_BG: Color32 = Color32::from_rgb(24, 24, 24);
const ERROR: Color32 = Color32::from_rgb(255, 110, 110);

const COVER_SIZE: f32 = 96.0;
const TRANSPORT_BUTTON: egui::Vec2 = egui::vec2(96.0, 40.0);
const TRANSPORT_SPACING: f32 = 12.0;
const COUNTDOWN_REPAINT: Duration = Duration::from_millis(200);

/// Process-lifetime toggles. Only the UI flips them; the timer reads the
/// Minecraft flag as configuration each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiToggles {
    pub always_on_top: bool,
    pub minecraft_mode: bool,
    pub show_console: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Intent {
    Previous,
    PlayPause,
    Next,
    ToggleMinecraft,
    ToggleAlwaysOnTop,
    ToggleConsole,
    Minimize,
    Close,
}

struct CoverArt {
    bytes: Arc<[u8]>,
    texture: Option<TextureHandle>,
}

pub struct OverlayApp {
    mirror: SessionMirror<Box<dyn MediaBackend>>,
    timer: MinecraftTimer,
    toggles: UiToggles,
    poll_interval: Duration,
    last_poll: Option<Instant>,
    last_tick: Instant,
    cover: Option<CoverArt>,
    window_level: WindowLevelSync,
    corners_applied: bool,
    control_rects: Vec<egui::Rect>,
    console: ConsoleBuffer,
}

impl OverlayApp {
    pub fn new(config: &Config, backend: Box<dyn MediaBackend>, console: ConsoleBuffer) -> Self {
        let toggles = UiToggles {
            always_on_top: config.ui.always_on_top,
            minecraft_mode: config.minecraft.enabled,
            show_console: config.ui.show_console,
        };
        let mut timer = MinecraftTimer::new(config.minecraft.delay);
        timer.set_enabled(toggles.minecraft_mode);

        Self {
            mirror: SessionMirror::new(backend),
            timer,
            toggles,
            poll_interval: config.session.poll_interval,
            last_poll: None,
            last_tick: Instant::now(),
            cover: None,
            window_level: WindowLevelSync::default(),
            corners_applied: false,
            control_rects: Vec::new(),
            console,
        }
    }

    /// One poll-and-reconcile step: refresh the mirror when due, then let the
    /// timer react to what the refresh saw.
    fn tick(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        self.timer.set_enabled(self.toggles.minecraft_mode);

        let poll_due = self
            .last_poll
            .map_or(true, |at| now.saturating_duration_since(at) >= self.poll_interval);
        let mut track_changed = false;
        if poll_due || self.mirror.needs_refresh() {
            self.mirror.refresh();
            self.last_poll = Some(now);
            track_changed = self.mirror.track_changed();
        }

        self.timer.tick(track_changed, elapsed, &mut self.mirror);
    }

    fn handle_intent(&mut self, ctx: &egui::Context, intent: Intent) {
        match intent {
            Intent::Previous => {
                self.mirror.previous();
                self.timer.user_skip(&mut self.mirror);
            }
            Intent::Next => {
                self.mirror.next();
                self.timer.user_skip(&mut self.mirror);
            }
            Intent::PlayPause => {
                let snapshot = self.mirror.snapshot();
                if !snapshot.is_playing() && snapshot.can(Capability::CanPlay) {
                    self.timer.user_resume();
                }
                self.mirror.toggle_play_pause();
            }
            Intent::ToggleMinecraft => {
                self.toggles.minecraft_mode = !self.toggles.minecraft_mode;
                self.timer.set_enabled(self.toggles.minecraft_mode);
            }
            Intent::ToggleAlwaysOnTop => {
                self.toggles.always_on_top = !self.toggles.always_on_top;
            }
            Intent::ToggleConsole => {
                self.toggles.show_console = !self.toggles.show_console;
            }
            Intent::Minimize => ctx.send_viewport_cmd(egui::ViewportCommand::Minimized(true)),
            Intent::Close => ctx.send_viewport_cmd(egui::ViewportCommand::Close),
        }
    }

    fn repaint_interval(&self) -> Duration {
        if matches!(self.timer.state(), TimerState::PausedCounting { .. }) {
            COUNTDOWN_REPAINT.min(self.poll_interval)
        } else {
            self.poll_interval
        }
    }

    fn sync_cover(&mut self, ctx: &egui::Context) {
        let Some(bytes) = self.mirror.snapshot().artwork.clone() else {
            self.cover = None;
            return;
        };

        if let Some(cover) = &self.cover {
            if Arc::ptr_eq(&cover.bytes, &bytes) || cover.bytes == bytes {
                return;
            }
        }

        let texture = match decode_cover_image(&bytes) {
            Ok(image) => Some(ctx.load_texture("cover-art", image, TextureOptions::LINEAR)),
            Err(err) => {
                debug!(error = %err, "cover art not shown");
                None
            }
        };
        self.cover = Some(CoverArt { bytes, texture });
    }

    fn render(&mut self, ui: &mut egui::Ui) -> Vec<Intent> {
        let mut intents = Vec::new();
        self.control_rects.clear();
        let snapshot = self.mirror.snapshot().clone();

        ui.horizontal_top(|row| {
            self.paint_cover(row);
            row.add_space(14.0);
            row.vertical(|header| self.render_header(header, &snapshot));
            row.with_layout(egui::Layout::right_to_left(egui::Align::Min), |cluster| {
                self.render_window_controls(cluster, &mut intents);
            });
        });

        if self.toggles.minecraft_mode {
            ui.add_space(8.0);
            self.render_countdown(ui);
        }

        ui.add_space(12.0);
        self.render_transport(ui, &snapshot, &mut intents);

        if self.toggles.show_console {
            ui.add_space(10.0);
            self.render_console(ui);
        }
        intents
    }

    fn render_console(&self, ui: &mut egui::Ui) {
        egui::Frame::new()
            .fill(CONSOLE_BG)
            .corner_radius(CornerRadius::same(8))
            .inner_margin(egui::Margin::symmetric(8, 6))
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                for line in self.console.lines() {
                    let (marker, color) = if line.failed { ("✗", ERROR) } else { ("○", ACCENT) };
                    ui.label(
                        RichText::new(format!("{marker} {}", line.text))
                            .size(12.0)
                            .color(color),
                    );
                }
            });
    }

    fn paint_cover(&self, ui: &mut egui::Ui) {
        let size = egui::vec2(COVER_SIZE, COVER_SIZE);
        match self.cover.as_ref().and_then(|c| c.texture.as_ref()) {
            Some(texture) => {
                ui.add(
                    egui::Image::from_texture(texture)
                        .fit_to_exact_size(size)
                        .corner_radius(CornerRadius::same(12)),
                );
            }
            None => {
                let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());
                ui.painter()
                    .rect_filled(rect, CornerRadius::same(12), COVER_BG);
            }
        }
    }

    fn render_header(&self, ui: &mut egui::Ui, snapshot: &SessionSnapshot) {
        let title = snapshot.title.as_deref().unwrap_or("Nothing playing");
        ui.label(RichText::new(title).size(22.0).strong().color(FG));

        let meta: Vec<&str> = [snapshot.artist.as_deref(), snapshot.source_app.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !meta.is_empty() {
            ui.label(RichText::new(meta.join(" — ")).size(15.0).color(MUTED));
        }

        ui.add_space(4.0);
        ui.horizontal(|chips| {
            let dot = if snapshot.status == PlaybackStatus::Playing {
                OK
            } else {
                MUTED
            };
            chip(chips, snapshot.status.label(), Some(dot));
            if self.toggles.always_on_top {
                chip(chips, "AOT", None);
            }
            if self.toggles.minecraft_mode {
                chip(chips, "Minecraft mode", Some(ACCENT));
            }
        });
    }

    fn render_window_controls(&mut self, ui: &mut egui::Ui, intents: &mut Vec<Intent>) {
        let controls = [
            ("✕", "Close", Intent::Close, false),
            ("AOT", "Always on top", Intent::ToggleAlwaysOnTop, self.toggles.always_on_top),
            ("—", "Minimize", Intent::Minimize, false),
            (
                "Minecraft mode",
                "Pause between tracks",
                Intent::ToggleMinecraft,
                self.toggles.minecraft_mode,
            ),
        ];

        for (label, hint, intent, selected) in controls {
            let response = ui
                .add(egui::Button::new(RichText::new(label).color(FG)).selected(selected))
                .on_hover_text(hint);
            self.control_rects.push(response.rect);
            if response.clicked() {
                intents.push(intent);
            }
        }
    }

    fn render_countdown(&self, ui: &mut egui::Ui) {
        let width = ui.available_width().max(1.0);
        let (rect, _) = ui.allocate_exact_size(egui::vec2(width, 24.0), egui::Sense::hover());
        let painter = ui.painter();

        let bar = egui::Rect::from_min_size(
            egui::pos2(rect.left(), rect.bottom() - 5.0),
            egui::vec2(rect.width(), 5.0),
        );
        painter.rect_filled(bar, CornerRadius::same(3), TRACK_BG);

        let (Some(progress), Some(remaining)) = (self.timer.progress(), self.timer.remaining())
        else {
            return;
        };

        let fill_width = bar.width() * progress;
        if fill_width > 0.0 {
            let fill = egui::Rect::from_min_size(bar.min, egui::vec2(fill_width, bar.height()));
            painter.rect_filled(fill, CornerRadius::same(3), TIMER_FILL);
        }
        painter.text(
            egui::pos2(rect.right(), rect.top()),
            Align2::RIGHT_TOP,
            format_countdown(remaining),
            FontId::proportional(15.0),
            FG,
        );
    }

    fn render_transport(
        &mut self,
        ui: &mut egui::Ui,
        snapshot: &SessionSnapshot,
        intents: &mut Vec<Intent>,
    ) {
        let playing = snapshot.is_playing();
        let buttons = [
            (
                "⏮",
                "Previous track",
                Intent::Previous,
                snapshot.can(Capability::CanPrevious),
            ),
            (
                if playing { "⏸" } else { "▶" },
                if playing { "Pause" } else { "Play" },
                Intent::PlayPause,
                snapshot.can(Capability::CanPlay) || snapshot.can(Capability::CanPause),
            ),
            (
                "⏭",
                "Next track",
                Intent::Next,
                snapshot.can(Capability::CanNext),
            ),
        ];

        let row_width = 3.0 * TRANSPORT_BUTTON.x + 2.0 * TRANSPORT_SPACING;
        let margin = ((ui.available_width() - row_width) / 2.0).max(0.0);

        ui.horizontal(|row| {
            row.spacing_mut().item_spacing.x = TRANSPORT_SPACING;
            row.add_space(margin);
            for (glyph, hint, intent, enabled) in buttons {
                let response = row
                    .add_enabled(
                        enabled,
                        egui::Button::new(RichText::new(glyph).size(20.0).color(FG))
                            .min_size(TRANSPORT_BUTTON)
                            .corner_radius(CornerRadius::same(12)),
                    )
                    .on_hover_text(hint);
                self.control_rects.push(response.rect);
                if response.clicked() {
                    intents.push(intent);
                }
            }
        });
    }
}

impl eframe::App for OverlayApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        if !self.corners_applied {
            window::apply_rounded_corners(frame);
            self.corners_applied = true;
        }

        self.tick(Instant::now());
        self.window_level.apply(ctx, self.toggles.always_on_top);
        self.sync_cover(ctx);

        let mut panel_frame = egui::Frame::central_panel(&ctx.style());
        panel_frame.fill = BG;
        let mut intents = egui::CentralPanel::default()
            .frame(panel_frame)
            .show(ctx, |ui| self.render(ui))
            .inner;
        if ctx.input(|i| i.key_pressed(egui::Key::C)) {
            intents.push(Intent::ToggleConsole);
        }

        for intent in intents {
            self.handle_intent(ctx, intent);
        }

        window::handle_borderless_interactions(ctx, ctx.screen_rect(), &self.control_rects);
        ctx.request_repaint_after(self.repaint_interval());
    }
}

fn chip(ui: &mut egui::Ui, text: &str, dot: Option<Color32>) {
    let galley = ui
        .painter()
        .layout_no_wrap(text.to_owned(), FontId::proportional(12.0), FG);
    let dot_space = if dot.is_some() { 14.0 } else { 0.0 };
    let size = egui::vec2(galley.size().x + 16.0 + dot_space, 22.0);
    let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());

    let painter = ui.painter();
    painter.rect_filled(rect, CornerRadius::same(11), CHIP_BG);
    let mut x = rect.left() + 8.0;
    if let Some(color) = dot {
        painter.circle_filled(egui::pos2(x + 4.0, rect.center().y), 4.0, color);
        x += dot_space;
    }
    let y = rect.center().y - galley.size().y / 2.0;
    painter.galley(egui::pos2(x, y), galley, FG);
}

fn decode_cover_image(bytes: &[u8]) -> Result<ColorImage, String> {
    let image =
        image::load_from_memory(bytes).map_err(|e| format!("Failed to decode cover art: {e}"))?;
    let image = image.to_rgba8();
    let size = [image.width() as usize, image.height() as usize];
    let pixels = image.into_raw();
    Ok(ColorImage::from_rgba_unmultiplied(size, &pixels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use better_media_controller::{
        BackendError, RawControls, RawPlaybackStatus, RawSession, TransportCommand,
    };
    use std::{cell::RefCell, rc::Rc};

    #[derive(Default)]
    struct Shared {
        session: Option<RawSession>,
        sent: Vec<TransportCommand>,
    }

    struct SharedBackend(Rc<RefCell<Shared>>);

    impl MediaBackend for SharedBackend {
        fn query(&mut self) -> Result<Option<RawSession>, BackendError> {
            Ok(self.0.borrow().session.clone())
        }

        fn send(&mut self, command: TransportCommand) -> Result<(), BackendError> {
            self.0.borrow_mut().sent.push(command);
            Ok(())
        }
    }

    fn playing(title: &str) -> RawSession {
        RawSession {
            title: title.into(),
            artist: "C418".into(),
            status: RawPlaybackStatus::Playing,
            controls: RawControls {
                play: true,
                pause: true,
                next: true,
                previous: true,
            },
            ..Default::default()
        }
    }

    fn app_with(shared: &Rc<RefCell<Shared>>, minecraft: bool) -> OverlayApp {
        let mut config = Config::default();
        config.minecraft.delay = Duration::from_secs(5);
        config.minecraft.enabled = minecraft;
        OverlayApp::new(
            &config,
            Box::new(SharedBackend(Rc::clone(shared))),
            ConsoleBuffer::default(),
        )
    }

    #[test]
    fn decode_cover_image_fails_on_garbage_input() {
        assert!(decode_cover_image(&[0u8, 1, 2, 3]).is_err());
    }

    #[test]
    fn tick_polls_on_interval_and_feeds_timer() {
        let shared = Rc::new(RefCell::new(Shared {
            session: Some(playing("Sweden")),
            ..Default::default()
        }));
        let mut app = app_with(&shared, true);
        let start = Instant::now();

        app.tick(start);
        assert_eq!(app.timer.state(), TimerState::Idle);

        shared.borrow_mut().session = Some(playing("Wet Hands"));
        app.tick(start + Duration::from_millis(100));
        assert_eq!(app.timer.state(), TimerState::Idle, "poll not due yet");

        app.tick(start + Duration::from_secs(1));
        assert!(matches!(
            app.timer.state(),
            TimerState::PausedCounting { .. }
        ));
        assert_eq!(shared.borrow().sent, vec![TransportCommand::Pause]);

        app.tick(start + Duration::from_secs(7));
        assert_eq!(app.timer.state(), TimerState::Idle);
        assert_eq!(
            shared.borrow().sent,
            vec![TransportCommand::Pause, TransportCommand::Play]
        );
    }

    #[test]
    fn minecraft_toggle_intent_drops_countdown() {
        let ctx = egui::Context::default();
        let shared = Rc::new(RefCell::new(Shared {
            session: Some(playing("Sweden")),
            ..Default::default()
        }));
        let mut app = app_with(&shared, true);
        let start = Instant::now();
        app.tick(start);
        shared.borrow_mut().session = Some(playing("Mice on Venus"));
        app.tick(start + Duration::from_secs(1));
        assert!(app.timer.remaining().is_some());

        app.handle_intent(&ctx, Intent::ToggleMinecraft);
        assert!(!app.toggles.minecraft_mode);
        assert_eq!(app.timer.state(), TimerState::Disabled);

        app.tick(start + Duration::from_secs(30));
        assert_eq!(shared.borrow().sent, vec![TransportCommand::Pause]);
    }

    #[test]
    fn skip_during_countdown_resumes_without_new_pause() {
        let ctx = egui::Context::default();
        let shared = Rc::new(RefCell::new(Shared {
            session: Some(playing("Sweden")),
            ..Default::default()
        }));
        let mut app = app_with(&shared, true);
        let start = Instant::now();
        app.tick(start);
        shared.borrow_mut().session = Some(playing("Subwoofer Lullaby"));
        app.tick(start + Duration::from_secs(1));

        app.handle_intent(&ctx, Intent::Next);
        shared.borrow_mut().session = Some(playing("Living Mice"));
        app.tick(start + Duration::from_secs(2));

        assert_eq!(app.timer.state(), TimerState::Idle);
        assert_eq!(
            shared.borrow().sent,
            vec![
                TransportCommand::Pause,
                TransportCommand::Next,
                TransportCommand::Play
            ]
        );
    }

    #[test]
    fn play_pause_keeps_countdown_when_play_is_not_offered() {
        let ctx = egui::Context::default();
        let shared = Rc::new(RefCell::new(Shared {
            session: Some(playing("Sweden")),
            ..Default::default()
        }));
        let mut app = app_with(&shared, true);
        let start = Instant::now();
        app.tick(start);

        let mut pause_only = playing("Haggstrom");
        pause_only.status = RawPlaybackStatus::Paused;
        pause_only.controls.play = false;
        shared.borrow_mut().session = Some(pause_only);
        app.tick(start + Duration::from_secs(1));
        assert_eq!(app.timer.remaining(), Some(Duration::from_secs(5)));

        app.handle_intent(&ctx, Intent::PlayPause);
        assert_eq!(app.timer.remaining(), Some(Duration::from_secs(5)));
        assert_eq!(shared.borrow().sent, vec![TransportCommand::Pause]);
    }

    #[test]
    fn play_pause_during_countdown_resumes_and_cancels_it() {
        let ctx = egui::Context::default();
        let shared = Rc::new(RefCell::new(Shared {
            session: Some(playing("Sweden")),
            ..Default::default()
        }));
        let mut app = app_with(&shared, true);
        let start = Instant::now();
        app.tick(start);

        let mut paused = playing("Haggstrom");
        paused.status = RawPlaybackStatus::Paused;
        shared.borrow_mut().session = Some(paused);
        app.tick(start + Duration::from_secs(1));

        app.handle_intent(&ctx, Intent::PlayPause);
        assert_eq!(app.timer.state(), TimerState::Idle);
        assert_eq!(
            shared.borrow().sent,
            vec![TransportCommand::Pause, TransportCommand::Play]
        );
    }

    #[test]
    fn console_intent_flips_visibility() {
        let ctx = egui::Context::default();
        let shared = Rc::new(RefCell::new(Shared::default()));
        let mut app = app_with(&shared, false);
        assert!(!app.toggles.show_console);
        app.handle_intent(&ctx, Intent::ToggleConsole);
        assert!(app.toggles.show_console);
        app.handle_intent(&ctx, Intent::ToggleConsole);
        assert!(!app.toggles.show_console);
    }

    #[test]
    fn always_on_top_intent_flips_toggle_only() {
        let ctx = egui::Context::default();
        let shared = Rc::new(RefCell::new(Shared::default()));
        let mut app = app_with(&shared, false);
        app.handle_intent(&ctx, Intent::ToggleAlwaysOnTop);
        assert!(app.toggles.always_on_top);
        assert_eq!(app.timer.state(), TimerState::Disabled);
        assert!(shared.borrow().sent.is_empty());
    }
}
