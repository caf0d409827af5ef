use eframe::egui::{self, PointerButton, ResizeDirection, ViewportCommand, WindowLevel};

#[cfg(target_os = "windows")]
use raw_window_handle::{HasWindowHandle, RawWindowHandle};
#[cfg(target_os = "windows")]
use windows::Win32::{
    Foundation::HWND,
    Graphics::Dwm::{
        DwmSetWindowAttribute, DWMWA_WINDOW_CORNER_PREFERENCE, DWMWCP_ROUND, DWMWINDOWATTRIBUTE,
    },
};

const RESIZE_EDGE: f32 = 6.0;

/// Sends a window-level command only when the wanted level changes.
#[derive(Debug, Default)]
pub struct WindowLevelSync {
    last: Option<WindowLevel>,
}

impl WindowLevelSync {
    pub fn apply(&mut self, ctx: &egui::Context, always_on_top: bool) {
        let desired = if always_on_top {
            WindowLevel::AlwaysOnTop
        } else {
            WindowLevel::Normal
        };

        if self.last != Some(desired) {
            ctx.send_viewport_cmd(ViewportCommand::WindowLevel(desired));
            self.last = Some(desired);
        }
    }
}

/// Rounds the corners of the undecorated window on Windows 11.
#[cfg(target_os = "windows")]
pub fn apply_rounded_corners(frame: &eframe::Frame) {
    let Some(hwnd) = native_window(frame) else {
        return;
    };
    if let Err(err) = set_dwm_attribute(hwnd, DWMWA_WINDOW_CORNER_PREFERENCE, &DWMWCP_ROUND) {
        tracing::debug!(error = ?err, "rounded corners unavailable");
    }
}

#[cfg(target_os = "windows")]
fn native_window(frame: &eframe::Frame) -> Option<HWND> {
    match frame.window_handle().ok()?.as_raw() {
        RawWindowHandle::Win32(handle) => Some(HWND(handle.hwnd.get() as *mut _)),
        _ => None,
    }
}

#[cfg(target_os = "windows")]
fn set_dwm_attribute<T>(
    hwnd: HWND,
    attribute: DWMWINDOWATTRIBUTE,
    value: &T,
) -> windows::core::Result<()> {
    unsafe {
        DwmSetWindowAttribute(
            hwnd,
            attribute,
            std::ptr::from_ref(value).cast(),
            std::mem::size_of::<T>() as u32,
        )
    }
}

#[cfg(not(target_os = "windows"))]
pub fn apply_rounded_corners(_frame: &eframe::Frame) {}

fn resize_direction(rect: egui::Rect, pos: egui::Pos2) -> Option<ResizeDirection> {
    let near_left = pos.x <= rect.left() + RESIZE_EDGE;
    let near_right = pos.x >= rect.right() - RESIZE_EDGE;
    let near_top = pos.y <= rect.top() + RESIZE_EDGE;
    let near_bottom = pos.y >= rect.bottom() - RESIZE_EDGE;

    if near_left && near_top {
        Some(ResizeDirection::NorthWest)
    } else if near_right && near_top {
        Some(ResizeDirection::NorthEast)
    } else if near_left && near_bottom {
        Some(ResizeDirection::SouthWest)
    } else if near_right && near_bottom {
        Some(ResizeDirection::SouthEast)
    } else if near_left {
        Some(ResizeDirection::West)
    } else if near_right {
        Some(ResizeDirection::East)
    } else if near_top {
        Some(ResizeDirection::North)
    } else if near_bottom {
        Some(ResizeDirection::South)
    } else {
        None
    }
}

fn resize_cursor(direction: ResizeDirection) -> egui::CursorIcon {
    match direction {
        ResizeDirection::North => egui::CursorIcon::ResizeNorth,
        ResizeDirection::South => egui::CursorIcon::ResizeSouth,
        ResizeDirection::East => egui::CursorIcon::ResizeEast,
        ResizeDirection::West => egui::CursorIcon::ResizeWest,
        ResizeDirection::NorthEast => egui::CursorIcon::ResizeNorthEast,
        ResizeDirection::SouthEast => egui::CursorIcon::ResizeSouthEast,
        ResizeDirection::NorthWest => egui::CursorIcon::ResizeNorthWest,
        ResizeDirection::SouthWest => egui::CursorIcon::ResizeSouthWest,
    }
}

/// Edge resizing and drag-to-move for the borderless overlay.
///
/// Any press on the background moves the window; `controls` are the rects of
/// widgets drawn this frame, which keep their clicks.
pub fn handle_borderless_interactions(
    ctx: &egui::Context,
    root_rect: egui::Rect,
    controls: &[egui::Rect],
) {
    let (pointer_pos, primary_pressed) = ctx.input(|i| {
        (
            i.pointer.latest_pos(),
            i.pointer.button_pressed(PointerButton::Primary),
        )
    });

    let Some(pos) = pointer_pos else {
        return;
    };
    if !root_rect.expand(RESIZE_EDGE).contains(pos) {
        return;
    }

    if let Some(direction) = resize_direction(root_rect, pos) {
        ctx.set_cursor_icon(resize_cursor(direction));
        if primary_pressed && !ctx.is_using_pointer() {
            ctx.send_viewport_cmd(ViewportCommand::BeginResize(direction));
        }
        return;
    }

    let over_control = controls.iter().any(|rect| rect.contains(pos));
    if primary_pressed && !over_control && !ctx.is_using_pointer() {
        ctx.send_viewport_cmd(ViewportCommand::StartDrag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> egui::Rect {
        egui::Rect::from_min_size(egui::pos2(0.0, 0.0), egui::vec2(500.0, 200.0))
    }

    #[test]
    fn corners_win_over_edges() {
        assert!(matches!(
            resize_direction(window(), egui::pos2(2.0, 2.0)),
            Some(ResizeDirection::NorthWest)
        ));
        assert!(matches!(
            resize_direction(window(), egui::pos2(499.0, 199.0)),
            Some(ResizeDirection::SouthEast)
        ));
    }

    #[test]
    fn interior_is_not_a_resize_zone() {
        assert!(resize_direction(window(), egui::pos2(250.0, 100.0)).is_none());
        assert!(matches!(
            resize_direction(window(), egui::pos2(250.0, 198.0)),
            Some(ResizeDirection::South)
        ));
    }
}
