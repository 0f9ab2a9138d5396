use egui::Context;

use crate::model::{Camera, LoadStatus};

/// What the overlay shows for the current frame
pub struct HudInfo<'a> {
    pub camera: &'a Camera,
    pub status: &'a LoadStatus,
    pub fps: f32,
    pub pointer_locked: bool,
    pub object_id: &'a str,
}

/// Frames per second averaged over roughly one second
#[derive(Debug, Default)]
pub struct FpsCounter {
    frames: u32,
    elapsed: f32,
    fps: f32,
}

impl FpsCounter {
    pub fn tick(&mut self, dt: f32) -> f32 {
        self.frames += 1;
        self.elapsed += dt.max(0.0);
        if self.elapsed >= 1.0 {
            self.fps = self.frames as f32 / self.elapsed;
            self.frames = 0;
            self.elapsed = 0.0;
        }
        self.fps
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

/// Raw input for a canvas that does not forward pointer events to egui
pub fn canvas_raw_input(canvas_width: u32, canvas_height: u32, now_ms: f64) -> egui::RawInput {
    let mut raw_input = egui::RawInput::default();
    raw_input.time = Some(now_ms / 1000.0);
    raw_input.screen_rect = Some(egui::Rect::from_min_size(
        egui::Pos2::new(0.0, 0.0),
        egui::vec2(canvas_width as f32, canvas_height as f32),
    ));
    raw_input
}

/// Build the complete UI and return egui output
pub fn build_ui(egui_ctx: &Context, raw_input: egui::RawInput, info: &HudInfo) -> egui::FullOutput {
    egui_ctx.run(raw_input, |ctx| {
        if info.pointer_locked {
            draw_crosshair(ctx);
        }
        draw_status_window(ctx, info);
    })
}

pub fn status_line(status: &LoadStatus) -> String {
    match status {
        LoadStatus::Loading(progress) if progress.total == 0 => "Loading...".to_string(),
        LoadStatus::Loading(progress) => format!("Loading {:.0}%", progress.fraction() * 100.0),
        LoadStatus::Loaded(_) => "Uploading scene".to_string(),
        LoadStatus::Attached { objects, triangles } => format!("{objects} objects, {triangles} triangles"),
        LoadStatus::Failed(e) => format!("Load failed: {e}"),
    }
}

fn draw_crosshair(ctx: &Context) {
    let painter = ctx.layer_painter(egui::LayerId::new(egui::Order::TOP, egui::Id::new("crosshair")));
    let center = ctx.available_rect().center();
    let size = 6.0;
    let stroke = egui::Stroke::new(1.0, egui::Color32::WHITE);
    painter.line_segment([egui::Pos2::new(center.x - size, center.y), egui::Pos2::new(center.x + size, center.y)], stroke);
    painter.line_segment([egui::Pos2::new(center.x, center.y - size), egui::Pos2::new(center.x, center.y + size)], stroke);
}

fn draw_status_window(ctx: &Context, info: &HudInfo) {
    let eye = info.camera.eye;
    let failed = matches!(info.status, LoadStatus::Failed(_));

    egui::Window::new(format!("Walkthrough: {}", info.object_id))
        .default_pos([8.0, 8.0])
        .resizable(false)
        .show(ctx, |ui| {
            ui.label(egui::RichText::new(format!("FPS: {:.0}", info.fps)).small());
            ui.label(egui::RichText::new(format!("Pos: x: {:.2} y: {:.2} z: {:.2}", eye.x, eye.y, eye.z)).small());
            ui.label(
                egui::RichText::new(format!(
                    "Yaw: {:.1} Pitch: {:.1}",
                    info.camera.yaw.to_degrees(),
                    info.camera.pitch.to_degrees()
                ))
                .small(),
            );

            let status = egui::RichText::new(status_line(info.status)).small();
            ui.label(if failed { status.color(egui::Color32::LIGHT_RED) } else { status });

            ui.separator();
            ui.label(egui::RichText::new("Controls:").small());
            ui.label(egui::RichText::new("WASD / Arrows - Walk").small());
            ui.label(egui::RichText::new("Shift - Sprint").small());
            ui.label(egui::RichText::new("Click - Look around").small());
            ui.label(egui::RichText::new("Drag / Joystick - Touch controls").small());
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LoadProgress;

    #[test]
    fn test_fps_counter_averages_over_a_second() {
        let mut fps = FpsCounter::default();
        for _ in 0..59 {
            assert_eq!(fps.tick(1.0 / 60.0), 0.0, "no estimate before a full second");
        }
        let estimate = fps.tick(1.0 / 60.0 + 1e-4);
        assert!((estimate - 60.0).abs() < 0.5, "estimate was {estimate}");
        assert_eq!(fps.fps(), estimate);
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(&LoadStatus::default()), "Loading...");
        let half = LoadStatus::Loading(LoadProgress { loaded: 50, total: 100 });
        assert_eq!(status_line(&half), "Loading 50%");
        let attached = LoadStatus::Attached { objects: 3, triangles: 12 };
        assert_eq!(status_line(&attached), "3 objects, 12 triangles");
        assert!(status_line(&LoadStatus::Failed("not found".into())).contains("not found"));
    }

    #[test]
    fn test_hud_builds_headless() {
        let ctx = Context::default();
        let camera = Camera::new(800, 600);
        let status = LoadStatus::default();
        let info = HudInfo { camera: &camera, status: &status, fps: 60.0, pointer_locked: true, object_id: "u" };
        let output = build_ui(&ctx, canvas_raw_input(800, 600, 0.0), &info);
        assert!(!output.shapes.is_empty(), "HUD should paint something");
    }
}
