//! Composites the stage onto a drawing surface after each tick.

use crate::costume::{Bitmap, Costume};
use crate::target::{RotationStyle, Target, TargetId};
use crate::world::World;
use log::warn;
use std::collections::HashMap;
use std::io::Write;

/// Placement of one costume bitmap on the stage. Coordinates are stage
/// units with the origin at the centre and y pointing up; `rotation` is in
/// degrees clockwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Point of the bitmap that sits on `(x, y)`.
    pub center_x: f64,
    pub center_y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub target: TargetId,
    pub name: String,
    pub costume: String,
    /// `<md5>.<ext>` of the costume asset.
    pub asset: String,
    pub bitmap: Bitmap,
    pub transform: Transform,
    pub speech: Option<String>,
}

/// The canvas a [`Renderer`] draws on.
pub trait Surface {
    fn begin_frame(&mut self, width: f64, height: f64);
    fn blit(&mut self, command: &DrawCommand);
    fn end_frame(&mut self) {}
}

/// Decodes costumes at most once per (costume set, index) and walks the
/// world in drawing order. Never mutates the world.
#[derive(Debug, Default)]
pub struct Renderer {
    cache: HashMap<(TargetId, usize), Option<Bitmap>>,
    decodes: usize,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets decoded costumes, e.g. after the world was replaced.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Number of decodes performed so far; cached lookups do not count.
    pub fn decode_count(&self) -> usize {
        self.decodes
    }

    pub fn render(&mut self, world: &World, stage_width: f64, stage_height: f64, surface: &mut dyn Surface) {
        surface.begin_frame(stage_width, stage_height);
        if let Some(stage) = world.stage() {
            if let Some(command) = self.command_for(stage) {
                surface.blit(&command);
            }
        }
        for id in world.layers() {
            let Some(target) = world.target(*id) else {
                continue;
            };
            if !target.visible {
                continue;
            }
            if let Some(command) = self.command_for(target) {
                surface.blit(&command);
            }
        }
        surface.end_frame();
    }

    fn command_for(&mut self, target: &Target) -> Option<DrawCommand> {
        let costume = target.current_costume()?;
        let bitmap = self.bitmap(target, costume)?;
        Some(DrawCommand {
            target: target.id,
            name: target.name.clone(),
            costume: costume.name.clone(),
            asset: costume.md5ext(),
            bitmap,
            transform: transform_of(target, costume),
            speech: target.speech.as_ref().map(|s| s.text.clone()),
        })
    }

    fn bitmap(&mut self, target: &Target, costume: &Costume) -> Option<Bitmap> {
        let key = (target.original, target.costume);
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }
        self.decodes += 1;
        let decoded = match costume.decode() {
            Ok(bitmap) => Some(bitmap),
            Err(err) => {
                warn!(
                    "cannot decode costume '{}' of '{}', not drawing it: {}",
                    costume.name, target.name, err
                );
                None
            }
        };
        self.cache.insert(key, decoded);
        decoded
    }
}

fn transform_of(target: &Target, costume: &Costume) -> Transform {
    let resolution = costume.bitmap_resolution.max(1) as f64;
    let center_x = costume.rotation_center_x / resolution;
    let center_y = costume.rotation_center_y / resolution;
    if target.is_stage {
        return Transform {
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            center_x,
            center_y,
        };
    }
    let scale = target.size / 100.0;
    let (rotation, flip) = match target.rotation_style {
        RotationStyle::AllAround => (target.direction - 90.0, 1.0),
        RotationStyle::LeftRight => (0.0, if target.direction < 0.0 { -1.0 } else { 1.0 }),
        RotationStyle::DontRotate => (0.0, 1.0),
    };
    Transform {
        x: target.x,
        y: target.y,
        rotation,
        scale_x: scale * flip,
        scale_y: scale,
        center_x,
        center_y,
    }
}

/// Keeps every frame it is given. Handy for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub frames: Vec<Vec<DrawCommand>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> Option<&[DrawCommand]> {
        self.frames.last().map(|f| f.as_slice())
    }
}

impl Surface for RecordingSurface {
    fn begin_frame(&mut self, _width: f64, _height: f64) {
        self.frames.push(Vec::new());
    }

    fn blit(&mut self, command: &DrawCommand) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(command.clone());
        }
    }
}

/// Writes one text line per draw call.
pub struct TextSurface<W: Write> {
    out: W,
    frame: u64,
}

impl<W: Write> TextSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out, frame: 0 }
    }

    fn line(&mut self, text: String) {
        if let Err(err) = writeln!(self.out, "{}", text) {
            warn!("render log write failed: {}", err);
        }
    }
}

impl<W: Write> Surface for TextSurface<W> {
    fn begin_frame(&mut self, width: f64, height: f64) {
        self.frame += 1;
        self.line(format!("frame {} ({}x{})", self.frame, width, height));
    }

    fn blit(&mut self, command: &DrawCommand) {
        let t = &command.transform;
        let mut text = format!(
            "  {} [{}] at ({}, {}) rot {} scale {}",
            command.name, command.costume, t.x, t.y, t.rotation, t.scale_y
        );
        if let Some(speech) = &command.speech {
            text.push_str(&format!(" says \"{}\"", speech));
        }
        self.line(text);
    }

    fn end_frame(&mut self) {
        if let Err(err) = self.out.flush() {
            warn!("render log flush failed: {}", err);
        }
    }
}
