//! Serializable engine state and the zip bundle that carries it.
//!
//! A snapshot holds every target with its variables, lists, visual state,
//! costumes and program graph. Running threads are not part of it: a
//! restored engine is idle until the next event. Costume bytes travel
//! beside the JSON (in the bundle as `<md5>.<ext>` entries).

use crate::costume::{Costume, DataFormat};
use crate::error::{LoadError, StructuralError};
use crate::program::{BlockId, Hat, Input, Program, ProgramBuilder};
use crate::target::{RotationStyle, Speech, Target, TargetId};
use crate::value::Value;
use crate::world::World;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::ZipArchive;

const BUNDLE_FORMAT: &str = "sbstage";
const BUNDLE_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub tick: u64,
    /// Creation order.
    pub targets: Vec<TargetSnapshot>,
    /// Sprites back to front.
    pub layers: Vec<TargetId>,
    /// Costume bytes keyed by `<md5>.<ext>`.
    #[serde(skip)]
    pub assets: BTreeMap<String, Arc<Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub id: TargetId,
    pub name: String,
    pub is_stage: bool,
    pub original: TargetId,
    pub variables: BTreeMap<String, Value>,
    pub lists: BTreeMap<String, Vec<Value>>,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub size: f64,
    pub rotation_style: RotationStyle,
    pub costume: usize,
    pub visible: bool,
    pub draggable: bool,
    pub speech: Option<Speech>,
    /// Clones share their original's costumes and program, so both are
    /// left out for them.
    #[serde(default)]
    pub costumes: Vec<CostumeRecord>,
    #[serde(default)]
    pub program: Option<ProgramSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostumeRecord {
    pub name: String,
    pub asset_id: String,
    pub data_format: DataFormat,
    pub md5ext: String,
    pub rotation_center_x: f64,
    pub rotation_center_y: f64,
    pub bitmap_resolution: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgramSnapshot {
    pub blocks: Vec<BlockRecord>,
    pub scripts: Vec<ScriptRecord>,
    pub procedures: Vec<ProcedureRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: BlockId,
    pub opcode: String,
    pub inputs: Vec<InputRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputRecord {
    Literal(Value),
    Block(BlockId),
    Substack(Option<BlockId>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub hat: Hat,
    pub body: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureRecord {
    pub name: String,
    pub params: Vec<String>,
    pub warp: bool,
    pub body: Option<BlockId>,
}

impl ProgramSnapshot {
    pub fn capture(program: &Program) -> Self {
        let blocks = program
            .blocks()
            .iter()
            .map(|b| BlockRecord {
                id: b.id,
                opcode: b.opcode.name().to_string(),
                inputs: b
                    .inputs
                    .iter()
                    .map(|i| match i {
                        Input::Literal(v) => InputRecord::Literal(v.clone()),
                        Input::Block(id) => InputRecord::Block(*id),
                        Input::Substack(head) => InputRecord::Substack(*head),
                    })
                    .collect(),
                field: b.field.clone(),
                next: b.next,
            })
            .collect();
        let scripts = program
            .scripts()
            .iter()
            .map(|s| ScriptRecord {
                hat: s.hat.clone(),
                body: s.body,
            })
            .collect();
        let procedures = program
            .procedures()
            .iter()
            .map(|p| ProcedureRecord {
                name: p.name.clone(),
                params: p.params.clone(),
                warp: p.warp,
                body: p.body,
            })
            .collect();
        Self {
            blocks,
            scripts,
            procedures,
        }
    }

    /// Rebuilds the program through [`ProgramBuilder`], so a tampered
    /// snapshot is rejected exactly like a malformed editor program.
    pub fn restore(&self, target: &str) -> Result<Program, LoadError> {
        let structural = |source: StructuralError| LoadError::Structural {
            target: target.to_string(),
            source,
        };
        let mut builder = ProgramBuilder::new();
        for record in &self.blocks {
            let inputs = record
                .inputs
                .iter()
                .map(|i| match i {
                    InputRecord::Literal(v) => Input::Literal(v.clone()),
                    InputRecord::Block(id) => Input::Block(*id),
                    InputRecord::Substack(head) => Input::Substack(*head),
                })
                .collect();
            let id = builder
                .push_named(&record.opcode, inputs, record.field.as_deref())
                .map_err(structural)?;
            if id != record.id {
                return Err(structural(StructuralError::BlockIdMismatch {
                    block: record.id,
                    expected: id,
                }));
            }
            builder.set_next(id, record.next);
        }
        for script in &self.scripts {
            builder.script(script.hat.clone(), script.body);
        }
        for procedure in &self.procedures {
            builder.procedure(
                &procedure.name,
                procedure.params.clone(),
                procedure.warp,
                procedure.body,
            );
        }
        builder.build().map_err(structural)
    }
}

impl EngineSnapshot {
    pub fn capture(world: &World, tick: u64) -> Self {
        let mut assets = BTreeMap::new();
        let mut targets = Vec::with_capacity(world.len());
        for target in world.targets() {
            let (costumes, program) = if target.is_clone() {
                (Vec::new(), None)
            } else {
                let costumes = target
                    .costumes
                    .iter()
                    .map(|c| {
                        assets.insert(c.md5ext(), Arc::clone(&c.data));
                        CostumeRecord {
                            name: c.name.clone(),
                            asset_id: c.asset_id.clone(),
                            data_format: c.data_format,
                            md5ext: c.md5ext(),
                            rotation_center_x: c.rotation_center_x,
                            rotation_center_y: c.rotation_center_y,
                            bitmap_resolution: c.bitmap_resolution,
                        }
                    })
                    .collect();
                (costumes, Some(ProgramSnapshot::capture(&target.program)))
            };
            targets.push(TargetSnapshot {
                id: target.id,
                name: target.name.clone(),
                is_stage: target.is_stage,
                original: target.original,
                variables: target.variables.clone(),
                lists: target.lists.clone(),
                x: target.x,
                y: target.y,
                direction: target.direction,
                size: target.size,
                rotation_style: target.rotation_style,
                costume: target.costume,
                visible: target.visible,
                draggable: target.draggable,
                speech: target.speech.clone(),
                costumes,
                program,
            });
        }
        Self {
            tick,
            targets,
            layers: world.layers().to_vec(),
            assets,
        }
    }

    /// Rebuilds a world. Program graphs are re-validated; costumes whose
    /// bytes are missing are kept with empty data and will not draw.
    pub fn restore(&self, world: &mut World) -> Result<(), LoadError> {
        let mut targets = self.targets.clone();
        targets.sort_by_key(|t| t.id);
        if targets.iter().filter(|t| t.is_stage).count() > 1 {
            return Err(LoadError::SecondStage);
        }
        for record in &targets {
            let target = if record.original == record.id {
                self.restore_original(record)?
            } else {
                let original = world
                    .target(record.original)
                    .ok_or(LoadError::UnknownTarget(record.original))?;
                let mut clone = original.clone_as(record.id);
                apply_state(&mut clone, record);
                clone
            };
            world.restore(target);
        }
        if !world.set_layers(&self.layers) {
            warn!("snapshot layer order does not match its sprites; using creation order");
        }
        Ok(())
    }

    fn restore_original(&self, record: &TargetSnapshot) -> Result<Target, LoadError> {
        let program = match &record.program {
            Some(program) => program.restore(&record.name)?,
            None => Program::empty(),
        };
        let mut target = Target::new(record.id, &record.name, record.is_stage, Arc::new(program));
        let costumes = record
            .costumes
            .iter()
            .map(|c| self.restore_costume(c))
            .collect();
        target.costumes = Arc::new(costumes);
        apply_state(&mut target, record);
        Ok(target)
    }

    fn restore_costume(&self, record: &CostumeRecord) -> Costume {
        let data = match self.assets.get(&record.md5ext) {
            Some(data) => Arc::clone(data),
            None => {
                warn!("snapshot is missing asset '{}'", record.md5ext);
                Arc::new(Vec::new())
            }
        };
        Costume {
            name: record.name.clone(),
            asset_id: record.asset_id.clone(),
            data_format: record.data_format,
            data,
            rotation_center_x: record.rotation_center_x,
            rotation_center_y: record.rotation_center_y,
            bitmap_resolution: record.bitmap_resolution,
        }
    }
}

fn apply_state(target: &mut Target, record: &TargetSnapshot) {
    target.variables = record.variables.clone();
    target.lists = record.lists.clone();
    target.x = record.x;
    target.y = record.y;
    target.direction = record.direction;
    target.size = record.size;
    target.rotation_style = record.rotation_style;
    target.visible = record.visible;
    target.draggable = record.draggable;
    target.speech = record.speech.clone();
    target.set_costume(record.costume as i64);
}

pub fn write_bundle(path: &Path, snapshot: &EngineSnapshot) -> Result<(), LoadError> {
    let bytes = build_bundle_bytes(snapshot)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

pub fn build_bundle_bytes(snapshot: &EngineSnapshot) -> Result<Vec<u8>, LoadError> {
    let mut out = Cursor::new(Vec::<u8>::new());
    let mut zip = zip::ZipWriter::new(&mut out);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "version": BUNDLE_VERSION,
        "state": "state.json",
        "assets": snapshot.assets.keys().collect::<Vec<_>>(),
    });
    zip.start_file("manifest.json", opts)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    zip.start_file("state.json", opts)?;
    zip.write_all(serde_json::to_string_pretty(snapshot)?.as_bytes())?;

    for (name, data) in &snapshot.assets {
        zip.start_file(name.as_str(), opts)?;
        zip.write_all(data)?;
    }
    zip.finish()?;
    Ok(out.into_inner())
}

pub fn read_bundle(path: &Path) -> Result<EngineSnapshot, LoadError> {
    let bytes = fs::read(path)?;
    read_bundle_bytes(&bytes)
}

pub fn read_bundle_bytes(bytes: &[u8]) -> Result<EngineSnapshot, LoadError> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))
        .map_err(|_| LoadError::Snapshot("input is not a valid bundle archive".to_string()))?;

    let manifest: serde_json::Value =
        serde_json::from_slice(&read_entry(&mut zip, "manifest.json")?)?;
    let format = manifest
        .get("format")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if format != BUNDLE_FORMAT {
        return Err(LoadError::Snapshot(format!(
            "invalid bundle format '{}'",
            format
        )));
    }
    let version = manifest
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or_default();
    if version != BUNDLE_VERSION {
        return Err(LoadError::Snapshot(format!(
            "unsupported bundle version {} (expected {})",
            version, BUNDLE_VERSION
        )));
    }

    let mut snapshot: EngineSnapshot = serde_json::from_slice(&read_entry(&mut zip, "state.json")?)?;
    let wanted: Vec<String> = snapshot
        .targets
        .iter()
        .flat_map(|t| t.costumes.iter().map(|c| c.md5ext.clone()))
        .collect();
    for name in wanted {
        if snapshot.assets.contains_key(&name) {
            continue;
        }
        match read_entry(&mut zip, &name) {
            Ok(data) => {
                snapshot.assets.insert(name, Arc::new(data));
            }
            Err(err) => warn!("bundle asset '{}' unreadable: {}", name, err),
        }
    }
    Ok(snapshot)
}

fn read_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, LoadError> {
    let mut entry = zip
        .by_name(name)
        .map_err(|_| LoadError::Snapshot(format!("missing '{}' in bundle", name)))?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}
