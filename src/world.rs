//! The sprite/stage model: every live target, their variables and their
//! drawing order.

use crate::costume::Costume;
use crate::error::LoadError;
use crate::program::Program;
use crate::target::{Target, TargetId};
use crate::value::Value;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct World {
    targets: BTreeMap<TargetId, Target>,
    stage: Option<TargetId>,
    /// Sprites and clones, back to front. The stage is always behind them.
    layers: Vec<TargetId>,
    next_id: u64,
    stage_width: f64,
    stage_height: f64,
    fence_sprites: bool,
}

impl World {
    pub fn new(stage_width: f64, stage_height: f64, fence_sprites: bool) -> Self {
        Self {
            targets: BTreeMap::new(),
            stage: None,
            layers: Vec::new(),
            next_id: 1,
            stage_width,
            stage_height,
            fence_sprites,
        }
    }

    fn allocate_id(&mut self) -> TargetId {
        let id = TargetId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_stage(
        &mut self,
        name: &str,
        program: Arc<Program>,
        costumes: Vec<Costume>,
    ) -> Result<TargetId, LoadError> {
        if self.stage.is_some() {
            return Err(LoadError::SecondStage);
        }
        self.check_unique_name(name)?;
        let id = self.allocate_id();
        let mut stage = Target::new(id, name, true, program);
        stage.costumes = Arc::new(costumes);
        self.targets.insert(id, stage);
        self.stage = Some(id);
        Ok(id)
    }

    /// Adds a sprite in front of everything drawn so far.
    pub fn add_sprite(
        &mut self,
        name: &str,
        program: Arc<Program>,
        costumes: Vec<Costume>,
    ) -> Result<TargetId, LoadError> {
        if self.stage.is_none() {
            return Err(LoadError::MissingStage);
        }
        self.check_unique_name(name)?;
        let id = self.allocate_id();
        let mut sprite = Target::new(id, name, false, program);
        sprite.costumes = Arc::new(costumes);
        self.targets.insert(id, sprite);
        self.layers.push(id);
        Ok(id)
    }

    /// Re-inserts a target restored from a snapshot, keeping its id.
    pub(crate) fn restore(&mut self, target: Target) {
        let id = target.id;
        self.next_id = self.next_id.max(id.0 + 1);
        if target.is_stage {
            self.stage = Some(id);
        } else {
            self.layers.push(id);
        }
        self.targets.insert(id, target);
    }

    /// Replaces the drawing order if `layers` names exactly the current
    /// sprites. Returns false (leaving the order alone) otherwise.
    pub(crate) fn set_layers(&mut self, layers: &[TargetId]) -> bool {
        let mut wanted = layers.to_vec();
        let mut current = self.layers.clone();
        wanted.sort();
        current.sort();
        if wanted != current {
            return false;
        }
        self.layers = layers.to_vec();
        true
    }

    fn check_unique_name(&self, name: &str) -> Result<(), LoadError> {
        let lowered = name.to_lowercase();
        if self
            .targets
            .values()
            .any(|t| !t.is_clone() && t.name.to_lowercase() == lowered)
        {
            return Err(LoadError::DuplicateTarget(name.to_string()));
        }
        Ok(())
    }

    pub fn set_program(&mut self, id: TargetId, program: Arc<Program>) -> Result<(), LoadError> {
        let target = self
            .targets
            .get_mut(&id)
            .ok_or(LoadError::UnknownTarget(id))?;
        if target.is_clone() {
            return Err(LoadError::CloneProgram(id));
        }
        target.program = program;
        Ok(())
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(&id)
    }

    pub fn target_mut(&mut self, id: TargetId) -> Option<&mut Target> {
        self.targets.get_mut(&id)
    }

    pub fn stage_id(&self) -> Option<TargetId> {
        self.stage
    }

    pub fn stage(&self) -> Option<&Target> {
        self.stage.and_then(|id| self.targets.get(&id))
    }

    /// Finds a non-clone target by name, ignoring case.
    pub fn find_by_name(&self, name: &str) -> Option<TargetId> {
        let lowered = name.to_lowercase();
        self.targets
            .values()
            .find(|t| !t.is_clone() && t.name.to_lowercase() == lowered)
            .map(|t| t.id)
    }

    /// All targets in creation order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn clone_count(&self) -> usize {
        self.targets.values().filter(|t| t.is_clone()).count()
    }

    /// Sprites back to front.
    pub fn layers(&self) -> &[TargetId] {
        &self.layers
    }

    /// Drawing position: 0 for the stage, then 1.. from back to front.
    /// Deleted targets sort after everything.
    pub fn layer_order(&self, id: TargetId) -> usize {
        if Some(id) == self.stage {
            return 0;
        }
        match self.layers.iter().position(|l| *l == id) {
            Some(index) => index + 1,
            None => usize::MAX,
        }
    }

    /// Local-first lookup falling back to the stage's globals. Unknown names
    /// read as the empty value.
    pub fn get_variable(&self, id: TargetId, name: &str) -> Value {
        if let Some(value) = self.target(id).and_then(|t| t.variables.get(name)) {
            return value.clone();
        }
        if let Some(value) = self.stage().and_then(|s| s.variables.get(name)) {
            return value.clone();
        }
        debug!("read of unknown variable '{}' from target {}", name, id);
        Value::empty()
    }

    /// Writes the local variable if there is one, else the global. A name
    /// that exists in neither scope is created on the writing target.
    pub fn set_variable(&mut self, id: TargetId, name: &str, value: Value) {
        let local = self
            .target(id)
            .map(|t| t.variables.contains_key(name))
            .unwrap_or(false);
        let owner = if local {
            Some(id)
        } else if self
            .stage()
            .map(|s| s.variables.contains_key(name))
            .unwrap_or(false)
        {
            self.stage
        } else {
            debug!("creating undeclared variable '{}' on target {}", name, id);
            Some(id)
        };
        if let Some(target) = owner.and_then(|owner| self.targets.get_mut(&owner)) {
            target.variables.insert(name.to_string(), value);
        }
    }

    pub fn change_variable(&mut self, id: TargetId, name: &str, delta: &Value) {
        let current = self.get_variable(id, name);
        self.set_variable(id, name, Value::Number(current.to_number() + delta.to_number()));
    }

    pub fn list(&self, id: TargetId, name: &str) -> Option<&Vec<Value>> {
        self.target(id)
            .and_then(|t| t.lists.get(name))
            .or_else(|| self.stage().and_then(|s| s.lists.get(name)))
    }

    /// Mutable list with the same scoping as [`World::set_variable`].
    pub fn list_mut(&mut self, id: TargetId, name: &str) -> Option<&mut Vec<Value>> {
        let local = self
            .target(id)
            .map(|t| t.lists.contains_key(name))
            .unwrap_or(false);
        let global = self
            .stage()
            .map(|s| s.lists.contains_key(name))
            .unwrap_or(false);
        let owner = if local || !global { id } else { self.stage? };
        let target = self.targets.get_mut(&owner)?;
        if !target.lists.contains_key(name) {
            debug!("creating undeclared list '{}' on target {}", name, owner);
        }
        Some(target.lists.entry(name.to_string()).or_default())
    }

    pub fn move_by(&mut self, id: TargetId, dx: f64, dy: f64) {
        let (x, y) = match self.target(id) {
            Some(t) => (t.x + dx, t.y + dy),
            None => return,
        };
        self.move_to(id, x, y);
    }

    pub fn move_to(&mut self, id: TargetId, x: f64, y: f64) {
        let fence = self.fence_sprites;
        let (half_w, half_h) = (self.stage_width / 2.0, self.stage_height / 2.0);
        let Some(target) = self.targets.get_mut(&id) else {
            return;
        };
        if target.is_stage || !x.is_finite() || !y.is_finite() {
            return;
        }
        if fence {
            target.x = x.clamp(-half_w, half_w);
            target.y = y.clamp(-half_h, half_h);
        } else {
            target.x = x;
            target.y = y;
        }
    }

    pub fn set_costume(&mut self, id: TargetId, index: i64) {
        if let Some(target) = self.targets.get_mut(&id) {
            target.set_costume(index);
        }
    }

    /// Creates a clone of `parent` drawn directly behind it. Refused (with a
    /// warning) once `limit` clones exist, or when `parent` is the stage.
    pub fn spawn_clone(&mut self, parent: TargetId, limit: usize) -> Option<TargetId> {
        let source = self.targets.get(&parent)?;
        if source.is_stage {
            warn!("the stage cannot be cloned");
            return None;
        }
        if self.clone_count() >= limit {
            warn!(
                "clone limit of {} reached; not cloning '{}'",
                limit, source.name
            );
            return None;
        }
        let id = TargetId(self.next_id);
        let clone = source.clone_as(id);
        self.next_id += 1;
        let position = self
            .layers
            .iter()
            .position(|l| *l == parent)
            .unwrap_or(0);
        self.layers.insert(position, id);
        self.targets.insert(id, clone);
        debug!("spawned clone {} of target {}", id, parent);
        Some(id)
    }

    /// Removes a clone. Returns false for originals and unknown ids.
    pub fn delete_clone(&mut self, id: TargetId) -> bool {
        match self.targets.get(&id) {
            Some(t) if t.is_clone() => {}
            _ => return false,
        }
        self.targets.remove(&id);
        self.layers.retain(|l| *l != id);
        debug!("deleted clone {}", id);
        true
    }

    pub fn delete_all_clones(&mut self) -> Vec<TargetId> {
        let clones: Vec<TargetId> = self
            .targets
            .values()
            .filter(|t| t.is_clone())
            .map(|t| t.id)
            .collect();
        for id in &clones {
            self.delete_clone(*id);
        }
        clones
    }

    pub fn go_to_front(&mut self, id: TargetId) {
        if let Some(index) = self.layers.iter().position(|l| *l == id) {
            let moved = self.layers.remove(index);
            self.layers.push(moved);
        }
    }

    pub fn go_to_back(&mut self, id: TargetId) {
        if let Some(index) = self.layers.iter().position(|l| *l == id) {
            let moved = self.layers.remove(index);
            self.layers.insert(0, moved);
        }
    }

    /// Moves a sprite `delta` layers towards the front (negative: back).
    pub fn change_layer(&mut self, id: TargetId, delta: i64) {
        if let Some(index) = self.layers.iter().position(|l| *l == id) {
            let moved = self.layers.remove(index);
            let target = (index as i64 + delta).clamp(0, self.layers.len() as i64) as usize;
            self.layers.insert(target, moved);
        }
    }

    pub fn clear_speech(&mut self) {
        for target in self.targets.values_mut() {
            target.speech = None;
        }
    }
}
