use crate::costume::Costume;
use crate::program::Program;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Ids are handed out in increasing order, so sorting by id is sorting by
/// creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub u64);

impl Display for TargetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationStyle {
    #[default]
    #[serde(rename = "all around")]
    AllAround,
    #[serde(rename = "left-right")]
    LeftRight,
    #[serde(rename = "don't rotate")]
    DontRotate,
}

impl RotationStyle {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "all around" => Some(RotationStyle::AllAround),
            "left-right" => Some(RotationStyle::LeftRight),
            "don't rotate" => Some(RotationStyle::DontRotate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleKind {
    Say,
    Think,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speech {
    pub kind: BubbleKind,
    pub text: String,
}

/// A sprite, a clone of one, or the stage.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub is_stage: bool,
    /// For clones, the sprite they were ultimately cloned from; otherwise
    /// the target itself. Clones share their original's costume cache.
    pub original: TargetId,
    pub program: Arc<Program>,
    pub variables: BTreeMap<String, Value>,
    pub lists: BTreeMap<String, Vec<Value>>,
    pub x: f64,
    pub y: f64,
    /// Degrees, 90 points right; kept in (-180, 180].
    pub direction: f64,
    /// Percent.
    pub size: f64,
    pub rotation_style: RotationStyle,
    pub costume: usize,
    pub costumes: Arc<Vec<Costume>>,
    pub visible: bool,
    pub draggable: bool,
    pub speech: Option<Speech>,
}

impl Target {
    pub fn new(id: TargetId, name: &str, is_stage: bool, program: Arc<Program>) -> Self {
        Self {
            id,
            name: name.to_string(),
            is_stage,
            original: id,
            program,
            variables: BTreeMap::new(),
            lists: BTreeMap::new(),
            x: 0.0,
            y: 0.0,
            direction: 90.0,
            size: 100.0,
            rotation_style: RotationStyle::AllAround,
            costume: 0,
            costumes: Arc::new(Vec::new()),
            visible: true,
            draggable: false,
            speech: None,
        }
    }

    pub fn is_clone(&self) -> bool {
        self.original != self.id
    }

    pub fn current_costume(&self) -> Option<&Costume> {
        self.costumes.get(self.costume)
    }

    /// Selects a costume by zero-based index, wrapping modulo the costume
    /// count. Without costumes the index stays at 0.
    pub fn set_costume(&mut self, index: i64) {
        let count = self.costumes.len() as i64;
        self.costume = if count == 0 {
            0
        } else {
            index.rem_euclid(count) as usize
        };
    }

    /// Selects a costume by name; returns false when no costume matches.
    pub fn set_costume_by_name(&mut self, name: &str) -> bool {
        match self.costumes.iter().position(|c| c.name == name) {
            Some(index) => {
                self.costume = index;
                true
            }
            None => false,
        }
    }

    pub fn set_direction(&mut self, degrees: f64) {
        if degrees.is_finite() {
            self.direction = wrap_direction(degrees);
        }
    }

    pub fn set_size(&mut self, percent: f64) {
        if percent.is_finite() {
            self.size = percent.max(0.0);
        }
    }

    /// Copy for a new clone: shared program and costumes, independent
    /// variables and lists, no speech bubble.
    pub fn clone_as(&self, id: TargetId) -> Target {
        Target {
            id,
            name: self.name.clone(),
            is_stage: false,
            original: self.original,
            program: Arc::clone(&self.program),
            variables: self.variables.clone(),
            lists: self.lists.clone(),
            x: self.x,
            y: self.y,
            direction: self.direction,
            size: self.size,
            rotation_style: self.rotation_style,
            costume: self.costume,
            costumes: Arc::clone(&self.costumes),
            visible: self.visible,
            draggable: self.draggable,
            speech: None,
        }
    }
}

pub fn wrap_direction(degrees: f64) -> f64 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions_wrap_into_half_open_range() {
        assert_eq!(wrap_direction(90.0), 90.0);
        assert_eq!(wrap_direction(270.0), -90.0);
        assert_eq!(wrap_direction(-180.0), 180.0);
        assert_eq!(wrap_direction(540.0), 180.0);
    }

    #[test]
    fn costume_index_wraps() {
        let mut target = Target::new(TargetId(1), "Cat", false, Arc::new(Program::empty()));
        target.costumes = Arc::new(vec![Costume::default_svg("a"), Costume::default_svg("b")]);
        target.set_costume(3);
        assert_eq!(target.costume, 1);
        target.set_costume(-1);
        assert_eq!(target.costume, 1);
        assert!(target.set_costume_by_name("a"));
        assert_eq!(target.costume, 0);
    }
}
