//! Turns a parsed SBText project into block programs and installs them on a
//! scheduler.

use crate::ast::{Expr, Project, Statement, Target};
use crate::costume::Costume;
use crate::error::{LoadError, StructuralError};
use crate::program::{BlockId, Input, Opcode, Program, ProgramBuilder, CLONE_MYSELF};
use crate::scheduler::Scheduler;
use crate::value::Value;
use log::debug;
use std::path::Path;

/// One target ready to be added to a world.
#[derive(Debug)]
pub struct LoweredTarget {
    pub name: String,
    pub is_stage: bool,
    pub program: Program,
    pub costumes: Vec<Costume>,
    pub variables: Vec<String>,
    pub lists: Vec<String>,
}

/// Lowers every target, stage first. A project without a stage gets an
/// empty one named "Stage".
pub fn lower_project(project: &Project, source_dir: &Path) -> Result<Vec<LoweredTarget>, LoadError> {
    let mut out = Vec::with_capacity(project.targets.len() + 1);
    match project.targets.iter().find(|t| t.is_stage) {
        Some(stage) => out.push(lower_target_with_assets(stage, source_dir)?),
        None => out.push(LoweredTarget {
            name: "Stage".to_string(),
            is_stage: true,
            program: Program::empty(),
            costumes: vec![Costume::default_svg("backdrop1")],
            variables: Vec::new(),
            lists: Vec::new(),
        }),
    }
    for sprite in project.targets.iter().filter(|t| !t.is_stage) {
        out.push(lower_target_with_assets(sprite, source_dir)?);
    }
    Ok(out)
}

fn lower_target_with_assets(target: &Target, source_dir: &Path) -> Result<LoweredTarget, LoadError> {
    let program = lower_target(target).map_err(|source| LoadError::Structural {
        target: target.name.clone(),
        source,
    })?;
    let mut costumes = Vec::with_capacity(target.costumes.len());
    for decl in &target.costumes {
        costumes.push(Costume::from_file(&decl.name, source_dir)?);
    }
    if costumes.is_empty() {
        let name = if target.is_stage { "backdrop1" } else { "costume1" };
        costumes.push(Costume::default_svg(name));
    }
    Ok(LoweredTarget {
        name: target.name.clone(),
        is_stage: target.is_stage,
        program,
        costumes,
        variables: target.variables.iter().map(|v| v.name.clone()).collect(),
        lists: target.lists.iter().map(|l| l.name.clone()).collect(),
    })
}

/// Builds and validates the block program of one target.
pub fn lower_target(target: &Target) -> Result<Program, StructuralError> {
    let mut lowerer = Lowerer {
        builder: ProgramBuilder::new(),
        params: &[],
    };
    for procedure in &target.procedures {
        lowerer.params = &procedure.params;
        let body = lowerer.statements(&procedure.body);
        lowerer.builder.procedure(
            &procedure.name,
            procedure.params.clone(),
            procedure.warp,
            body,
        );
    }
    lowerer.params = &[];
    for script in &target.scripts {
        let body = lowerer.statements(&script.body);
        lowerer.builder.script(script.hat.clone(), body);
    }
    lowerer.builder.build()
}

/// Adds lowered targets to the scheduler's world and declares their
/// variables (initially 0) and lists (initially empty).
pub fn install(targets: Vec<LoweredTarget>, scheduler: &mut Scheduler) -> Result<(), LoadError> {
    for lowered in targets {
        let id = if lowered.is_stage {
            scheduler.add_stage(&lowered.name, lowered.program, lowered.costumes)?
        } else {
            scheduler.add_sprite(&lowered.name, lowered.program, lowered.costumes)?
        };
        let target = scheduler
            .world_mut()
            .target_mut(id)
            .ok_or(LoadError::UnknownTarget(id))?;
        for name in lowered.variables {
            target.variables.entry(name).or_insert(Value::Number(0.0));
        }
        for name in lowered.lists {
            target.lists.entry(name).or_default();
        }
        debug!("installed target '{}' as {}", target.name, id);
    }
    Ok(())
}

struct Lowerer<'a> {
    builder: ProgramBuilder,
    /// Parameters of the procedure being lowered; empty inside hat scripts.
    params: &'a [String],
}

impl Lowerer<'_> {
    fn statements(&mut self, statements: &[Statement]) -> Option<BlockId> {
        let ids: Vec<BlockId> = statements.iter().map(|s| self.statement(s)).collect();
        self.builder.stack(&ids)
    }

    /// Value inputs first, then one substack per body.
    fn statement(&mut self, stmt: &Statement) -> BlockId {
        let mut inputs: Vec<Input> = stmt.args.iter().map(|arg| self.input(arg)).collect();
        for body in &stmt.bodies {
            inputs.push(Input::Substack(self.statements(body)));
        }
        let field = match (stmt.opcode, stmt.field.as_deref()) {
            (Opcode::CreateCloneOf, Some(name)) if name.eq_ignore_ascii_case("myself") => Some(CLONE_MYSELF),
            (_, field) => field,
        };
        self.builder.push(stmt.opcode, inputs, field)
    }

    fn input(&mut self, expr: &Expr) -> Input {
        match expr {
            Expr::Literal { value, .. } => Input::Literal(value.clone()),
            Expr::Var { name, .. } => {
                let params = self.params;
                let (opcode, field) = match params.iter().find(|p| p.eq_ignore_ascii_case(name)) {
                    Some(param) => (Opcode::Argument, param.as_str()),
                    None => (Opcode::Variable, name.as_str()),
                };
                Input::Block(self.builder.push(opcode, Vec::new(), Some(field)))
            }
            Expr::Reporter {
                opcode, args, field, ..
            } => {
                let inputs = args.iter().map(|arg| self.input(arg)).collect();
                Input::Block(self.builder.push(*opcode, inputs, field.as_deref()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn program(source: &str) -> Program {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let project = Parser::new(tokens).parse_project().unwrap();
        lower_target(&project.targets[0]).unwrap()
    }

    #[test]
    fn parameters_shadow_variables_inside_their_procedure() {
        let program = program(
            "sprite Cat\n  define hop (h)\n    change y by (h)\n  end\n  when flag clicked\n    say (h)\n  end\nend\n",
        );
        let reads: Vec<(Opcode, &str)> = program
            .blocks()
            .iter()
            .filter(|b| matches!(b.opcode, Opcode::Argument | Opcode::Variable))
            .map(|b| (b.opcode, b.field_str()))
            .collect();
        assert_eq!(reads, [(Opcode::Argument, "h"), (Opcode::Variable, "h")]);
        assert!(program.procedure("HOP").is_some());
    }

    #[test]
    fn bodies_become_substacks_after_value_inputs() {
        let program = program(
            "sprite Cat\n  when flag clicked\n    if <(1) = (1)> then\n      show\n    else\n      hide\n      show\n    end\n  end\nend\n",
        );
        let head = program.scripts()[0].body.unwrap();
        let block = program.block(head).unwrap();
        assert_eq!(block.opcode, Opcode::IfElse);
        assert_eq!(block.value_inputs().len(), 1);
        let else_head = program.child_sequence_of(head, 1).unwrap();
        assert_eq!(program.block(else_head).unwrap().opcode, Opcode::Hide);
        assert!(program.next_of(else_head).is_some());
    }

    #[test]
    fn cloning_myself_uses_the_menu_sentinel() {
        let program = program("sprite Cat\n  when flag clicked\n    create clone of [Myself]\n  end\nend\n");
        let head = program.scripts()[0].body.unwrap();
        assert_eq!(program.block(head).unwrap().field_str(), CLONE_MYSELF);
    }
}
