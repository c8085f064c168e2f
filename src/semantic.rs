//! Source-level checks that need line numbers, run before lowering.
//!
//! Problems the engine would reject anyway (unknown procedures, arity) are
//! reported here with their position. Undeclared variables are only
//! warnings: a write creates the variable on the writing target.

use crate::ast::{Expr, Position, Project, Statement, Target};
use crate::program::Hat;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct SemanticError {
    pub message: String,
}

impl Display for SemanticError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for SemanticError {}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticWarning {
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct SemanticReport {
    pub warnings: Vec<SemanticWarning>,
}

#[derive(Debug, Clone)]
struct ProcedureInfo {
    line: usize,
    arity: usize,
}

pub fn analyze(project: &Project) -> Result<SemanticReport, SemanticError> {
    if project.targets.iter().filter(|t| t.is_stage).count() > 1 {
        return Err(SemanticError {
            message: "Project can only define one stage.".to_string(),
        });
    }
    let mut names = HashSet::new();
    for target in &project.targets {
        if !names.insert(target.name.to_lowercase()) {
            return Err(SemanticError {
                message: format!(
                    "Duplicate target name '{}' at line {}.",
                    target.name, target.pos.line
                ),
            });
        }
    }

    let stage = project.targets.iter().find(|t| t.is_stage);
    let global_vars: HashSet<String> = stage
        .map(|s| s.variables.iter().map(|v| v.name.to_lowercase()).collect())
        .unwrap_or_default();
    let global_lists: HashSet<String> = stage
        .map(|s| s.lists.iter().map(|l| l.name.to_lowercase()).collect())
        .unwrap_or_default();
    let sprites: HashSet<String> = project
        .targets
        .iter()
        .filter(|t| !t.is_stage)
        .map(|t| t.name.to_lowercase())
        .collect();

    let mut report = SemanticReport::default();
    for target in &project.targets {
        let procedures = collect_procedures(target)?;
        let mut checker = Checker {
            target,
            variables: target
                .variables
                .iter()
                .map(|v| v.name.to_lowercase())
                .chain(global_vars.iter().cloned())
                .collect(),
            lists: target
                .lists
                .iter()
                .map(|l| l.name.to_lowercase())
                .chain(global_lists.iter().cloned())
                .collect(),
            procedures: &procedures,
            sprites: &sprites,
            params: HashSet::new(),
            warnings: &mut report.warnings,
        };
        for procedure in &target.procedures {
            checker.params = procedure.params.iter().map(|p| p.to_lowercase()).collect();
            checker.statements(&procedure.body)?;
        }
        checker.params.clear();
        for script in &target.scripts {
            if target.is_stage && script.hat == Hat::CloneStart {
                checker.warn(script.pos, "the stage cannot be cloned; this script never runs".to_string());
            }
            checker.statements(&script.body)?;
        }
    }
    Ok(report)
}

fn collect_procedures(target: &Target) -> Result<HashMap<String, ProcedureInfo>, SemanticError> {
    let mut procedures: HashMap<String, ProcedureInfo> = HashMap::new();
    for procedure in &target.procedures {
        let lowered = procedure.name.to_lowercase();
        if let Some(prev) = procedures.get(&lowered) {
            return Err(SemanticError {
                message: format!(
                    "Procedure '{}' is already defined at line {} in target '{}'.",
                    procedure.name, prev.line, target.name
                ),
            });
        }
        let mut param_names = HashSet::new();
        for p in &procedure.params {
            if !param_names.insert(p.to_lowercase()) {
                return Err(SemanticError {
                    message: format!(
                        "Procedure '{}' has duplicate parameter names at line {}, column {}.",
                        procedure.name, procedure.pos.line, procedure.pos.column
                    ),
                });
            }
        }
        procedures.insert(
            lowered,
            ProcedureInfo {
                line: procedure.pos.line,
                arity: procedure.params.len(),
            },
        );
    }
    Ok(procedures)
}

struct Checker<'a> {
    target: &'a Target,
    variables: HashSet<String>,
    lists: HashSet<String>,
    procedures: &'a HashMap<String, ProcedureInfo>,
    sprites: &'a HashSet<String>,
    params: HashSet<String>,
    warnings: &'a mut Vec<SemanticWarning>,
}

impl Checker<'_> {
    fn warn(&mut self, pos: Position, what: String) {
        self.warnings.push(SemanticWarning {
            message: format!(
                "{} (line {}, column {} in target '{}')",
                what, pos.line, pos.column, self.target.name
            ),
        });
    }

    fn variable(&mut self, pos: Position, name: &str) {
        let lowered = name.to_lowercase();
        if !self.variables.contains(&lowered) && !self.params.contains(&lowered) {
            self.warn(pos, format!("variable '{}' is not declared", name));
            // One warning per name is enough.
            self.variables.insert(lowered);
        }
    }

    fn list(&mut self, pos: Position, name: &str) {
        let lowered = name.to_lowercase();
        if !self.lists.contains(&lowered) {
            self.warn(pos, format!("list '{}' is not declared", name));
            self.lists.insert(lowered);
        }
    }

    fn statements(&mut self, statements: &[Statement]) -> Result<(), SemanticError> {
        for stmt in statements {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Statement) -> Result<(), SemanticError> {
        let pos = stmt.pos;
        let name = stmt.field.as_deref().unwrap_or("");
        match stmt.opcode.shape().field {
            Some("VARIABLE") => self.variable(pos, name),
            Some("LIST") => self.list(pos, name),
            Some("PROCCODE") => self.call(pos, name, stmt.args.len())?,
            Some("CLONE_OPTION") => self.clone_target(pos, name),
            _ => {}
        }
        for arg in &stmt.args {
            self.expr(arg);
        }
        for body in &stmt.bodies {
            self.statements(body)?;
        }
        Ok(())
    }

    fn call(&self, pos: Position, name: &str, args: usize) -> Result<(), SemanticError> {
        let Some(info) = self.procedures.get(&name.to_lowercase()) else {
            return Err(SemanticError {
                message: format!(
                    "Unknown procedure '{}' at line {}, column {} in target '{}'.",
                    name, pos.line, pos.column, self.target.name
                ),
            });
        };
        if info.arity != args {
            return Err(SemanticError {
                message: format!(
                    "Procedure '{}' expects {} argument(s) but got {} at line {}, column {}.",
                    name, info.arity, args, pos.line, pos.column
                ),
            });
        }
        Ok(())
    }

    fn clone_target(&mut self, pos: Position, name: &str) {
        if name.eq_ignore_ascii_case("myself") {
            if self.target.is_stage {
                self.warn(pos, "the stage cannot clone itself".to_string());
            }
        } else if !self.sprites.contains(&name.to_lowercase()) {
            self.warn(pos, format!("cannot clone unknown sprite '{}'", name));
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal { .. } => {}
            Expr::Var { pos, name } => self.variable(*pos, name),
            Expr::Reporter {
                pos,
                opcode,
                args,
                field,
            } => {
                if opcode.shape().field == Some("LIST") {
                    self.list(*pos, field.as_deref().unwrap_or(""));
                }
                for arg in args {
                    self.expr(arg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn check(source: &str) -> Result<SemanticReport, SemanticError> {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let project = Parser::new(tokens).parse_project().unwrap();
        analyze(&project)
    }

    #[test]
    fn unknown_procedure_is_an_error_with_position() {
        let err = check("sprite Cat\n  when flag clicked\n    jump (1)\n  end\nend\n").unwrap_err();
        assert!(err.message.contains("Unknown procedure 'jump'"), "{}", err.message);
        assert!(err.message.contains("line 3"), "{}", err.message);
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let source = "sprite Cat\n  define hop (h)\n    change y by (h)\n  end\n  when flag clicked\n    hop\n  end\nend\n";
        let err = check(source).unwrap_err();
        assert!(err.message.contains("expects 1 argument(s) but got 0"), "{}", err.message);
    }

    #[test]
    fn undeclared_variable_is_only_a_warning() {
        let report = check("sprite Cat\n  when flag clicked\n    set [score] to (1)\n    say (score)\n  end\nend\n").unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("'score'"));
    }

    #[test]
    fn stage_variables_are_visible_to_sprites() {
        let source = "stage\n  var score\nend\nsprite Cat\n  when flag clicked\n    change [score] by (1)\n  end\nend\n";
        let report = check(source).unwrap();
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn list_reads_inside_expressions_are_checked() {
        let source = "sprite Cat\n  list seen\n  when flag clicked\n    say (item (1) of [missing])\n    say (length of [seen])\n  end\nend\n";
        let report = check(source).unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("'missing'"));
    }

    #[test]
    fn duplicate_target_names_are_rejected() {
        let err = check("sprite Cat\nend\nsprite cat\nend\n").unwrap_err();
        assert!(err.message.contains("Duplicate target name"));
    }
}
