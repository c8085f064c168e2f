use crate::error::StructuralError;
use crate::program::{BlockId, BlockKind, BlockNode, Hat, Input, Opcode, Program, StopScope};
use crate::target::RotationStyle;
use crate::value::math_op;
use std::collections::HashSet;

/// Checks a block program for structural soundness.
///
/// Runs on every [`crate::program::ProgramBuilder::build`] and on snapshot
/// import; a program that passes can be interpreted without the thread ever
/// meeting a dangling reference, a wrongly-shaped control block or a cycle.
pub fn validate(program: &Program) -> Result<(), StructuralError> {
    let blocks = program.blocks();
    for (index, block) in blocks.iter().enumerate() {
        let expected = BlockId(index as u32);
        if block.id != expected {
            return Err(StructuralError::BlockIdMismatch {
                block: block.id,
                expected,
            });
        }
        check_shape(block)?;
        check_field(block)?;
    }

    let mut owners = vec![0u32; blocks.len()];
    for block in blocks {
        let from = block.id.to_string();
        for input in &block.inputs {
            match input {
                Input::Literal(_) => {}
                Input::Block(child) => {
                    claim(program, &mut owners, &from, *child, BlockKind::Reporter)?;
                }
                Input::Substack(Some(child)) => {
                    claim(program, &mut owners, &from, *child, BlockKind::Stack)?;
                }
                Input::Substack(None) => {}
            }
        }
        if let Some(next) = block.next {
            if block.opcode.shape().kind == BlockKind::Reporter {
                return Err(StructuralError::ReporterInStack {
                    block: block.id,
                    opcode: block.opcode.name(),
                });
            }
            claim(program, &mut owners, &from, next, BlockKind::Stack)?;
        }
    }
    for (index, script) in program.scripts().iter().enumerate() {
        if let Some(body) = script.body {
            claim(program, &mut owners, &format!("script {}", index), body, BlockKind::Stack)?;
        }
        check_hat(index, &script.hat)?;
    }
    for procedure in program.procedures() {
        if let Some(body) = procedure.body {
            let from = format!("procedure '{}'", procedure.name);
            claim(program, &mut owners, &from, body, BlockKind::Stack)?;
        }
    }

    check_procedures(program)?;
    check_acyclic(blocks)?;
    Ok(())
}

fn check_shape(block: &BlockNode) -> Result<(), StructuralError> {
    let shape = block.opcode.shape();
    let substacks = block
        .inputs
        .iter()
        .filter(|i| matches!(i, Input::Substack(_)))
        .count();
    if substacks != shape.substacks {
        return Err(StructuralError::MissingChildSequence {
            block: block.id,
            opcode: block.opcode.name(),
            expected: shape.substacks,
            actual: substacks,
        });
    }
    let values = block.inputs.len() - substacks;
    if let Some(expected) = shape.values {
        if values != expected {
            return Err(StructuralError::WrongValueInputCount {
                block: block.id,
                opcode: block.opcode.name(),
                expected,
                actual: values,
            });
        }
    }
    for (slot, input) in block.inputs.iter().enumerate() {
        let is_substack = matches!(input, Input::Substack(_));
        if is_substack != (slot >= values) {
            return Err(StructuralError::MisplacedInput {
                block: block.id,
                opcode: block.opcode.name(),
                slot,
            });
        }
    }
    Ok(())
}

fn check_field(block: &BlockNode) -> Result<(), StructuralError> {
    let Some(field) = block.opcode.shape().field else {
        return Ok(());
    };
    let value = match block.field.as_deref() {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            return Err(StructuralError::MissingField {
                block: block.id,
                opcode: block.opcode.name(),
                field,
            })
        }
    };
    let lowered = value.to_ascii_lowercase();
    let ok = match field {
        "STOP_OPTION" => StopScope::parse(value).is_some(),
        "STYLE" => RotationStyle::parse(value).is_some(),
        "FRONT_BACK" => matches!(lowered.as_str(), "front" | "back"),
        "FORWARD_BACKWARD" => matches!(lowered.as_str(), "forward" | "backward"),
        "NUMBER_NAME" => matches!(lowered.as_str(), "number" | "name"),
        "OPERATOR" => math_op(value, 0.0).is_some(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(StructuralError::InvalidField {
            block: block.id,
            opcode: block.opcode.name(),
            value: value.to_string(),
        })
    }
}

fn claim(
    program: &Program,
    owners: &mut [u32],
    from: &str,
    child: BlockId,
    expected: BlockKind,
) -> Result<(), StructuralError> {
    let Some(node) = program.block(child) else {
        return Err(StructuralError::MissingBlock {
            from: from.to_string(),
            missing: child,
        });
    };
    let kind = node.opcode.shape().kind;
    if kind != expected {
        return Err(match expected {
            BlockKind::Stack => StructuralError::ReporterInStack {
                block: child,
                opcode: node.opcode.name(),
            },
            BlockKind::Reporter => StructuralError::StackBlockAsValue {
                block: child,
                opcode: node.opcode.name(),
            },
        });
    }
    let count = &mut owners[child.index()];
    *count += 1;
    if *count > 1 {
        return Err(StructuralError::SharedBlock { block: child });
    }
    Ok(())
}

fn check_hat(index: usize, hat: &Hat) -> Result<(), StructuralError> {
    let (name, what) = match hat {
        Hat::KeyPressed(key) => (key, "key"),
        Hat::BroadcastReceived(message) => (message, "message"),
        _ => return Ok(()),
    };
    if name.trim().is_empty() {
        return Err(StructuralError::EmptyHatName { script: index, what });
    }
    Ok(())
}

fn check_procedures(program: &Program) -> Result<(), StructuralError> {
    let mut names = HashSet::new();
    for procedure in program.procedures() {
        if !names.insert(procedure.name.to_lowercase()) {
            return Err(StructuralError::DuplicateProcedure {
                name: procedure.name.clone(),
            });
        }
        let mut params = HashSet::new();
        for param in &procedure.params {
            if !params.insert(param.to_lowercase()) {
                return Err(StructuralError::DuplicateParameter {
                    name: procedure.name.clone(),
                    param: param.clone(),
                });
            }
        }
    }
    for block in program.blocks() {
        if block.opcode != Opcode::Call {
            continue;
        }
        let name = block.field_str();
        let Some(procedure) = program.procedure(name) else {
            return Err(StructuralError::UnknownProcedure {
                block: block.id,
                name: name.to_string(),
            });
        };
        if block.inputs.len() != procedure.params.len() {
            return Err(StructuralError::ArgumentCount {
                block: block.id,
                name: name.to_string(),
                expected: procedure.params.len(),
                actual: block.inputs.len(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Finished,
}

// Iterative DFS over every edge (value inputs, child sequences, next links);
// long stacks would overflow a recursive walk.
fn check_acyclic(blocks: &[BlockNode]) -> Result<(), StructuralError> {
    let mut marks = vec![Mark::Unvisited; blocks.len()];
    for root in 0..blocks.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::InProgress;
        while let Some((node, edge)) = stack.pop() {
            let edges = successors(&blocks[node]);
            if edge >= edges.len() {
                marks[node] = Mark::Finished;
                continue;
            }
            stack.push((node, edge + 1));
            let child = edges[edge].index();
            match marks[child] {
                Mark::InProgress => {
                    return Err(StructuralError::Cycle {
                        block: blocks[child].id,
                    })
                }
                Mark::Unvisited => {
                    marks[child] = Mark::InProgress;
                    stack.push((child, 0));
                }
                Mark::Finished => {}
            }
        }
    }
    Ok(())
}

fn successors(block: &BlockNode) -> Vec<BlockId> {
    let mut out: Vec<BlockId> = block
        .inputs
        .iter()
        .filter_map(|input| match input {
            Input::Block(id) | Input::Substack(Some(id)) => Some(*id),
            _ => None,
        })
        .collect();
    out.extend(block.next);
    out
}
