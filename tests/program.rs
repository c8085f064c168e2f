use sbstage_core::program::ProgramBuilder;
use sbstage_core::{validate, Hat, Input, Opcode, StructuralError};

#[test]
fn well_formed_program_builds() {
    let mut b = ProgramBuilder::new();
    let x = b.push(Opcode::XPosition, vec![], None);
    let sum = b.push(Opcode::Add, vec![Input::Block(x), Input::number(1.0)], None);
    let set = b.push(Opcode::SetX, vec![Input::Block(sum)], None);
    let wait = b.push(Opcode::Wait, vec![Input::number(0.1)], None);
    let body = b.stack(&[set, wait]);
    let forever = b.push(Opcode::Forever, vec![Input::Substack(body)], None);
    b.script(Hat::GreenFlag, Some(forever));
    let program = b.build().unwrap();
    assert_eq!(program.scripts().len(), 1);
    assert_eq!(program.child_sequence_of(forever, 0), Some(set));
    assert!(validate(&program).is_ok());
}

#[test]
fn unknown_opcode_name_is_rejected() {
    let mut b = ProgramBuilder::new();
    assert!(b.push_named("motion_movesteps", vec![Input::number(1.0)], None).is_ok());
    let err = b.push_named("motion_fly", vec![], None).unwrap_err();
    assert_eq!(
        err,
        StructuralError::UnknownOpcode {
            opcode: "motion_fly".to_string()
        }
    );
}

#[test]
fn control_block_without_its_body_slot_is_rejected() {
    let mut b = ProgramBuilder::new();
    let repeat = b.push(Opcode::Repeat, vec![Input::number(3.0)], None);
    b.script(Hat::GreenFlag, Some(repeat));
    assert!(matches!(
        b.build(),
        Err(StructuralError::MissingChildSequence {
            expected: 1,
            actual: 0,
            ..
        })
    ));
}

#[test]
fn wrong_number_of_value_inputs_is_rejected() {
    let mut b = ProgramBuilder::new();
    let go = b.push(Opcode::GoToXY, vec![Input::number(1.0)], None);
    b.script(Hat::GreenFlag, Some(go));
    assert!(matches!(
        b.build(),
        Err(StructuralError::WrongValueInputCount {
            expected: 2,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn reporter_cannot_sit_in_a_stack() {
    let mut b = ProgramBuilder::new();
    let show = b.push(Opcode::Show, vec![], None);
    let x = b.push(Opcode::XPosition, vec![], None);
    let body = b.stack(&[show, x]);
    b.script(Hat::GreenFlag, body);
    assert!(matches!(
        b.build(),
        Err(StructuralError::ReporterInStack { .. })
    ));
}

#[test]
fn stack_block_cannot_be_a_value() {
    let mut b = ProgramBuilder::new();
    let hide = b.push(Opcode::Hide, vec![], None);
    let say = b.push(Opcode::Say, vec![Input::Block(hide)], None);
    b.script(Hat::GreenFlag, Some(say));
    assert!(matches!(
        b.build(),
        Err(StructuralError::StackBlockAsValue { .. })
    ));
}

#[test]
fn reporter_shared_by_two_inputs_is_rejected() {
    let mut b = ProgramBuilder::new();
    let x = b.push(Opcode::XPosition, vec![], None);
    let go = b.push(Opcode::GoToXY, vec![Input::Block(x), Input::Block(x)], None);
    b.script(Hat::GreenFlag, Some(go));
    assert_eq!(b.build().unwrap_err(), StructuralError::SharedBlock { block: x });
}

#[test]
fn dangling_reference_is_rejected() {
    let mut b = ProgramBuilder::new();
    let show = b.push(Opcode::Show, vec![], None);
    b.set_next(show, Some(sbstage_core::BlockId(99)));
    b.script(Hat::GreenFlag, Some(show));
    assert!(matches!(
        b.build(),
        Err(StructuralError::MissingBlock { .. })
    ));
}

#[test]
fn cyclic_stack_is_rejected() {
    let mut b = ProgramBuilder::new();
    let show = b.push(Opcode::Show, vec![], None);
    let hide = b.push(Opcode::Hide, vec![], None);
    b.stack(&[show, hide]);
    b.set_next(hide, Some(show));
    assert!(matches!(b.build(), Err(StructuralError::Cycle { .. })));
}

#[test]
fn menu_fields_are_checked() {
    let mut b = ProgramBuilder::new();
    let stop = b.push(Opcode::Stop, vec![], Some("sometimes"));
    b.script(Hat::GreenFlag, Some(stop));
    assert!(matches!(
        b.build(),
        Err(StructuralError::InvalidField { .. })
    ));

    let mut b = ProgramBuilder::new();
    let set = b.push(Opcode::SetVariableTo, vec![Input::number(1.0)], None);
    b.script(Hat::GreenFlag, Some(set));
    assert!(matches!(
        b.build(),
        Err(StructuralError::MissingField {
            field: "VARIABLE",
            ..
        })
    ));
}

#[test]
fn procedure_calls_must_match_a_definition() {
    let mut b = ProgramBuilder::new();
    let call = b.push(Opcode::Call, vec![], Some("jump"));
    b.script(Hat::GreenFlag, Some(call));
    assert!(matches!(
        b.build(),
        Err(StructuralError::UnknownProcedure { .. })
    ));

    let mut b = ProgramBuilder::new();
    b.procedure("jump", vec!["height".to_string()], false, None);
    let call = b.push(Opcode::Call, vec![], Some("jump"));
    b.script(Hat::GreenFlag, Some(call));
    assert!(matches!(
        b.build(),
        Err(StructuralError::ArgumentCount {
            expected: 1,
            actual: 0,
            ..
        })
    ));
}

#[test]
fn procedure_names_and_params_must_be_unique() {
    let mut b = ProgramBuilder::new();
    b.procedure("Jump", vec![], false, None);
    b.procedure("jump", vec![], false, None);
    assert!(matches!(
        b.build(),
        Err(StructuralError::DuplicateProcedure { .. })
    ));

    let mut b = ProgramBuilder::new();
    b.procedure("move to", vec!["x".to_string(), "X".to_string()], false, None);
    assert!(matches!(
        b.build(),
        Err(StructuralError::DuplicateParameter { .. })
    ));
}

#[test]
fn hats_need_a_name_to_match() {
    let mut b = ProgramBuilder::new();
    b.script(Hat::BroadcastReceived("  ".to_string()), None);
    assert!(matches!(
        b.build(),
        Err(StructuralError::EmptyHatName {
            what: "message",
            ..
        })
    ));
}
