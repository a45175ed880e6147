use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::classfile::{
    ClassFormatError, ClassResult, CodeAttribute, CodeSizes, read_i16, read_i32, read_u16,
};
use crate::opcodes::{self, Instruction, instructions};
use crate::pool::PoolView;

/// Recompute `max_stack` and `max_locals` for one method body by walking every path
/// through the bytecode from the entry point and each exception handler.
pub(crate) fn compute_sizes(
    pool: &PoolView<'_>,
    descriptor: &str,
    is_static: bool,
    code: &CodeAttribute<'_>,
) -> ClassResult<CodeSizes> {
    let bytes = code.code;
    let insts = instructions(bytes)?;

    let mut max_locals = argument_slots(descriptor)? + usize::from(!is_static);
    for inst in &insts {
        if let Some(limit) = local_limit(bytes, inst)? {
            max_locals = max_locals.max(limit);
        }
    }

    let mut index_of = vec![None; bytes.len()];
    for (index, inst) in insts.iter().enumerate() {
        index_of[inst.offset] = Some(index);
    }
    let mut depth_at: Vec<Option<i64>> = vec![None; insts.len()];
    let mut worklist = Vec::new();
    let mut max_stack: i64 = 0;

    let schedule = |offset: usize,
                        depth: i64,
                        depth_at: &mut Vec<Option<i64>>,
                        worklist: &mut Vec<usize>|
     -> ClassResult<()> {
        let index = index_of
            .get(offset)
            .copied()
            .flatten()
            .ok_or_else(|| ClassFormatError::new(offset, "jump into the middle of an instruction"))?;
        if depth_at[index].is_none() {
            depth_at[index] = Some(depth);
            worklist.push(index);
        }
        Ok(())
    };

    if !insts.is_empty() {
        schedule(0, 0, &mut depth_at, &mut worklist)?;
    }
    for handler in &code.exception_table {
        max_stack = max_stack.max(1);
        schedule(handler.handler_pc as usize, 1, &mut depth_at, &mut worklist)?;
    }

    while let Some(index) = worklist.pop() {
        let inst = insts[index];
        let depth = depth_at[index].unwrap_or(0);
        let after = depth + stack_delta(pool, bytes, &inst)?;
        if after < 0 {
            return Err(ClassFormatError::new(inst.offset, "operand stack underflow"));
        }
        max_stack = max_stack.max(depth).max(after);

        if let Some(targets) = branch_targets(bytes, inst.offset)? {
            for target in targets {
                schedule(target, after, &mut depth_at, &mut worklist)?;
            }
        }
        if !is_exit_opcode(inst.opcode) && !is_unconditional_branch(inst.opcode) {
            let next = inst.offset + inst.length;
            if next < bytes.len() {
                schedule(next, after, &mut depth_at, &mut worklist)?;
            }
        }
    }

    Ok(CodeSizes {
        max_stack: to_u16(max_stack as usize, "max_stack")?,
        max_locals: to_u16(max_locals, "max_locals")?,
    })
}

fn to_u16(value: usize, what: &str) -> ClassResult<u16> {
    u16::try_from(value).map_err(|_| ClassFormatError::new(0, format!("{what} overflow: {value}")))
}

fn method_descriptor(descriptor: &str) -> ClassResult<MethodDescriptor> {
    let invalid = |detail: String| {
        ClassFormatError::new(0, format!("invalid method descriptor {descriptor}: {detail}"))
    };
    let parsed: MethodDescriptor = descriptor.parse().map_err(|error| invalid(format!("{error}")))?;
    if parsed.parameter_types().contains(&TypeDescriptor::Void) {
        return Err(invalid("void parameter".to_string()));
    }
    // the parser stops after the return type
    if parsed.to_string() != descriptor {
        return Err(invalid("trailing characters".to_string()));
    }
    Ok(parsed)
}

/// Local variable or operand stack slots a value of this type occupies.
fn slots(descriptor: &TypeDescriptor) -> usize {
    match descriptor {
        TypeDescriptor::Void => 0,
        TypeDescriptor::Long | TypeDescriptor::Double => 2,
        _ => 1,
    }
}

/// Slots occupied by the parameters of a method descriptor.
pub(crate) fn argument_slots(descriptor: &str) -> ClassResult<usize> {
    Ok(method_descriptor(descriptor)?
        .parameter_types()
        .iter()
        .map(slots)
        .sum())
}

/// Stack change of a call: the return value minus the arguments and the receiver, if any.
fn call_delta(descriptor: &str, receiver: bool) -> ClassResult<i64> {
    let parsed = method_descriptor(descriptor)?;
    let arguments: usize = parsed.parameter_types().iter().map(slots).sum();
    Ok(slots(parsed.return_type()) as i64 - arguments as i64 - i64::from(receiver))
}

fn field_slots(descriptor: &str) -> ClassResult<i64> {
    let invalid = || ClassFormatError::new(0, format!("invalid field descriptor {descriptor}"));
    let parsed: TypeDescriptor = descriptor.parse().map_err(|_| invalid())?;
    if parsed == TypeDescriptor::Void || parsed.to_string() != descriptor {
        return Err(invalid());
    }
    Ok(slots(&parsed) as i64)
}

/// Highest local slot touched by the instruction, exclusive.
fn local_limit(code: &[u8], inst: &Instruction) -> ClassResult<Option<usize>> {
    let operand = |offset: usize| code.get(offset).copied().map(usize::from);
    let limit = match inst.opcode {
        opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => {
            operand(inst.offset + 1).map(|index| index + 2)
        }
        opcodes::ILOAD
        | opcodes::FLOAD
        | opcodes::ALOAD
        | opcodes::ISTORE
        | opcodes::FSTORE
        | opcodes::ASTORE
        | opcodes::IINC
        | opcodes::RET => operand(inst.offset + 1).map(|index| index + 1),
        0x1a..=0x2d => {
            let group = (inst.opcode - 0x1a) / 4;
            let index = ((inst.opcode - 0x1a) % 4) as usize;
            Some(index + if group == 1 || group == 3 { 2 } else { 1 })
        }
        0x3b..=0x4e => {
            let group = (inst.opcode - 0x3b) / 4;
            let index = ((inst.opcode - 0x3b) % 4) as usize;
            Some(index + if group == 1 || group == 3 { 2 } else { 1 })
        }
        opcodes::WIDE => {
            let inner = code[inst.offset + 1];
            let index = read_u16(code, inst.offset + 2)? as usize;
            let width = match inner {
                opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => 2,
                _ => 1,
            };
            Some(index + width)
        }
        _ => None,
    };
    Ok(limit)
}

/// Net operand stack change of one instruction, in slots.
fn stack_delta(pool: &PoolView<'_>, code: &[u8], inst: &Instruction) -> ClassResult<i64> {
    let offset = inst.offset;
    let delta = match inst.opcode {
        opcodes::NOP => 0,
        opcodes::ACONST_NULL..=0x08 => 1,
        0x09 | 0x0a => 2,
        0x0b..=0x0d => 1,
        0x0e | 0x0f => 2,
        opcodes::BIPUSH | opcodes::SIPUSH | opcodes::LDC | opcodes::LDC_W => 1,
        opcodes::LDC2_W => 2,
        opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => 1,
        opcodes::LLOAD | opcodes::DLOAD => 2,
        0x1a..=0x1d | 0x22..=0x25 | 0x2a..=0x2d => 1,
        0x1e..=0x21 | 0x26..=0x29 => 2,
        0x2e | 0x30 | 0x32..=0x35 => -1,
        0x2f | 0x31 => 0,
        opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => -1,
        opcodes::LSTORE | opcodes::DSTORE => -2,
        0x3b..=0x3e | 0x43..=0x46 | 0x4b..=0x4e => -1,
        0x3f..=0x42 | 0x47..=0x4a => -2,
        0x4f | 0x51 | 0x53..=0x56 => -3,
        0x50 | 0x52 => -4,
        opcodes::POP => -1,
        0x58 => -2,
        0x59..=0x5b => 1,
        0x5c..=0x5e => 2,
        0x5f => 0,
        // add, sub, mul, div, rem in int/long/float/double order
        0x60..=0x73 => match (inst.opcode - 0x60) % 4 {
            1 | 3 => -2,
            _ => -1,
        },
        0x74..=0x77 => 0,
        0x78..=0x7d => -1,
        0x7e | 0x80 | 0x82 => -1,
        0x7f | 0x81 | 0x83 => -2,
        opcodes::IINC => 0,
        0x85 | 0x87 | 0x8c | 0x8d => 1,
        0x86 | 0x8a | 0x8b | 0x8f | 0x91..=0x93 => 0,
        0x88 | 0x89 | 0x8e | 0x90 => -1,
        0x94 | 0x97 | 0x98 => -3,
        0x95 | 0x96 => -1,
        0x99..=0x9e => -1,
        0x9f..=0xa6 => -2,
        opcodes::GOTO => 0,
        opcodes::JSR => 1,
        opcodes::RET => 0,
        opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => -1,
        opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN => -1,
        opcodes::LRETURN | opcodes::DRETURN => -2,
        opcodes::RETURN => 0,
        opcodes::GETSTATIC => field_slots(member_descriptor(pool, code, offset)?)?,
        opcodes::PUTSTATIC => -field_slots(member_descriptor(pool, code, offset)?)?,
        opcodes::GETFIELD => field_slots(member_descriptor(pool, code, offset)?)? - 1,
        opcodes::PUTFIELD => -field_slots(member_descriptor(pool, code, offset)?)? - 1,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKEINTERFACE => {
            call_delta(member_descriptor(pool, code, offset)?, true)?
        }
        opcodes::INVOKESTATIC => call_delta(member_descriptor(pool, code, offset)?, false)?,
        opcodes::INVOKEDYNAMIC => {
            let (_, _, descriptor) = pool.invoke_dynamic(read_u16(code, offset + 1)?)?;
            call_delta(descriptor, false)?
        }
        opcodes::NEW => 1,
        0xbc..=0xbe => 0,
        opcodes::ATHROW => -1,
        0xc0 | 0xc1 => 0,
        0xc2 | 0xc3 => -1,
        opcodes::WIDE => match code[offset + 1] {
            opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => 1,
            opcodes::LLOAD | opcodes::DLOAD => 2,
            opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => -1,
            opcodes::LSTORE | opcodes::DSTORE => -2,
            opcodes::IINC | opcodes::RET => 0,
            other => {
                return Err(ClassFormatError::new(
                    offset,
                    format!("invalid wide opcode 0x{other:02x}"),
                ));
            }
        },
        opcodes::MULTIANEWARRAY => 1 - i64::from(code[offset + 3]),
        opcodes::IFNULL | opcodes::IFNONNULL => -1,
        opcodes::GOTO_W => 0,
        opcodes::JSR_W => 1,
        other => {
            return Err(ClassFormatError::new(
                offset,
                format!("unknown opcode 0x{other:02x}"),
            ));
        }
    };
    Ok(delta)
}

fn member_descriptor<'p>(pool: &PoolView<'p>, code: &[u8], offset: usize) -> ClassResult<&'p str> {
    Ok(pool.member_ref(read_u16(code, offset + 1)?)?.descriptor)
}

fn is_exit_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::IRETURN
            | opcodes::LRETURN
            | opcodes::FRETURN
            | opcodes::DRETURN
            | opcodes::ARETURN
            | opcodes::RETURN
            | opcodes::ATHROW
            | opcodes::RET
    )
}

fn is_unconditional_branch(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::GOTO | opcodes::GOTO_W | opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH
    )
}

fn branch_targets(code: &[u8], offset: usize) -> ClassResult<Option<Vec<usize>>> {
    let opcode = code[offset];
    let targets = match opcode {
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            vec![relative(offset, read_i16(code, offset + 1)? as i32)?]
        }
        opcodes::GOTO_W | opcodes::JSR_W => vec![relative(offset, read_i32(code, offset + 1)?)?],
        opcodes::TABLESWITCH => tableswitch_targets(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_targets(code, offset)?,
        _ => return Ok(None),
    };
    Ok(Some(targets))
}

fn relative(offset: usize, branch: i32) -> ClassResult<usize> {
    let target = offset as i64 + branch as i64;
    usize::try_from(target)
        .map_err(|_| ClassFormatError::new(offset, format!("branch target {target} out of range")))
}

fn tableswitch_targets(code: &[u8], offset: usize) -> ClassResult<Vec<usize>> {
    let base = offset + 1 + opcodes::padding(offset);
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = (high as i64) - (low as i64) + 1;
    let mut targets = vec![relative(offset, default)?];
    let mut idx = base + 12;
    for _ in 0..count.max(0) {
        targets.push(relative(offset, read_i32(code, idx)?)?);
        idx += 4;
    }
    Ok(targets)
}

fn lookupswitch_targets(code: &[u8], offset: usize) -> ClassResult<Vec<usize>> {
    let base = offset + 1 + opcodes::padding(offset);
    let default = read_i32(code, base)?;
    let pairs = read_i32(code, base + 4)?;
    let mut targets = vec![relative(offset, default)?];
    let mut idx = base + 8;
    for _ in 0..pairs.max(0) {
        targets.push(relative(offset, read_i32(code, idx + 4)?)?);
        idx += 8;
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jclassfile::class_file;

    use crate::classfile::ClassLayout;
    use crate::testing::{ACC_PUBLIC, ACC_STATIC, ClassBuilder, Code};

    fn try_sizes(code: Code, descriptor: &str, access: u16) -> ClassResult<CodeSizes> {
        let mut builder = ClassBuilder::new("com/example/Sizes", Some("java/lang/Object"));
        builder.method("m", descriptor, access, Some(code.maxs(99, 99)));
        let bytes = builder.build();
        let class = class_file::parse(&bytes).expect("parse class");
        let layout = ClassLayout::parse(&bytes).expect("layout");
        let attribute = layout
            .code(&layout.methods[0])
            .expect("decode code")
            .expect("code present");
        compute_sizes(
            &PoolView::of(&class),
            descriptor,
            access & ACC_STATIC != 0,
            &attribute,
        )
    }

    fn sizes_of(code: Code, descriptor: &str, access: u16) -> CodeSizes {
        try_sizes(code, descriptor, access).expect("compute sizes")
    }

    #[test]
    fn descriptor_slots_count_wide_types_twice() {
        assert_eq!(argument_slots("()V").expect("slots"), 0);
        assert_eq!(argument_slots("(IJ[DLjava/lang/String;)V").expect("slots"), 5);
        assert_eq!(call_delta("(D)J", true).expect("delta"), -1);
        assert_eq!(field_slots("J").expect("field"), 2);
        assert_eq!(field_slots("[J").expect("field"), 1);
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        assert!(argument_slots("(Ljava/lang/String").is_err());
        assert!(argument_slots("(V)V").is_err());
        assert!(argument_slots("()VI").is_err());
        assert!(field_slots("V").is_err());
        assert!(field_slots("II").is_err());
    }

    #[test]
    fn instance_call_needs_receiver_and_this_slot() {
        let code = Code::new()
            .aload0()
            .invokevirtual("com/example/Sizes", "m", "()V")
            .ret();

        let sizes = sizes_of(code, "()V", ACC_PUBLIC);

        assert_eq!(sizes, CodeSizes { max_stack: 1, max_locals: 1 });
    }

    #[test]
    fn long_arguments_and_stores_widen_locals() {
        // lload_0; lload_2; ladd; lstore 4; return
        let code = Code::new().raw(&[0x1e, 0x20, 0x61, opcodes::LSTORE, 4, opcodes::RETURN]);

        let sizes = sizes_of(code, "(JJ)V", ACC_PUBLIC | ACC_STATIC);

        assert_eq!(sizes, CodeSizes { max_stack: 4, max_locals: 6 });
    }

    #[test]
    fn branches_and_handlers_are_followed() {
        // 0: iconst_0, 1: ifeq -> 8, 4: iconst_1, 5: iconst_2, 6: pop2, 7: return, 8: return
        let code = Code::new()
            .raw(&[0x03, opcodes::IFEQ, 0, 7, 0x04, 0x05, 0x58, opcodes::RETURN])
            .raw(&[opcodes::RETURN])
            .handler(0, 8, 8);

        let sizes = sizes_of(code, "()V", ACC_PUBLIC | ACC_STATIC);

        assert_eq!(sizes.max_stack, 2);
        assert_eq!(sizes.max_locals, 0);
    }

    #[test]
    fn lambda_site_pushes_functional_instance() {
        let code = Code::new()
            .lambda(
                crate::testing::REF_INVOKE_STATIC,
                "com/example/Sizes",
                "lambda$m$0",
                "()V",
                "()Ljava/lang/Runnable;",
            )
            .pop()
            .ret();

        let sizes = sizes_of(code, "()V", ACC_PUBLIC | ACC_STATIC);

        assert_eq!(sizes, CodeSizes { max_stack: 1, max_locals: 0 });
    }

    #[test]
    fn underflow_is_rejected() {
        let result = try_sizes(Code::new().pop().ret(), "()V", ACC_PUBLIC | ACC_STATIC);

        assert!(result.is_err());
    }
}
