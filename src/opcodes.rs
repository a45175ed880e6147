use crate::classfile::{ClassFormatError, ClassResult, read_i32};

pub(crate) const NOP: u8 = 0x00;
pub(crate) const ACONST_NULL: u8 = 0x01;
pub(crate) const BIPUSH: u8 = 0x10;
pub(crate) const SIPUSH: u8 = 0x11;
pub(crate) const LDC: u8 = 0x12;
pub(crate) const LDC_W: u8 = 0x13;
pub(crate) const LDC2_W: u8 = 0x14;
pub(crate) const ILOAD: u8 = 0x15;
pub(crate) const LLOAD: u8 = 0x16;
pub(crate) const FLOAD: u8 = 0x17;
pub(crate) const DLOAD: u8 = 0x18;
pub(crate) const ALOAD: u8 = 0x19;
pub(crate) const ISTORE: u8 = 0x36;
pub(crate) const LSTORE: u8 = 0x37;
pub(crate) const FSTORE: u8 = 0x38;
pub(crate) const DSTORE: u8 = 0x39;
pub(crate) const ASTORE: u8 = 0x3a;
pub(crate) const POP: u8 = 0x57;
pub(crate) const IINC: u8 = 0x84;
pub(crate) const IFEQ: u8 = 0x99;
pub(crate) const GOTO: u8 = 0xa7;
pub(crate) const JSR: u8 = 0xa8;
pub(crate) const RET: u8 = 0xa9;
pub(crate) const TABLESWITCH: u8 = 0xaa;
pub(crate) const LOOKUPSWITCH: u8 = 0xab;
pub(crate) const IRETURN: u8 = 0xac;
pub(crate) const LRETURN: u8 = 0xad;
pub(crate) const FRETURN: u8 = 0xae;
pub(crate) const DRETURN: u8 = 0xaf;
pub(crate) const ARETURN: u8 = 0xb0;
pub(crate) const RETURN: u8 = 0xb1;
pub(crate) const GETSTATIC: u8 = 0xb2;
pub(crate) const PUTSTATIC: u8 = 0xb3;
pub(crate) const GETFIELD: u8 = 0xb4;
pub(crate) const PUTFIELD: u8 = 0xb5;
pub(crate) const INVOKEVIRTUAL: u8 = 0xb6;
pub(crate) const INVOKESPECIAL: u8 = 0xb7;
pub(crate) const INVOKESTATIC: u8 = 0xb8;
pub(crate) const INVOKEINTERFACE: u8 = 0xb9;
pub(crate) const INVOKEDYNAMIC: u8 = 0xba;
pub(crate) const NEW: u8 = 0xbb;
pub(crate) const ATHROW: u8 = 0xbf;
pub(crate) const WIDE: u8 = 0xc4;
pub(crate) const MULTIANEWARRAY: u8 = 0xc5;
pub(crate) const IFNULL: u8 = 0xc6;
pub(crate) const IFNONNULL: u8 = 0xc7;
pub(crate) const GOTO_W: u8 = 0xc8;
pub(crate) const JSR_W: u8 = 0xc9;

/// One decoded instruction position.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: usize,
    pub(crate) opcode: u8,
    pub(crate) length: usize,
}

/// Split a method's bytecode into instructions.
pub(crate) fn instructions(code: &[u8]) -> ClassResult<Vec<Instruction>> {
    let mut result = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let length = opcode_length(code, offset)?;
        if offset + length > code.len() {
            return Err(ClassFormatError::new(offset, "truncated instruction"));
        }
        result.push(Instruction {
            offset,
            opcode: code[offset],
            length,
        });
        offset += length;
    }
    Ok(result)
}

/// Encoded length of the instruction at `offset`, operands included.
pub(crate) fn opcode_length(code: &[u8], offset: usize) -> ClassResult<usize> {
    let opcode = *code
        .get(offset)
        .ok_or_else(|| ClassFormatError::new(offset, "instruction past end of code"))?;
    let length = match opcode {
        0x00..=0x0f => 1,
        BIPUSH | LDC => 2,
        SIPUSH | LDC_W | LDC2_W => 3,
        ILOAD..=ALOAD => 2,
        0x1a..=0x35 => 1,
        ISTORE..=ASTORE => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        IFEQ..=JSR => 3,
        RET => 2,
        TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = (high as i64) - (low as i64) + 1;
            if count < 0 {
                return Err(ClassFormatError::new(offset, "invalid tableswitch range"));
            }
            1 + padding(offset) + 12 + 4 * count as usize
        }
        LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                return Err(ClassFormatError::new(offset, "invalid lookupswitch size"));
            }
            1 + padding(offset) + 8 + 8 * pairs as usize
        }
        IRETURN..=RETURN => 1,
        GETSTATIC..=INVOKESTATIC => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        NEW => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | ATHROW => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        WIDE => match code.get(offset + 1) {
            Some(&IINC) => 6,
            Some(_) => 4,
            None => return Err(ClassFormatError::new(offset, "truncated wide instruction")),
        },
        MULTIANEWARRAY => 4,
        IFNULL | IFNONNULL => 3,
        GOTO_W | JSR_W => 5,
        _ => {
            return Err(ClassFormatError::new(
                offset,
                format!("unknown opcode 0x{opcode:02x}"),
            ));
        }
    };
    Ok(length)
}

/// Alignment bytes after a switch opcode.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}
