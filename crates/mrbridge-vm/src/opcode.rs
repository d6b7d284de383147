//! Instruction set
//!
//! A small stack machine. Operands follow the opcode byte, little-endian.
//!
//! Categories:
//! - 0x00-0x0C: stack manipulation, literals, locals, constants
//! - 0x0D-0x11: sends and jumps
//! - 0x12-0x15: definitions
//! - 0x16-0x1A: exceptions and returns
//! - 0x1B-0x1C: singleton definitions and array literals

use crate::DecodeError;

/// Operand width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// One unsigned byte
    U8,
    /// Two-byte unsigned
    U16,
    /// Four-byte unsigned
    U32,
    /// Four-byte signed
    I32,
}

impl Operand {
    /// Encoded width in bytes
    pub const fn width(self) -> usize {
        match self {
            Operand::U8 => 1,
            Operand::U16 => 2,
            Operand::U32 | Operand::I32 => 4,
        }
    }
}

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack & literals =====
    /// No operation
    Nop = 0x00,
    /// Discard top of stack
    Pop = 0x01,
    /// Duplicate top of stack
    Dup = 0x02,
    /// Push nil
    LoadNil = 0x03,
    /// Push true
    LoadTrue = 0x04,
    /// Push false
    LoadFalse = 0x05,
    /// Push self
    LoadSelf = 0x06,
    /// Push small integer (operand: i32)
    LoadI = 0x07,
    /// Push literal from pool (operand: u16 pool index)
    LoadL = 0x08,
    /// Push symbol (operand: u16 symbol index)
    LoadSym = 0x09,
    /// Push local (operand: u16 slot)
    GetLocal = 0x0A,
    /// Store top into local, leaving it on the stack (operand: u16 slot)
    SetLocal = 0x0B,
    /// Push constant (operand: u16 symbol index)
    GetConst = 0x0C,

    // ===== Calls & control flow =====
    /// Call with explicit receiver (operands: u16 symbol, u8 argc)
    Send = 0x0D,
    /// Call on self (operands: u16 symbol, u8 argc)
    SSend = 0x0E,
    /// Unconditional jump (operand: u32 absolute target)
    Jmp = 0x0F,
    /// Pop and jump if truthy (operand: u32)
    JmpIf = 0x10,
    /// Pop and jump if falsey (operand: u32)
    JmpNot = 0x11,

    // ===== Definitions =====
    /// Define method on the target class (operands: u16 symbol, u16 child)
    Def = 0x12,
    /// Open or create class (operands: u16 symbol, u8 has_super)
    Class = 0x13,
    /// Open or create module (operand: u16 symbol)
    Module = 0x14,
    /// Run child body with popped class as self (operand: u16 child)
    Exec = 0x15,

    // ===== Exceptions & return =====
    /// Push the pending exception and clear the slot
    Except = 0x16,
    /// Pop class, push whether top of stack is an instance of it
    Rescue = 0x17,
    /// Pop exception and raise it
    Raise = 0x18,
    /// Return top of stack
    Return = 0x19,
    /// Logical not of top of stack
    Not = 0x1A,

    // ===== Singletons & arrays =====
    /// Define method on self, which must be a class or module
    /// (operands: u16 symbol, u16 child)
    SDef = 0x1B,
    /// Pop the given number of values into a new array (operand: u16 count)
    Array = 0x1C,
}

impl Opcode {
    /// Convert byte to opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => Pop,
            0x02 => Dup,
            0x03 => LoadNil,
            0x04 => LoadTrue,
            0x05 => LoadFalse,
            0x06 => LoadSelf,
            0x07 => LoadI,
            0x08 => LoadL,
            0x09 => LoadSym,
            0x0A => GetLocal,
            0x0B => SetLocal,
            0x0C => GetConst,
            0x0D => Send,
            0x0E => SSend,
            0x0F => Jmp,
            0x10 => JmpIf,
            0x11 => JmpNot,
            0x12 => Def,
            0x13 => Class,
            0x14 => Module,
            0x15 => Exec,
            0x16 => Except,
            0x17 => Rescue,
            0x18 => Raise,
            0x19 => Return,
            0x1A => Not,
            0x1B => SDef,
            0x1C => Array,
            _ => return None,
        })
    }

    /// Convert opcode to byte
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Operand layout following the opcode byte
    pub const fn operands(self) -> &'static [Operand] {
        use Opcode::*;
        match self {
            Nop | Pop | Dup | LoadNil | LoadTrue | LoadFalse | LoadSelf | Except | Rescue
            | Raise | Return | Not => &[],
            LoadI => &[Operand::I32],
            LoadL | LoadSym | GetLocal | SetLocal | GetConst | Module | Exec | Array => {
                &[Operand::U16]
            }
            Send | SSend | Class => &[Operand::U16, Operand::U8],
            Jmp | JmpIf | JmpNot => &[Operand::U32],
            Def | SDef => &[Operand::U16, Operand::U16],
        }
    }

    /// Encoded length including the opcode byte
    pub fn encoded_len(self) -> usize {
        1 + self.operands().iter().map(|o| o.width()).sum::<usize>()
    }

    /// Mnemonic
    pub const fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Pop => "POP",
            Dup => "DUP",
            LoadNil => "LOADNIL",
            LoadTrue => "LOADTRUE",
            LoadFalse => "LOADFALSE",
            LoadSelf => "LOADSELF",
            LoadI => "LOADI",
            LoadL => "LOADL",
            LoadSym => "LOADSYM",
            GetLocal => "GETLOCAL",
            SetLocal => "SETLOCAL",
            GetConst => "GETCONST",
            Send => "SEND",
            SSend => "SSEND",
            Jmp => "JMP",
            JmpIf => "JMPIF",
            JmpNot => "JMPNOT",
            Def => "DEF",
            Class => "CLASS",
            Module => "MODULE",
            Exec => "EXEC",
            Except => "EXCEPT",
            Rescue => "RESCUE",
            Raise => "RAISE",
            Return => "RETURN",
            Not => "NOT",
            SDef => "SDEF",
            Array => "ARRAY",
        }
    }
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode byte
    pub pc: usize,
    /// Opcode
    pub opcode: Opcode,
    operands: [i64; 2],
}

impl Instruction {
    /// Decoded operands, as many as the opcode takes
    pub fn operands(&self) -> &[i64] {
        &self.operands[..self.opcode.operands().len()]
    }

    /// First operand as an index
    #[inline]
    pub fn a(&self) -> usize {
        self.operands[0] as usize
    }

    /// Second operand as an index
    #[inline]
    pub fn b(&self) -> usize {
        self.operands[1] as usize
    }

    /// First operand, signed
    #[inline]
    pub fn a_signed(&self) -> i64 {
        self.operands[0]
    }

    /// Offset of the following instruction
    pub fn next_pc(&self) -> usize {
        self.pc + self.opcode.encoded_len()
    }
}

/// Decode the instruction at `pc`
pub fn decode(iseq: &[u8], pc: usize) -> Result<Instruction, DecodeError> {
    let byte = *iseq.get(pc).ok_or(DecodeError::UnexpectedEnd(pc))?;
    let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, pc))?;
    let mut operands = [0i64; 2];
    let mut at = pc + 1;
    for (slot, operand) in operands.iter_mut().zip(opcode.operands()) {
        let width = operand.width();
        let bytes = iseq
            .get(at..at + width)
            .ok_or(DecodeError::UnexpectedEnd(at))?;
        *slot = match operand {
            Operand::U8 => bytes[0] as i64,
            Operand::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            Operand::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
            Operand::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        };
        at += width;
    }
    Ok(Instruction { pc, opcode, operands })
}

/// Iterator over the instructions of an instruction sequence
///
/// Stops after the first decode error, yielding it.
pub struct Decoder<'a> {
    iseq: &'a [u8],
    pc: usize,
    failed: bool,
}

impl<'a> Decoder<'a> {
    /// Decode from the start of `iseq`
    pub fn new(iseq: &'a [u8]) -> Self {
        Self {
            iseq,
            pc: 0,
            failed: false,
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pc >= self.iseq.len() {
            return None;
        }
        match decode(self.iseq, self.pc) {
            Ok(ins) => {
                self.pc = ins.next_pc();
                Some(Ok(ins))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Instruction sequence writer
#[derive(Debug, Default)]
pub struct IseqWriter {
    buffer: Vec<u8>,
}

impl IseqWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Emit an opcode without operands
    pub fn emit(&mut self, op: Opcode) {
        debug_assert!(op.operands().is_empty());
        self.buffer.push(op.to_u8());
    }

    /// Emit an opcode with a single u16 operand
    pub fn emit_u16(&mut self, op: Opcode, a: u16) {
        self.buffer.push(op.to_u8());
        self.buffer.extend_from_slice(&a.to_le_bytes());
    }

    /// Emit an opcode with u16 and u8 operands
    pub fn emit_u16_u8(&mut self, op: Opcode, a: u16, b: u8) {
        self.emit_u16(op, a);
        self.buffer.push(b);
    }

    /// Emit an opcode with two u16 operands
    pub fn emit_u16_u16(&mut self, op: Opcode, a: u16, b: u16) {
        self.emit_u16(op, a);
        self.buffer.extend_from_slice(&b.to_le_bytes());
    }

    /// Emit `LOADI`
    pub fn emit_i32(&mut self, op: Opcode, a: i32) {
        self.buffer.push(op.to_u8());
        self.buffer.extend_from_slice(&a.to_le_bytes());
    }

    /// Emit a jump with a placeholder target, returning the patch offset
    pub fn emit_jump(&mut self, op: Opcode) -> usize {
        self.buffer.push(op.to_u8());
        let at = self.buffer.len();
        self.buffer.extend_from_slice(&u32::MAX.to_le_bytes());
        at
    }

    /// Emit a jump to a known target
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        let at = self.emit_jump(op);
        self.patch(at, target);
    }

    /// Point the jump operand at `at` to `target`
    pub fn patch(&mut self, at: usize, target: usize) {
        self.buffer[at..at + 4].copy_from_slice(&(target as u32).to_le_bytes());
    }

    /// Finish
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0x00..=0x1C {
            let op = Opcode::from_u8(byte).unwrap();
            assert_eq!(op.to_u8(), byte);
        }
        assert_eq!(Opcode::from_u8(0x1D), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(Opcode::Nop.encoded_len(), 1);
        assert_eq!(Opcode::LoadI.encoded_len(), 5);
        assert_eq!(Opcode::Send.encoded_len(), 4);
        assert_eq!(Opcode::Def.encoded_len(), 5);
        assert_eq!(Opcode::Jmp.encoded_len(), 5);
    }

    #[test]
    fn test_decode_operands() {
        let mut w = IseqWriter::new();
        w.emit_i32(Opcode::LoadI, -7);
        w.emit_u16_u8(Opcode::Send, 300, 2);
        w.emit(Opcode::Return);
        let bytes = w.into_bytes();

        let ins: Vec<_> = Decoder::new(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(ins.len(), 3);
        assert_eq!(ins[0].opcode, Opcode::LoadI);
        assert_eq!(ins[0].operands(), &[-7]);
        assert_eq!(ins[1].pc, 5);
        assert_eq!(ins[1].operands(), &[300, 2]);
        assert!(ins[2].operands().is_empty());
    }

    #[test]
    fn test_jump_patch() {
        let mut w = IseqWriter::new();
        let at = w.emit_jump(Opcode::JmpNot);
        w.emit(Opcode::Nop);
        let target = w.offset();
        w.patch(at, target);
        let bytes = w.into_bytes();
        let ins = decode(&bytes, 0).unwrap();
        assert_eq!(ins.a(), target);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(&[0xEE], 0), Err(DecodeError::InvalidOpcode(0xEE, 0))));
        assert!(matches!(decode(&[0x07, 1, 2], 0), Err(DecodeError::UnexpectedEnd(1))));
        let mut it = Decoder::new(&[0x00, 0xEE, 0x00]);
        assert!(it.next().unwrap().is_ok());
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }
}
