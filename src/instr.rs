use std::fmt;

use crate::utils::{interpret_i32_as_unsigned, interpret_u32_as_signed};

/// The exact word that terminates simulation when it reaches the head
/// of the reorder buffer. It is recognised before any field breakdown.
pub const HALT_WORD: u32 = 0x0ff00513;

/// RV32I base integer operations
///
/// One tag per primitive operation. The groups are:
///
/// * register-register ALU forms (`Add` to `Sltu`), computing between
///   two register operands;
/// * register-immediate ALU forms (`Addi` to `Sltiu`), computing
///   between a register and the sign-extended 12-bit immediate;
/// * loads (`Lb` to `Lhu`): `lb`/`lh` sign-extend, `lbu`/`lhu`
///   zero-extend, `lw` reads a full word;
/// * stores (`Sb`, `Sh`, `Sw`), writing 1, 2 or 4 bytes;
/// * conditional branches (`Beq` to `Bgeu`): `blt`/`bge` compare
///   signed, `bltu`/`bgeu` unsigned;
/// * unconditional jumps `Jal` and `Jalr`, which write pc + 4 to the
///   destination and redirect the program counter;
/// * upper-immediate forms `Lui` and `Auipc`;
/// * `Halt`, the decoding of the halt sentinel word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sra,
    Slt,
    Sltu,
    Addi,
    Andi,
    Ori,
    Xori,
    Slli,
    Srli,
    Srai,
    Slti,
    Sltiu,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Sb,
    Sh,
    Sw,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Jal,
    Jalr,
    Lui,
    Auipc,
    Halt,
}

impl Op {
    /// True for both register-register and register-immediate ALU forms
    pub fn is_alu(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Sub
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Sll
                | Op::Srl
                | Op::Sra
                | Op::Slt
                | Op::Sltu
                | Op::Addi
                | Op::Andi
                | Op::Ori
                | Op::Xori
                | Op::Slli
                | Op::Srli
                | Op::Srai
                | Op::Slti
                | Op::Sltiu
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Op::Beq | Op::Bne | Op::Blt | Op::Bge | Op::Bltu | Op::Bgeu
        )
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Op::Jal | Op::Jalr)
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Op::Lb | Op::Lh | Op::Lw | Op::Lbu | Op::Lhu)
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Op::Sb | Op::Sh | Op::Sw)
    }

    /// True when execution consumes the first source register
    pub fn reads_rs1(&self) -> bool {
        !matches!(self, Op::Lui | Op::Auipc | Op::Jal | Op::Halt)
    }

    /// True when execution consumes the second source register. The
    /// immediate forms take the immediate instead, and `jalr` takes
    /// only its base register.
    pub fn reads_rs2(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Sub
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Sll
                | Op::Srl
                | Op::Sra
                | Op::Slt
                | Op::Sltu
        ) || self.is_branch()
            || self.is_store()
    }

    /// Execution latency in cycles: one for anything the ALU handles,
    /// three for a memory access (the load read and the store write)
    pub fn latency(&self) -> u32 {
        if self.is_load() || self.is_store() {
            3
        } else {
            1
        }
    }

    /// Compute an ALU result from the operand values and immediate
    ///
    /// Register-register forms combine `vj` and `vk`; immediate forms
    /// combine `vj` and `imm`. Shift counts take the low 5 bits of the
    /// second operand. `lui` produces the (pre-shifted) U-type
    /// immediate. Additions and subtractions wrap modulo 2^32.
    pub fn apply(&self, vj: u32, vk: u32, imm: i32) -> u32 {
        let imm = interpret_i32_as_unsigned(imm);
        match self {
            Op::Add => vj.wrapping_add(vk),
            Op::Sub => vj.wrapping_sub(vk),
            Op::And => vj & vk,
            Op::Or => vj | vk,
            Op::Xor => vj ^ vk,
            Op::Sll => vj << (0x1f & vk),
            Op::Srl => vj >> (0x1f & vk),
            Op::Sra => {
                interpret_i32_as_unsigned(interpret_u32_as_signed(vj) >> (0x1f & vk))
            }
            Op::Slt => {
                (interpret_u32_as_signed(vj) < interpret_u32_as_signed(vk)) as u32
            }
            Op::Sltu => (vj < vk) as u32,
            Op::Addi => vj.wrapping_add(imm),
            Op::Andi => vj & imm,
            Op::Ori => vj | imm,
            Op::Xori => vj ^ imm,
            Op::Slli => vj << (0x1f & imm),
            Op::Srli => vj >> (0x1f & imm),
            Op::Srai => {
                interpret_i32_as_unsigned(interpret_u32_as_signed(vj) >> (0x1f & imm))
            }
            Op::Slti => {
                (interpret_u32_as_signed(vj) < interpret_u32_as_signed(imm)) as u32
            }
            Op::Sltiu => (vj < imm) as u32,
            Op::Lui => imm,
            _ => unreachable!("{self:?} is not an ALU operation"),
        }
    }

    /// Evaluate a conditional-branch relation between two operand values
    pub fn branch_taken(&self, vj: u32, vk: u32) -> bool {
        match self {
            Op::Beq => vj == vk,
            Op::Bne => vj != vk,
            Op::Blt => interpret_u32_as_signed(vj) < interpret_u32_as_signed(vk),
            Op::Bge => interpret_u32_as_signed(vj) >= interpret_u32_as_signed(vk),
            Op::Bltu => vj < vk,
            Op::Bgeu => vj >= vk,
            _ => unreachable!("{self:?} is not a conditional branch"),
        }
    }

    fn mnemonic(&self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Sll => "sll",
            Op::Srl => "srl",
            Op::Sra => "sra",
            Op::Slt => "slt",
            Op::Sltu => "sltu",
            Op::Addi => "addi",
            Op::Andi => "andi",
            Op::Ori => "ori",
            Op::Xori => "xori",
            Op::Slli => "slli",
            Op::Srli => "srli",
            Op::Srai => "srai",
            Op::Slti => "slti",
            Op::Sltiu => "sltiu",
            Op::Lb => "lb",
            Op::Lh => "lh",
            Op::Lw => "lw",
            Op::Lbu => "lbu",
            Op::Lhu => "lhu",
            Op::Sb => "sb",
            Op::Sh => "sh",
            Op::Sw => "sw",
            Op::Beq => "beq",
            Op::Bne => "bne",
            Op::Blt => "blt",
            Op::Bge => "bge",
            Op::Bltu => "bltu",
            Op::Bgeu => "bgeu",
            Op::Jal => "jal",
            Op::Jalr => "jalr",
            Op::Lui => "lui",
            Op::Auipc => "auipc",
            Op::Halt => "halt",
        }
    }
}

/// A decoded instruction
///
/// Register indices are 0-31. The immediate is already sign-extended
/// according to the encoding class of the instruction; branch and jump
/// immediates are byte offsets (scaled by two at decode), and the
/// U-type immediate is pre-shifted into bits 31..12. `pc` is the
/// address the word was fetched from.
#[derive(Debug, Clone, Copy)]
pub struct Instr {
    pub op: Op,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i32,
    pub pc: u32,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Instr {
            op,
            rd,
            rs1,
            rs2,
            imm,
            ..
        } = self;
        let mnemonic = op.mnemonic();
        if op.is_branch() {
            write!(f, "{mnemonic} x{rs1}, x{rs2}, {imm}")
        } else if op.is_load() {
            write!(f, "{mnemonic} x{rd}, {imm}(x{rs1})")
        } else if op.is_store() {
            write!(f, "{mnemonic} x{rs2}, {imm}(x{rs1})")
        } else if op.reads_rs2() {
            write!(f, "{mnemonic} x{rd}, x{rs1}, x{rs2}")
        } else {
            match op {
                Op::Lui | Op::Auipc => {
                    write!(f, "{mnemonic} x{rd}, {}", (*imm as u32) >> 12)
                }
                Op::Jal => write!(f, "{mnemonic} x{rd}, {imm}"),
                Op::Jalr => write!(f, "{mnemonic} x{rd}, x{rs1}, {imm}"),
                Op::Halt => write!(f, "{mnemonic}"),
                _ => write!(f, "{mnemonic} x{rd}, x{rs1}, {imm}"),
            }
        }
    }
}
