//! Reference instruction encoders
//!
//! Each mnemonic gets a macro that assembles the canonical 32-bit
//! encoding, e.g. `addi!(x1, x2, -23)`. The decoder is the left
//! inverse of these encoders, and the tests build their programs with
//! them.

use crate::instr::HALT_WORD;

/// Make a bit-mask of n bits using mask!(n)
#[macro_export]
macro_rules! mask {
    ($n:expr) => {
        (1 << $n) - 1
    };
}
pub use mask;

/// Mask a value to n least significant bits and
/// shift it left by s bits
#[macro_export]
macro_rules! mask_and_shift {
    ($val:expr, $m:expr, $s:expr) => {
        ($crate::mask!($m) & $val) << $s
    };
}
pub use mask_and_shift;

/// Return val[end:start]
#[macro_export]
macro_rules! field {
    ($val:expr, $end:expr, $start:expr) => {{
        $crate::mask!($end - $start + 1) & ($val >> $start)
    }};
}
pub use field;

/// Make an I-type instruction
#[macro_export]
macro_rules! itype {
    ($imm:expr, $rs1:expr, $funct3:expr, $rd:expr, $opcode:expr) => {
        $crate::mask_and_shift!($imm, 12, 20)
            | $crate::mask_and_shift!($rs1, 5, 15)
            | $crate::mask_and_shift!($funct3, 3, 12)
            | $crate::mask_and_shift!($rd, 5, 7)
            | $crate::mask_and_shift!($opcode, 7, 0)
    };
}
pub use itype;

/// Make an U- or J-type instruction (if you are making
/// a J-type instruction, make sure to construct the
/// immediate field correctly using jtype_imm_field)
#[macro_export]
macro_rules! ujtype {
    ($imm:expr, $rd:expr, $opcode:expr) => {
        $crate::mask_and_shift!($imm, 20, 12)
            | $crate::mask_and_shift!($rd, 5, 7)
            | $crate::mask_and_shift!($opcode, 7, 0)
    };
}
pub use ujtype;

/// Make an R- or S-type instruction. These instructions
/// have the same number of fields of the same size. The meaning
/// of a and b is:
///
/// R-type: a = funct7, b = rd
/// S-type: a = imm[11:5], b = imm[4:0]
#[macro_export]
macro_rules! rstype {
    ($a:expr, $rs2:expr, $rs1:expr, $funct3:expr, $b:expr, $opcode:expr) => {
        $crate::mask_and_shift!($a, 7, 25)
            | $crate::mask_and_shift!($rs2, 5, 20)
            | $crate::mask_and_shift!($rs1, 5, 15)
            | $crate::mask_and_shift!($funct3, 3, 12)
            | $crate::mask_and_shift!($b, 5, 7)
            | $crate::mask_and_shift!($opcode, 7, 0)
    };
}
pub use rstype;

/// Convert a RISC-V register name (e.g. x3) to the register
/// value (e.g. 3)
pub fn reg_num_impl(reg_name: &str) -> Result<u32, &'static str> {
    if reg_name.len() != 2 && reg_name.len() != 3 {
        return Err("register name must be exactly two or three characters");
    }
    let mut characters = reg_name.chars();
    if characters.next().unwrap() != 'x' {
        return Err("register name must begin with x");
    }
    let n = characters
        .collect::<String>()
        .parse::<u32>()
        .map_err(|_| "final one or two digits of register name should be numbers")?;
    Ok(n)
}

#[macro_export]
macro_rules! reg_num {
    ($reg:expr) => {
        $crate::encode::reg_num_impl(std::stringify!($reg))?
    };
}
pub use reg_num;

#[macro_export]
macro_rules! imm_as_u32 {
    ($imm:expr) => {
        (($imm) as i64) as u32
    };
}
pub use imm_as_u32;

/// The shift-by-immediate instructions use I-type,
/// but with a special encoding of the immediate that
/// uses the lower 5 bits for the shift amount (shamt)
/// and the upper 7 bits to distinguish between arithmetical
/// and logical right shift
#[macro_export]
macro_rules! shifts_imm_field {
    ($shamt:expr, $upper:expr) => {{
        let shamt = $crate::field!($shamt, 4, 0);
        ($upper << 5) | shamt
    }};
}
pub use shifts_imm_field;

/// Takes an immediate and shuffles it into the
/// format required for the 20-bit field of the
/// U-type instruction (making it J-type)
#[macro_export]
macro_rules! jtype_imm_field {
    ($imm:expr) => {{
        let imm = $crate::imm_as_u32!($imm);
        let imm20 = $crate::field!(imm, 20, 20);
        let imm19_12 = $crate::field!(imm, 19, 12);
        let imm11 = $crate::field!(imm, 11, 11);
        let imm10_1 = $crate::field!(imm, 10, 1);
        (imm20 << 19) | (imm10_1 << 9) | (imm11 << 8) | imm19_12
    }};
}
pub use jtype_imm_field;

/// Returns (a, b) suitable for use with rstype for
/// the conditional branch instructions (btype)
#[macro_export]
macro_rules! btype_imm_fields {
    ($imm:expr) => {{
        let imm = $crate::imm_as_u32!($imm);
        let imm12 = $crate::field!(imm, 12, 12);
        let imm11 = $crate::field!(imm, 11, 11);
        let imm10_5 = $crate::field!(imm, 10, 5);
        let imm4_1 = $crate::field!(imm, 4, 1);
        let a = (imm12 << 6) | imm10_5;
        let b = (imm4_1 << 1) | imm11;
        (a, b)
    }};
}
pub use btype_imm_fields;

macro_rules! itype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $imm:expr) => {{
                let rd = $crate::reg_num!($rd);
                let rs1 = $crate::reg_num!($rs1);
                let imm = $crate::imm_as_u32!($imm);
                $crate::itype!(imm, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

/// Here, upper is the only special value, which is always zero
/// apart from in srai, where it is 0b0100000.
macro_rules! shift_instr {
    ($instruction:ident, $upper:expr, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $imm:expr) => {{
                let rd = $crate::reg_num!($rd);
                let rs1 = $crate::reg_num!($rs1);
                let imm = $crate::shifts_imm_field!($imm, $upper);
                $crate::itype!(imm, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! rtype_instr {
    ($instruction:ident, $funct7:expr, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $rs2:expr) => {{
                let rd = $crate::reg_num!($rd);
                let rs1 = $crate::reg_num!($rs1);
                let rs2 = $crate::reg_num!($rs2);
                $crate::rstype!($funct7, rs2, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! stype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rs2:expr, $rs1:expr, $imm:expr) => {{
                let rs1 = $crate::reg_num!($rs1);
                let rs2 = $crate::reg_num!($rs2);
                let imm = $crate::imm_as_u32!($imm);
                let imm11_5 = $crate::field!(imm, 11, 5);
                let imm4_0 = $crate::field!(imm, 4, 0);
                $crate::rstype!(imm11_5, rs2, rs1, $funct3, imm4_0, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! btype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rs1:expr, $rs2:expr, $imm:expr) => {{
                let rs1 = $crate::reg_num!($rs1);
                let rs2 = $crate::reg_num!($rs2);
                let (a, b) = $crate::btype_imm_fields!($imm);
                $crate::rstype!(a, rs2, rs1, $funct3, b, $opcode)
            }};
        }
        pub use $instruction;
    };
}

/// Note: in these instructions (LUI and AUIPC), the immediate imm
/// is already the upper 20 bits that will be loaded -- it will not
/// be shifted up.
macro_rules! utype_instr {
    ($instruction:ident, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:expr, $imm:expr) => {{
                let rd = $crate::reg_num!($rd);
                let imm = $crate::imm_as_u32!($imm);
                $crate::ujtype!(imm, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

#[macro_export]
macro_rules! jal {
    ($rd:expr, $imm:expr) => {{
        let rd = $crate::reg_num!($rd);
        let imm = $crate::jtype_imm_field!($imm);
        $crate::ujtype!(imm, rd, 0b1101111)
    }};
}
pub use jal;

/// The halt sentinel word (the canonical encoding of `li a0, 255`,
/// reserved by this simulator to end the program)
#[macro_export]
macro_rules! halt {
    () => {
        $crate::encode::HALT
    };
}
pub use halt;

pub const HALT: u32 = HALT_WORD;

// === RV32I ===
// (Instruction listing is in chapter 19 of RISC-V specification)

utype_instr!(lui, 0b0110111);
utype_instr!(auipc, 0b0010111);
// jal is defined above
itype_instr!(jalr, 0b000, 0b1100111);

// Conditional branches
btype_instr!(beq, 0b000, 0b1100011);
btype_instr!(bne, 0b001, 0b1100011);
btype_instr!(blt, 0b100, 0b1100011);
btype_instr!(bge, 0b101, 0b1100011);
btype_instr!(bltu, 0b110, 0b1100011);
btype_instr!(bgeu, 0b111, 0b1100011);

// Loads
itype_instr!(lb, 0b000, 0b0000011);
itype_instr!(lh, 0b001, 0b0000011);
itype_instr!(lw, 0b010, 0b0000011);
itype_instr!(lbu, 0b100, 0b0000011);
itype_instr!(lhu, 0b101, 0b0000011);

// Stores
stype_instr!(sb, 0b000, 0b0100011);
stype_instr!(sh, 0b001, 0b0100011);
stype_instr!(sw, 0b010, 0b0100011);

// Integer register-immediate instructions
itype_instr!(addi, 0b000, 0b0010011);
itype_instr!(slti, 0b010, 0b0010011);
itype_instr!(sltiu, 0b011, 0b0010011);
itype_instr!(xori, 0b100, 0b0010011);
itype_instr!(ori, 0b110, 0b0010011);
itype_instr!(andi, 0b111, 0b0010011);

// Shift-by-immediate instructions
shift_instr!(slli, 0b0000000, 0b001, 0b0010011);
shift_instr!(srli, 0b0000000, 0b101, 0b0010011);
shift_instr!(srai, 0b0100000, 0b101, 0b0010011);

// Integer register-register instructions
rtype_instr!(add, 0b0000000, 0b000, 0b0110011);
rtype_instr!(sub, 0b0100000, 0b000, 0b0110011);
rtype_instr!(sll, 0b0000000, 0b001, 0b0110011);
rtype_instr!(slt, 0b0000000, 0b010, 0b0110011);
rtype_instr!(sltu, 0b0000000, 0b011, 0b0110011);
rtype_instr!(xor, 0b0000000, 0b100, 0b0110011);
rtype_instr!(srl, 0b0000000, 0b101, 0b0110011);
rtype_instr!(sra, 0b0100000, 0b101, 0b0110011);
rtype_instr!(or, 0b0000000, 0b110, 0b0110011);
rtype_instr!(and, 0b0000000, 0b111, 0b0110011);
