use crate::instr::{Instr, Op, HALT_WORD};
use crate::opcodes::*;
use crate::utils::{extract_field, interpret_u32_as_signed, sign_extend};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("got invalid or unimplemented opcode in word 0x{0:08x}")]
    InvalidOpcode(u32),
    #[error("got invalid function field in word 0x{0:08x}")]
    InvalidFunction(u32),
}

fn rd(word: u32) -> u8 {
    extract_field(word, 11, 7) as u8
}

fn rs1(word: u32) -> u8 {
    extract_field(word, 19, 15) as u8
}

fn rs2(word: u32) -> u8 {
    extract_field(word, 24, 20) as u8
}

fn funct3(word: u32) -> u32 {
    extract_field(word, 14, 12)
}

fn funct7(word: u32) -> u32 {
    extract_field(word, 31, 25)
}

/// Bit 30 distinguishes the arithmetic right shifts (sra, srai) from
/// the logical ones, both in the funct7 field and inside the I-type
/// immediate of the shift-by-immediate encoding.
fn is_arithmetic_shift(word: u32) -> bool {
    extract_field(word, 30, 30) == 1
}

fn imm_itype(word: u32) -> i32 {
    interpret_u32_as_signed(sign_extend(extract_field(word, 31, 20), 11))
}

fn imm_stype(word: u32) -> i32 {
    let imm11_5 = extract_field(word, 31, 25);
    let imm4_0 = extract_field(word, 11, 7);
    interpret_u32_as_signed(sign_extend((imm11_5 << 5) | imm4_0, 11))
}

fn imm_btype(word: u32) -> i32 {
    let imm12 = extract_field(word, 31, 31);
    let imm11 = extract_field(word, 7, 7);
    let imm10_5 = extract_field(word, 30, 25);
    let imm4_1 = extract_field(word, 11, 8);
    let imm = (imm12 << 12) | (imm11 << 11) | (imm10_5 << 5) | (imm4_1 << 1);
    interpret_u32_as_signed(sign_extend(imm, 12))
}

fn imm_utype(word: u32) -> i32 {
    interpret_u32_as_signed(word & 0xffff_f000)
}

fn imm_jtype(word: u32) -> i32 {
    let imm20 = extract_field(word, 31, 31);
    let imm19_12 = extract_field(word, 19, 12);
    let imm11 = extract_field(word, 20, 20);
    let imm10_1 = extract_field(word, 30, 21);
    let imm = (imm20 << 20) | (imm19_12 << 12) | (imm11 << 11) | (imm10_1 << 1);
    interpret_u32_as_signed(sign_extend(imm, 20))
}

/// Decode one 32-bit word fetched at pc
///
/// The halt sentinel word is recognised before any field breakdown.
/// Branches and stores have no destination register, so `rd` is zero
/// for them. Unknown opcodes or function fields are errors; the caller
/// treats them as fatal.
pub fn decode(word: u32, pc: u32) -> Result<Instr, DecodeError> {
    if word == HALT_WORD {
        return Ok(Instr {
            op: Op::Halt,
            rd: 0,
            rs1: 0,
            rs2: 0,
            imm: 0,
            pc,
        });
    }
    let opcode = extract_field(word, 6, 0);
    let (op, rd, rs1, rs2, imm) = match opcode {
        OP_LUI => (Op::Lui, rd(word), 0, 0, imm_utype(word)),
        OP_AUIPC => (Op::Auipc, rd(word), 0, 0, imm_utype(word)),
        OP_JAL => (Op::Jal, rd(word), 0, 0, imm_jtype(word)),
        OP_JALR => {
            if funct3(word) != 0 {
                return Err(DecodeError::InvalidFunction(word));
            }
            (Op::Jalr, rd(word), rs1(word), 0, imm_itype(word))
        }
        OP_BRANCH => {
            let op = match funct3(word) {
                FUNCT3_BEQ => Op::Beq,
                FUNCT3_BNE => Op::Bne,
                FUNCT3_BLT => Op::Blt,
                FUNCT3_BGE => Op::Bge,
                FUNCT3_BLTU => Op::Bltu,
                FUNCT3_BGEU => Op::Bgeu,
                _ => return Err(DecodeError::InvalidFunction(word)),
            };
            (op, 0, rs1(word), rs2(word), imm_btype(word))
        }
        OP_LOAD => {
            let op = match funct3(word) {
                FUNCT3_B => Op::Lb,
                FUNCT3_H => Op::Lh,
                FUNCT3_W => Op::Lw,
                FUNCT3_BU => Op::Lbu,
                FUNCT3_HU => Op::Lhu,
                _ => return Err(DecodeError::InvalidFunction(word)),
            };
            (op, rd(word), rs1(word), 0, imm_itype(word))
        }
        OP_STORE => {
            let op = match funct3(word) {
                FUNCT3_B => Op::Sb,
                FUNCT3_H => Op::Sh,
                FUNCT3_W => Op::Sw,
                _ => return Err(DecodeError::InvalidFunction(word)),
            };
            (op, 0, rs1(word), rs2(word), imm_stype(word))
        }
        OP_IMM => {
            let op = match funct3(word) {
                FUNCT3_ADDI => Op::Addi,
                FUNCT3_SLTI => Op::Slti,
                FUNCT3_SLTIU => Op::Sltiu,
                FUNCT3_XORI => Op::Xori,
                FUNCT3_ORI => Op::Ori,
                FUNCT3_ANDI => Op::Andi,
                FUNCT3_SLLI => Op::Slli,
                FUNCT3_SRLI => {
                    if is_arithmetic_shift(word) {
                        Op::Srai
                    } else {
                        Op::Srli
                    }
                }
                _ => return Err(DecodeError::InvalidFunction(word)),
            };
            (op, rd(word), rs1(word), 0, imm_itype(word))
        }
        OP => {
            let op = match (funct3(word), funct7(word)) {
                (FUNCT3_ADD, FUNCT7_ZERO) => Op::Add,
                (FUNCT3_ADD, FUNCT7_SUB) => Op::Sub,
                (FUNCT3_SLL, FUNCT7_ZERO) => Op::Sll,
                (FUNCT3_SLT, FUNCT7_ZERO) => Op::Slt,
                (FUNCT3_SLTU, FUNCT7_ZERO) => Op::Sltu,
                (FUNCT3_XOR, FUNCT7_ZERO) => Op::Xor,
                (FUNCT3_SRL, FUNCT7_SRA) => Op::Sra,
                (FUNCT3_SRL, FUNCT7_ZERO) => Op::Srl,
                (FUNCT3_OR, FUNCT7_ZERO) => Op::Or,
                (FUNCT3_AND, FUNCT7_ZERO) => Op::And,
                _ => return Err(DecodeError::InvalidFunction(word)),
            };
            (op, rd(word), rs1(word), rs2(word), 0)
        }
        _ => return Err(DecodeError::InvalidOpcode(word)),
    };
    Ok(Instr {
        op,
        rd,
        rs1,
        rs2,
        imm,
        pc,
    })
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::*;

    #[test]
    fn check_decode_addi() -> Result<(), &'static str> {
        let instr = decode(addi!(x1, x2, -23), 0).unwrap();
        assert_eq!(instr.op, Op::Addi);
        assert_eq!(instr.rd, 1);
        assert_eq!(instr.rs1, 2);
        assert_eq!(instr.imm, -23);
        Ok(())
    }

    #[test]
    fn check_decode_reg_reg() -> Result<(), &'static str> {
        let instr = decode(add!(x5, x6, x7), 0).unwrap();
        assert_eq!(instr.op, Op::Add);
        assert_eq!(instr.rd, 5);
        assert_eq!(instr.rs1, 6);
        assert_eq!(instr.rs2, 7);

        let instr = decode(sub!(x5, x6, x7), 0).unwrap();
        assert_eq!(instr.op, Op::Sub);

        let instr = decode(sltu!(x5, x6, x7), 0).unwrap();
        assert_eq!(instr.op, Op::Sltu);
        Ok(())
    }

    #[test]
    fn check_decode_shift_immediates() -> Result<(), &'static str> {
        // Bit 30 of the raw word separates srai from srli
        let instr = decode(srai!(x1, x2, 4), 0).unwrap();
        assert_eq!(instr.op, Op::Srai);
        assert_eq!(instr.imm & 0x1f, 4);

        let instr = decode(srli!(x1, x2, 4), 0).unwrap();
        assert_eq!(instr.op, Op::Srli);
        assert_eq!(instr.imm, 4);

        let instr = decode(slli!(x1, x2, 31), 0).unwrap();
        assert_eq!(instr.op, Op::Slli);
        assert_eq!(instr.imm, 31);
        Ok(())
    }

    #[test]
    fn check_decode_branch_offset_scaling() -> Result<(), &'static str> {
        // B-type immediates have their low bit hard-wired to zero
        let instr = decode(beq!(x1, x2, 16), 0).unwrap();
        assert_eq!(instr.op, Op::Beq);
        assert_eq!(instr.rd, 0);
        assert_eq!(instr.rs1, 1);
        assert_eq!(instr.rs2, 2);
        assert_eq!(instr.imm, 16);

        let instr = decode(bge!(x3, x4, -4096), 0).unwrap();
        assert_eq!(instr.op, Op::Bge);
        assert_eq!(instr.imm, -4096);
        Ok(())
    }

    #[test]
    fn check_decode_jumps() -> Result<(), &'static str> {
        let instr = decode(jal!(x1, -8), 0).unwrap();
        assert_eq!(instr.op, Op::Jal);
        assert_eq!(instr.rd, 1);
        assert_eq!(instr.imm, -8);

        let instr = decode(jalr!(x2, x3, 9), 0).unwrap();
        assert_eq!(instr.op, Op::Jalr);
        assert_eq!(instr.rd, 2);
        assert_eq!(instr.rs1, 3);
        assert_eq!(instr.imm, 9);
        Ok(())
    }

    #[test]
    fn check_decode_upper_immediates() -> Result<(), &'static str> {
        // The U-type immediate lands pre-shifted into bits 31..12
        let instr = decode(lui!(x2, 53), 0).unwrap();
        assert_eq!(instr.op, Op::Lui);
        assert_eq!(instr.rd, 2);
        assert_eq!(instr.imm, 53 << 12);

        let instr = decode(auipc!(x4, 0xfffff), 0).unwrap();
        assert_eq!(instr.op, Op::Auipc);
        assert_eq!(instr.imm, -4096);
        Ok(())
    }

    #[test]
    fn check_decode_loads_and_stores() -> Result<(), &'static str> {
        let instr = decode(lw!(x1, x2, -16), 0).unwrap();
        assert_eq!(instr.op, Op::Lw);
        assert_eq!(instr.rd, 1);
        assert_eq!(instr.rs1, 2);
        assert_eq!(instr.imm, -16);

        let instr = decode(lbu!(x8, x9, 3), 0).unwrap();
        assert_eq!(instr.op, Op::Lbu);

        let instr = decode(sh!(x1, x2, 10), 0).unwrap();
        assert_eq!(instr.op, Op::Sh);
        assert_eq!(instr.rd, 0);
        assert_eq!(instr.rs1, 2);
        assert_eq!(instr.rs2, 1);
        assert_eq!(instr.imm, 10);
        Ok(())
    }

    #[test]
    fn check_halt_sentinel_decodes_to_halt() {
        // 0x0ff00513 would otherwise be addi x10, x0, 255
        let instr = decode(HALT_WORD, 36).unwrap();
        assert_eq!(instr.op, Op::Halt);
        assert_eq!(instr.pc, 36);
    }

    #[test]
    fn check_unknown_opcode_is_an_error() {
        let result = decode(0x0000007f, 0);
        assert_eq!(result.unwrap_err(), DecodeError::InvalidOpcode(0x7f));
    }

    #[test]
    fn check_unknown_function_is_an_error() {
        // R-type encoding with a nonsense funct7
        let word = (0x7f << 25) | 0b0110011;
        let result = decode(word, 0);
        assert_eq!(result.unwrap_err(), DecodeError::InvalidFunction(word));
    }
}
