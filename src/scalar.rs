//! In-order scalar reference interpreter
//!
//! Executes one instruction per step over the same decoder, memory
//! and register file as the pipeline, with none of the pipeline
//! machinery. Used as the differential oracle in tests and selectable
//! from the driver for debugging: for any program that reaches the
//! halt sentinel, the result must match the out-of-order core.

use tracing::debug;

use crate::core::SimError;
use crate::decode::decode;
use crate::instr::{Instr, Op};
use crate::memory::{Memory, Wordsize};
use crate::regfile::RegisterFile;
use crate::utils::sign_extend;

#[derive(Debug, Default)]
pub struct Scalar {
    pc: u32,
    regs: RegisterFile,
    memory: Memory,
    halted: bool,
    steps: u64,
}

impl Scalar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn register(&self, n: u8) -> u32 {
        self.regs.read(n)
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// The program result: register x10 masked to its low 8 bits
    pub fn result(&self) -> u32 {
        self.regs.read(10) & 0xff
    }

    /// Fetch, decode and execute the instruction at the pc
    pub fn step(&mut self) -> Result<(), SimError> {
        let Some(word) = self.memory.peek_word(self.pc) else {
            return Err(SimError::PcOutOfBounds { pc: self.pc });
        };
        let instr = decode(word, self.pc)?;
        self.execute(&instr)?;
        self.steps += 1;
        Ok(())
    }

    /// Run to the halt sentinel, returning the result
    pub fn run(&mut self) -> Result<u32, SimError> {
        while !self.halted {
            self.step()?;
        }
        debug!(steps = self.steps, "halted");
        Ok(self.result())
    }

    fn execute(&mut self, instr: &Instr) -> Result<(), SimError> {
        let &Instr {
            op,
            rd,
            rs1,
            rs2,
            imm,
            ..
        } = instr;
        let mut next_pc = self.pc.wrapping_add(4);
        match op {
            Op::Halt => {
                self.halted = true;
                return Ok(());
            }
            Op::Auipc => {
                self.regs.write(rd, self.pc.wrapping_add(imm as u32));
            }
            Op::Jal => {
                self.regs.write(rd, next_pc);
                next_pc = self.pc.wrapping_add(imm as u32);
            }
            Op::Jalr => {
                let target = self.regs.read(rs1).wrapping_add(imm as u32) & !1;
                self.regs.write(rd, next_pc);
                next_pc = target;
            }
            op if op.is_branch() => {
                if op.branch_taken(self.regs.read(rs1), self.regs.read(rs2)) {
                    next_pc = self.pc.wrapping_add(imm as u32);
                }
            }
            op if op.is_load() => {
                let addr = self.regs.read(rs1).wrapping_add(imm as u32);
                let value = self.load(op, addr)?;
                self.regs.write(rd, value);
            }
            op if op.is_store() => {
                let addr = self.regs.read(rs1).wrapping_add(imm as u32);
                self.store(op, addr, self.regs.read(rs2))?;
            }
            op => {
                let value = op.apply(self.regs.read(rs1), self.regs.read(rs2), imm);
                self.regs.write(rd, value);
            }
        }
        self.pc = next_pc;
        Ok(())
    }

    fn load(&self, op: Op, addr: u32) -> Result<u32, SimError> {
        let value = match op {
            Op::Lb => sign_extend(self.memory.read(addr, Wordsize::Byte)?, 7),
            Op::Lbu => self.memory.read(addr, Wordsize::Byte)?,
            Op::Lh => sign_extend(self.memory.read(addr, Wordsize::Halfword)?, 15),
            Op::Lhu => self.memory.read(addr, Wordsize::Halfword)?,
            Op::Lw => self.memory.read(addr, Wordsize::Word)?,
            _ => unreachable!(),
        };
        Ok(value)
    }

    fn store(&mut self, op: Op, addr: u32, value: u32) -> Result<(), SimError> {
        let size = match op {
            Op::Sb => Wordsize::Byte,
            Op::Sh => Wordsize::Halfword,
            Op::Sw => Wordsize::Word,
            _ => unreachable!(),
        };
        self.memory.write(addr, value, size)?;
        Ok(())
    }
}
