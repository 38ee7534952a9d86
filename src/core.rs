//! Out-of-order execution core
//!
//! A speculative pipeline in the style of Tomasulo's algorithm with a
//! reorder buffer: six stages (fetch, decode/rename, dispatch,
//! execute, writeback, commit) around a reorder buffer, a pool of
//! ALU/branch reservation stations and a load/store buffer. Branches
//! are predicted not-taken; instructions complete out of order and
//! retire in program order from the reorder-buffer head, which is also
//! where mispredictions are detected and the pipeline is flushed.
//!
//! Each call to [`Core::tick`] advances one clock. The stages are
//! evaluated in reverse data-flow order (commit first, fetch last) so
//! that no instruction can traverse more than one stage in a single
//! cycle: work a stage publishes is only visible to its upstream
//! neighbour on the next tick.

use thiserror::Error;
use tracing::{debug, trace};

use crate::decode::{decode, DecodeError};
use crate::instr::{Instr, Op, HALT_WORD};
use crate::memory::{Memory, MemoryError, Wordsize};
use crate::regfile::RegisterFile;
use crate::utils::sign_extend;

use self::fetch::FetchQueue;
use self::lsb::{LoadStoreBuffer, LsbEntry, LSB_SIZE};
use self::rob::{ReorderBuffer, Stage};
use self::station::{ReservationStations, StationEntry, RS_SIZE};

pub mod fetch;
pub mod lsb;
pub mod rob;
pub mod station;

/// ALU/branch results that can complete per cycle
pub const MAX_ALU_UNITS: usize = 1;
/// Memory operations that can occupy the memory unit per cycle
pub const MAX_LOAD_UNITS: usize = 1;

/// Fatal simulator errors. The pipeline cannot recover from any of
/// these; the driver reports them and exits nonzero.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("program counter 0x{pc:x} ran past the end of memory")]
    PcOutOfBounds { pc: u32 },
    #[error("instruction decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("memory access failed: {0}")]
    Memory(#[from] MemoryError),
}

/// What a load found when scanning the earlier stores still in the
/// load/store buffer
enum StoreScan {
    /// No earlier store can affect this load; read memory
    Clear,
    /// An earlier store's address or data is still unknown; wait
    Blocked,
    /// The most recent earlier store to the same address supplies the
    /// value directly
    Forward(u32),
}

/// The simulator core: architectural state plus every pipeline
/// structure
#[derive(Debug)]
pub struct Core {
    memory: Memory,
    regs: RegisterFile,
    rob: ReorderBuffer,
    stations: ReservationStations,
    lsb: LoadStoreBuffer,
    fetch_queue: FetchQueue,
    pc: u32,
    /// Fetch stops: the pc left memory, or a halt word was fetched
    fetch_stalled: bool,
    /// A flush happened during the current tick
    flushed: bool,
    /// The previous tick flushed; back-end stages skip this one
    bubble: bool,
    halted: bool,
    cycles: u64,
    retired: u64,
    mispredictions: u64,
}

impl Default for Core {
    fn default() -> Self {
        Self {
            memory: Memory::new(),
            regs: RegisterFile::new(),
            rob: ReorderBuffer::new(),
            stations: ReservationStations::new(),
            lsb: LoadStoreBuffer::new(),
            fetch_queue: FetchQueue::new(),
            pc: 0,
            fetch_stalled: false,
            flushed: false,
            bubble: false,
            halted: false,
            cycles: 0,
            retired: 0,
            mispredictions: 0,
        }
    }
}

fn access_size(op: Op) -> Wordsize {
    match op {
        Op::Lb | Op::Lbu | Op::Sb => Wordsize::Byte,
        Op::Lh | Op::Lhu | Op::Sh => Wordsize::Halfword,
        Op::Lw | Op::Sw => Wordsize::Word,
        _ => unreachable!("{op:?} is not a memory operation"),
    }
}

/// Narrow a raw 32-bit value to the width of a load and extend it the
/// way the load requires. Applied both to memory reads and to values
/// forwarded from earlier stores.
fn narrow_loaded(op: Op, raw: u32) -> u32 {
    match op {
        Op::Lb => sign_extend(raw & 0xff, 7),
        Op::Lbu => raw & 0xff,
        Op::Lh => sign_extend(raw & 0xffff, 15),
        Op::Lhu => raw & 0xffff,
        Op::Lw => raw,
        _ => unreachable!("{op:?} is not a load"),
    }
}

impl Core {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Architectural value of register xn
    pub fn register(&self, n: u8) -> u32 {
        self.regs.read(n)
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// True once the halt sentinel has reached the reorder-buffer head
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// The program result: register x10 masked to its low 8 bits
    pub fn result(&self) -> u32 {
        self.regs.read(10) & 0xff
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn retired(&self) -> u64 {
        self.retired
    }

    pub fn mispredictions(&self) -> u64 {
        self.mispredictions
    }

    /// Advance the clock by one cycle
    ///
    /// Stages run commit first and fetch last, each reading the state
    /// its downstream neighbour left behind on an earlier tick. In the
    /// cycle after a flush only commit and fetch act (the one-cycle
    /// bubble); fetch itself sits out the flush cycle.
    pub fn tick(&mut self) -> Result<(), SimError> {
        self.cycles += 1;

        self.commit()?;
        if !self.bubble && !self.flushed {
            self.writeback();
            self.execute()?;
            self.dispatch();
            self.decode_rename()?;
        }
        if !self.flushed {
            self.fetch();
        }
        self.bubble = self.flushed;
        self.flushed = false;

        // Fetch has stopped and the pipeline has drained without a
        // halt: the program ran off the end of memory.
        if self.fetch_stalled
            && !self.halted
            && self.rob.is_empty()
            && self.fetch_queue.is_empty()
        {
            return Err(SimError::PcOutOfBounds { pc: self.pc });
        }
        Ok(())
    }

    /// Run the clock until the program halts, returning the result
    pub fn run(&mut self) -> Result<u32, SimError> {
        while !self.halted {
            self.tick()?;
        }
        debug!(
            cycles = self.cycles,
            retired = self.retired,
            mispredictions = self.mispredictions,
            "halted"
        );
        Ok(self.result())
    }

    /// Commit stage: retire at most one instruction per cycle, always
    /// the reorder-buffer head
    fn commit(&mut self) -> Result<(), SimError> {
        if self.rob.is_empty() {
            return Ok(());
        }
        let head = self.rob.head_slot();
        let entry = *self.rob.entry(head);
        if !entry.busy || entry.stage != Stage::Commit {
            return Ok(());
        }

        if entry.op == Op::Halt {
            self.fetch_stalled = true;
            self.halted = true;
            // The entry stays at the head so the halt remains
            // observable.
            return Ok(());
        }

        if entry.is_branch {
            if entry.op.is_branch() {
                if entry.predicted_taken != entry.actual_taken {
                    self.mispredictions += 1;
                    self.retired += 1;
                    debug!(pc = entry.pc, target = entry.target_pc, "misprediction");
                    self.flush(entry.target_pc);
                } else {
                    self.rob.free_head();
                    self.retired += 1;
                    trace!(pc = entry.pc, "commit branch");
                }
            } else {
                // jal/jalr: write the link register, then redirect,
                // which always flushes the fall-through path
                if entry.dest != 0 {
                    self.regs.write(entry.dest, entry.value);
                }
                self.retired += 1;
                trace!(pc = entry.pc, target = entry.target_pc, "commit jump");
                self.flush(entry.target_pc);
            }
            return Ok(());
        }

        if entry.op.is_store() {
            return self.commit_store(head);
        }

        if entry.dest != 0 {
            self.regs.write(entry.dest, entry.value);
            self.regs.retire(entry.dest, head);
        }
        self.rob.free_head();
        self.retired += 1;
        trace!(pc = entry.pc, value = entry.value, "commit");
        Ok(())
    }

    /// The head store performs its memory write over the same
    /// three-cycle latency as a load's read; the store only leaves the
    /// reorder buffer and the load/store buffer once the write lands.
    fn commit_store(&mut self, head: usize) -> Result<(), SimError> {
        let index = self
            .lsb
            .index_owned_by(head)
            .expect("a committing store always owns a load/store slot");
        let entry = *self.lsb.entry(index);
        if entry.cycles_left == 0 {
            self.lsb.entry_mut(index).cycles_left = entry.op.latency();
            return Ok(());
        }
        let cycles = entry.cycles_left - 1;
        self.lsb.entry_mut(index).cycles_left = cycles;
        if cycles == 1 {
            self.memory
                .write(entry.addr, entry.value, access_size(entry.op))?;
            self.lsb.free(index);
            self.rob.free_head();
            self.retired += 1;
            trace!(addr = entry.addr, value = entry.value, "commit store");
        }
        Ok(())
    }

    /// Writeback stage: broadcast one completed result on the common
    /// data bus and mark its entry ready to commit. The oldest entry
    /// in Writeback state gets the bus.
    fn writeback(&mut self) {
        let Some(slot) = self.rob.slots_in_order().find(|&slot| {
            let entry = self.rob.entry(slot);
            entry.busy && entry.stage == Stage::Writeback
        }) else {
            return;
        };
        let value = self.rob.entry(slot).value;
        self.stations.capture(slot, value);
        self.lsb.capture(slot, value);
        self.rob.entry_mut(slot).stage = Stage::Commit;
        trace!(slot, value, "broadcast");
    }

    /// Execute stage: one ALU/branch result and one memory operation
    /// per cycle
    fn execute(&mut self) -> Result<(), SimError> {
        self.execute_stations();
        self.execute_memory()
    }

    fn execute_stations(&mut self) {
        let mut units = MAX_ALU_UNITS;
        for index in 0..RS_SIZE {
            if units == 0 {
                break;
            }
            {
                let entry = self.stations.entry(index);
                if !entry.busy || !entry.operands_ready() {
                    continue;
                }
            }
            units -= 1;
            let finished = {
                let entry = self.stations.entry_mut(index);
                if entry.cycles_left == 0 {
                    entry.cycles_left = entry.op.latency();
                }
                entry.cycles_left -= 1;
                entry.cycles_left == 0
            };
            if finished {
                let entry = *self.stations.entry(index);
                self.complete_station(&entry);
                self.stations.free(index);
            }
        }
    }

    /// Compute a finished station's result and move the owning
    /// reorder-buffer entry to Writeback
    fn complete_station(&mut self, entry: &StationEntry) {
        let slot = entry.dest;
        let pc = self.rob.entry(slot).pc;
        let rob_entry = self.rob.entry_mut(slot);
        let value = if entry.op.is_branch() {
            let taken = entry.op.branch_taken(entry.vj, entry.vk);
            rob_entry.actual_taken = taken;
            rob_entry.target_pc = if taken {
                pc.wrapping_add(entry.imm as u32)
            } else {
                pc.wrapping_add(4)
            };
            0
        } else {
            match entry.op {
                Op::Auipc => pc.wrapping_add(entry.imm as u32),
                Op::Jal => {
                    rob_entry.target_pc = pc.wrapping_add(entry.imm as u32);
                    pc.wrapping_add(4)
                }
                Op::Jalr => {
                    // Jump target is base + offset with the low bit
                    // cleared
                    rob_entry.target_pc = entry.vj.wrapping_add(entry.imm as u32) & !1;
                    pc.wrapping_add(4)
                }
                _ => entry.op.apply(entry.vj, entry.vk, entry.imm),
            }
        };
        rob_entry.value = value;
        rob_entry.stage = Stage::Writeback;
        trace!(slot, value, "execute");
    }

    fn execute_memory(&mut self) -> Result<(), SimError> {
        // Address resolution. An address that becomes known this
        // cycle is not acted on until the next one.
        let mut resolved_now = [false; LSB_SIZE];
        for index in 0..LSB_SIZE {
            let entry = self.lsb.entry_mut(index);
            if entry.busy && !entry.addr_ready && entry.base_q.is_none() {
                entry.addr = entry.base.wrapping_add(entry.offset as u32);
                entry.addr_ready = true;
                resolved_now[index] = true;
                let (slot, addr) = (entry.rob_slot, entry.addr);
                self.rob.entry_mut(slot).addr = addr;
            }
        }

        // A store has executed once its address and data are both in
        // hand; the memory write itself waits for commit.
        for index in 0..LSB_SIZE {
            let entry = *self.lsb.entry(index);
            if entry.busy
                && entry.op.is_store()
                && !entry.done
                && entry.addr_ready
                && !resolved_now[index]
                && entry.value_q.is_none()
            {
                self.lsb.entry_mut(index).done = true;
                let rob_entry = self.rob.entry_mut(entry.rob_slot);
                rob_entry.value = 0;
                rob_entry.stage = Stage::Writeback;
            }
        }

        // The memory unit. A load already counting down keeps it.
        let mut units = MAX_LOAD_UNITS;
        for index in 0..LSB_SIZE {
            if units == 0 {
                break;
            }
            let entry = *self.lsb.entry(index);
            if !entry.busy || !entry.op.is_load() || entry.cycles_left == 0 {
                continue;
            }
            units -= 1;
            let cycles = entry.cycles_left - 1;
            self.lsb.entry_mut(index).cycles_left = cycles;
            if cycles == 1 {
                let raw = self.memory.read(entry.addr, access_size(entry.op))?;
                let value = narrow_loaded(entry.op, raw);
                let rob_entry = self.rob.entry_mut(entry.rob_slot);
                rob_entry.value = value;
                rob_entry.stage = Stage::Writeback;
                self.lsb.free(index);
                trace!(addr = entry.addr, value, "load");
            }
        }

        // Admit a waiting load: forward from an earlier store, or
        // start a three-cycle memory read
        for index in 0..LSB_SIZE {
            if units == 0 {
                break;
            }
            let entry = *self.lsb.entry(index);
            if !entry.busy
                || !entry.op.is_load()
                || !entry.addr_ready
                || resolved_now[index]
            {
                continue;
            }
            match self.scan_earlier_stores(&entry) {
                StoreScan::Blocked => continue,
                StoreScan::Forward(raw) => {
                    units -= 1;
                    let value = narrow_loaded(entry.op, raw);
                    let rob_entry = self.rob.entry_mut(entry.rob_slot);
                    rob_entry.value = value;
                    rob_entry.stage = Stage::Writeback;
                    self.lsb.free(index);
                    trace!(addr = entry.addr, value, "store-to-load forward");
                }
                StoreScan::Clear => {
                    units -= 1;
                    self.lsb.entry_mut(index).cycles_left = entry.op.latency();
                }
            }
        }
        Ok(())
    }

    /// Disambiguate a load against every store that precedes it in
    /// program order and is still buffered. Conservative policy: an
    /// earlier store whose address is unknown blocks the load; a
    /// matching address forwards only once the store's data is known
    /// and its execute phase is over. Among several matching stores
    /// the most recent one wins.
    fn scan_earlier_stores(&self, load: &LsbEntry) -> StoreScan {
        let load_order = self.rob.program_order(load.rob_slot);
        let mut best: Option<(usize, LsbEntry)> = None;
        for index in 0..LSB_SIZE {
            let store = *self.lsb.entry(index);
            if !store.busy || !store.op.is_store() {
                continue;
            }
            let order = self.rob.program_order(store.rob_slot);
            if order >= load_order {
                continue;
            }
            if !store.addr_ready {
                return StoreScan::Blocked;
            }
            if store.addr == load.addr && best.map_or(true, |(o, _)| order > o) {
                best = Some((order, store));
            }
        }
        match best {
            None => StoreScan::Clear,
            Some((_, store)) if store.value_q.is_none() && store.done => {
                StoreScan::Forward(store.value)
            }
            Some(_) => StoreScan::Blocked,
        }
    }

    /// Dispatch stage: place reorder-buffer entries still waiting for
    /// an execution slot, oldest first. An entry that finds no free
    /// slot stays in Dispatch state and is retried next cycle, and
    /// younger entries wait behind it so that destination renames are
    /// recorded in program order.
    fn dispatch(&mut self) {
        let slots: Vec<usize> = self.rob.slots_in_order().collect();
        for slot in slots {
            let entry = *self.rob.entry(slot);
            if !entry.busy || entry.stage != Stage::Dispatch {
                continue;
            }
            let placed = if entry.op == Op::Halt {
                // No execution resource; straight to commit
                let rob_entry = self.rob.entry_mut(slot);
                rob_entry.value = 0;
                rob_entry.stage = Stage::Commit;
                true
            } else if entry.op.is_load() || entry.op.is_store() {
                self.dispatch_memory(slot, &entry)
            } else {
                self.dispatch_station(slot, &entry)
            };
            if !placed {
                break;
            }
        }
    }

    fn dispatch_station(&mut self, slot: usize, entry: &rob::RobEntry) -> bool {
        let Some(index) = self.stations.alloc() else {
            return false;
        };
        let (vj, qj) = if entry.op.reads_rs1() {
            self.read_operand(entry.rs1)
        } else {
            (0, None)
        };
        let (vk, qk) = if entry.op.reads_rs2() {
            self.read_operand(entry.rs2)
        } else {
            (0, None)
        };
        *self.stations.entry_mut(index) = StationEntry {
            busy: true,
            op: entry.op,
            vj,
            vk,
            qj,
            qk,
            dest: slot,
            imm: entry.imm,
            cycles_left: 0,
        };
        if entry.dest != 0 && !entry.op.is_branch() {
            self.regs.rename(entry.dest, slot);
        }
        self.rob.entry_mut(slot).stage = Stage::Execute;
        true
    }

    fn dispatch_memory(&mut self, slot: usize, entry: &rob::RobEntry) -> bool {
        let Some(index) = self.lsb.alloc() else {
            return false;
        };
        let (base, base_q) = self.read_operand(entry.rs1);
        let (value, value_q) = if entry.op.is_store() {
            self.read_operand(entry.rs2)
        } else {
            (0, None)
        };
        let addr_ready = base_q.is_none();
        let addr = if addr_ready {
            base.wrapping_add(entry.imm as u32)
        } else {
            0
        };
        *self.lsb.entry_mut(index) = LsbEntry {
            busy: true,
            op: entry.op,
            addr,
            addr_ready,
            value,
            value_q,
            base,
            base_q,
            offset: entry.imm,
            rob_slot: slot,
            cycles_left: 0,
            done: false,
        };
        if entry.op.is_load() && entry.dest != 0 {
            self.regs.rename(entry.dest, slot);
        }
        let rob_entry = self.rob.entry_mut(slot);
        rob_entry.stage = Stage::Execute;
        if addr_ready {
            rob_entry.addr = addr;
        }
        true
    }

    /// Resolve one source operand at dispatch time. If an in-flight
    /// instruction will produce the register, take its value when it
    /// has already reached writeback, otherwise record its slot as the
    /// producer tag to wait on.
    fn read_operand(&self, reg: u8) -> (u32, Option<usize>) {
        if reg == 0 {
            return (0, None);
        }
        match self.regs.producer(reg) {
            None => (self.regs.read(reg), None),
            Some(slot) => {
                let producer = self.rob.entry(slot);
                if matches!(producer.stage, Stage::Writeback | Stage::Commit) {
                    (producer.value, None)
                } else {
                    (0, Some(slot))
                }
            }
        }
    }

    /// Decode/rename stage: consume up to one fetched word per cycle,
    /// claim a reorder-buffer slot for it and record the branch
    /// prediction
    fn decode_rename(&mut self) -> Result<(), SimError> {
        let Some(fetched) = self.fetch_queue.front() else {
            return Ok(());
        };
        if self.rob.is_full() {
            return Ok(());
        }
        let instr = decode(fetched.word, fetched.pc)?;

        // Structural check on the execution resource class the
        // instruction will need at dispatch
        if instr.op.is_load() || instr.op.is_store() {
            if !self.lsb.has_free() {
                return Ok(());
            }
        } else if instr.op != Op::Halt && !self.stations.has_free() {
            return Ok(());
        }

        let slot = self.rob.alloc();
        let rob_entry = self.rob.entry_mut(slot);
        *rob_entry = rob::RobEntry {
            busy: true,
            op: instr.op,
            stage: Stage::Dispatch,
            dest: instr.rd,
            value: 0,
            addr: 0,
            pc: instr.pc,
            is_branch: instr.op.is_branch() || instr.op.is_jump(),
            predicted_taken: false,
            actual_taken: false,
            target_pc: 0,
            rs1: instr.rs1,
            rs2: instr.rs2,
            imm: instr.imm,
        };
        if instr.op.is_branch() {
            rob_entry.predicted_taken = predict_taken(&instr);
            // Speculative target; execute recomputes the real one
            rob_entry.target_pc = instr.pc.wrapping_add(instr.imm as u32);
        }
        self.fetch_queue.pop();
        trace!(slot, %instr, "rename");
        Ok(())
    }

    /// Fetch stage: read one word at the pc and queue it. Speculation
    /// is strictly fall-through; only commit ever redirects the pc.
    fn fetch(&mut self) {
        if self.fetch_stalled || self.fetch_queue.is_full() {
            return;
        }
        let Some(word) = self.memory.peek_word(self.pc) else {
            self.fetch_stalled = true;
            return;
        };
        self.fetch_queue.push(word, self.pc);
        trace!(pc = self.pc, word, "fetch");
        if word == HALT_WORD {
            // Nothing beyond the halt word is an instruction; stop
            // here instead of running the decoder into it. Commit
            // re-asserts the stall when the halt retires.
            self.fetch_stalled = true;
            return;
        }
        self.pc = self.pc.wrapping_add(4);
    }

    /// Abandon all speculative state and restart fetch from `target`
    /// on the next cycle. The cycle after that is a bubble for the
    /// back-end stages.
    fn flush(&mut self, target: u32) {
        self.fetch_queue.clear();
        self.rob.clear();
        self.stations.clear();
        self.lsb.clear();
        self.regs.clear_renames();
        self.pc = target;
        self.fetch_stalled = false;
        self.flushed = true;
        debug!(target, "flush");
    }
}

/// The branch predictor: a single trivial entry that always predicts
/// not-taken
fn predict_taken(_instr: &Instr) -> bool {
    false
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::*;
    use crate::memory::MEMORY_SIZE;
    use crate::scalar::Scalar;
    use pretty_assertions::assert_eq;

    fn write_program(memory: &mut Memory, words: &[u32]) {
        for (n, word) in words.iter().enumerate() {
            memory
                .write(4 * n as u32, *word, Wordsize::Word)
                .unwrap();
        }
    }

    /// Run a program to halt on the pipeline and return the core for
    /// inspection
    fn run_pipeline(words: &[u32]) -> Core {
        let mut core = Core::new();
        write_program(core.memory_mut(), words);
        core.run().unwrap();
        core
    }

    /// Run the same program on the in-order reference interpreter
    fn run_scalar(words: &[u32]) -> u32 {
        let mut scalar = Scalar::new();
        write_program(scalar.memory_mut(), words);
        scalar.run().unwrap()
    }

    /// Both engines must agree on the result; return it
    fn run_both(words: &[u32]) -> u32 {
        let core = run_pipeline(words);
        assert_eq!(core.result(), run_scalar(words));
        core.result()
    }

    #[test]
    fn check_single_add() -> Result<(), &'static str> {
        let program = [
            addi!(x1, x0, 42),
            addi!(x10, x1, 0),
            halt!(),
        ];
        assert_eq!(run_both(&program), 42);
        Ok(())
    }

    #[test]
    fn check_accumulator_loop() -> Result<(), &'static str> {
        // x2 accumulates x3 as it counts down 10..1
        let program = [
            addi!(x2, x0, 0),
            addi!(x3, x0, 10),
            add!(x2, x2, x3),
            addi!(x3, x3, -1),
            bne!(x3, x0, -8),
            addi!(x10, x2, 0),
            halt!(),
        ];
        let core = run_pipeline(&program);
        assert_eq!(core.result(), 55);
        assert_eq!(run_scalar(&program), 55);
        // The backward branch is taken nine times against a
        // not-taken prediction
        assert_eq!(core.mispredictions(), 9);
        Ok(())
    }

    #[test]
    fn check_load_after_store_same_word() -> Result<(), &'static str> {
        let program = [
            lui!(x1, 0x12345),
            addi!(x1, x1, 0x678),
            addi!(x2, x0, 0x400),
            sw!(x1, x2, 0),
            lw!(x10, x2, 0),
            halt!(),
        ];
        assert_eq!(run_both(&program), 0x78);
        Ok(())
    }

    #[test]
    fn check_forwarding_waits_for_store_address() -> Result<(), &'static str> {
        // The store's address hangs off an ALU result, so the load
        // (whose own address is ready much earlier) must wait for the
        // store to resolve, then take its value by forwarding
        let program = [
            addi!(x1, x0, 171),
            addi!(x2, x0, 256),
            add!(x2, x2, x2),
            sb!(x1, x2, 0),
            addi!(x3, x0, 512),
            lbu!(x10, x3, 0),
            halt!(),
        ];
        assert_eq!(run_both(&program), 171);
        Ok(())
    }

    #[test]
    fn check_mispredicted_branch_flushes() -> Result<(), &'static str> {
        // beq x0, x0 is always taken but predicted not-taken; the
        // speculatively fetched write of 99 must be squashed
        let program = [
            beq!(x0, x0, 8),
            addi!(x10, x0, 99),
            addi!(x10, x0, 7),
            halt!(),
        ];
        let core = run_pipeline(&program);
        assert_eq!(core.result(), 7);
        assert_eq!(core.mispredictions(), 1);
        assert_eq!(run_scalar(&program), 7);
        Ok(())
    }

    #[test]
    fn check_correctly_predicted_branch_does_not_flush() -> Result<(), &'static str> {
        let program = [
            addi!(x1, x0, 1),
            beq!(x1, x0, 8),
            addi!(x10, x0, 5),
            halt!(),
        ];
        let core = run_pipeline(&program);
        assert_eq!(core.result(), 5);
        assert_eq!(core.mispredictions(), 0);
        Ok(())
    }

    #[test]
    fn check_jal_round_trip() -> Result<(), &'static str> {
        let program = [
            jal!(x1, 8),
            addi!(x10, x0, 0xff),
            addi!(x10, x0, 1),
            halt!(),
        ];
        let core = run_pipeline(&program);
        assert_eq!(core.result(), 1);
        // The link register holds the skipped fall-through address
        assert_eq!(core.register(1), 4);
        assert_eq!(run_scalar(&program), 1);
        Ok(())
    }

    #[test]
    fn check_jalr_clears_low_bit_and_links() -> Result<(), &'static str> {
        let program = [
            addi!(x1, x0, 13),
            jalr!(x2, x1, 0),
            addi!(x10, x0, 55),
            addi!(x10, x0, 3),
            halt!(),
        ];
        let core = run_pipeline(&program);
        // Target 13 has its low bit cleared to 12
        assert_eq!(core.result(), 3);
        assert_eq!(core.register(2), 8);
        assert_eq!(run_scalar(&program), 3);
        Ok(())
    }

    #[test]
    fn check_x0_reads_zero_after_write_attempt() -> Result<(), &'static str> {
        let program = [
            addi!(x0, x0, 5),
            add!(x10, x0, x0),
            halt!(),
        ];
        assert_eq!(run_both(&program), 0);
        Ok(())
    }

    #[test]
    fn check_newest_writer_wins() -> Result<(), &'static str> {
        let program = [
            addi!(x1, x0, 1),
            addi!(x1, x0, 2),
            addi!(x10, x1, 0),
            halt!(),
        ];
        assert_eq!(run_both(&program), 2);
        Ok(())
    }

    #[test]
    fn check_signed_arithmetic_through_pipeline() -> Result<(), &'static str> {
        // -8 >> 2 arithmetic is -2; slt(-2, 1) = 1; sltu sees the
        // big unsigned value instead
        let program = [
            addi!(x1, x0, -8),
            srai!(x2, x1, 2),
            addi!(x3, x0, 1),
            slt!(x4, x2, x3),
            sltu!(x5, x2, x3),
            sub!(x6, x4, x5),
            add!(x10, x6, x4),
            halt!(),
        ];
        // x4 = 1, x5 = 0, x6 = 1, x10 = 2
        assert_eq!(run_both(&program), 2);
        Ok(())
    }

    #[test]
    fn check_load_sign_extension_with_forwarding() -> Result<(), &'static str> {
        // The stored register holds 0xffff_ffff; a byte load must see
        // only its low byte, sign-extended, whether forwarded or read
        let program = [
            addi!(x1, x0, -1),
            sb!(x1, x0, 256),
            lb!(x10, x0, 256),
            halt!(),
        ];
        assert_eq!(run_both(&program), 255);
        Ok(())
    }

    #[test]
    fn check_forwarding_takes_most_recent_store() -> Result<(), &'static str> {
        let program = [
            addi!(x1, x0, 1),
            addi!(x2, x0, 2),
            sb!(x1, x0, 0x300),
            sb!(x2, x0, 0x300),
            lbu!(x10, x0, 0x300),
            halt!(),
        ];
        assert_eq!(run_both(&program), 2);
        Ok(())
    }

    #[test]
    fn check_narrow_load_of_wide_store() -> Result<(), &'static str> {
        let program = [
            lui!(x1, 0xabcde),
            addi!(x1, x1, 0x0f1),
            addi!(x2, x0, 0x500),
            sw!(x1, x2, 0),
            lbu!(x10, x2, 0),
            halt!(),
        ];
        // x1 = 0xabcde0f1; the byte at the store's own address is the
        // little-endian low byte, whether forwarded or read back
        assert_eq!(run_both(&program), 0xf1);
        Ok(())
    }

    #[test]
    fn check_misaligned_word_load_is_fatal() -> Result<(), &'static str> {
        let program = [
            addi!(x1, x0, 0x401),
            lw!(x10, x1, 0),
            halt!(),
        ];
        let mut core = Core::new();
        write_program(core.memory_mut(), &program);
        let result = core.run();
        assert_eq!(
            result,
            Err(SimError::Memory(MemoryError::Misaligned { addr: 0x401 }))
        );
        Ok(())
    }

    #[test]
    fn check_load_past_end_of_memory_is_fatal() -> Result<(), &'static str> {
        // lui 0x100 puts the address exactly at MEMORY_SIZE
        let program = [
            lui!(x1, 0x100),
            lw!(x10, x1, 0),
            halt!(),
        ];
        let mut core = Core::new();
        write_program(core.memory_mut(), &program);
        let result = core.run();
        assert_eq!(
            result,
            Err(SimError::Memory(MemoryError::OutOfBounds { addr: 0x10_0000 }))
        );
        Ok(())
    }

    #[test]
    fn check_unknown_encoding_is_fatal() {
        let mut core = Core::new();
        core.memory_mut()
            .write(0, 0x0000007f, Wordsize::Word)
            .unwrap();
        let result = core.run();
        assert!(matches!(result, Err(SimError::Decode(_))));
    }

    #[test]
    fn check_running_off_the_end_is_fatal() -> Result<(), &'static str> {
        // Jump to the last word of memory; the nop there pushes the
        // pc past the end without ever halting. The fall-through path
        // is padded with nops so the speculative fetch ahead of the
        // jump's commit only ever sees real instructions.
        let last = (MEMORY_SIZE - 4) as i32;
        let nop = addi!(x0, x0, 0);
        let program = [jal!(x0, last), nop, nop, nop, nop, nop, nop];
        let mut core = Core::new();
        write_program(core.memory_mut(), &program);
        core.memory_mut()
            .write(last as u32, addi!(x0, x0, 0), Wordsize::Word)
            .unwrap();
        let result = core.run();
        assert_eq!(
            result,
            Err(SimError::PcOutOfBounds { pc: MEMORY_SIZE as u32 })
        );
        Ok(())
    }

    #[test]
    fn check_branch_to_fall_through_is_not_a_misprediction() -> Result<(), &'static str> {
        // Taken or not, the target is pc + 4. Predicted not-taken
        // with actual not-taken must retire without a flush.
        let program = [
            addi!(x1, x0, 1),
            bne!(x1, x0, 4),
            addi!(x10, x0, 9),
            halt!(),
        ];
        let core = run_pipeline(&program);
        assert_eq!(core.result(), 9);
        // The branch is actually taken (x1 != x0), so this one *is* a
        // misprediction even though the target equals fall-through
        assert_eq!(core.mispredictions(), 1);

        let program = [
            bne!(x1, x1, 4),
            addi!(x10, x0, 9),
            halt!(),
        ];
        let core = run_pipeline(&program);
        assert_eq!(core.result(), 9);
        assert_eq!(core.mispredictions(), 0);
        Ok(())
    }

    #[test]
    fn check_dependent_chain_of_loads_and_alu() -> Result<(), &'static str> {
        // A pointer chase: each load feeds the next base register
        let program = [
            addi!(x1, x0, 0x600),
            sw!(x1, x0, 0x700),
            addi!(x2, x0, 77),
            sw!(x2, x1, 0),
            lw!(x3, x0, 0x700),
            lw!(x10, x3, 0),
            halt!(),
        ];
        assert_eq!(run_both(&program), 77);
        Ok(())
    }

    #[test]
    fn check_scalar_equivalence_on_shift_and_logic_mix() -> Result<(), &'static str> {
        let program = [
            addi!(x1, x0, 0x5a5),
            slli!(x2, x1, 20),
            srli!(x3, x2, 8),
            xori!(x4, x3, 0x0ff),
            ori!(x5, x4, 0x700),
            andi!(x6, x5, 0x7ff),
            sra!(x7, x2, x1),
            or!(x8, x6, x7),
            add!(x10, x8, x0),
            halt!(),
        ];
        run_both(&program);
        Ok(())
    }
}
