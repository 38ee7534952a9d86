use crate::instr::Op;

/// Number of load/store buffer slots
pub const LSB_SIZE: usize = 16;

/// One pending memory operation
///
/// The effective address is `base + offset`, computable once `base_q`
/// clears. Stores also wait on `value_q` for the data to write.
/// `rob_slot` names the owning reorder-buffer entry; program-order
/// checks between loads and earlier stores go through it. `done` marks
/// a store whose address and value are both in hand (its memory write
/// still waits for commit). `cycles_left` counts down a load's memory
/// access in execute, and a store's in commit.
#[derive(Debug, Clone, Copy)]
pub struct LsbEntry {
    pub busy: bool,
    pub op: Op,
    pub addr: u32,
    pub addr_ready: bool,
    pub value: u32,
    pub value_q: Option<usize>,
    pub base: u32,
    pub base_q: Option<usize>,
    pub offset: i32,
    pub rob_slot: usize,
    pub cycles_left: u32,
    pub done: bool,
}

impl LsbEntry {
    pub const EMPTY: LsbEntry = LsbEntry {
        busy: false,
        op: Op::Halt,
        addr: 0,
        addr_ready: false,
        value: 0,
        value_q: None,
        base: 0,
        base_q: None,
        offset: 0,
        rob_slot: 0,
        cycles_left: 0,
        done: false,
    };
}

/// The load/store buffer: an unordered pool of pending memory
/// operations, disambiguated against each other through the owning
/// reorder-buffer slots
#[derive(Debug)]
pub struct LoadStoreBuffer {
    entries: [LsbEntry; LSB_SIZE],
}

impl Default for LoadStoreBuffer {
    fn default() -> Self {
        Self {
            entries: [LsbEntry::EMPTY; LSB_SIZE],
        }
    }
}

impl LoadStoreBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_free(&self) -> bool {
        self.entries.iter().any(|entry| !entry.busy)
    }

    pub fn alloc(&mut self) -> Option<usize> {
        let index = self.entries.iter().position(|entry| !entry.busy)?;
        self.entries[index] = LsbEntry {
            busy: true,
            ..LsbEntry::EMPTY
        };
        Some(index)
    }

    pub fn free(&mut self, index: usize) {
        self.entries[index] = LsbEntry::EMPTY;
    }

    pub fn entry(&self, index: usize) -> &LsbEntry {
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut LsbEntry {
        &mut self.entries[index]
    }

    /// The slot owned by a given reorder-buffer entry, if present
    pub fn index_owned_by(&self, rob_slot: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.busy && entry.rob_slot == rob_slot)
    }

    /// Deliver a common-data-bus broadcast to base and store-value
    /// operands waiting on the producing slot
    pub fn capture(&mut self, slot: usize, value: u32) {
        for entry in self.entries.iter_mut().filter(|entry| entry.busy) {
            if entry.base_q == Some(slot) {
                entry.base = value;
                entry.base_q = None;
            }
            if entry.value_q == Some(slot) {
                entry.value = value;
                entry.value_q = None;
            }
        }
    }

    /// Abandon every entry (flush)
    pub fn clear(&mut self) {
        self.entries = [LsbEntry::EMPTY; LSB_SIZE];
    }
}
