//! Module memory: global-variable storage and the buffer heap
//!
//! Buffers backing pointer arguments and pointer globals are element-typed
//! blocks addressed by a bump counter. Host functions receive `&mut Memory`
//! through the engine and use it to dereference the pointers tests hand
//! them.

use super::value::{Address, CValue};
use super::CType;
use rustc_hash::FxHashMap;

/// Addresses below this are never handed out, so 0 stays an unambiguous null
const HEAP_ADDRESS_START: Address = 0x1000;

/// An allocated buffer: `count` elements of one C type
#[derive(Debug, Clone)]
pub struct Block {
    pub elem: CType,
    pub data: Vec<CValue>,
}

/// Globals store plus buffer heap for one module instance
#[derive(Debug, Clone, Default)]
pub struct Memory {
    globals: FxHashMap<String, CValue>,
    blocks: FxHashMap<Address, Block>,
    next_address: Address,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            globals: FxHashMap::default(),
            blocks: FxHashMap::default(),
            next_address: HEAP_ADDRESS_START,
        }
    }

    /// Read a global's current value.
    pub fn global(&self, name: &str) -> Option<&CValue> {
        self.globals.get(name)
    }

    /// Overwrite (or create) a global.
    pub fn set_global(&mut self, name: &str, value: CValue) {
        self.globals.insert(name.to_string(), value);
    }

    /// Drop a global's storage (used to discard consumed shadow globals).
    pub fn remove_global(&mut self, name: &str) -> Option<CValue> {
        self.globals.remove(name)
    }

    /// Allocate a block of elements and return its address.
    pub fn alloc(&mut self, elem: CType, data: Vec<CValue>) -> Address {
        let addr = self.next_address;
        // Sparse addressing: each block gets a page-aligned range so reads
        // with a stale address fail lookup instead of aliasing.
        let span = (data.len() as Address).max(1) * 16;
        self.next_address += span.next_multiple_of(0x1000);
        self.blocks.insert(addr, Block { elem, data });
        addr
    }

    pub fn block(&self, addr: Address) -> Option<&Block> {
        self.blocks.get(&addr)
    }

    /// Number of elements in the block at `addr`.
    pub fn block_len(&self, addr: Address) -> Option<usize> {
        self.blocks.get(&addr).map(|b| b.data.len())
    }

    /// Read one element of the block at `addr`.
    pub fn read_elem(&self, addr: Address, index: usize) -> Option<&CValue> {
        self.blocks.get(&addr).and_then(|b| b.data.get(index))
    }

    /// Write one element of the block at `addr`. Fails on unknown addresses
    /// and out-of-bounds indexes.
    pub fn write_elem(&mut self, addr: Address, index: usize, value: CValue) -> bool {
        match self.blocks.get_mut(&addr) {
            Some(block) => match block.data.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Read a NUL-terminated char buffer as a string.
    pub fn read_c_string(&self, addr: Address) -> Option<String> {
        let block = self.blocks.get(&addr)?;
        let mut out = String::new();
        for value in &block.data {
            let byte = value.as_int()? as u8;
            if byte == 0 {
                return Some(out);
            }
            out.push(byte as char);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globals_roundtrip() {
        let mut mem = Memory::new();
        mem.set_global("gint", CValue::Int(10));
        assert_eq!(mem.global("gint"), Some(&CValue::Int(10)));
        assert_eq!(mem.remove_global("gint"), Some(CValue::Int(10)));
        assert_eq!(mem.global("gint"), None);
    }

    #[test]
    fn test_buffer_alloc_and_access() {
        let mut mem = Memory::new();
        let addr = mem.alloc(CType::int(), vec![CValue::Int(3); 4]);
        assert!(addr >= HEAP_ADDRESS_START);
        assert_eq!(mem.block_len(addr), Some(4));
        assert_eq!(mem.read_elem(addr, 2), Some(&CValue::Int(3)));
        assert!(mem.write_elem(addr, 2, CValue::Int(9)));
        assert_eq!(mem.read_elem(addr, 2), Some(&CValue::Int(9)));
        assert!(!mem.write_elem(addr, 4, CValue::Int(0)));
        assert!(!mem.write_elem(addr + 1, 0, CValue::Int(0)));
    }

    #[test]
    fn test_distinct_addresses() {
        let mut mem = Memory::new();
        let a = mem.alloc(CType::char_(), vec![CValue::Int(0); 8]);
        let b = mem.alloc(CType::char_(), vec![CValue::Int(0); 8]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_c_string_read() {
        let mut mem = Memory::new();
        let bytes: Vec<CValue> = b"hi\0"
            .iter()
            .map(|&b| CValue::Int(b as i64))
            .collect();
        let addr = mem.alloc(CType::char_(), bytes);
        assert_eq!(mem.read_c_string(addr), Some("hi".to_string()));
    }
}
