//! Per-connection cursor registry (C9).
//!
//! A vector indexed by the cursor identifier handed back to the client.
//! `declare` appends; `close` releases the held handle and pops trailing
//! empty slots so the vector never grows unbounded across a connection's
//! lifetime even with heavy cursor churn.

use crate::error::{ProxyError, ProxyResult};

/// A registry of open, driver-specific handles of type `H`. The registry
/// itself is generic over the handle type so it carries no dependency on
/// any particular driver crate.
#[derive(Debug, Default)]
pub struct CursorRegistry<H> {
    slots: Vec<Option<Slot<H>>>,
}

#[derive(Debug)]
struct Slot<H> {
    handle: H,
    column_count: u32,
}

impl<H> CursorRegistry<H> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Registers a new cursor and returns its identifier, which is always
    /// its index in the backing vector.
    pub fn declare(&mut self, handle: H, column_count: u32) -> u32 {
        self.slots.push(Some(Slot { handle, column_count }));
        (self.slots.len() - 1) as u32
    }

    /// Borrows the handle for `id`, failing if the id is out of range or
    /// the slot was already closed.
    pub fn get_mut(&mut self, id: u32) -> ProxyResult<(&mut H, u32)> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| ProxyError::lifecycle(format!("unknown cursor id {id}")))?;
        Ok((&mut slot.handle, slot.column_count))
    }

    /// Releases the handle held by `id`, then pops any now-empty slots off
    /// the tail of the vector.
    pub fn close(&mut self, id: u32) -> ProxyResult<H> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .ok_or_else(|| ProxyError::lifecycle(format!("unknown cursor id {id}")))?
            .take()
            .ok_or_else(|| ProxyError::lifecycle(format!("cursor {id} already closed")))?;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Ok(slot.handle)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_returns_sequential_ids() {
        let mut reg: CursorRegistry<u32> = CursorRegistry::new();
        assert_eq!(reg.declare(100, 3), 0);
        assert_eq!(reg.declare(200, 1), 1);
    }

    #[test]
    fn close_pops_trailing_slots() {
        let mut reg: CursorRegistry<u32> = CursorRegistry::new();
        reg.declare(1, 1);
        reg.declare(2, 1);
        reg.declare(3, 1);
        reg.close(2).unwrap();
        assert_eq!(reg.len(), 3, "middle close only tombstones, does not pop");
        reg.close(1).unwrap();
        reg.close(0).unwrap();
        assert_eq!(reg.len(), 0, "closing from the tail inward pops everything");
    }

    #[test]
    fn fetch_after_close_is_lifecycle_error() {
        let mut reg: CursorRegistry<u32> = CursorRegistry::new();
        reg.declare(1, 1);
        reg.close(0).unwrap();
        let err = reg.get_mut(0).unwrap_err();
        assert!(matches!(err, ProxyError::Lifecycle(_)));
    }

    #[test]
    fn unknown_id_is_lifecycle_error() {
        let mut reg: CursorRegistry<u32> = CursorRegistry::new();
        assert!(reg.get_mut(42).is_err());
        assert!(reg.close(42).is_err());
    }

    #[test]
    fn double_close_is_an_error() {
        let mut reg: CursorRegistry<u32> = CursorRegistry::new();
        reg.declare(1, 1);
        reg.close(0).unwrap();
        assert!(reg.close(0).is_err());
    }
}
