use super::StopSignal;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// How long a blocked acquisition sleeps before rechecking its stop signal
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A chunk slot handed out by [`ChunkCursor`]
///
/// `seq` is the chunk's position in the stream; `slot` is `seq` modulo the
/// ring size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTicket {
    pub slot: usize,
    pub seq: u64,
}

#[derive(Debug, Default)]
struct CursorState {
    produced: u64,
    consumed: u64,
    writing: bool,
    reading: bool,
}

/// Read/write cursors over a ring of `slots` chunks
///
/// One writer and one reader at a time. A slot is writable once it has been
/// consumed and readable once it has been produced, so the reader sees chunks
/// in exactly the order they were written.
#[derive(Debug)]
pub struct ChunkCursor {
    slots: usize,
    state: Mutex<CursorState>,
    changed: Condvar,
}

impl ChunkCursor {
    /// Ring of `slots` chunks, all initially empty.
    pub fn new(slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(Error::Transfer("a chunk ring needs at least one slot".into()));
        }
        Ok(Self {
            slots,
            state: Mutex::new(CursorState::default()),
            changed: Condvar::new(),
        })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Chunks written so far
    pub fn produced(&self) -> u64 {
        self.state.lock().produced
    }

    /// Chunks read so far
    pub fn consumed(&self) -> u64 {
        self.state.lock().consumed
    }

    fn writable(&self, state: &mut CursorState) -> Option<ChunkTicket> {
        if state.writing || state.produced - state.consumed >= self.slots as u64 {
            return None;
        }
        state.writing = true;
        Some(ChunkTicket {
            slot: (state.produced % self.slots as u64) as usize,
            seq: state.produced,
        })
    }

    fn readable(&self, state: &mut CursorState) -> Option<ChunkTicket> {
        if state.reading || state.consumed == state.produced {
            return None;
        }
        state.reading = true;
        Some(ChunkTicket {
            slot: (state.consumed % self.slots as u64) as usize,
            seq: state.consumed,
        })
    }

    /// Block until a slot is free to write; `None` once `stop` is raised.
    pub fn acquire_write(&self, stop: &StopSignal) -> Option<ChunkTicket> {
        let mut state = self.state.lock();
        loop {
            if stop.is_stopped() {
                return None;
            }
            if let Some(ticket) = self.writable(&mut state) {
                return Some(ticket);
            }
            self.changed.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    /// Block until a produced chunk is available; `None` once `stop` is raised.
    pub fn acquire_read(&self, stop: &StopSignal) -> Option<ChunkTicket> {
        let mut state = self.state.lock();
        loop {
            if stop.is_stopped() {
                return None;
            }
            if let Some(ticket) = self.readable(&mut state) {
                return Some(ticket);
            }
            self.changed.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    pub fn try_acquire_write(&self) -> Option<ChunkTicket> {
        self.writable(&mut self.state.lock())
    }

    pub fn try_acquire_read(&self) -> Option<ChunkTicket> {
        self.readable(&mut self.state.lock())
    }

    /// Mark the chunk written.
    pub fn release_write(&self, ticket: ChunkTicket) -> Result<()> {
        let mut state = self.state.lock();
        if !state.writing || ticket.seq != state.produced {
            return Err(Error::Transfer(format!(
                "write ticket {} does not match cursor at {}",
                ticket.seq, state.produced
            )));
        }
        state.produced += 1;
        state.writing = false;
        self.changed.notify_all();
        Ok(())
    }

    /// Mark the chunk read, freeing its slot.
    pub fn release_read(&self, ticket: ChunkTicket) -> Result<()> {
        let mut state = self.state.lock();
        if !state.reading || ticket.seq != state.consumed {
            return Err(Error::Transfer(format!(
                "read ticket {} does not match cursor at {}",
                ticket.seq, state.consumed
            )));
        }
        state.consumed += 1;
        state.reading = false;
        self.changed.notify_all();
        Ok(())
    }

    /// Give a write slot back without producing anything.
    pub fn abandon_write(&self, _ticket: ChunkTicket) {
        self.state.lock().writing = false;
        self.changed.notify_all();
    }

    /// Give a read slot back; the chunk stays readable.
    pub fn abandon_read(&self, _ticket: ChunkTicket) {
        self.state.lock().reading = false;
        self.changed.notify_all();
    }
}
