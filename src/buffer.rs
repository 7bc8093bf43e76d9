use std::{
    collections::VecDeque,
    io::{self, Write},
};

/// Ordered queue of pending outbound buffers for one connection.
///
/// Buffers are written in the order they were pushed. A partial write keeps
/// the unwritten tail of the front buffer in place.
#[derive(Debug, Default)]
pub struct OutQueue {
    bufs: VecDeque<Vec<u8>>,
    offset: usize,
}

impl OutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffer. Empty buffers are ignored.
    pub fn push(&mut self, buf: Vec<u8>) {
        if !buf.is_empty() {
            self.bufs.push_back(buf);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// Bytes still waiting to be written.
    pub fn len(&self) -> usize {
        self.bufs.iter().map(Vec::len).sum::<usize>() - self.offset
    }

    pub fn clear(&mut self) {
        self.bufs.clear();
        self.offset = 0;
    }

    /// Write as much as `w` accepts. `pre_write` runs before every write call.
    ///
    /// Returns `Ok(true)` once the queue is empty and `Ok(false)` when the
    /// writer would block with data still queued.
    pub fn flush<W, F>(&mut self, w: &mut W, mut pre_write: F) -> io::Result<bool>
    where
        W: Write + ?Sized,
        F: FnMut(),
    {
        while let Some(front) = self.bufs.front() {
            pre_write();
            match w.write(&front[self.offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.offset += n;
                    if self.offset == front.len() {
                        self.bufs.pop_front();
                        self.offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
