use std::{
    ops::Deref,
    sync::{Arc, Mutex},
};

struct PoolInner {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

/// Reusable receive buffers for the UDP engine
#[derive(Clone)]
pub(crate) struct PacketPool {
    inner: Arc<Mutex<PoolInner>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl PacketPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                free: Vec::new(),
                outstanding: 0,
            })),
            buffer_size,
            max_pooled,
        }
    }

    /// Takes a full-size buffer out of the pool
    pub fn acquire(&self) -> PooledPacket {
        let buffer = {
            let mut inner = self.lock();
            inner.outstanding += 1;
            inner.free.pop()
        };
        let mut buffer = buffer.unwrap_or_default();
        buffer.resize(self.buffer_size, 0);
        PooledPacket {
            buffer: Some(buffer),
            len: 0,
            pool: self.clone(),
        }
    }

    /// Buffers handed out and not yet released
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn pooled(&self) -> usize {
        self.lock().free.len()
    }

    fn release(&self, buffer: Vec<u8>) {
        let mut inner = self.lock();
        inner.outstanding -= 1;
        if inner.free.len() < self.max_pooled {
            inner.free.push(buffer);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A received datagram living in a pooled buffer. Returns the buffer to its
/// pool exactly once, when dropped. Decode out of it straight away and drop
/// it before the next await.
pub(crate) struct PooledPacket {
    buffer: Option<Vec<u8>>,
    len: usize,
    pool: PacketPool,
}

impl PooledPacket {
    /// Whole buffer, for the socket to receive into
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.as_mut_slice(),
            None => &mut [],
        }
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.pool.buffer_size);
    }
}

impl Deref for PooledPacket {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.buffer.as_ref() {
            Some(buffer) => &buffer[..self.len],
            None => &[],
        }
    }
}

impl Drop for PooledPacket {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
