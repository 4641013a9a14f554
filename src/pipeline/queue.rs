use bytes::Bytes;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::constants::QUEUE_LABEL;
use crate::error::{Error, ErrorCode, Result};

type FreeFn<T> = Box<dyn Fn(T) + Send + Sync>;
type NotifyFn = Box<dyn Fn() + Send + Sync>;

/// Hooks invoked by the queue.
///
/// `free_key` / `free_value` receive ownership of an item once it has been
/// handled. Without them the item is simply dropped. `on_full` fires after a
/// rejected enqueue and must neither enqueue nor block.
pub struct QueueCallbacks<K, V> {
    free_key: Option<FreeFn<K>>,
    free_value: Option<FreeFn<V>>,
    on_full: Option<NotifyFn>,
    on_batch_flush: Option<NotifyFn>,
}

impl<K, V> Default for QueueCallbacks<K, V> {
    fn default() -> Self {
        Self {
            free_key: None,
            free_value: None,
            on_full: None,
            on_batch_flush: None,
        }
    }
}

impl<K, V> QueueCallbacks<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn free_key<F>(mut self, f: F) -> Self
    where
        F: Fn(K) + Send + Sync + 'static,
    {
        self.free_key = Some(Box::new(f));
        self
    }

    pub fn free_value<F>(mut self, f: F) -> Self
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        self.free_value = Some(Box::new(f));
        self
    }

    pub fn on_full<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_full = Some(Box::new(f));
        self
    }

    pub fn on_batch_flush<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_batch_flush = Some(Box::new(f));
        self
    }
}

/// Why an item was refused. The item is handed back untouched.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueError<K, V> {
    /// The ring holds `capacity` items.
    Full(K, V),
    /// The queue has been flushed and accepts nothing more.
    Flushed(K, V),
}

impl<K, V> EnqueueError<K, V> {
    pub fn into_inner(self) -> (K, V) {
        match self {
            EnqueueError::Full(k, v) | EnqueueError::Flushed(k, v) => (k, v),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, EnqueueError::Full(..))
    }
}

impl<K, V> fmt::Display for EnqueueError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full(..) => f.write_str("queue is full"),
            EnqueueError::Flushed(..) => f.write_str("queue has been flushed"),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> std::error::Error for EnqueueError<K, V> {}

type Slot<K, V> = Option<(K, V)>;

fn alloc_slots<K, V>(capacity: usize) -> Box<[Slot<K, V>]> {
    (0..capacity).map(|_| None).collect()
}

struct Ring<K, V> {
    entries: Box<[Slot<K, V>]>,
    capacity: usize,
    head: u64,
    depth: u64,
}

/// A filled ring taken out of the queue by [`WriteQueue::swap_buffer`].
///
/// Iterating yields the items in enqueue order and moves them out. Items not
/// taken are dropped with the buffer unless it is handed to
/// [`WriteQueue::buffer_free`].
pub struct SwappedBuffer<K, V> {
    entries: Box<[Slot<K, V>]>,
    capacity: usize,
    head: u64,
    count: usize,
    taken: usize,
}

impl<K, V> SwappedBuffer<K, V> {
    /// Items in the buffer when it was swapped out.
    ///
    /// Unlike [`remaining`](Self::remaining) this does not shrink as items
    /// are taken.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Items not yet taken.
    pub fn remaining(&self) -> usize {
        self.count - self.taken
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn head_offset(&self) -> u64 {
        self.head
    }
}

impl<K, V> Iterator for SwappedBuffer<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.taken < self.count {
            let idx = (self.head as usize + self.taken) & (self.capacity - 1);
            self.taken += 1;
            if let Some(item) = self.entries[idx].take() {
                return Some(item);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl<K, V> fmt::Debug for SwappedBuffer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwappedBuffer")
            .field("count", &self.count)
            .field("remaining", &self.remaining())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Bounded multi-producer single-consumer ring with swap-buffer handoff.
///
/// Producers [`enqueue`](Self::enqueue) owned `(key, value)` handles; the
/// queue moves them and never copies their bytes. The single consumer takes
/// the whole filled ring at once with [`swap_buffer`](Self::swap_buffer),
/// which leaves a fresh empty ring behind so producers are blocked only for
/// the pointer swap.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use wtree::pipeline::{QueueCallbacks, WriteQueue};
///
/// # fn main() -> wtree::Result<()> {
/// let queue: WriteQueue = WriteQueue::new(16, QueueCallbacks::new())?;
/// queue
///     .enqueue(Bytes::from_static(b"k1"), Bytes::from_static(b"v1"))
///     .ok();
///
/// let batch = queue.swap_buffer(0);
/// assert_eq!(batch.len(), 1);
/// assert_eq!(queue.depth(), 0);
/// for (key, value) in batch {
///     queue.release(key, value);
/// }
/// # Ok(())
/// # }
/// ```
pub struct WriteQueue<K = Bytes, V = Bytes> {
    ring: Mutex<Ring<K, V>>,
    tail: CachePadded<AtomicU64>,
    flushed: AtomicBool,
    nonempty: Condvar,
    empty: Condvar,
    callbacks: QueueCallbacks<K, V>,
}

impl<K, V> WriteQueue<K, V> {
    /// Create a queue holding at least `capacity` items.
    ///
    /// The capacity is rounded up to the next power of two.
    ///
    /// # Errors
    ///
    /// * `InvalidArg` - `capacity` is zero
    pub fn new(capacity: usize, callbacks: QueueCallbacks<K, V>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::with_label(
                QUEUE_LABEL,
                ErrorCode::InvalidArg,
                "Queue capacity must be greater than zero",
            ));
        }
        let capacity = capacity.next_power_of_two();

        Ok(Self {
            ring: Mutex::new(Ring {
                entries: alloc_slots(capacity),
                capacity,
                head: 0,
                depth: 0,
            }),
            tail: CachePadded::new(AtomicU64::new(0)),
            flushed: AtomicBool::new(false),
            nonempty: Condvar::new(),
            empty: Condvar::new(),
            callbacks,
        })
    }

    /// Add an item without blocking on space.
    ///
    /// A full or flushed queue hands the item back; callers apply their own
    /// backpressure. A full queue also fires `on_full`, outside the lock.
    pub fn enqueue(&self, key: K, value: V) -> std::result::Result<(), EnqueueError<K, V>> {
        if self.flushed.load(Ordering::Acquire) {
            return Err(EnqueueError::Flushed(key, value));
        }

        {
            let mut ring = self.ring.lock();
            if ring.depth >= ring.capacity as u64 {
                drop(ring);
                if let Some(on_full) = &self.callbacks.on_full {
                    on_full();
                }
                return Err(EnqueueError::Full(key, value));
            }

            let idx = (self.tail.load(Ordering::Acquire) as usize) & (ring.capacity - 1);
            ring.entries[idx] = Some((key, value));
            self.tail.fetch_add(1, Ordering::AcqRel);
            ring.depth += 1;
        }

        self.nonempty.notify_one();
        Ok(())
    }

    /// Take every queued item at once and install an empty ring of
    /// `new_capacity` slots (0 keeps the current capacity).
    ///
    /// The fresh ring is allocated before the lock is taken; producers only
    /// wait for the exchange. Must be called from the single consumer.
    pub fn swap_buffer(&self, new_capacity: usize) -> SwappedBuffer<K, V> {
        // Only the consumer changes the capacity, so it is stable until the swap.
        let capacity = match new_capacity {
            0 => self.capacity(),
            n => n.next_power_of_two(),
        };
        let fresh = alloc_slots(capacity);

        let mut ring = self.ring.lock();
        let swapped = SwappedBuffer {
            entries: std::mem::replace(&mut ring.entries, fresh),
            capacity: ring.capacity,
            head: ring.head,
            count: ring.depth as usize,
            taken: 0,
        };

        ring.capacity = capacity;
        ring.head = 0;
        ring.depth = 0;
        self.tail.store(0, Ordering::Release);
        drop(ring);

        self.empty.notify_all();
        swapped
    }

    /// Release every item still held by a swapped buffer and drop it.
    pub fn buffer_free(&self, buffer: SwappedBuffer<K, V>) {
        for (key, value) in buffer {
            self.release(key, value);
        }
    }

    /// Hand an item to the free callbacks.
    pub fn release(&self, key: K, value: V) {
        if let Some(free_key) = &self.callbacks.free_key {
            free_key(key);
        }
        if let Some(free_value) = &self.callbacks.free_value {
            free_value(value);
        }
    }

    /// Block until the queue holds an item or is flushed.
    ///
    /// Returns `true` when items are waiting. Items queued before a flush are
    /// still reported so they can be drained.
    pub fn wait_nonempty(&self) -> bool {
        let mut ring = self.ring.lock();
        while ring.depth == 0 && !self.flushed.load(Ordering::Acquire) {
            self.nonempty.wait(&mut ring);
        }
        ring.depth > 0
    }

    /// Refuse further items and wake every waiter.
    pub fn flush(&self) {
        self.flushed.store(true, Ordering::Release);

        // Taking the lock orders the flag against waiters about to sleep.
        let _ring = self.ring.lock();
        self.nonempty.notify_all();
        self.empty.notify_all();
    }

    /// Block until the consumer has swapped out every queued item.
    pub fn drain(&self) {
        let mut ring = self.ring.lock();
        while ring.depth > 0 {
            self.empty.wait(&mut ring);
        }
    }

    pub fn depth(&self) -> u64 {
        self.ring.lock().depth
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::Acquire)
    }

    /// Fire `on_batch_flush`; the consumer calls this after each commit.
    pub fn notify_batch_flush(&self) {
        if let Some(on_batch_flush) = &self.callbacks.on_batch_flush {
            on_batch_flush();
        }
    }
}

impl<K, V> Drop for WriteQueue<K, V> {
    fn drop(&mut self) {
        let ring = self.ring.get_mut();
        let capacity = ring.capacity;
        let head = ring.head as usize;
        let count = ring.depth as usize;
        let leftovers: Vec<(K, V)> = (0..count)
            .filter_map(|i| ring.entries[(head + i) & (capacity - 1)].take())
            .collect();

        for (key, value) in leftovers {
            self.release(key, value);
        }
    }
}

impl<K, V> fmt::Debug for WriteQueue<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("WriteQueue")
            .field("capacity", &ring.capacity)
            .field("depth", &ring.depth)
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("flushed", &self.is_flushed())
            .finish()
    }
}
