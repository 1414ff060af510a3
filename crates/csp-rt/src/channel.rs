// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channels.
//!
//! One `Channel<T>` type over three flavors: rendezvous (capacity 0),
//! buffered (capacity N) and timeout (a timer drops one sentinel in, then
//! closes). Each channel owns a mutex-guarded queue and two condvars; no
//! lock is shared between channels.
//!
//! Blocking waits wake every `INTERRUPT_TICK` to observe the current
//! task's cancel token, so `stop()` and `with_timeout` can interrupt them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel;
use crate::error::{ChannelError, PutError, TryPutError, TryTakeError};

/// Upper bound on how long a blocked put/take goes without checking for
/// cancellation.
const INTERRUPT_TICK: Duration = Duration::from_millis(5);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Sentinel delivered by a timeout channel when its timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Timeout;

/// Channel flavor, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Unbuffered hand-off.
    Rendezvous,
    /// Bounded FIFO buffer.
    Buffered(usize),
    /// Fires a single sentinel after the duration, then closes.
    Timeout(Duration),
}

struct State<T> {
    queue: VecDeque<T>,
    /// Rendezvous offers made / consumed. A putter holding ticket `n` is
    /// done once `taken >= n`.
    offered: u64,
    taken: u64,
    /// Threads blocked in `take`. Lets `try_put` complete a hand-off.
    waiting_takers: usize,
}

impl<T> State<T> {
    fn pop(&mut self) -> Option<T> {
        let val = self.queue.pop_front()?;
        self.taken += 1;
        Some(val)
    }
}

struct Inner<T> {
    id: u64,
    kind: ChannelKind,
    closed: AtomicBool,
    preferred: AtomicBool,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    /// Signalled on every dequeue: buffered putters wait for room,
    /// rendezvous putters wait for their offer to be consumed.
    not_full: Condvar,
}

/// A CSP channel. Cloning yields another handle to the same channel.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

/// Create an unbuffered (rendezvous) channel.
pub fn channel<T>() -> Channel<T> {
    Channel::rendezvous()
}

/// Create a buffered channel with capacity `n`. `n == 0` is a rendezvous
/// channel.
pub fn buffered<T>(n: usize) -> Channel<T> {
    Channel::with_capacity(n)
}

/// Create a channel that yields one `Timeout` sentinel after `duration`
/// and then closes.
pub fn timeout_channel<T>(duration: Duration) -> Channel<T>
where
    T: From<Timeout> + Send + 'static,
{
    Channel::timeout(duration)
}

impl<T> Channel<T> {
    fn from_kind(kind: ChannelKind) -> Self {
        let queue = match kind {
            ChannelKind::Rendezvous => VecDeque::with_capacity(1),
            ChannelKind::Buffered(n) => VecDeque::with_capacity(n.min(1024)),
            ChannelKind::Timeout(_) => VecDeque::with_capacity(1),
        };
        Channel {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                closed: AtomicBool::new(false),
                preferred: AtomicBool::new(false),
                state: Mutex::new(State {
                    queue,
                    offered: 0,
                    taken: 0,
                    waiting_takers: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    pub fn rendezvous() -> Self {
        Self::from_kind(ChannelKind::Rendezvous)
    }

    pub fn with_capacity(n: usize) -> Self {
        if n == 0 {
            Self::rendezvous()
        } else {
            Self::from_kind(ChannelKind::Buffered(n))
        }
    }

    /// Timeout channel. The timer runs on its own detached thread and
    /// holds only a weak reference, so dropping every handle early lets
    /// the timer expire harmlessly.
    pub fn timeout(duration: Duration) -> Self
    where
        T: From<Timeout> + Send + 'static,
    {
        let chan = Self::from_kind(ChannelKind::Timeout(duration));
        let weak: Weak<Inner<T>> = Arc::downgrade(&chan.inner);
        let name = format!("csp-timer-{}", chan.inner.id);
        let spawned = thread::Builder::new().name(name).spawn(move || {
            thread::sleep(duration);
            if let Some(inner) = weak.upgrade() {
                Channel { inner }.fire(T::from(Timeout));
            }
        });
        if let Err(e) = spawned {
            // No timer thread: fire now rather than never.
            tracing::warn!(channel = chan.inner.id, error = %e, "timer thread failed to start");
            chan.fire(T::from(Timeout));
        }
        chan
    }

    /// Unique identity of this channel.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    /// Buffer capacity. 0 for rendezvous, 1 for timeout channels.
    pub fn capacity(&self) -> usize {
        match self.inner.kind {
            ChannelKind::Rendezvous => 0,
            ChannelKind::Buffered(n) => n,
            ChannelKind::Timeout(_) => 1,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Blocking put.
    ///
    /// Buffered: waits while the buffer is full. Rendezvous: waits until a
    /// taker has consumed the value. Timeout: always `Unsupported`.
    pub fn put(&self, val: T) -> Result<(), PutError<T>> {
        match self.inner.kind {
            ChannelKind::Timeout(_) => Err(PutError::new(ChannelError::Unsupported, val)),
            ChannelKind::Buffered(cap) => self.put_buffered(cap, val),
            ChannelKind::Rendezvous => self.put_rendezvous(val),
        }
    }

    fn put_buffered(&self, cap: usize, val: T) -> Result<(), PutError<T>> {
        let mut st = self.lock();
        loop {
            if self.closed() {
                return Err(PutError::new(ChannelError::Closed, val));
            }
            if st.queue.len() < cap {
                st.queue.push_back(val);
                drop(st);
                self.inner.not_empty.notify_one();
                return Ok(());
            }
            if cancel::cancelled() {
                return Err(PutError::new(ChannelError::Interrupted, val));
            }
            st = park(&self.inner.not_full, st, None);
        }
    }

    fn put_rendezvous(&self, val: T) -> Result<(), PutError<T>> {
        let mut st = self.lock();
        // One pending offer at a time.
        loop {
            if self.closed() {
                return Err(PutError::new(ChannelError::Closed, val));
            }
            if st.queue.is_empty() {
                break;
            }
            if cancel::cancelled() {
                return Err(PutError::new(ChannelError::Interrupted, val));
            }
            st = park(&self.inner.not_full, st, None);
        }

        st.queue.push_back(val);
        st.offered += 1;
        let ticket = st.offered;
        self.inner.not_empty.notify_one();

        loop {
            if st.taken >= ticket {
                return Ok(());
            }
            let kind = if self.closed() {
                Some(ChannelError::Closed)
            } else if cancel::cancelled() {
                Some(ChannelError::Interrupted)
            } else {
                None
            };
            if let Some(kind) = kind {
                // Not yet taken, so the single queued offer is ours.
                return match st.queue.pop_front() {
                    Some(val) => {
                        st.offered -= 1;
                        drop(st);
                        self.inner.not_full.notify_all();
                        Err(PutError::new(kind, val))
                    }
                    None => Ok(()),
                };
            }
            st = park(&self.inner.not_full, st, None);
        }
    }

    /// Non-blocking put.
    ///
    /// On a rendezvous channel this succeeds only when a taker is already
    /// blocked in `take` (or `take_timeout`) and no other offer is pending.
    /// A reader waiting in `select` is only polling and is not counted, so
    /// `try_put` reports `Full` to it; use `put` to hand a value to a
    /// selecting reader.
    pub fn try_put(&self, val: T) -> Result<(), TryPutError<T>> {
        if matches!(self.inner.kind, ChannelKind::Timeout(_)) {
            return Err(TryPutError::Unsupported(val));
        }
        let mut st = self.lock();
        if self.closed() {
            return Err(TryPutError::Closed(val));
        }
        let room = match self.inner.kind {
            ChannelKind::Buffered(cap) => st.queue.len() < cap,
            _ => st.queue.is_empty() && st.waiting_takers > 0,
        };
        if !room {
            return Err(TryPutError::Full(val));
        }
        st.queue.push_back(val);
        if self.inner.kind == ChannelKind::Rendezvous {
            st.offered += 1;
        }
        drop(st);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Blocking take. Fails with `Closed` once the channel is closed and
    /// drained.
    pub fn take(&self) -> Result<T, ChannelError> {
        self.take_until(None)
            .and_then(|val| val.ok_or(ChannelError::Closed))
    }

    /// Take, giving up after `timeout`. `Ok(None)` on expiry. A timeout
    /// too large to add to the current instant waits like `take`.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Option<T>, ChannelError> {
        self.take_until(Instant::now().checked_add(timeout))
    }

    fn take_until(&self, deadline: Option<Instant>) -> Result<Option<T>, ChannelError> {
        let mut st = self.lock();
        st.waiting_takers += 1;
        let result = loop {
            if let Some(val) = st.pop() {
                break Ok(Some(val));
            }
            if self.closed() {
                break Err(ChannelError::Closed);
            }
            if cancel::cancelled() {
                break Err(ChannelError::Interrupted);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break Ok(None);
            }
            st = park(&self.inner.not_empty, st, deadline);
        };
        st.waiting_takers -= 1;
        drop(st);
        if matches!(result, Ok(Some(_))) {
            self.inner.not_full.notify_all();
        }
        result
    }

    /// Atomic non-blocking dequeue. Readiness check and consumption happen
    /// under one lock acquisition.
    pub fn try_take(&self) -> Result<T, TryTakeError> {
        let mut st = self.lock();
        match st.pop() {
            Some(val) => {
                drop(st);
                self.inner.not_full.notify_all();
                Ok(val)
            }
            None if self.closed() => Err(TryTakeError::Closed),
            None => Err(TryTakeError::Empty),
        }
    }

    /// Look at the next value without consuming it. On a rendezvous
    /// channel this is the pending offer, if any.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().queue.front().cloned()
    }

    /// Number of buffered values. Always 0 for rendezvous channels.
    pub fn size(&self) -> usize {
        match self.inner.kind {
            ChannelKind::Rendezvous => 0,
            _ => self.lock().queue.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Close the channel. Idempotent. Buffered values stay takeable;
    /// blocked putters fail with `Closed`.
    pub fn close(&self) {
        let st = self.lock();
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(st);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
        tracing::trace!(channel = self.inner.id, "channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed()
    }

    /// Mark the channel as preferred. `select` visits preferred channels
    /// before the others when several are ready.
    pub fn set_preferred(&self, preferred: bool) {
        self.inner.preferred.store(preferred, Ordering::Release);
    }

    pub fn is_preferred(&self) -> bool {
        self.inner.preferred.load(Ordering::Acquire)
    }

    /// Copy of the current contents, front first. Consumes nothing.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.lock().queue.iter().cloned().collect()
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        self.drain_up_to(usize::MAX)
    }

    /// Remove and return at most `n` values.
    pub fn drain_up_to(&self, n: usize) -> Vec<T> {
        let mut st = self.lock();
        let mut out = Vec::with_capacity(n.min(st.queue.len()));
        while out.len() < n {
            match st.pop() {
                Some(val) => out.push(val),
                None => break,
            }
        }
        drop(st);
        if !out.is_empty() {
            self.inner.not_full.notify_all();
        }
        out
    }

    /// Iterator that takes values until the channel is momentarily empty.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { chan: self }
    }

    /// Timer path of a timeout channel: enqueue the sentinel, then close.
    fn fire(&self, val: T) {
        let mut st = self.lock();
        if !self.closed() {
            st.queue.push_back(val);
        }
        drop(st);
        self.inner.not_empty.notify_all();
        tracing::trace!(channel = self.inner.id, "timeout channel fired");
        self.close();
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("len", &self.lock().queue.len())
            .field("closed", &self.closed())
            .finish()
    }
}

/// Incremental drain. See [`Channel::try_iter`].
pub struct TryIter<'a, T> {
    chan: &'a Channel<T>,
}

impl<T> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.try_take().ok()
    }
}

/// Wait on `cv` for at most one tick, or until `deadline`.
fn park<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, State<T>>,
    deadline: Option<Instant>,
) -> MutexGuard<'a, State<T>> {
    let tick = match deadline {
        Some(d) => INTERRUPT_TICK.min(d.saturating_duration_since(Instant::now())),
        None => INTERRUPT_TICK,
    };
    match cv.wait_timeout(guard, tick) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn buffered_put_take() {
        let ch = buffered(10);
        ch.put(42).unwrap();
        assert_eq!(ch.size(), 1);
        assert_eq!(ch.take().unwrap(), 42);
        assert_eq!(ch.size(), 0);
    }

    #[test]
    fn unbuffered_rendezvous() {
        let ch = channel();
        let tx = ch.clone();
        let t = thread::spawn(move || tx.put(99).unwrap());
        assert_eq!(ch.take().unwrap(), 99);
        t.join().unwrap();
    }

    #[test]
    fn rendezvous_put_waits_for_taker() {
        let ch = channel::<i32>();
        let done = Arc::new(AtomicBool::new(false));
        let (tx, flag) = (ch.clone(), done.clone());
        let t = thread::spawn(move || {
            tx.put(7).unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        // Offer visible but not consumed, size still 0.
        while ch.peek().is_none() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ch.size(), 0);
        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));

        assert_eq!(ch.take().unwrap(), 7);
        t.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn rendezvous_close_withdraws_offer() {
        let ch = channel::<i32>();
        let tx = ch.clone();
        let t = thread::spawn(move || tx.put(5));
        while ch.peek().is_none() {
            thread::sleep(Duration::from_millis(1));
        }
        ch.close();
        let err = t.join().unwrap().unwrap_err();
        assert_eq!(err.kind, ChannelError::Closed);
        assert_eq!(err.value, 5);
        assert!(ch.peek().is_none());
    }

    #[test]
    fn buffered_put_blocks_when_full() {
        let ch = buffered(1);
        ch.put(1).unwrap();
        let tx = ch.clone();
        let t = thread::spawn(move || tx.put(2).unwrap());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ch.size(), 1);
        assert_eq!(ch.take().unwrap(), 1);
        t.join().unwrap();
        assert_eq!(ch.take().unwrap(), 2);
    }

    #[test]
    fn closed_rejects_put_keeps_values() {
        let ch = buffered(4);
        ch.put(1).unwrap();
        ch.put(2).unwrap();
        ch.close();
        ch.close();
        assert!(ch.is_closed());
        let err = ch.put(3).unwrap_err();
        assert_eq!(err.kind, ChannelError::Closed);
        assert_eq!(ch.peek(), Some(1));
        assert_eq!(ch.take().unwrap(), 1);
        assert_eq!(ch.take().unwrap(), 2);
        assert_eq!(ch.take(), Err(ChannelError::Closed));
        assert_eq!(ch.try_take(), Err(TryTakeError::Closed));
    }

    #[test]
    fn close_wakes_blocked_taker() {
        let ch = buffered::<i32>(1);
        let rx = ch.clone();
        let t = thread::spawn(move || rx.take());
        thread::sleep(Duration::from_millis(10));
        ch.close();
        assert_eq!(t.join().unwrap(), Err(ChannelError::Closed));
    }

    #[test]
    fn try_take_empty() {
        let ch = buffered::<i32>(10);
        assert_eq!(ch.try_take(), Err(TryTakeError::Empty));
    }

    #[test]
    fn try_put_buffered_full() {
        let ch = buffered(1);
        ch.try_put(1).unwrap();
        assert_eq!(ch.try_put(2), Err(TryPutError::Full(2)));
    }

    #[test]
    fn try_put_rendezvous_needs_waiting_taker() {
        let ch = channel();
        assert_eq!(ch.try_put(1), Err(TryPutError::Full(1)));

        let rx = ch.clone();
        let t = thread::spawn(move || rx.take().unwrap());
        let mut val = 2;
        loop {
            match ch.try_put(val) {
                Ok(()) => break,
                Err(e) => {
                    val = e.into_inner();
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        assert_eq!(t.join().unwrap(), 2);
    }

    #[test]
    fn try_put_rendezvous_ignores_selecting_reader() {
        let ch = channel();
        let rx = ch.clone();
        let t = thread::spawn(move || crate::select::select(&[&rx]));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ch.try_put(1), Err(TryPutError::Full(1)));
        ch.put(2).unwrap();
        assert_eq!(t.join().unwrap(), crate::select::Selected::Recv(0, 2));
    }

    #[test]
    fn take_timeout_max_duration() {
        let ch = buffered(1);
        ch.put(7).unwrap();
        assert_eq!(ch.take_timeout(Duration::MAX), Ok(Some(7)));
        ch.close();
        assert_eq!(ch.take_timeout(Duration::MAX), Err(ChannelError::Closed));
    }

    #[test]
    fn take_timeout_expires() {
        let ch = buffered::<i32>(1);
        let start = Instant::now();
        assert_eq!(ch.take_timeout(Duration::from_millis(20)), Ok(None));
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn timeout_channel_fires_once_then_closes() {
        let ch: Channel<Timeout> = timeout_channel(Duration::from_millis(10));
        assert_eq!(ch.put(Timeout).unwrap_err().kind, ChannelError::Unsupported);
        assert!(ch.peek().is_none());
        assert_eq!(ch.take().unwrap(), Timeout);
        assert!(ch.is_closed());
        assert_eq!(ch.take(), Err(ChannelError::Closed));
    }

    #[test]
    fn timeout_channel_custom_sentinel() {
        #[derive(Debug, Clone, PartialEq)]
        enum Event {
            Data(u32),
            Expired,
        }
        impl From<Timeout> for Event {
            fn from(_: Timeout) -> Self {
                Event::Expired
            }
        }
        let ch: Channel<Event> = Channel::timeout(Duration::from_millis(5));
        assert_eq!(ch.try_put(Event::Data(1)), Err(TryPutError::Unsupported(Event::Data(1))));
        assert_eq!(ch.take().unwrap(), Event::Expired);
    }

    #[test]
    fn snapshot_and_drains() {
        let ch = buffered(8);
        for i in 0..5 {
            ch.put(i).unwrap();
        }
        assert_eq!(ch.snapshot(), vec![0, 1, 2, 3, 4]);
        assert_eq!(ch.size(), 5);
        assert_eq!(ch.drain_up_to(2), vec![0, 1]);
        assert_eq!(ch.try_iter().take(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(ch.drain(), vec![3, 4]);
        assert!(ch.is_empty());
    }

    #[test]
    fn preferred_flag_round_trips() {
        let ch = buffered::<u8>(1);
        assert!(!ch.is_preferred());
        ch.set_preferred(true);
        assert!(ch.is_preferred());
    }

    #[test]
    fn channels_have_distinct_ids() {
        let a = buffered::<u8>(1);
        let b = a.clone();
        let c = buffered::<u8>(1);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(channel::<u8>().capacity(), 0);
        assert_eq!(buffered::<u8>(0).kind(), ChannelKind::Rendezvous);
    }

    #[test]
    fn interrupted_put_returns_value() {
        let token = Arc::new(cancel::CancelToken::new());
        let ch = buffered(1);
        ch.put(1).unwrap();
        let tx = ch.clone();
        let tk = token.clone();
        let t = thread::spawn(move || {
            let _guard = cancel::enter(tk);
            tx.put(2)
        });
        thread::sleep(Duration::from_millis(10));
        token.cancel();
        let err = t.join().unwrap().unwrap_err();
        assert_eq!(err.kind, ChannelError::Interrupted);
        assert_eq!(err.value, 2);
    }

    #[test]
    fn multiple_producers() {
        let ch = buffered(10);
        let count = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..4 {
            let tx = ch.clone();
            let c = count.clone();
            handles.push(thread::spawn(move || {
                tx.put(i).unwrap();
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let mut vals: Vec<i32> = (0..4).map(|_| ch.take().unwrap()).collect();
        for h in handles {
            h.join().unwrap();
        }
        vals.sort();
        assert_eq!(vals, vec![0, 1, 2, 3]);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }
}
