//! # Work Queue
//!
//! De-duplicating FIFO of object keys shared by the workers of one controller.
//!
//! - a key waiting in the queue is held once, however often it is added
//! - a key being processed is never handed to a second worker; adding it
//!   marks it dirty and it is re-queued when the current worker calls
//!   [`WorkQueue::done`]
//! - [`WorkQueue::add_after`] re-adds a key once a delay has elapsed; a key
//!   holds at most one pending deadline and the earliest one wins
//! - [`WorkQueue::shutdown`] wakes every waiting worker; later gets return `None`

use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting in `queue` or waiting to be re-queued after processing
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Feeds the timer task; started on the first delayed add
    delays: Option<mpsc::UnboundedSender<(K, Instant)>>,
    shutdown: bool,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

/// Work queue of object keys
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    delays: None,
                    shutdown: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a key unless it is already waiting
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutdown || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue a key once `delay` has elapsed
    ///
    /// A key already waiting on an earlier deadline keeps it; a later
    /// deadline replaces nothing.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        let mut state = self.state();
        if state.shutdown {
            return;
        }
        let delays = state.delays.get_or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            tokio::spawn(run_timers(Arc::downgrade(&self.inner), receiver));
            sender
        });
        // the timer task only stops once this sender is dropped
        let _ = delays.send((key, deadline));
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key returned by [`get`](Self::get) as processed
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutdown {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        {
            let mut state = self.state();
            state.shutdown = true;
            state.delays = None;
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state().shutdown
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deliver delayed keys to the queue, one deadline per key
async fn run_timers<K>(
    inner: Weak<Inner<K>>,
    mut requests: mpsc::UnboundedReceiver<(K, Instant)>,
) where
    K: Clone + Eq + Hash + Send + 'static,
{
    let mut timers: DelayQueue<K> = DelayQueue::new();
    let mut scheduled: HashMap<K, (delay_queue::Key, Instant)> = HashMap::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some((key, deadline)) = request else {
                    break;
                };
                match scheduled.get_mut(&key) {
                    Some((_, current)) if *current <= deadline => {}
                    Some((timer, current)) => {
                        timers.reset_at(timer, deadline);
                        *current = deadline;
                    }
                    None => {
                        let timer = timers.insert_at(key.clone(), deadline);
                        scheduled.insert(key, (timer, deadline));
                    }
                }
            }
            Some(expired) = timers.next(), if !timers.is_empty() => {
                let key = expired.into_inner();
                scheduled.remove(&key);
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                WorkQueue { inner }.add(key);
            }
        }
    }
}
