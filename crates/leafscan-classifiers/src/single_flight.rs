//! At-most-one in-flight initialization with a cached result
//!
//! Every caller that arrives while a load is running awaits the same shared
//! future. A successful value is cached for the lifetime of the cell; a
//! failure is handed to everyone who was waiting and then forgotten, so the
//! next caller starts a fresh attempt.
//!
//! The load runs on its own task, so it finishes even when every waiter
//! goes away, and a panic inside it surfaces as an error instead of
//! poisoning the cell.

use futures::future::{BoxFuture, FutureExt, Shared};
use leafscan_core::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;

type Pending<T> = Shared<BoxFuture<'static, Result<T>>>;

enum State<T> {
    Idle,
    Loading(Pending<T>),
    Ready(T),
}

/// Lazily initialized value shared by concurrent callers
pub struct SingleFlight<T> {
    state: Mutex<State<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty cell
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    /// The cached value, if initialization has completed
    pub fn get(&self) -> Option<T> {
        match &*self.state.lock() {
            State::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether a load is currently in flight
    pub fn is_loading(&self) -> bool {
        matches!(&*self.state.lock(), State::Loading(_))
    }

    /// Return the cached value, join the in-flight load, or start one with `init`.
    ///
    /// `init` is only called when no value is cached and nothing is loading.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock();
            match &*state {
                State::Ready(value) => return Ok(value.clone()),
                State::Loading(pending) => pending.clone(),
                State::Idle => {
                    let task = tokio::spawn(init());
                    let pending = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) if e.is_panic() => {
                                Err(Error::internal("initialization panicked"))
                            }
                            Err(e) => Err(Error::internal(format!("initialization failed: {}", e))),
                        }
                    }
                    .boxed()
                    .shared();
                    *state = State::Loading(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut state = self.state.lock();
        // Only the load we awaited may settle the state; a newer attempt owns it otherwise.
        if let State::Loading(current) = &*state {
            if Shared::ptr_eq(current, &pending) {
                *state = match &result {
                    Ok(value) => State::Ready(value.clone()),
                    Err(_) => State::Idle,
                };
            }
        }

        result
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
