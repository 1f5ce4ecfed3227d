use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How a hand-off to the presentation context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Ran on the calling thread, which already had access.
    Inline,
    /// Ran on the presentation context within the invocation timeout.
    Completed,
    /// Still queued when the timeout elapsed. It will run later, once.
    Deferred,
    /// The context dropped the action without completing it.
    Abandoned,
}

impl DispatchOutcome {
    /// Whether the action has already finished running.
    pub fn is_finished(self) -> bool {
        matches!(self, DispatchOutcome::Inline | DispatchOutcome::Completed)
    }
}

struct ContextInner {
    name: String,
    owner: ThreadId,
    sender: Sender<Job>,
    /// Present only for contexts bound to an existing thread, drained by `pump`
    pending: Option<Receiver<Job>>,
    invocation_timeout: Duration,
}

/// The single logical context that observes change notifications and
/// command requery signals.
///
/// Work produced on other threads is queued onto the context. Callers wait a
/// bounded time for it to run; past the bound the work stays queued and the
/// caller moves on.
#[derive(Clone)]
pub struct PresentationContext {
    inner: Arc<ContextInner>,
}

impl PresentationContext {
    /// Start a dedicated presentation thread. It exits once every handle to
    /// the context is dropped and the queue is drained.
    pub fn spawn(name: impl Into<String>, invocation_timeout: Duration) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job>();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!("Presentation thread '{}' running", thread_name);
                for job in receiver.iter() {
                    run_job(&thread_name, job);
                }
                debug!("Presentation thread '{}' stopped", thread_name);
            })?;

        info!("Spawned presentation context '{}'", name);

        Ok(Self {
            inner: Arc::new(ContextInner {
                name,
                owner: handle.thread().id(),
                sender,
                pending: None,
                invocation_timeout,
            }),
        })
    }

    /// Bind the calling thread as the presentation context. Queued work runs
    /// whenever this thread calls [`pump`](Self::pump).
    pub fn current_thread(name: impl Into<String>, invocation_timeout: Duration) -> Self {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job>();
        info!("Bound presentation context '{}' to the current thread", name);

        Self {
            inner: Arc::new(ContextInner {
                name,
                owner: thread::current().id(),
                sender,
                pending: Some(receiver),
                invocation_timeout,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn invocation_timeout(&self) -> Duration {
        self.inner.invocation_timeout
    }

    /// True on the thread that owns the context.
    pub fn has_access(&self) -> bool {
        thread::current().id() == self.inner.owner
    }

    /// Run `action` on the context and wait for it, up to the invocation
    /// timeout. Runs inline when the caller already has access.
    pub fn invoke<F>(&self, action: F) -> DispatchOutcome
    where
        F: FnOnce() + Send + 'static,
    {
        if self.has_access() {
            action();
            return DispatchOutcome::Inline;
        }

        let (done_tx, done_rx) = bounded::<()>(1);
        let job: Job = Box::new(move || {
            action();
            let _ = done_tx.send(());
        });

        if let Err(rejected) = self.inner.sender.send(job) {
            warn!(
                "Presentation context '{}' is gone, running action inline",
                self.inner.name
            );
            (rejected.into_inner())();
            return DispatchOutcome::Inline;
        }

        match done_rx.recv_timeout(self.inner.invocation_timeout) {
            Ok(()) => DispatchOutcome::Completed,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Invocation on '{}' did not finish within {:?}, leaving it queued",
                    self.inner.name, self.inner.invocation_timeout
                );
                DispatchOutcome::Deferred
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Invocation on '{}' was dropped before completing", self.inner.name);
                DispatchOutcome::Abandoned
            }
        }
    }

    /// Queue `action` without waiting, even when called on the context.
    pub fn invoke_later<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(rejected) = self.inner.sender.send(Box::new(action)) {
            warn!(
                "Presentation context '{}' is gone, running action inline",
                self.inner.name
            );
            (rejected.into_inner())();
        }
    }

    /// Async flavour of [`invoke`](Self::invoke). Suspends instead of
    /// blocking while the context runs the action.
    pub async fn invoke_async<F>(&self, action: F) -> DispatchOutcome
    where
        F: FnOnce() + Send + 'static,
    {
        if self.has_access() {
            action();
            return DispatchOutcome::Inline;
        }

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let job: Job = Box::new(move || {
            action();
            let _ = done_tx.send(());
        });

        if let Err(rejected) = self.inner.sender.send(job) {
            warn!(
                "Presentation context '{}' is gone, running action inline",
                self.inner.name
            );
            (rejected.into_inner())();
            return DispatchOutcome::Inline;
        }

        match tokio::time::timeout(self.inner.invocation_timeout, done_rx).await {
            Ok(Ok(())) => DispatchOutcome::Completed,
            Ok(Err(_)) => {
                warn!("Invocation on '{}' was dropped before completing", self.inner.name);
                DispatchOutcome::Abandoned
            }
            Err(_) => {
                warn!(
                    "Invocation on '{}' did not finish within {:?}, leaving it queued",
                    self.inner.name, self.inner.invocation_timeout
                );
                DispatchOutcome::Deferred
            }
        }
    }

    /// Run everything queued so far. Only meaningful for contexts created
    /// with [`current_thread`](Self::current_thread) and only on the owning
    /// thread; returns the number of actions run.
    pub fn pump(&self) -> usize {
        let Some(pending) = &self.inner.pending else {
            return 0;
        };

        if !self.has_access() {
            warn!(
                "pump() on '{}' called from a thread without access",
                self.inner.name
            );
            return 0;
        }

        let mut ran = 0;
        while let Ok(job) = pending.try_recv() {
            run_job(&self.inner.name, job);
            ran += 1;
        }
        ran
    }
}

impl fmt::Debug for PresentationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentationContext")
            .field("name", &self.inner.name)
            .field("invocation_timeout", &self.inner.invocation_timeout)
            .finish()
    }
}

/// Run `action` on `context`, or inline when there is none.
pub fn dispatch<F>(context: Option<&PresentationContext>, action: F) -> DispatchOutcome
where
    F: FnOnce() + Send + 'static,
{
    match context {
        Some(context) => context.invoke(action),
        None => {
            action();
            DispatchOutcome::Inline
        }
    }
}

fn run_job(context: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Action on presentation context '{}' panicked", context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_invoke_on_owner_runs_inline() {
        let context = PresentationContext::current_thread("ui", TIMEOUT);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        let outcome = context.invoke(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(outcome, DispatchOutcome::Inline);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(context.pump(), 0);
    }

    #[test]
    fn test_invoke_runs_on_spawned_thread() {
        let context = PresentationContext::spawn("presentation-test", TIMEOUT).unwrap();
        assert!(!context.has_access());

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let probe = context.clone();
        let outcome = context.invoke(move || {
            *slot.lock() = Some((
                thread::current().name().map(str::to_owned),
                probe.has_access(),
            ));
        });

        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(
            *seen.lock(),
            Some((Some("presentation-test".to_string()), true))
        );
    }

    #[test]
    fn test_timeout_defers_and_runs_exactly_once() {
        let context = PresentationContext::current_thread("ui", Duration::from_millis(20));
        let ran = Arc::new(AtomicUsize::new(0));

        // The owner is not pumping, so the worker's wait times out
        let worker_context = context.clone();
        let counter = Arc::clone(&ran);
        let outcome = thread::spawn(move || {
            worker_context.invoke(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .join()
        .unwrap();

        assert_eq!(outcome, DispatchOutcome::Deferred);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        assert_eq!(context.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(context.pump(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoke_later_queues_even_on_owner() {
        let context = PresentationContext::current_thread("ui", TIMEOUT);
        let order = Arc::new(Mutex::new(Vec::new()));

        for step in 0..3 {
            let order = Arc::clone(&order);
            context.invoke_later(move || order.lock().push(step));
        }
        assert!(order.lock().is_empty());

        assert_eq!(context.pump(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_action_does_not_kill_context() {
        let context = PresentationContext::spawn("presentation-panic", TIMEOUT).unwrap();

        let outcome = context.invoke(|| panic!("boom"));
        assert_eq!(outcome, DispatchOutcome::Abandoned);

        let outcome = context.invoke(|| {});
        assert_eq!(outcome, DispatchOutcome::Completed);
    }

    #[test]
    fn test_dispatch_without_context_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let outcome = dispatch(None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(outcome, DispatchOutcome::Inline);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_async_completes() {
        let context = PresentationContext::spawn("presentation-async", TIMEOUT).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        let outcome = context
            .invoke_async(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert_eq!(outcome, DispatchOutcome::Completed);
        assert!(outcome.is_finished());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
