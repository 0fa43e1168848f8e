//! Headless UI runtime.
//!
//! `QueueRuntime` is a message loop without rendering: a FIFO of marshaled
//! work drained on whichever thread calls [`UiRuntime::run_message_loop`].
//! It enforces the same thread affinity a real toolkit does, which makes it
//! the runtime used by the demo binary and the lifecycle tests.

use super::error::UiError;
use super::ui_runtime::{UiRuntime, UiWork};
use super::window::Window;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc;

enum Message {
    Invoke(UiWork),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Exited = 2,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            _ => LoopState::Exited,
        }
    }
}

pub struct QueueRuntime {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    ui_thread: Mutex<Option<ThreadId>>,
    state: AtomicU8,
    dispatched: AtomicUsize,
}

impl Default for QueueRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRuntime {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            ui_thread: Mutex::new(None),
            state: AtomicU8::new(LoopState::Idle as u8),
            dispatched: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    pub fn ui_thread(&self) -> Option<ThreadId> {
        *self.ui_thread.lock()
    }

    /// Number of work items executed by the loop so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Acquire)
    }

    fn on_ui_thread(&self) -> bool {
        self.ui_thread() == Some(thread::current().id())
    }
}

/// Flips the runtime to `Exited` however the loop ends, panics included.
struct RunningGuard<'a>(&'a AtomicU8);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(LoopState::Exited as u8, Ordering::Release);
    }
}

impl UiRuntime for QueueRuntime {
    fn run_message_loop(&self, root: &Window) -> Result<(), UiError> {
        let mut rx = self.rx.lock().take().ok_or(UiError::LoopAlreadyRan)?;

        root.create_handle()?;
        *self.ui_thread.lock() = Some(thread::current().id());
        self.state.store(LoopState::Running as u8, Ordering::Release);
        let _running = RunningGuard(&self.state);
        tracing::debug!(window = %root.id(), title = root.title(), "Message loop running");

        while let Some(msg) = rx.blocking_recv() {
            match msg {
                Message::Invoke(work) => {
                    work();
                    self.dispatched.fetch_add(1, Ordering::AcqRel);
                }
                Message::Exit => break,
            }
        }

        // Dropping the receiver makes further posts fail with `LoopExited`.
        rx.close();
        drop(rx);
        tracing::debug!(dispatched = self.dispatched(), "Message loop exited");
        Ok(())
    }

    fn exit_message_loop(&self) -> Result<(), UiError> {
        match self.state() {
            LoopState::Running => {}
            LoopState::Exited => return Err(UiError::LoopExited),
            LoopState::Idle => {
                return Err(UiError::CrossThreadAccess {
                    operation: "exit_message_loop",
                })
            }
        }
        if !self.on_ui_thread() {
            return Err(UiError::CrossThreadAccess {
                operation: "exit_message_loop",
            });
        }
        self.tx.send(Message::Exit).map_err(|_| UiError::LoopExited)
    }

    fn invoke_on_ui_thread(&self, work: UiWork) -> Result<(), UiError> {
        if self.state() == LoopState::Exited {
            return Err(UiError::LoopExited);
        }
        self.tx
            .send(Message::Invoke(work))
            .map_err(|_| UiError::LoopExited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::window::{CloseOutcome, CloseReason};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn work_runs_on_the_loop_thread_in_order() {
        let rt = Arc::new(QueueRuntime::new());
        let window = Arc::new(Window::new("main"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            rt.invoke_on_ui_thread(Box::new(move || seen.lock().push((i, thread::current().id()))))
                .unwrap();
        }
        let rt2 = rt.clone();
        rt.invoke_on_ui_thread(Box::new(move || rt2.exit_message_loop().unwrap()))
            .unwrap();

        let (rt3, w3) = (rt.clone(), window.clone());
        let loop_thread = thread::spawn(move || {
            rt3.run_message_loop(&w3).unwrap();
            thread::current().id()
        });
        let loop_id = loop_thread.join().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(seen.iter().all(|(_, t)| *t == loop_id));
        assert_eq!(rt.dispatched(), 4);
        assert_eq!(rt.state(), LoopState::Exited);
        assert_eq!(window.owner_thread(), Some(loop_id));
    }

    #[test]
    fn posts_after_exit_fail() {
        let rt = Arc::new(QueueRuntime::new());
        let rt2 = rt.clone();
        rt.invoke_on_ui_thread(Box::new(move || rt2.exit_message_loop().unwrap()))
            .unwrap();
        let rt3 = rt.clone();
        thread::spawn(move || rt3.run_message_loop(&Window::new("main")).unwrap())
            .join()
            .unwrap();

        let err = rt.invoke_on_ui_thread(Box::new(|| {})).unwrap_err();
        assert_eq!(err, UiError::LoopExited);
        assert_eq!(rt.exit_message_loop(), Err(UiError::LoopExited));
    }

    #[test]
    fn loop_runs_only_once() {
        let rt = Arc::new(QueueRuntime::new());
        let rt2 = rt.clone();
        rt.invoke_on_ui_thread(Box::new(move || rt2.exit_message_loop().unwrap()))
            .unwrap();
        let rt3 = rt.clone();
        thread::spawn(move || rt3.run_message_loop(&Window::new("a")).unwrap())
            .join()
            .unwrap();

        assert_eq!(
            rt.run_message_loop(&Window::new("b")),
            Err(UiError::LoopAlreadyRan)
        );
    }

    #[test]
    fn exit_is_rejected_off_the_loop_thread() {
        let rt = Arc::new(QueueRuntime::new());
        let probed = Arc::new(AtomicBool::new(false));

        let (rt_probe, flag) = (rt.clone(), probed.clone());
        rt.invoke_on_ui_thread(Box::new(move || {
            let rt_outside = rt_probe.clone();
            let res = thread::spawn(move || rt_outside.exit_message_loop())
                .join()
                .unwrap();
            flag.store(
                matches!(res, Err(UiError::CrossThreadAccess { .. })),
                Ordering::SeqCst,
            );
            rt_probe.exit_message_loop().unwrap();
        }))
        .unwrap();

        let rt2 = rt.clone();
        thread::spawn(move || rt2.run_message_loop(&Window::new("main")).unwrap())
            .join()
            .unwrap();
        assert!(probed.load(Ordering::SeqCst));
    }

    #[test]
    fn request_close_goes_through_the_window() {
        let rt = Arc::new(QueueRuntime::new());
        let window = Arc::new(Window::new("main"));
        let outcome = Arc::new(Mutex::new(None));

        let (rt2, w2, out) = (rt.clone(), window.clone(), outcome.clone());
        rt.invoke_on_ui_thread(Box::new(move || {
            *out.lock() = Some(rt2.request_close(&w2, CloseReason::HostShutdown));
            rt2.exit_message_loop().unwrap();
        }))
        .unwrap();

        let (rt3, w3) = (rt.clone(), window.clone());
        thread::spawn(move || rt3.run_message_loop(&w3).unwrap())
            .join()
            .unwrap();
        assert_eq!(*outcome.lock(), Some(Ok(CloseOutcome::Closed)));
        assert!(window.is_closed());
    }
}
