//! The render thread.
//!
//! Owns the backend context (GL contexts are thread-affine) and drains a
//! FIFO of command buffers. Buffers execute atomically and strictly in
//! submission order; a later buffer always sees the effects of every
//! earlier one. The executor closure is provided by the device and holds
//! everything the commands need, including the backend itself.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::command::CommandBuffer;

struct QueueState {
    buffers: VecDeque<CommandBuffer>,
    pending: usize,
    stop_requested: bool,
    running: bool,
}

struct Queue {
    state: Mutex<QueueState>,
    queue_cv: Condvar,
    idle_cv: Condvar,
}

pub struct RenderThread {
    queue: Arc<Queue>,
    executed: Arc<AtomicUsize>,
    join_handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Spawn the worker. `executor` runs on the render thread for every
    /// buffer; a panic inside it is logged and the thread moves on to the
    /// next buffer.
    pub fn spawn<F>(mut executor: F) -> RenderThread
    where
        F: FnMut(CommandBuffer) + Send + 'static,
    {
        let queue = Arc::new(Queue {
            state: Mutex::new(QueueState {
                buffers: VecDeque::new(),
                pending: 0,
                stop_requested: false,
                running: true,
            }),
            queue_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });
        let executed = Arc::new(AtomicUsize::new(0));

        let worker_queue = Arc::clone(&queue);
        let worker_executed = Arc::clone(&executed);
        let join_handle = std::thread::Builder::new()
            .name("dx8gl-render".to_string())
            .spawn(move || {
                debug!("render thread started");
                loop {
                    let buffer = {
                        let mut state = worker_queue.state.lock().unwrap();
                        loop {
                            if let Some(buffer) = state.buffers.pop_front() {
                                break Some(buffer);
                            }
                            if state.stop_requested {
                                break None;
                            }
                            state = worker_queue.queue_cv.wait(state).unwrap();
                        }
                    };

                    let Some(buffer) = buffer else {
                        break;
                    };

                    let count = buffer.command_count();
                    trace!("executing command buffer: {} commands", count);
                    let result = catch_unwind(AssertUnwindSafe(|| executor(buffer)));
                    if let Err(payload) = result {
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!("command buffer execution failed: {}", message);
                    }
                    worker_executed.fetch_add(1, Ordering::Relaxed);

                    let mut state = worker_queue.state.lock().unwrap();
                    if state.pending > 0 {
                        state.pending -= 1;
                    }
                    if state.buffers.is_empty() && state.pending == 0 {
                        worker_queue.idle_cv.notify_all();
                    }
                }

                let mut state = worker_queue.state.lock().unwrap();
                state.running = false;
                state.pending = 0;
                worker_queue.idle_cv.notify_all();
                debug!("render thread exiting");
            })
            .expect("failed to spawn render thread");

        RenderThread {
            queue,
            executed,
            join_handle: Some(join_handle),
        }
    }

    /// Non-blocking enqueue. Buffers submitted after `stop` are dropped
    /// with a warning.
    pub fn submit(&self, buffer: CommandBuffer) {
        if buffer.is_empty() {
            return;
        }
        {
            let mut state = self.queue.state.lock().unwrap();
            if state.stop_requested || !state.running {
                warn!("command buffer submitted after stop; dropping");
                return;
            }
            trace!(
                "command buffer submitted: {} commands, {} bytes (queue depth {})",
                buffer.command_count(),
                buffer.byte_size(),
                state.buffers.len() + 1
            );
            state.buffers.push_back(buffer);
            state.pending += 1;
        }
        self.queue.queue_cv.notify_one();
    }

    /// Block until the queue is drained and nothing is executing.
    pub fn wait_for_idle(&self) {
        let mut state = self.queue.state.lock().unwrap();
        while state.running && (!state.buffers.is_empty() || state.pending > 0) {
            state = self.queue.idle_cv.wait(state).unwrap();
        }
    }

    /// Wake the worker, then wait for it to drain.
    pub fn flush(&self) {
        self.queue.queue_cv.notify_one();
        self.wait_for_idle();
    }

    pub fn is_idle(&self) -> bool {
        let state = self.queue.state.lock().unwrap();
        state.buffers.is_empty() && state.pending == 0
    }

    pub fn pending_count(&self) -> usize {
        self.queue.state.lock().unwrap().buffers.len()
    }

    pub fn buffers_executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    /// Request stop, let the worker drain the remaining queue, and join.
    pub fn stop(&mut self) {
        {
            let mut state = self.queue.state.lock().unwrap();
            if state.stop_requested {
                return;
            }
            state.stop_requested = true;
        }
        self.queue.queue_cv.notify_one();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use std::sync::atomic::AtomicU32;

    fn buffer_with(commands: usize) -> CommandBuffer {
        let mut buffer = CommandBuffer::new();
        for _ in 0..commands {
            buffer.push(Command::Present);
        }
        buffer
    }

    #[test]
    fn buffers_execute_in_submission_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        let thread = RenderThread::spawn(move |buffer| {
            sink.lock().unwrap().push(buffer.command_count());
        });

        for i in 1..=5 {
            thread.submit(buffer_with(i));
        }
        thread.wait_for_idle();
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn wait_for_idle_sees_all_work_done() {
        let counter = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&counter);
        let thread = RenderThread::spawn(move |_| {
            std::thread::sleep(std::time::Duration::from_millis(1));
            sink.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..10 {
            thread.submit(buffer_with(1));
        }
        thread.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(thread.is_idle());
    }

    #[test]
    fn stop_drains_remaining_buffers() {
        let counter = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&counter);
        let mut thread = RenderThread::spawn(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..4 {
            thread.submit(buffer_with(2));
        }
        thread.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn submit_after_stop_is_dropped() {
        let counter = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&counter);
        let mut thread = RenderThread::spawn(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        thread.stop();
        thread.submit(buffer_with(1));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(thread.buffers_executed(), 0);
    }

    #[test]
    fn a_panicking_buffer_does_not_kill_the_thread() {
        let counter = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&counter);
        let thread = RenderThread::spawn(move |buffer| {
            if buffer.command_count() == 13 {
                panic!("bad buffer");
            }
            sink.fetch_add(1, Ordering::SeqCst);
        });
        thread.submit(buffer_with(1));
        thread.submit(buffer_with(13));
        thread.submit(buffer_with(1));
        thread.wait_for_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(thread.buffers_executed(), 3);
    }

    #[test]
    fn empty_buffers_are_not_queued() {
        let thread = RenderThread::spawn(|_| {});
        thread.submit(CommandBuffer::new());
        assert!(thread.is_idle());
        assert_eq!(thread.buffers_executed(), 0);
    }
}
