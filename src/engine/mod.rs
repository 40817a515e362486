//! Game engine module
//!
//! The engine serializes all game-state mutation through a single dispatcher
//! thread: producers (network callbacks, background completions, the tick
//! pump) push tasks onto a multi-producer queue, and the dispatcher pops one
//! task at a time and fully awaits it before taking the next. From the
//! simulation's point of view execution is single-threaded and
//! run-to-completion per task - no locks are needed for cross-task
//! consistency.
//!
//! Two auxiliary lanes exist: a parallel lane (rayon, sized to the CPU
//! count) used only for fan-out *within* one task, and a background lane
//! (one thread) for blocking I/O whose results re-enter the simulation as
//! newly pushed tasks.
//!
//! A task failure cannot be recovered: partial game-state mutation mid-tick
//! has no rollback, so the engine logs and halts the process.

pub mod task;

pub use task::Task;

use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace};

use crate::state::ServerContext;

/// Work accepted by the background lane. Jobs must convert their own I/O
/// failures into data (a reject code, a logged miss) before pushing results
/// back onto the main queue.
pub type BackgroundJob = Box<dyn FnOnce(&ServerContext) + Send + 'static>;

enum Command {
    Run(Task),
    Stop,
}

enum BackgroundCommand {
    Run(BackgroundJob),
    Stop,
}

/// The task engine
pub struct GameEngine {
    tx: UnboundedSender<Command>,
    background_tx: UnboundedSender<BackgroundCommand>,
    rx: Mutex<Option<UnboundedReceiver<Command>>>,
    background_rx: Mutex<Option<UnboundedReceiver<BackgroundCommand>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl GameEngine {
    /// Create an engine; no threads run until [`GameEngine::start`]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (background_tx, background_rx) = mpsc::unbounded_channel();
        Self {
            tx,
            background_tx,
            rx: Mutex::new(Some(rx)),
            background_rx: Mutex::new(Some(background_rx)),
            dispatcher: Mutex::new(None),
            background: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the dispatcher and background threads
    pub fn start(&self, ctx: Arc<ServerContext>) {
        let rx = self
            .rx
            .lock()
            .take()
            .expect("engine started more than once");
        let background_rx = self
            .background_rx
            .lock()
            .take()
            .expect("engine started more than once");

        self.running.store(true, Ordering::SeqCst);

        let dispatcher_ctx = ctx.clone();
        let dispatcher = std::thread::Builder::new()
            .name("game-dispatcher".to_string())
            .spawn(move || dispatcher_loop(rx, dispatcher_ctx))
            .expect("failed to spawn dispatcher thread");

        let background = std::thread::Builder::new()
            .name("background-worker".to_string())
            .spawn(move || background_loop(background_rx, ctx))
            .expect("failed to spawn background thread");

        *self.dispatcher.lock() = Some(dispatcher);
        *self.background.lock() = Some(background);

        info!("Game engine started");
    }

    /// Whether the dispatcher is accepting work
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue a task (non-blocking, FIFO). Safe from any thread.
    pub fn push(&self, task: Task) {
        trace!(task = task.name(), "Task enqueued");
        if self.tx.send(Command::Run(task)).is_err() {
            debug!("Task dropped: engine is stopped");
        }
    }

    /// Hand a blocking job to the background lane. The job runs off the
    /// dispatcher thread; anything the simulation must see goes back through
    /// [`GameEngine::push`].
    pub fn submit_background<F>(&self, job: F)
    where
        F: FnOnce(&ServerContext) + Send + 'static,
    {
        if self
            .background_tx
            .send(BackgroundCommand::Run(Box::new(job)))
            .is_err()
        {
            debug!("Background job dropped: engine is stopped");
        }
    }

    /// Signal both lanes to exit after their current work and join them
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.tx.send(Command::Stop);
        let _ = self.background_tx.send(BackgroundCommand::Stop);

        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.background.lock().take() {
            let _ = handle.join();
        }

        info!("Game engine stopped");
    }
}

impl Default for GameEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The single dispatcher loop: pop one task, run it to completion, repeat.
fn dispatcher_loop(mut rx: UnboundedReceiver<Command>, ctx: Arc<ServerContext>) {
    debug!("Dispatcher loop running");

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Run(task) => run_fatal(task, &ctx),
            Command::Stop => break,
        }
    }

    debug!("Dispatcher loop exited");
}

/// The background lane: one blocking job at a time, off the dispatcher.
fn background_loop(mut rx: UnboundedReceiver<BackgroundCommand>, ctx: Arc<ServerContext>) {
    debug!("Background loop running");

    while let Some(command) = rx.blocking_recv() {
        match command {
            BackgroundCommand::Run(job) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&ctx)));
                if outcome.is_err() {
                    error!("Background job panicked; halting server");
                    process::exit(1);
                }
            }
            BackgroundCommand::Stop => break,
        }
    }

    debug!("Background loop exited");
}

/// Execute one task; any escaping error or panic halts the process.
fn run_fatal(task: Task, ctx: &ServerContext) {
    let name = task.name();
    trace!(task = name, "Task dispatched");

    match panic::catch_unwind(AssertUnwindSafe(|| task.execute(ctx))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(task = name, error = %e, "Task failed; halting server");
            process::exit(1);
        }
        Err(_) => {
            error!(task = name, "Task panicked; halting server");
            process::exit(1);
        }
    }
}
