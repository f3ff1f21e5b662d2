//! Core thread hosting a [`Cpu`] and the channels used to talk to it.
//!
//! The core thread owns the CPU. Other threads submit closures over a request
//! channel and wait on a one-shot reply with a timeout. While the CPU runs
//! freely the thread executes it in slices and drains requests between them;
//! breakpoint hits, faults and pause/resume transitions are published on an
//! event channel.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use log::{debug, info, warn};
use ppc_core::{Cpu, CpuState, FaultCode, RunStop};
use thiserror::Error;

/// Default instructions per free-running slice.
pub const DEFAULT_RUN_SLICE: u64 = 10_000;

/// Default time to wait for a reply from the core thread.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Host-side tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Instructions executed between request checks while running.
    pub run_slice: u64,
    /// How long callers wait for a request to complete.
    pub reply_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            run_slice: DEFAULT_RUN_SLICE,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Notifications published by the core thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreEvent {
    /// A breakpoint fired and the core is now paused at `pc`.
    BreakpointHit {
        /// Breakpoint address.
        pc: u32,
        /// Whether it was a temporary breakpoint.
        temporary: bool,
    },
    /// The core paused at `pc` on request.
    Paused {
        /// PC at the pause.
        pc: u32,
    },
    /// The core started running freely.
    Resumed,
    /// An instruction faulted while running; the core is paused on it.
    Faulted {
        /// Fault cause.
        cause: FaultCode,
        /// Address of the faulting instruction.
        pc: u32,
    },
    /// The core powered down.
    PoweredDown,
}

/// Errors talking to the core thread.
#[derive(Debug, Error)]
pub enum HostError {
    /// The core thread has exited.
    #[error("core thread is not running")]
    Disconnected,
    /// The request did not complete in time.
    #[error("core thread did not reply within {0:?}")]
    Timeout(Duration),
    /// The core thread could not be started.
    #[error("failed to spawn core thread: {0}")]
    Spawn(#[from] io::Error),
    /// The core thread panicked.
    #[error("core thread panicked")]
    Panicked,
}

type Job = Box<dyn FnOnce(&mut Cpu, &Sender<CoreEvent>) + Send>;

enum Request {
    Run(Job),
    Shutdown,
}

/// Cloneable handle for submitting work to the core thread.
#[derive(Clone)]
pub struct CoreHandle {
    requests: Sender<Request>,
    reply_timeout: Duration,
}

impl CoreHandle {
    /// Runs `f` on the core thread and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Disconnected`] if the thread is gone and
    /// [`HostError::Timeout`] if no reply arrives within the reply timeout.
    pub fn with_cpu<R, F>(&self, f: F) -> Result<R, HostError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Cpu) -> R + Send + 'static,
    {
        self.submit(f)?
            .recv_timeout(self.reply_timeout)
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => HostError::Timeout(self.reply_timeout),
                RecvTimeoutError::Disconnected => HostError::Disconnected,
            })
    }

    /// Runs `f` on the core thread and waits until it finishes, however long
    /// that takes.
    ///
    /// For jobs that carry their own bound, such as a step-out budget.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Disconnected`] if the thread is gone or dies
    /// before replying.
    pub fn with_cpu_to_completion<R, F>(&self, f: F) -> Result<R, HostError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Cpu) -> R + Send + 'static,
    {
        self.submit(f)?.recv().map_err(|_| HostError::Disconnected)
    }

    fn submit<R, F>(&self, f: F) -> Result<Receiver<R>, HostError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Cpu) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        // The transition is published before the reply so a caller that
        // saw the reply also sees the event.
        let job: Job = Box::new(move |cpu, events| {
            let before = cpu.state();
            let result = f(cpu);
            publish_transition(before, cpu, events);
            let _ = reply_tx.send(result);
        });
        self.requests
            .send(Request::Run(job))
            .map_err(|_| HostError::Disconnected)?;
        Ok(reply_rx)
    }

    /// Pauses the core.
    ///
    /// # Errors
    ///
    /// See [`CoreHandle::with_cpu`].
    pub fn pause(&self) -> Result<u32, HostError> {
        self.with_cpu(|cpu| {
            cpu.enable_stepping(true);
            cpu.pc()
        })
    }

    /// Resumes free execution.
    ///
    /// # Errors
    ///
    /// See [`CoreHandle::with_cpu`].
    pub fn resume(&self) -> Result<(), HostError> {
        self.with_cpu(|cpu| cpu.enable_stepping(false))
    }

    /// Current run state.
    ///
    /// # Errors
    ///
    /// See [`CoreHandle::with_cpu`].
    pub fn state(&self) -> Result<CpuState, HostError> {
        self.with_cpu(|cpu| cpu.state())
    }
}

/// Owner of the core thread.
pub struct CoreThread {
    handle: CoreHandle,
    events: Receiver<CoreEvent>,
    join: Option<JoinHandle<Cpu>>,
}

impl CoreThread {
    /// Moves `cpu` onto a new core thread.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Spawn`] if the OS refuses the thread.
    pub fn spawn(cpu: Cpu, config: HostConfig) -> Result<Self, HostError> {
        let (request_tx, request_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let join = thread::Builder::new()
            .name("ppc-core".to_owned())
            .spawn(move || core_loop(cpu, &request_rx, &event_tx, config.run_slice))?;
        info!("core thread started");
        Ok(Self {
            handle: CoreHandle {
                requests: request_tx,
                reply_timeout: config.reply_timeout,
            },
            events: event_rx,
            join: Some(join),
        })
    }

    /// Handle for submitting requests.
    #[must_use]
    pub fn handle(&self) -> CoreHandle {
        self.handle.clone()
    }

    /// Receiver for core events.
    #[must_use]
    pub fn events(&self) -> Receiver<CoreEvent> {
        self.events.clone()
    }

    /// Stops the thread and hands the CPU back.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Panicked`] if the thread died, or
    /// [`HostError::Disconnected`] if it was already joined.
    pub fn shutdown(mut self) -> Result<Cpu, HostError> {
        let _ = self.handle.requests.send(Request::Shutdown);
        let join = self.join.take().ok_or(HostError::Disconnected)?;
        join.join().map_err(|_| HostError::Panicked)
    }
}

impl Drop for CoreThread {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.handle.requests.send(Request::Shutdown);
            let _ = join.join();
        }
    }
}

fn core_loop(
    mut cpu: Cpu,
    requests: &Receiver<Request>,
    events: &Sender<CoreEvent>,
    run_slice: u64,
) -> Cpu {
    loop {
        let request = if cpu.state().is_running() {
            match requests.try_recv() {
                Ok(request) => Some(request),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match requests.recv() {
                Ok(request) => Some(request),
                Err(_) => break,
            }
        };

        match request {
            Some(Request::Shutdown) => break,
            Some(Request::Run(job)) => {
                job(&mut cpu, events);
                continue;
            }
            None => {}
        }

        let outcome = cpu.run(run_slice);
        match outcome.stop {
            RunStop::Breakpoint { pc, temporary } => {
                debug!("core paused at breakpoint {pc:08x}");
                let _ = events.send(CoreEvent::BreakpointHit { pc, temporary });
            }
            RunStop::Fault { cause, pc } => {
                warn!("core faulted at {pc:08x}: {cause}");
                let _ = events.send(CoreEvent::Faulted { cause, pc });
            }
            RunStop::BudgetExhausted | RunStop::NotRunning => {}
        }
    }
    info!("core thread exiting");
    cpu
}

fn publish_transition(before: CpuState, cpu: &Cpu, events: &Sender<CoreEvent>) {
    let after = cpu.state();
    if before == after {
        return;
    }
    let event = match after {
        CpuState::Stepping => CoreEvent::Paused { pc: cpu.pc() },
        CpuState::Running => CoreEvent::Resumed,
        CpuState::PowerDown => CoreEvent::PoweredDown,
    };
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ppc_core::{CoreConfig, Cpu, Instruction, NOP_INSTRUCTION};

    use super::{CoreEvent, CoreThread, HostConfig, HostError};

    const BASE: u32 = 0x8000_0000;

    fn spawn(words: &[u32], boot_to_pause: bool) -> CoreThread {
        let mut cpu = Cpu::new(CoreConfig {
            ram_size: 0x1000,
            boot_to_pause,
            ..CoreConfig::default()
        });
        cpu.memory_mut().write_words(BASE, words).expect("fits");
        CoreThread::spawn(
            cpu,
            HostConfig {
                run_slice: 64,
                reply_timeout: Duration::from_secs(5),
            },
        )
        .expect("spawn")
    }

    #[test]
    fn requests_run_on_the_core_thread() {
        let core = spawn(&[NOP_INSTRUCTION], true);
        let pc = core.handle().with_cpu(|cpu| cpu.pc()).expect("reply");
        assert_eq!(pc, BASE);
        let cpu = core.shutdown().expect("joins");
        assert!(cpu.is_stepping());
    }

    #[test]
    fn breakpoint_hit_is_published() {
        let spin = Instruction::branch(BASE + 8, BASE + 8, false).hex();
        let core = spawn(&[NOP_INSTRUCTION, NOP_INSTRUCTION, spin], true);
        let events = core.events();
        let handle = core.handle();
        handle
            .with_cpu(|cpu| cpu.breakpoints_mut().add(BASE + 8, false))
            .expect("reply");
        handle.resume().expect("resume");
        assert_eq!(
            events.recv_timeout(Duration::from_secs(5)),
            Ok(CoreEvent::Resumed)
        );
        assert_eq!(
            events.recv_timeout(Duration::from_secs(5)),
            Ok(CoreEvent::BreakpointHit {
                pc: BASE + 8,
                temporary: false
            })
        );
        assert!(handle.state().expect("reply").is_stepping());
    }

    #[test]
    fn pause_interrupts_free_running_core() {
        let spin = Instruction::branch(BASE, BASE, false).hex();
        let core = spawn(&[spin], false);
        let events = core.events();
        assert_eq!(core.handle().pause().expect("reply"), BASE);
        assert_eq!(
            events.recv_timeout(Duration::from_secs(5)),
            Ok(CoreEvent::Paused { pc: BASE })
        );
    }

    #[test]
    fn completion_wait_outlasts_reply_timeout() {
        let mut cpu = Cpu::default();
        cpu.enable_stepping(true);
        let core = CoreThread::spawn(
            cpu,
            HostConfig {
                run_slice: 64,
                reply_timeout: Duration::from_millis(20),
            },
        )
        .expect("spawn");
        let result = core.handle().with_cpu_to_completion(|_| {
            std::thread::sleep(Duration::from_millis(200));
            7
        });
        assert_eq!(result.ok(), Some(7));
    }

    #[test]
    fn slow_request_times_out() {
        let mut cpu = Cpu::default();
        cpu.enable_stepping(true);
        let core = CoreThread::spawn(
            cpu,
            HostConfig {
                run_slice: 64,
                reply_timeout: Duration::from_millis(20),
            },
        )
        .expect("spawn");
        let result = core
            .handle()
            .with_cpu(|_| std::thread::sleep(Duration::from_millis(200)));
        assert!(matches!(result, Err(HostError::Timeout(_))));
    }
}
