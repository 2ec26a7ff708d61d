//! Ties the listening socket, client table, timer set, multiplexer, worker
//! pool and dispatcher into a single runnable server.

pub mod dispatcher;
pub mod handshake;
pub mod multiplexer;
pub mod relay;
pub mod table;
pub mod timer;
pub mod timerset;
pub mod workerpool;

use std::os::fd::AsRawFd;
use std::sync::Arc;

use mio::Events;
use tracing::warn;

use crate::config::Config;
use crate::error::StartupError;
use crate::listener::Listener;
use crate::shell::resolve_shell_program;

use dispatcher::DispatchContext;
use multiplexer::{Multiplexer, Rearmer};
use table::{ClientTable, TimerIndex};
use timerset::{TimerRegistry, TimerSet};
use workerpool::WorkerPool;

pub struct Server {
    listener: Listener,
    mux: Multiplexer,
    // Only the multiplexer thread ever drains this (in `run`); accept and
    // worker code register/deregister individual timers through the cloned
    // `timer_registry` handle instead, so no lock is needed here.
    timer_set: TimerSet,
    timer_registry: TimerRegistry,
    table: Arc<ClientTable>,
    timer_index: Arc<TimerIndex>,
    workers: WorkerPool,
    secret: Vec<u8>,
    shell_program: String,
    login: bool,
    handshake_timeout_secs: u64,
    max_events: usize,
}

impl Server {
    /// Bind the listener, create the multiplexer, timer set and worker pool,
    /// and validate the configured shell: everything needed to run, or a
    /// `StartupError` describing why not.
    pub fn new(config: &Config) -> Result<Self, StartupError> {
        let addr: std::net::SocketAddr = config
            .server
            .listen
            .parse()
            .map_err(|_| StartupError::Bind(nix::Error::EINVAL))?;
        let listener = Listener::bind(addr, config.server.backlog)?;

        let mux = Multiplexer::new().map_err(StartupError::EpollCreate)?;
        mux.register_readable(listener.as_raw_fd())
            .map_err(StartupError::EpollCreate)?;

        let timer_set = TimerSet::new().map_err(StartupError::EpollCreate)?;
        mux.register_readable(timer_set.as_raw_fd())
            .map_err(StartupError::EpollCreate)?;
        let timer_registry = timer_set.registry();

        let shell_program = resolve_shell_program(&config.shell.program);
        if !std::path::Path::new(&shell_program).is_file() {
            return Err(StartupError::ShellNotFound(shell_program));
        }

        let table = Arc::new(ClientTable::new());
        let timer_index = Arc::new(TimerIndex::new());
        let secret = handshake::wire_secret(&config.auth.secret);
        let login = config.shell.login;
        let handshake_timeout_secs = config.server.handshake_timeout_secs;

        let queue_capacity = if config.server.queue_capacity == 0 {
            2 * config.server.workers.max(1) * 64
        } else {
            config.server.queue_capacity
        };

        let worker_table = table.clone();
        let worker_timer_index = timer_index.clone();
        let worker_timer_registry = timer_registry.clone();
        let worker_secret = secret.clone();
        let worker_shell_program = shell_program.clone();
        let worker_rearmer = mux.rearmer();

        let workers = WorkerPool::new(config.server.workers, queue_capacity, move |fd| {
            let ctx = DispatchContext {
                table: &worker_table,
                timer_index: &worker_timer_index,
                timers: &worker_timer_registry,
                mux: &worker_rearmer,
                secret: &worker_secret,
                shell_program: &worker_shell_program,
                login,
                handshake_timeout_secs: handshake_timeout_secs as i64,
            };
            dispatcher::dispatch(fd, &ctx);
        });

        Ok(Server {
            listener,
            mux,
            timer_set,
            timer_registry,
            table,
            timer_index,
            workers,
            secret,
            shell_program,
            login,
            handshake_timeout_secs,
            max_events: config.server.max_events,
        })
    }

    /// Run the multiplexer loop. Never returns under normal operation; the
    /// only way out is a panic on a readiness-wait failure that isn't
    /// `EINTR`, matching the error taxonomy's "multiplexer aborts only on its
    /// own readiness-wait failures" policy.
    pub fn run(mut self) -> ! {
        let listener_fd = self.listener.as_raw_fd();
        let timer_set_fd = self.timer_set.as_raw_fd();
        let rearmer = self.mux.rearmer();
        let mut events = Events::with_capacity(self.max_events);

        loop {
            if let Err(e) = self.mux.wait(&mut events) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                panic!("multiplexer wait failed: {e}");
            }

            for event in events.iter() {
                let readiness = self.mux.take_readiness(event);
                let fd = readiness.fd;

                if fd == listener_fd {
                    let ctx = self.dispatch_context(&rearmer);
                    dispatcher::accept_one(&self.listener, &ctx);
                    if let Err(e) = rearmer.register_readable(listener_fd) {
                        warn!(error = %e, "failed to rearm listening socket");
                    }
                    continue;
                }

                if fd == timer_set_fd {
                    let expired = self.timer_set.drain_ready();
                    let ctx = self.dispatch_context(&rearmer);
                    for timer_fd in expired {
                        dispatcher::handle_timer_expiry(timer_fd, &ctx);
                    }
                    if let Err(e) = rearmer.register_readable(timer_set_fd) {
                        warn!(error = %e, "failed to rearm timer set");
                    }
                    continue;
                }

                if readiness.hup_or_error {
                    if let Some(record) = self.table.get(fd) {
                        let ctx = self.dispatch_context(&rearmer);
                        dispatcher::terminate(fd, &record, &ctx);
                    }
                    continue;
                }

                if !self.workers.try_enqueue(fd) {
                    warn!(fd, "worker queue full, rearming directly so the edge isn't lost");
                    if let Err(e) = rearmer.register_readable(fd) {
                        warn!(fd, error = %e, "failed to rearm after queue overflow");
                    }
                }
            }
        }
    }

    fn dispatch_context<'a>(&'a self, rearmer: &'a Rearmer) -> DispatchContext<'a> {
        DispatchContext {
            table: &self.table,
            timer_index: &self.timer_index,
            timers: &self.timer_registry,
            mux: rearmer,
            secret: &self.secret,
            shell_program: &self.shell_program,
            login: self.login,
            handshake_timeout_secs: self.handshake_timeout_secs as i64,
        }
    }
}
