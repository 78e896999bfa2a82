//! The multiplexer (§4.8): the top-level single-threaded event loop that
//! owns every object's lifetime, computes interest sets, dispatches
//! readiness events, fires timers, and honors shutdown/reconfig signals.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::client::{ClientState, PendingClient, SessionMode};
use crate::config::{ConsoleConfig, EndpointConfig, ServerConfig};
use crate::error::{ConsoledError, Result};
use crate::escape::Command as EscapeCommand;
use crate::handoff::AttachQueue;
use crate::listener::Listener;
use crate::logfile::{self, LogfileState};
use crate::object::{
    detach_reader, exceeded_overflow_budget, write_obj_data, Object, ObjectId, ObjectKind,
    ObjectTable, Outcome, DEFAULT_OVERFLOW_LIMIT,
};
use crate::poll::{Interest, Poller, Revents};
use crate::reset;
use crate::serial::{self, SerialState};
use crate::signals;
use crate::telnet::{self, ConnState, TelnetState};
use crate::timer::TimerWheel;

/// Every poll iteration blocks for at most this long, so timer deadlines
/// are visible even without fd activity (§4.8 step 5).
const POLL_CEILING: Duration = Duration::from_secs(1);

/// Scratch read size for a single non-blocking read of an object's fd.
const READ_CHUNK: usize = 4096;

/// Payloads carried by the timer wheel (§4.1, §9 "callback-with-
/// heap-argument"). Rust has no need for the original's `malloc`'d
/// `pid_t *arg` — an enum variant is the owned argument.
enum TimerEvent {
    TelnetReconnect(ObjectId),
    SerialReconnect(ObjectId),
    LogTimestamp,
    ResetWatchdog { console_name: String, pid: libc::pid_t, timeout_secs: u64 },
}

pub struct Multiplexer {
    objects: ObjectTable,
    poller: Poller,
    timers: TimerWheel<TimerEvent>,
    listener: Listener,
    attach_queue: AttachQueue,
    config: ServerConfig,
    /// Hands a freshly-accepted fd off to the external session worker
    /// (§1, §4.10): greeting/authorization/protocol framing live outside
    /// the core, so the loop only ever passes the raw fd and its own
    /// attach-queue handle onward.
    accept_hook: Box<dyn FnMut(RawFd, &AttachQueue)>,
}

impl Multiplexer {
    /// Builds every startup object from `config`: consoles, their
    /// logfiles, the listener, and (if configured) the first timestamp
    /// timer. Attempts each console's initial connect inline, the same
    /// as a reconnect attempt would, so a console that is unreachable at
    /// startup simply begins in backoff rather than failing the daemon.
    pub fn new(config: ServerConfig, accept_hook: impl FnMut(RawFd, &AttachQueue) + 'static) -> Result<Multiplexer> {
        config.validate()?;

        let listener = Listener::bind(config.listen_port, config.loopback_only)?;
        let poller = Poller::new().map_err(ConsoledError::Poller)?;
        raise_nofile_limit(config.consoles.len());

        let mut objects = ObjectTable::new();
        for console in &config.consoles {
            let console_id = spawn_console(&mut objects, console);
            if let Some(path) = &console.logfile {
                match logfile::open_logfile(path, config.zero_logs_on_start) {
                    Ok(fd) => {
                        let logfile_obj = Object::new(
                            format!("{}.log", console.name),
                            fd,
                            ObjectKind::Logfile(LogfileState::new(console_id, path.clone())),
                        );
                        let logfile_id = objects.insert(logfile_obj);
                        objects.get_mut(console_id).unwrap().readers.push(logfile_id);
                    }
                    Err(e) => error!("unable to open logfile \"{path}\" for [{}]: {e}", console.name),
                }
            }
        }

        let mut timers = TimerWheel::new();
        if config.timestamp_interval_minutes > 0 {
            schedule_first_timestamp(&mut timers, config.timestamp_interval_minutes);
        }

        info!("Starting console daemon on port {}", config.listen_port);

        Ok(Multiplexer {
            objects,
            poller,
            timers,
            listener,
            attach_queue: AttachQueue::new(),
            config,
            accept_hook: Box::new(accept_hook),
        })
    }

    /// A clone of the attach-queue handle, given to session-worker
    /// threads so they can hand off fully-greeted clients (§4.7, §5).
    pub fn attach_queue(&self) -> AttachQueue {
        self.attach_queue.clone()
    }

    /// Runs until `SIGINT`/`SIGTERM` sets the shutdown flag.
    pub fn run(&mut self) {
        while !signals::is_done() {
            self.run_once();
        }
        info!("Exiting on signal={}", signals::done_signum());
    }

    /// One iteration of the 8-step algorithm (§4.8). Exposed publicly so
    /// tests (and embedders driving their own top-level loop) can step
    /// the multiplexer deterministically instead of only through `run`.
    pub fn run_once(&mut self) {
        // Step 1.
        if signals::is_reconfig_requested() {
            self.reopen_logfiles();
            signals::clear_reconfig();
        }
        if signals::take_child_exited() {
            reset::reap_children();
        }

        // Step 2.
        for pending in self.attach_queue.drain() {
            self.attach_client(pending);
        }

        // Step 3.
        self.arm_interest();

        // Step 4.
        self.dispatch_reset_requests();

        // Step 5.
        let timeout = self.timers.next_deadline().map(|d| {
            d.saturating_duration_since(Instant::now()).min(POLL_CEILING)
        }).unwrap_or(POLL_CEILING);

        match self.poller.poll(Some(timeout)) {
            Ok(_) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => return,
            Err(e) => {
                error!("poll failed: {e}");
                return;
            }
        }

        // Step 6.
        let fired = self.timers.take_expired(Instant::now());
        for event in fired {
            self.handle_timer(event);
        }

        // Step 7.
        if self.poller.is_set(self.listener.fd, Revents::READ) {
            self.accept_new_clients();
        }

        // Step 8.
        for id in self.objects.ids() {
            self.service_object(id);
        }
    }

    fn arm_interest(&mut self) {
        self.poller.clear_all_fds();
        self.poller.set_interest(self.listener.fd, Interest::READ);

        for id in self.objects.ids() {
            let Some(obj) = self.objects.get(id) else { continue };
            if !obj.is_live() {
                continue;
            }

            let mut interest = Interest::EMPTY;
            match &obj.kind {
                ObjectKind::Telnet(t) if t.state == ConnState::Pending => {
                    interest |= Interest::READ | Interest::WRITE;
                }
                ObjectKind::Telnet(t) if t.state == ConnState::Up => interest |= Interest::READ,
                ObjectKind::Telnet(_) => {}
                ObjectKind::Serial(_) => interest |= Interest::READ,
                ObjectKind::Client(_) => interest |= Interest::READ,
                ObjectKind::Logfile(_) => {}
            }

            let suspended = matches!(&obj.kind, ObjectKind::Client(c) if c.suspended);
            if !suspended && (!obj.buf.is_empty() || obj.eof) {
                interest |= Interest::WRITE;
            }

            if interest.0 != Interest::EMPTY.0 {
                self.poller.set_interest(obj.fd, interest);
            }
        }
    }

    fn dispatch_reset_requests(&mut self) {
        let ids = self.objects.ids();
        for id in ids {
            let Some(obj) = self.objects.get_mut(id) else { continue };
            if !obj.reset_requested {
                continue;
            }
            obj.reset_requested = false;
            let Some(reset_cmd) = &self.config.reset_cmd else {
                warn!("reset requested for [{}] but no resetCmd is configured", obj.name);
                continue;
            };
            let console_name = obj.name.clone();
            let cmd = reset::expand_template(reset_cmd, &console_name);
            match reset::spawn_reset_command(&cmd) {
                Ok(pid) => {
                    info!("spawned reset command for [{console_name}] as pid={pid}");
                    let timeout_secs = self.config.reset_timeout_secs;
                    self.timers.schedule_relative(
                        Duration::from_secs(timeout_secs),
                        TimerEvent::ResetWatchdog { console_name, pid, timeout_secs },
                    );
                }
                Err(e) => error!("unable to spawn reset command for [{console_name}]: {e}"),
            }
        }
    }

    fn accept_new_clients(&mut self) {
        let keep_alive = self.config.keep_alive;
        let mut accepted = Vec::new();
        self.listener.accept_all(keep_alive, |fd| accepted.push(fd));
        for fd in accepted {
            trace!("handed off accepted fd={fd} to the session worker");
            (self.accept_hook)(fd, &self.attach_queue);
        }
    }

    fn attach_client(&mut self, pending: PendingClient) {
        let console_ids: Vec<ObjectId> = pending
            .console_names
            .iter()
            .filter_map(|name| self.find_console_by_name(name))
            .collect();

        if console_ids.len() != pending.console_names.len() {
            warn!("client [{}] named an unknown console; attaching to what resolved", pending.name);
        }

        let mut state = ClientState::new(pending.mode, pending.write_privileged);
        state.consoles = console_ids.clone();

        let client_obj = Object::new(pending.name.clone(), pending.fd, ObjectKind::Client(state));
        let client_id = self.objects.insert(client_obj);

        let can_write = self.objects.get(client_id).map(|o| {
            matches!(&o.kind, ObjectKind::Client(c) if c.can_write())
        }).unwrap_or(false);

        for console_id in console_ids {
            if let Some(console) = self.objects.get_mut(console_id) {
                console.readers.push(client_id);
            }
            if can_write {
                if let Some(console) = self.objects.get_mut(console_id) {
                    console.writers.push(client_id);
                }
                if let Some(client) = self.objects.get_mut(client_id) {
                    client.writers.push(console_id);
                }
            }
        }

        info!("attached client [{}] (fd={})", pending.name, pending.fd);
    }

    fn find_console_by_name(&self, name: &str) -> Option<ObjectId> {
        self.objects.ids().into_iter().find(|&id| {
            self.objects.get(id).map(|o| o.name == name && o.kind.is_console()).unwrap_or(false)
        })
    }

    fn reopen_logfiles(&mut self) {
        info!("reconfig: reopening logfiles");
        for id in self.objects.ids() {
            let Some(obj) = self.objects.get_mut(id) else { continue };
            let ObjectKind::Logfile(state) = &obj.kind else { continue };
            let path = state.path.clone();
            if obj.fd >= 0 {
                unsafe { libc::close(obj.fd) };
            }
            match logfile::open_logfile(&path, false) {
                Ok(fd) => {
                    obj.fd = fd;
                    debug!("reopened logfile \"{path}\"");
                }
                Err(e) => {
                    error!("unable to reopen logfile \"{path}\": {e}");
                    obj.fd = -1;
                }
            }
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::TelnetReconnect(id) => self.retry_telnet(id),
            TimerEvent::SerialReconnect(id) => self.retry_serial(id),
            TimerEvent::LogTimestamp => self.fire_timestamp(),
            TimerEvent::ResetWatchdog { console_name, pid, timeout_secs } => {
                trace!("reset watchdog for [{console_name}] firing at pid={pid}");
                reset::kill_reset_if_alive(pid, timeout_secs);
            }
        }
    }

    fn retry_telnet(&mut self, id: ObjectId) {
        let Some(obj) = self.objects.get_mut(id) else { return };
        let ObjectKind::Telnet(state) = &mut obj.kind else { return };
        if state.state != ConnState::Down {
            return;
        }
        match state.connect() {
            Ok(fd) => obj.fd = fd,
            Err(e) => {
                warn!("telnet [{}:{}] reconnect failed: {e}", state.host, state.port);
                let delay = state.fail(Instant::now());
                self.timers.schedule_relative(delay, TimerEvent::TelnetReconnect(id));
            }
        }
    }

    fn retry_serial(&mut self, id: ObjectId) {
        let Some(obj) = self.objects.get_mut(id) else { return };
        let ObjectKind::Serial(state) = &mut obj.kind else { return };
        match serial::open_serial(&state.config) {
            Ok(fd) => {
                obj.fd = fd;
                state.recover();
                info!("serial device {} reconnected", state.config.device);
            }
            Err(e) => {
                warn!("serial device {} reconnect failed: {e}", state.config.device);
                let delay = state.fail(Instant::now());
                self.timers.schedule_relative(delay, TimerEvent::SerialReconnect(id));
            }
        }
    }

    fn fire_timestamp(&mut self) {
        let timestamp = logfile::local_time_string();

        for id in self.objects.ids() {
            let console_name = match self.objects.get(id) {
                Some(obj) => match &obj.kind {
                    ObjectKind::Logfile(state) => {
                        self.objects.get(state.console).map(|c| c.name.clone())
                    }
                    _ => None,
                },
                None => None,
            };
            let Some(console_name) = console_name else { continue };
            let line = logfile::format_timestamp_line(&console_name, &timestamp);
            write_obj_data(&mut self.objects, id, &line, true);
        }

        self.timers.schedule_relative(
            Duration::from_secs(u64::from(self.config.timestamp_interval_minutes) * 60),
            TimerEvent::LogTimestamp,
        );
    }

    /// Step 8 for a single object: advance a pending telnet connect, or
    /// service read-then-write, removing the object on either returning
    /// `Outcome::Remove`.
    fn service_object(&mut self, id: ObjectId) {
        let Some(obj) = self.objects.get(id) else { return };
        if !obj.is_live() {
            return;
        }
        let fd = obj.fd;
        let revents = self.poller.revents(fd);
        if revents.0 == Revents::EMPTY.0 {
            return;
        }

        let is_pending_telnet = matches!(&obj.kind, ObjectKind::Telnet(t) if t.state == ConnState::Pending);
        if is_pending_telnet {
            self.advance_telnet_pending(id, fd);
            return;
        }

        let readable = !obj.eof && self.poller.is_set(fd, Revents::READ | Revents::HUP | Revents::ERR);
        if readable {
            if self.service_read(id) == Outcome::Remove {
                self.remove_object(id);
                return;
            }
        }

        if self.objects.get(id).map_or(true, |o| !o.is_live()) {
            // `service_read` may have hit EOF/read-error and closed fd
            // (obj.fd = -1) while keeping the object for reconnect
            // (server.c:589); writing to a dead fd would EBADF and
            // double the reconnect backoff.
            return;
        }
        if self.poller.is_set(fd, Revents::WRITE) {
            if self.service_write(id) == Outcome::Remove {
                self.remove_object(id);
            }
        }
    }

    fn advance_telnet_pending(&mut self, id: ObjectId, fd: RawFd) {
        let Some(obj) = self.objects.get_mut(id) else { return };
        let ObjectKind::Telnet(state) = &mut obj.kind else { return };
        match state.advance_pending(fd) {
            Ok(negotiation) => {
                write_obj_data(&mut self.objects, id, &negotiation, true);
            }
            Err(e) => {
                warn!("telnet [{}:{}] connect failed: {e}", state.host, state.port);
                telnet::close_fd(fd);
                obj.fd = -1;
                let delay = state.fail(Instant::now());
                self.timers.schedule_relative(delay, TimerEvent::TelnetReconnect(id));
            }
        }
    }

    /// `read_from_obj` (§4.3): reads, decodes per variant, fans the
    /// decoded bytes out to readers. Returns `Remove` exactly where the
    /// original returns −1: EOF with nothing left reconnectable, or a
    /// fatal client error.
    fn service_read(&mut self, id: ObjectId) -> Outcome {
        let fd = match self.objects.get(id) {
            Some(o) => o.fd,
            None => return Outcome::Remove,
        };

        let mut scratch = [0u8; READ_CHUNK];
        let n = unsafe { libc::read(fd, scratch.as_mut_ptr() as *mut libc::c_void, READ_CHUNK) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.raw_os_error(), Some(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK) {
                return Outcome::Keep;
            }
            return self.handle_endpoint_failure(id, fd, &format!("read error: {err}"));
        }
        if n == 0 {
            return self.handle_endpoint_failure(id, fd, "EOF");
        }

        let data = &scratch[..n as usize];
        let kind_is_client = matches!(self.objects.get(id).map(|o| &o.kind), Some(ObjectKind::Client(_)));

        if kind_is_client {
            self.service_client_read(id, data)
        } else {
            self.service_console_read(id, fd, data)
        }
    }

    fn service_console_read(&mut self, id: ObjectId, fd: RawFd, data: &[u8]) -> Outcome {
        let is_up_telnet = matches!(self.objects.get(id).map(|o| &o.kind), Some(ObjectKind::Telnet(t)) if t.is_up());

        let passthrough = if is_up_telnet {
            let Some(obj) = self.objects.get_mut(id) else { return Outcome::Remove };
            let ObjectKind::Telnet(state) = &mut obj.kind else { unreachable!() };
            let (passthrough, reply) = state.decode(data);
            if !reply.is_empty() {
                write_obj_data(&mut self.objects, id, &reply, true);
            }
            passthrough
        } else {
            data.to_vec()
        };

        self.fan_out(id, &passthrough, false);
        let _ = fd;
        Outcome::Keep
    }

    fn service_client_read(&mut self, id: ObjectId, data: &[u8]) -> Outcome {
        let (passthrough, commands) = {
            let Some(obj) = self.objects.get_mut(id) else { return Outcome::Remove };
            let ObjectKind::Client(state) = &mut obj.kind else { unreachable!() };
            state.escape.decode(data)
        };

        for cmd in commands {
            match cmd {
                EscapeCommand::Detach => {
                    info!("client [{}] detached", self.objects.get(id).map(|o| o.name.clone()).unwrap_or_default());
                    return Outcome::Remove;
                }
                EscapeCommand::Suspend => self.set_client_suspended(id, true),
                EscapeCommand::Resume => self.set_client_suspended(id, false),
                EscapeCommand::ToggleBroadcast => self.toggle_broadcast(id),
                EscapeCommand::RequestReset => self.request_reset_for_client(id),
            }
        }

        let can_write = self.objects.get(id).map(|o| {
            matches!(&o.kind, ObjectKind::Client(c) if c.can_write())
        }).unwrap_or(false);

        if can_write && !passthrough.is_empty() {
            let consoles = match self.objects.get(id).map(|o| &o.kind) {
                Some(ObjectKind::Client(c)) => c.consoles.clone(),
                _ => Vec::new(),
            };
            for console_id in consoles {
                write_obj_data(&mut self.objects, console_id, &passthrough, false);
            }
        }

        Outcome::Keep
    }

    fn set_client_suspended(&mut self, id: ObjectId, suspended: bool) {
        if let Some(obj) = self.objects.get_mut(id) {
            if let ObjectKind::Client(state) = &mut obj.kind {
                state.suspended = suspended;
            }
        }
    }

    fn toggle_broadcast(&mut self, id: ObjectId) {
        if let Some(obj) = self.objects.get_mut(id) {
            if let ObjectKind::Client(state) = &mut obj.kind {
                state.mode = match state.mode {
                    SessionMode::Broadcast => SessionMode::Interactive,
                    _ => SessionMode::Broadcast,
                };
            }
        }
    }

    fn request_reset_for_client(&mut self, id: ObjectId) {
        let consoles = match self.objects.get(id).map(|o| &o.kind) {
            Some(ObjectKind::Client(c)) => c.consoles.clone(),
            _ => Vec::new(),
        };
        for console_id in consoles {
            if let Some(console) = self.objects.get_mut(console_id) {
                console.reset_requested = true;
            }
        }
    }

    /// Forwards `bytes` read from `src` to every one of its readers via
    /// `write_obj_data`, detaching any reader that has exceeded its
    /// overflow budget (§4.3).
    fn fan_out(&mut self, src: ObjectId, bytes: &[u8], is_telnet_literal: bool) {
        if bytes.is_empty() {
            return;
        }
        let readers = match self.objects.get(src) {
            Some(obj) => obj.readers.clone(),
            None => return,
        };
        for reader in readers {
            write_obj_data(&mut self.objects, reader, bytes, is_telnet_literal);
            if exceeded_overflow_budget(&self.objects, reader, DEFAULT_OVERFLOW_LIMIT) {
                detach_reader(&mut self.objects, reader);
            }
        }
    }

    fn handle_endpoint_failure(&mut self, id: ObjectId, fd: RawFd, reason: &str) -> Outcome {
        let kind_tag = match self.objects.get(id).map(|o| &o.kind) {
            Some(ObjectKind::Telnet(_)) => 1,
            Some(ObjectKind::Serial(_)) => 2,
            Some(ObjectKind::Client(_)) => 3,
            _ => 0,
        };

        match kind_tag {
            1 => {
                let Some(obj) = self.objects.get_mut(id) else { return Outcome::Remove };
                let ObjectKind::Telnet(state) = &mut obj.kind else { unreachable!() };
                warn!("telnet [{}:{}] {reason}", state.host, state.port);
                telnet::close_fd(fd);
                obj.fd = -1;
                let delay = state.fail(Instant::now());
                self.timers.schedule_relative(delay, TimerEvent::TelnetReconnect(id));
                Outcome::Keep
            }
            2 => {
                let Some(obj) = self.objects.get_mut(id) else { return Outcome::Remove };
                let ObjectKind::Serial(state) = &mut obj.kind else { unreachable!() };
                warn!("serial device {} {reason}", state.config.device);
                unsafe { libc::close(fd) };
                obj.fd = -1;
                let delay = state.fail(Instant::now());
                self.timers.schedule_relative(delay, TimerEvent::SerialReconnect(id));
                Outcome::Keep
            }
            3 => {
                // Non-reconnectable (§3 "endpoint-dead"): mark EOF-seen
                // and keep the object just long enough to flush any
                // buffered output already queued for this client; the fd
                // closes once `service_write` drains it to empty.
                if let Some(obj) = self.objects.get_mut(id) {
                    debug!("client [{}] {reason}; flushing before close", obj.name);
                    obj.eof = true;
                }
                Outcome::Keep
            }
            _ => Outcome::Remove,
        }
    }

    /// `write_to_obj` (§4.3): drains the ring to the fd with a single
    /// non-blocking write. A logfile whose write fails is downgraded —
    /// only that reader is detached (§7); console/client failures share
    /// the same reconnect/remove handling as a read failure.
    fn service_write(&mut self, id: ObjectId) -> Outcome {
        let Some(obj) = self.objects.get(id) else { return Outcome::Remove };
        let fd = obj.fd;
        let pending = obj.buf.peek(obj.buf.len());
        if pending.is_empty() {
            if obj.eof {
                return Outcome::Remove;
            }
            return Outcome::Keep;
        }

        let n = unsafe { libc::write(fd, pending.as_ptr() as *const libc::c_void, pending.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.raw_os_error(), Some(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK) {
                return Outcome::Keep;
            }
            return self.handle_write_failure(id, fd, &err.to_string());
        }

        if let Some(obj) = self.objects.get_mut(id) {
            obj.buf.consume(n as usize);
        }
        Outcome::Keep
    }

    fn handle_write_failure(&mut self, id: ObjectId, fd: RawFd, reason: &str) -> Outcome {
        let is_logfile = matches!(self.objects.get(id).map(|o| &o.kind), Some(ObjectKind::Logfile(_)));
        if is_logfile {
            let name = self.objects.get(id).map(|o| o.name.clone()).unwrap_or_default();
            error!("logfile write failed for [{name}]: {reason}; detaching this sink");
            Outcome::Remove
        } else {
            self.handle_endpoint_failure(id, fd, &format!("write error: {reason}"))
        }
    }

    fn remove_object(&mut self, id: ObjectId) {
        if let Some(obj) = self.objects.remove(id) {
            debug!("removed object [{}]", obj.name);
            if obj.fd >= 0 {
                unsafe { libc::close(obj.fd) };
            }
        }
    }
}

fn spawn_console(objects: &mut ObjectTable, console: &ConsoleConfig) -> ObjectId {
    match &console.endpoint {
        EndpointConfig::Serial(cfg) => {
            let mut state = SerialState::new(cfg.clone());
            let fd = match serial::open_serial(cfg) {
                Ok(fd) => fd,
                Err(e) => {
                    warn!("serial device {} unavailable at startup: {e}", cfg.device);
                    state.fail(Instant::now());
                    -1
                }
            };
            objects.insert(Object::new(console.name.clone(), fd, ObjectKind::Serial(state)))
        }
        EndpointConfig::Telnet { host, port } => {
            let mut state = TelnetState::new(host.clone(), *port, false);
            let fd = match state.connect() {
                Ok(fd) => fd,
                Err(e) => {
                    warn!("telnet [{host}:{port}] unavailable at startup: {e}");
                    state.fail(Instant::now());
                    -1
                }
            };
            objects.insert(Object::new(console.name.clone(), fd, ObjectKind::Telnet(state)))
        }
    }
}

fn schedule_first_timestamp(timers: &mut TimerWheel<TimerEvent>, interval_minutes: u32) {
    let (hour, minute) = logfile::local_hour_minute();
    let deadline_minutes = logfile::first_deadline_minutes(hour, minute, interval_minutes);
    let elapsed_minutes = (hour as u32) * 60 + (minute as u32);
    let delay_minutes = deadline_minutes.saturating_sub(elapsed_minutes);
    timers.schedule_relative(Duration::from_secs(u64::from(delay_minutes) * 60), TimerEvent::LogTimestamp);
}

/// Raises the soft `NOFILE` limit to at least twice `console_count` or
/// the current hard limit, whichever is larger (§5 "Resource caps").
fn raise_nofile_limit(console_count: usize) {
    let mut lim: libc::rlimit = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
        warn!("unable to read NOFILE limit: {}", io::Error::last_os_error());
        return;
    }

    let wanted = (console_count as u64 * 2).max(lim.rlim_cur);
    let target = wanted.min(lim.rlim_max);
    if target <= lim.rlim_cur {
        return;
    }

    lim.rlim_cur = target;
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
        warn!("unable to raise NOFILE limit to {target}: {}", io::Error::last_os_error());
    } else {
        debug!("raised NOFILE soft limit to {target}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_telnet;

    #[test]
    fn new_rejects_config_with_no_consoles() {
        let config = ServerConfig { listen_port: 0, ..ServerConfig::default() };
        assert!(Multiplexer::new(config, |_fd, _queue| {}).is_err());
    }

    #[test]
    fn new_binds_listener_for_valid_config() {
        let mut config = ServerConfig::default();
        config.listen_port = 0; // let the OS pick a free port
        config.consoles.push(default_telnet("alpha", "127.0.0.1", 1));
        let mux = Multiplexer::new(config, |_fd, _queue| {});
        assert!(mux.is_ok());
    }
}
