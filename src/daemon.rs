//! Startup validation, signal handling, and the read-dispatch-write loop
//! that keeps the pipe and the journal file in lock-step (§4.7).

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::dispatcher;
use crate::engine::Engine;
use crate::error::ConfigError;
use crate::facts::{RealHostFacts, RealPackageInfo};

const HANDLED_SIGNALS: &[Signal] = &[
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGALRM,
    Signal::SIGBUS,
    Signal::SIGPIPE,
];

/// The one document the daemon ever holds, visible to the signal handler.
/// Never accessed except through [`save_and_exit`] and the dispatch step of
/// [`run`]'s main loop (§5: no shared state crosses the signal boundary
/// except the document and the journal path).
static ENGINE_SLOT: OnceLock<Mutex<Option<Engine>>> = OnceLock::new();

struct DaemonEnv {
    pipe_path: PathBuf,
    test_pid: i32,
}

fn read_env() -> Result<(DaemonEnv, PathBuf, PathBuf), ConfigError> {
    let journal = require_env("BEAKERLIB_JOURNAL")?;
    let pipe = require_env("BEAKERLIB_PIPE")?;
    let test_pid_raw = require_env("BEAKERLIB_TESTPID")?;
    let beakerlib_dir = std::env::var("BEAKERLIB").unwrap_or_default();

    let test_pid: i32 = test_pid_raw
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            name: "BEAKERLIB_TESTPID",
            value: test_pid_raw,
        })?;

    let pipe_path = PathBuf::from(&pipe);
    if !pipe_path.exists() {
        return Err(ConfigError::PipeMissing { path: pipe });
    }

    Ok((
        DaemonEnv {
            pipe_path,
            test_pid,
        },
        PathBuf::from(journal),
        PathBuf::from(beakerlib_dir),
    ))
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name))
}

/// Validate the environment, install signal handlers, and loop forever
/// servicing the pipe. Only startup failures return; everything past that
/// point terminates the process directly via [`save_and_exit`].
pub fn run() -> Result<(), ConfigError> {
    let (env, journal_path, beakerlib_dir) = read_env()?;

    let engine = Engine::new(
        journal_path,
        beakerlib_dir,
        Box::new(RealHostFacts),
        Box::new(RealPackageInfo),
    );
    ENGINE_SLOT
        .set(Mutex::new(Some(engine)))
        .unwrap_or_else(|_| unreachable!("run() is only ever called once"));

    install_signal_handlers();
    tracing::info!(pipe = %env.pipe_path.display(), "daemon ready");

    loop {
        if !parent_alive(env.test_pid) {
            tracing::info!(pid = env.test_pid, "parent process gone, shutting down");
            save_and_exit();
        }

        let request = match read_request(&env.pipe_path) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed reading command pipe");
                continue;
            }
        };

        let reply = dispatch_locked(request.trim_end_matches('\n'));

        if let Err(e) = write_reply(&env.pipe_path, &reply) {
            tracing::warn!(error = %e, "failed writing reply pipe");
        }
    }
}

fn dispatch_locked(line: &str) -> String {
    let mut guard = ENGINE_SLOT
        .get()
        .expect("engine slot initialised by run()")
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let engine = guard.as_mut().expect("engine present after startup");
    dispatcher::dispatch(line, engine)
}

fn parent_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

fn read_request(pipe_path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(pipe_path)?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

fn write_reply(pipe_path: &Path, reply: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().write(true).open(pipe_path)?;
    file.write_all(reply.as_bytes())
}

fn install_signal_handlers() {
    let action = SigAction::new(
        SigHandler::Handler(on_fatal_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for &sig in HANDLED_SIGNALS {
        // SAFETY: the handler touches only the process-wide engine slot and
        // calls `std::process::exit`, matching the original's direct,
        // non-reentrant signal-delivery model (§4.7, §9).
        unsafe {
            if let Err(e) = signal::sigaction(sig, &action) {
                tracing::warn!(signal = ?sig, error = %e, "failed to install signal handler");
            }
        }
    }
}

extern "C" fn on_fatal_signal(_signum: i32) {
    save_and_exit();
}

/// §4.7 `saveAndExit`: persist the in-memory document if present, then exit
/// 0 on success, 1 otherwise. Called both from the main loop (parent gone)
/// and from [`on_fatal_signal`].
fn save_and_exit() -> ! {
    let code = match ENGINE_SLOT.get().and_then(|slot| slot.lock().ok()) {
        Some(guard) => match guard.as_ref() {
            Some(engine) => match engine.save_now() {
                Ok(()) => 0,
                Err(_) => 1,
            },
            None => 0,
        },
        None => 0,
    };
    std::process::exit(code);
}
