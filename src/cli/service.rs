use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::config::Config;
use crate::guard::{self, ProtectedRoot};
use crate::paths::Paths;
use crate::supervisor::ProtectionService;

/// How often the foreground process checks that both channels are alive.
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// Run protection in the foreground until Ctrl+C, SIGTERM or `copyguard stop`.
/// Exits with an error if a channel dies underneath it.
pub async fn start() -> Result<()> {
    let config = Config::load()?;

    let pid_file = get_pid_file()?;
    if let Some(pid) = read_pid(&pid_file)? {
        if is_process_running(&pid) {
            anyhow::bail!("copyguard already running (PID: {})", pid);
        }
        fs::remove_file(&pid_file)?;
    }

    let root = ProtectedRoot::prepare(config.root_path())?;
    let notifier = guard::notifier_from_config(config.notifications.desktop);
    let service = ProtectionService::with_system_clipboard(
        root,
        notifier,
        &config.notifications.title,
        config.service_options(),
    );

    service
        .start()
        .context("Failed to start file protection")?;

    fs::write(&pid_file, std::process::id().to_string())
        .with_context(|| format!("Failed to write {}", pid_file.display()))?;

    println!("Protecting {}", service.root().path().display());
    println!("  PID file: {}", pid_file.display());
    println!("\nUse 'copyguard stop' or Ctrl+C to stop");

    let outcome = wait_for_shutdown(&service).await;
    if let Err(e) = &outcome {
        error!("{:#}", e);
    }

    println!("\nShutting down...");
    let dropped = service.overflow_count();
    service.stop();
    info!(dropped_events = dropped, "Shutdown complete");
    fs::remove_file(&pid_file).ok();

    outcome
}

async fn wait_for_shutdown(service: &ProtectionService) -> Result<()> {
    let mut health = tokio::time::interval(HEALTH_INTERVAL);
    health.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let lost = async {
        loop {
            health.tick().await;
            if !service.is_healthy() {
                break;
            }
        }
    };
    let lost_error =
        || anyhow::anyhow!("A protection channel stopped unexpectedly; the root is unprotected");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
            _ = lost => return Err(lost_error()),
        }
    }

    #[cfg(windows)]
    {
        use std::sync::Arc;

        let stop = Arc::new(stop_event::StopEvent::create(std::process::id())?);
        let waiter = stop.clone();
        let requested = tokio::task::spawn_blocking(move || waiter.wait());
        let result = tokio::select! {
            res = tokio::signal::ctrl_c() => res.map_err(anyhow::Error::from),
            _ = requested => Ok(()),
            _ = lost => Err(lost_error()),
        };
        // Release the blocking waiter so the runtime can shut down.
        stop.set();
        result?;
    }

    Ok(())
}

/// Signal a running instance to stop.
pub async fn stop() -> Result<()> {
    let pid_file = get_pid_file()?;

    let Some(pid) = read_pid(&pid_file)? else {
        println!("copyguard is not running");
        return Ok(());
    };

    if !is_process_running(&pid) {
        println!("copyguard is not running (stale PID file)");
        fs::remove_file(&pid_file)?;
        return Ok(());
    }

    println!("Stopping copyguard (PID: {})...", pid);

    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("kill").args(["-TERM", &pid]).status()?;
    }

    #[cfg(windows)]
    stop_event::signal(&pid)?;

    // Wait for the process to unregister and exit (up to 5 seconds)
    for _ in 0..50 {
        if !is_process_running(&pid) {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    if is_process_running(&pid) {
        anyhow::bail!("Failed to stop copyguard (PID: {})", pid);
    }

    println!("Stopped");
    fs::remove_file(&pid_file).ok();

    Ok(())
}

pub async fn status() -> Result<()> {
    let config = Config::load()?;
    let pid_file = get_pid_file()?;

    let pid = read_pid(&pid_file)?.filter(|pid| is_process_running(pid));

    println!("copyguard status");
    println!("----------------");
    println!("Running: {}", if pid.is_some() { "yes" } else { "no" });
    if let Some(pid) = pid {
        println!("PID: {}", pid);
    }

    println!("\nConfiguration:");
    println!("  Protected root: {}", config.root_path().display());
    println!(
        "  Require elevation: {}",
        config.protection.require_elevation
    );
    println!("  Currently elevated: {}", guard::privilege::is_elevated());
    println!("  Queue capacity: {}", config.watcher.queue_capacity);
    println!("  Desktop notifications: {}", config.notifications.desktop);

    Ok(())
}

fn get_pid_file() -> Result<PathBuf> {
    let paths = Paths::resolve()?;
    Ok(paths.pid_file())
}

fn read_pid(pid_file: &Path) -> Result<Option<String>> {
    if !pid_file.exists() {
        return Ok(None);
    }
    let pid = fs::read_to_string(pid_file)?.trim().to_string();
    Ok((!pid.is_empty()).then_some(pid))
}

fn is_process_running(pid: &str) -> bool {
    let pid = pid.trim();

    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", pid])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(pid))
            .unwrap_or(false)
    }
}

/// Named event a running instance waits on; `copyguard stop` sets it.
#[cfg(windows)]
mod stop_event {
    use std::ffi::OsStr;
    use std::io;
    use std::iter::once;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;

    use anyhow::{Context, Result};
    use winapi::shared::minwindef::{FALSE, TRUE};
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::synchapi::{CreateEventW, OpenEventW, SetEvent, WaitForSingleObject};
    use winapi::um::winbase::INFINITE;
    use winapi::um::winnt::{EVENT_MODIFY_STATE, HANDLE};

    fn name(pid: u32) -> Vec<u16> {
        OsStr::new(&format!("Local\\copyguard-stop-{}", pid))
            .encode_wide()
            .chain(once(0))
            .collect()
    }

    pub struct StopEvent(HANDLE);

    // SAFETY: event handles may be used from any thread.
    unsafe impl Send for StopEvent {}
    unsafe impl Sync for StopEvent {}

    impl StopEvent {
        pub fn create(pid: u32) -> Result<Self> {
            let name = name(pid);
            // SAFETY: name is a valid NUL-terminated wide string.
            let handle = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, name.as_ptr()) };
            if handle.is_null() {
                return Err(io::Error::last_os_error()).context("Failed to create stop event");
            }
            Ok(Self(handle))
        }

        /// Block until the event is set.
        pub fn wait(&self) {
            // SAFETY: self.0 is a live event handle.
            unsafe { WaitForSingleObject(self.0, INFINITE) };
        }

        pub fn set(&self) {
            // SAFETY: self.0 is a live event handle.
            unsafe { SetEvent(self.0) };
        }
    }

    impl Drop for StopEvent {
        fn drop(&mut self) {
            // SAFETY: closed exactly once.
            unsafe { CloseHandle(self.0) };
        }
    }

    /// Ask the instance with this PID to shut down.
    pub fn signal(pid: &str) -> Result<()> {
        let pid: u32 = pid.trim().parse().context("Invalid PID")?;
        let name = name(pid);
        // SAFETY: name is a valid NUL-terminated wide string; the handle is
        // closed before returning.
        unsafe {
            let handle = OpenEventW(EVENT_MODIFY_STATE, FALSE, name.as_ptr());
            if handle.is_null() {
                return Err(io::Error::last_os_error())
                    .with_context(|| format!("copyguard (PID {}) has no stop event", pid));
            }
            let set = SetEvent(handle);
            CloseHandle(handle);
            if set == 0 {
                return Err(io::Error::last_os_error()).context("Failed to signal stop event");
            }
        }
        Ok(())
    }
}
