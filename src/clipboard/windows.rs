//! Clipboard viewer chain membership.
//!
//! A dedicated thread owns a hidden tool window that joins the viewer chain
//! with `SetClipboardViewer` and pumps messages until released.
//!
//! `WM_CLOSE` is ignored: `taskkill` and session tooling send it to every
//! top-level window of a process, and closing the viewer would silently
//! end clipboard monitoring. The window is only destroyed on
//! [`WM_RELEASE_VIEWER`], posted by [`Registration::release`].
//!
//! The chain is a system-wide singly linked list in which every viewer
//! remembers only its successor. Our obligations as a link:
//!
//! - forward every `WM_DRAWCLIPBOARD` to the successor,
//! - on `WM_CHANGECBCHAIN`, adopt the new successor if ours is leaving,
//!   otherwise pass the message on,
//! - leave with `ChangeClipboardChain(self, successor)` before the window
//!   dies.
//!
//! Skipping the last step cuts every viewer after us off from clipboard
//! notifications, so unlinking happens in `WM_DESTROY` and again, if still
//! needed, in the [`ViewerWindow`] guard when the pump thread unwinds.
//!
//! `SendMessageW` to another process's viewer lets incoming sent messages
//! be dispatched on this thread before it returns, so the window procedure
//! is re-entrant. Shared state is kept in `Cell`s and only ever borrowed
//! immutably.

use std::cell::Cell;
use std::ffi::OsStr;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::ptr;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use clipboard_win::raw::is_format_avail;
use clipboard_win::{Clipboard, empty, formats, get_clipboard};
use tracing::{debug, error, info, warn};
use winapi::shared::minwindef::{HINSTANCE, LPARAM, LRESULT, UINT, WPARAM};
use winapi::shared::windef::HWND;
use winapi::shared::winerror::ERROR_CLASS_ALREADY_EXISTS;
use winapi::um::errhandlingapi::{GetLastError, SetLastError};
use winapi::um::libloaderapi::GetModuleHandleW;
use winapi::um::winuser::{
    CF_HDROP, ChangeClipboardChain, CreateWindowExW, DefWindowProcW, DestroyWindow,
    DispatchMessageW, GWLP_USERDATA, GetMessageW, GetWindowLongPtrW, IsWindow, MSG,
    PostMessageW, PostQuitMessage, RegisterClassExW, SendMessageW, SetClipboardViewer,
    SetWindowLongPtrW, TranslateMessage, UnregisterClassW, WM_APP, WM_CHANGECBCHAIN,
    WM_CLOSE, WM_DESTROY, WM_DRAWCLIPBOARD, WNDCLASSEXW, WS_EX_TOOLWINDOW, WS_POPUP,
};

use super::{ClipboardAccess, ClipboardChannel, ClipboardSource, Registration, forward_snapshot};
use crate::error::{ClipboardError, GuardError};
use crate::events::{ClipboardSnapshot, EventSink};

const CLASS_NAME: &str = "CopyguardClipboardViewer";
const OPEN_ATTEMPTS: usize = 10;

/// Private message that tears the viewer down.
pub const WM_RELEASE_VIEWER: UINT = WM_APP + 1;

/// The Windows clipboard, observed through the viewer chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl ClipboardAccess for SystemClipboard {
    fn read_snapshot(&self) -> Result<Option<ClipboardSnapshot>, ClipboardError> {
        if !is_format_avail(CF_HDROP) {
            return Ok(None);
        }
        let files: Vec<String> =
            get_clipboard(formats::FileList).map_err(|e| ClipboardError::Read(e.to_string()))?;
        Ok(Some(ClipboardSnapshot::new(
            files.into_iter().map(PathBuf::from).collect(),
        )))
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        let _open = Clipboard::new_attempts(OPEN_ATTEMPTS)
            .map_err(|e| ClipboardError::Clear(e.to_string()))?;
        empty().map_err(|e| ClipboardError::Clear(e.to_string()))
    }
}

impl ClipboardSource for SystemClipboard {
    fn open_channel(&self, sink: EventSink) -> Result<ClipboardChannel, GuardError> {
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("copyguard-clipboard".into())
            .spawn(move || run_viewer(sink, ready_tx))
            .map_err(|source| GuardError::Thread {
                name: "clipboard",
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(hwnd)) => {
                info!("Joined clipboard viewer chain");
                Ok(ClipboardChannel::new(ViewerRegistration {
                    hwnd,
                    thread: Some(thread),
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(GuardError::ClipboardRegistration(
                    "viewer thread exited before registering".into(),
                ))
            }
        }
    }
}

/// Handle held by the supervisor; releasing it ends the pump.
struct ViewerRegistration {
    hwnd: isize,
    thread: Option<JoinHandle<()>>,
}

impl Registration for ViewerRegistration {
    fn release(mut self: Box<Self>) {
        // SAFETY: posting to a window that may already be gone is harmless.
        let posted = unsafe { PostMessageW(self.hwnd as HWND, WM_RELEASE_VIEWER, 0, 0) };
        if posted == 0 {
            debug!("Viewer window already closed");
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Clipboard viewer thread panicked during shutdown");
        }
        info!("Left clipboard viewer chain");
    }

    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

/// Per-window state, reachable from the window procedure via `GWLP_USERDATA`.
struct ViewerState {
    next: Cell<HWND>,
    linked: Cell<bool>,
    released: Cell<bool>,
    sink: EventSink,
}

impl ViewerState {
    /// Leave the chain if still a member. Idempotent.
    fn unlink(&self, hwnd: HWND) {
        if self.linked.replace(false) {
            // SAFETY: hwnd is our viewer window; next is whatever the chain told us.
            unsafe { ChangeClipboardChain(hwnd, self.next.get()) };
            debug!("Unlinked from clipboard viewer chain");
        }
    }
}

/// Owns the window, its state and its class for the lifetime of the pump.
struct ViewerWindow {
    hwnd: HWND,
    state: *mut ViewerState,
    instance: HINSTANCE,
    class: Vec<u16>,
}

impl Drop for ViewerWindow {
    fn drop(&mut self) {
        // SAFETY: state was created by Box::into_raw in run_viewer and is
        // only freed here, after the window can no longer dispatch to it.
        unsafe {
            if IsWindow(self.hwnd) != 0 {
                DestroyWindow(self.hwnd);
            }
            (*self.state).unlink(self.hwnd);
            drop(Box::from_raw(self.state));
            UnregisterClassW(self.class.as_ptr(), self.instance);
        }
    }
}

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(once(0)).collect()
}

fn last_error(what: &str) -> GuardError {
    // SAFETY: reads thread-local error state.
    let code = unsafe { GetLastError() };
    GuardError::ClipboardRegistration(format!("{} failed (error {})", what, code))
}

fn run_viewer(sink: EventSink, ready: mpsc::Sender<Result<isize, GuardError>>) {
    let window = match create_viewer(sink) {
        Ok(window) => window,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(window.hwnd as isize)).is_err() {
        return;
    }

    // SAFETY: standard message pump on the thread that owns the window.
    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        loop {
            let status = GetMessageW(&mut msg, ptr::null_mut(), 0, 0);
            if status == 0 {
                break;
            }
            if status == -1 {
                warn!("{}", last_error("GetMessageW"));
                break;
            }
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        if !(*window.state).released.get() {
            error!("Clipboard viewer stopped without being released; clipboard is unmonitored");
        }
    }

    drop(window);
}

fn create_viewer(sink: EventSink) -> Result<ViewerWindow, GuardError> {
    let class = wide(CLASS_NAME);

    // SAFETY: all pointers passed below are valid for the duration of each
    // call; the state pointer is owned by the returned ViewerWindow.
    unsafe {
        let instance = GetModuleHandleW(ptr::null());

        let mut wc: WNDCLASSEXW = std::mem::zeroed();
        wc.cbSize = std::mem::size_of::<WNDCLASSEXW>() as UINT;
        wc.lpfnWndProc = Some(viewer_proc);
        wc.hInstance = instance;
        wc.lpszClassName = class.as_ptr();
        if RegisterClassExW(&wc) == 0 && GetLastError() != ERROR_CLASS_ALREADY_EXISTS {
            return Err(last_error("RegisterClassExW"));
        }

        let hwnd = CreateWindowExW(
            WS_EX_TOOLWINDOW,
            class.as_ptr(),
            class.as_ptr(),
            WS_POPUP,
            0,
            0,
            0,
            0,
            ptr::null_mut(),
            ptr::null_mut(),
            instance,
            ptr::null_mut(),
        );
        if hwnd.is_null() {
            let err = last_error("CreateWindowExW");
            UnregisterClassW(class.as_ptr(), instance);
            return Err(err);
        }

        let state = Box::into_raw(Box::new(ViewerState {
            next: Cell::new(ptr::null_mut()),
            linked: Cell::new(false),
            released: Cell::new(false),
            sink,
        }));
        SetWindowLongPtrW(hwnd, GWLP_USERDATA, state as isize);

        let window = ViewerWindow {
            hwnd,
            state,
            instance,
            class,
        };

        // A null return is also the legitimate "chain was empty" answer, so
        // only a non-zero last error means failure.
        SetLastError(0);
        let next = SetClipboardViewer(hwnd);
        if next.is_null() && GetLastError() != 0 {
            return Err(last_error("SetClipboardViewer"));
        }
        (*state).next.set(next);
        (*state).linked.set(true);

        Ok(window)
    }
}

unsafe extern "system" fn viewer_proc(
    hwnd: HWND,
    msg: UINT,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    // SAFETY: GWLP_USERDATA is either null or the ViewerState installed by
    // create_viewer, which outlives the window.
    let state = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *const ViewerState;
    if state.is_null() {
        return unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) };
    }
    let state = unsafe { &*state };

    match msg {
        WM_DRAWCLIPBOARD => {
            let handled = catch_unwind(AssertUnwindSafe(|| {
                forward_snapshot(&SystemClipboard, &state.sink)
            }));
            if handled.is_err() {
                error!("Clipboard change handler panicked");
            }
            let next = state.next.get();
            if !next.is_null() {
                unsafe { SendMessageW(next, msg, wparam, lparam) };
            }
            0
        }
        WM_CHANGECBCHAIN => {
            let removed = wparam as HWND;
            let next = state.next.get();
            if removed == next {
                state.next.set(lparam as HWND);
            } else if !next.is_null() {
                unsafe { SendMessageW(next, msg, wparam, lparam) };
            }
            0
        }
        WM_CLOSE => {
            debug!("Ignoring WM_CLOSE sent to the clipboard viewer");
            0
        }
        WM_RELEASE_VIEWER => {
            state.released.set(true);
            unsafe { DestroyWindow(hwnd) };
            0
        }
        WM_DESTROY => {
            state.unlink(hwnd);
            unsafe { PostQuitMessage(0) };
            0
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}
