use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardError {
    Unavailable(String),
    UnsupportedPlatform,
}

impl std::fmt::Display for ClipboardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "clipboard unavailable: {message}"),
            Self::UnsupportedPlatform => write!(f, "clipboard access is unsupported on this platform"),
        }
    }
}

impl std::error::Error for ClipboardError {}

/// Synchronous text access to the system clipboard.
pub trait ClipboardAccess: Send {
    fn read_text(&self) -> Result<Option<String>, ClipboardError>;
    fn write_text(&self, value: &str) -> Result<(), ClipboardError>;
    /// Opaque counter that changes whenever the clipboard contents change.
    /// `None` when the platform offers no change signal.
    fn change_token(&self) -> Option<u64>;
}

pub fn system_clipboard() -> Box<dyn ClipboardAccess> {
    Box::new(SystemClipboard)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

#[cfg(target_os = "windows")]
const CF_UNICODETEXT: u32 = 13;

#[cfg(target_os = "windows")]
impl ClipboardAccess for SystemClipboard {
    fn read_text(&self) -> Result<Option<String>, ClipboardError> {
        use windows_sys::Win32::System::DataExchange::{
            CloseClipboard, GetClipboardData, IsClipboardFormatAvailable, OpenClipboard,
        };
        use windows_sys::Win32::System::Memory::{GlobalLock, GlobalUnlock};

        unsafe {
            if OpenClipboard(std::ptr::null_mut()) == 0 {
                return Err(ClipboardError::Unavailable(
                    "failed to open clipboard".to_string(),
                ));
            }

            if IsClipboardFormatAvailable(CF_UNICODETEXT) == 0 {
                CloseClipboard();
                return Ok(None);
            }

            let handle = GetClipboardData(CF_UNICODETEXT);
            if handle.is_null() {
                CloseClipboard();
                return Ok(None);
            }

            let ptr = GlobalLock(handle) as *const u16;
            if ptr.is_null() {
                CloseClipboard();
                return Ok(None);
            }

            let mut len = 0usize;
            while *ptr.add(len) != 0 {
                len += 1;
            }
            let slice = std::slice::from_raw_parts(ptr, len);
            let text = String::from_utf16_lossy(slice);

            GlobalUnlock(handle);
            CloseClipboard();
            Ok(Some(text))
        }
    }

    fn write_text(&self, value: &str) -> Result<(), ClipboardError> {
        use windows_sys::Win32::System::DataExchange::{
            CloseClipboard, EmptyClipboard, OpenClipboard, SetClipboardData,
        };
        use windows_sys::Win32::System::Memory::{
            GlobalAlloc, GlobalFree, GlobalLock, GlobalUnlock, GMEM_MOVEABLE,
        };

        let wide: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
        let bytes = wide.len() * std::mem::size_of::<u16>();
        let fail = |message: &str| -> Result<(), ClipboardError> {
            Err(ClipboardError::Unavailable(message.to_string()))
        };
        unsafe {
            if OpenClipboard(std::ptr::null_mut()) == 0 {
                return fail("failed to open clipboard");
            }
            if EmptyClipboard() == 0 {
                CloseClipboard();
                return fail("failed to clear clipboard");
            }

            let mem = GlobalAlloc(GMEM_MOVEABLE, bytes);
            if mem.is_null() {
                CloseClipboard();
                return fail("failed to allocate clipboard memory");
            }

            let ptr = GlobalLock(mem) as *mut u16;
            if ptr.is_null() {
                GlobalFree(mem);
                CloseClipboard();
                return fail("failed to lock clipboard memory");
            }
            std::ptr::copy_nonoverlapping(wide.as_ptr(), ptr, wide.len());
            GlobalUnlock(mem);

            if SetClipboardData(CF_UNICODETEXT, mem).is_null() {
                GlobalFree(mem);
                CloseClipboard();
                return fail("failed to set clipboard data");
            }

            CloseClipboard();
        }
        Ok(())
    }

    fn change_token(&self) -> Option<u64> {
        use windows_sys::Win32::System::DataExchange::GetClipboardSequenceNumber;

        let sequence = unsafe { GetClipboardSequenceNumber() };
        if sequence == 0 {
            None
        } else {
            Some(u64::from(sequence))
        }
    }
}

#[cfg(not(target_os = "windows"))]
impl ClipboardAccess for SystemClipboard {
    fn read_text(&self) -> Result<Option<String>, ClipboardError> {
        Ok(None)
    }

    fn write_text(&self, _value: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::UnsupportedPlatform)
    }

    fn change_token(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    text: Option<String>,
    sequence: u64,
    writes: Vec<String>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-process clipboard. Clones share the same contents, so a test can keep
/// one handle while the detector owns another.
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates another application copying `text`.
    pub fn set_text(&self, text: &str) {
        self.with_state(|state| {
            state.text = Some(text.to_string());
            state.sequence += 1;
        });
    }

    pub fn writes(&self) -> Vec<String> {
        self.with_state(|state| state.writes.clone())
    }

    pub fn fail_reads(&self, fail: bool) {
        self.with_state(|state| state.fail_reads = fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with_state(|state| state.fail_writes = fail);
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl ClipboardAccess for MemoryClipboard {
    fn read_text(&self) -> Result<Option<String>, ClipboardError> {
        self.with_state(|state| {
            if state.fail_reads {
                Err(ClipboardError::Unavailable("clipboard is locked".to_string()))
            } else {
                Ok(state.text.clone())
            }
        })
    }

    fn write_text(&self, value: &str) -> Result<(), ClipboardError> {
        self.with_state(|state| {
            if state.fail_writes {
                return Err(ClipboardError::Unavailable("clipboard is locked".to_string()));
            }
            state.text = Some(value.to_string());
            state.sequence += 1;
            state.writes.push(value.to_string());
            Ok(())
        })
    }

    fn change_token(&self) -> Option<u64> {
        Some(self.with_state(|state| state.sequence))
    }
}
