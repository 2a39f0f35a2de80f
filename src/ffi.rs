//! FFI bindings for Proctor Flux
//!
//! C-compatible entry points for host shells (webview, kiosk app) that capture
//! frames themselves but want the presence heuristic and the violation ledger
//! from this crate. Strings are null-terminated; every returned string is
//! allocated here and must be freed with `proctor_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::capture::{Frame, PixelFormat};
use crate::config::{LockoutConfig, PresenceConfig};
use crate::ledger::{LockoutPolicy, RecordOutcome, ViolationLedger};
use crate::presence::FrameStats;
use crate::types::ViolationKind;

/// Returned by `proctor_ledger_record`
pub const PROCTOR_RECORDED: i32 = 0;
pub const PROCTOR_RECORDED_LOCKOUT: i32 = 1;
pub const PROCTOR_FROZEN: i32 = 2;
pub const PROCTOR_ERROR: i32 = -1;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn json_to_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Frame analysis
// ============================================================================

#[derive(Serialize)]
struct PresenceReport {
    present: bool,
    #[serde(flatten)]
    stats: FrameStats,
}

/// Analyze one frame with the default presence thresholds.
///
/// Returns JSON `{"present", "bright_ratio", "dark_ratio", "skin_tone_ratio"}`.
///
/// # Safety
/// - `pixels` must point to `len` readable bytes.
/// - `channels` is 3 (RGB) or 4 (RGBA); `len` must equal `width * height * channels`.
/// - Returns a newly allocated string that must be freed with `proctor_free_string`.
/// - Returns NULL on error; call `proctor_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn proctor_frame_presence(
    pixels: *const u8,
    len: usize,
    width: u32,
    height: u32,
    channels: u32,
) -> *mut c_char {
    clear_last_error();

    if pixels.is_null() {
        set_last_error("Null pixel buffer");
        return ptr::null_mut();
    }
    let format = match channels {
        3 => PixelFormat::Rgb,
        4 => PixelFormat::Rgba,
        other => {
            set_last_error(&format!("Unsupported channel count: {other}"));
            return ptr::null_mut();
        }
    };

    let data = std::slice::from_raw_parts(pixels, len).to_vec();
    let frame = match Frame::new(width, height, format, data) {
        Ok(frame) => frame,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let config = PresenceConfig::default();
    let stats = FrameStats::analyze(&frame, &config);
    json_to_cstr(&PresenceReport {
        present: stats.is_present(&config),
        stats,
    })
}

// ============================================================================
// Violation ledger
// ============================================================================

/// Opaque handle to a ViolationLedger
pub struct ProctorLedgerHandle {
    ledger: ViolationLedger,
}

/// Create a ledger. Limits of zero or less take the defaults (2 and 3).
///
/// # Safety
/// - Returns a pointer that must be freed with `proctor_ledger_free`.
#[no_mangle]
pub unsafe extern "C" fn proctor_ledger_new(
    presence_lost_limit: i32,
    tab_switch_limit: i32,
) -> *mut ProctorLedgerHandle {
    clear_last_error();

    let defaults = LockoutConfig::default();
    let policy = LockoutPolicy {
        presence_lost_limit: if presence_lost_limit > 0 {
            presence_lost_limit as u32
        } else {
            defaults.presence_lost_limit
        },
        tab_switch_limit: if tab_switch_limit > 0 {
            tab_switch_limit as u32
        } else {
            defaults.tab_switch_limit
        },
    };
    Box::into_raw(Box::new(ProctorLedgerHandle {
        ledger: ViolationLedger::new(policy),
    }))
}

/// Free a ledger.
///
/// # Safety
/// - `ledger` must be a pointer returned by `proctor_ledger_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn proctor_ledger_free(ledger: *mut ProctorLedgerHandle) {
    if !ledger.is_null() {
        drop(Box::from_raw(ledger));
    }
}

/// Append a violation.
///
/// `kind` is one of `presence-lost`, `sustained-noise`, `tab-switch`,
/// `window-blur`; `detail` may be NULL. Returns `PROCTOR_RECORDED`,
/// `PROCTOR_RECORDED_LOCKOUT` when this append locked the session,
/// `PROCTOR_FROZEN` when the ledger was already locked, or `PROCTOR_ERROR`.
///
/// # Safety
/// - `ledger` must be a valid pointer returned by `proctor_ledger_new`.
/// - `kind` and `detail` must be valid null-terminated C strings (or `detail` NULL).
#[no_mangle]
pub unsafe extern "C" fn proctor_ledger_record(
    ledger: *mut ProctorLedgerHandle,
    kind: *const c_char,
    detail: *const c_char,
    timestamp_ms: i64,
) -> i32 {
    clear_last_error();

    if ledger.is_null() {
        set_last_error("Null ledger pointer");
        return PROCTOR_ERROR;
    }
    let handle = &mut *ledger;

    let Some(kind_str) = cstr_to_string(kind) else {
        set_last_error("Invalid kind string pointer");
        return PROCTOR_ERROR;
    };
    let Some(kind) = ViolationKind::ALL
        .into_iter()
        .find(|k| k.as_str() == kind_str)
    else {
        set_last_error(&format!("Unknown violation kind: {kind_str}"));
        return PROCTOR_ERROR;
    };
    let detail = cstr_to_string(detail).unwrap_or_default();
    let Some(at) = Utc.timestamp_millis_opt(timestamp_ms).single() else {
        set_last_error("Timestamp out of range");
        return PROCTOR_ERROR;
    };

    match handle.ledger.record(kind, detail, at) {
        RecordOutcome::Recorded { lockout: Some(_), .. } => PROCTOR_RECORDED_LOCKOUT,
        RecordOutcome::Recorded { lockout: None, .. } => PROCTOR_RECORDED,
        RecordOutcome::Frozen => PROCTOR_FROZEN,
    }
}

/// Violation summary as JSON.
///
/// # Safety
/// - `ledger` must be a valid pointer returned by `proctor_ledger_new`.
/// - Returns a newly allocated string that must be freed with `proctor_free_string`.
#[no_mangle]
pub unsafe extern "C" fn proctor_ledger_summary_json(
    ledger: *const ProctorLedgerHandle,
) -> *mut c_char {
    clear_last_error();

    if ledger.is_null() {
        set_last_error("Null ledger pointer");
        return ptr::null_mut();
    }
    let handle = &*ledger;
    let switches = handle.ledger.count(ViolationKind::TabSwitch);
    json_to_cstr(&handle.ledger.summary(switches))
}

// ============================================================================
// Memory, errors, version
// ============================================================================

/// Free a string returned by a Proctor function.
///
/// # Safety
/// - `ptr` must be a pointer returned by a Proctor function, or NULL.
#[no_mangle]
pub unsafe extern "C" fn proctor_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next Proctor call on this thread.
/// - Do NOT free the returned pointer. Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn proctor_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn proctor_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_json(ptr: *mut c_char) -> serde_json::Value {
        assert!(!ptr.is_null());
        unsafe {
            let value = serde_json::from_str(CStr::from_ptr(ptr).to_str().unwrap()).unwrap();
            proctor_free_string(ptr);
            value
        }
    }

    #[test]
    fn test_ffi_frame_presence() {
        let covered = vec![4u8; 8 * 8 * 3];
        let report = read_json(unsafe {
            proctor_frame_presence(covered.as_ptr(), covered.len(), 8, 8, 3)
        });
        assert_eq!(report["present"], false);
        assert_eq!(report["dark_ratio"], 1.0);

        let lit = vec![128u8; 8 * 8 * 4];
        let report = read_json(unsafe { proctor_frame_presence(lit.as_ptr(), lit.len(), 8, 8, 4) });
        assert_eq!(report["present"], true);
    }

    #[test]
    fn test_ffi_frame_size_mismatch_sets_error() {
        let short = vec![0u8; 10];
        unsafe {
            let result = proctor_frame_presence(short.as_ptr(), short.len(), 8, 8, 3);
            assert!(result.is_null());
            let error = CStr::from_ptr(proctor_last_error()).to_str().unwrap();
            assert!(error.contains("expected"));
        }
    }

    #[test]
    fn test_ffi_ledger_lifecycle() {
        let presence = CString::new("presence-lost").unwrap();
        let detail = CString::new("face").unwrap();
        unsafe {
            let ledger = proctor_ledger_new(0, 0);
            assert!(!ledger.is_null());

            let first = proctor_ledger_record(ledger, presence.as_ptr(), detail.as_ptr(), 1_000);
            let second = proctor_ledger_record(ledger, presence.as_ptr(), ptr::null(), 5_000);
            let third = proctor_ledger_record(ledger, presence.as_ptr(), ptr::null(), 9_000);
            assert_eq!(first, PROCTOR_RECORDED);
            assert_eq!(second, PROCTOR_RECORDED_LOCKOUT);
            assert_eq!(third, PROCTOR_FROZEN);

            let summary = read_json(proctor_ledger_summary_json(ledger));
            assert_eq!(summary["total"], 2);
            assert_eq!(summary["lockout"], "presence-lost");
            assert_eq!(summary["violations"][0]["detail"], "face");

            proctor_ledger_free(ledger);
        }
    }

    #[test]
    fn test_ffi_unknown_kind() {
        let bogus = CString::new("multiple-faces").unwrap();
        unsafe {
            let ledger = proctor_ledger_new(2, 3);
            assert_eq!(
                proctor_ledger_record(ledger, bogus.as_ptr(), ptr::null(), 0),
                PROCTOR_ERROR
            );
            assert!(!proctor_last_error().is_null());
            proctor_ledger_free(ledger);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(proctor_version()).to_str().unwrap();
            assert!(!version.is_empty());
        }
    }
}
