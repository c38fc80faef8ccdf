//! Linux/Android backend: the raw `futex(2)` syscall, `FUTEX_PRIVATE_FLAG`
//! set because every word we wait on is process-private (never shared
//! across a `fork` without `exec`, never mapped via `/proc/.../mem`).

use core::ptr;
use core::sync::atomic::AtomicU32;
use core::time::Duration;

use crate::kwait::{Futex, WakeupReason};

impl Futex for AtomicU32 {
    #[inline]
    fn futex_wait(&self, expected: u32, timeout: Option<Duration>) -> WakeupReason {
        let ts = timeout.and_then(convert_timeout);
        let ts_ptr = ts
            .as_ref()
            .map(|ts_ref| ts_ref as *const _)
            .unwrap_or(ptr::null());
        let r = unsafe {
            futex(
                self as *const AtomicU32 as *mut libc::c_int,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected as libc::c_int,
                ts_ptr,
                ptr::null_mut(),
                0,
            )
        };
        match r {
            0 => WakeupReason::Unknown,
            -1 => match errno() {
                libc::EAGAIN => WakeupReason::NoMatch,
                libc::EINTR => WakeupReason::Interrupt,
                libc::ETIMEDOUT if ts.is_some() => WakeupReason::TimedOut,
                _ => WakeupReason::Unknown,
            },
            _ => WakeupReason::Unknown,
        }
    }

    #[inline]
    fn futex_wake(&self) -> usize {
        let r = unsafe {
            futex(
                self as *const AtomicU32 as *mut libc::c_int,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                i32::MAX,
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        if r >= 0 {
            r as usize
        } else {
            0
        }
    }
}

unsafe fn futex(
    uaddr: *mut libc::c_int,
    futex_op: libc::c_int,
    val: libc::c_int,
    timeout: *const libc::timespec,
    uaddr2: *mut libc::c_void,
    val3: libc::c_int,
) -> libc::c_long {
    libc::syscall(libc::SYS_futex, uaddr, futex_op, val, timeout, uaddr2, val3)
}

#[cfg(target_os = "android")]
fn errno() -> i32 {
    unsafe { *libc::__errno() }
}

#[cfg(target_os = "linux")]
fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

// x32 Linux uses a non-standard type for tv_nsec in timespec.
// https://sourceware.org/bugzilla/show_bug.cgi?id=16437
#[cfg(all(target_arch = "x86_64", target_pointer_width = "32"))]
#[allow(non_camel_case_types)]
type tv_nsec_t = i64;
#[cfg(not(all(target_arch = "x86_64", target_pointer_width = "32")))]
#[allow(non_camel_case_types)]
type tv_nsec_t = libc::c_long;

fn convert_timeout(d: Duration) -> Option<libc::timespec> {
    if d.as_secs() > libc::time_t::MAX as u64 {
        return None;
    }
    Some(libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as tv_nsec_t,
    })
}
