//! macOS/iOS backend: the undocumented `ulock_wait`/`ulock_wake` syscalls
//! libdispatch itself uses, available since Darwin 16 (macOS 10.12).

use core::sync::atomic::AtomicU32;
use core::time::Duration;

use crate::kwait::{Futex, WakeupReason};

const UL_COMPARE_AND_WAIT: u32 = 1;
const ULF_WAKE_ALL: u32 = 0x100;
#[allow(non_upper_case_globals)]
const SYS_ulock_wait: libc::c_int = 515;
#[allow(non_upper_case_globals)]
const SYS_ulock_wake: libc::c_int = 516;

impl Futex for AtomicU32 {
    #[inline]
    fn futex_wait(&self, expected: u32, timeout: Option<Duration>) -> WakeupReason {
        let ptr = self as *const AtomicU32 as *mut libc::c_void;
        let timeout_us = convert_timeout_us(timeout);
        let r = unsafe { ulock_wait(UL_COMPARE_AND_WAIT, ptr, expected as u64, timeout_us) };
        if r >= 0 {
            WakeupReason::Unknown
        } else {
            match errno() {
                libc::EINTR => WakeupReason::Interrupt,
                libc::ETIMEDOUT if timeout_us != 0 => WakeupReason::TimedOut,
                _ => WakeupReason::Unknown,
            }
        }
    }

    #[inline]
    fn futex_wake(&self) -> usize {
        let ptr = self as *const AtomicU32 as *mut libc::c_void;
        let r = unsafe { ulock_wake(UL_COMPARE_AND_WAIT | ULF_WAKE_ALL, ptr, 0) };
        // `ulock_wake` returning ENOENT just means nobody was waiting;
        // libdispatch treats that as success and so do we.
        if !(r == 0 || (r == -1 && errno() == libc::ENOENT)) {
            debug_assert!(false, "unexpected ulock_wake return {}", r);
        }
        0
    }
}

fn errno() -> i32 {
    unsafe { *libc::__error() }
}

unsafe fn ulock_wait(operation: u32, addr: *mut libc::c_void, value: u64, timeout_us: u32) -> i32 {
    libc::syscall(SYS_ulock_wait, operation, addr, value, timeout_us) as i32
}

unsafe fn ulock_wake(operation: u32, addr: *mut libc::c_void, wake_value: u64) -> i32 {
    libc::syscall(SYS_ulock_wake, operation, addr, wake_value) as i32
}

fn convert_timeout_us(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => 0, // 0 means wait indefinitely for ulock_wait.
        Some(d) => u32::try_from(d.as_micros()).unwrap_or(u32::MAX).max(1),
    }
}
