//! Windows backend: `WaitOnAddress`/`WakeByAddressAll` (`synchapi.h`,
//! Windows 8+). A direct address-based primitive, unlike the NT Keyed
//! Events dance older thread-parking crates need — no side channel for a
//! waiter count, which is exactly the shape [`Futex`] wants.

use core::ffi::c_void;
use core::mem;
use core::sync::atomic::AtomicU32;
use core::time::Duration;

use winapi::shared::minwindef::DWORD;
use winapi::shared::winerror::ERROR_TIMEOUT;
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::synchapi::{WaitOnAddress, WakeByAddressAll};
use winapi::um::winbase::INFINITE;

use crate::kwait::{Futex, WakeupReason};

impl Futex for AtomicU32 {
    #[inline]
    fn futex_wait(&self, expected: u32, timeout: Option<Duration>) -> WakeupReason {
        let compare = expected;
        let millis = convert_timeout_ms(timeout);
        let ok = unsafe {
            WaitOnAddress(
                self as *const AtomicU32 as *mut c_void,
                &compare as *const u32 as *mut c_void,
                mem::size_of::<u32>(),
                millis,
            )
        };
        if ok != 0 {
            WakeupReason::Unknown
        } else if unsafe { GetLastError() } == ERROR_TIMEOUT {
            WakeupReason::TimedOut
        } else {
            WakeupReason::Unknown
        }
    }

    #[inline]
    fn futex_wake(&self) -> usize {
        unsafe {
            WakeByAddressAll(self as *const AtomicU32 as *mut c_void);
        }
        0
    }
}

fn convert_timeout_ms(timeout: Option<Duration>) -> DWORD {
    match timeout {
        None => INFINITE,
        Some(d) => {
            let ms = d.as_millis();
            if ms >= INFINITE as u128 {
                INFINITE - 1
            } else {
                ms as DWORD
            }
        }
    }
}
