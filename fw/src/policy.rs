//! Policy calls from the untrusted OS.
//!
//! The OS submits a requested policy as a packed bit-vector; a human
//! confirms or rejects it out-of-band (hardware buttons routed through the
//! keys driver). Only a confirmed request is committed to the device model.
//!
//! One request is in flight at a time. The entry path never blocks behind
//! another call; a second caller is bounced with [PolicyStatus::Busy].

use core::sync::atomic::{AtomicU32, Ordering};
use log::{error, info, warn};
use num_enum::TryFromPrimitive;
use spin::Mutex;

use crate::dev::class;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum PolicyCall {
    Set = 99,
    Get = 100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PolicyStatus {
    Ok = 0,
    Busy = 1,
    BadAddress = 2,
    BadCommand = 3,
}

// Confirmation cell states. The keys driver publishes the decision with
// Release ordering; the waiting entry path spins with Acquire loads.
const CONFIRM_NONE: u32 = 0;
const CONFIRM_ALLOW: u32 = 1;
const CONFIRM_DENY: u32 = 2;

static CONFIRM: AtomicU32 = AtomicU32::new(CONFIRM_NONE);

/// Publish the human decision for the request currently awaiting one.
pub fn confirm(allow: bool) {
    CONFIRM.store(
        if allow { CONFIRM_ALLOW } else { CONFIRM_DENY },
        Ordering::Release,
    );
}

static POLICY_LOCK: Mutex<()> = Mutex::new(());
static COMMITTED: AtomicU32 = AtomicU32::new(!0);

/// Layout of the request word: mode in bits [1:0] (reserved, not consumed
/// here), eight 2-bit class fields, then three 3-bit group fields. Bit 1 of
/// every field is the enable bit.
const CLASS_FIELDS: &[(&str, u32)] = &[
    ("wifi", 2),
    ("bluetooth", 4),
    ("cellular", 6),
    ("camera", 8),
    ("audio-out", 10),
    ("audio-in", 12),
    ("gps", 14),
    ("inertial", 16),
    ("network", 18),
    ("multimedia", 21),
    ("sensor", 24),
];

fn field_enabled(bits: u32, shift: u32) -> bool {
    (bits >> shift) & 0x2 != 0
}

/// Entry point for policy calls, dispatched on the call id.
///
/// Returns the status plus the value slot (meaningful for [PolicyCall::Get]).
pub fn entry(call: u32, arg: u32) -> (PolicyStatus, u32) {
    match PolicyCall::try_from(call) {
        Ok(PolicyCall::Set) => (set(arg), 0),
        Ok(PolicyCall::Get) => (PolicyStatus::Ok, get()),
        Err(_) => {
            warn!("policy: unknown call {:#x}", call);
            (PolicyStatus::BadCommand, 0)
        }
    }
}

/// Ask for a new policy and wait for the human decision.
///
/// A denied request is not an error: the call completes with
/// [PolicyStatus::Ok] and the previous policy stays committed; the OS reads
/// the outcome back with [PolicyCall::Get].
pub fn set(bits: u32) -> PolicyStatus {
    let Some(_guard) = POLICY_LOCK.try_lock() else {
        error!("policy: request already in flight");
        return PolicyStatus::Busy;
    };

    info!("policy: requested {:#010x}", bits);
    CONFIRM.store(CONFIRM_NONE, Ordering::Release);
    crate::drivers::keys::arm_confirmation();

    let decision = loop {
        match CONFIRM.load(Ordering::Acquire) {
            CONFIRM_NONE => core::hint::spin_loop(),
            decision => break decision,
        }
    };
    crate::drivers::keys::disarm_confirmation();

    if decision != CONFIRM_ALLOW {
        info!("policy: request denied");
        return PolicyStatus::Ok;
    }

    commit(bits);
    PolicyStatus::Ok
}

/// Last committed policy.
pub fn get() -> u32 {
    COMMITTED.load(Ordering::Acquire)
}

/// Apply a confirmed bit-vector to the device model.
///
/// Classes being switched on are brought up before any class is shut off,
/// so a device shared between an enabling and a disabling class ends the
/// commit at the protection state of the last walk that touched it.
fn commit(bits: u32) {
    for (class, shift) in CLASS_FIELDS {
        if field_enabled(bits, *shift) {
            class::set_class_enabled(class, true);
        }
    }
    for (class, shift) in CLASS_FIELDS {
        if !field_enabled(bits, *shift) {
            class::set_class_enabled(class, false);
        }
    }
    COMMITTED.store(bits, Ordering::Release);
    info!("policy: committed {:#010x}", bits);
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    CONFIRM.store(CONFIRM_NONE, Ordering::Release);
    COMMITTED.store(!0, Ordering::Release);
}
