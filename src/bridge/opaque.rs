//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::ffi::c_void;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::ptr;

/// Releases a value that was handed across the boundary.
pub type Deleter = unsafe extern "C" fn(ptr: *mut c_void);

/// The C-compatible, non-owning shape of an [`OpaqueValue`].
///
/// This is what foreign code returns from analysis entrypoints, and what is passed
/// in whenever foreign code hands a context to the bridge. It carries no ownership
/// semantics of its own until it is turned into an [`OpaqueValue`].
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct RawOpaque {
    /// The foreign value, possibly null.
    pub ptr: *mut c_void,
    /// How to release `ptr`. May only be `None` if `ptr` is null.
    pub deleter: Option<Deleter>,
}

impl RawOpaque {
    /// A null value with no deleter.
    pub const fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            deleter: None,
        }
    }

    /// Boxes `value` and pairs it with a deleter that drops it as a `T`.
    pub fn boxed<T: 'static>(value: T) -> Self {
        Self {
            ptr: Box::into_raw(Box::new(value)) as *mut c_void,
            deleter: Some(drop_box::<T>),
        }
    }

    /// Wraps a pointer that is not owned, its deleter does nothing.
    pub const fn borrowed(ptr: *mut c_void) -> Self {
        Self {
            ptr,
            deleter: Some(forget),
        }
    }
}

unsafe extern "C" fn drop_box<T>(ptr: *mut c_void) {
    drop(Box::from_raw(ptr as *mut T));
}

unsafe extern "C" fn forget(_: *mut c_void) {}

/// Exclusive ownership of a foreign value and the function that releases it.
///
/// The deleter runs exactly once, when the container is dropped or reset, and
/// never runs if the pointer is null. There is deliberately no `Clone`, the only
/// way to give the value to someone else is to move the container.
pub struct OpaqueValue {
    raw: RawOpaque,
}

impl OpaqueValue {
    /// An empty container, dropping it does nothing.
    pub const fn null() -> Self {
        Self {
            raw: RawOpaque::null(),
        }
    }

    /// Takes ownership of a raw value.
    ///
    /// # Safety
    /// If `raw.ptr` is non-null, `raw.deleter` must be `Some` and must be sound to
    /// call exactly once with `raw.ptr`. Nobody else may release `raw.ptr`. A non-null
    /// pointer without a deleter is a contract violation that is only caught by
    /// debug assertions.
    pub unsafe fn from_raw(raw: RawOpaque) -> Self {
        debug_assert!(
            raw.ptr.is_null() || raw.deleter.is_some(),
            "non-null opaque value without a deleter"
        );

        Self { raw }
    }

    /// Takes ownership of a Rust value.
    pub fn boxed<T: 'static>(value: T) -> Self {
        Self {
            raw: RawOpaque::boxed(value),
        }
    }

    /// The owned pointer. Ownership is not released.
    pub fn as_ptr(&self) -> *mut c_void {
        self.raw.ptr
    }

    /// Whether the container is empty.
    pub fn is_null(&self) -> bool {
        self.raw.ptr.is_null()
    }

    /// Gives up ownership, the caller becomes responsible for calling the deleter.
    pub fn into_raw(self) -> RawOpaque {
        let raw = self.raw;
        mem::forget(self);

        raw
    }

    /// Releases the current value (if any) and leaves the container empty.
    pub fn reset(&mut self) {
        let raw = mem::replace(&mut self.raw, RawOpaque::null());

        // SAFETY: `raw` was owned by `self` and has just been removed from it,
        // so this is the only release of `raw.ptr`
        unsafe { release(raw) }
    }
}

unsafe fn release(raw: RawOpaque) {
    if raw.ptr.is_null() {
        return;
    }

    if let Some(deleter) = raw.deleter {
        deleter(raw.ptr);
    }
}

impl Drop for OpaqueValue {
    fn drop(&mut self) {
        self.reset()
    }
}

impl Default for OpaqueValue {
    fn default() -> Self {
        Self::null()
    }
}

impl Debug for OpaqueValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueValue({:p})", self.raw.ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_not_impl_any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    assert_not_impl_any!(OpaqueValue: Clone, Copy);

    // every counted value knows its own counter, tests run in parallel
    struct Counted {
        value: u64,
        deleted: &'static AtomicUsize,
    }

    unsafe extern "C" fn count(ptr: *mut c_void) {
        let counted = Box::from_raw(ptr as *mut Counted);
        counted.deleted.fetch_add(1, Ordering::SeqCst);
    }

    fn counted(value: u64, deleted: &'static AtomicUsize) -> RawOpaque {
        RawOpaque {
            ptr: Box::into_raw(Box::new(Counted { value, deleted })) as *mut c_void,
            deleter: Some(count),
        }
    }

    unsafe extern "C" fn never(_: *mut c_void) {
        panic!("deleter called for a null value");
    }

    #[test]
    fn deleter_runs_once_across_moves() {
        static DELETED: AtomicUsize = AtomicUsize::new(0);

        let value = unsafe { OpaqueValue::from_raw(counted(7, &DELETED)) };
        let moved = vec![value];
        let value = moved.into_iter().next().unwrap();
        let boxed = Box::new(value);

        assert_eq!(unsafe { (*((*boxed).as_ptr() as *const Counted)).value }, 7);
        assert_eq!(DELETED.load(Ordering::SeqCst), 0);

        drop(boxed);
        assert_eq!(DELETED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn null_values_are_never_released() {
        let raw = RawOpaque {
            ptr: ptr::null_mut(),
            deleter: Some(never),
        };
        let mut value = unsafe { OpaqueValue::from_raw(raw) };

        assert!(value.is_null());
        value.reset();
        drop(value);
        drop(OpaqueValue::null());
    }

    #[test]
    fn reset_releases_immediately() {
        static DELETED: AtomicUsize = AtomicUsize::new(0);

        let mut value = unsafe { OpaqueValue::from_raw(counted(1, &DELETED)) };

        value.reset();
        assert!(value.is_null());
        assert_eq!(DELETED.load(Ordering::SeqCst), 1);

        drop(value);
        assert_eq!(DELETED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn into_raw_gives_up_ownership() {
        let value = OpaqueValue::boxed(String::from("kept"));
        let raw = value.into_raw();

        assert_eq!(unsafe { &*(raw.ptr as *const String) }, "kept");

        drop(unsafe { OpaqueValue::from_raw(raw) });
    }

    #[test]
    fn borrowed_pointers_are_left_alone() {
        let mut target = 5u32;
        let value = unsafe {
            OpaqueValue::from_raw(RawOpaque::borrowed(&mut target as *mut u32 as *mut c_void))
        };

        drop(value);
        assert_eq!(target, 5);
    }
}
