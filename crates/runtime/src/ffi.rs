//! FFI and call dispatch
//!
//! `__callN` is the single indirect-call entry for generated code. The
//! callee word is examined at runtime:
//!
//! - 0: the call is refused, result is tagged 0
//! - native-encoded (`(raw << 3) | 6`): untag every argument, call through
//!   the raw C ABI, retag the returned word
//! - heap pointer with tag 105: closure; load the code and environment
//!   slots and call `code(env, args…)` through the masked pointer
//! - anything else: mask the low bits and call it as a plain Ny function
//!
//! `dlopen`/`dlsym` return native-encoded words so dispatch can recognize
//! foreign pointers later; the other `dl*` entry points accept either
//! encoding.

use std::ffi::{c_char, c_int, c_void};

use ny_core::heap::type_tag;
use ny_core::value::{
    TAG_CLOSURE, is_heap_pointer, is_tagged_int, mask_fn_ptr, native_decode, native_encode,
    native_is, tag_int, untag_int,
};

/// Encode a raw address as a native word (exposed so Ny code can tag
/// addresses it obtained by other means).
#[unsafe(no_mangle)]
pub extern "C" fn __tag_native(addr: i64) -> i64 {
    let addr = if is_tagged_int(addr) { addr >> 1 } else { addr };
    if addr == 0 {
        return 0;
    }
    native_encode(addr as usize)
}

#[unsafe(no_mangle)]
pub extern "C" fn __dlopen(name: i64, flags: i64) -> i64 {
    let path: *const c_char = if name != 0 && !is_tagged_int(name) {
        name as usize as *const c_char
    } else if is_tagged_int(name) && (name >> 1) != 0 {
        (name >> 1) as usize as *const c_char
    } else {
        std::ptr::null()
    };
    let flags = if is_tagged_int(flags) {
        (flags >> 1) as c_int
    } else {
        flags as c_int
    };
    let handle = unsafe { libc::dlopen(path, flags) };
    if handle.is_null() {
        0
    } else {
        native_encode(handle as usize)
    }
}

fn handle_of(word: i64) -> *mut c_void {
    if native_is(word) {
        native_decode(word) as *mut c_void
    } else {
        word as usize as *mut c_void
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn __dlsym(handle: i64, name: i64) -> i64 {
    let sym = unsafe { libc::dlsym(handle_of(handle), name as usize as *const c_char) };
    if sym.is_null() {
        0
    } else {
        native_encode(sym as usize)
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn __dlerror() -> i64 {
    unsafe { libc::dlerror() as i64 }
}

#[unsafe(no_mangle)]
pub extern "C" fn __dlclose(handle: i64) -> i64 {
    unsafe { libc::dlclose(handle_of(handle)) as i64 }
}

/// Permissive untag used at the FFI boundary.
#[unsafe(no_mangle)]
pub extern "C" fn __ffi_untag_ptr(v: i64) -> i64 {
    untag_int(v)
}

fn closure_slots(f: i64) -> Option<(i64, i64)> {
    if is_heap_pointer(f) && unsafe { type_tag(f) } == TAG_CLOSURE {
        let code = unsafe { (f as usize as *const i64).read() };
        let env = unsafe { ((f as usize + 8) as *const i64).read() };
        Some((code, env))
    } else {
        None
    }
}

macro_rules! sub_i64 {
    ($a:ident) => {
        i64
    };
}

macro_rules! define_call {
    ($name:ident $(, $a:ident)*) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name(f: i64 $(, $a: i64)*) -> i64 {
            if f == 0 {
                return 1;
            }
            if native_is(f) {
                let native: extern "C" fn($(sub_i64!($a)),*) -> i64 =
                    unsafe { std::mem::transmute(native_decode(f)) };
                return tag_int(native($(untag_int($a)),*));
            }
            if let Some((code, env)) = closure_slots(f) {
                let body: extern "C" fn(i64 $(, sub_i64!($a))*) -> i64 =
                    unsafe { std::mem::transmute(mask_fn_ptr(code) as usize) };
                return body(env $(, $a)*);
            }
            let plain: extern "C" fn($(sub_i64!($a)),*) -> i64 =
                unsafe { std::mem::transmute(mask_fn_ptr(f) as usize) };
            plain($($a),*)
        }
    };
}

define_call!(__call0);
define_call!(__call1, a0);
define_call!(__call2, a0, a1);
define_call!(__call3, a0, a1, a2);
define_call!(__call4, a0, a1, a2, a3);
define_call!(__call5, a0, a1, a2, a3, a4);
define_call!(__call6, a0, a1, a2, a3, a4, a5);
define_call!(__call7, a0, a1, a2, a3, a4, a5, a6);
define_call!(__call8, a0, a1, a2, a3, a4, a5, a6, a7);
define_call!(__call9, a0, a1, a2, a3, a4, a5, a6, a7, a8);
define_call!(__call10, a0, a1, a2, a3, a4, a5, a6, a7, a8, a9);
define_call!(__call11, a0, a1, a2, a3, a4, a5, a6, a7, a8, a9, a10);
define_call!(__call12, a0, a1, a2, a3, a4, a5, a6, a7, a8, a9, a10, a11);
define_call!(__call13, a0, a1, a2, a3, a4, a5, a6, a7, a8, a9, a10, a11, a12);
define_call!(__call14, a0, a1, a2, a3, a4, a5, a6, a7, a8, a9, a10, a11, a12, a13);
define_call!(__call15, a0, a1, a2, a3, a4, a5, a6, a7, a8, a9, a10, a11, a12, a13, a14);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{__free, __malloc, __store64_idx};
    use ny_core::value::tag_int;

    extern "C" fn double_it(x: i64) -> i64 {
        // Plain Ny-convention function: tagged in, tagged out.
        tag_int(untag_int(x) * 2)
    }

    extern "C" fn raw_add3(x: i64) -> i64 {
        // Raw C ABI: untagged in, untagged out.
        x + 3
    }

    extern "C" fn env_plus_arg(env: i64, x: i64) -> i64 {
        tag_int(untag_int(env) + untag_int(x))
    }

    #[test]
    fn call_of_zero_is_refused() {
        assert_eq!(__call0(0), 1);
        assert_eq!(__call3(0, 1, 2, 3), 1);
    }

    #[test]
    fn call_through_masked_fn_pointer() {
        let word = (double_it as usize as i64) | 2;
        assert_eq!(__call1(word, tag_int(21)), tag_int(42));
    }

    #[test]
    fn call_through_native_untags_and_retags() {
        let word = native_encode(raw_add3 as usize);
        assert_eq!(__call1(word, tag_int(4)), tag_int(7));
    }

    #[test]
    fn call_through_closure_prepends_env() {
        let cls = __malloc(tag_int(16));
        __store64_idx(cls, tag_int(-8), TAG_CLOSURE);
        __store64_idx(cls, tag_int(0), (env_plus_arg as usize as i64) | 2);
        __store64_idx(cls, tag_int(8), tag_int(30));
        assert_eq!(__call1(cls, tag_int(12)), tag_int(42));
        __free(cls);
    }

    #[test]
    fn closure_matches_direct_invocation_with_env_prepended() {
        let cls = __malloc(tag_int(16));
        __store64_idx(cls, tag_int(-8), TAG_CLOSURE);
        __store64_idx(cls, tag_int(0), (env_plus_arg as usize as i64) | 2);
        __store64_idx(cls, tag_int(8), tag_int(5));
        let through_dispatch = __call1(cls, tag_int(2));
        let direct = env_plus_arg(tag_int(5), tag_int(2));
        assert_eq!(through_dispatch, direct);
        __free(cls);
    }

    #[test]
    fn tag_native_zero_is_none() {
        assert_eq!(__tag_native(0), 0);
        assert_eq!(__tag_native(1), 0); // tagged 0
    }

    #[test]
    fn tag_native_round_trips_addresses() {
        let w = __tag_native(tag_int(0x7777));
        assert!(native_is(w));
        assert_eq!(native_decode(w), 0x7777);
    }

    #[test]
    fn dlsym_on_self_finds_runtime_symbols() {
        let this = __dlopen(0, tag_int(libc::RTLD_NOW as i64));
        // dlopen(NULL) yields the main program handle.
        assert_ne!(this, 0);
        let name = std::ffi::CString::new("__call0").unwrap();
        let sym = __dlsym(this, name.as_ptr() as i64);
        assert!(native_is(sym) || sym == 0);
        __dlclose(this);
    }
}
