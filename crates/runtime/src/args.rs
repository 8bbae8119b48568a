//! Program arguments and environment
//!
//! `main` calls `__set_args(argc, argv, envp)` once at startup; the table
//! copies every C string into a Nytrix heap string so later `__argv(i)`
//! lookups hand out values that satisfy the string predicate. The copies
//! are process-wide and freed by `__runtime_cleanup`.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use ny_core::heap::{OFF_LEN, OFF_TAG, write_header};
use ny_core::value::{TAG_STR, is_tagged_int, tag_int};

use crate::memory::{__free, __malloc};

static ARGC: AtomicI64 = AtomicI64::new(1); // tagged 0
static ENVC: AtomicI64 = AtomicI64::new(1);
static ARGV: AtomicUsize = AtomicUsize::new(0);
static ENVP: AtomicUsize = AtomicUsize::new(0);

unsafe fn copy_c_string(s: *const u8) -> i64 {
    let len = unsafe { libc::strlen(s as *const libc::c_char) };
    let p = __malloc(tag_int(len as i64 + 1));
    if p == 0 {
        return 0;
    }
    unsafe {
        write_header(p, OFF_TAG, TAG_STR);
        write_header(p, OFF_LEN, tag_int(len as i64));
        std::ptr::copy_nonoverlapping(s, p as usize as *mut u8, len + 1);
    }
    p
}

unsafe fn copy_string_table(src: *const *const u8, count: usize) -> usize {
    let table = __malloc(tag_int(((count + 1) * 8) as i64));
    if table == 0 {
        return 0;
    }
    for i in 0..count {
        let s = unsafe { src.add(i).read() };
        let copied = if s.is_null() { 0 } else { unsafe { copy_c_string(s) } };
        unsafe { ((table as usize + i * 8) as *mut i64).write(copied) };
    }
    unsafe { ((table as usize + count * 8) as *mut i64).write(0) };
    table as usize
}

fn free_string_table(table: usize, count: usize) {
    if table == 0 {
        return;
    }
    for i in 0..count {
        let entry = unsafe { ((table + i * 8) as *const i64).read() };
        if entry != 0 {
            __free(entry);
        }
    }
    __free(table as i64);
}

/// Copy argv/envp into heap strings. Returns 0, or -1 on allocation failure.
#[unsafe(no_mangle)]
pub extern "C" fn __set_args(argc: i64, argv: i64, envp: i64) -> i64 {
    cleanup_args();
    let argc_raw = if is_tagged_int(argc) { argc >> 1 } else { argc };
    let argc_raw = argc_raw.max(0) as usize;
    ARGC.store(tag_int(argc_raw as i64), Ordering::SeqCst);
    let argv_src = argv as usize as *const *const u8;
    if !argv_src.is_null() && argc_raw > 0 {
        let table = unsafe { copy_string_table(argv_src, argc_raw) };
        if table == 0 {
            return -1;
        }
        ARGV.store(table, Ordering::SeqCst);
    }
    let envp_src = envp as usize as *const *const u8;
    let mut env_count = 0usize;
    if !envp_src.is_null() {
        while !unsafe { envp_src.add(env_count).read() }.is_null() {
            env_count += 1;
        }
        let table = unsafe { copy_string_table(envp_src, env_count) };
        if table == 0 {
            return -1;
        }
        ENVP.store(table, Ordering::SeqCst);
    }
    ENVC.store(tag_int(env_count as i64), Ordering::SeqCst);
    0
}

pub(crate) fn cleanup_args() {
    let argc = ARGC.swap(1, Ordering::SeqCst) >> 1;
    let envc = ENVC.swap(1, Ordering::SeqCst) >> 1;
    free_string_table(ARGV.swap(0, Ordering::SeqCst), argc.max(0) as usize);
    free_string_table(ENVP.swap(0, Ordering::SeqCst), envc.max(0) as usize);
}

#[unsafe(no_mangle)]
pub extern "C" fn __argc() -> i64 {
    ARGC.load(Ordering::SeqCst)
}

#[unsafe(no_mangle)]
pub extern "C" fn __envc() -> i64 {
    ENVC.load(Ordering::SeqCst)
}

#[unsafe(no_mangle)]
pub extern "C" fn __envp() -> i64 {
    ENVP.load(Ordering::SeqCst) as i64
}

/// A fresh heap-string copy of argument `i`, or none when out of range.
#[unsafe(no_mangle)]
pub extern "C" fn __argv(i: i64) -> i64 {
    if !is_tagged_int(i) {
        return 0;
    }
    let idx = i >> 1;
    let argc = ARGC.load(Ordering::SeqCst) >> 1;
    if idx < 0 || idx >= argc {
        return 0;
    }
    let table = ARGV.load(Ordering::SeqCst);
    if table == 0 {
        return 0;
    }
    let entry = unsafe { ((table + idx as usize * 8) as *const i64).read() };
    if entry == 0 {
        return 0;
    }
    unsafe { copy_c_string(entry as usize as *const u8) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ny_core::value::is_string;
    use serial_test::serial;

    fn with_fake_args<R>(args: &[&str], f: impl FnOnce() -> R) -> R {
        let storage: Vec<std::ffi::CString> = args
            .iter()
            .map(|a| std::ffi::CString::new(*a).unwrap())
            .collect();
        let mut ptrs: Vec<*const u8> = storage.iter().map(|c| c.as_ptr() as *const u8).collect();
        ptrs.push(std::ptr::null());
        let r = {
            __set_args(
                tag_int(args.len() as i64),
                ptrs.as_ptr() as i64,
                0,
            );
            f()
        };
        cleanup_args();
        r
    }

    #[test]
    #[serial]
    fn argv_round_trip() {
        with_fake_args(&["prog", "--flag", "value"], || {
            assert_eq!(__argc(), tag_int(3));
            let a1 = __argv(tag_int(1));
            assert!(is_string(a1));
            assert_eq!(crate::strings::str_bytes(a1), b"--flag");
            __free(a1);
        });
    }

    #[test]
    #[serial]
    fn argv_out_of_range_is_none() {
        with_fake_args(&["prog"], || {
            assert_eq!(__argv(tag_int(5)), 0);
            assert_eq!(__argv(tag_int(-1)), 0);
            assert_eq!(__argv(0x4000), 0);
        });
    }

    #[test]
    #[serial]
    fn cleanup_resets_counts() {
        with_fake_args(&["prog"], || {});
        assert_eq!(__argc(), tag_int(0));
        assert_eq!(__envc(), tag_int(0));
    }
}
