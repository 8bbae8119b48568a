//! OS primitives
//!
//! Raw syscall access, offset file I/O, process replacement, POSIX threads,
//! and non-recursive mutexes. Thread spawning allocates a trampoline record
//! holding `(fn, arg)` and starts a native pthread whose body calls the
//! target and returns the tagged result as `void*`.

use std::ffi::c_void;

use ny_core::value::{is_tagged_int, mask_fn_ptr, tag_int};

use crate::memory::check_oob;

#[inline]
fn untag(v: i64) -> i64 {
    if v & 1 == 1 { v >> 1 } else { v }
}

/// Raw syscall. Arguments 4..6 always untag; 1..3 untag except for
/// `execve` (59), whose pointer arguments may be raw addresses that happen
/// to have bit 0 clear already.
#[unsafe(no_mangle)]
pub extern "C" fn __syscall(n: i64, a: i64, b: i64, c: i64, d: i64, e: i64, f: i64) -> i64 {
    let rn = untag(n);
    let (ra, rb, rc) = if rn != 59 {
        (untag(a), untag(b), untag(c))
    } else {
        (a, b, c)
    };
    let (rd, re, rf) = (untag(d), untag(e), untag(f));
    let res = unsafe { libc::syscall(rn as libc::c_long, ra, rb, rc, rd, re, rf) };
    tag_int(res as i64)
}

#[unsafe(no_mangle)]
pub extern "C" fn __sys_read_off(fd: i64, buf: i64, len: i64, off: i64) -> i64 {
    let fd = untag(fd);
    let len = untag(len);
    let off = untag(off);
    if !check_oob(buf, off, len as usize) {
        return -1;
    }
    let p = (buf as isize + off as isize) as *mut c_void;
    let r = unsafe { libc::read(fd as libc::c_int, p, len as usize) };
    tag_int(r as i64)
}

#[unsafe(no_mangle)]
pub extern "C" fn __sys_write_off(fd: i64, buf: i64, len: i64, off: i64) -> i64 {
    let fd = untag(fd);
    let len = untag(len);
    let off = untag(off);
    if !check_oob(buf, off, len as usize) {
        return -1;
    }
    let p = (buf as isize + off as isize) as *const c_void;
    let r = unsafe { libc::write(fd as libc::c_int, p, len as usize) };
    tag_int(r as i64)
}

#[unsafe(no_mangle)]
pub extern "C" fn __execve(path: i64, argv: i64, envp: i64) -> i64 {
    let r = unsafe {
        libc::execve(
            untag(path) as usize as *const libc::c_char,
            untag(argv) as usize as *const *const libc::c_char,
            untag(envp) as usize as *const *const libc::c_char,
        )
    };
    tag_int(r as i64)
}

#[unsafe(no_mangle)]
pub extern "C" fn __recv(sockfd: i64, buf: i64, len: i64, flags: i64) -> i64 {
    if buf == 0 {
        return -1;
    }
    let r = unsafe {
        libc::recv(
            untag(sockfd) as libc::c_int,
            buf as usize as *mut c_void,
            untag(len) as usize,
            untag(flags) as libc::c_int,
        )
    };
    tag_int(r as i64)
}

#[unsafe(no_mangle)]
pub extern "C" fn __errno() -> i64 {
    let e = unsafe { *errno_location() };
    tag_int(e as i64)
}

#[cfg(target_os = "linux")]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "macos")]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

struct ThreadArg {
    fn_word: i64,
    arg: i64,
}

extern "C" fn thread_trampoline(p: *mut c_void) -> *mut c_void {
    let ta = unsafe { Box::from_raw(p as *mut ThreadArg) };
    let masked = mask_fn_ptr(ta.fn_word);
    if masked == 0 {
        return std::ptr::null_mut();
    }
    let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(masked as usize) };
    let res = f(ta.arg);
    res as usize as *mut c_void
}

/// Start a native thread running `fn(arg)`. Returns the pthread id, or a
/// negated errno on failure.
#[unsafe(no_mangle)]
pub extern "C" fn __thread_spawn(fn_word: i64, arg: i64) -> i64 {
    let ta = Box::into_raw(Box::new(ThreadArg { fn_word, arg }));
    let mut tid: libc::pthread_t = 0;
    let r = unsafe {
        libc::pthread_create(
            &mut tid,
            std::ptr::null(),
            thread_trampoline,
            ta as *mut c_void,
        )
    };
    if r != 0 {
        drop(unsafe { Box::from_raw(ta) });
        return -(r as i64);
    }
    tid as i64
}

/// Join a thread, returning the (tagged) word its body produced.
#[unsafe(no_mangle)]
pub extern "C" fn __thread_join(tid: i64) -> i64 {
    let mut ret: *mut c_void = std::ptr::null_mut();
    let r = unsafe { libc::pthread_join(tid as libc::pthread_t, &mut ret) };
    if r != 0 {
        return -(r as i64);
    }
    ret as i64
}

#[unsafe(no_mangle)]
pub extern "C" fn __mutex_new() -> i64 {
    let m: Box<libc::pthread_mutex_t> = Box::new(unsafe { std::mem::zeroed() });
    let p = Box::into_raw(m);
    if unsafe { libc::pthread_mutex_init(p, std::ptr::null()) } != 0 {
        drop(unsafe { Box::from_raw(p) });
        return 0;
    }
    p as i64
}

#[unsafe(no_mangle)]
pub extern "C" fn __mutex_lock64(m: i64) -> i64 {
    if m == 0 {
        return -1;
    }
    unsafe { libc::pthread_mutex_lock(m as usize as *mut libc::pthread_mutex_t) as i64 }
}

#[unsafe(no_mangle)]
pub extern "C" fn __mutex_unlock64(m: i64) -> i64 {
    if m == 0 {
        return -1;
    }
    unsafe { libc::pthread_mutex_unlock(m as usize as *mut libc::pthread_mutex_t) as i64 }
}

#[unsafe(no_mangle)]
pub extern "C" fn __mutex_free(m: i64) -> i64 {
    if m == 0 {
        return 0;
    }
    let p = m as usize as *mut libc::pthread_mutex_t;
    unsafe {
        libc::pthread_mutex_destroy(p);
        drop(Box::from_raw(p));
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ny_core::value::untag_int;

    extern "C" fn thread_body(arg: i64) -> i64 {
        tag_int(untag_int(arg) + 1)
    }

    #[test]
    fn spawn_join_round_trip() {
        let word = (thread_body as usize as i64) | 2;
        let tid = __thread_spawn(word, tag_int(41));
        assert!(tid > 0);
        assert_eq!(__thread_join(tid), tag_int(42));
    }

    #[test]
    fn mutex_lifecycle() {
        let m = __mutex_new();
        assert_ne!(m, 0);
        assert_eq!(__mutex_lock64(m), 0);
        assert_eq!(__mutex_unlock64(m), 0);
        assert_eq!(__mutex_free(m), 0);
        assert_eq!(__mutex_lock64(0), -1);
    }

    #[test]
    fn mutex_guards_shared_counter_across_threads() {
        use std::sync::atomic::{AtomicI64, Ordering};
        static COUNTER: AtomicI64 = AtomicI64::new(0);
        static MUTEX: AtomicI64 = AtomicI64::new(0);

        extern "C" fn bump(_arg: i64) -> i64 {
            let m = MUTEX.load(Ordering::SeqCst);
            for _ in 0..1000 {
                __mutex_lock64(m);
                COUNTER.fetch_add(1, Ordering::Relaxed);
                __mutex_unlock64(m);
            }
            1
        }

        COUNTER.store(0, Ordering::SeqCst);
        MUTEX.store(__mutex_new(), Ordering::SeqCst);
        let word = (bump as usize as i64) | 2;
        let t1 = __thread_spawn(word, 0);
        let t2 = __thread_spawn(word, 0);
        __thread_join(t1);
        __thread_join(t2);
        assert_eq!(COUNTER.load(Ordering::SeqCst), 2000);
        __mutex_free(MUTEX.load(Ordering::SeqCst));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn syscall_getpid_matches_libc() {
        let pid = __syscall(
            tag_int(libc::SYS_getpid as i64),
            0,
            0,
            0,
            0,
            0,
            0,
        );
        assert_eq!(untag_int(pid), unsafe { libc::getpid() } as i64);
    }

    #[test]
    fn read_write_offsets_are_bounds_checked() {
        use crate::memory::{__free, __malloc};
        let buf = __malloc(tag_int(64));
        // Writing past the block is refused before the syscall happens.
        assert_eq!(__sys_read_off(tag_int(0), buf, tag_int(128), tag_int(0)), -1);
        __free(buf);
    }
}
