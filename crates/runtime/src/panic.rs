//! Panic and defer channel
//!
//! A per-thread LIFO stack of deferred calls and a per-thread stack of
//! panic frames. A panic frame records the address of a `jmp_buf` that
//! generated code armed with `setjmp`, plus a snapshot of the defer
//! stack's length at entry. `__panic` unwinds the defer stack down to
//! exactly that saved length (running each entry in reverse push order)
//! and then `longjmp`s to the frame with value 1.
//!
//! With no frame armed, `__panic` prints the message, the last recorded
//! source location, and the trace ring, then exits with code 1.

use std::cell::{Cell, RefCell};

use ny_core::value::{is_string, is_tagged_int, mask_fn_ptr, untag_int};

use crate::strings::{str_bytes, str_len};

unsafe extern "C" {
    fn longjmp(env: *mut libc::c_void, val: libc::c_int) -> !;
}

const TRACE_RING: usize = 32;

/// Conservative upper bound on `sizeof(jmp_buf)` across the libcs we link
/// against (glibc x86_64 is 200 bytes, musl 64-bit is 256).
const JMPBUF_SIZE: i64 = 512;

struct PanicFrame {
    env: usize,
    defer_base: usize,
}

#[derive(Clone, Copy, Default)]
struct TraceSlot {
    file: i64,
    line: i64,
    col: i64,
    func: i64,
}

struct TraceState {
    file: i64,
    line: i64,
    col: i64,
    func: i64,
    ring: [TraceSlot; TRACE_RING],
    len: usize,
    idx: usize,
}

thread_local! {
    static DEFERS: RefCell<Vec<(i64, i64)>> = const { RefCell::new(Vec::new()) };
    static FRAMES: RefCell<Vec<PanicFrame>> = const { RefCell::new(Vec::new()) };
    static PANIC_VALUE: Cell<i64> = const { Cell::new(0) };
    static TRACE: RefCell<TraceState> = RefCell::new(TraceState {
        file: 0,
        line: 1,
        col: 1,
        func: 0,
        ring: [TraceSlot::default(); TRACE_RING],
        len: 0,
        idx: 0,
    });
    static TRACE_PRINT: Cell<Option<bool>> = const { Cell::new(None) };
}

fn run_deferred(fn_word: i64, env: i64) {
    let masked = mask_fn_ptr(fn_word);
    if masked == 0 {
        return;
    }
    let f: extern "C" fn(i64) -> i64 = unsafe { std::mem::transmute(masked as usize) };
    f(env);
}

/// Register `(fn, env)` for LIFO invocation at scope exit or unwind.
#[unsafe(no_mangle)]
pub extern "C" fn __push_defer(fn_word: i64, env: i64) {
    DEFERS.with(|d| d.borrow_mut().push((fn_word, env)));
}

/// Pop the most recent deferred entry and invoke it as `fn(env)`.
#[unsafe(no_mangle)]
pub extern "C" fn __pop_run_defer() {
    let entry = DEFERS.with(|d| d.borrow_mut().pop());
    if let Some((fn_word, env)) = entry {
        run_deferred(fn_word, env);
    }
}

fn run_defers_to(target_len: usize) {
    loop {
        let entry = DEFERS.with(|d| {
            let mut defers = d.borrow_mut();
            if defers.len() > target_len {
                defers.pop()
            } else {
                None
            }
        });
        match entry {
            Some((fn_word, env)) => run_deferred(fn_word, env),
            None => break,
        }
    }
}

/// Arm a panic frame around a `jmp_buf` the caller just `setjmp`ed.
#[unsafe(no_mangle)]
pub extern "C" fn __set_panic_env(env_ptr: i64) -> i64 {
    let defer_base = DEFERS.with(|d| d.borrow().len());
    FRAMES.with(|f| {
        f.borrow_mut().push(PanicFrame {
            env: env_ptr as usize,
            defer_base,
        })
    });
    0
}

/// Disarm the most recent panic frame.
#[unsafe(no_mangle)]
pub extern "C" fn __clear_panic_env() -> i64 {
    FRAMES.with(|f| {
        f.borrow_mut().pop();
    });
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn __jmpbuf_size() -> i64 {
    JMPBUF_SIZE
}

/// The value the most recent `__panic` carried.
#[unsafe(no_mangle)]
pub extern "C" fn __get_panic_val() -> i64 {
    PANIC_VALUE.with(|v| v.get())
}

fn trace_should_print() -> bool {
    TRACE_PRINT.with(|cached| {
        if let Some(v) = cached.get() {
            return v;
        }
        let v = std::env::var("NYTRIX_TRACE_VERBOSE").is_ok_and(|s| !s.is_empty() && s != "0");
        cached.set(Some(v));
        v
    })
}

fn print_str(out: &mut String, word: i64) {
    if is_string(word) {
        out.push_str(&String::from_utf8_lossy(str_bytes(word)));
    }
}

fn print_loc(file: i64, line: i64, col: i64, func: i64, prefix: &str) {
    if !is_string(file) {
        return;
    }
    let mut text = String::from(prefix);
    print_str(&mut text, file);
    let l = if is_tagged_int(line) { line >> 1 } else { 0 };
    let c = if is_tagged_int(col) { col >> 1 } else { 0 };
    text.push_str(&format!(":{l}:{c}"));
    if is_string(func) {
        text.push_str(" (fn ");
        print_str(&mut text, func);
        text.push(')');
    }
    eprintln!("{text}");
}

/// Record the current source location and push it into the trace ring.
#[unsafe(no_mangle)]
pub extern "C" fn __trace_loc(file: i64, line: i64, col: i64) -> i64 {
    TRACE.with(|t| {
        let mut t = t.borrow_mut();
        t.file = file;
        t.line = line;
        t.col = col;
        let func = t.func;
        let idx = t.idx;
        t.ring[idx] = TraceSlot {
            file,
            line,
            col,
            func,
        };
        t.idx = (idx + 1) % TRACE_RING;
        if t.len < TRACE_RING {
            t.len += 1;
        }
    });
    if trace_should_print() {
        TRACE.with(|t| {
            let t = t.borrow();
            print_loc(t.file, t.line, t.col, t.func, "[trace] ");
        });
    }
    0
}

/// Record the currently-executing function name.
#[unsafe(no_mangle)]
pub extern "C" fn __trace_func(name: i64) -> i64 {
    TRACE.with(|t| t.borrow_mut().func = name);
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn __trace_last_file() -> i64 {
    TRACE.with(|t| t.borrow().file)
}

#[unsafe(no_mangle)]
pub extern "C" fn __trace_last_line() -> i64 {
    TRACE.with(|t| t.borrow().line)
}

#[unsafe(no_mangle)]
pub extern "C" fn __trace_last_col() -> i64 {
    TRACE.with(|t| t.borrow().col)
}

#[unsafe(no_mangle)]
pub extern "C" fn __trace_last_func() -> i64 {
    TRACE.with(|t| t.borrow().func)
}

/// Dump up to `count` trace-ring entries (0 means all), oldest first.
#[unsafe(no_mangle)]
pub extern "C" fn __trace_dump(count: i64) -> i64 {
    TRACE.with(|t| {
        let t = t.borrow();
        if t.len == 0 {
            return;
        }
        let mut want = untag_int(count) as usize;
        if want == 0 || want > t.len {
            want = t.len;
        }
        let start = (t.idx + TRACE_RING - want) % TRACE_RING;
        for i in 0..want {
            let slot = t.ring[(start + i) % TRACE_RING];
            print_loc(slot.file, slot.line, slot.col, slot.func, "  at ");
        }
    });
    0
}

/// Raise a panic carrying `msg_word`.
///
/// With an armed frame: stash the value, unwind defers to the frame's
/// saved length, `longjmp` with 1 (control resumes at the frame's
/// `setjmp`, which sees a nonzero return and branches to the handler).
/// Without one: report and exit(1).
#[unsafe(no_mangle)]
pub extern "C" fn __panic(msg_word: i64) -> i64 {
    let frame = FRAMES.with(|f| {
        let frames = f.borrow();
        frames
            .last()
            .map(|top| (top.env, top.defer_base))
    });
    if let Some((env, defer_base)) = frame {
        PANIC_VALUE.with(|v| v.set(msg_word));
        run_defers_to(defer_base);
        unsafe { longjmp(env as *mut libc::c_void, 1) };
    }
    TRACE.with(|t| {
        let t = t.borrow();
        if is_string(t.file) {
            eprint!("Panic location: ");
            print_loc(t.file, t.line, t.col, t.func, "");
        }
    });
    if is_tagged_int(msg_word) {
        eprintln!("Panic: <integer value> {} (raw)", msg_word);
    } else if is_string(msg_word) {
        let len = str_len(msg_word);
        let bytes = unsafe { std::slice::from_raw_parts(msg_word as usize as *const u8, len) };
        eprintln!("Panic: {}", String::from_utf8_lossy(bytes));
    } else {
        eprintln!("Panic: <unknown type> {:x} (raw)", msg_word);
    }
    __trace_dump(0);
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ny_core::value::tag_int;
    use serial_test::serial;
    use std::sync::atomic::{AtomicI64, Ordering};

    static DEFER_LOG: AtomicI64 = AtomicI64::new(0);

    extern "C" fn log_defer(env: i64) -> i64 {
        // Record call order: shift previous log and append this env's value.
        let prev = DEFER_LOG.load(Ordering::SeqCst);
        DEFER_LOG.store(prev * 10 + untag_int(env), Ordering::SeqCst);
        0
    }

    fn defer_word() -> i64 {
        log_defer as usize as i64
    }

    #[test]
    #[serial]
    fn defers_run_in_lifo_order() {
        DEFER_LOG.store(0, Ordering::SeqCst);
        __push_defer(defer_word(), tag_int(1));
        __push_defer(defer_word(), tag_int(2));
        __push_defer(defer_word(), tag_int(3));
        __pop_run_defer();
        __pop_run_defer();
        __pop_run_defer();
        assert_eq!(DEFER_LOG.load(Ordering::SeqCst), 321);
    }

    #[test]
    fn pop_on_empty_defer_stack_is_noop() {
        __pop_run_defer();
    }

    #[test]
    #[serial]
    fn panic_frame_records_defer_base() {
        DEFER_LOG.store(0, Ordering::SeqCst);
        __push_defer(defer_word(), tag_int(7));
        __set_panic_env(0x4000);
        // Defers registered after the frame would be unwound by a panic;
        // here we just disarm and verify the earlier entry is untouched.
        __clear_panic_env();
        assert_eq!(DEFER_LOG.load(Ordering::SeqCst), 0);
        __pop_run_defer();
        assert_eq!(DEFER_LOG.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn panic_value_round_trips() {
        PANIC_VALUE.with(|v| v.set(tag_int(99)));
        assert_eq!(__get_panic_val(), tag_int(99));
    }

    #[test]
    fn jmpbuf_size_is_generous() {
        assert!(__jmpbuf_size() >= 256);
    }

    #[test]
    fn trace_ring_overwrites_oldest() {
        let file = crate::strings::make_heap_str(b"t.ny");
        for i in 0..40 {
            __trace_loc(file, tag_int(i), tag_int(1));
        }
        TRACE.with(|t| {
            let t = t.borrow();
            assert_eq!(t.len, TRACE_RING);
            // Oldest surviving entry is line 40 - 32 = 8.
            let start = t.idx; // full ring: idx points at the oldest
            assert_eq!(t.ring[start].line, tag_int(8));
        });
        crate::memory::__free(file);
    }
}
