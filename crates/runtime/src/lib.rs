//! Nytrix runtime
//!
//! Every symbol generated code links against lives here, exported with the
//! C ABI over bare tagged `i64` words (see `ny-core` for the encoding).
//!
//! Design rules:
//! - **Refusal, not traps**: malformed input makes an operation return a
//!   neutral word (0, 1, or the original value). The runtime never raises;
//!   the only nonlocal exit is the explicit panic channel in [`panic`].
//! - Per-thread state: the defer stack, panic frames, and trace ring are
//!   `thread_local!`. The allocator and the args table are process-wide.
//! - No Rust panics may cross the C ABI; internal code avoids `unwrap` on
//!   anything derived from user words.

pub mod args;
pub mod ffi;
pub mod math;
pub mod memory;
pub mod object;
pub mod os;
pub mod panic;
pub mod strings;

// Re-export the pieces tests and the compiler driver reach for directly.
pub use ffi::{__call0, __call1, __call2, __dlclose, __dlerror, __dlopen, __dlsym, __tag_native};
pub use math::{
    __add, __and, __div, __eq, __flt_box_val, __flt_unbox_val, __ge, __gt, __le, __lt, __mod,
    __mul, __not, __or, __rand64, __shl, __shr, __srand, __sub, __xor,
};
pub use memory::{__free, __load64_idx, __malloc, __memcmp, __memcpy, __memset, __realloc,
    __store64_idx};
pub use object::{__is_err, __is_ok, __result_err, __result_ok, __unwrap};
pub use panic::{
    __clear_panic_env, __get_panic_val, __jmpbuf_size, __panic, __pop_run_defer, __push_defer,
    __set_panic_env, __trace_dump, __trace_func, __trace_loc,
};
pub use strings::{__str_concat, __to_str};
