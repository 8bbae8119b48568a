//! Tag helpers and result objects
//!
//! The small word-level utilities generated code leans on: explicit
//! tag/untag, the type predicates as callable symbols, `Ok`/`Err` result
//! boxes (tags 201/202), and the keyword-argument pair used when packaging
//! variadic calls.

use ny_core::heap::{OFF_LEN, OFF_TAG, write_header};
use ny_core::value::{
    FALSE_WORD, TAG_ERR, TAG_OK, TRUE_WORD, is_float, is_pointer, is_string, is_tagged_int,
    tag_int, untag_int,
};

use crate::memory::__malloc;

/// Keyword-argument pair object: `(name, value)` under this tag, consumed
/// by stdlib code that unpacks variadic argument lists.
pub const TAG_KWARG: i64 = 107;

/// Process-wide globals pointer handed between program phases; starts as
/// the tagged zero.
static GLOBALS_PTR: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(1);

#[unsafe(no_mangle)]
pub extern "C" fn __globals() -> i64 {
    GLOBALS_PTR.load(std::sync::atomic::Ordering::SeqCst)
}

#[unsafe(no_mangle)]
pub extern "C" fn __set_globals(p: i64) -> i64 {
    GLOBALS_PTR.store(p, std::sync::atomic::Ordering::SeqCst);
    p
}

#[inline]
fn bool_word(b: bool) -> i64 {
    if b { TRUE_WORD } else { FALSE_WORD }
}

#[unsafe(no_mangle)]
pub extern "C" fn __tag(v: i64) -> i64 {
    tag_int(v)
}

#[unsafe(no_mangle)]
pub extern "C" fn __untag(v: i64) -> i64 {
    untag_int(v)
}

#[unsafe(no_mangle)]
pub extern "C" fn __is_int(v: i64) -> i64 {
    bool_word(is_tagged_int(v))
}

#[unsafe(no_mangle)]
pub extern "C" fn __is_ptr(v: i64) -> i64 {
    bool_word(is_pointer(v))
}

#[unsafe(no_mangle)]
pub extern "C" fn __is_str(v: i64) -> i64 {
    bool_word(is_string(v))
}

#[unsafe(no_mangle)]
pub extern "C" fn __is_flt(v: i64) -> i64 {
    bool_word(is_float(v))
}

fn result_box(tag: i64, payload: i64) -> i64 {
    let res = __malloc(tag_int(8));
    if res == 0 {
        return 0;
    }
    unsafe {
        write_header(res, OFF_TAG, tag);
        write_header(res, OFF_LEN, tag_int(8));
        (res as usize as *mut i64).write(payload);
    }
    res
}

/// Wrap a word under tag 201.
#[unsafe(no_mangle)]
pub extern "C" fn __result_ok(v: i64) -> i64 {
    result_box(TAG_OK, v)
}

/// Wrap a word under tag 202.
#[unsafe(no_mangle)]
pub extern "C" fn __result_err(e: i64) -> i64 {
    result_box(TAG_ERR, e)
}

fn has_result_tag(v: i64, want: i64) -> bool {
    if !is_pointer(v) {
        return false;
    }
    let tp = (v as usize).wrapping_sub(8);
    if !ny_core::probe::addr_readable(tp, 8) {
        return false;
    }
    unsafe { ny_core::heap::type_tag(v) == want }
}

#[unsafe(no_mangle)]
pub extern "C" fn __is_ok(v: i64) -> i64 {
    bool_word(has_result_tag(v, TAG_OK))
}

#[unsafe(no_mangle)]
pub extern "C" fn __is_err(v: i64) -> i64 {
    bool_word(has_result_tag(v, TAG_ERR))
}

/// Read the payload of a result box; non-results pass through unchanged.
#[unsafe(no_mangle)]
pub extern "C" fn __unwrap(v: i64) -> i64 {
    if has_result_tag(v, TAG_OK) || has_result_tag(v, TAG_ERR) {
        return unsafe { (v as usize as *const i64).read() };
    }
    v
}

/// Package a named argument as a two-slot tag-107 object.
#[unsafe(no_mangle)]
pub extern "C" fn __kwarg(name: i64, value: i64) -> i64 {
    let res = __malloc(tag_int(16));
    if res == 0 {
        return 0;
    }
    unsafe {
        write_header(res, OFF_TAG, TAG_KWARG);
        write_header(res, OFF_LEN, tag_int(16));
        (res as usize as *mut i64).write(name);
        ((res as usize + 8) as *mut i64).write(value);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::__free;

    #[test]
    fn tag_untag_symbols() {
        assert_eq!(__tag(21), tag_int(21));
        assert_eq!(__untag(tag_int(21)), 21);
        assert_eq!(__untag(0x4000), 0x4000);
    }

    #[test]
    fn predicates_return_bool_words() {
        assert_eq!(__is_int(tag_int(3)), TRUE_WORD);
        assert_eq!(__is_int(0x4000), FALSE_WORD);
        assert_eq!(__is_ptr(0x4000), TRUE_WORD);
        assert_eq!(__is_ptr(tag_int(3)), FALSE_WORD);
    }

    #[test]
    fn result_round_trip() {
        let ok = __result_ok(tag_int(5));
        assert_eq!(__is_ok(ok), TRUE_WORD);
        assert_eq!(__is_err(ok), FALSE_WORD);
        assert_eq!(__unwrap(ok), tag_int(5));
        let err = __result_err(tag_int(-1));
        assert_eq!(__is_err(err), TRUE_WORD);
        assert_eq!(__unwrap(err), tag_int(-1));
        __free(ok);
        __free(err);
    }

    #[test]
    fn unwrap_passes_non_results_through() {
        assert_eq!(__unwrap(tag_int(9)), tag_int(9));
        assert_eq!(__unwrap(0), 0);
    }

    #[test]
    fn globals_slot_round_trips() {
        assert_eq!(__globals(), 1);
        __set_globals(0x4000);
        assert_eq!(__globals(), 0x4000);
        __set_globals(1);
    }

    #[test]
    fn kwarg_holds_both_slots() {
        let name = crate::strings::make_heap_str(b"k");
        let kw = __kwarg(name, tag_int(4));
        assert_eq!(unsafe { (kw as usize as *const i64).read() }, name);
        assert_eq!(
            unsafe { ((kw as usize + 8) as *const i64).read() },
            tag_int(4)
        );
        __free(kw);
        __free(name);
    }
}
