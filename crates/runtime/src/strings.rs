//! String primitives
//!
//! Heap strings are sentinel-framed blocks with tag 241 (or 243 for
//! compiler-emitted constants), a tagged length at `p-16`, and a NUL byte
//! at `p[len]`. `__str_concat` renders non-string operands first, so it
//! doubles as the f-string accumulator.

use ny_core::heap::{OFF_LEN, OFF_TAG, write_header};
use ny_core::value::{
    FALSE_WORD, TRUE_WORD, is_float, is_heap_pointer, is_pointer, is_string, is_tagged_int,
    tag_int, TAG_FLOAT, TAG_STR,
};

use crate::math::__flt_unbox_val;
use crate::memory::__malloc;

/// Allocate a fresh heap string holding `bytes` (plus a NUL terminator).
pub(crate) fn make_heap_str(bytes: &[u8]) -> i64 {
    let res = __malloc(tag_int(bytes.len() as i64 + 1));
    if res == 0 {
        return 0;
    }
    unsafe {
        write_header(res, OFF_TAG, TAG_STR);
        write_header(res, OFF_LEN, tag_int(bytes.len() as i64));
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), res as usize as *mut u8, bytes.len());
        ((res as usize + bytes.len()) as *mut u8).write(0);
    }
    res
}

pub(crate) fn str_len(v: i64) -> usize {
    if !is_string(v) {
        return 0;
    }
    let raw = unsafe { ny_core::heap::read_header(v, OFF_LEN) };
    if is_tagged_int(raw) { (raw >> 1) as usize } else { 0 }
}

pub(crate) fn str_bytes<'a>(v: i64) -> &'a [u8] {
    let len = str_len(v);
    unsafe { std::slice::from_raw_parts(v as usize as *const u8, len) }
}

/// Render a word for concatenation: strings pass through, everything else
/// formats into the scratch buffer.
fn render(v: i64, scratch: &mut String) -> bool {
    scratch.clear();
    if is_string(v) {
        return true;
    }
    if is_tagged_int(v) {
        use std::fmt::Write as _;
        let _ = write!(scratch, "{}", v >> 1);
        return false;
    }
    if is_float(v) {
        use std::fmt::Write as _;
        let d = f64::from_bits(__flt_unbox_val(v) as u64);
        let _ = write!(scratch, "{}", fmt_g(d));
        return false;
    }
    let text = match v {
        TRUE_WORD => "true",
        FALSE_WORD => "false",
        0 => "none",
        _ => {
            use std::fmt::Write as _;
            let _ = write!(scratch, "<ptr {:#x}>", v);
            return false;
        }
    };
    scratch.push_str(text);
    false
}

/// `%g`-style float formatting: integral values print without a trailing
/// `.0`, matching what generated programs expect from `to_str`.
fn fmt_g(d: f64) -> String {
    if d.is_finite() && d == d.trunc() && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        format!("{}", d)
    }
}

/// Concatenate two values, rendering non-strings first. Returns a fresh
/// heap string, or 0 on allocation failure.
#[unsafe(no_mangle)]
pub extern "C" fn __str_concat(a: i64, b: i64) -> i64 {
    let mut buf_a = String::new();
    let mut buf_b = String::new();
    let a_is_str = render(a, &mut buf_a);
    let b_is_str = render(b, &mut buf_b);
    let sa: &[u8] = if a_is_str { str_bytes(a) } else { buf_a.as_bytes() };
    let sb: &[u8] = if b_is_str { str_bytes(b) } else { buf_b.as_bytes() };
    let mut joined = Vec::with_capacity(sa.len() + sb.len());
    joined.extend_from_slice(sa);
    joined.extend_from_slice(sb);
    make_heap_str(&joined)
}

/// Produce a new heap string rendering of any word.
#[unsafe(no_mangle)]
pub extern "C" fn __to_str(v: i64) -> i64 {
    match v {
        0 => return make_heap_str(b"none"),
        TRUE_WORD => return make_heap_str(b"true"),
        FALSE_WORD => return make_heap_str(b"false"),
        _ => {}
    }
    if is_tagged_int(v) {
        return make_heap_str(format!("{}", v >> 1).as_bytes());
    }
    if (v & 3) == 2 {
        return make_heap_str(format!("<fn {:#x}>", v & !3).as_bytes());
    }
    if is_string(v) {
        return v;
    }
    if is_heap_pointer(v) {
        let tag = unsafe { ny_core::heap::type_tag(v) };
        if tag == TAG_FLOAT {
            let d = f64::from_bits(__flt_unbox_val(v) as u64);
            return make_heap_str(fmt_g(d).as_bytes());
        }
        return make_heap_str(format!("<ptr {:#x} tag={}>", v, tag).as_bytes());
    }
    if is_pointer(v) {
        return make_heap_str(format!("<ptr {:#x}>", v).as_bytes());
    }
    __to_str(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::__free;
    use ny_core::value::is_string;

    fn as_str(v: i64) -> String {
        String::from_utf8_lossy(str_bytes(v)).into_owned()
    }

    #[test]
    fn to_str_renders_singletons() {
        for (w, expect) in [(0i64, "none"), (TRUE_WORD, "true"), (FALSE_WORD, "false")] {
            let s = __to_str(w);
            assert!(is_string(s));
            assert_eq!(as_str(s), expect);
            __free(s);
        }
    }

    #[test]
    fn to_str_renders_ints() {
        let s = __to_str(tag_int(-42));
        assert_eq!(as_str(s), "-42");
        __free(s);
    }

    #[test]
    fn to_str_is_identity_on_strings() {
        let s = make_heap_str(b"abc");
        assert_eq!(__to_str(s), s);
        __free(s);
    }

    #[test]
    fn to_str_renders_floats_without_trailing_zero() {
        let f = crate::math::__flt_box_val(3.0f64.to_bits() as i64);
        let s = __to_str(f);
        assert_eq!(as_str(s), "3");
        __free(s);
        __free(f);
        let f = crate::math::__flt_box_val(2.5f64.to_bits() as i64);
        let s = __to_str(f);
        assert_eq!(as_str(s), "2.5");
        __free(s);
        __free(f);
    }

    #[test]
    fn concat_two_strings() {
        let a = make_heap_str(b"foo");
        let b = make_heap_str(b"bar");
        let c = __str_concat(a, b);
        assert!(is_string(c));
        assert_eq!(as_str(c), "foobar");
        assert_eq!(str_len(c), 6);
        // NUL terminator sits at c[len].
        assert_eq!(unsafe { ((c as usize + 6) as *const u8).read() }, 0);
        __free(a);
        __free(b);
        __free(c);
    }

    #[test]
    fn concat_renders_mixed_operands() {
        let a = make_heap_str(b"n=");
        let c = __str_concat(a, tag_int(7));
        assert_eq!(as_str(c), "n=7");
        __free(a);
        __free(c);
        let c = __str_concat(tag_int(1), TRUE_WORD);
        assert_eq!(as_str(c), "1true");
        __free(c);
    }

    #[test]
    fn heap_strings_satisfy_the_string_predicate() {
        let s = make_heap_str(b"hello");
        assert!(is_string(s));
        assert!(ny_core::value::is_heap_pointer(s));
        __free(s);
    }
}
