//! Cross-module runtime behavior: the flows generated code actually
//! exercises, driven through the public C ABI the way emitted IR would.

use ny_core::value::{TAG_CLOSURE, is_heap_pointer, is_string, native_encode, tag_int, untag_int};
use ny_runtime::memory::{__free, __load64_idx, __malloc, __store64_idx};
use ny_runtime::object::{__is_ok, __result_ok, __unwrap};
use ny_runtime::strings::{__str_concat, __to_str};
use ny_runtime::{__add, __call1, __call2, __eq, __mul};

fn str_text(word: i64) -> String {
    assert!(is_string(word));
    let len = untag_int(unsafe { ((word - 16) as usize as *const i64).read() });
    let bytes = unsafe { std::slice::from_raw_parts(word as usize as *const u8, len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn list_like_object_round_trip() {
    // Mirrors what std.core.list/append/get compile down to.
    let xs = __malloc(tag_int(4 * 8 + 8));
    __store64_idx(xs, tag_int(-8), tag_int(101));
    __store64_idx(xs, tag_int(-16), tag_int(0));
    for (i, v) in [10i64, 20, 30].iter().enumerate() {
        __store64_idx(xs, tag_int(i as i64 * 8), tag_int(*v));
        __store64_idx(xs, tag_int(-16), tag_int(i as i64 + 1));
    }
    assert_eq!(__load64_idx(xs, tag_int(-16)), tag_int(3));
    assert_eq!(__load64_idx(xs, tag_int(8)), tag_int(20));
    __free(xs);
}

#[test]
fn to_str_feeds_concat() {
    let n = __to_str(tag_int(42));
    let s = __str_concat(n, tag_int(7));
    assert_eq!(str_text(s), "427");
    __free(n);
    __free(s);
}

extern "C" fn add_env(env: i64, x: i64) -> i64 {
    __add(env, x)
}

#[test]
fn closure_dispatch_matches_direct_call() {
    let cls = __malloc(tag_int(16));
    assert!(is_heap_pointer(cls));
    __store64_idx(cls, tag_int(-8), TAG_CLOSURE);
    __store64_idx(cls, tag_int(0), (add_env as usize as i64) | 2);
    __store64_idx(cls, tag_int(8), tag_int(40));
    let via_dispatch = __call1(cls, tag_int(2));
    assert_eq!(via_dispatch, tag_int(42));
    assert_eq!(via_dispatch, add_env(tag_int(40), tag_int(2)));
    __free(cls);
}

extern "C" fn raw_mul(a: i64, b: i64) -> i64 {
    a * b
}

#[test]
fn native_dispatch_untags_and_retags() {
    let f = native_encode(raw_mul as usize);
    assert_eq!(__call2(f, tag_int(6), tag_int(7)), tag_int(42));
}

#[test]
fn result_boxes_flow_through_eq() {
    let ok = __result_ok(tag_int(5));
    assert_eq!(__is_ok(ok), 2);
    assert_eq!(__unwrap(ok), tag_int(5));
    assert_eq!(__eq(__unwrap(ok), tag_int(5)), 2);
    __free(ok);
}

#[test]
fn arithmetic_composes() {
    // (6 * 7) + 0 stays tagged through the chain.
    let prod = __mul(tag_int(6), tag_int(7));
    assert_eq!(__add(prod, tag_int(0)), tag_int(42));
}
