//! String interning
//!
//! Each distinct literal becomes a private byte-array global laid out like
//! a heap string: a 64-byte header carrying the tagged length at offset 48
//! and the constant-string tag at offset 56, then the payload, a NUL, and a
//! 16-byte zero tail.
//!
//! The heap magics are deliberately NOT written: with them present the
//! runtime would treat the global as a heap pointer and the allocator's
//! strict bounds checks would refuse header-relative access. Without them
//! it classifies as a raw pointer that is still string-valid through the
//! tag and length fields.
//!
//! Alongside the array, an internal i64 global holds the payload address.
//! It is statically initialized (so ahead-of-time binaries work without
//! running the init block) and re-stored at `__script_top` init time
//! through an opaque inline-asm identity that blocks constant folding.

use ny_core::value::{TAG_STR_CONST, tag_int};

use super::state::{CodeGen, Intern};

const HEADER: usize = 64;
const TAIL: usize = 16;

impl<'p> CodeGen<'p> {
    /// Intern `bytes`, returning the name of the i64 indirection global.
    pub(super) fn const_string_ptr(&mut self, bytes: &[u8]) -> String {
        if let Some(existing) = self.interns.iter().find(|i| i.bytes == bytes) {
            return existing.rt_name.clone();
        }
        let id = self.interns.len();
        let array_name = format!("@.str.{id}");
        let rt_name = format!("@.str.rt.{id}");
        let total_len = HEADER + bytes.len() + 1 + TAIL;

        let mut data = vec![0u8; total_len];
        data[48..56].copy_from_slice(&tag_int(bytes.len() as i64).to_le_bytes());
        data[56..64].copy_from_slice(&TAG_STR_CONST.to_le_bytes());
        data[HEADER..HEADER + bytes.len()].copy_from_slice(bytes);

        self.str_globals.push_str(&format!(
            "{array_name} = private unnamed_addr constant [{total_len} x i8] c\"{}\", align 64\n",
            escape_bytes(&data)
        ));
        self.str_globals.push_str(&format!(
            "{rt_name} = internal global i64 ptrtoint (ptr getelementptr inbounds ([{total_len} x i8], ptr {array_name}, i64 0, i64 {HEADER}) to i64)\n",
        ));

        self.interns.push(Intern {
            bytes: bytes.to_vec(),
            array_name,
            rt_name: rt_name.clone(),
            total_len,
        });
        rt_name
    }

    /// Emit the init-block stores that refresh every intern's indirection
    /// global at startup. The identity asm keeps LLVM from folding the
    /// store away and letting later loads constant-propagate.
    pub(super) fn emit_intern_init(&mut self) {
        let interns: Vec<(String, String, usize)> = self
            .interns
            .iter()
            .map(|i| (i.array_name.clone(), i.rt_name.clone(), i.total_len))
            .collect();
        for (array, rt, _) in interns {
            let base = self.tmp();
            self.emit(format!(
                "{base} = call ptr asm \"\", \"=r,0\"(ptr {array})"
            ));
            let payload = self.tmp();
            self.emit(format!(
                "{payload} = getelementptr inbounds i8, ptr {base}, i64 {HEADER}"
            ));
            let as_int = self.tmp();
            self.emit(format!("{as_int} = ptrtoint ptr {payload} to i64"));
            self.emit(format!("store i64 {as_int}, ptr {rt}"));
        }
    }
}

/// Render bytes as an LLVM `c"…"` body: printable ASCII stays literal,
/// everything else is `\XX`.
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Program;
    use crate::config::CompilerConfig;

    #[test]
    fn escape_rules() {
        assert_eq!(escape_bytes(b"abc"), "abc");
        assert_eq!(escape_bytes(b"a\nb"), "a\\0Ab");
        assert_eq!(escape_bytes(b"\""), "\\22");
        assert_eq!(escape_bytes(b"\\"), "\\5C");
        assert_eq!(escape_bytes(&[0]), "\\00");
    }

    #[test]
    fn interning_dedupes_and_lays_out_header() {
        let prog = Program::default();
        let mut cg = CodeGen::new(&prog, CompilerConfig::default());
        let a = cg.const_string_ptr(b"hello");
        let b = cg.const_string_ptr(b"hello");
        assert_eq!(a, b);
        assert_eq!(cg.interns.len(), 1);
        // 64 header + 5 payload + NUL + 16 tail.
        assert_eq!(cg.interns[0].total_len, 86);
        // Tagged length 5 -> 11, little-endian at offset 48.
        assert!(cg.str_globals.contains("\\0B"));
        // Constant-string tag 243 = 0xF3 at offset 56.
        assert!(cg.str_globals.contains("\\F3"));
        assert!(cg.str_globals.contains("align 64"));
        assert!(cg.str_globals.contains("internal global i64 ptrtoint"));
    }
}
