//! Address-readability oracle
//!
//! The value predicates must be able to ask "can I read `n` bytes at `p`?"
//! about completely untrusted words without segfaulting. On Linux the
//! answer comes from a cached scan of `/proc/self/maps`; on macOS the
//! kernel is asked directly through `mach_vm_region`, which reports the
//! protection bits of each region covering the range. Other platforms fall
//! back to the weaker `mincore(2)` residency probe.
//!
//! The Linux cache is per-thread: a small direct-mapped slot array keyed on
//! the page of the queried address, backed by a parsed snapshot of the
//! mapping table. The snapshot refreshes when a lookup misses and
//! periodically after [`REFRESH_INTERVAL`] queries, so long-running
//! programs observe fresh mmap/munmap activity without rescanning on every
//! call.

#[cfg(target_os = "linux")]
use std::cell::RefCell;

#[cfg(target_os = "linux")]
const SLOT_COUNT: usize = 64;
#[cfg(target_os = "linux")]
const MAP_CACHE_CAP: usize = 1024;
#[cfg(target_os = "linux")]
const REFRESH_INTERVAL: u32 = 16384;

/// Addresses at or below this are never considered readable (null page lane).
const MIN_ADDR: usize = 0x1000;

#[cfg(target_os = "linux")]
#[derive(Clone, Copy, Default)]
struct Slot {
    lo: usize,
    hi: usize,
    valid: bool,
}

#[cfg(target_os = "linux")]
#[derive(Clone, Copy)]
struct Region {
    lo: usize,
    hi: usize,
    readable: bool,
}

#[cfg(target_os = "linux")]
struct ProbeCache {
    slots: [Slot; SLOT_COUNT],
    regions: Vec<Region>,
    query_count: u32,
}

#[cfg(target_os = "linux")]
impl ProbeCache {
    fn new() -> Self {
        ProbeCache {
            slots: [Slot::default(); SLOT_COUNT],
            regions: Vec::new(),
            query_count: 0,
        }
    }
}

#[cfg(target_os = "linux")]
thread_local! {
    static PROBE: RefCell<ProbeCache> = RefCell::new(ProbeCache::new());
}

/// True if every byte of `p .. p + n` is mapped readable.
///
/// Never dereferences the candidate range; consults the mapping oracle only.
pub fn addr_readable(p: usize, n: usize) -> bool {
    if p < MIN_ADDR || n == 0 {
        return false;
    }
    let Some(end) = p.checked_add(n) else {
        return false;
    };
    #[cfg(target_os = "linux")]
    {
        PROBE.with(|cache| readable_via_maps(&mut cache.borrow_mut(), p, end))
    }
    #[cfg(target_os = "macos")]
    {
        mach::readable_via_vm_region(p, end)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = end;
        addr_mapped(p, n)
    }
}

#[cfg(target_os = "linux")]
fn readable_via_maps(cache: &mut ProbeCache, p: usize, end: usize) -> bool {
    let slot_idx = (p >> 12) & (SLOT_COUNT - 1);
    let slot = cache.slots[slot_idx];
    if slot.valid && p >= slot.lo && end <= slot.hi {
        return true;
    }

    let mut need_refresh = cache.regions.is_empty();
    if !need_refresh {
        cache.query_count += 1;
        if cache.query_count >= REFRESH_INTERVAL {
            need_refresh = true;
            cache.query_count = 0;
        }
    }

    for attempt in 0..2 {
        if need_refresh {
            if !refresh_regions(&mut cache.regions) {
                return addr_mapped(p, end - p);
            }
            need_refresh = false;
        }
        match scan_regions(&cache.regions, p, end) {
            ScanResult::Readable { span_lo, span_hi } => {
                cache.slots[slot_idx] = Slot {
                    lo: span_lo,
                    hi: span_hi,
                    valid: true,
                };
                return true;
            }
            ScanResult::Unreadable => return false,
            ScanResult::Unmapped => {
                if attempt == 0 {
                    // The snapshot may be stale; rescan once before giving up.
                    need_refresh = true;
                    continue;
                }
                return false;
            }
        }
    }
    false
}

#[cfg(target_os = "linux")]
enum ScanResult {
    Readable { span_lo: usize, span_hi: usize },
    Unreadable,
    Unmapped,
}

/// Walk the sorted region table, requiring contiguous readable coverage of
/// `p .. end`.
#[cfg(target_os = "linux")]
fn scan_regions(regions: &[Region], p: usize, end: usize) -> ScanResult {
    let mut idx = regions.partition_point(|r| r.hi <= p);
    let mut cur = p;
    let mut span_lo = p;
    let mut span_set = false;
    while idx < regions.len() {
        let r = regions[idx];
        if r.hi <= cur {
            idx += 1;
            continue;
        }
        if r.lo > cur {
            return ScanResult::Unmapped;
        }
        if !span_set {
            span_lo = r.lo.min(p);
            span_set = true;
        }
        if !r.readable {
            return ScanResult::Unreadable;
        }
        if r.hi >= end {
            return ScanResult::Readable {
                span_lo,
                span_hi: r.hi,
            };
        }
        cur = r.hi;
        idx += 1;
    }
    ScanResult::Unmapped
}

#[cfg(target_os = "linux")]
fn refresh_regions(regions: &mut Vec<Region>) -> bool {
    let Ok(maps) = std::fs::read_to_string("/proc/self/maps") else {
        return false;
    };
    regions.clear();
    for line in maps.lines() {
        if regions.len() >= MAP_CACHE_CAP {
            break;
        }
        let Some(region) = parse_maps_line(line) else {
            continue;
        };
        regions.push(region);
    }
    true
}

#[cfg(target_os = "linux")]
fn parse_maps_line(line: &str) -> Option<Region> {
    // "7f1234560000-7f1234580000 r-xp ..."
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    let (lo_s, hi_s) = range.split_once('-')?;
    let lo = usize::from_str_radix(lo_s, 16).ok()?;
    let hi = usize::from_str_radix(hi_s, 16).ok()?;
    if hi <= lo {
        return None;
    }
    Some(Region {
        lo,
        hi,
        readable: perms.starts_with('r'),
    })
}

/// Weaker residency check: every page of `p .. p + n` is mapped.
///
/// `mincore(2)` only proves mapping presence, not readability; it backs
/// the Linux path when `/proc/self/maps` is unavailable and is the last
/// resort on platforms with no region oracle at all. macOS never takes
/// this path.
#[cfg(not(target_os = "macos"))]
fn addr_mapped(p: usize, n: usize) -> bool {
    if p < MIN_ADDR || n == 0 {
        return false;
    }
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 {
        return true;
    }
    let page = page as usize;
    let mask = page - 1;
    let start = p & !mask;
    let end = (p + n - 1) & !mask;
    let mut cur = start;
    loop {
        let mut vec: u8 = 0;
        let rc = unsafe {
            libc::mincore(
                cur as *mut libc::c_void,
                page,
                &mut vec as *mut u8 as *mut _,
            )
        };
        if rc != 0 {
            return false;
        }
        if cur == end {
            break;
        }
        cur += page;
    }
    true
}

/// macOS region oracle: ask the kernel for the protection of every region
/// covering the candidate range through `mach_vm_region`. A gap between
/// regions, a region without `VM_PROT_READ`, or any kernel error makes the
/// range unreadable.
#[cfg(target_os = "macos")]
mod mach {
    type KernReturn = i32;
    type MachPort = u32;
    type MachVmAddress = u64;
    type MachVmSize = u64;
    type MachMsgTypeNumber = u32;

    const KERN_SUCCESS: KernReturn = 0;
    const VM_PROT_READ: i32 = 1;
    const VM_REGION_BASIC_INFO_64: i32 = 9;
    /// `sizeof(vm_region_basic_info_data_64_t) / sizeof(int)`.
    const VM_REGION_BASIC_INFO_COUNT_64: MachMsgTypeNumber = 9;

    unsafe extern "C" {
        static mach_task_self_: MachPort;
        fn mach_vm_region(
            target_task: MachPort,
            address: *mut MachVmAddress,
            size: *mut MachVmSize,
            flavor: i32,
            info: *mut i32,
            info_count: *mut MachMsgTypeNumber,
            object_name: *mut MachPort,
        ) -> KernReturn;
        fn mach_port_deallocate(task: MachPort, name: MachPort) -> KernReturn;
    }

    pub(super) fn readable_via_vm_region(p: usize, end: usize) -> bool {
        let end = end as u64;
        let mut cur = p as u64;
        while cur < end {
            let mut region_addr: MachVmAddress = cur;
            let mut region_size: MachVmSize = 0;
            // vm_region_basic_info_data_64_t, received as raw words; the
            // protection bits sit in the first one.
            let mut info = [0i32; VM_REGION_BASIC_INFO_COUNT_64 as usize];
            let mut count = VM_REGION_BASIC_INFO_COUNT_64;
            let mut object: MachPort = 0;
            let kr = unsafe {
                mach_vm_region(
                    mach_task_self_,
                    &mut region_addr,
                    &mut region_size,
                    VM_REGION_BASIC_INFO_64,
                    info.as_mut_ptr(),
                    &mut count,
                    &mut object,
                )
            };
            if object != 0 {
                unsafe { mach_port_deallocate(mach_task_self_, object) };
            }
            if kr != KERN_SUCCESS {
                return false;
            }
            // mach_vm_region rounds up to the next region; an address above
            // the query means the queried page itself is unmapped.
            if region_addr > cur {
                return false;
            }
            if info[0] & VM_PROT_READ == 0 {
                return false;
            }
            let region_end = region_addr.saturating_add(region_size);
            if region_end <= cur {
                return false;
            }
            if end <= region_end {
                return true;
            }
            cur = region_end;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_page_never_readable() {
        assert!(!addr_readable(0, 8));
        assert!(!addr_readable(0x10, 8));
        assert!(!addr_readable(0xfff, 1));
    }

    #[test]
    fn zero_length_never_readable() {
        let x = 42u64;
        assert!(!addr_readable(&x as *const u64 as usize, 0));
    }

    #[test]
    fn stack_and_heap_are_readable() {
        let x = 42u64;
        assert!(addr_readable(&x as *const u64 as usize, 8));
        let v = vec![0u8; 4096];
        assert!(addr_readable(v.as_ptr() as usize, v.len()));
    }

    #[test]
    fn wildly_out_of_range_is_not_readable() {
        assert!(!addr_readable(usize::MAX - 16, 8));
    }

    #[test]
    fn repeated_queries_hit_the_slot_cache() {
        let v = vec![7u8; 64];
        let p = v.as_ptr() as usize;
        for _ in 0..1000 {
            assert!(addr_readable(p, 64));
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parses_maps_lines() {
        let r = parse_maps_line("7f0000000000-7f0000001000 r-xp 00000000 00:00 0").unwrap();
        assert_eq!(r.lo, 0x7f0000000000);
        assert_eq!(r.hi, 0x7f0000001000);
        assert!(r.readable);
        let nr = parse_maps_line("7f0000000000-7f0000001000 ---p 00000000 00:00 0").unwrap();
        assert!(!nr.readable);
        assert!(parse_maps_line("garbage").is_none());
    }
}
