//! Per-source response deduplication.
//!
//! One bit per IPv4 address, shared by every receive thread. The bitmap is
//! split into 65536 lazily-allocated pages (one per /16) so a scan touching
//! a few prefixes does not pay for the full 512 MiB address space.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Concurrent set of source addresses that already produced a response.
///
/// Implementations must tolerate concurrent `contains`/`insert` from many
/// threads; an insert is idempotent and never disturbs other members.
pub trait SourceSet: Send + Sync {
    /// Whether `addr` has been inserted.
    fn contains(&self, addr: Ipv4Addr) -> bool;

    /// Insert `addr`; returns `true` if it was not already present.
    fn insert(&self, addr: Ipv4Addr) -> bool;

    /// Number of distinct addresses inserted so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const PAGE_COUNT: usize = 1 << 16;
const BITS_PER_PAGE: usize = 1 << 16;
const WORDS_PER_PAGE: usize = BITS_PER_PAGE / 64;

/// Lock-free paged bitmap over the IPv4 address space.
///
/// Pages are published through `OnceLock`; bits are set with `fetch_or`, so
/// racing inserts of the same address agree on exactly one winner.
pub struct PagedBitmap {
    pages: Box<[OnceLock<Box<[AtomicU64]>>]>,
    members: AtomicUsize,
}

impl PagedBitmap {
    pub fn new() -> Self {
        Self {
            pages: (0..PAGE_COUNT).map(|_| OnceLock::new()).collect(),
            members: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn locate(addr: Ipv4Addr) -> (usize, usize, u64) {
        let v = u32::from(addr) as usize;
        let page = v >> 16;
        let offset = v & 0xFFFF;
        (page, offset / 64, 1u64 << (offset % 64))
    }

    /// Number of /16 pages allocated so far.
    pub fn allocated_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.get().is_some()).count()
    }
}

impl Default for PagedBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PagedBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedBitmap")
            .field("members", &self.members.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SourceSet for PagedBitmap {
    fn contains(&self, addr: Ipv4Addr) -> bool {
        let (page, word, mask) = Self::locate(addr);
        match self.pages[page].get() {
            Some(words) => words[word].load(Ordering::Acquire) & mask != 0,
            None => false,
        }
    }

    fn insert(&self, addr: Ipv4Addr) -> bool {
        let (page, word, mask) = Self::locate(addr);
        let words = self.pages[page]
            .get_or_init(|| (0..WORDS_PER_PAGE).map(|_| AtomicU64::new(0)).collect());
        let prev = words[word].fetch_or(mask, Ordering::AcqRel);
        let fresh = prev & mask == 0;
        if fresh {
            self.members.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    fn len(&self) -> usize {
        self.members.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_empty_bitmap_contains_nothing() {
        let set = PagedBitmap::new();
        assert!(!set.contains(Ipv4Addr::new(1, 2, 3, 4)));
        assert!(set.is_empty());
        assert_eq!(set.allocated_pages(), 0, "contains must not allocate");
    }

    #[test]
    fn test_insert_then_contains() {
        let set = PagedBitmap::new();
        let addr = Ipv4Addr::new(203, 0, 113, 7);
        assert!(set.insert(addr), "first insert is fresh");
        assert!(set.contains(addr));
        assert!(!set.insert(addr), "second insert is a duplicate");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_neighbouring_bits_untouched() {
        let set = PagedBitmap::new();
        set.insert(Ipv4Addr::new(10, 0, 0, 64));
        assert!(!set.contains(Ipv4Addr::new(10, 0, 0, 63)));
        assert!(!set.contains(Ipv4Addr::new(10, 0, 0, 65)));
        assert!(!set.contains(Ipv4Addr::new(10, 1, 0, 64)), "other /16 page");
    }

    #[test]
    fn test_address_space_edges() {
        let set = PagedBitmap::new();
        assert!(set.insert(Ipv4Addr::new(0, 0, 0, 0)));
        assert!(set.insert(Ipv4Addr::new(255, 255, 255, 255)));
        assert!(set.contains(Ipv4Addr::new(0, 0, 0, 0)));
        assert!(set.contains(Ipv4Addr::new(255, 255, 255, 255)));
        assert_eq!(set.allocated_pages(), 2);
    }

    #[test]
    fn test_pages_allocated_per_slash16() {
        let set = PagedBitmap::new();
        for host in 0..=255u8 {
            set.insert(Ipv4Addr::new(192, 0, 2, host));
        }
        set.insert(Ipv4Addr::new(198, 51, 100, 1));
        assert_eq!(set.allocated_pages(), 2);
        assert_eq!(set.len(), 257);
    }

    #[test]
    fn test_concurrent_inserts_single_winner() {
        let set = PagedBitmap::new();
        let winners = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for host in 0..=255u8 {
                        if set.insert(Ipv4Addr::new(172, 16, 0, host)) {
                            winners.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        assert_eq!(
            winners.load(Ordering::Relaxed),
            256,
            "each address must be won by exactly one thread"
        );
        assert_eq!(set.len(), 256);
    }
}
