//! Fixed-geometry slab arena backing the socket data buffers.
//!
//! The arena is carved into equal slabs tracked by an `i8` index array:
//! `-1` marks a free slab, an allocated run stores a countdown pattern
//! (`n, n-1, .. 1`) so freeing the run only needs its first index to
//! recover the length. Allocation is a first-fit search for a contiguous
//! free run. No allocation happens on the data path once the arena is
//! built.

/// A contiguous allocation inside the arena, addressed by byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabRegion {
    offset: usize,
    len: usize,
}

impl SlabRegion {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Slab allocator over one owned byte arena.
#[derive(Debug)]
pub struct SlabArena {
    slab_size: usize,
    idxs: Box<[i8]>,
    data: Box<[u8]>,
}

impl SlabArena {
    pub fn new(slab_size: usize, num_slabs: usize) -> Self {
        assert!(slab_size > 0 && num_slabs > 0);
        Self {
            slab_size,
            idxs: vec![-1i8; num_slabs].into_boxed_slice(),
            data: vec![0u8; slab_size * num_slabs].into_boxed_slice(),
        }
    }

    pub fn num_slabs(&self) -> usize {
        self.idxs.len()
    }

    pub fn free_slabs(&self) -> usize {
        self.idxs.iter().filter(|&&i| i == -1).count()
    }

    /// Allocate `size` bytes from a contiguous run of slabs.
    pub fn alloc(&mut self, size: usize) -> Option<SlabRegion> {
        if size == 0 {
            return None;
        }
        let req = size.div_ceil(self.slab_size);
        // The countdown pattern caps a single run at i8::MAX slabs.
        if req > i8::MAX as usize {
            return None;
        }

        let mut run = 0;
        let mut start = 0;
        for i in 0..self.idxs.len() {
            if self.idxs[i] == -1 {
                if run == 0 {
                    start = i;
                }
                run += 1;
                if run == req {
                    for k in 0..req {
                        self.idxs[start + k] = (req - k) as i8;
                    }
                    return Some(SlabRegion {
                        offset: start * self.slab_size,
                        len: size,
                    });
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Return a region's slabs to the free pool.
    pub fn free(&mut self, region: SlabRegion) {
        let start = region.offset / self.slab_size;
        if start >= self.idxs.len() {
            return;
        }
        let run = self.idxs[start];
        if run <= 0 {
            return;
        }
        for idx in &mut self.idxs[start..start + run as usize] {
            *idx = -1;
        }
    }

    pub fn slice(&self, region: SlabRegion) -> &[u8] {
        &self.data[region.offset..region.offset + region.len]
    }

    pub fn slice_mut(&mut self, region: SlabRegion) -> &mut [u8] {
        &mut self.data[region.offset..region.offset + region.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_writes_countdown_pattern() {
        let mut arena = SlabArena::new(64, 8);
        let region = arena.alloc(150).unwrap();
        assert_eq!(region.offset, 0);
        assert_eq!(region.len(), 150);
        assert_eq!(&arena.idxs[..4], &[3, 2, 1, -1]);
    }

    #[test]
    fn test_first_fit_skips_allocated_runs() {
        let mut arena = SlabArena::new(64, 8);
        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(128).unwrap();
        arena.free(a);
        // One free slab at the front, but a two-slab run only fits after b.
        let c = arena.alloc(128).unwrap();
        assert_eq!(c.offset / 64, 3);
        let d = arena.alloc(64).unwrap();
        assert_eq!(d.offset, 0);
        let _ = b;
    }

    #[test]
    fn test_free_restores_maximal_allocation() {
        let mut arena = SlabArena::new(32, 10);
        let regions: Vec<_> = (0..5).map(|_| arena.alloc(64).unwrap()).collect();
        assert_eq!(arena.free_slabs(), 0);
        assert!(arena.alloc(32).is_none());
        for r in regions {
            arena.free(r);
        }
        assert_eq!(arena.free_slabs(), 10);
        assert!(arena.alloc(32 * 10).is_some());
    }

    #[test]
    fn test_double_free_is_ignored() {
        let mut arena = SlabArena::new(32, 4);
        let a = arena.alloc(32).unwrap();
        arena.free(a);
        arena.free(a);
        assert_eq!(arena.free_slabs(), 4);
    }

    #[test]
    fn test_slice_round_trip() {
        let mut arena = SlabArena::new(16, 4);
        let r = arena.alloc(20).unwrap();
        arena.slice_mut(r)[..5].copy_from_slice(b"hello");
        assert_eq!(&arena.slice(r)[..5], b"hello");
    }
}
