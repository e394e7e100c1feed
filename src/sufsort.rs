//! Suffix indexing over the old buffer.
//!
//! The array holds `|old| + 1` signed 32-bit offsets: the sentinel slot
//! for the empty suffix first (it sorts before everything), then every
//! real suffix in lexicographic order as produced by divsufsort. Built
//! once per job, never mutated afterward.

use std::cmp::Ordering;
use std::thread;

use tracing::debug;

use crate::{DiffError, DiffParams};

pub(crate) struct SuffixIndex<'o> {
    obuf: &'o [u8],
    sa: Vec<i32>,
}

pub(crate) struct SearchResult {
    pub start: usize,
    pub len: usize,
}

impl<'o> SuffixIndex<'o> {
    pub fn new(obuf: &'o [u8], params: &DiffParams) -> Result<Self, DiffError> {
        let workers = resolve_concurrency(params.suffix_sort_concurrency);
        if workers > 1 {
            debug!(
                workers,
                "parallel suffix sort requested; sort routine is sequential, width is advisory"
            );
        }

        let mut sa = Vec::with_capacity(obuf.len() + 1);
        sa.push(obuf.len() as i32);
        if !obuf.is_empty() {
            sa.extend(divsufsort::sort(obuf).into_parts().1);
        }
        if sa.len() != obuf.len() + 1 {
            return Err(DiffError::Indexer(format!(
                "suffix array has {} entries for a {} byte input",
                sa.len(),
                obuf.len()
            )));
        }

        if params.measure_parallel_overhead && workers > 1 {
            debug!("parallel indexing overhead: none (sequential sort)");
        }

        Ok(SuffixIndex { obuf, sa })
    }

    #[inline]
    fn suffix(&self, i: usize) -> &[u8] {
        &self.obuf[self.sa[i] as usize..]
    }

    /// Longest prefix of `q` that occurs somewhere in the old buffer.
    ///
    /// Binary search: a comparison tie descends into the lower half, and
    /// of the two final candidates the lower index wins a tied prefix
    /// length only when it is strictly longer. Cost is O(log |old|)
    /// suffix comparisons, each bounded by the match length.
    pub fn search(&self, q: &[u8]) -> SearchResult {
        let (mut lo, mut hi) = (0_usize, self.sa.len() - 1);
        while hi - lo >= 2 {
            let mid = lo + (hi - lo) / 2;
            if self.suffix(mid).cmp(q) == Ordering::Less {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let x = matchlen(self.suffix(lo), q);
        let y = matchlen(self.suffix(hi), q);
        if x > y {
            SearchResult {
                start: self.sa[lo] as usize,
                len: x,
            }
        } else {
            SearchResult {
                start: self.sa[hi] as usize,
                len: y,
            }
        }
    }
}

/// Length of the common prefix of `a` and `b`.
pub(crate) fn matchlen(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|&(x, y)| x == y).count()
}

/// Maps the `suffix_sort_concurrency` option to a worker count:
/// 0 is sequential, positive counts are taken as-is, negative counts are
/// relative to the number of cores (never below 1).
pub(crate) fn resolve_concurrency(k: i32) -> usize {
    if k == 0 {
        return 1;
    }
    if k > 0 {
        return k as usize;
    }
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    cores.saturating_sub(k.unsigned_abs() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_sa(s: &[u8]) -> Vec<i32> {
        let mut sa: Vec<i32> = (0..=s.len() as i32).collect();
        sa.sort_by_key(|&i| &s[i as usize..]);
        sa
    }

    fn index(s: &[u8]) -> SuffixIndex<'_> {
        SuffixIndex::new(s, &DiffParams::default()).unwrap()
    }

    #[test]
    fn array_matches_naive_sort() {
        let samples: &[&[u8]] = &[
            b"",
            b"a",
            b"banana",
            b"abracadabra",
            b"aaaaaaaa",
            b"the quick brown fox",
            &[0, 255, 0, 255, 128, 0],
        ];
        for &s in samples {
            assert_eq!(index(s).sa, naive_sa(s), "input {s:?}");
        }
    }

    #[test]
    fn search_finds_every_substring() {
        let o = b"the quick brown fox jumps over the lazy dog";
        let idx = index(o);
        for start in 0..o.len() {
            for end in start..=o.len() {
                let q = &o[start..end];
                let res = idx.search(q);
                assert_eq!(res.len, q.len());
                assert_eq!(&o[res.start..res.start + res.len], q);
            }
        }
    }

    #[test]
    fn search_returns_longest_partial_prefix() {
        let o = b"the quick brown fox jumps over the lazy dog";
        let idx = index(o);

        let res = idx.search(b"the lazy cat");
        assert_eq!(res.len, "the lazy ".len());
        assert_eq!(&o[res.start..res.start + res.len], b"the lazy ");

        let res = idx.search(b"zebra");
        assert_eq!(res.len, 0);

        let res = idx.search(b"");
        assert_eq!(res.len, 0);
    }

    #[test]
    fn search_on_empty_old_finds_nothing() {
        let idx = index(b"");
        let res = idx.search(b"anything");
        assert_eq!(res.len, 0);
        assert_eq!(res.start, 0);
    }

    #[test]
    fn tied_prefix_lengths_resolve_to_upper_candidate() {
        // both "ab" (2) and "abab" (0) share the full query prefix
        let idx = index(b"abab");
        let res = idx.search(b"ab");
        assert_eq!(res.len, 2);
        assert_eq!(res.start, 2);
    }

    #[test]
    fn matchlen_counts_common_prefix() {
        assert_eq!(matchlen(b"abcdef", b"abcfed"), 3);
        assert_eq!(matchlen(b"abc", b"abcdef"), 3);
        assert_eq!(matchlen(b"xabc", b"abc"), 0);
        assert_eq!(matchlen(b"", b"abc"), 0);
    }

    #[test]
    fn concurrency_resolution() {
        assert_eq!(resolve_concurrency(0), 1);
        assert_eq!(resolve_concurrency(1), 1);
        assert_eq!(resolve_concurrency(6), 6);
        assert!(resolve_concurrency(-1) >= 1);
        assert_eq!(resolve_concurrency(i32::MIN), 1);
    }
}
