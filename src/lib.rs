//! A bsdiff-family binary delta engine.
//!
//! [`DiffContext::diff`] scans a `new` buffer against a suffix array built
//! over an `old` buffer and emits a stream of [`Control`] records (an `add`
//! difference region, a literal `copy` region, and a `seek` displacement),
//! closed by a single record with the `eof` flag set. The companion
//! [`patch`] module replays such a stream against `old` to rebuild `new`.

use std::cmp::min;
use std::fmt;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use progress::{DurationSpeed, PROGRESS_INTERVAL, Size};
use sufsort::SuffixIndex;

#[cfg(feature = "enc")]
pub mod enc;

#[cfg(feature = "patch")]
pub mod patch;

#[cfg(any(test, feature = "mutations"))]
pub mod mutations;

pub mod progress;

mod mem;
mod sufsort;

pub use progress::{NoProgress, ProgressSink};

/// Largest input accepted on either side. The suffix array is 32-bit
/// indexed, with one slot reserved for the sentinel suffix.
pub const MAX_INPUT: u64 = (1 << 31) - 2;

/// Which of the two inputs an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::Old => write!(f, "old"),
            Side::New => write!(f, "new"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("{side} input is {len} bytes, over the {MAX_INPUT} byte limit")]
    InputTooLarge { side: Side, len: u64 },
    #[error("failed to read {side} input")]
    InputRead {
        side: Side,
        #[source]
        source: io::Error,
    },
    #[error("failed to emit control record")]
    Emit(#[source] io::Error),
    #[error("suffix indexing failed: {0}")]
    Indexer(String),
}

/// One unit of the emitted patch stream.
///
/// `add` borrows the context scratch buffer and `copy` borrows the new
/// input; neither may be retained after the `write_message` callback
/// returns.
#[derive(Debug, Clone)]
pub struct Control<'a> {
    /// Byte-wise difference against the old buffer, added modulo 256 on
    /// apply.
    pub add: &'a [u8],
    /// Literal bytes taken verbatim from the new buffer.
    pub copy: &'a [u8],
    /// Signed displacement of the old-side cursor before the next record.
    pub seek: i64,
    /// Set on the final record of a stream, and only there.
    pub eof: bool,
}

#[derive(Debug)]
struct Match {
    add_old_start: usize,
    add_new_start: usize,
    add_length: usize,
    copy_end: usize,
}

impl Match {
    #[inline(always)]
    fn copy_start(&self) -> usize {
        self.add_new_start + self.add_length
    }
}

/// Count positions where `a` and `b` hold the same byte, up to the shorter
/// length. The iterator shape auto-vectorizes.
#[inline(always)]
fn count_matching_bytes(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).filter(|(x, y)| x == y).count()
}

/// Turns [`Match`]es into [`Control`] records.
///
/// Emission is deferred by one match: a record's `seek` is the distance
/// from the end of its add region to the old-side start of the next
/// record, so it can only be written once the next match is known. The
/// final data record therefore carries `seek = 0`, and `finish` closes the
/// stream with the eof record. There is no close-on-drop: an aborted job
/// must not emit an eof record.
struct Translator<'a, F>
where
    F: FnMut(&Control) -> io::Result<()>,
{
    obuf: &'a [u8],
    nbuf: &'a [u8],
    prev_match: Option<Match>,
    buf: &'a mut Vec<u8>,
    write_message: F,
    biggest_add: usize,
}

impl<'a, F> Translator<'a, F>
where
    F: FnMut(&Control) -> io::Result<()>,
{
    fn new(obuf: &'a [u8], nbuf: &'a [u8], buf: &'a mut Vec<u8>, write_message: F) -> Self {
        Self {
            obuf,
            nbuf,
            prev_match: None,
            buf,
            write_message,
            biggest_add: 0,
        }
    }

    fn send_pending(&mut self, next: Option<&Match>) -> io::Result<()> {
        if let Some(pm) = self.prev_match.take() {
            self.biggest_add = self.biggest_add.max(pm.add_length);
            (self.write_message)(&Control {
                add: &self.buf[..pm.add_length],
                copy: &self.nbuf[pm.copy_start()..pm.copy_end],
                seek: match next {
                    Some(m) => m.add_old_start as i64 - (pm.add_old_start + pm.add_length) as i64,
                    None => 0,
                },
                eof: false,
            })?;
        }
        Ok(())
    }

    fn translate(&mut self, m: Match) -> io::Result<()> {
        self.send_pending(Some(&m))?;

        self.buf.clear();

        // Slice + zip lets the compiler see matching lengths and elide
        // bounds checks, enabling auto-vectorization of the wrapping_sub
        // loop.
        let n_slice = &self.nbuf[m.add_new_start..m.add_new_start + m.add_length];
        let o_slice = &self.obuf[m.add_old_start..m.add_old_start + m.add_length];
        self.buf
            .extend(n_slice.iter().zip(o_slice).map(|(a, b)| a.wrapping_sub(*b)));

        self.prev_match = Some(m);
        Ok(())
    }

    /// Flush the pending record and emit the eof record. Returns the
    /// largest add region seen.
    fn finish(mut self) -> io::Result<usize> {
        self.send_pending(None)?;
        (self.write_message)(&Control {
            add: &[],
            copy: &[],
            seek: 0,
            eof: true,
        })?;
        Ok(self.biggest_add)
    }
}

/// Length of the add region extending forward from `lastscan`/`lastpos`,
/// maximizing `2 * matches - length` (earlier maximum wins).
fn forward_extension(
    obuf: &[u8],
    nbuf: &[u8],
    lastpos: usize,
    lastscan: usize,
    scan: usize,
) -> usize {
    let n = min(scan - lastscan, obuf.len() - lastpos);
    let o_slice = &obuf[lastpos..lastpos + n];
    let n_slice = &nbuf[lastscan..lastscan + n];

    let (mut matched, mut best, mut len) = (0_isize, 0_isize, 0_isize);
    for i in 0..n {
        if o_slice[i] == n_slice[i] {
            matched += 1;
        }
        let i = (i + 1) as isize;
        if matched * 2 - i > best * 2 - len {
            best = matched;
            len = i;
        }
    }
    len as usize
}

/// Length of the copy lead-in extending backward from `scan`/`pos`, under
/// the same score.
fn backward_extension(obuf: &[u8], nbuf: &[u8], pos: usize, lastscan: usize, scan: usize) -> usize {
    let n = min(scan - lastscan, pos);
    let o_slice = &obuf[pos - n..pos];
    let n_slice = &nbuf[scan - n..scan];

    let (mut matched, mut best, mut len) = (0_isize, 0_isize, 0_isize);
    for i in 1..=n {
        if o_slice[n - i] == n_slice[n - i] {
            matched += 1;
        }
        if matched * 2 - i as isize > best * 2 - len {
            best = matched;
            len = i as isize;
        }
    }
    len as usize
}

/// When the forward and backward extensions claim the same `overlap` bytes
/// of the new buffer, pick the split that puts the most bytes on the side
/// that reproduces them. Returns how many overlap bytes the forward side
/// keeps.
fn split_overlap(
    obuf: &[u8],
    nbuf: &[u8],
    lastpos: usize,
    lastscan: usize,
    pos: usize,
    scan: usize,
    lenf: usize,
    lenb: usize,
    overlap: usize,
) -> usize {
    let fwd_n = &nbuf[lastscan + lenf - overlap..lastscan + lenf];
    let fwd_o = &obuf[lastpos + lenf - overlap..lastpos + lenf];
    let bwd_n = &nbuf[scan - lenb..scan - lenb + overlap];
    let bwd_o = &obuf[pos - lenb..pos - lenb + overlap];

    let (mut score, mut best, mut split) = (0_isize, 0_isize, 0);
    for i in 0..overlap {
        if fwd_n[i] == fwd_o[i] {
            score += 1;
        }
        if bwd_n[i] == bwd_o[i] {
            score -= 1;
        }
        if score > best {
            best = score;
            split = i + 1;
        }
    }
    split
}

/// The approximate-match extension scan over the new buffer.
///
/// Walks `nbuf` left to right, using the suffix index to find the longest
/// old-buffer prefix of the remainder at each position, and yields one
/// [`Match`] per region where switching away from the previous implicit
/// offset pays for itself (by the mismatch slack of 8 bytes, or exactly).
struct ScanIterator<'a> {
    scan: usize,
    pos: usize,
    length: usize,
    lastscan: usize,
    lastpos: usize,
    lastoffset: isize,

    obuf: &'a [u8],
    nbuf: &'a [u8],
    index: &'a SuffixIndex<'a>,
}

impl<'a> ScanIterator<'a> {
    fn new(obuf: &'a [u8], nbuf: &'a [u8], index: &'a SuffixIndex<'a>) -> Self {
        Self {
            scan: 0,
            pos: 0,
            length: 0,
            lastscan: 0,
            lastpos: 0,
            lastoffset: 0,
            obuf,
            nbuf,
            index,
        }
    }
}

impl<'a> Iterator for ScanIterator<'a> {
    type Item = Match;

    fn next(&mut self) -> Option<Self::Item> {
        let obuflen = self.obuf.len();
        let nbuflen = self.nbuf.len();

        while self.scan < nbuflen {
            let mut oldscore = 0_isize;
            self.scan += self.length;

            let mut scsc = self.scan;
            'inner: while self.scan < nbuflen {
                let found = self.index.search(&self.nbuf[self.scan..]);
                self.pos = found.start;
                self.length = found.len;

                // oldscore counts, over [scsc, scan + length), how many
                // bytes the previous offset would still reproduce.
                {
                    let end = self.scan + self.length;
                    if scsc < end {
                        let o_start = scsc as isize + self.lastoffset;
                        let o_end = end as isize + self.lastoffset;
                        if o_start >= 0 && o_end as usize <= obuflen {
                            // Fast path: entire range is in bounds
                            let o_start = o_start as usize;
                            oldscore += count_matching_bytes(
                                &self.obuf[o_start..o_start + (end - scsc)],
                                &self.nbuf[scsc..end],
                            ) as isize;
                        } else {
                            // Slow path: partial bounds (rare, near buffer edges)
                            for i in scsc..end {
                                let oi = (i as isize + self.lastoffset) as usize;
                                if oi < obuflen && self.obuf[oi] == self.nbuf[i] {
                                    oldscore += 1;
                                }
                            }
                        }
                        scsc = end;
                    }
                }

                let significantly_better = self.length as isize > oldscore + 8;
                let same_length = self.length as isize == oldscore && self.length != 0;

                if same_length || significantly_better {
                    break 'inner;
                }

                {
                    let oi = (self.scan as isize + self.lastoffset) as usize;
                    if oi < obuflen && self.obuf[oi] == self.nbuf[self.scan] {
                        oldscore -= 1;
                    }
                }
                self.scan += 1;
            } // 'inner

            let done_scanning = self.scan == nbuflen;
            if self.length as isize != oldscore || done_scanning {
                let mut lenf =
                    forward_extension(self.obuf, self.nbuf, self.lastpos, self.lastscan, self.scan);

                let mut lenb = if self.scan < nbuflen {
                    backward_extension(self.obuf, self.nbuf, self.pos, self.lastscan, self.scan)
                } else {
                    0
                };

                if self.lastscan + lenf > self.scan - lenb {
                    let overlap = (self.lastscan + lenf) - (self.scan - lenb);
                    let keep = split_overlap(
                        self.obuf,
                        self.nbuf,
                        self.lastpos,
                        self.lastscan,
                        self.pos,
                        self.scan,
                        lenf,
                        lenb,
                        overlap,
                    );
                    // order matters to avoid overflow
                    lenf += keep;
                    lenf -= overlap;

                    lenb -= keep;
                }

                let m = Match {
                    add_old_start: self.lastpos,
                    add_new_start: self.lastscan,
                    add_length: lenf,
                    copy_end: self.scan - lenb,
                };

                self.lastscan = self.scan - lenb;
                self.lastpos = self.pos - lenb;
                self.lastoffset = self.pos as isize - self.scan as isize;

                return Some(m);
            }
        } // done scanning for good

        None
    }
}

/// Options for a diff job.
#[derive(Debug, Clone)]
pub struct DiffParams {
    /// Suffix sort width: 0 = sequential, k > 0 = up to k workers,
    /// k < 0 = max(1, cores + k). Advisory — see [`DiffContext`].
    pub suffix_sort_concurrency: i32,
    /// Emit debug notes about resident memory at engine checkpoints.
    pub measure_memory: bool,
    /// Emit debug notes about parallel-indexing overhead.
    pub measure_parallel_overhead: bool,
}

impl Default for DiffParams {
    fn default() -> Self {
        Self {
            suffix_sort_concurrency: 0,
            measure_memory: false,
            measure_parallel_overhead: false,
        }
    }
}

/// Counters accumulated across every job run on one context.
#[derive(Debug, Clone, Default)]
pub struct DiffStats {
    pub time_spent_sorting: Duration,
    pub time_spent_scanning: Duration,
    /// Largest add region emitted so far.
    pub biggest_add: u64,
}

/// Reusable state for diff jobs: options, the scratch buffer that stages
/// add bytes between records, and accumulated [`DiffStats`].
///
/// A context is single-threaded; two jobs must not share one concurrently.
/// Two independent contexts may run in parallel.
pub struct DiffContext {
    params: DiffParams,
    scratch: Vec<u8>,
    stats: DiffStats,
}

impl Default for DiffContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffContext {
    pub fn new() -> Self {
        Self::with_params(DiffParams::default())
    }

    pub fn with_params(params: DiffParams) -> Self {
        Self {
            params,
            scratch: Vec::with_capacity(16 * 1024),
            stats: DiffStats::default(),
        }
    }

    pub fn stats(&self) -> &DiffStats {
        &self.stats
    }

    /// Diff two inputs, delivering one [`Control`] per emitted record and
    /// a final eof record to `write_message`, strictly in emission order.
    ///
    /// An error from `write_message` aborts the job; nothing further is
    /// emitted, eof record included.
    pub fn diff<O, N, F>(
        &mut self,
        older: O,
        newer: N,
        write_message: F,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), DiffError>
    where
        O: Read,
        N: Read,
        F: FnMut(&Control) -> io::Result<()>,
    {
        let measure_memory = self.params.measure_memory;

        let obuf = read_input(older, Side::Old)?;
        let nbuf = read_input(newer, Side::New)?;
        mem::note(measure_memory, "inputs loaded");

        let before_sort = Instant::now();
        let index = SuffixIndex::new(&obuf, &self.params)?;
        let sorted_in = before_sort.elapsed();
        debug!(
            "suffix array built in {}",
            DurationSpeed(obuf.len() as u64, sorted_in)
        );
        mem::note(measure_memory, "suffix array built");

        progress.label(&format!("Scanning {}...", Size(nbuf.len() as u64)));

        let before_scan = Instant::now();
        let biggest_add = {
            let mut translator = Translator::new(&obuf, &nbuf, &mut self.scratch, write_message);
            let mut reported = 0_usize;
            for m in ScanIterator::new(&obuf, &nbuf, &index) {
                if m.copy_end - reported >= PROGRESS_INTERVAL {
                    reported = m.copy_end;
                    progress.progress(m.copy_end as f32 / nbuf.len() as f32);
                }
                translator.translate(m).map_err(DiffError::Emit)?;
            }
            translator.finish().map_err(DiffError::Emit)?
        };
        let scanned_in = before_scan.elapsed();
        debug!(
            "scan finished in {}",
            DurationSpeed(nbuf.len() as u64, scanned_in)
        );
        mem::note(measure_memory, "scan complete");

        self.stats.time_spent_sorting += sorted_in;
        self.stats.time_spent_scanning += scanned_in;
        self.stats.biggest_add = self.stats.biggest_add.max(biggest_add as u64);
        mem::note(measure_memory, "job done");

        Ok(())
    }
}

fn ensure_within_limit(len: u64, side: Side) -> Result<(), DiffError> {
    if len > MAX_INPUT {
        return Err(DiffError::InputTooLarge { side, len });
    }
    Ok(())
}

/// Materialize one input. Reads are capped just past the limit so an
/// oversized source fails the length check without unbounded allocation.
fn read_input<R: Read>(r: R, side: Side) -> Result<Vec<u8>, DiffError> {
    let mut buf = Vec::new();
    r.take(MAX_INPUT + 1)
        .read_to_end(&mut buf)
        .map_err(|source| DiffError::InputRead { side, source })?;
    ensure_within_limit(buf.len() as u64, side)?;
    Ok(buf)
}

/// Diff two buffers straight into the [`enc`] framing.
#[cfg(feature = "enc")]
pub fn simple_diff(older: &[u8], newer: &[u8], out: &mut dyn io::Write) -> Result<(), DiffError> {
    let mut w = enc::Writer::new(out).map_err(DiffError::Emit)?;
    DiffContext::new().diff(older, newer, |c| w.write(c), &mut NoProgress)?;
    w.flush().map_err(DiffError::Emit)
}

/// Diff `older` against `newer` and assert that replaying the stream
/// reproduces `newer` while honoring the cursor and eof invariants.
pub fn assert_cycle(older: &[u8], newer: &[u8]) {
    let mut ctx = DiffContext::new();
    assert_cycle_with(&mut ctx, older, newer);
}

pub fn assert_cycle_with(ctx: &mut DiffContext, older: &[u8], newer: &[u8]) {
    let mut older_pos = 0_usize;
    let mut newer_pos = 0_usize;
    let mut saw_eof = false;

    ctx.diff(
        older,
        newer,
        |control| -> io::Result<()> {
            assert!(!saw_eof, "no record may follow the eof record");
            if control.eof {
                assert!(control.add.is_empty());
                assert!(control.copy.is_empty());
                assert_eq!(control.seek, 0);
                saw_eof = true;
                return Ok(());
            }

            for &ab in control.add {
                let fb = ab.wrapping_add(older[older_pos]);
                older_pos += 1;

                let nb = newer[newer_pos];
                newer_pos += 1;

                assert_eq!(fb, nb);
            }

            for &cb in control.copy {
                let nb = newer[newer_pos];
                newer_pos += 1;

                assert_eq!(cb, nb);
            }

            let next = older_pos as i64 + control.seek;
            assert!(
                next >= 0 && next <= older.len() as i64,
                "seek leaves the old buffer"
            );
            older_pos = next as usize;

            Ok(())
        },
        &mut NoProgress,
    )
    .unwrap();

    assert!(saw_eof, "stream must end with an eof record");
    assert_eq!(
        newer_pos,
        newer.len(),
        "reconstruction should have same length as newer"
    );
}
