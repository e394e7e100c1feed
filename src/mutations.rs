//! Derives a plausible "newer" buffer from an "older" one and a byte
//! script, for property tests that need realistic diff shapes.

/// Interpret `script` as pairs of opcode bytes over a copy of `older`:
/// low values re-copy a window of what has been built so far, mid values
/// insert a run, high values flip a byte in place.
pub fn mutate(older: &[u8], script: &[u8]) -> Vec<u8> {
    let mut newer = older.to_vec();

    for op in script.chunks(2) {
        let &[a, b] = op else { break };

        match a {
            0..=127 => {
                if newer.is_empty() {
                    newer.push(b);
                    continue;
                }
                let at = a as usize % newer.len();
                let end = (at + b as usize).min(newer.len());
                newer.extend_from_within(at..end);
            }
            128..=191 => {
                for _ in 0..(a - 128) % 24 {
                    newer.push(b);
                }
            }
            _ => {
                if newer.is_empty() {
                    continue;
                }
                let at = b as usize % newer.len();
                newer[at] ^= a;
            }
        }
    }

    newer
}
