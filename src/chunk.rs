//! Splitting transfers into hardware-sized chunks

/// A contiguous piece of a transfer buffer
///
/// `offset` and `len` are in bytes, relative to the start of the
/// transfer buffer. Only the last chunk of a chain has `interrupt`
/// set; the hardware signals completion once it retires that chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Chunk {
    pub offset: usize,
    pub len: usize,
    pub interrupt: bool,
}

/// Produces the chunks that cover `len` bytes starting at `offset`
///
/// Every chunk is at most `unit` bytes. A zero-length span still
/// produces one zero-length chunk.
pub fn chain(offset: usize, len: usize, unit: usize) -> Chain {
    Chain {
        next: offset,
        end: offset + len,
        unit: unit.max(1),
        started: false,
    }
}

/// Number of chunks that [`chain`] produces
pub fn count(len: usize, unit: usize) -> usize {
    len.div_ceil(unit.max(1)).max(1)
}

/// Bytes to arm for the next IN window
///
/// A backend with a descriptor ring can walk `depth` chunks before it
/// interrupts.
pub fn window(remaining: usize, unit: usize, depth: usize) -> usize {
    remaining.min(unit.max(1).saturating_mul(depth.max(1)))
}

/// Declared capacity for the next OUT chunk
///
/// One packet at most, rounded up to the hardware's addressable unit.
pub fn out_capacity(remaining: usize, max_packet_size: usize, granule: usize) -> usize {
    let granule = granule.max(1);
    remaining
        .min(max_packet_size)
        .div_ceil(granule)
        .saturating_mul(granule)
}

pub struct Chain {
    next: usize,
    end: usize,
    unit: usize,
    started: bool,
}

impl Iterator for Chain {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.started && self.next == self.end {
            return None;
        }
        self.started = true;

        let len = (self.end - self.next).min(self.unit);
        let chunk = Chunk {
            offset: self.next,
            len,
            interrupt: self.next + len == self.end,
        };
        self.next += len;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::{chain, count, out_capacity, window, Chunk};
    use proptest::prelude::*;

    #[test]
    fn zero_length() {
        let chunks: Vec<_> = chain(0, 0, 64).collect();
        assert_eq!(
            chunks,
            [Chunk {
                offset: 0,
                len: 0,
                interrupt: true
            }]
        );
    }

    #[test]
    fn exact_multiple() {
        let lens: Vec<_> = chain(0, 128, 64).map(|chunk| chunk.len).collect();
        assert_eq!(lens, [64, 64]);
    }

    #[test]
    fn offset_chain() {
        let chunks: Vec<_> = chain(64, 72, 64).collect();
        assert_eq!(chunks[0].offset, 64);
        assert_eq!(chunks[1].offset, 128);
        assert_eq!(chunks[1].len, 8);
    }

    #[test]
    fn ring_window() {
        assert_eq!(window(200, 64, 1), 64);
        assert_eq!(window(200, 64, 4), 200);
        assert_eq!(window(1000, 64, 4), 256);
        assert_eq!(window(0, 64, 4), 0);
    }

    #[test]
    fn out_capacity_rounds_to_granule() {
        assert_eq!(out_capacity(200, 64, 1), 64);
        assert_eq!(out_capacity(8, 64, 1), 8);
        assert_eq!(out_capacity(9, 64, 4), 12);
        assert_eq!(out_capacity(0, 64, 4), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn chunk_count_is_ceiling(len in 0usize..100_000, unit in 1usize..20_000) {
            let chunks: Vec<_> = chain(0, len, unit).collect();
            let expected = if len == 0 { 1 } else { (len + unit - 1) / unit };
            prop_assert_eq!(chunks.len(), expected);
            prop_assert_eq!(count(len, unit), expected);
        }

        #[test]
        fn only_last_chunk_interrupts(
            offset in 0usize..4096,
            len in 0usize..10_000,
            unit in 1usize..1024,
        ) {
            let chunks: Vec<_> = chain(offset, len, unit).collect();
            let (last, rest) = chunks.split_last().unwrap();
            prop_assert!(last.interrupt);
            prop_assert!(rest.iter().all(|chunk| !chunk.interrupt));
            prop_assert!(chunks.iter().all(|chunk| chunk.len <= unit));
            prop_assert_eq!(chunks.iter().map(|chunk| chunk.len).sum::<usize>(), len);
            prop_assert_eq!(last.offset + last.len, offset + len);
        }
    }
}
