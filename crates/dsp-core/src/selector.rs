//! Channel selectors: bit-sets over channel indices.
//!
//! A selector is parsed from a comma-separated list of indices and index
//! ranges (`0,2-3`). An empty string (or a lone `-`) selects every channel.
//! Inside a nested chain block only the channels picked by the enclosing
//! selector are addressable; [`ChannelSelector::parse_masked`] interprets
//! indices relative to the set bits of that outer mask.

use thiserror::Error;

/// Selector parse failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("channel index out of range: {0}")]
    OutOfRange(usize),
    #[error("malformed range: {0}-{1}")]
    MalformedRange(usize, usize),
    #[error("syntax error: invalid character: {0:?}")]
    InvalidChar(char),
    #[error("syntax error: {0:?} unexpected")]
    Unexpected(char),
}

/// Bit-set over channel indices `[0, channels)`.
///
/// Always allocated to match the channel count of the stream it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelector {
    bits: Vec<bool>,
}

impl ChannelSelector {
    /// All channels selected.
    pub fn all(channels: usize) -> Self {
        Self { bits: vec![true; channels] }
    }

    /// No channels selected.
    pub fn none(channels: usize) -> Self {
        Self { bits: vec![false; channels] }
    }

    /// Parse a selector string against `channels` channels.
    pub fn parse(s: &str, channels: usize) -> Result<Self, SelectorError> {
        if s.is_empty() || s == "-" {
            return Ok(Self::all(channels));
        }
        let mut sel = Self::none(channels);
        for part in s.split(',') {
            sel.parse_element(part, channels)?;
        }
        Ok(sel)
    }

    fn parse_element(&mut self, part: &str, channels: usize) -> Result<(), SelectorError> {
        let parse_idx = |t: &str| -> Result<usize, SelectorError> {
            let v: usize = t
                .parse()
                .map_err(|_| t.chars().find(|c| !c.is_ascii_digit()).map_or(
                    SelectorError::Unexpected(','),
                    SelectorError::InvalidChar,
                ))?;
            if v >= channels {
                return Err(SelectorError::OutOfRange(v));
            }
            Ok(v)
        };
        let (start, end) = match part.split_once('-') {
            None => {
                if part.is_empty() {
                    return Err(SelectorError::Unexpected(','));
                }
                let v = parse_idx(part)?;
                (v, v)
            }
            Some((a, b)) => {
                if b.contains('-') {
                    return Err(SelectorError::Unexpected('-'));
                }
                let start = if a.is_empty() { 0 } else { parse_idx(a)? };
                let end = if b.is_empty() { channels - 1 } else { parse_idx(b)? };
                if end < start {
                    return Err(SelectorError::MalformedRange(start, end));
                }
                (start, end)
            }
        };
        for bit in &mut self.bits[start..=end] {
            *bit = true;
        }
        Ok(())
    }

    /// Parse a selector relative to a subset mask.
    ///
    /// The selector string addresses the set bits of `mask` as a dense
    /// index space: `0` means the first set channel of the mask, `1` the
    /// second, and so on. The result has the same width as `mask`.
    pub fn parse_masked(s: &str, mask: &ChannelSelector) -> Result<Self, SelectorError> {
        let dense = Self::parse(s, mask.count())?;
        let mut out = Self::none(mask.len());
        let mut i = 0;
        for (k, &m) in mask.bits.iter().enumerate() {
            if m {
                if dense.get(i) {
                    out.bits[k] = true;
                }
                i += 1;
            }
        }
        Ok(out)
    }

    /// Number of channels the selector spans.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of selected channels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Whether channel `k` is selected. Out-of-range indices read as unset.
    pub fn get(&self, k: usize) -> bool {
        self.bits.get(k).copied().unwrap_or(false)
    }

    pub fn set(&mut self, k: usize) {
        self.bits[k] = true;
    }

    /// Indices of the selected channels, in order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(k, &b)| b.then_some(k))
    }

    /// Resize for a channel-count change mid-chain.
    ///
    /// Grown streams select every new index; shrunk streams keep the first
    /// `new_count - delta` set bits, where `delta` is the number of lost
    /// channels.
    pub fn resized(&self, channels: usize) -> Self {
        let mut out = Self::none(channels);
        if channels >= self.len() {
            out.bits[..self.len()].copy_from_slice(&self.bits);
            for bit in &mut out.bits[self.len()..] {
                *bit = true;
            }
        } else {
            let keep = self.count().saturating_sub(self.len() - channels);
            let mut taken = 0;
            for (k, &b) in self.bits.iter().take(channels).enumerate() {
                if b && taken < keep {
                    out.bits[k] = true;
                    taken += 1;
                }
            }
        }
        out
    }
}

impl std::fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        let mut k = 0;
        while k < self.bits.len() {
            if self.bits[k] {
                let start = k;
                while k + 1 < self.bits.len() && self.bits[k + 1] {
                    k += 1;
                }
                if !first {
                    write!(f, ",")?;
                }
                match k - start {
                    0 => write!(f, "{start}")?,
                    1 => write!(f, "{start},{k}")?,
                    _ => write!(f, "{start}-{k}")?,
                }
                first = false;
            }
            k += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selects_all() {
        assert_eq!(ChannelSelector::parse("", 4).unwrap().count(), 4);
        assert_eq!(ChannelSelector::parse("-", 4).unwrap().count(), 4);
    }

    #[test]
    fn single_and_ranges() {
        let s = ChannelSelector::parse("0,2-3", 5).unwrap();
        assert!(s.get(0) && !s.get(1) && s.get(2) && s.get(3) && !s.get(4));
        let s = ChannelSelector::parse("1-", 4).unwrap();
        assert_eq!(s.iter_set().collect::<Vec<_>>(), vec![1, 2, 3]);
        let s = ChannelSelector::parse("-2", 4).unwrap();
        assert_eq!(s.iter_set().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            ChannelSelector::parse("4", 4).unwrap_err(),
            SelectorError::OutOfRange(4)
        );
        assert_eq!(
            ChannelSelector::parse("3-1", 4).unwrap_err(),
            SelectorError::MalformedRange(3, 1)
        );
        assert!(ChannelSelector::parse("1--2", 4).is_err());
        assert!(ChannelSelector::parse("a", 4).is_err());
        assert!(ChannelSelector::parse("1,,2", 4).is_err());
    }

    #[test]
    fn masked_parse_maps_dense_indices() {
        // mask selects channels 1 and 3 of a 4-channel stream; "1" in the
        // dense space is channel 3
        let mask = ChannelSelector::parse("1,3", 4).unwrap();
        let s = ChannelSelector::parse_masked("1", &mask).unwrap();
        assert_eq!(s.iter_set().collect::<Vec<_>>(), vec![3]);
        let s = ChannelSelector::parse_masked("", &mask).unwrap();
        assert_eq!(s.iter_set().collect::<Vec<_>>(), vec![1, 3]);
        // index 2 does not exist in a two-channel dense space
        assert!(ChannelSelector::parse_masked("2", &mask).is_err());
    }

    #[test]
    fn resize_grow_sets_new_channels() {
        let s = ChannelSelector::parse("0", 2).unwrap();
        let r = s.resized(4);
        assert_eq!(r.iter_set().collect::<Vec<_>>(), vec![0, 2, 3]);
    }

    #[test]
    fn resize_shrink_keeps_low_bits() {
        let s = ChannelSelector::parse("0,2,3", 4).unwrap();
        let r = s.resized(2);
        // one channel lost: keep the first two set bits that still fit
        assert_eq!(r.iter_set().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn display_ranges() {
        let s = ChannelSelector::parse("0-3", 6).unwrap();
        assert_eq!(s.to_string(), "0-3");
        let s = ChannelSelector::parse("0,1", 4).unwrap();
        assert_eq!(s.to_string(), "0,1");
        let s = ChannelSelector::parse("0,2,4", 5).unwrap();
        assert_eq!(s.to_string(), "0,2,4");
    }
}
