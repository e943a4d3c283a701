//! Filter chain
//!
//! Applies filters left to right, threading the buffer returned by
//! step k into step k+1.

use cadenza_common::AudioFormat;

use crate::error::Result;

use super::Filter;

/// An ordered list of open filters acting as one filter.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
    in_format: AudioFormat,
}

impl FilterChain {
    pub fn new(in_format: AudioFormat) -> Self {
        Self { filters: Vec::new(), in_format }
    }

    /// Append a filter. The caller is responsible for opening it
    /// against [`FilterChain::out_format`].
    pub fn push(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    /// The format entering the chain.
    pub fn in_format(&self) -> AudioFormat {
        self.in_format
    }

    /// The format leaving the chain: the last filter's output format,
    /// or the input format for an empty chain.
    pub fn out_format(&self) -> AudioFormat {
        self.filters.last().map_or(self.in_format, |f| f.out_format())
    }

    /// Run `src` through every filter in order.
    pub fn filter<'a>(&'a mut self, src: &'a [u8]) -> Result<&'a [u8]> {
        let mut cur = src;
        for f in self.filters.iter_mut() {
            cur = f.filter(cur)?;
        }
        Ok(cur)
    }

    /// Reset every filter in the chain.
    pub fn reset(&mut self) {
        for f in self.filters.iter_mut() {
            f.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_common::SampleFormat;

    /// Adds a constant to every byte; test stand-in for a real filter.
    struct AddFilter {
        add: u8,
        format: AudioFormat,
        buffer: Vec<u8>,
    }

    impl Filter for AddFilter {
        fn out_format(&self) -> AudioFormat {
            self.format
        }

        fn filter<'a>(&'a mut self, src: &'a [u8]) -> Result<&'a [u8]> {
            self.buffer.clear();
            self.buffer.extend(src.iter().map(|b| b.wrapping_add(self.add)));
            Ok(&self.buffer)
        }
    }

    #[test]
    fn test_chain_applies_left_to_right() {
        let af = AudioFormat::new(44100, SampleFormat::U8, 1);
        let mut chain = FilterChain::new(af);
        chain.push(Box::new(AddFilter { add: 1, format: af, buffer: Vec::new() }));
        chain.push(Box::new(AddFilter { add: 2, format: af, buffer: Vec::new() }));

        let out = chain.filter(&[10, 20]).unwrap();
        assert_eq!(out, [13, 23]);
        assert_eq!(chain.out_format(), af);
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        let mut chain = FilterChain::new(af);
        let src = [1u8, 2, 3, 4];
        assert_eq!(chain.filter(&src).unwrap(), src);
        assert_eq!(chain.out_format(), af);
    }
}
