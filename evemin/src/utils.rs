//! # Utility module

use anyhow::{anyhow, Result};
use log::info;
use std::io::Read;
use std::net::{TcpListener, TcpStream};

/// Smallest power of two that is greater or equal to `n`.
///
/// `0` and `1` both map to `1`.
///
/// # Examples
///
/// ```
/// use evemin::utils::next_power_of_two;
///
/// assert_eq!(next_power_of_two(5), 8);
/// assert_eq!(next_power_of_two(8), 8);
/// ```
pub fn next_power_of_two(n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

/// Check whether `n` is a non-zero power of two.
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Cyclic index into a buffer whose length is a power of two.
///
/// Wraparound is a bitwise and with `mask = capacity - 1`, never a true modulo.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CyclicIndex {
    idx: usize,
    mask: usize,
}

impl CyclicIndex {
    /// Create an index at slot 0 of a buffer with `capacity` slots.
    ///
    /// # Panics
    ///
    /// If `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            is_power_of_two(capacity),
            "cyclic capacity {} is not a power of two",
            capacity
        );
        Self {
            idx: 0,
            mask: capacity - 1,
        }
    }

    /// Current slot.
    pub fn get(&self) -> usize {
        self.idx
    }

    /// Slot `offset` positions ahead of the current one.
    pub fn offset(&self, offset: usize) -> usize {
        self.idx.wrapping_add(offset) & self.mask
    }

    /// Move one slot ahead, wrapping around at the end.
    pub fn advance(&mut self) {
        self.idx = self.offset(1);
    }

    /// Number of slots in the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// Open a file or an input stream.
///
/// `tcp://host:port` connects to a remote event stream, `tcp://@:port` listens for one.
pub fn open_file(input: &str) -> Result<Box<dyn Read + Send>> {
    if let Some(input) = input.strip_prefix("tcp://") {
        let (addr, port) = input
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid format"))?;
        let port: usize = str::parse(port)?;

        let stream = if addr == "@" {
            let listener = TcpListener::bind(format!("0.0.0.0:{}", port))?;
            let (sock, addr) = listener.accept()?;
            info!("Accept {}", addr);
            sock
        } else {
            info!("Connecting to {}", input);
            TcpStream::connect(input)?
        };

        Ok(Box::new(stream))
    } else {
        std::fs::File::open(input)
            .map(|i| Box::new(i) as _)
            .map_err(Into::into)
    }
}
