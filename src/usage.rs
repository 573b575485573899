//! Buffer Usage Flags
//!
//! Maps the host's symbolic usage tokens onto the native bitmask. Every
//! recognised token owns exactly one bit (the WebGPU `GPUBufferUsage`
//! values), so the mapping is injective and [`BufferUsage::tokens`] recovers
//! the canonical token set from any mask produced by [`BufferUsage::parse`].

use bitflags::bitflags;

use crate::errors::{BridgeError, Result};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const MAP_READ      = 1 << 0;
        const MAP_WRITE     = 1 << 1;
        const COPY_SRC      = 1 << 2;
        const COPY_DST      = 1 << 3;
        const INDEX         = 1 << 4;
        const VERTEX        = 1 << 5;
        const UNIFORM       = 1 << 6;
        const STORAGE       = 1 << 7;
        const INDIRECT      = 1 << 8;
        const QUERY_RESOLVE = 1 << 9;
    }
}

/// Canonical token for every flag, in bit order.
const TOKENS: [(&str, BufferUsage); 10] = [
    ("map_read", BufferUsage::MAP_READ),
    ("map_write", BufferUsage::MAP_WRITE),
    ("copy_src", BufferUsage::COPY_SRC),
    ("copy_dst", BufferUsage::COPY_DST),
    ("index", BufferUsage::INDEX),
    ("vertex", BufferUsage::VERTEX),
    ("uniform", BufferUsage::UNIFORM),
    ("storage", BufferUsage::STORAGE),
    ("indirect", BufferUsage::INDIRECT),
    ("query_resolve", BufferUsage::QUERY_RESOLVE),
];

impl BufferUsage {
    /// Looks up a single token. Hyphens are accepted in place of underscores.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let normalized = token.replace('-', "_");
        TOKENS
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, flag)| *flag)
    }

    /// ORs together the bits of every token; the first unknown token fails the
    /// whole set.
    pub fn parse<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens.into_iter().try_fold(Self::empty(), |acc, token| {
            let token = token.as_ref();
            Self::from_token(token)
                .map(|flag| acc | flag)
                .ok_or_else(|| BridgeError::InvalidUsage(token.to_string()))
        })
    }

    /// Canonical tokens of the set bits, in bit order.
    #[must_use]
    pub fn tokens(self) -> Vec<&'static str> {
        TOKENS
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}
