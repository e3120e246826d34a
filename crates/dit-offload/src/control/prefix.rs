// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IP prefix parsing for caller-supplied strings.
//!
//! Accepts `"addr"` or `"addr/len"`. The family is inferred from the
//! presence of `':'`; a missing length defaults to the full host mask.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A parsed network prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prefix {
    V4 { addr: Ipv4Addr, len: u8 },
    V6 { addr: Ipv6Addr, len: u8 },
}

impl Prefix {
    pub fn is_v4(&self) -> bool {
        matches!(self, Self::V4 { .. })
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 { addr, len } => write!(f, "{}/{}", addr, len),
            Self::V6 { addr, len } => write!(f, "{}/{}", addr, len),
        }
    }
}

/// Malformed prefix string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefixParseError;

impl fmt::Display for PrefixParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prefix parsing error")
    }
}

impl std::error::Error for PrefixParseError {}

/// Parse `"addr"` or `"addr/len"` into a [`Prefix`].
pub fn parse_prefix(input: &str) -> Result<Prefix, PrefixParseError> {
    if input.is_empty() {
        return Err(PrefixParseError);
    }

    let v6 = input.contains(':');
    let (addr_part, len_part) = match input.split_once('/') {
        Some((addr, len)) => (addr, Some(len)),
        None => (input, None),
    };

    if v6 {
        let addr: Ipv6Addr = addr_part.parse().map_err(|_| PrefixParseError)?;
        let len = parse_len(len_part, 128)?;
        Ok(Prefix::V6 { addr, len })
    } else {
        let addr: Ipv4Addr = addr_part.parse().map_err(|_| PrefixParseError)?;
        let len = parse_len(len_part, 32)?;
        Ok(Prefix::V4 { addr, len })
    }
}

fn parse_len(part: Option<&str>, max: u8) -> Result<u8, PrefixParseError> {
    let len = match part {
        Some(text) => text.parse::<u8>().map_err(|_| PrefixParseError)?,
        None => max,
    };
    if len > max {
        return Err(PrefixParseError);
    }
    Ok(len)
}
