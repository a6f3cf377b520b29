//! Instruction histograms, keyed by machine mnemonic.

use std::collections::BTreeMap;
use std::fmt;

use iced_x86::{ Decoder, DecoderOptions, Instruction };

/// Number of instructions per machine mnemonic (as printed by a
/// disassembler, ie. "cmove" rather than "cmovz").
///
/// Counts are signed so that two histograms can be subtracted. Entries are
/// dropped when they reach zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsnHistogram(BTreeMap<String, i64>);

impl InsnHistogram {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn add(&mut self, mnemonic: &str, n: i64) {
        if n == 0 {
            return;
        }
        let count = self.0.entry(mnemonic.to_string()).or_insert(0);
        *count += n;
        if *count == 0 {
            self.0.remove(mnemonic);
        }
    }

    pub fn get(&self, mnemonic: &str) -> i64 {
        self.0.get(mnemonic).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Total number of instructions.
    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }

    /// Decode some x86-64 bytes and count the instructions.
    pub fn from_code(buf: &[u8]) -> Self {
        let mut res = Self::new();
        let mut decoder = Decoder::new(64, buf, DecoderOptions::NONE);
        let mut instr = Instruction::default();
        while decoder.can_decode() {
            decoder.decode_out(&mut instr);
            let name = format!("{:?}", instr.mnemonic()).to_ascii_lowercase();
            res.add(&name, 1);
        }
        res
    }

    /// Returns `self - other`.
    pub fn diff(&self, other: &Self) -> Self {
        let mut res = self.clone();
        for (name, n) in other.iter() {
            res.add(name, -n);
        }
        res
    }
}

impl<'a> FromIterator<(&'a str, i64)> for InsnHistogram {
    fn from_iter<I: IntoIterator<Item = (&'a str, i64)>>(iter: I) -> Self {
        let mut res = Self::new();
        for (name, n) in iter {
            res.add(name, n);
        }
        res
    }
}

impl fmt::Display for InsnHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (name, n)) in self.iter().enumerate() {
            if idx != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_and_diff() {
        let a: InsnHistogram = [("mov", 3), ("cmove", 1), ("add", 1)]
            .into_iter().collect();
        let b: InsnHistogram = [("add", 1), ("mov", 1)].into_iter().collect();
        let d = a.diff(&b);
        assert_eq!(d.get("mov"), 2);
        assert_eq!(d.get("add"), 0);
        assert_eq!(d.len(), 2);
        assert_eq!(d.total(), 3);
        assert_eq!(d.to_string(), "cmove: 1, mov: 2");
    }

    #[test]
    fn decode() {
        // mov rax, rbx ; cmove rax, r11 ; pushfq
        let code = [0x48, 0x89, 0xd8, 0x49, 0x0f, 0x44, 0xc3, 0x9c];
        let h = InsnHistogram::from_code(&code);
        assert_eq!(h.get("mov"), 1);
        assert_eq!(h.get("cmove"), 1);
        assert_eq!(h.get("pushfq"), 1);
        assert_eq!(h.total(), 3);
    }
}
