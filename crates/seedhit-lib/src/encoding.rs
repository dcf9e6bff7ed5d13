//! Reduced amino acid alphabets
//!
//! Seeds are computed over a reduced alphabet: each residue is mapped to the
//! index of the letter group it belongs to. A reduction is written as a
//! space-separated list of groups, e.g. the Murphy 10-letter alphabet
//! `"A KR EDNQ C G H ILVM FYW P ST"`.
//!
//! Residues that belong to no group (`X`, `*`, ambiguity codes, anything that
//! is not a letter) become [`MASK_LETTER`]. With lowercase masking enabled,
//! residues rewritten to lowercase by a masking pre-pass are masked too.

use crate::constants::{ceil_log2, MASK_LETTER, MURPHY_10};
use crate::error::{Location, Phase, Result, SeedError};

/// The 20 standard amino acids, one group each
pub const STANDARD_AMINO_ACIDS: &str = "A R N D C Q E G H I L K M F P S T W Y V";

/// Mapping from residues to reduced letters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    map: [u8; 256],
    groups: Vec<String>,
    lowercase_masking: bool,
}

impl Reduction {
    /// Parse a reduction from its group definition
    ///
    /// # Errors
    /// Returns `SeedError::Config` if the definition is empty, repeats a
    /// residue, contains a non-letter, or has more groups than fit in a
    /// reduced letter.
    pub fn new(definition: &str) -> Result<Self> {
        let err = |detail: String| SeedError::config(Location::phase(Phase::Validate), detail);
        let groups: Vec<&str> = definition.split_whitespace().collect();
        if groups.is_empty() {
            return Err(err("reduction has no letter groups".to_string()));
        }
        if groups.len() >= MASK_LETTER as usize {
            return Err(err(format!("reduction has too many groups: {}", groups.len())));
        }
        let mut seen = [false; 256];
        for group in &groups {
            for &residue in group.as_bytes() {
                if !residue.is_ascii_alphabetic() {
                    return Err(err(format!(
                        "invalid residue {:?} in reduction",
                        residue as char
                    )));
                }
                let upper = residue.to_ascii_uppercase() as usize;
                if seen[upper] {
                    return Err(err(format!(
                        "residue {:?} appears twice in reduction",
                        residue as char
                    )));
                }
                seen[upper] = true;
            }
        }
        Ok(Self::from_groups(&groups))
    }

    fn from_groups(groups: &[&str]) -> Self {
        let mut map = [MASK_LETTER; 256];
        for (letter, group) in groups.iter().enumerate() {
            for &residue in group.as_bytes() {
                map[residue.to_ascii_uppercase() as usize] = letter as u8;
                map[residue.to_ascii_lowercase() as usize] = letter as u8;
            }
        }
        Self {
            map,
            groups: groups.iter().map(|g| g.to_string()).collect(),
            lowercase_masking: false,
        }
    }

    /// The Murphy 10-letter reduction
    pub fn murphy10() -> Self {
        let groups: Vec<&str> = MURPHY_10.split_whitespace().collect();
        Self::from_groups(&groups)
    }

    /// The unreduced 20-letter amino acid alphabet
    pub fn standard() -> Self {
        let groups: Vec<&str> = STANDARD_AMINO_ACIDS.split_whitespace().collect();
        Self::from_groups(&groups)
    }

    /// Treat lowercase residues as masked
    pub fn with_lowercase_masking(mut self, enabled: bool) -> Self {
        self.lowercase_masking = enabled;
        self
    }

    /// Whether lowercase residues are masked
    pub fn lowercase_masking(&self) -> bool {
        self.lowercase_masking
    }

    /// Number of reduced letters
    #[inline]
    pub fn size(&self) -> u32 {
        self.groups.len() as u32
    }

    /// Bits needed to store one reduced letter
    #[inline]
    pub fn bit_size(&self) -> u32 {
        ceil_log2(self.size() as u64).max(1) as u32
    }

    /// Letter groups in reduced-letter order
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Map one residue to its reduced letter, or [`MASK_LETTER`]
    #[inline]
    pub fn reduce(&self, residue: u8) -> u8 {
        if self.lowercase_masking && residue.is_ascii_lowercase() {
            return MASK_LETTER;
        }
        self.map[residue as usize]
    }

    /// Append the reduced form of `residues` to `out`
    pub fn reduce_into(&self, residues: &[u8], out: &mut Vec<u8>) {
        out.extend(residues.iter().map(|&r| self.reduce(r)));
    }

    /// Reduced form of `residues`
    pub fn reduce_sequence(&self, residues: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(residues.len());
        self.reduce_into(residues, &mut out);
        out
    }
}

impl Default for Reduction {
    fn default() -> Self {
        Self::murphy10()
    }
}

impl std::fmt::Display for Reduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.groups.join(" "))
    }
}

/// Whether a reduced letter is the mask letter
#[inline]
pub const fn is_masked(letter: u8) -> bool {
    letter == MASK_LETTER
}
