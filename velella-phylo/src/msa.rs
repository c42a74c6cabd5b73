//! In-memory multiple sequence alignments with sufficient statistics.
//!
//! The substitution-count dynamic program never walks raw columns: it works
//! on the alignment's *sufficient statistics*, the distinct column tuples
//! with their multiplicities and the per-position tuple index. Those are
//! computed once at construction and are immutable afterwards.

use std::collections::HashMap;

use velella_core::{Result, VelellaError};

/// The gap character in alignment rows.
pub const GAP_CHAR: u8 = b'-';

/// A multiple sequence alignment over a fixed alphabet.
#[derive(Debug, Clone)]
pub struct Msa {
    names: Vec<String>,
    alphabet: Vec<u8>,
    /// Distinct column tuples; each holds one character per sequence.
    tuples: Vec<Vec<u8>>,
    /// Multiplicity of each tuple across the alignment.
    counts: Vec<usize>,
    /// Tuple index of each alignment column, left to right.
    tuple_idx: Vec<usize>,
    /// Number of columns.
    length: usize,
}

impl Msa {
    /// Build an alignment from named rows and compute sufficient statistics.
    ///
    /// Rows must be non-empty and of equal length; characters are
    /// upper-cased. Character validity against the alphabet is checked by
    /// the consumers (a column may legitimately hold gaps or missing-data
    /// codes).
    pub fn new(names: Vec<String>, seqs: Vec<Vec<u8>>, alphabet: &[u8]) -> Result<Self> {
        if names.len() != seqs.len() {
            return Err(VelellaError::InvalidInput(format!(
                "{} names for {} sequences",
                names.len(),
                seqs.len()
            )));
        }
        if seqs.is_empty() {
            return Err(VelellaError::InvalidInput("no sequences".into()));
        }
        let length = seqs[0].len();
        if length == 0 {
            return Err(VelellaError::InvalidInput("empty alignment".into()));
        }
        for (i, s) in seqs.iter().enumerate() {
            if s.len() != length {
                return Err(VelellaError::InvalidInput(format!(
                    "sequence {} has length {}, expected {}",
                    i,
                    s.len(),
                    length
                )));
            }
        }
        if alphabet.is_empty() {
            return Err(VelellaError::InvalidInput("empty alphabet".into()));
        }

        let seqs: Vec<Vec<u8>> = seqs
            .into_iter()
            .map(|s| s.iter().map(|c| c.to_ascii_uppercase()).collect())
            .collect();

        // Deduplicate columns into tuples, first-occurrence order.
        let mut tuples: Vec<Vec<u8>> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        let mut tuple_idx = Vec::with_capacity(length);
        let mut seen: HashMap<Vec<u8>, usize> = HashMap::new();
        for col in 0..length {
            let column: Vec<u8> = seqs.iter().map(|s| s[col]).collect();
            let idx = match seen.get(&column) {
                Some(&idx) => {
                    counts[idx] += 1;
                    idx
                }
                None => {
                    let idx = tuples.len();
                    seen.insert(column.clone(), idx);
                    tuples.push(column);
                    counts.push(1);
                    idx
                }
            };
            tuple_idx.push(idx);
        }

        Ok(Self {
            names,
            alphabet: alphabet.iter().map(|c| c.to_ascii_uppercase()).collect(),
            tuples,
            counts,
            tuple_idx,
            length,
        })
    }

    /// Number of sequences (rows).
    pub fn nseqs(&self) -> usize {
        self.names.len()
    }

    /// Number of columns.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Sequence names, row order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Alignment row index for a sequence name.
    pub fn seq_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// The alphabet.
    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    /// Number of distinct column tuples.
    pub fn ntuples(&self) -> usize {
        self.tuples.len()
    }

    /// Multiplicity of each tuple.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Tuple index of each column.
    pub fn tuple_idx(&self) -> &[usize] {
        &self.tuple_idx
    }

    /// Character of sequence `seq` in tuple `tuple`.
    pub fn char_at_tuple(&self, tuple: usize, seq: usize) -> u8 {
        self.tuples[tuple][seq]
    }

    /// Position of a character in the alphabet, if present.
    pub fn alphabet_index(&self, c: u8) -> Option<usize> {
        let c = c.to_ascii_uppercase();
        self.alphabet.iter().position(|&a| a == c)
    }

    /// True for missing-data codes (`?`, `*`, and `N` when `N` is not an
    /// alphabet character).
    pub fn is_missing(&self, c: u8) -> bool {
        let c = c.to_ascii_uppercase();
        c == b'?' || c == b'*' || (c == b'N' && !self.alphabet.contains(&b'N'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dna_msa(rows: &[&str]) -> Msa {
        let names = (0..rows.len()).map(|i| format!("s{}", i)).collect();
        let seqs = rows.iter().map(|r| r.as_bytes().to_vec()).collect();
        Msa::new(names, seqs, b"ACGT").unwrap()
    }

    #[test]
    fn tuples_deduplicate_columns() {
        let msa = dna_msa(&["ACGA", "ACGA"]);
        // Columns: (A,A), (C,C), (G,G), (A,A) -> 3 distinct tuples.
        assert_eq!(msa.ntuples(), 3);
        assert_eq!(msa.counts(), &[2, 1, 1]);
        assert_eq!(msa.tuple_idx(), &[0, 1, 2, 0]);
        assert_eq!(msa.length(), 4);
    }

    #[test]
    fn counts_sum_to_length() {
        let msa = dna_msa(&["ACGTACGT", "ACGAACGA", "TTGTACGT"]);
        let total: usize = msa.counts().iter().sum();
        assert_eq!(total, msa.length());
    }

    #[test]
    fn char_lookup_and_case_folding() {
        let msa = dna_msa(&["acg", "ACG"]);
        assert_eq!(msa.char_at_tuple(0, 0), b'A');
        assert_eq!(msa.char_at_tuple(2, 1), b'G');
    }

    #[test]
    fn alphabet_index_round_trip() {
        let msa = dna_msa(&["A", "C"]);
        assert_eq!(msa.alphabet_index(b'A'), Some(0));
        assert_eq!(msa.alphabet_index(b't'), Some(3));
        assert_eq!(msa.alphabet_index(b'X'), None);
    }

    #[test]
    fn missing_data_classification() {
        let msa = dna_msa(&["A", "C"]);
        assert!(msa.is_missing(b'N'));
        assert!(msa.is_missing(b'n'));
        assert!(msa.is_missing(b'?'));
        assert!(msa.is_missing(b'*'));
        assert!(!msa.is_missing(b'A'));
        assert!(!msa.is_missing(GAP_CHAR));
    }

    #[test]
    fn seq_index_by_name() {
        let msa = Msa::new(
            vec!["human".into(), "mouse".into()],
            vec![b"ACGT".to_vec(), b"ACGT".to_vec()],
            b"ACGT",
        )
        .unwrap();
        assert_eq!(msa.seq_index("mouse"), Some(1));
        assert_eq!(msa.seq_index("rat"), None);
    }

    #[test]
    fn rejects_ragged_rows() {
        assert!(Msa::new(
            vec!["a".into(), "b".into()],
            vec![b"ACG".to_vec(), b"AC".to_vec()],
            b"ACGT"
        )
        .is_err());
    }

    #[test]
    fn rejects_empty_input() {
        assert!(Msa::new(vec![], vec![], b"ACGT").is_err());
        assert!(Msa::new(vec!["a".into()], vec![b"".to_vec()], b"ACGT").is_err());
        assert!(Msa::new(vec!["a".into()], vec![b"A".to_vec()], b"").is_err());
    }
}
