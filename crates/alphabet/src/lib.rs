//! Closed symbol alphabets for aligned sequence data.
//!
//! Every sequence column is typed by one of two alphabets: [`Nucleotide`]
//! (IUPAC codes) or [`AminoAcid`]. An alphabet is a closed enum whose
//! declared order is load-bearing: it fixes the index used by dense
//! per-symbol tables ([`SymbolMap`]) and the on-disk symbol encoding.

mod amino_acid;
mod nucleotide;
mod symbol_map;

pub use amino_acid::AminoAcid;
pub use nucleotide::Nucleotide;
pub use symbol_map::SymbolMap;

/// A symbol of a closed sequence alphabet.
///
/// Implementations are plain fieldless enums. `SYMBOLS` lists every
/// variant in declared order and `index` returns a symbol's offset into
/// that list.
pub trait Symbol:
    Copy + Eq + Ord + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static
{
    /// Human-readable alphabet name used in error messages.
    const NAME: &'static str;

    /// Number of symbols in the alphabet.
    const COUNT: usize;

    /// All symbols, in declared order.
    const SYMBOLS: &'static [Self];

    /// The symbol that encodes missing / unobserved data.
    const MISSING: Self;

    /// Symbols that are legal targets of a mutation. Excludes ambiguity
    /// codes and the missing symbol.
    const VALID_MUTATION_SYMBOLS: &'static [Self];

    /// Offset of this symbol within [`Symbol::SYMBOLS`].
    fn index(self) -> usize;

    /// Inverse of [`Symbol::index`].
    fn from_index(index: usize) -> Option<Self>;

    /// Parse one sequence character, case-insensitively.
    fn from_char(chr: char) -> Option<Self>;

    /// The canonical (upper-case) character of this symbol.
    fn to_char(self) -> char;

    /// The concrete symbols matched by this symbol when it is read as an
    /// ambiguity code. Concrete symbols expand to themselves.
    fn ambiguity_expansion(self) -> &'static [Self];
}
