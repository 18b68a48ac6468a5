use serde::{Deserialize, Serialize};

/// The closed set of column types a table may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Date,
    String,
    IndexedString,
    ZstdCompressedString,
    NucleotideSequence,
    AminoAcidSequence,
}

impl ColumnType {
    pub fn is_sequence(self) -> bool {
        matches!(
            self,
            ColumnType::NucleotideSequence | ColumnType::AminoAcidSequence
        )
    }
}

/// A column's name and type, the unit the tuple layer and the filter
/// compiler describe rows with.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnIdentifier {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// The ordered column list of a table plus its designated special
/// columns. The schema is shared by all partitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnIdentifier>,
    /// Name of the STRING column that uniquely identifies a row.
    pub primary_key: String,
    /// Sequence name assumed by nucleotide filter nodes that omit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_nucleotide_sequence: Option<String>,
    /// Sequence name assumed by amino-acid filter nodes that omit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_amino_acid_sequence: Option<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnIdentifier> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// All columns that hold row metadata, i.e. everything except the
    /// sequence columns themselves.
    pub fn metadata_columns(&self) -> impl Iterator<Item = &ColumnIdentifier> {
        self.columns
            .iter()
            .filter(|column| !column.column_type.is_sequence())
    }
}
