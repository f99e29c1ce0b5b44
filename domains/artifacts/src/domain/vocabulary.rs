//! Controlled vocabularies resolved by the store
//!
//! Category strings such as visibility levels or artifact types are stored
//! once in lookup tables and referenced by id everywhere else.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Internal id of a vocabulary entry
pub type VocabularyId = i64;

/// Controlled vocabulary categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vocabulary {
    Visibility,
    ArtifactType,
    DataType,
    FilepathType,
}

impl Vocabulary {
    pub const ALL: [Vocabulary; 4] = [
        Self::Visibility,
        Self::ArtifactType,
        Self::DataType,
        Self::FilepathType,
    ];

    /// Lookup table backing this vocabulary
    pub fn table(&self) -> &'static str {
        match self {
            Self::Visibility => "visibility",
            Self::ArtifactType => "artifact_type",
            Self::DataType => "data_type",
            Self::FilepathType => "filepath_type",
        }
    }

    /// Primary key column of the lookup table
    pub fn id_column(&self) -> &'static str {
        match self {
            Self::Visibility => "visibility_id",
            Self::ArtifactType => "artifact_type_id",
            Self::DataType => "data_type_id",
            Self::FilepathType => "filepath_type_id",
        }
    }

    /// Entries seeded by the initial migration
    pub fn defaults(&self) -> &'static [&'static str] {
        match self {
            Self::Visibility => &["awaiting_approval", "sandbox", "private", "public"],
            Self::ArtifactType => &[
                "SFF",
                "FASTQ",
                "FASTA",
                "FASTA_Sanger",
                "per_sample_FASTQ",
                "Demultiplexed",
                "BIOM",
            ],
            Self::DataType => &[
                "16S",
                "18S",
                "ITS",
                "Proteomic",
                "Metabolomic",
                "Metagenomic",
                "Multiomic",
            ],
            Self::FilepathType => &[
                "raw_forward_seqs",
                "raw_reverse_seqs",
                "raw_barcodes",
                "raw_sff",
                "preprocessed_fasta",
                "preprocessed_fastq",
                "preprocessed_demux",
                "biom",
                "directory",
                "log",
            ],
        }
    }
}

impl std::fmt::Display for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Visibility => write!(f, "visibility"),
            Self::ArtifactType => write!(f, "artifact type"),
            Self::DataType => write!(f, "data type"),
            Self::FilepathType => write!(f, "filepath type"),
        }
    }
}

/// Maps human-readable category values to stable internal ids.
///
/// Resolution fails with `ArtifactError::UnknownVocabulary` when `value` is
/// not a member of the category.
#[async_trait::async_trait]
pub trait VocabularyResolver: Send {
    async fn resolve(&mut self, category: Vocabulary, value: &str) -> Result<VocabularyId>;
}
