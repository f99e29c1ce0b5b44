//! Domain entities for the Artifacts domain
//!
//! An artifact is a named unit of stored data. It is either uploaded against a
//! prep template (a lineage root) or produced by processing one or more
//! existing artifacts with a command and parameter set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::submission::{EbiSubmission, VampsSubmission};
use crate::domain::vocabulary::{Vocabulary, VocabularyId};
use crate::error::{ArtifactError, Result};

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

surrogate_id!(
    /// Store-assigned artifact id
    ArtifactId
);
surrogate_id!(
    /// Owning study id
    StudyId
);
surrogate_id!(
    /// Upload (prep) template id
    PrepTemplateId
);
surrogate_id!(FilepathId);
surrogate_id!(CommandId);
surrogate_id!(ParameterSetId);

/// Artifact visibility level
///
/// Any level may be set from any other; the only rule attached to visibility
/// is that public artifacts cannot be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    AwaitingApproval,
    #[default]
    Sandbox,
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::AwaitingApproval => "awaiting_approval",
            Visibility::Sandbox => "sandbox",
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Visibility {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "awaiting_approval" => Ok(Visibility::AwaitingApproval),
            "sandbox" => Ok(Visibility::Sandbox),
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => Err(ArtifactError::UnknownVocabulary {
                category: Vocabulary::Visibility,
                value: other.to_string(),
            }),
        }
    }
}

/// The (command, parameter set) pair that produced a derived artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingParameters {
    pub command_id: CommandId,
    pub parameter_set_id: ParameterSetId,
}

impl ProcessingParameters {
    pub fn new(command_id: CommandId, parameter_set_id: ParameterSetId) -> Self {
        Self {
            command_id,
            parameter_set_id,
        }
    }
}

/// A file supplied at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFilepath {
    pub path: String,
    pub filepath_type: String,
}

impl NewFilepath {
    pub fn new(path: impl Into<String>, filepath_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filepath_type: filepath_type.into(),
        }
    }
}

/// A stored file attached to an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filepath {
    pub id: FilepathId,
    pub path: String,
    pub filepath_type: String,
}

/// Upload template seeding a lineage graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepTemplate {
    pub id: PrepTemplateId,
    pub study_id: StudyId,
    pub data_type: String,
    /// Back-reference to the root artifact uploaded against this template
    pub artifact_id: Option<ArtifactId>,
}

/// Artifact entity as committed in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub timestamp: DateTime<Utc>,
    pub visibility: Visibility,
    pub artifact_type: String,
    pub data_type: String,
    /// Present iff the artifact has parents
    pub processing_parameters: Option<ProcessingParameters>,
    pub study_id: StudyId,
    pub ebi: EbiSubmission,
    pub vamps: VampsSubmission,
}

impl Artifact {
    pub fn can_submit_to_ebi(&self) -> bool {
        self.ebi.is_supported()
    }

    pub fn can_submit_to_vamps(&self) -> bool {
        self.vamps.is_supported()
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Whether the artifact was produced by processing (has parents)
    pub fn is_derived(&self) -> bool {
        self.processing_parameters.is_some()
    }
}

/// Values written when a new artifact row is inserted
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInsert {
    pub timestamp: DateTime<Utc>,
    pub visibility_id: VocabularyId,
    pub artifact_type_id: VocabularyId,
    pub data_type_id: VocabularyId,
    pub processing_parameters: Option<ProcessingParameters>,
    pub can_submit_to_ebi: bool,
    pub can_submit_to_vamps: bool,
}

/// Where a new artifact comes from, after argument validation
#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    /// Uploaded by a user against a prep template
    Uploaded { prep_template: PrepTemplateId },
    /// Produced by processing existing artifacts
    Processed {
        parents: Vec<ArtifactId>,
        parameters: ProcessingParameters,
    },
}

/// Arguments of an artifact creation call
///
/// Fields mirror the creation contract one to one so contradictory inputs can
/// be expressed and rejected; `provenance()` turns a valid combination into a
/// [`Provenance`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewArtifact {
    pub filepaths: Vec<NewFilepath>,
    pub artifact_type: String,
    pub prep_template: Option<PrepTemplateId>,
    pub parents: Vec<ArtifactId>,
    pub processing_parameters: Option<ProcessingParameters>,
    pub can_submit_to_ebi: bool,
    pub can_submit_to_vamps: bool,
}

impl NewArtifact {
    pub fn new(filepaths: Vec<NewFilepath>, artifact_type: impl Into<String>) -> Self {
        Self {
            filepaths,
            artifact_type: artifact_type.into(),
            ..Default::default()
        }
    }

    /// Root artifact uploaded against `prep_template`
    pub fn uploaded(
        filepaths: Vec<NewFilepath>,
        artifact_type: impl Into<String>,
        prep_template: PrepTemplateId,
    ) -> Self {
        Self::new(filepaths, artifact_type).with_prep_template(prep_template)
    }

    /// Derived artifact produced from `parents` with `parameters`
    pub fn processed(
        filepaths: Vec<NewFilepath>,
        artifact_type: impl Into<String>,
        parents: Vec<ArtifactId>,
        parameters: ProcessingParameters,
    ) -> Self {
        Self::new(filepaths, artifact_type)
            .with_parents(parents)
            .with_processing_parameters(parameters)
    }

    pub fn with_prep_template(mut self, prep_template: PrepTemplateId) -> Self {
        self.prep_template = Some(prep_template);
        self
    }

    pub fn with_parents(mut self, parents: Vec<ArtifactId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_processing_parameters(mut self, parameters: ProcessingParameters) -> Self {
        self.processing_parameters = Some(parameters);
        self
    }

    pub fn submittable_to_ebi(mut self) -> Self {
        self.can_submit_to_ebi = true;
        self
    }

    pub fn submittable_to_vamps(mut self) -> Self {
        self.can_submit_to_vamps = true;
        self
    }

    /// Check the argument combination and classify the artifact.
    ///
    /// Checks run in a fixed order and each failure is reported separately.
    /// Duplicate parent ids collapse to one lineage edge.
    pub fn provenance(&self) -> Result<Provenance> {
        if self.filepaths.is_empty() {
            return Err(ArtifactError::Creation(
                "at least one filepath is required".to_string(),
            ));
        }

        let has_parents = !self.parents.is_empty();
        match (has_parents, self.prep_template, self.processing_parameters) {
            (true, Some(_), _) => Err(ArtifactError::Creation(
                "parents or prep_template should be provided but not both".to_string(),
            )),
            (false, None, _) => Err(ArtifactError::Creation(
                "at least parents or prep_template must be provided".to_string(),
            )),
            (true, None, None) => Err(ArtifactError::Creation(
                "if parents is provided, processing_parameters should also be provided"
                    .to_string(),
            )),
            (false, Some(_), Some(_)) => Err(ArtifactError::Creation(
                "if prep_template is provided, processing_parameters should not be provided"
                    .to_string(),
            )),
            (true, None, Some(parameters)) => {
                let mut seen = BTreeSet::new();
                let parents = self
                    .parents
                    .iter()
                    .copied()
                    .filter(|id| seen.insert(*id))
                    .collect();
                Ok(Provenance::Processed {
                    parents,
                    parameters,
                })
            }
            (false, Some(prep_template), None) => Ok(Provenance::Uploaded { prep_template }),
        }
    }
}
