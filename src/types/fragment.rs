//! Fragment types
//!
//! A fragment is the atomic, immutable unit of observed information handed
//! over by the normalization layer. The ledger never edits one; it only
//! orders, hashes and groups them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FragmentId;

/// Declared relationship kinds between two fragments
///
/// The kind is carried for consumers. Structural analysis only looks at
/// whether a relation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Continues the same narrative
    Continuation,
    /// Contradicts the other fragment
    Contradiction,
    /// Related but independent
    Parallel,
    /// Cites the other fragment
    Reference,
    /// Explicitly unrelated
    Unrelated,
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationType::Continuation => write!(f, "continuation"),
            RelationType::Contradiction => write!(f, "contradiction"),
            RelationType::Parallel => write!(f, "parallel"),
            RelationType::Reference => write!(f, "reference"),
            RelationType::Unrelated => write!(f, "unrelated"),
        }
    }
}

/// Explicit relation declared upstream between two fragments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentRelation {
    pub source: FragmentId,
    pub target: FragmentId,
    pub relation_type: RelationType,
    /// 0.0 to 1.0, carried through untouched
    pub confidence: f64,
}

impl FragmentRelation {
    pub fn new(source: FragmentId, target: FragmentId, relation_type: RelationType) -> Self {
        Self {
            source,
            target,
            relation_type,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Endpoints that are not `id`, source first
    pub fn endpoints_other_than<'a>(
        &'a self,
        id: &'a FragmentId,
    ) -> impl Iterator<Item = &'a FragmentId> + 'a {
        [&self.source, &self.target]
            .into_iter()
            .filter(move |endpoint| *endpoint != id)
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

/// Ingestion tier of the capturing source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    /// Synthetic fixtures
    Mock,
    /// Live public feed
    #[default]
    PublicRss,
    /// Recorded feed replayed in shadow mode
    ShadowRss,
}

/// Source metadata captured at ingestion, never modified afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_id: String,
    /// Subjective source reliability, 0.0 to 1.0
    pub confidence: f64,
    #[serde(default)]
    pub tier: SourceTier,
}

impl Default for SourceMetadata {
    fn default() -> Self {
        Self {
            source_id: "unknown".to_string(),
            confidence: 1.0,
            tier: SourceTier::default(),
        }
    }
}

/// Immutable normalized narrative fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: FragmentId,
    pub content_hash: String,
    /// When the described event happened
    pub event_timestamp: DateTime<Utc>,
    /// When upstream captured it
    pub ingestion_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default)]
    pub entities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explicit_relations: Vec<FragmentRelation>,
    #[serde(default)]
    pub source_metadata: SourceMetadata,
}

impl Fragment {
    pub fn new(
        fragment_id: impl Into<FragmentId>,
        content_hash: impl Into<String>,
        event_timestamp: DateTime<Utc>,
        ingestion_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            content_hash: content_hash.into(),
            event_timestamp,
            ingestion_timestamp,
            topics: BTreeSet::new(),
            entities: BTreeSet::new(),
            explicit_relations: Vec::new(),
            source_metadata: SourceMetadata::default(),
        }
    }

    /// Build a fragment whose id and content hash derive from the raw capture
    pub fn from_capture(
        source_id: &str,
        payload: &str,
        event_timestamp: DateTime<Utc>,
        ingestion_timestamp: DateTime<Utc>,
    ) -> Self {
        let (fragment_id, content_hash) =
            FragmentId::generate(source_id, &ingestion_timestamp, payload);
        let mut fragment = Self::new(fragment_id, content_hash, event_timestamp, ingestion_timestamp);
        fragment.source_metadata.source_id = source_id.to_string();
        fragment
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities.extend(entities.into_iter().map(Into::into));
        self
    }

    /// Declare a relation from this fragment to `target`
    pub fn with_relation(mut self, target: impl Into<FragmentId>, relation_type: RelationType) -> Self {
        let relation = FragmentRelation::new(self.fragment_id.clone(), target.into(), relation_type);
        self.explicit_relations.push(relation);
        self
    }

    pub fn with_source(mut self, source_metadata: SourceMetadata) -> Self {
        self.source_metadata = source_metadata;
        self
    }

    pub fn shares_topic_with(&self, other: &Fragment) -> bool {
        !self.topics.is_disjoint(&other.topics)
    }
}
