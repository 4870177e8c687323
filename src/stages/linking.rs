//! Rule-based entity linking over canonical text.
//!
//! Patterns are written in canonical form (no hamza seats, no diacritics) so
//! they match whatever the canonicalizer produced. Every mention is only a
//! suggestion: `approved` starts false and changes through
//! [`EntityMention::approve`], which returns a new mention.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{check_stop, Stage, StageCard, StageProduct};
use crate::canonical::CanonicalText;
use crate::domain::RunContext;
use crate::error::{CoreError, CoreResult};

const MENTION_CONFIDENCE: f64 = 0.6;

const PERSON_PATTERNS: &[&str] = &[
    r"(?:ابن|ابو|ابي)\s+\w+",
    r"(?:الامام|الشيخ|العلامة|الحافظ)\s+\w+",
];
const BOOK_PATTERNS: &[&str] = &[r"(?:كتاب|المقدمة|الرسالة|المختصر|الموطا|الصحيح)"];
const CONCEPT_PATTERNS: &[&str] = &[r"(?:العمران|الاجتماع|العصبية|الملك|الخلافة|الحضارة)"];

/// Kind of entity a pattern detects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Book,
    Concept,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Book => "book",
            EntityType::Concept => "concept",
        }
    }
}

/// A suggested entity mention with canonical offsets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub text: String,
    pub entity_type: EntityType,
    pub confidence: f64,
    pub canonical_start: usize,
    pub canonical_end: usize,
    pub source_id: String,
    pub suggested_id: String,
    pub approved: bool,
}

impl EntityMention {
    /// Approved copy of this suggestion
    pub fn approve(&self) -> Self {
        Self {
            approved: true,
            ..self.clone()
        }
    }
}

struct Linker {
    patterns: Vec<(EntityType, Regex)>,
}

impl Linker {
    fn new() -> CoreResult<Self> {
        let groups = [
            (EntityType::Person, PERSON_PATTERNS),
            (EntityType::Book, BOOK_PATTERNS),
            (EntityType::Concept, CONCEPT_PATTERNS),
        ];

        let mut patterns = Vec::new();
        for (entity_type, sources) in groups {
            for source in sources {
                let regex = Regex::new(source).map_err(|e| {
                    CoreError::StructuralInvalidity(format!("bad {} pattern: {}", entity_type.as_str(), e))
                })?;
                patterns.push((entity_type, regex));
            }
        }
        Ok(Self { patterns })
    }

    fn link(&self, canonical: &str, source_id: &str) -> Vec<EntityMention> {
        // regex reports byte offsets; spans use character offsets
        let char_index = |byte: usize| canonical[..byte].chars().count();

        let mut mentions = Vec::new();
        for (entity_type, regex) in &self.patterns {
            for found in regex.find_iter(canonical) {
                let text = found.as_str().to_string();
                let prefix: String = text.chars().take(10).collect();
                mentions.push(EntityMention {
                    suggested_id: format!("ent_{}_{}", entity_type.as_str(), prefix),
                    text,
                    entity_type: *entity_type,
                    confidence: MENTION_CONFIDENCE,
                    canonical_start: char_index(found.start()),
                    canonical_end: char_index(found.end()),
                    source_id: source_id.to_string(),
                    approved: false,
                });
            }
        }
        mentions
    }
}

/// Find entity mentions in canonical text
pub fn link_entities(canonical: &str, source_id: &str) -> CoreResult<Vec<EntityMention>> {
    Ok(Linker::new()?.link(canonical, source_id))
}

/// Input of the linking stage
#[derive(Debug, Clone)]
pub struct LinkingInput {
    pub canonical: Arc<CanonicalText>,
    pub source_id: String,
}

/// The entity linking stage
pub struct LinkingStage {
    linker: Linker,
}

impl LinkingStage {
    pub fn new() -> CoreResult<Self> {
        Ok(Self {
            linker: Linker::new()?,
        })
    }
}

#[async_trait::async_trait]
impl Stage for LinkingStage {
    type Input = LinkingInput;
    type Output = Vec<EntityMention>;

    fn card(&self) -> StageCard {
        StageCard {
            id: "link",
            name: "Entity Linking",
            version: "2.0.0",
            metered: false,
        }
    }

    async fn run(&self, ctx: &mut RunContext, input: LinkingInput) -> CoreResult<StageProduct<Vec<EntityMention>>> {
        if input.canonical.as_str().trim().is_empty() {
            return Err(CoreError::EmptyInput("no text to link".to_string()));
        }
        check_stop(ctx)?;

        let mentions = self.linker.link(input.canonical.as_str(), &input.source_id);
        debug!(mentions = mentions.len(), "Entity mentions suggested");

        let count_of = |kind: EntityType| mentions.iter().filter(|m| m.entity_type == kind).count();
        let summary = json!({
            "count": mentions.len(),
            "person": count_of(EntityType::Person),
            "book": count_of(EntityType::Book),
            "concept": count_of(EntityType::Concept),
        });
        Ok(StageProduct::new(mentions, summary))
    }
}
