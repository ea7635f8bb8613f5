use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use eventsignal_common::CanonicalEvent;

/// Identity of an event across sources: normalized title, date and location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFingerprint {
    pub title: String,
    pub date: NaiveDate,
    pub location: String,
}

impl EventFingerprint {
    pub fn of(event: &CanonicalEvent) -> Self {
        Self {
            title: normalize_key(&event.title),
            date: event.when_date,
            location: event.location.as_deref().map(normalize_key).unwrap_or_default(),
        }
    }
}

/// Lowercase, punctuation to spaces, whitespace collapsed.
pub fn normalize_key(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub events: Vec<CanonicalEvent>,
    pub duplicates_removed: usize,
}

/// Collapses events that share a fingerprint into one record.
///
/// With `title_similarity` at 1.0 titles must match exactly after
/// normalization, and deduplicating the output again is a no-op. Lower values
/// also merge titles whose normalized Levenshtein similarity reaches the
/// threshold (same date and location still required); that relation is not
/// transitive, so a second pass may merge further.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    title_similarity: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::exact()
    }
}

impl Deduplicator {
    pub fn exact() -> Self {
        Self {
            title_similarity: 1.0,
        }
    }

    pub fn with_title_similarity(title_similarity: f64) -> Self {
        Self {
            title_similarity: title_similarity.clamp(0.0, 1.0),
        }
    }

    pub fn deduplicate(&self, events: Vec<CanonicalEvent>) -> DedupOutcome {
        let total = events.len();
        let mut kept: Vec<(EventFingerprint, CanonicalEvent)> = Vec::with_capacity(total);
        let mut by_fingerprint: HashMap<EventFingerprint, usize> = HashMap::new();

        for event in events {
            let fingerprint = EventFingerprint::of(&event);
            let existing = by_fingerprint
                .get(&fingerprint)
                .copied()
                .or_else(|| self.find_similar(&kept, &fingerprint));

            match existing {
                Some(index) => {
                    debug!(
                        title = event.title.as_str(),
                        date = %event.when_date,
                        source = %event.source_organization,
                        "Merging duplicate event"
                    );
                    let slot = &mut kept[index].1;
                    *slot = merge(slot, &event);
                }
                None => {
                    by_fingerprint.insert(fingerprint.clone(), kept.len());
                    kept.push((fingerprint, event));
                }
            }
        }

        let events: Vec<CanonicalEvent> = kept.into_iter().map(|(_, event)| event).collect();
        let duplicates_removed = total - events.len();
        if duplicates_removed > 0 {
            info!(duplicates_removed, unique = events.len(), "Deduplicated events");
        }
        DedupOutcome {
            events,
            duplicates_removed,
        }
    }

    fn find_similar(
        &self,
        kept: &[(EventFingerprint, CanonicalEvent)],
        fingerprint: &EventFingerprint,
    ) -> Option<usize> {
        if self.title_similarity >= 1.0 {
            return None;
        }
        kept.iter().position(|(candidate, _)| {
            candidate.date == fingerprint.date
                && candidate.location == fingerprint.location
                && strsim::normalized_levenshtein(&candidate.title, &fingerprint.title)
                    >= self.title_similarity
        })
    }
}

/// Merge two reports of the same event. The record with more optional fields
/// wins (ties go to `earlier`) and supplies title, date and location; the
/// other fills any gaps. Organizations are combined in first-seen order.
pub fn merge(earlier: &CanonicalEvent, later: &CanonicalEvent) -> CanonicalEvent {
    let (preferred, other) = if later.completeness() > earlier.completeness() {
        (later, earlier)
    } else {
        (earlier, later)
    };

    let mut source_organization = earlier.source_organization.clone();
    source_organization.absorb(&later.source_organization);

    CanonicalEvent {
        title: preferred.title.clone(),
        description: preferred.description.clone().or_else(|| other.description.clone()),
        when_date: preferred.when_date,
        when_time: preferred.when_time.or(other.when_time),
        location: preferred.location.clone(),
        registration_url: preferred
            .registration_url
            .clone()
            .or_else(|| other.registration_url.clone()),
        image_url: preferred.image_url.clone().or_else(|| other.image_url.clone()),
        event_url: preferred.event_url.clone().or_else(|| other.event_url.clone()),
        target_age: preferred.target_age.clone().or_else(|| other.target_age.clone()),
        source_organization,
        scraped_at: earlier.scraped_at.min(later.scraped_at),
    }
}
