//! Visit resolver implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use soa_protocol::{compute_window, DatePredicate, EvidenceWindow, ProtocolGraph, VisitPlan};
use tracing::{debug, info, warn};

use crate::cache::{LookupCache, LookupKey, LookupStats};
use crate::config::{MissingEncounterPolicy, ResolverConfig};
use crate::error::{ResolutionStage, ResolveError, ResolveResult};
use crate::result::{MatchTier, ResolutionStats, SubjectResolution, VisitOutcome};
use crate::traits::{ClinicalDataGateway, Encounter, ResourceKind, Subject};

/// Resolves a protocol's visits for the subjects of one study.
///
/// The resolver bridges a [`ProtocolGraph`] and any data source that
/// implements [`ClinicalDataGateway`]. It owns its lookup caches, so one
/// instance never shares state with another; create a fresh resolver per
/// run (or per subject when resolving in parallel).
///
/// # Example
///
/// ```ignore
/// use soa_window_resolver::VisitResolver;
///
/// let resolver = VisitResolver::new(&gateway, "H2Q-MC-LZZT");
/// let protocol = resolver.load_protocol()?;
/// let resolution = resolver.resolve("01-701-1015", &protocol)?;
///
/// for outcome in resolution.iter() {
///     println!("{} {:?} {}", outcome.visit_id, outcome.tier, outcome.datequery_description());
/// }
/// ```
pub struct VisitResolver<'a> {
    /// Reference to the clinical data source.
    gateway: &'a dyn ClinicalDataGateway,
    /// The study subjects are resolved in.
    study_id: String,
    /// Resolver configuration.
    config: ResolverConfig,
    /// Memoized subject lookups.
    subjects: LookupCache<LookupKey, Option<Subject>>,
    /// Memoized encounter lookups keyed by (subject, visit).
    encounters: LookupCache<LookupKey, Option<Encounter>>,
    /// Count queries issued so far.
    count_queries: AtomicUsize,
}

impl<'a> VisitResolver<'a> {
    /// Creates a resolver with default configuration.
    pub fn new(gateway: &'a dyn ClinicalDataGateway, study_id: impl Into<String>) -> Self {
        Self::with_config(gateway, study_id, ResolverConfig::default())
    }

    /// Creates a resolver with custom configuration.
    pub fn with_config(
        gateway: &'a dyn ClinicalDataGateway,
        study_id: impl Into<String>,
        config: ResolverConfig,
    ) -> Self {
        let subjects = LookupCache::with_capacity(config.cache_capacity);
        let encounters = LookupCache::with_capacity(config.cache_capacity);
        Self {
            gateway,
            study_id: study_id.into(),
            config,
            subjects,
            encounters,
            count_queries: AtomicUsize::new(0),
        }
    }

    /// Returns the study this resolver serves.
    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    /// Returns a reference to the resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Returns the encounter lookup cache.
    pub fn encounter_cache(&self) -> &LookupCache<LookupKey, Option<Encounter>> {
        &self.encounters
    }

    /// Returns the subject lookup cache.
    pub fn subject_cache(&self) -> &LookupCache<LookupKey, Option<Subject>> {
        &self.subjects
    }

    /// Loads the study's protocol from the gateway and builds its graph.
    ///
    /// # Errors
    ///
    /// * [`ResolveError::ProtocolNotFound`] if the study has no protocol
    /// * [`ResolveError::Protocol`] if the protocol is structurally unusable
    pub fn load_protocol(&self) -> ResolveResult<ProtocolGraph> {
        let definition = self
            .gateway
            .find_protocol_definition(&self.study_id)
            .map_err(|e| ResolveError::gateway(ResolutionStage::Protocol, e))?
            .ok_or_else(|| ResolveError::ProtocolNotFound(self.study_id.clone()))?;

        let graph = ProtocolGraph::from_definition(&definition, &self.config.build_options())?;
        info!(
            study = %self.study_id,
            protocol = %definition.id,
            visits = graph.len(),
            "loaded protocol"
        );
        Ok(graph)
    }

    /// Resolves every visit of the protocol for one subject.
    ///
    /// No partial result is produced on failure.
    ///
    /// # Errors
    ///
    /// * [`ResolveError::SubjectNotFound`] if the subject is not enrolled
    /// * [`ResolveError::Protocol`] if the graph fails validation, for example
    ///   with zero or several index visits
    /// * [`ResolveError::IndexEncounterNotFound`] if no anchor can be established
    /// * [`ResolveError::Gateway`] if any gateway call fails
    pub fn resolve(
        &self,
        subject_id: &str,
        protocol: &ProtocolGraph,
    ) -> ResolveResult<SubjectResolution> {
        let start = Instant::now();
        let subjects_before = self.subjects.stats();
        let encounters_before = self.encounters.stats();
        let counts_before = self.count_queries.load(Ordering::Relaxed);

        info!(study = %self.study_id, subject = subject_id, "resolving subject");

        let subject = self
            .lookup_subject(subject_id)?
            .ok_or_else(|| ResolveError::SubjectNotFound {
                subject_id: subject_id.to_string(),
                study_id: self.study_id.clone(),
            })?;

        // The graph may have been assembled by hand since it was built.
        protocol.validate()?;
        let index = protocol.index_visit()?;
        let anchor = self
            .lookup_encounter(&subject, &index.visit_id, ResolutionStage::Anchor)?
            .map(|encounter| encounter.period.start.date())
            .ok_or_else(|| ResolveError::IndexEncounterNotFound {
                subject_id: subject.subject_id.clone(),
                visit_id: index.visit_id.clone(),
            })?;
        debug!(subject = subject_id, visit = %index.visit_id, %anchor, "anchor established");

        let outcomes = protocol
            .iter()
            .map(|plan| self.resolve_visit(&subject, anchor, plan))
            .collect::<ResolveResult<Vec<_>>>()?;

        let stats = ResolutionStats {
            duration: start.elapsed(),
            gateway_lookups: fetched_since(&self.subjects.stats(), &subjects_before)
                + fetched_since(&self.encounters.stats(), &encounters_before),
            cache_hits: hits_since(&self.subjects.stats(), &subjects_before)
                + hits_since(&self.encounters.stats(), &encounters_before),
            count_queries: self.count_queries.load(Ordering::Relaxed) - counts_before,
        };

        let resolution = SubjectResolution {
            subject,
            index_visit_id: index.visit_id.clone(),
            anchor,
            outcomes,
            stats,
        };
        info!(
            subject = subject_id,
            summary = %resolution.summary(),
            elapsed_ms = resolution.stats.duration.as_millis() as u64,
            "resolved subject"
        );
        Ok(resolution)
    }

    /// Resolves a single visit against an established anchor.
    fn resolve_visit(
        &self,
        subject: &Subject,
        anchor: chrono::NaiveDate,
        plan: &VisitPlan,
    ) -> ResolveResult<VisitOutcome> {
        let encounter = self.lookup_encounter(subject, &plan.visit_id, ResolutionStage::Visit)?;

        let window = match &encounter {
            Some(found) if found.period.is_point_in_time() => {
                EvidenceWindow::from_encounter(found.period.start.date())
            }
            Some(_) => compute_window(anchor, plan),
            None => match self.config.missing_encounter {
                MissingEncounterPolicy::Skip => {
                    warn!(
                        subject = %subject.subject_id,
                        visit = %plan.visit_id,
                        "no encounter for visit, skipping"
                    );
                    EvidenceWindow::Skipped
                }
                MissingEncounterPolicy::PredictWindow => compute_window(anchor, plan),
            },
        };

        if window.is_unconstrained() {
            warn!(
                subject = %subject.subject_id,
                visit = %plan.visit_id,
                "visit window is unconstrained"
            );
        }

        let counts = match window.predicate() {
            Some(predicate) => self.count_records(subject, &predicate)?,
            None => BTreeMap::new(),
        };
        let total: u64 = counts.values().sum();

        Ok(VisitOutcome {
            visit_id: plan.visit_id.clone(),
            ordinal: plan.ordinal,
            is_index: plan.is_index,
            tier: MatchTier::classify(&window, total),
            window,
            counts,
            encounter_id: encounter.map(|e| e.id),
        })
    }

    /// Counts corroborating records of every configured kind.
    fn count_records(
        &self,
        subject: &Subject,
        predicate: &DatePredicate,
    ) -> ResolveResult<BTreeMap<ResourceKind, u64>> {
        let mut counts = BTreeMap::new();
        for &kind in &self.config.resource_kinds {
            self.count_queries.fetch_add(1, Ordering::Relaxed);
            let count = self
                .gateway
                .count_clinical_records(subject, kind, predicate)
                .map_err(|e| ResolveError::gateway(ResolutionStage::Visit, e))?;
            *counts.entry(kind).or_insert(0) += count;
        }
        Ok(counts)
    }

    fn lookup_subject(&self, subject_id: &str) -> ResolveResult<Option<Subject>> {
        let key = LookupKey::subject(subject_id);
        if self.subjects.contains(&key) {
            debug!(subject = subject_id, "subject cache hit");
        }
        self.subjects.get_or_fetch(key, || {
            debug!(subject = subject_id, "subject cache miss");
            self.gateway
                .find_subject(subject_id, &self.study_id)
                .map_err(|e| ResolveError::gateway(ResolutionStage::Subject, e))
        })
    }

    fn lookup_encounter(
        &self,
        subject: &Subject,
        visit_id: &str,
        stage: ResolutionStage,
    ) -> ResolveResult<Option<Encounter>> {
        let key = LookupKey::visit(subject.subject_id.as_str(), visit_id);
        if self.encounters.contains(&key) {
            debug!(subject = %subject.subject_id, visit = visit_id, "encounter cache hit");
        }
        self.encounters.get_or_fetch(key, || {
            debug!(subject = %subject.subject_id, visit = visit_id, "encounter cache miss");
            self.gateway
                .find_encounter_for_visit(subject, visit_id)
                .map_err(|e| ResolveError::gateway(stage, e))
        })
    }
}

fn fetched_since(now: &LookupStats, before: &LookupStats) -> usize {
    now.fetches.saturating_sub(before.fetches)
}

fn hits_since(now: &LookupStats, before: &LookupStats) -> usize {
    now.hits.saturating_sub(before.hits)
}
