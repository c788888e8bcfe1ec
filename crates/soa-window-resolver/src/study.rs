//! Whole-study resolution.
//!
//! A study run loads the protocol once and resolves every enrolled subject
//! with its own [`VisitResolver`]. One subject's failure is recorded next to
//! its id and never aborts the batch; only protocol-level failures do.

use std::time::{Duration, Instant};

use soa_protocol::ProtocolGraph;
use tracing::{info, warn};

use crate::config::ResolverConfig;
use crate::error::{ResolutionStage, ResolveError, ResolveResult};
use crate::resolver::VisitResolver;
use crate::result::{SubjectResolution, TierSummary};
use crate::traits::ClinicalDataGateway;

/// Result of resolving one subject inside a study run.
#[derive(Debug)]
pub struct SubjectReport {
    /// The subject.
    pub subject_id: String,
    /// The subject's resolution, or why it failed.
    pub result: ResolveResult<SubjectResolution>,
}

impl SubjectReport {
    /// Returns true if the subject resolved.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of resolving every subject of a study.
#[derive(Debug)]
pub struct StudyResolution {
    /// The study.
    pub study_id: String,
    /// The protocol graph all subjects were resolved against.
    pub protocol: ProtocolGraph,
    /// One report per enrolled subject, in enrolment order.
    pub reports: Vec<SubjectReport>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl StudyResolution {
    /// Iterates the subjects that resolved.
    pub fn succeeded(&self) -> impl Iterator<Item = &SubjectResolution> {
        self.reports.iter().filter_map(|r| r.result.as_ref().ok())
    }

    /// Iterates the subjects that failed, with their errors.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &ResolveError)> {
        self.reports
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.subject_id.as_str(), e)))
    }

    /// Gets the report of one subject.
    pub fn get(&self, subject_id: &str) -> Option<&SubjectReport> {
        self.reports.iter().find(|r| r.subject_id == subject_id)
    }

    /// Tier totals across all resolved subjects.
    pub fn summary(&self) -> TierSummary {
        TierSummary::from_outcomes(self.succeeded().flat_map(|r| r.outcomes.iter()))
    }
}

/// Resolves all subjects of a study.
///
/// # Example
///
/// ```ignore
/// use soa_window_resolver::{ResolverConfig, StudyResolver};
///
/// let study = StudyResolver::new(&gateway, ResolverConfig::default());
/// let run = study.resolve_study("H2Q-MC-LZZT")?;
/// for (subject_id, err) in run.failed() {
///     eprintln!("{subject_id}: {err} ({} stage)", err.stage());
/// }
/// ```
pub struct StudyResolver<'a> {
    gateway: &'a dyn ClinicalDataGateway,
    config: ResolverConfig,
}

impl<'a> StudyResolver<'a> {
    /// Creates a study resolver.
    pub fn new(gateway: &'a dyn ClinicalDataGateway, config: ResolverConfig) -> Self {
        Self { gateway, config }
    }

    /// Returns a reference to the resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Loads the study's protocol and resolves every enrolled subject.
    ///
    /// # Errors
    ///
    /// Fails only for protocol-level problems (missing or malformed protocol)
    /// or when the subject list itself cannot be fetched. Per-subject
    /// failures are reported in [`StudyResolution::reports`].
    pub fn resolve_study(&self, study_id: &str) -> ResolveResult<StudyResolution> {
        let start = Instant::now();
        let protocol = VisitResolver::with_config(self.gateway, study_id, self.config.clone())
            .load_protocol()?;

        let subject_ids: Vec<String> = self
            .gateway
            .find_subjects(study_id)
            .map_err(|e| ResolveError::gateway(ResolutionStage::Subject, e))?
            .into_iter()
            .map(|s| s.subject_id)
            .collect();
        info!(study = study_id, subjects = subject_ids.len(), "resolving study");

        let reports = self.resolve_subjects(study_id, &protocol, &subject_ids);
        let run = StudyResolution {
            study_id: study_id.to_string(),
            protocol,
            reports,
            duration: start.elapsed(),
        };

        let failures = run.failed().count();
        if failures > 0 {
            warn!(study = study_id, failures, "some subjects failed to resolve");
        }
        info!(study = study_id, summary = %run.summary(), "resolved study");
        Ok(run)
    }

    /// Resolves the given subjects against an already-loaded protocol.
    ///
    /// Each subject gets a fresh resolver, so no cache state crosses subject
    /// boundaries. With the `parallel` feature and `config.parallel` set,
    /// subjects are resolved on the rayon thread pool.
    pub fn resolve_subjects(
        &self,
        study_id: &str,
        protocol: &ProtocolGraph,
        subject_ids: &[String],
    ) -> Vec<SubjectReport> {
        #[cfg(feature = "parallel")]
        if self.config.parallel {
            use rayon::prelude::*;
            return subject_ids
                .par_iter()
                .map(|id| self.resolve_one(study_id, protocol, id))
                .collect();
        }

        subject_ids
            .iter()
            .map(|id| self.resolve_one(study_id, protocol, id))
            .collect()
    }

    fn resolve_one(
        &self,
        study_id: &str,
        protocol: &ProtocolGraph,
        subject_id: &str,
    ) -> SubjectReport {
        let resolver = VisitResolver::with_config(self.gateway, study_id, self.config.clone());
        let result = resolver.resolve(subject_id, protocol);
        if let Err(ref err) = result {
            warn!(
                subject = subject_id,
                stage = %err.stage(),
                error = %err,
                "subject resolution failed"
            );
        }
        SubjectReport {
            subject_id: subject_id.to_string(),
            result,
        }
    }
}
