//! Configuration types for the visit resolver.

use soa_protocol::{BuildOptions, UnitPolicy};

use crate::traits::ResourceKind;

/// What to do with a visit whose own encounter cannot be located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingEncounterPolicy {
    /// Mark the visit skipped and exclude it from querying and tiering.
    #[default]
    Skip,
    /// Query the predicted window anyway, for sources without visit linkage.
    PredictWindow,
}

/// Configuration for the visit resolver.
///
/// # Example
///
/// ```rust
/// use soa_window_resolver::{MissingEncounterPolicy, ResolverConfig, ResourceKind};
///
/// let config = ResolverConfig::builder()
///     .with_resource_kinds(vec![ResourceKind::Observation, ResourceKind::Procedure])
///     .with_missing_encounter_policy(MissingEncounterPolicy::PredictWindow)
///     .with_cache_capacity(1_000)
///     .build();
/// assert_eq!(config.resource_kinds.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Record kinds counted as corroborating evidence, queried in order.
    pub resource_kinds: Vec<ResourceKind>,
    /// Policy for non-day offset units when loading a protocol.
    pub unit_policy: UnitPolicy,
    /// Policy for visits with no encounter of their own.
    pub missing_encounter: MissingEncounterPolicy,
    /// Lookup cache capacity (None = unbounded, at most one fetch per key).
    pub cache_capacity: Option<usize>,
    /// Resolve study subjects in parallel (requires `parallel` feature).
    pub parallel: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            resource_kinds: ResourceKind::DEFAULT.to_vec(),
            unit_policy: UnitPolicy::default(),
            missing_encounter: MissingEncounterPolicy::default(),
            cache_capacity: None,
            parallel: false,
        }
    }
}

impl ResolverConfig {
    /// Creates a new builder for ResolverConfig.
    pub fn builder() -> ResolverConfigBuilder {
        ResolverConfigBuilder::default()
    }

    /// Protocol build options derived from this configuration.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions::default().with_unit_policy(self.unit_policy)
    }
}

/// Builder for ResolverConfig.
#[derive(Debug, Clone, Default)]
pub struct ResolverConfigBuilder {
    config: ResolverConfig,
}

impl ResolverConfigBuilder {
    /// Sets the corroborating record kinds.
    pub fn with_resource_kinds(mut self, kinds: Vec<ResourceKind>) -> Self {
        self.config.resource_kinds = kinds;
        self
    }

    /// Sets the unit policy.
    pub fn with_unit_policy(mut self, unit_policy: UnitPolicy) -> Self {
        self.config.unit_policy = unit_policy;
        self
    }

    /// Sets the missing-encounter policy.
    pub fn with_missing_encounter_policy(mut self, policy: MissingEncounterPolicy) -> Self {
        self.config.missing_encounter = policy;
        self
    }

    /// Bounds the lookup cache.
    pub fn with_cache_capacity(mut self, max_entries: usize) -> Self {
        self.config.cache_capacity = Some(max_entries);
        self
    }

    /// Enables or disables parallel study resolution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Builds the ResolverConfig.
    pub fn build(self) -> ResolverConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_config_default() {
        let config = ResolverConfig::default();
        assert_eq!(config.resource_kinds, ResourceKind::DEFAULT.to_vec());
        assert_eq!(config.unit_policy, UnitPolicy::Reject);
        assert_eq!(config.missing_encounter, MissingEncounterPolicy::Skip);
        assert!(config.cache_capacity.is_none());
        assert!(!config.parallel);
    }

    #[test]
    fn test_resolver_config_builder() {
        let config = ResolverConfig::builder()
            .with_resource_kinds(vec![ResourceKind::Encounter])
            .with_unit_policy(UnitPolicy::ApproximateAsDays)
            .with_missing_encounter_policy(MissingEncounterPolicy::PredictWindow)
            .with_cache_capacity(64)
            .with_parallel(true)
            .build();

        assert_eq!(config.resource_kinds, vec![ResourceKind::Encounter]);
        assert_eq!(config.unit_policy, UnitPolicy::ApproximateAsDays);
        assert_eq!(config.missing_encounter, MissingEncounterPolicy::PredictWindow);
        assert_eq!(config.cache_capacity, Some(64));
        assert!(config.parallel);
    }

    #[test]
    fn test_build_options_follow_unit_policy() {
        let config = ResolverConfig::builder()
            .with_unit_policy(UnitPolicy::ApproximateAsDays)
            .build();
        assert_eq!(config.build_options().unit_policy, UnitPolicy::ApproximateAsDays);
    }

    #[test]
    fn test_builder_chaining() {
        let config = ResolverConfig::builder().with_parallel(true).build();
        assert!(config.parallel);
        assert_eq!(config.resource_kinds.len(), 4);
    }
}
