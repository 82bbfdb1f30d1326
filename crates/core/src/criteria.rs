//! Namespace match criteria and the matcher.

use serde::{Deserialize, Serialize};

use crate::snapshot::{KeyValues, NamespaceSnapshot};

/// A single (key, allowed values) rule against labels or annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MatchCriterion {
    Label { key: String, allowed: Vec<String> },
    Annotation { key: String, allowed: Vec<String> },
}

impl MatchCriterion {
    pub fn label<K, I, V>(key: K, allowed: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::Label { key: key.into(), allowed: allowed.into_iter().map(Into::into).collect() }
    }

    pub fn annotation<K, I, V>(key: K, allowed: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::Annotation { key: key.into(), allowed: allowed.into_iter().map(Into::into).collect() }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Label { key, .. } | Self::Annotation { key, .. } => key,
        }
    }

    /// True iff the keyed value is present and equals one of `allowed` exactly.
    /// An empty key never matches.
    pub fn matches(&self, snapshot: &NamespaceSnapshot) -> bool {
        let (map, key, allowed): (&KeyValues, &str, &[String]) = match self {
            Self::Label { key, allowed } => (&snapshot.labels, key.as_str(), allowed.as_slice()),
            Self::Annotation { key, allowed } => (&snapshot.annotations, key.as_str(), allowed.as_slice()),
        };
        if key.is_empty() {
            return false;
        }
        map.get(key).is_some_and(|value| allowed.iter().any(|a| a == value))
    }
}

/// Ordered criteria evaluated with OR semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriteriaSet(Vec<MatchCriterion>);

impl CriteriaSet {
    pub fn new(criteria: Vec<MatchCriterion>) -> Self { Self(criteria) }
    pub fn empty() -> Self { Self::default() }

    /// `[Label, Annotation]`, in that order, straight from configuration.
    pub fn from_config(cfg: &CriteriaConfig) -> Self {
        Self(vec![
            MatchCriterion::label(cfg.label_key.clone(), cfg.label_values.iter().cloned()),
            MatchCriterion::annotation(cfg.annotation_key.clone(), cfg.annotation_values.iter().cloned()),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchCriterion> { self.0.iter() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// First criterion that matches, if any.
    pub fn first_match(&self, snapshot: &NamespaceSnapshot) -> Option<&MatchCriterion> {
        self.0.iter().find(|c| c.matches(snapshot))
    }
}

impl From<Vec<MatchCriterion>> for CriteriaSet {
    fn from(v: Vec<MatchCriterion>) -> Self { Self(v) }
}

/// Whether `snapshot` is in scope: any criterion matching is enough.
/// An empty set never matches.
pub fn matches(snapshot: &NamespaceSnapshot, criteria: &CriteriaSet) -> bool {
    criteria.first_match(snapshot).is_some()
}

/// Static startup options; each field is passed through to [`CriteriaSet::from_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CriteriaConfig {
    #[serde(alias = "label-key", alias = "label_key")]
    pub label_key: String,
    #[serde(alias = "label-values", alias = "label_values")]
    pub label_values: Vec<String>,
    #[serde(alias = "annotation-key", alias = "annotation_key")]
    pub annotation_key: String,
    #[serde(alias = "annotation-values", alias = "annotation_values")]
    pub annotation_values: Vec<String>,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        let envs = vec!["staging".to_string(), "production".to_string()];
        Self {
            label_key: "app".to_string(),
            label_values: envs.clone(),
            annotation_key: "env".to_string(),
            annotation_values: envs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(labels: &[(&str, &str)], annos: &[(&str, &str)]) -> NamespaceSnapshot {
        NamespaceSnapshot::new("ns")
            .with_labels(KeyValues::from_pairs(labels.iter().copied()))
            .with_annotations(KeyValues::from_pairs(annos.iter().copied()))
    }

    fn default_set() -> CriteriaSet {
        CriteriaSet::from_config(&CriteriaConfig::default())
    }

    #[test]
    fn empty_set_never_matches() {
        let s = ns(&[("app", "production")], &[("env", "staging")]);
        assert!(!matches(&s, &CriteriaSet::empty()));
        assert!(!matches(&NamespaceSnapshot::default(), &CriteriaSet::empty()));
    }

    #[test]
    fn label_matches_only_exact_allowed_values() {
        let set = CriteriaSet::new(vec![MatchCriterion::label("app", ["staging", "production"])]);
        assert!(matches(&ns(&[("app", "staging")], &[]), &set));
        assert!(matches(&ns(&[("app", "production")], &[]), &set));
        for v in ["", "prod", "Production", "PRODUCTION", "staging ", "production-eu", "dev"] {
            assert!(!matches(&ns(&[("app", v)], &[]), &set), "value {v:?} must not match");
        }
        assert!(!matches(&ns(&[], &[("app", "production")]), &set), "annotation must not satisfy a label rule");
    }

    #[test]
    fn or_across_criteria() {
        let s = ns(&[("app", "dev")], &[("env", "production")]);
        assert!(matches(&s, &default_set()));
        assert_eq!(default_set().first_match(&s).map(MatchCriterion::key), Some("env"));
    }

    #[test]
    fn empty_key_is_inert() {
        let set = CriteriaSet::new(vec![
            MatchCriterion::label("", [""]),
            MatchCriterion::annotation("", ["x"]),
        ]);
        assert!(!matches(&ns(&[("", "")], &[("", "x")]), &set));
        assert!(!matches(&NamespaceSnapshot::default(), &set));
    }

    #[test]
    fn empty_allowed_values_never_match() {
        let set = CriteriaSet::new(vec![MatchCriterion::label("app", Vec::<String>::new())]);
        assert!(!matches(&ns(&[("app", "")], &[]), &set));
    }

    #[test]
    fn missing_maps_are_empty() {
        let s = NamespaceSnapshot::new("bare");
        assert!(!matches(&s, &default_set()));
    }

    #[test]
    fn production_label_scenario() {
        assert!(matches(&ns(&[("app", "production")], &[]), &default_set()));
    }

    #[test]
    fn dev_and_qa_scenario() {
        assert!(!matches(&ns(&[("app", "dev")], &[("env", "qa")]), &default_set()));
    }

    #[test]
    fn arity_is_not_fixed() {
        let set = CriteriaSet::new(vec![
            MatchCriterion::label("tier", ["gold"]),
            MatchCriterion::label("team", ["payments"]),
            MatchCriterion::annotation("owner", ["sre"]),
        ]);
        assert!(matches(&ns(&[("team", "payments")], &[]), &set));
        assert!(!matches(&ns(&[("team", "search")], &[("owner", "dev")]), &set));
    }

    #[test]
    fn config_parses_from_yaml_with_aliases() {
        let cfg: CriteriaConfig = serde_yaml::from_str(
            "labelKey: tier\nlabel-values: [gold]\nannotation_key: owner\n",
        )
        .unwrap();
        assert_eq!(cfg.label_key, "tier");
        assert_eq!(cfg.label_values, vec!["gold"]);
        assert_eq!(cfg.annotation_key, "owner");
        // unspecified fields fall back to defaults
        assert_eq!(cfg.annotation_values, vec!["staging", "production"]);
        let set = CriteriaSet::from_config(&cfg);
        assert_eq!(set.len(), 2);
        assert!(matches!(set.iter().next(), Some(MatchCriterion::Label { .. })));
    }
}
