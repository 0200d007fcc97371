use prometheus::core::Desc;
use std::collections::HashMap;

/// Label carrying the enumerated value of a state family.
pub const STATE_LABEL: &str = "state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Fixed schema of one collected metric family.
///
/// Families with `states` are enumerated: their last label is `state` and
/// every declared state is written for each observed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilySpec {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
    pub states: &'static [&'static str],
}

impl FamilySpec {
    pub const fn gauge(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            labels,
            states: &[],
        }
    }

    pub const fn counter(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
            labels,
            states: &[],
        }
    }

    pub const fn with_states(self, states: &'static [&'static str]) -> Self {
        Self { states, ..self }
    }

    pub fn is_enumerated(&self) -> bool {
        !self.states.is_empty() && self.labels.last() == Some(&STATE_LABEL)
    }

    /// The declared state matching `observed` ignoring ASCII case, or
    /// `observed` itself when none does. ARM reports `Steady` where the
    /// data plane reports `steady`.
    pub fn canonical_state<'a>(&self, observed: &'a str) -> &'a str {
        self.states
            .iter()
            .copied()
            .find(|declared| declared.eq_ignore_ascii_case(observed))
            .unwrap_or(observed)
    }

    /// Labels identifying the entity, i.e. everything but `state`.
    pub fn entity_labels(&self) -> &'static [&'static str] {
        let labels = self.labels;
        if self.is_enumerated() {
            &labels[..labels.len() - 1]
        } else {
            labels
        }
    }

    pub fn desc(&self) -> prometheus::Result<Desc> {
        Desc::new(
            self.name.to_string(),
            self.help.to_string(),
            self.labels.iter().map(|l| l.to_string()).collect(),
            HashMap::new(),
        )
    }
}
