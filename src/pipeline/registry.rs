// Stage registry: which stages exist, what each reads, which are enabled.
//
// Resolved once from configuration into a dependency-ordered list. A stage
// whose dependency is disabled still runs; it reads whatever the dependency
// committed on earlier runs.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Keywords,
    Topics,
    Narratives,
    Bias,
    Spikes,
    Lifetime,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::Keywords,
        StageKind::Topics,
        StageKind::Narratives,
        StageKind::Bias,
        StageKind::Spikes,
        StageKind::Lifetime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Keywords => "keywords",
            StageKind::Topics => "topics",
            StageKind::Narratives => "narratives",
            StageKind::Bias => "bias",
            StageKind::Spikes => "spikes",
            StageKind::Lifetime => "lifetime",
        }
    }

    /// Stages whose committed rows this one reads.
    pub fn depends_on(&self) -> &'static [StageKind] {
        match self {
            StageKind::Keywords | StageKind::Topics | StageKind::Narratives => &[],
            StageKind::Bias | StageKind::Spikes => &[StageKind::Topics],
            StageKind::Lifetime => &[StageKind::Keywords, StageKind::Topics],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|k| k.name() == s.trim().to_lowercase())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown stage '{s}' (expected one of keywords, topics, narratives, bias, spikes, lifetime)"
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    pub kind: StageKind,
    pub depends_on: &'static [StageKind],
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct StageRegistry {
    /// Dependency order.
    stages: Vec<StageDescriptor>,
}

impl StageRegistry {
    /// Build the registry with `enabled` stages switched on (`None` = all).
    pub fn new(enabled: Option<&[StageKind]>) -> Result<Self> {
        let descriptors: Vec<StageDescriptor> = StageKind::ALL
            .into_iter()
            .map(|kind| StageDescriptor {
                kind,
                depends_on: kind.depends_on(),
                enabled: enabled.is_none_or(|set| set.contains(&kind)),
            })
            .collect();

        let stages = resolve(descriptors)?;
        for stage in stages.iter().filter(|s| s.enabled) {
            for dep in stage.depends_on {
                if !stages.iter().any(|s| s.kind == *dep && s.enabled) {
                    warn!(stage = %stage.kind, dependency = %dep, "Dependency disabled, reading previously committed rows");
                }
            }
        }
        Ok(Self { stages })
    }

    pub fn descriptors(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Enabled stages in dependency order.
    pub fn enabled(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.iter().filter(|s| s.enabled).map(|s| s.kind)
    }
}

/// Order descriptors so every stage follows its dependencies, keeping the
/// declared order among independent stages.
fn resolve(mut pending: Vec<StageDescriptor>) -> Result<Vec<StageDescriptor>> {
    let mut done: HashSet<StageKind> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let Some(pos) = pending
            .iter()
            .position(|s| s.depends_on.iter().all(|d| done.contains(d)))
        else {
            let stuck: Vec<&str> = pending.iter().map(|s| s.kind.name()).collect();
            anyhow::bail!("stage dependencies form a cycle among: {}", stuck.join(", "));
        };
        let stage = pending.remove(pos);
        done.insert(stage.kind);
        ordered.push(stage);
    }
    Ok(ordered)
}
