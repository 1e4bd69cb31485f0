//! Environment profiles and trigger resolution.
//!
//! A profile binds a trigger rule to an owned [`GateSpec`]. The resolver
//! evaluates tag rules before branch rules so a release tag can never be
//! routed to a branch profile, and refuses to guess when two profiles match.

use crate::error::{ConfigError, ResolutionError};
use crate::spec::GateSpec;
use crate::trigger::{EventKind, RefType, TriggerContext};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Trigger rule as written in configuration.
///
/// Exactly one of `tag` (a regex over the tag name) or `branches` (glob
/// patterns where `*` matches any run of characters) must be set. An empty
/// `events` list matches every event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TriggerRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventKind>,
}

impl TriggerRule {
    pub fn tag(pattern: impl Into<String>) -> Self {
        Self {
            tag: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn branches<S: Into<String>>(globs: impl IntoIterator<Item = S>) -> Self {
        Self {
            branches: globs.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn on(mut self, events: &[EventKind]) -> Self {
        self.events = events.to_vec();
        self
    }

    /// Compile into a matcher.
    pub fn compile(&self) -> Result<TriggerMatcher, ConfigError> {
        let mut events = self.events.clone();
        events.sort();
        events.dedup();

        match (&self.tag, self.branches.is_empty()) {
            (Some(_), false) => Err(ConfigError::Invalid(
                "trigger may set either 'tag' or 'branches', not both".to_string(),
            )),
            (None, true) => Err(ConfigError::Invalid(
                "trigger must set 'tag' or 'branches'".to_string(),
            )),
            (Some(tag), true) => {
                let regex = Regex::new(tag).map_err(|e| ConfigError::InvalidPattern {
                    pattern: tag.clone(),
                    reason: e.to_string(),
                })?;
                Ok(TriggerMatcher {
                    ref_type: RefType::Tag,
                    patterns: vec![Pattern {
                        source: tag.clone(),
                        regex,
                        literal: false,
                    }],
                    events,
                })
            }
            (None, false) => {
                let patterns = self
                    .branches
                    .iter()
                    .map(|glob| compile_glob(glob))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TriggerMatcher {
                    ref_type: RefType::Branch,
                    patterns,
                    events,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
    literal: bool,
}

fn compile_glob(glob: &str) -> Result<Pattern, ConfigError> {
    if glob.is_empty() {
        return Err(ConfigError::InvalidPattern {
            pattern: glob.to_string(),
            reason: "branch pattern must not be empty".to_string(),
        });
    }
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    let regex = Regex::new(&format!("^{}$", body)).map_err(|e| ConfigError::InvalidPattern {
        pattern: glob.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Pattern {
        source: glob.to_string(),
        regex,
        literal: !glob.contains('*'),
    })
}

/// Compiled trigger predicate over a [`TriggerContext`].
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    ref_type: RefType,
    patterns: Vec<Pattern>,
    events: Vec<EventKind>,
}

impl TriggerMatcher {
    pub fn ref_type(&self) -> RefType {
        self.ref_type
    }

    pub fn matches(&self, ctx: &TriggerContext) -> bool {
        ctx.ref_type == self.ref_type
            && self.accepts_event(ctx.event)
            && self.patterns.iter().any(|p| p.regex.is_match(&ctx.ref_name))
    }

    fn accepts_event(&self, event: EventKind) -> bool {
        self.events.is_empty() || self.events.contains(&event)
    }

    fn events_overlap(&self, other: &TriggerMatcher) -> bool {
        self.events.is_empty()
            || other.events.is_empty()
            || self.events.iter().any(|e| other.events.contains(e))
    }

    /// Statically detectable overlap: identical patterns, or a literal
    /// pattern of one matcher accepted by the other.
    fn overlaps(&self, other: &TriggerMatcher) -> Option<String> {
        if self.ref_type != other.ref_type || !self.events_overlap(other) {
            return None;
        }
        for a in &self.patterns {
            for b in &other.patterns {
                if a.source == b.source
                    || (a.literal && b.regex.is_match(&a.source))
                    || (b.literal && a.regex.is_match(&b.source))
                {
                    return Some(if a.literal { a.source.clone() } else { b.source.clone() });
                }
            }
        }
        None
    }

    /// Human-readable form for listings.
    pub fn describe(&self) -> String {
        let kind = match self.ref_type {
            RefType::Branch => "branches",
            RefType::Tag => "tag",
        };
        let patterns = self
            .patterns
            .iter()
            .map(|p| p.source.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if self.events.is_empty() {
            format!("{} [{}]", kind, patterns)
        } else {
            let events = self
                .events
                .iter()
                .map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} [{}] on {}", kind, patterns, events)
        }
    }
}

/// A trigger rule bound to the gate spec it selects.
#[derive(Debug, Clone)]
pub struct EnvironmentProfile {
    pub name: String,
    pub trigger: TriggerMatcher,
    pub gate_spec: GateSpec,
}

impl EnvironmentProfile {
    /// Build a profile; the gate spec takes the profile's name.
    pub fn new(
        name: impl Into<String>,
        rule: &TriggerRule,
        mut gate_spec: GateSpec,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        gate_spec.environment_name = name.clone();
        gate_spec.validate()?;
        Ok(Self {
            name,
            trigger: rule.compile()?,
            gate_spec,
        })
    }
}

/// Selects exactly one profile per trigger.
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    /// Tag-rule profiles first, then branch-rule profiles.
    profiles: Vec<EnvironmentProfile>,
}

impl ProfileResolver {
    /// Order profiles by precedence and reject statically ambiguous sets.
    pub fn new(profiles: Vec<EnvironmentProfile>) -> Result<Self, ResolutionError> {
        let (mut ordered, branch): (Vec<_>, Vec<_>) = profiles
            .into_iter()
            .partition(|p| p.trigger.ref_type() == RefType::Tag);
        ordered.extend(branch);

        for (i, a) in ordered.iter().enumerate() {
            for b in &ordered[i + 1..] {
                if let Some(witness) = a.trigger.overlaps(&b.trigger) {
                    return Err(ResolutionError::AmbiguousProfile {
                        first: a.name.clone(),
                        second: b.name.clone(),
                        context: format!("pattern '{}'", witness),
                    });
                }
            }
        }

        Ok(Self { profiles: ordered })
    }

    pub fn profiles(&self) -> &[EnvironmentProfile] {
        &self.profiles
    }

    pub fn profile(&self, name: &str) -> Option<&EnvironmentProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Resolve the single profile for a trigger.
    ///
    /// Tag profiles are consulted before branch profiles; the first match
    /// wins, but a second match is reported as ambiguous rather than
    /// silently ignored.
    pub fn resolve(&self, ctx: &TriggerContext) -> Result<&EnvironmentProfile, ResolutionError> {
        let mut matching = self.profiles.iter().filter(|p| p.trigger.matches(ctx));

        let first = matching
            .next()
            .ok_or_else(|| ResolutionError::NoMatchingProfile {
                context: ctx.to_string(),
            })?;

        if let Some(second) = matching.next() {
            return Err(ResolutionError::AmbiguousProfile {
                first: first.name.clone(),
                second: second.name.clone(),
                context: ctx.to_string(),
            });
        }

        Ok(first)
    }
}
