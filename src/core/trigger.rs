//! Trigger rules and event evaluation

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// A git ref, normalised from either a full ref or a short branch name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum GitRef {
    Branch(String),
    Tag(String),
    /// Anything else under `refs/` (e.g. `refs/pull/1/merge`)
    Other(String),
}

impl GitRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix("refs/heads/") {
            GitRef::Branch(name.to_string())
        } else if let Some(name) = raw.strip_prefix("refs/tags/") {
            GitRef::Tag(name.to_string())
        } else if raw.starts_with("refs/") {
            GitRef::Other(raw.to_string())
        } else {
            GitRef::Branch(raw.to_string())
        }
    }

    /// Full ref, e.g. `refs/tags/v1.0.0`
    pub fn full(&self) -> String {
        match self {
            GitRef::Branch(name) => format!("refs/heads/{}", name),
            GitRef::Tag(name) => format!("refs/tags/{}", name),
            GitRef::Other(full) => full.clone(),
        }
    }

    /// Short name, e.g. `v1.0.0`
    pub fn name(&self) -> &str {
        match self {
            GitRef::Branch(name) | GitRef::Tag(name) | GitRef::Other(name) => name,
        }
    }

    pub fn ref_type(&self) -> &'static str {
        match self {
            GitRef::Branch(_) => "branch",
            GitRef::Tag(_) => "tag",
            GitRef::Other(_) => "",
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, GitRef::Tag(_))
    }
}

/// Kind of incoming event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Push { git_ref: GitRef },
    PullRequest { base_ref: GitRef },
    /// `cron` is the schedule that fired; `None` means any schedule
    Schedule { cron: Option<String> },
}

/// An event that may start a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default)]
    pub sha: Option<String>,
}

impl Event {
    pub fn push(git_ref: &str) -> Self {
        Self {
            kind: EventKind::Push { git_ref: GitRef::parse(git_ref) },
            sha: None,
        }
    }

    pub fn pull_request(base_ref: &str) -> Self {
        Self {
            kind: EventKind::PullRequest { base_ref: GitRef::parse(base_ref) },
            sha: None,
        }
    }

    pub fn schedule(cron: Option<&str>) -> Self {
        Self {
            kind: EventKind::Schedule { cron: cron.map(str::to_string) },
            sha: None,
        }
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::Push { .. } => "push",
            EventKind::PullRequest { .. } => "pull_request",
            EventKind::Schedule { .. } => "schedule",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Push { git_ref } => write!(f, "push {}", git_ref.full()),
            EventKind::PullRequest { base_ref } => write!(f, "pull_request -> {}", base_ref.name()),
            EventKind::Schedule { cron: Some(cron) } => write!(f, "schedule '{}'", cron),
            EventKind::Schedule { cron: None } => write!(f, "schedule"),
        }
    }
}

/// Event data exposed to conditions as `github.*`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub event_name: String,
    /// Full ref (`refs/heads/main`, `refs/tags/v1.0`); empty for schedules
    pub git_ref: String,
    pub ref_name: String,
    pub ref_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl EventContext {
    pub fn from_event(event: &Event) -> Self {
        let mut ctx = EventContext {
            event_name: event.name().to_string(),
            sha: event.sha.clone(),
            ..Default::default()
        };
        match &event.kind {
            EventKind::Push { git_ref } => {
                ctx.git_ref = git_ref.full();
                ctx.ref_name = git_ref.name().to_string();
                ctx.ref_type = git_ref.ref_type().to_string();
            }
            EventKind::PullRequest { base_ref } => {
                ctx.base_ref = Some(base_ref.name().to_string());
            }
            EventKind::Schedule { cron } => {
                ctx.schedule = cron.clone();
            }
        }
        ctx
    }

    pub fn is_tag_push(&self) -> bool {
        self.event_name == "push" && self.git_ref.starts_with("refs/tags/")
    }

    /// `github.*` variables
    pub fn variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("event_name".to_string(), self.event_name.clone());
        vars.insert("ref".to_string(), self.git_ref.clone());
        vars.insert("ref_name".to_string(), self.ref_name.clone());
        vars.insert("ref_type".to_string(), self.ref_type.clone());
        if let Some(base) = &self.base_ref {
            vars.insert("base_ref".to_string(), base.clone());
        }
        if let Some(sha) = &self.sha {
            vars.insert("sha".to_string(), sha.clone());
        }
        if let Some(schedule) = &self.schedule {
            vars.insert("schedule".to_string(), schedule.clone());
        }
        vars
    }
}

/// Result of `evaluate_trigger`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Matched(EventContext),
    NotMet,
}

impl TriggerOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, TriggerOutcome::Matched(_))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushTrigger {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestTrigger {
    /// Base branches; empty matches every base
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    pub cron: String,
}

/// The `on:` section of a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub push: Option<PushTrigger>,
    #[serde(default)]
    pub pull_request: Option<PullRequestTrigger>,
    #[serde(default)]
    pub schedule: Vec<ScheduleTrigger>,
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher().is_match(name),
        Err(e) => {
            warn!("Ignoring invalid ref filter '{}': {}", pattern, e);
            false
        }
    }
}

fn any_glob(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|p| glob_matches(p, name))
}

/// Shift a numeric day-of-week from 0-7 (Sunday 0 or 7) to 1-7 (Sunday 1)
fn shift_weekday(day: &str, range_end: bool) -> String {
    match day.parse::<u32>() {
        Ok(0) => "1".to_string(),
        Ok(7) if !range_end => "1".to_string(),
        Ok(n) if n < 7 => (n + 1).to_string(),
        Ok(n) => n.to_string(),
        Err(_) => day.to_string(),
    }
}

/// Check a five-field workflow cron expression
///
/// The `cron` crate wants a leading seconds field and numbers weekdays
/// from 1, so the expression is rewritten before parsing.
pub fn parse_cron(expr: &str) -> anyhow::Result<cron::Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        anyhow::bail!("Invalid cron expression '{}': expected 5 fields", expr);
    }

    let weekdays = fields[4]
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = match range.split_once('-') {
                Some((start, end)) => {
                    format!("{}-{}", shift_weekday(start, false), shift_weekday(end, true))
                }
                None => shift_weekday(range, false),
            };
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",");

    let six_fields = format!("0 {} {}", fields[..4].join(" "), weekdays);
    cron::Schedule::from_str(&six_fields)
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))
}

impl TriggerConfig {
    /// Decide whether an event creates a pipeline instance
    ///
    /// Push filters follow the usual convention: when only `tags` is
    /// given, branch pushes do not match, and vice versa; with neither,
    /// every push matches.
    pub fn evaluate(&self, event: &Event) -> TriggerOutcome {
        let matched = match &event.kind {
            EventKind::Push { git_ref } => match &self.push {
                None => false,
                Some(push) => {
                    let unfiltered = push.branches.is_empty() && push.tags.is_empty();
                    match git_ref {
                        GitRef::Branch(name) => {
                            unfiltered || any_glob(&push.branches, name)
                        }
                        GitRef::Tag(name) => unfiltered || any_glob(&push.tags, name),
                        GitRef::Other(_) => unfiltered,
                    }
                }
            },
            EventKind::PullRequest { base_ref } => match &self.pull_request {
                None => false,
                Some(pr) => pr.branches.is_empty() || any_glob(&pr.branches, base_ref.name()),
            },
            EventKind::Schedule { cron } => match cron {
                None => !self.schedule.is_empty(),
                Some(cron) => self.schedule.iter().any(|s| s.cron.trim() == cron.trim()),
            },
        };

        if matched {
            debug!("Event {} matched a trigger", event);
            TriggerOutcome::Matched(EventContext::from_event(event))
        } else {
            debug!("Event {} matched no trigger", event);
            TriggerOutcome::NotMet
        }
    }

    /// Check filters and cron expressions are well formed
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut patterns: Vec<&String> = Vec::new();
        if let Some(push) = &self.push {
            patterns.extend(push.branches.iter().chain(push.tags.iter()));
        }
        if let Some(pr) = &self.pull_request {
            patterns.extend(pr.branches.iter());
        }
        for pattern in patterns {
            GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| anyhow::anyhow!("Invalid ref filter '{}': {}", pattern, e))?;
        }

        for schedule in &self.schedule {
            parse_cron(&schedule.cron)?;
        }

        if self.push.is_none() && self.pull_request.is_none() && self.schedule.is_empty() {
            anyhow::bail!("Workflow declares no triggers");
        }

        Ok(())
    }
}
