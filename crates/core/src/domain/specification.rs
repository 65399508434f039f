//! Shutdown Specification - threshold grammar and time-of-day resolution
//!
//! A specification is a `;`-separated list of parts:
//!
//! ```text
//! idlePreWork:800+10,idlePostWork:300+60
//!     No jobs completed yet: shut down 800+10 seconds after workers started.
//!     Jobs completed: shut down 300+60 seconds after the last completion.
//!
//! 0600-1200::idlePreWork:10800+300,idlePostWork:10800+300;idlePreWork:800+60,idlePostWork:300+60
//!     Between 06:00 and 12:00 local time the first rule applies,
//!     at all other hours the second one does.
//!
//! elapsedPreWork:10800+300,elapsedPostWork:730+10
//!     Shut down 10800+300 seconds after workers started, whatever the
//!     completion history.
//! ```
//!
//! The `+jitter` term is added in full. No random offset is drawn.

use super::error::{DomainError, Result};
use chrono::{DateTime, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

const PART_SEPARATOR: char = ';';
const WINDOW_SEPARATOR: &str = "::";
const SECONDS_PER_DAY: u32 = 24 * 3600;

/// Which fallback rule a query consults when no window matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Idle time: since last completion, or since workers started
    Idle,
    /// Elapsed time: since workers started
    Elapsed,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Idle => "idle",
            QueryKind::Elapsed => "elapsed",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "idle" => Some(QueryKind::Idle),
            "elapsed" => Some(QueryKind::Elapsed),
            _ => None,
        }
    }
}

/// Threshold category: before or after the first job completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkSlot {
    PreWork,
    PostWork,
}

/// `(base, jitter_ceiling)` in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPair {
    pub base: u64,
    pub jitter: u64,
}

impl ThresholdPair {
    pub fn new(base: u64, jitter: u64) -> Self {
        Self { base, jitter }
    }

    /// Resolved threshold (deterministic sum)
    pub fn threshold(&self) -> u64 {
        self.base.saturating_add(self.jitter)
    }
}

/// Pre-work and post-work pairs of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RulePairs {
    pub prework: ThresholdPair,
    pub postwork: ThresholdPair,
}

impl RulePairs {
    fn pair(&self, slot: WorkSlot) -> ThresholdPair {
        match slot {
            WorkSlot::PreWork => self.prework,
            WorkSlot::PostWork => self.postwork,
        }
    }
}

/// Inclusive time-of-day interval, seconds since local midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_offset: u32,
    pub end_offset: u32,
}

impl TimeWindow {
    pub fn contains(&self, seconds_since_midnight: u32) -> bool {
        seconds_since_midnight >= self.start_offset && seconds_since_midnight <= self.end_offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowedRule {
    window: TimeWindow,
    pairs: RulePairs,
}

/// Parsed, immutable shutdown specification
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShutdownSpecification {
    source: String,
    windows: Vec<WindowedRule>,
    default_rule: Option<RulePairs>,
    elapsed_rule: Option<RulePairs>,
}

impl ShutdownSpecification {
    /// Parse a specification string
    ///
    /// An empty string yields a specification without rules, so every
    /// query resolves to `None`.
    ///
    /// # Errors
    /// `DomainError::SpecificationFormat` if any part does not follow the
    /// grammar or its two kind tokens disagree.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parsed = Self {
            source: spec.to_string(),
            ..Self::default()
        };

        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Ok(parsed);
        }

        let mut parts: Vec<&str> = trimmed.split(PART_SEPARATOR).map(str::trim).collect();
        // "a;b;" is accepted, "a;;b" is not
        while parts.last().is_some_and(|p| p.is_empty()) {
            parts.pop();
        }

        for part in parts {
            parsed.add_part(part)?;
        }

        Ok(parsed)
    }

    /// Parse an optional specification (`None` behaves like `""`)
    pub fn parse_optional(spec: Option<&str>) -> Result<Self> {
        Self::parse(spec.unwrap_or_default())
    }

    /// True if `spec` parses
    pub fn is_valid(spec: &str) -> bool {
        Self::parse(spec).is_ok()
    }

    /// True if the specification holds no rule at all
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty() && self.default_rule.is_none() && self.elapsed_rule.is_none()
    }

    /// Windows in specification order
    pub fn windows(&self) -> impl Iterator<Item = TimeWindow> + '_ {
        self.windows.iter().map(|w| w.window)
    }

    pub fn default_rule(&self) -> Option<RulePairs> {
        self.default_rule
    }

    pub fn elapsed_rule(&self) -> Option<RulePairs> {
        self.elapsed_rule
    }

    /// Resolve a threshold for a point in (local) time
    pub fn resolve<Tz: TimeZone>(
        &self,
        kind: QueryKind,
        slot: WorkSlot,
        now: &DateTime<Tz>,
    ) -> Option<u64> {
        self.resolve_at_offset(kind, slot, seconds_since_midnight(now))
    }

    /// Resolve a threshold for a time-of-day given in seconds since midnight
    ///
    /// The first window containing the time-of-day wins for both kinds of
    /// query. Without a match, `Idle` uses the default rule and `Elapsed`
    /// the elapsed rule.
    pub fn resolve_at_offset(
        &self,
        kind: QueryKind,
        slot: WorkSlot,
        seconds_since_midnight: u32,
    ) -> Option<u64> {
        if let Some(rule) = self
            .windows
            .iter()
            .find(|rule| rule.window.contains(seconds_since_midnight))
        {
            return Some(rule.pairs.pair(slot).threshold());
        }

        let fallback = match kind {
            QueryKind::Idle => self.default_rule,
            QueryKind::Elapsed => self.elapsed_rule,
        };
        fallback.map(|pairs| pairs.pair(slot).threshold())
    }

    /// The three thresholds consulted by one poll cycle
    pub fn thresholds<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> super::Thresholds {
        let offset = seconds_since_midnight(now);
        super::Thresholds {
            prework: self.resolve_at_offset(QueryKind::Idle, WorkSlot::PreWork, offset),
            postwork: self.resolve_at_offset(QueryKind::Idle, WorkSlot::PostWork, offset),
            elapsed: self.resolve_at_offset(QueryKind::Elapsed, WorkSlot::PreWork, offset),
        }
    }

    fn add_part(&mut self, part: &str) -> Result<()> {
        let (window, body) = match part.split_once(WINDOW_SEPARATOR) {
            Some((range, body)) => (Some(parse_window(part, range)?), body),
            None => (None, part),
        };

        let (kind, pairs) = parse_body(part, body)?;

        match (window, kind) {
            (Some(window), _) => {
                if window.start_offset > window.end_offset {
                    warn!(
                        part = %part,
                        "Window starts after it ends and will never match"
                    );
                }
                self.windows.push(WindowedRule { window, pairs });
            }
            // Later parts replace earlier ones silently
            (None, QueryKind::Elapsed) => self.elapsed_rule = Some(pairs),
            (None, QueryKind::Idle) => self.default_rule = Some(pairs),
        }
        Ok(())
    }
}

impl FromStr for ShutdownSpecification {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ShutdownSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Seconds elapsed since local midnight (hour, minute and second)
pub fn seconds_since_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> u32 {
    now.hour() * 3600 + now.minute() * 60 + now.second()
}

/// `HHMM-HHMM`
fn parse_window(part: &str, range: &str) -> Result<TimeWindow> {
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| DomainError::format(part, "time window must look like HHMM-HHMM"))?;

    Ok(TimeWindow {
        start_offset: parse_hhmm(part, start)?,
        end_offset: parse_hhmm(part, end)?,
    })
}

fn parse_hhmm(part: &str, hhmm: &str) -> Result<u32> {
    if hhmm.len() != 4 || !hhmm.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::format(
            part,
            format!("'{hhmm}' is not a four-digit HHMM time"),
        ));
    }

    // Both halves are ASCII digits, parsing cannot fail
    let hour: u32 = hhmm[..2].parse().unwrap_or_default();
    let minute: u32 = hhmm[2..].parse().unwrap_or_default();

    let offset = hour * 3600 + minute * 60;
    if minute > 59 || offset > SECONDS_PER_DAY {
        return Err(DomainError::format(
            part,
            format!("'{hhmm}' is not a valid time of day"),
        ));
    }
    Ok(offset)
}

/// `<kind>PreWork:<b>+<j>,<kind>PostWork:<b>+<j>`
fn parse_body(part: &str, body: &str) -> Result<(QueryKind, RulePairs)> {
    let (pre, post) = body.split_once(',').ok_or_else(|| {
        DomainError::format(part, "expected two comma-separated thresholds")
    })?;

    let (pre_kind, prework) = parse_threshold(part, pre, "PreWork")?;
    let (post_kind, postwork) = parse_threshold(part, post, "PostWork")?;

    if pre_kind != post_kind {
        return Err(DomainError::format(
            part,
            format!(
                "threshold kinds disagree ({} vs {})",
                pre_kind.as_str(),
                post_kind.as_str()
            ),
        ));
    }

    Ok((pre_kind, RulePairs { prework, postwork }))
}

/// `<kind><label>:<base>+<jitter>`
fn parse_threshold(part: &str, text: &str, label: &str) -> Result<(QueryKind, ThresholdPair)> {
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| DomainError::format(part, format!("missing ':' in '{text}'")))?;

    let kind = name
        .strip_suffix(label)
        .and_then(QueryKind::from_token)
        .ok_or_else(|| {
            DomainError::format(
                part,
                format!("expected idle{label} or elapsed{label}, got '{name}'"),
            )
        })?;

    let (base, jitter) = value
        .split_once('+')
        .ok_or_else(|| DomainError::format(part, format!("expected <base>+<jitter>, got '{value}'")))?;

    Ok((
        kind,
        ThresholdPair::new(parse_seconds(part, base)?, parse_seconds(part, jitter)?),
    ))
}

fn parse_seconds(part: &str, digits: &str) -> Result<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::format(
            part,
            format!("'{digits}' is not a number of seconds"),
        ));
    }
    digits
        .parse()
        .map_err(|e| DomainError::format(part, format!("'{digits}': {e}")))
}
