//! Operator parameter strings: `t:1h30m r:10 u:Nick` for rollback and
//! restore, `t:30d r:overworld i:stone,dirt #optimize` for purge.

use std::fmt;

use blocklog_codec::normalize_id;
use blocklog_common::WorldId;
use blocklog_persist::PurgeFilter;

/// Radius used when `r:` is not given.
pub const DEFAULT_RADIUS: i32 = 10;
/// Time window used when `t:` is not given.
pub const DEFAULT_SECONDS: u64 = 300;

/// Why a duration string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("unit without a number before it")]
    MissingNumber,
    #[error("unknown unit '{0}' (use s, m, h or d)")]
    UnknownUnit(char),
    #[error("number without a unit after a unit")]
    MissingUnit,
    #[error("duration must be positive")]
    NotPositive,
    #[error("duration too large")]
    Overflow,
}

/// Errors from parsing operator parameters. Each names the offending token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("no parameters given")]
    Empty,
    #[error("expected key:value, got '{0}'")]
    InvalidPair(String),
    #[error("unknown parameter key '{0}'")]
    UnknownKey(String),
    #[error("invalid time '{token}': {source}")]
    Duration {
        token: String,
        #[source]
        source: DurationError,
    },
    #[error("invalid radius '{0}': expected a non-negative integer")]
    InvalidRadius(String),
    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),
    #[error("invalid world '{0}'")]
    InvalidWorld(String),
    #[error("invalid block identifier '{0}'")]
    InvalidBlock(String),
    #[error("purge needs a time window (t:...)")]
    MissingTime,
}

/// Parse `90s`, `10m`, `1h30m`, `2d3h15m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<u64, DurationError> {
    let input = input.trim().to_ascii_lowercase();
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    let mut total: u64 = 0;
    let mut number: Option<u64> = None;
    let mut saw_unit = false;
    for c in input.chars() {
        if let Some(digit) = c.to_digit(10) {
            let n = number.unwrap_or(0);
            number = Some(
                n.checked_mul(10)
                    .and_then(|n| n.checked_add(u64::from(digit)))
                    .ok_or(DurationError::Overflow)?,
            );
            continue;
        }
        let n = number.take().ok_or(DurationError::MissingNumber)?;
        let scale = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            other => return Err(DurationError::UnknownUnit(other)),
        };
        total = n
            .checked_mul(scale)
            .and_then(|secs| total.checked_add(secs))
            .ok_or(DurationError::Overflow)?;
        saw_unit = true;
    }
    if let Some(n) = number {
        if saw_unit {
            return Err(DurationError::MissingUnit);
        }
        total = n;
    }
    if total == 0 {
        return Err(DurationError::NotPositive);
    }
    Ok(total)
}

fn split_pair(token: &str) -> Result<(String, &str), ParamError> {
    match token.split_once(':') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_ascii_lowercase(), value))
        }
        _ => Err(ParamError::InvalidPair(token.to_string())),
    }
}

fn tokens(input: &str) -> Result<Vec<&str>, ParamError> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ParamError::Empty);
    }
    Ok(tokens)
}

fn duration_param(token: &str, value: &str) -> Result<u64, ParamError> {
    parse_duration(value).map_err(|source| ParamError::Duration {
        token: token.to_string(),
        source,
    })
}

/// Resolved rollback/restore parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackParams {
    /// How far back from now the window reaches.
    pub seconds: u64,
    pub radius: i32,
    /// Only actions by this actor (display name or id).
    pub actor: Option<String>,
    /// Restore this rollback session instead of a time window.
    pub session_id: Option<i64>,
}

impl Default for RollbackParams {
    fn default() -> Self {
        Self {
            seconds: DEFAULT_SECONDS,
            radius: DEFAULT_RADIUS,
            actor: None,
            session_id: None,
        }
    }
}

impl RollbackParams {
    /// Parse whitespace-separated `key:value` tokens. Keys: `t`/`time`,
    /// `r`/`radius`, `u`/`user`, `id`. Later tokens override earlier ones.
    /// Blank input yields the defaults.
    pub fn parse(input: &str) -> Result<Self, ParamError> {
        let mut params = Self::default();
        for token in input.split_whitespace() {
            let (key, value) = split_pair(token)?;
            match key.as_str() {
                "t" | "time" => params.seconds = duration_param(token, value)?,
                "r" | "radius" => {
                    params.radius = value
                        .parse()
                        .ok()
                        .filter(|r: &i32| *r >= 0)
                        .ok_or_else(|| ParamError::InvalidRadius(value.to_string()))?;
                }
                "u" | "user" => params.actor = Some(value.to_string()),
                "id" => {
                    params.session_id = Some(
                        value
                            .parse()
                            .map_err(|_| ParamError::InvalidSessionId(value.to_string()))?,
                    );
                }
                _ => return Err(ParamError::UnknownKey(key)),
            }
        }
        Ok(params)
    }

    /// Start of the time window, in epoch seconds.
    pub fn since(&self, now: i64) -> i64 {
        now.saturating_sub(i64::try_from(self.seconds).unwrap_or(i64::MAX))
    }
}

/// Canonical token form; parses back to the same parameters.
impl fmt::Display for RollbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t:{}s r:{}", self.seconds, self.radius)?;
        if let Some(actor) = &self.actor {
            write!(f, " u:{actor}")?;
        }
        if let Some(id) = self.session_id {
            write!(f, " id:{id}")?;
        }
        Ok(())
    }
}

/// Resolved purge parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeParams {
    /// Records older than this many seconds are deleted.
    pub seconds: u64,
    pub world: Option<WorldId>,
    pub include: Vec<String>,
    pub optimize: bool,
}

impl PurgeParams {
    /// Parse purge tokens. Keys: `t`/`time` (required), `r`/`region`/`world`,
    /// `i`/`include` (comma list), plus the `#optimize` flag.
    pub fn parse(input: &str) -> Result<Self, ParamError> {
        let mut seconds = None;
        let mut world = None;
        let mut include = Vec::new();
        let mut optimize = false;
        for token in tokens(input)? {
            if token.eq_ignore_ascii_case("#optimize") {
                optimize = true;
                continue;
            }
            let (key, value) = split_pair(token)?;
            match key.as_str() {
                "t" | "time" => seconds = Some(duration_param(token, value)?),
                "r" | "region" | "world" => {
                    let cleaned = value.strip_prefix('#').unwrap_or(value);
                    let id = normalize_id(cleaned)
                        .ok_or_else(|| ParamError::InvalidWorld(value.to_string()))?;
                    world = Some(WorldId::new(id));
                }
                "i" | "include" => {
                    for block in value.split(',').map(str::trim).filter(|b| !b.is_empty()) {
                        if normalize_id(block).is_none() {
                            return Err(ParamError::InvalidBlock(block.to_string()));
                        }
                        include.push(block.to_string());
                    }
                }
                _ => return Err(ParamError::UnknownKey(key)),
            }
        }
        Ok(Self {
            seconds: seconds.ok_or(ParamError::MissingTime)?,
            world,
            include,
            optimize,
        })
    }

    /// Store filter for a purge run at `now`.
    pub fn to_filter(&self, now: i64) -> PurgeFilter {
        PurgeFilter {
            older_than: now.saturating_sub(i64::try_from(self.seconds).unwrap_or(i64::MAX)),
            world: self.world.clone(),
            state_ids: self.include.clone(),
            optimize: self.optimize,
        }
    }
}
