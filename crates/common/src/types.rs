use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Display name recorded for mutations nobody in particular caused.
pub const ENVIRONMENT_NAME: &str = "#environment";

/// Identity of whoever caused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Reserved id for fluids, explosions without a source, world generation.
    pub const ENVIRONMENT: Self = Self(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_environment(&self) -> bool {
        *self == Self::ENVIRONMENT
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ActorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// An actor: stable id plus the display name it had when acting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
}

impl Actor {
    pub fn new(id: ActorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// A named actor with a freshly generated id.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(ActorId::new(), name)
    }

    pub fn environment() -> Self {
        Self::new(ActorId::ENVIRONMENT, ENVIRONMENT_NAME)
    }
}

/// World or dimension identifier, e.g. `minecraft:overworld`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(String);

impl WorldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorldId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorldId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Integer block position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPos(pub IVec3);

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(IVec3::new(x, y, z))
    }

    pub fn x(&self) -> i32 {
        self.0.x
    }

    pub fn y(&self) -> i32 {
        self.0.y
    }

    pub fn z(&self) -> i32 {
        self.0.z
    }

    /// Squared euclidean distance in `i64`, saturating at the extremes.
    pub fn distance_squared(&self, other: BlockPos) -> i64 {
        let dx = i64::from(self.0.x) - i64::from(other.0.x);
        let dy = i64::from(self.0.y) - i64::from(other.0.y);
        let dz = i64::from(self.0.z) - i64::from(other.0.z);
        dx.saturating_mul(dx)
            .saturating_add(dy.saturating_mul(dy))
            .saturating_add(dz.saturating_mul(dz))
    }

    /// Whether this position lies inside the sphere around `center` (boundary inclusive).
    pub fn within_radius(&self, center: BlockPos, radius: i32) -> bool {
        let r = i64::from(radius);
        self.distance_squared(center) <= r * r
    }

    /// Inclusive min/max corners of the axis-aligned cube enclosing a sphere of `radius`.
    pub fn bounds(&self, radius: i32) -> (BlockPos, BlockPos) {
        let min = IVec3::new(
            self.0.x.saturating_sub(radius),
            self.0.y.saturating_sub(radius),
            self.0.z.saturating_sub(radius),
        );
        let max = IVec3::new(
            self.0.x.saturating_add(radius),
            self.0.y.saturating_add(radius),
            self.0.z.saturating_add(radius),
        );
        (Self(min), Self(max))
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0.x, self.0.y, self.0.z)
    }
}

/// Lexicographic on `(x, y, z)`, so ordered maps iterate deterministically.
impl Ord for BlockPos {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.to_array().cmp(&other.0.to_array())
    }
}

impl PartialOrd for BlockPos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<IVec3> for BlockPos {
    fn from(v: IVec3) -> Self {
        Self(v)
    }
}

impl From<[i32; 3]> for BlockPos {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

/// What kind of mutation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Break,
    Place,
    Explode,
    Piston,
    Fluid,
    Worldedit,
    Container,
    Generate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        Self::Break,
        Self::Place,
        Self::Explode,
        Self::Piston,
        Self::Fluid,
        Self::Worldedit,
        Self::Container,
        Self::Generate,
    ];

    /// Stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Break => "BREAK",
            Self::Place => "PLACE",
            Self::Explode => "EXPLODE",
            Self::Piston => "PISTON",
            Self::Fluid => "FLUID",
            Self::Worldedit => "WORLDEDIT",
            Self::Container => "CONTAINER",
            Self::Generate => "GENERATE",
        }
    }

    /// Container records carry inventory snapshots instead of block states.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action kind: {0}")]
pub struct UnknownActionKind(pub String);

impl FromStr for ActionKind {
    type Err = UnknownActionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownActionKind(s.to_string()))
    }
}

/// One logged world mutation.
///
/// `before`/`after` are opaque encoded states; `None` means nothing was there
/// (or nothing is there afterwards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Epoch seconds.
    pub time: i64,
    pub actor: Actor,
    pub world: WorldId,
    pub pos: BlockPos,
    pub kind: ActionKind,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl ActionRecord {
    /// A record stamped with the current wall-clock time.
    pub fn new(
        kind: ActionKind,
        actor: Actor,
        world: WorldId,
        pos: BlockPos,
        before: Option<String>,
        after: Option<String>,
    ) -> Self {
        Self {
            time: epoch_now(),
            actor,
            world,
            pos,
            kind,
            before,
            after,
        }
    }

    /// Override the timestamp (replays, imports, tests).
    pub fn at(mut self, time: i64) -> Self {
        self.time = time;
        self
    }

    /// Nothing changed; producers should not log these.
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

/// Current wall-clock time in epoch seconds.
pub fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
