//! Execution options and process-wide defaults.
//!
//! Options arrive either as a typed [`Options`] value or as the key/value map
//! form used by factorization drivers (see [`Options::from_map`]).

use core::fmt;
use core::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::error::{DistError, DistResult};

/// Execution strategy for tile kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// One task per tile in the host task pool.
    HostTask,
    /// Nested data-parallel loop over independent tiles on the host.
    HostNest,
    /// Batched host call over same-shaped tiles.
    HostBatch,
    /// Batched kernels offloaded to devices.
    Devices,
}

impl Target {
    /// All targets, in dispatch-preference order.
    pub const ALL: [Target; 4] = [
        Target::HostTask,
        Target::HostNest,
        Target::HostBatch,
        Target::Devices,
    ];

    /// Whether kernels for this target run on host memory.
    pub fn is_host(&self) -> bool {
        !matches!(self, Target::Devices)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::HostTask => write!(f, "HostTask"),
            Target::HostNest => write!(f, "HostNest"),
            Target::HostBatch => write!(f, "HostBatch"),
            Target::Devices => write!(f, "Devices"),
        }
    }
}

impl FromStr for Target {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "t" | "task" | "hosttask" | "host" => Ok(Target::HostTask),
            "n" | "nest" | "hostnest" => Ok(Target::HostNest),
            "b" | "batch" | "hostbatch" => Ok(Target::HostBatch),
            "d" | "dev" | "device" | "devices" => Ok(Target::Devices),
            _ => Err(DistError::config(format!("unknown target '{s}'"))),
        }
    }
}

/// Whether intermediate (workspace) tiles are released eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileReleaseStrategy {
    /// Never tick workspace tiles; they live until `clear_workspace`.
    None,
    /// Release tiles allocated internally by the routine.
    Internal,
    /// Release internal tiles and tiles received from other ranks.
    All,
}

impl TileReleaseStrategy {
    /// Whether workspace tiles are ticked after use.
    pub fn ticks(&self) -> bool {
        !matches!(self, TileReleaseStrategy::None)
    }
}

impl fmt::Display for TileReleaseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileReleaseStrategy::None => write!(f, "none"),
            TileReleaseStrategy::Internal => write!(f, "internal"),
            TileReleaseStrategy::All => write!(f, "all"),
        }
    }
}

impl FromStr for TileReleaseStrategy {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(TileReleaseStrategy::None),
            "internal" | "i" => Ok(TileReleaseStrategy::Internal),
            "all" | "a" => Ok(TileReleaseStrategy::All),
            _ => Err(DistError::config(format!(
                "unknown tile release strategy '{s}'"
            ))),
        }
    }
}

/// Recognized option names of the map form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// Number of trailing panels whose work starts ahead of the critical path.
    Lookahead,
    /// Execution strategy.
    Target,
    /// Eager release of intermediate tiles.
    TileReleaseStrategy,
    /// Inner blocking used by panel kernels.
    InnerBlocking,
    /// Width of the host task pool.
    MaxThreads,
    /// Receive timeout of the transport.
    CommTimeout,
}

/// Values of the map form.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Integer option
    Int(i64),
    /// Target option
    Target(Target),
    /// Release strategy option
    Release(TileReleaseStrategy),
    /// Duration option
    Duration(Duration),
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<Target> for OptionValue {
    fn from(value: Target) -> Self {
        OptionValue::Target(value)
    }
}

impl From<TileReleaseStrategy> for OptionValue {
    fn from(value: TileReleaseStrategy) -> Self {
        OptionValue::Release(value)
    }
}

impl From<Duration> for OptionValue {
    fn from(value: Duration) -> Self {
        OptionValue::Duration(value)
    }
}

/// Options consumed by distributed routines.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Lookahead depth (panels prefetched ahead of the critical path).
    pub lookahead: usize,

    /// Execution strategy.
    pub target: Target,

    /// Release policy for workspace tiles.
    pub tile_release_strategy: TileReleaseStrategy,

    /// Inner blocking for panel kernels.
    pub inner_blocking: usize,

    /// Host task pool width (`None` = rayon default).
    pub max_threads: Option<usize>,

    /// How long a blocking receive waits before failing.
    pub comm_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            lookahead: 1,
            target: Target::HostTask,
            tile_release_strategy: TileReleaseStrategy::All,
            inner_blocking: 16,
            max_threads: None,
            comm_timeout: Duration::from_secs(30),
        }
    }
}

impl Options {
    /// Build options from the map form, starting from the process-wide defaults.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use cubecl_distributed::{Options, OptionKey, Target};
    ///
    /// let opts = Options::from_map(&[
    ///     (OptionKey::Lookahead, 2.into()),
    ///     (OptionKey::Target, Target::HostNest.into()),
    /// ])?;
    /// ```
    pub fn from_map(entries: &[(OptionKey, OptionValue)]) -> DistResult<Self> {
        let mut opts = default_options();
        for (key, value) in entries {
            opts.set(*key, value.clone())?;
        }
        Ok(opts)
    }

    /// Set a single option, validating its type and range.
    pub fn set(&mut self, key: OptionKey, value: OptionValue) -> DistResult<()> {
        match (key, value) {
            (OptionKey::Lookahead, OptionValue::Int(v)) => {
                self.lookahead = non_negative(key, v)?;
            }
            (OptionKey::Target, OptionValue::Target(t)) => self.target = t,
            (OptionKey::TileReleaseStrategy, OptionValue::Release(r)) => {
                self.tile_release_strategy = r;
            }
            (OptionKey::InnerBlocking, OptionValue::Int(v)) => {
                let ib = non_negative(key, v)?;
                if ib == 0 {
                    return Err(DistError::config("InnerBlocking must be positive"));
                }
                self.inner_blocking = ib;
            }
            (OptionKey::MaxThreads, OptionValue::Int(v)) => {
                let n = non_negative(key, v)?;
                self.max_threads = if n == 0 { None } else { Some(n) };
            }
            (OptionKey::CommTimeout, OptionValue::Duration(d)) => self.comm_timeout = d,
            (key, value) => {
                return Err(DistError::config(format!(
                    "option {key:?} does not accept {value:?}"
                )));
            }
        }
        Ok(())
    }

    /// Builder-style target override.
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Builder-style release strategy override.
    pub fn with_release(mut self, strategy: TileReleaseStrategy) -> Self {
        self.tile_release_strategy = strategy;
        self
    }

    /// Builder-style lookahead override.
    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Builder-style receive timeout override.
    pub fn with_comm_timeout(mut self, timeout: Duration) -> Self {
        self.comm_timeout = timeout;
        self
    }

    /// Builder-style task pool width override.
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = Some(threads);
        self
    }
}

fn non_negative(key: OptionKey, v: i64) -> DistResult<usize> {
    usize::try_from(v).map_err(|_| DistError::config(format!("{key:?} must be >= 0, got {v}")))
}

static DEFAULT_OPTIONS: Lazy<RwLock<Options>> = Lazy::new(|| RwLock::new(Options::default()));

/// Replace the process-wide default options.
///
/// Defaults seed [`Options::from_map`]; routines given explicit options
/// never consult them.
pub fn set_default_options(options: Options) {
    match DEFAULT_OPTIONS.write() {
        Ok(mut guard) => *guard = options,
        Err(poisoned) => *poisoned.into_inner() = options,
    }
}

/// Current process-wide default options.
pub fn default_options() -> Options {
    match DEFAULT_OPTIONS.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}
