//! Top-level wiring: the `ReadEngine` that owns the resource cache and the
//! write-exclusion arbiter, the `ReadEngineArgs` CLI surface, and cost
//! annotation accounting.

use graphd_cache::{Cache, DeterministicStampSource, StorableValue, SystemStampSource};
use graphd_cursor::Thawed;
use graphd_signature::VipIndex;
use graphd_xstate::Arbiter;

/// Top-level CLI surface, in the same nesting style as
/// Gazette/Flow's own `Flowctl`/`InternalSubcommandArgs`: ambient logging
/// flags flattened in alongside engine-specific ones.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "graphd read-engine core")]
pub struct ReadEngineArgs {
    #[clap(flatten)]
    pub log: graphd_cli::LogArgs,

    /// Maximum accounted bytes held by the iterator resource cache.
    #[arg(long = "cache.max-bytes", env = "GRAPHD_CACHE_MAX_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub cache_max_bytes: usize,

    /// Use the fixed `0x0123`/`0x456789AB` ticket stamp instead of the real
    /// process id and wall clock, for reproducible output.
    #[arg(long = "cache.deterministic-stamps", env = "GRAPHD_CACHE_DETERMINISTIC_STAMPS")]
    pub cache_deterministic_stamps: bool,

    /// Fan-in threshold above which a GUID is named verbatim in a
    /// signature rather than redacted.
    #[arg(long = "signature.vip-threshold", env = "GRAPHD_SIGNATURE_VIP_THRESHOLD", default_value_t = 8)]
    pub signature_vip_threshold: u32,
}

/// The resource cache, tagged by which stamp source minted its tickets.
/// A tagged variant with a method table, applied here to the one piece of
/// engine state whose type depends on a runtime CLI flag.
pub enum AnyCache {
    System(Cache<SystemStampSource>),
    Deterministic(Cache<DeterministicStampSource>),
}

impl AnyCache {
    pub fn new(args: &ReadEngineArgs) -> Self {
        if args.cache_deterministic_stamps {
            AnyCache::Deterministic(Cache::with_stamp_source(
                args.cache_max_bytes,
                DeterministicStampSource::default(),
            ))
        } else {
            AnyCache::System(Cache::new(args.cache_max_bytes))
        }
    }

    pub fn store(&mut self, value: impl StorableValue + 'static) -> Result<String, graphd_cache::Error> {
        match self {
            AnyCache::System(c) => c.store(value),
            AnyCache::Deterministic(c) => c.store(value),
        }
    }

    pub fn total_bytes(&self) -> usize {
        match self {
            AnyCache::System(c) => c.total_bytes(),
            AnyCache::Deterministic(c) => c.total_bytes(),
        }
    }

    pub fn flush(&mut self, ticket: &str) -> bool {
        match self {
            AnyCache::System(c) => c.flush(ticket),
            AnyCache::Deterministic(c) => c.flush(ticket),
        }
    }

    pub fn freeze_fragment(&mut self, buf: &mut String, fragment: &[u8]) {
        match self {
            AnyCache::System(c) => graphd_cursor::freeze(buf, fragment, c),
            AnyCache::Deterministic(c) => graphd_cursor::freeze(buf, fragment, c),
        }
    }

    pub fn thaw_fragment<'a>(&mut self, input: &'a str) -> Thawed<'a> {
        match self {
            AnyCache::System(c) => graphd_cursor::thaw(input, c),
            AnyCache::Deterministic(c) => graphd_cursor::thaw(input, c),
        }
    }
}

/// Everything a single graphd process shares across requests: the resource
/// cache, the write-exclusion arbiter, and the VIP fan-in index
/// used by signature hashing. Per-request state (the cooperative stack of
/// frames, a request's constraint tree) is owned by the request, not here.
pub struct ReadEngine {
    pub cache: AnyCache,
    pub arbiter: Arbiter,
    pub vip: VipIndex,
}

impl ReadEngine {
    pub fn new(args: &ReadEngineArgs) -> Self {
        Self {
            cache: AnyCache::new(args),
            arbiter: Arbiter::new(),
            vip: VipIndex::new(args.signature_vip_threshold),
        }
    }
}

/// Per-request cost accounting. The inbound `cost="..."`
/// blob is parsed by [`CostAccumulator::parse`]; a server built on this
/// core accumulates the same keys during a request's lifetime and renders
/// them back out with [`CostAccumulator::render`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostAccumulator {
    pub ts: u64,
    pub tu: u64,
    pub tr: u64,
    pub te: u64,
    pub pr: u64,
    pub pf: u64,
    pub va: u64,
    pub dr: u64,
    pub dw: u64,
    pub ir: u64,
    pub iw: u64,
    pub in_extents: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CostError {
    #[error("malformed cost value for key {0:?}")]
    Malformed(String),
}

impl CostAccumulator {
    /// Parses a `k=v k=v …` cost blob. Unknown keys are
    /// logged and ignored; a non-numeric or overflowing value for a known
    /// key is a syntax error.
    pub fn parse(blob: &str) -> Result<Self, CostError> {
        let mut acc = Self::default();
        for pair in blob.split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let slot: &mut u64 = match key {
                "ts" => &mut acc.ts,
                "tu" => &mut acc.tu,
                "tr" => &mut acc.tr,
                "te" => &mut acc.te,
                "pr" => &mut acc.pr,
                "pf" => &mut acc.pf,
                "va" => &mut acc.va,
                "dr" => &mut acc.dr,
                "dw" => &mut acc.dw,
                "ir" => &mut acc.ir,
                "iw" => &mut acc.iw,
                "in" => &mut acc.in_extents,
                other => {
                    tracing::warn!(key = other, "unknown cost key; ignoring");
                    continue;
                }
            };
            *slot = value.parse::<u64>().map_err(|_| CostError::Malformed(key.to_string()))?;
        }
        Ok(acc)
    }

    pub fn render(&self) -> String {
        format!(
            "ts={} tu={} tr={} te={} pr={} pf={} va={} dr={} dw={} ir={} iw={} in={}",
            self.ts,
            self.tu,
            self.tr,
            self.te,
            self.pr,
            self.pf,
            self.va,
            self.dr,
            self.dw,
            self.ir,
            self.iw,
            self.in_extents
        )
    }
}
