//! Scrambling methods
//!
//! A scrambling method decides the block/tier layout for a source table and
//! compiles that decision into SQL the backend can evaluate, since block
//! assignment must scale to tables far larger than anything the middleware
//! could materialize in-process. The decision also fixes the per-tier
//! cumulative probability distributions the aggregation estimator reads
//! later.
//!
//! Blocks are numbered globally in tier order: tier 0's blocks come first,
//! so a query reading a block prefix of the scrambled table consumes tiers
//! in order.

use scrambledb_common::{Result, ScrambleDbError};
use scrambledb_sql::{Expr, Relation, SelectQuery, TableRef};
use std::collections::HashMap;

/// Alias of the source table inside the generated select.
const SOURCE_ALIAS: &str = "scrambledb_t";
/// Alias of the stratification lookup inside the generated select.
const LOOKUP_ALIAS: &str = "scrambledb_g";
/// Alias of the derived table carrying the random draws.
const INNER_ALIAS: &str = "scrambledb_inner";
/// Random draw deciding the tier of a row.
const TIER_RAND_COLUMN: &str = "scrambledb_tier_rand";
/// Random draw deciding the block of a row within its tier.
const BLOCK_RAND_COLUMN: &str = "scrambledb_block_rand";
/// Group-size column of the stratification lookup table.
pub const GROUP_SIZE_COLUMN: &str = "scrambledb_group_size";

/// Upper bound on blocks per tier; beyond it, blocks grow past the
/// configured size instead.
pub const DEFAULT_MAX_BLOCK_COUNT: usize = 4096;

/// FastConverge uses three tiers whose expected sizes shrink geometrically
/// (ratio 10) toward tier 0, so the earliest-read tier is the smallest.
const FAST_CONVERGE_TIER_WEIGHTS: [f64; 3] = [1.0, 10.0, 100.0];

/// A group is "rare" when its row count is at most `block_size / 100`
/// (floored, at least 1); rare-group rows form tier 0 of a stratified
/// FastConverge scramble so skewed groups are seen early.
pub fn rare_group_threshold(block_size: u64) -> i64 {
    ((block_size / 100).max(1)) as i64
}

/// Statistics gathered by the probe nodes before the method decides.
#[derive(Debug, Clone, Default)]
pub struct SourceStatistics {
    pub row_count: i64,
    pub columns: Vec<String>,
    /// Present only for stratified FastConverge.
    pub group_stats: Option<GroupStatistics>,
}

/// Statistics read off the stratification lookup table.
#[derive(Debug, Clone, Default)]
pub struct GroupStatistics {
    pub group_count: i64,
    /// Total rows belonging to rare groups.
    pub rare_row_count: i64,
}

/// Everything `decide` needs beyond the method's own state.
#[derive(Debug, Clone)]
pub struct DecideContext {
    pub source: TableRef,
    pub stats: SourceStatistics,
    pub tier_column: String,
    pub block_column: String,
    /// Materialized group-count table, for stratified FastConverge.
    pub stratification_lookup: Option<TableRef>,
}

/// State shared by every method: sizing parameters plus the per-tier
/// cumulative distributions stored by `decide`. Distributions are written
/// once and never touched again.
#[derive(Debug, Clone)]
pub struct MethodBase {
    block_size: u64,
    max_block_count: usize,
    relative_size: f64,
    block_count: usize,
    stored: HashMap<usize, Vec<f64>>,
}

impl MethodBase {
    fn new(block_size: u64, max_block_count: usize, relative_size: f64) -> Self {
        Self {
            block_size,
            max_block_count,
            relative_size,
            block_count: 0,
            stored: HashMap::new(),
        }
    }

    fn store(&mut self, tier: usize, distribution: Vec<f64>) {
        self.stored.insert(tier, distribution);
    }
}

/// Uniform scrambling: a single tier, rows spread over equally likely
/// blocks.
#[derive(Debug, Clone)]
pub struct UniformScramblingMethod {
    base: MethodBase,
}

impl UniformScramblingMethod {
    pub fn new(block_size: u64) -> Self {
        Self {
            base: MethodBase::new(block_size, DEFAULT_MAX_BLOCK_COUNT, 1.0),
        }
    }
}

/// FastConverge scrambling: three front-loaded tiers, optionally stratified
/// by a primary column so skewed groups do not dominate early blocks.
#[derive(Debug, Clone)]
pub struct FastConvergeScramblingMethod {
    base: MethodBase,
    scratchpad_schema: String,
    primary_column: Option<String>,
}

impl FastConvergeScramblingMethod {
    /// Fails before any statement executes when no scratchpad schema is
    /// configured; FastConverge materializes intermediate tables there.
    pub fn new(
        block_size: u64,
        scratchpad_schema: Option<String>,
        primary_column: Option<String>,
    ) -> Result<Self> {
        let scratchpad_schema = scratchpad_schema.ok_or_else(|| {
            ScrambleDbError::Configuration(
                "fastconverge scrambling requires a scratchpad schema".to_string(),
            )
        })?;
        Ok(Self {
            base: MethodBase::new(block_size, DEFAULT_MAX_BLOCK_COUNT, 1.0),
            scratchpad_schema,
            primary_column,
        })
    }
}

/// The supported scrambling methods.
#[derive(Debug, Clone)]
pub enum ScramblingMethod {
    Uniform(UniformScramblingMethod),
    FastConverge(FastConvergeScramblingMethod),
}

impl ScramblingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ScramblingMethod::Uniform(_) => "uniform",
            ScramblingMethod::FastConverge(_) => "fastconverge",
        }
    }

    pub fn tier_count(&self) -> usize {
        match self {
            ScramblingMethod::Uniform(_) => 1,
            ScramblingMethod::FastConverge(_) => FAST_CONVERGE_TIER_WEIGHTS.len(),
        }
    }

    /// Total block count across all tiers; valid once `decide` has run.
    pub fn block_count(&self) -> usize {
        self.base().block_count
    }

    pub fn block_size(&self) -> u64 {
        self.base().block_size
    }

    pub fn primary_column(&self) -> Option<&str> {
        match self {
            ScramblingMethod::Uniform(_) => None,
            ScramblingMethod::FastConverge(method) => method.primary_column.as_deref(),
        }
    }

    pub fn scratchpad_schema(&self) -> Option<&str> {
        match self {
            ScramblingMethod::Uniform(_) => None,
            ScramblingMethod::FastConverge(method) => Some(&method.scratchpad_schema),
        }
    }

    /// The stored cumulative distribution for `tier`: non-decreasing, one
    /// entry per block in the tier, ending at 1.0.
    pub fn cumulative_probability_distribution_for_tier(&self, tier: usize) -> Result<Vec<f64>> {
        self.base().stored.get(&tier).cloned().ok_or_else(|| {
            ScrambleDbError::Internal(format!(
                "no stored distribution for tier {tier}; decide has not run"
            ))
        })
    }

    fn base(&self) -> &MethodBase {
        match self {
            ScramblingMethod::Uniform(method) => &method.base,
            ScramblingMethod::FastConverge(method) => &method.base,
        }
    }

    fn base_mut(&mut self) -> &mut MethodBase {
        match self {
            ScramblingMethod::Uniform(method) => &mut method.base,
            ScramblingMethod::FastConverge(method) => &mut method.base,
        }
    }

    /// Decides the block/tier layout for the probed source and returns the
    /// select that computes it: all original columns plus a tier column and
    /// a block column. Stores the per-tier cumulative distributions as a
    /// side effect.
    pub fn decide(&mut self, ctx: &DecideContext) -> Result<SelectQuery> {
        if ctx.stats.columns.is_empty() {
            return Err(ScrambleDbError::Structural(
                "column probe returned no columns".to_string(),
            ));
        }
        match self {
            ScramblingMethod::Uniform(_) => self.decide_uniform(ctx),
            ScramblingMethod::FastConverge(_) => self.decide_fast_converge(ctx),
        }
    }

    fn decide_uniform(&mut self, ctx: &DecideContext) -> Result<SelectQuery> {
        let base = self.base_mut();
        let rows = ctx.stats.row_count.max(0) as f64 * base.relative_size;
        let distribution =
            cumulative_distribution(rows, base.block_size as f64, base.max_block_count);

        let tier_expr = Expr::int(0);
        let block_expr = block_case(BLOCK_RAND_COLUMN, &distribution, 0);
        base.block_count = distribution.len();
        base.store(0, distribution);

        Ok(scramble_select(ctx, None, tier_expr, block_expr))
    }

    fn decide_fast_converge(&mut self, ctx: &DecideContext) -> Result<SelectQuery> {
        let block_size = self.block_size();
        let (lookup, threshold) = match self {
            ScramblingMethod::FastConverge(method) if method.primary_column.is_some() => {
                let lookup = ctx.stratification_lookup.clone().ok_or_else(|| {
                    ScrambleDbError::Internal(
                        "stratified fastconverge decided without a lookup table".to_string(),
                    )
                })?;
                (Some(lookup), rare_group_threshold(block_size))
            }
            _ => (None, 0),
        };

        let base = self.base_mut();
        let rows = ctx.stats.row_count.max(0) as f64 * base.relative_size;
        let weight_total: f64 = FAST_CONVERGE_TIER_WEIGHTS.iter().sum();

        // Expected rows per tier. Without a primary column the split is
        // purely geometric; with one, tier 0 holds exactly the rare-group
        // rows and the geometric split applies to the rest.
        let tier_rows: Vec<f64> = if lookup.is_some() {
            let stats = ctx.stats.group_stats.clone().unwrap_or_default();
            tracing::debug!(
                groups = stats.group_count,
                rare_rows = stats.rare_row_count,
                "stratification group statistics"
            );
            let rare = (stats.rare_row_count.max(0) as f64).min(rows);
            let rest = rows - rare;
            let rest_total: f64 = FAST_CONVERGE_TIER_WEIGHTS[1..].iter().sum();
            vec![
                rare,
                rest * FAST_CONVERGE_TIER_WEIGHTS[1] / rest_total,
                rest * FAST_CONVERGE_TIER_WEIGHTS[2] / rest_total,
            ]
        } else {
            FAST_CONVERGE_TIER_WEIGHTS
                .iter()
                .map(|weight| rows * weight / weight_total)
                .collect()
        };

        let distributions: Vec<Vec<f64>> = tier_rows
            .iter()
            .map(|&tier| cumulative_distribution(tier, base.block_size as f64, base.max_block_count))
            .collect();
        let offsets: Vec<i64> = distributions
            .iter()
            .scan(0i64, |offset, distribution| {
                let current = *offset;
                *offset += distribution.len() as i64;
                Some(current)
            })
            .collect();
        base.block_count = distributions.iter().map(Vec::len).sum();

        // Tier membership conditions, in tier order; the last tier is the
        // CASE fallback.
        let tier_conditions: Vec<Expr> = if lookup.is_some() {
            let rest_fraction =
                FAST_CONVERGE_TIER_WEIGHTS[1] / FAST_CONVERGE_TIER_WEIGHTS[1..].iter().sum::<f64>();
            vec![
                Expr::col(GROUP_SIZE_COLUMN).lte(Expr::int(threshold)),
                Expr::col(TIER_RAND_COLUMN).lt(Expr::float(rest_fraction)),
            ]
        } else {
            let mut cumulative = 0.0;
            FAST_CONVERGE_TIER_WEIGHTS[..FAST_CONVERGE_TIER_WEIGHTS.len() - 1]
                .iter()
                .map(|weight| {
                    cumulative += weight / weight_total;
                    Expr::col(TIER_RAND_COLUMN).lt(Expr::float(cumulative))
                })
                .collect()
        };

        let tier_expr = Expr::Case {
            branches: tier_conditions
                .iter()
                .enumerate()
                .map(|(tier, condition)| (condition.clone(), Expr::int(tier as i64)))
                .collect(),
            else_expr: Box::new(Expr::int((tier_conditions.len()) as i64)),
        };
        let block_expr = Expr::Case {
            branches: tier_conditions
                .iter()
                .enumerate()
                .map(|(tier, condition)| {
                    (
                        condition.clone(),
                        block_case(BLOCK_RAND_COLUMN, &distributions[tier], offsets[tier]),
                    )
                })
                .collect(),
            else_expr: Box::new(block_case(
                BLOCK_RAND_COLUMN,
                &distributions[distributions.len() - 1],
                offsets[offsets.len() - 1],
            )),
        };

        for (tier, distribution) in distributions.into_iter().enumerate() {
            base.store(tier, distribution);
        }

        let primary = self.primary_column().map(str::to_string);
        Ok(scramble_select(
            ctx,
            lookup.map(|table| (table, primary.unwrap_or_default())),
            tier_expr,
            block_expr,
        ))
    }
}

/// Cumulative probability distribution over the blocks holding `rows` rows:
/// each block's share is proportional to its expected row count, with only
/// the last block partially filled.
fn cumulative_distribution(rows: f64, block_size: f64, max_block_count: usize) -> Vec<f64> {
    if rows < 1.0 {
        return vec![1.0];
    }
    let blocks = ((rows / block_size).ceil() as usize).clamp(1, max_block_count);
    let capacity = (rows / blocks as f64).ceil();
    (1..=blocks)
        .map(|i| ((i as f64) * capacity / rows).min(1.0))
        .collect()
}

/// `case when <rand> < cum[0] then offset ... else offset + n - 1 end`
fn block_case(rand_column: &str, cumulative: &[f64], offset: i64) -> Expr {
    if cumulative.len() == 1 {
        return Expr::int(offset);
    }
    Expr::Case {
        branches: cumulative[..cumulative.len() - 1]
            .iter()
            .enumerate()
            .map(|(index, &threshold)| {
                (
                    Expr::col(rand_column).lt(Expr::float(threshold)),
                    Expr::int(offset + index as i64),
                )
            })
            .collect(),
        else_expr: Box::new(Expr::int(offset + cumulative.len() as i64 - 1)),
    }
}

/// The full scramble select: an inner derived table extends the source with
/// the random draws (and the group-size column when stratifying); the outer
/// select lists the probed source columns plus the tier and block
/// expressions.
fn scramble_select(
    ctx: &DecideContext,
    lookup: Option<(TableRef, String)>,
    tier_expr: Expr,
    block_expr: Expr,
) -> SelectQuery {
    let mut inner_select = vec![
        Expr::Star(Some(SOURCE_ALIAS.to_string())),
        Expr::func("rand", vec![]).aliased(TIER_RAND_COLUMN),
        Expr::func("rand", vec![]).aliased(BLOCK_RAND_COLUMN),
    ];
    let inner_from = match &lookup {
        Some((lookup_table, primary_column)) => {
            inner_select.push(Expr::qualified(LOOKUP_ALIAS, GROUP_SIZE_COLUMN));
            vec![Relation::join(
                Relation::aliased_table(ctx.source.clone(), SOURCE_ALIAS),
                Relation::aliased_table(lookup_table.clone(), LOOKUP_ALIAS),
                Expr::qualified(SOURCE_ALIAS, primary_column)
                    .equals(Expr::qualified(LOOKUP_ALIAS, primary_column)),
            )]
        }
        None => vec![Relation::aliased_table(ctx.source.clone(), SOURCE_ALIAS)],
    };
    let inner = SelectQuery::new(inner_select, inner_from);

    let mut outer_select: Vec<Expr> = ctx.stats.columns.iter().map(Expr::col).collect();
    outer_select.push(tier_expr.aliased(&ctx.tier_column));
    outer_select.push(block_expr.aliased(&ctx.block_column));

    SelectQuery::new(outer_select, vec![Relation::derived(inner, INNER_ALIAS)])
}
