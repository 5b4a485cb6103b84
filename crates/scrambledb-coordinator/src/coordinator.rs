//! Scrambling coordinator
//!
//! Front door of the scrambling engine: validates the request, builds the
//! plan, runs it over the connection pool and returns the metadata record
//! downstream rewriting needs.

use crate::meta::ScrambleMeta;
use crate::method::{FastConvergeScramblingMethod, ScramblingMethod, UniformScramblingMethod};
use crate::plan::ScramblingPlan;
use scrambledb_common::{
    ConnectionPool, IdCreator, Result, ScrambleDbConfig, ScrambleDbError, ScrambleOptions,
    SCRAMBLE_BLOCK_SIZE,
};
use scrambledb_exec::ExecutablePlanRunner;
use scrambledb_sql::TableRef;
use std::collections::HashMap;

const SUPPORTED_METHODS: &[&str] = &["uniform", "fastconverge"];
const DEFAULT_METHOD: &str = "uniform";

/// Coordinates scrambles against one backend.
pub struct ScramblingCoordinator {
    pool: ConnectionPool,
    scramble_schema: Option<String>,
    scratchpad_schema: Option<String>,
    options: ScrambleOptions,
}

impl ScramblingCoordinator {
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            scramble_schema: None,
            scratchpad_schema: None,
            options: ScrambleOptions::new(),
        }
    }

    pub fn from_config(pool: ConnectionPool, config: &ScrambleDbConfig) -> Self {
        let mut coordinator = Self::new(pool);
        if let Some(schema) = &config.scramble_schema {
            coordinator = coordinator.with_scramble_schema(schema);
        }
        if let Some(schema) = &config.scratchpad_schema {
            coordinator = coordinator.with_scratchpad_schema(schema);
        }
        if let Some(block_size) = config.block_size {
            coordinator = coordinator.with_block_size(block_size);
        }
        coordinator
    }

    /// Schema for created scrambles. Also becomes the scratchpad schema
    /// unless one was set explicitly.
    pub fn with_scramble_schema(mut self, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        if self.scratchpad_schema.is_none() {
            self.scratchpad_schema = Some(schema.clone());
        }
        self.scramble_schema = Some(schema);
        self
    }

    pub fn with_scratchpad_schema(mut self, schema: impl Into<String>) -> Self {
        self.scratchpad_schema = Some(schema.into());
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.options.set(SCRAMBLE_BLOCK_SIZE, block_size.to_string());
        self
    }

    /// Scrambles `schema.table` with the default method into the default
    /// target: the scramble schema (or the source's own) and the source
    /// name with the configured suffix appended.
    pub async fn scramble(&self, schema: &str, table: &str) -> Result<ScrambleMeta> {
        let new_schema = self
            .scramble_schema
            .clone()
            .unwrap_or_else(|| schema.to_string());
        let new_table = format!("{}{}", table, self.options.scramble_table_suffix());
        self.scramble_as(schema, table, &new_schema, &new_table).await
    }

    pub async fn scramble_as(
        &self,
        schema: &str,
        table: &str,
        new_schema: &str,
        new_table: &str,
    ) -> Result<ScrambleMeta> {
        self.scramble_with_method(schema, table, new_schema, new_table, DEFAULT_METHOD, None)
            .await
    }

    pub async fn scramble_with_method(
        &self,
        schema: &str,
        table: &str,
        new_schema: &str,
        new_table: &str,
        method_name: &str,
        primary_column: Option<&str>,
    ) -> Result<ScrambleMeta> {
        self.scramble_full(
            schema,
            table,
            new_schema,
            new_table,
            method_name,
            primary_column,
            &HashMap::new(),
        )
        .await
    }

    /// The fully-parameterized scramble entry point. The method name is
    /// validated before anything reaches the backend, so a typo costs zero
    /// statements. `custom_options` override the coordinator's defaults
    /// key-by-key for this call only.
    #[allow(clippy::too_many_arguments)]
    pub async fn scramble_full(
        &self,
        schema: &str,
        table: &str,
        new_schema: &str,
        new_table: &str,
        method_name: &str,
        primary_column: Option<&str>,
        custom_options: &HashMap<String, String>,
    ) -> Result<ScrambleMeta> {
        let method_name = method_name.trim().to_lowercase();
        if !SUPPORTED_METHODS.contains(&method_name.as_str()) {
            return Err(ScrambleDbError::Configuration(format!(
                "unsupported scrambling method: {method_name} (supported: {})",
                SUPPORTED_METHODS.join(", ")
            )));
        }

        let options = self.options.merged(custom_options);
        let block_size = options.block_size()?;
        let method = match method_name.as_str() {
            "uniform" => ScramblingMethod::Uniform(UniformScramblingMethod::new(block_size)),
            _ => ScramblingMethod::FastConverge(FastConvergeScramblingMethod::new(
                block_size,
                self.scratchpad_schema.clone(),
                primary_column.map(str::to_string),
            )?),
        };

        let source = TableRef::new(schema, table);
        let target = TableRef::new(new_schema, new_table);
        tracing::info!(
            source = %source,
            target = %target,
            method = method.name(),
            block_size,
            "starting scramble"
        );

        let id_creator = IdCreator::new(
            self.scratchpad_schema
                .clone()
                .unwrap_or_else(|| schema.to_string()),
        );
        let (mut plan, method) =
            ScramblingPlan::create(&target, &source, method, &options, &id_creator)?;
        ExecutablePlanRunner::run_till_end(&self.pool, &mut plan).await?;

        let method = method.lock();
        let tier_count = method.tier_count();
        let mut cumulative_distributions = HashMap::with_capacity(tier_count);
        for tier in 0..tier_count {
            cumulative_distributions
                .insert(tier, method.cumulative_probability_distribution_for_tier(tier)?);
        }

        let meta = ScrambleMeta {
            schema_name: new_schema.to_string(),
            table_name: new_table.to_string(),
            original_schema_name: schema.to_string(),
            original_table_name: table.to_string(),
            block_column: options.block_column_name().to_string(),
            block_count: method.block_count(),
            tier_column: options.tier_column_name().to_string(),
            tier_count,
            cumulative_distributions,
        };
        tracing::info!(
            target = %target,
            blocks = meta.block_count,
            tiers = meta.tier_count,
            "scramble complete"
        );
        Ok(meta)
    }
}
