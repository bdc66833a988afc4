use {
    std::{fmt, net::SocketAddr, time::Duration},
    url::Url,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum Family {
    /// LP staking on DFK Chain, 14 pools.
    Unified,
    /// LP staking on the legacy Harmony deployment.
    HarmonyLp,
    /// Hunts (DFK Chain) and patrols (Metis).
    Pve,
    /// Gardening quest rewards.
    Gardening,
    /// Marketplace snapshot plus gene backfill.
    Marketplace,
    /// PvP battles.
    Tournaments,
    /// Raw swap events only. Not part of the default set; the unified
    /// family already covers the swap table.
    SwapOnly,
    /// Reward-harvest events only. Not part of the default set either.
    RewardOnly,
}

#[derive(clap::Parser)]
pub struct Arguments {
    /// Tracing filter, RUST_LOG syntax.
    #[clap(long, env, default_value = "info,indexer=debug")]
    pub log_filter: String,

    #[clap(long, env, default_value = "0.0.0.0:9589")]
    pub metrics_address: SocketAddr,

    /// Url of the Postgres database. By default connects to locally running
    /// postgres.
    #[clap(long, env, default_value = "postgresql://")]
    pub db_url: Url,

    #[clap(
        long,
        env,
        default_value = "https://subnets.avax.network/defi-kingdoms/dfk-chain/rpc"
    )]
    pub dfk_rpc_url: Url,

    #[clap(long, env, default_value = "https://andromeda.metis.io/?owner=1088")]
    pub metis_rpc_url: Url,

    #[clap(long, env, default_value = "https://api.harmony.one")]
    pub harmony_rpc_url: Url,

    /// Marketplace REST endpoint (POST with `{limit, offset}`).
    #[clap(long, env, default_value = "https://marketplace.defikingdoms.com/api/heroes")]
    pub marketplace_api_url: Url,

    /// GraphQL endpoint serving hero genes.
    #[clap(long, env, default_value = "https://api.defikingdoms.com/graphql")]
    pub genes_graphql_url: Url,

    /// GraphQL endpoint serving PvP battles.
    #[clap(long, env, default_value = "https://api.defikingdoms.com/pvp/graphql")]
    pub battles_graphql_url: Url,

    /// Families to run. Defaults to everything.
    #[clap(long, env, value_enum, use_value_delimiter = true)]
    pub families: Vec<Family>,

    /// Worker wake-up interval in seconds.
    #[clap(long, env, default_value = "60", value_parser = duration_from_seconds)]
    pub indexer_interval: Duration,

    /// Marketplace snapshot interval in seconds.
    #[clap(long, env, default_value = "3600", value_parser = duration_from_seconds)]
    pub marketplace_interval: Duration,

    /// Gene backfill interval in seconds.
    #[clap(long, env, default_value = "900", value_parser = duration_from_seconds)]
    pub gene_backfill_interval: Duration,

    /// Tournament pass interval in seconds.
    #[clap(long, env, default_value = "600", value_parser = duration_from_seconds)]
    pub tournament_interval: Duration,

    #[clap(long, env, default_value = "10")]
    pub marketplace_fetch_workers: usize,

    #[clap(long, env, default_value = "4")]
    pub gene_backfill_workers: usize,

    #[clap(long, env, default_value = "5")]
    pub tournament_workers: usize,

    /// Deletes the checkpoints of one fleet (`<family>:<scope>`, e.g.
    /// `unified:pool_3`) and exits. The only legal way to rewind progress.
    #[clap(long, env)]
    pub reset_progress: Option<String>,

    /// Runs a single manual pass of one family and exits instead of
    /// starting the scheduler.
    #[clap(long, env, value_enum)]
    pub run_once: Option<Family>,

    /// Runs the bargain-pair scorer once and exits. Needs a summoning
    /// engine wired in by the embedding binary.
    #[clap(long, env)]
    pub run_bargain: bool,
}

pub fn duration_from_seconds(value: &str) -> Result<Duration, std::num::ParseIntError> {
    Ok(Duration::from_secs(value.parse()?))
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "log_filter: {}", self.log_filter)?;
        writeln!(f, "metrics_address: {}", self.metrics_address)?;
        writeln!(f, "db_url: SECRET")?;
        writeln!(f, "dfk_rpc_url: {}", self.dfk_rpc_url)?;
        writeln!(f, "metis_rpc_url: {}", self.metis_rpc_url)?;
        writeln!(f, "harmony_rpc_url: {}", self.harmony_rpc_url)?;
        writeln!(f, "marketplace_api_url: {}", self.marketplace_api_url)?;
        writeln!(f, "genes_graphql_url: {}", self.genes_graphql_url)?;
        writeln!(f, "battles_graphql_url: {}", self.battles_graphql_url)?;
        writeln!(f, "families: {:?}", self.families)?;
        writeln!(f, "indexer_interval: {:?}", self.indexer_interval)?;
        writeln!(f, "marketplace_interval: {:?}", self.marketplace_interval)?;
        writeln!(f, "gene_backfill_interval: {:?}", self.gene_backfill_interval)?;
        writeln!(f, "tournament_interval: {:?}", self.tournament_interval)?;
        writeln!(
            f,
            "marketplace_fetch_workers: {}",
            self.marketplace_fetch_workers
        )?;
        writeln!(f, "gene_backfill_workers: {}", self.gene_backfill_workers)?;
        writeln!(f, "tournament_workers: {}", self.tournament_workers)?;
        writeln!(f, "reset_progress: {:?}", self.reset_progress)?;
        writeln!(f, "run_once: {:?}", self.run_once)?;
        writeln!(f, "run_bargain: {}", self.run_bargain)?;
        Ok(())
    }
}

impl Arguments {
    pub fn enabled(&self, family: Family) -> bool {
        if self.families.is_empty() {
            // the narrow variants duplicate unified tables, opt-in only
            return !matches!(family, Family::SwapOnly | Family::RewardOnly);
        }
        self.families.contains(&family)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[test]
    fn defaults_parse() {
        let args = Arguments::parse_from(["indexer"]);
        assert_eq!(args.indexer_interval, Duration::from_secs(60));
        assert_eq!(args.marketplace_fetch_workers, 10);
        assert!(args.enabled(Family::Unified));
        assert!(args.enabled(Family::Tournaments));
        // narrow variants are opt-in
        assert!(!args.enabled(Family::SwapOnly));
        assert!(!args.enabled(Family::RewardOnly));
    }

    #[test]
    fn narrow_variants_can_be_selected() {
        let args = Arguments::parse_from(["indexer", "--families", "swap-only"]);
        assert!(args.enabled(Family::SwapOnly));
        assert!(!args.enabled(Family::Unified));
    }

    #[test]
    fn family_selection() {
        let args = Arguments::parse_from(["indexer", "--families", "pve,gardening"]);
        assert!(args.enabled(Family::Pve));
        assert!(args.enabled(Family::Gardening));
        assert!(!args.enabled(Family::Unified));
    }
}
