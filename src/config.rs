use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub ethereum_rpc_url: String,
    pub database_url: String,
    pub finality_blocks: u64,
    pub skip_window: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .set_default("ethereum_rpc_url", "http://localhost:8545")?
            .set_default("database_url", "sqlite:./block-ledger.db")?
            .set_default("finality_blocks", 100_i64)?
            .set_default("skip_window", 50_i64)?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize::<Config>()?;

        if config.skip_window == 0 {
            anyhow::bail!("SKIP_WINDOW must be at least 1");
        }

        Ok(config)
    }
}
