use clap::Parser;
use log::LevelFilter;

use crate::{
    config::{Config, ConfigStore},
    scenario::Scenario,
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[arg(
        short,
        long,
        help = "The path to the config file. The default is `config.toml`."
    )]
    pub config: Option<String>,

    #[arg(
        short,
        long,
        help = "Milliseconds between periodic media scans. This overrides the value from the config file."
    )]
    pub scan_interval: Option<u64>,

    #[arg(help = "The JSON scenario to replay.")]
    pub scenario: String,
}

pub async fn start() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_env("SCROLL_VOLUME_LOG")
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli_args(&cli)?;
    let store = ConfigStore::new(config.settings);

    let scenario = Scenario::read_path(&cli.scenario)?;
    let report = scenario.run(&store).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
