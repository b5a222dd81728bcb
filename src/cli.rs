use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "telegram-forwarder-bot", version, about = "Telegram message forwarding bot")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: String,
}
