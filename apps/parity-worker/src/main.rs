use clap::Parser;

use parity_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	parity_worker::run(Args::parse()).await
}
