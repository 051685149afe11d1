use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = ark_api::Args::parse();

	ark_api::run(args).await
}
