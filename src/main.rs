use anyhow::Result;
use pallet::cli::{App, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();
    let mut app = App::load(&args)?;

    app.run(args).await?;

    Ok(())
}
