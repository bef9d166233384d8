use env_logger::Env;
use sheet_analyst::app;
use sheet_analyst::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    // Start the web service
    app::run(config).await?;

    Ok(())
}
