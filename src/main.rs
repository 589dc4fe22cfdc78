/// Entry point for the stackwatch compose fleet monitor.
///
/// Loads configuration (see `config::load` for the lookup order), wires the
/// log filter from it and hands off to the library runtime.
///
/// # Examples
///
/// ```bash
/// STACKWATCH_SCAN_PATHS=/srv/stacks cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = stackwatch::config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();
    stackwatch::run(config).await
}
