use backend_api::{init_tracing, run_server};
use settings_loader::{load_settings, StoreSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = load_settings()?;

    println!("Kaimemo API Server");
    println!("==================");
    println!("Listening on: {}:{}", settings.host, settings.port);
    println!(
        "Record store: {}",
        match settings.store {
            StoreSettings::Notion(_) => "notion",
            StoreSettings::Memory => "memory",
        }
    );
    println!("LINE login: {}", if settings.line.is_some() { "enabled" } else { "disabled" });
    println!("Allowed origins: {}", settings.allow_origins.join(", "));
    println!();

    run_server(settings).await
}
