use rustls::crypto::{ring, CryptoProvider};

fn install_rustls_provider() {
    if CryptoProvider::get_default().is_none() {
        // Fails only if another provider won a race to install.
        let _ = ring::default_provider().install_default();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_rustls_provider();

    // Load .env file if it exists; must happen before configuration is read
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    sniplane::cli::run_cli().await
}
