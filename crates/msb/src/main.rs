use std::sync::Arc;

use msb_core::{
    config::Config,
    settings::{JsonSettingsStore, SettingsStore},
    store::{Account, SyncStore},
    supervisor::Supervisor,
};
use msb_source::HttpSource;
use msb_telegram::TelegramChannelFactory;

#[tokio::main]
async fn main() -> Result<(), msb_core::Error> {
    msb_core::logging::init("msb")?;

    let cfg = Config::load()?;
    let store = Arc::new(SyncStore::load(&cfg.state_file)?);

    if let (Some(login_id), Some(secret)) =
        (cfg.source_login_id.clone(), cfg.source_secret.clone())
    {
        if !store.account_exists(&login_id) {
            tracing::info!("registering source account {login_id}");
            store.add_account(Account {
                login_id,
                secret,
                // First ingest logs in and fills this.
                session_token: String::new(),
                admin_id: None,
            });
        }
    }

    let source = Arc::new(HttpSource::new(
        cfg.source_base_url.clone(),
        cfg.http_timeout,
    )?);
    let factory = Arc::new(TelegramChannelFactory);

    let supervisor = Arc::new(Supervisor::new(
        store,
        source,
        factory,
        cfg.channel_release_timeout,
        cfg.http_timeout,
    ));

    let settings = JsonSettingsStore::new(&cfg.settings_file).get();
    supervisor.apply_settings(&settings).await;
    supervisor.clone().start();

    tokio::signal::ctrl_c()
        .await
        .map_err(msb_core::Error::Io)?;
    tracing::info!("shutdown requested");
    supervisor.shutdown().await;

    Ok(())
}
