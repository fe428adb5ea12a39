//! # Tipline Binary
//!
//! The entry point that assembles the triage service from compile-time
//! features. Disabled plugins fall back to the in-process adapters in
//! `tl_core::memory`.

mod settings;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use log::{info, warn};
use tl_api::error::{json_config, query_config};
use tl_api::handlers::AppState;
use tl_api::middleware::{cors_policy, standard_middleware};
use tl_core::monitor::{spawn_claim_reaper, spawn_sla_monitor};
use tl_core::{
    CaseDirectory, DecisionArchive, EnginePorts, LeadSink, TipsterIdentity, TriageEngine, TriageRepository,
};

use crate::settings::{ServerSettings, Settings};

#[cfg(feature = "db-sqlite")]
use tl_db_sqlite::SqliteTriageStore;

#[cfg(feature = "identity-hash")]
use tl_identity_hash::HashedTipsterIdentity;

#[cfg(feature = "casebook-http")]
use tl_casebook_http::CasebookClient;

type StoragePorts = (Arc<dyn DecisionArchive>, Arc<dyn TriageRepository>);

async fn storage(server: &ServerSettings) -> anyhow::Result<StoragePorts> {
    #[cfg(feature = "db-sqlite")]
    {
        let store = Arc::new(SqliteTriageStore::new(&server.database_url).await?);
        let archive: Arc<dyn DecisionArchive> = store.clone();
        let repository: Arc<dyn TriageRepository> = store;
        Ok((archive, repository))
    }
    #[cfg(not(feature = "db-sqlite"))]
    {
        warn!(
            "db-sqlite disabled; triage state is lost on restart (ignoring {})",
            server.database_url
        );
        let archive: Arc<dyn DecisionArchive> = Arc::new(tl_core::memory::MemoryArchive::new());
        let repository: Arc<dyn TriageRepository> = Arc::new(tl_core::memory::MemoryRepository::new());
        Ok((archive, repository))
    }
}

fn tipster_identity(server: &ServerSettings) -> Arc<dyn TipsterIdentity> {
    #[cfg(feature = "identity-hash")]
    {
        if server.identity_salt.is_empty() {
            warn!("identity_salt is empty; tipster ids are unsalted hashes");
        }
        Arc::new(HashedTipsterIdentity::new(&server.identity_salt))
    }
    #[cfg(not(feature = "identity-hash"))]
    {
        let _ = server;
        warn!("identity-hash disabled; tipster ids carry raw contact values");
        Arc::new(tl_core::memory::PlainIdentity)
    }
}

type CasePorts = (Arc<dyn CaseDirectory>, Arc<dyn LeadSink>);

#[cfg(feature = "casebook-http")]
fn remote_case_service(server: &ServerSettings) -> anyhow::Result<Option<CasePorts>> {
    let Some(url) = &server.casebook_url else {
        return Ok(None);
    };
    let timeout = std::time::Duration::from_millis(server.casebook_timeout_ms);
    let client = Arc::new(CasebookClient::new(url, timeout)?);
    let cases: Arc<dyn CaseDirectory> = client.clone();
    let leads: Arc<dyn LeadSink> = client;
    info!("case service at {}", url);
    Ok(Some((cases, leads)))
}

#[cfg(not(feature = "casebook-http"))]
fn remote_case_service(_server: &ServerSettings) -> anyhow::Result<Option<CasePorts>> {
    Ok(None)
}

fn case_service(server: &ServerSettings) -> anyhow::Result<CasePorts> {
    if let Some(ports) = remote_case_service(server)? {
        return Ok(ports);
    }
    warn!("no case service configured; every case is treated as high risk and leads are only logged");
    let cases: Arc<dyn CaseDirectory> = Arc::new(tl_core::memory::StaticCaseDirectory::new());
    let leads: Arc<dyn LeadSink> = Arc::new(tl_core::memory::LogLeadSink);
    Ok((cases, leads))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let Settings { server, engine } = Settings::load()?;

    // 1. Assemble the ports from whichever plugins were compiled in
    let (cases, leads) = case_service(&server)?;
    let (archive, repository) = storage(&server).await?;
    let ports = EnginePorts {
        cases,
        leads,
        identity: tipster_identity(&server),
        archive,
        repository,
    };

    // 2. Build the engine, reload live state, start the background loops
    let engine = Arc::new(TriageEngine::new(engine, ports)?);
    engine.restore().await?;
    let _sla_monitor = spawn_sla_monitor(engine.clone());
    let _claim_reaper = spawn_claim_reaper(engine.clone());

    let state = web::Data::new(AppState { engine });
    let cors_origins = server.cors_origins.clone();

    info!("🚀 Tipline starting on http://{}", server.bind_address);

    let mut http = HttpServer::new(move || {
        App::new()
            .wrap(cors_policy(&cors_origins))
            .wrap(standard_middleware())
            .app_data(state.clone())
            .app_data(json_config())
            .app_data(query_config())
            .configure(tl_api::configure_routes)
    });
    if let Some(workers) = server.workers {
        http = http.workers(workers);
    }
    http.bind(&server.bind_address)?.run().await?;
    Ok(())
}
