use std::sync::Arc;

use dotenvy::dotenv;
use log::info;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use propserver::config::AppConfig;
use propserver::scheduler::{ReportScheduler, TriggerSpec};
use propserver::shared::settings::ensure_settings;
use propserver::shared::state::AppState;
use propserver::shared::utils::{create_conn, run_migrations};
use propserver::{
    auth, cli, directory, history, notify, service_requests, settings, stats, tasks, tickets,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => {}
        Some("--help") | Some("-h") => {
            println!("{}", cli::USAGE);
            return Ok(());
        }
        Some(_) => return cli::run(&args),
    }

    let config = AppConfig::from_env()?;
    let pool = create_conn(&config.database_url)?;
    run_migrations(&pool).map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;

    let initial_settings = {
        let mut conn = pool.get()?;
        ensure_settings(&mut conn, &config)?
    };

    let notifier = notify::spawn_workers(pool.clone());
    let scheduler = ReportScheduler::new(
        pool.clone(),
        notifier.clone(),
        TriggerSpec::from_settings(&initial_settings),
    );
    scheduler.start();

    let state = Arc::new(AppState {
        config: config.clone(),
        conn: pool,
        notifier,
        scheduler,
    });

    let app = axum::Router::new()
        .merge(auth::configure_auth_routes())
        .merge(tickets::configure_ticket_routes())
        .merge(tasks::configure_task_routes())
        .merge(service_requests::configure_service_request_routes())
        .merge(directory::configure_directory_routes())
        .merge(history::configure_history_routes())
        .merge(stats::configure_stats_routes())
        .merge(settings::configure_settings_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("propserver listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
