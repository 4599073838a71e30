mod handlers;
mod middleware;
mod models;
mod services;
mod utils;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::io;
use std::sync::Arc;

use handlers::reports::AppState;
use services::llm::LlmClient;
use services::report_scheduler::ReportScheduler;
use services::git_platforms::PlatformConfig;
use services::reporter::{resolve_token_owners, GitHubSources, ReportService};
use utils::config::Config;

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    log::error!("❌ {}: {}", context, err);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load .env before the logger reads RUST_LOG
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=================================================");
    println!("🚀 gitreport server");
    println!("=================================================");

    let mut config = Config::from_env().map_err(|e| startup_error("Failed to load configuration", e))?;
    config
        .validate()
        .map_err(|e| startup_error("Invalid configuration", e))?;

    let platform = PlatformConfig::github_with_api(&config.github_api_url);
    resolve_token_owners(&platform, &mut config.github_tokens).await;

    let host = config.host.clone();
    let port = config.port;
    let usernames = config.report_usernames();

    println!("📝 Configuration loaded:");
    println!("   - Host: {}", host);
    println!("   - Port: {}", port);
    println!("   - GitHub API: {}", config.github_api_url);
    println!("   - GitHub tokens: {} ({} named)", config.github_tokens.len(), usernames.len());
    println!("   - LLM: {} / {}", config.llm.provider, config.llm.model);
    println!(
        "   - Scheduler: {}",
        if config.scheduler.enabled { "ENABLED" } else { "DISABLED" }
    );
    println!(
        "   - Log level: {}",
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    );

    let generator =
        LlmClient::new(config.llm.clone()).map_err(|e| startup_error("Failed to create LLM client", e))?;
    let notifiers = services::notifier::from_config(&config.notifiers)
        .map_err(|e| startup_error("Failed to create notifiers", e))?;
    log::info!(
        "Notifiers enabled: {}",
        notifiers.iter().map(|n| n.name()).collect::<Vec<_>>().join(", ")
    );

    let reports = Arc::new(ReportService::new(
        Arc::new(GitHubSources::from_config(&config)),
        Arc::new(generator),
        config.fetch_options(),
        config.scheduler.window_days,
    ));

    if config.scheduler.enabled {
        if usernames.is_empty() {
            log::warn!("⚠️ Scheduler enabled but no GITHUB_TOKENS entry has a username");
        }
        let scheduler = Arc::new(ReportScheduler::new(
            reports.clone(),
            notifiers.clone(),
            usernames.clone(),
            config.scheduler.clone(),
        ));
        tokio::spawn(async move {
            scheduler.start().await;
        });
    } else {
        log::info!("Scheduler is disabled");
    }

    let state = web::Data::new(AppState {
        reports,
        notifiers,
        usernames,
        webhook_token: config.webhook_token.clone(),
    });

    println!("🌐 Starting HTTP server at http://{}:{}", host, port);
    println!("📍 Available endpoints:");
    println!("   - GET  http://{}:{}/api/v1/health", host, port);
    println!("   - GET  http://{}:{}/api/v1/users/{{username}}/activity", host, port);
    println!("   - POST http://{}:{}/api/v1/reports/generate", host, port);
    println!("   - POST http://{}:{}/api/v1/reports/generate-all", host, port);
    println!(
        "   - POST http://{}:{}/api/v1/webhook{}",
        host,
        port,
        if config.webhook_token.is_some() { " (token required)" } else { "" }
    );
    println!("=================================================");

    log::info!("Server started at http://{}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(handlers::reports::health))
                    .route(
                        "/users/{username}/activity",
                        web::get().to(handlers::reports::get_user_activity),
                    )
                    .route(
                        "/reports/generate",
                        web::post().to(handlers::reports::generate_report),
                    )
                    .route(
                        "/reports/generate-all",
                        web::post().to(handlers::reports::generate_all_reports),
                    )
                    .route("/webhook", web::post().to(handlers::reports::webhook)),
            )
    })
    .bind((host, port))?
    .run()
    .await
}
