use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use log::info;

use parklot::config::Config;
use parklot::db;
use parklot::handlers::{self, AppState};
use parklot::store::PgStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    pretty_env_logger::init();
    let config = Config::from_env();

    let pool = db::get_db_pool(&config.database_url)
        .await
        .expect("Failed to connect to DB");
    db::init_schema(&pool).await.expect("Failed to prepare schema");

    let state = AppState::new(Arc::new(PgStore::new(pool)), config.session_ttl_hours);
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        state
            .auth
            .ensure_admin(email, password)
            .await
            .expect("Failed to seed admin account");
    }

    let data = web::Data::new(state);
    info!("listening on {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Logger::default())
            .configure(handlers::routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
