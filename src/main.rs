use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;
use tracing_subscriber::EnvFilter;

mod auth;
mod cambios;
mod configuracion;
mod dinero;
mod error;
mod inventario;
mod invitaciones;
mod precio;
mod reservas;
mod servicios;
mod socios;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "3002".to_string())
        .parse()
        .expect("PORT inválido");

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL no está en el .env");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("No se pudo conectar a la base de datos");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("No se pudieron aplicar las migraciones");

    tracing::info!(port, "servidor escuchando");

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(web::Data::new(pool.clone()))
            // LOGIN / SESIONES
            .configure(auth::configurar)
            // SOCIOS
            .configure(socios::configurar)
            // SERVICIOS + SUPLEMENTOS
            .configure(servicios::configurar)
            // RESERVAS
            .configure(reservas::configurar)
            // INVENTARIO
            .configure(inventario::configurar)
            // INVITACIONES
            .configure(invitaciones::configurar)
            // CAMBIOS
            .configure(cambios::configurar)
            // CONFIGURACIÓN
            .configure(configuracion::configurar)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
