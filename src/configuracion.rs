//! Configuración del club guardada como clave/valor.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::{self, Auth};
use crate::error::ApiError;

pub async fn valor(pool: &PgPool, clave: &str) -> Result<Option<String>, ApiError> {
    let valor =
        sqlx::query_scalar::<_, String>("SELECT valor FROM configuracion WHERE clave = $1")
            .bind(clave)
            .fetch_optional(pool)
            .await?;
    Ok(valor)
}

async fn guardar(pool: &PgPool, clave: &str, valor: &str) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO configuracion (clave, valor)
        VALUES ($1, $2)
        ON CONFLICT (clave) DO UPDATE SET valor = EXCLUDED.valor
        "#,
    )
    .bind(clave)
    .bind(valor)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Deserialize)]
struct NormativaInput {
    normativa: String,
}

// GET /configuracion/normativa
async fn obtener_normativa(pool: web::Data<PgPool>, _auth: Auth) -> Result<HttpResponse, ApiError> {
    let normativa = valor(pool.get_ref(), "normativa").await?.unwrap_or_default();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "normativa": normativa })))
}

// PUT /configuracion/normativa
async fn actualizar_normativa(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<NormativaInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::DIRECTIVA)?;
    guardar(pool.get_ref(), "normativa", &datos.normativa).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/configuracion/normativa", web::get().to(obtener_normativa))
        .route(
            "/configuracion/normativa",
            web::put().to(actualizar_normativa),
        );
}
