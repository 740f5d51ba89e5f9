//! Catálogo de instalaciones reservables (servicios) y sus suplementos.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::auth::{self, Auth};
use crate::error::ApiError;
use crate::precio::TipoSuplemento;

#[derive(Serialize, FromRow)]
struct ServicioRow {
    id_servicio: i32,
    nombre: String,
    precio_centavos: i64,
    color_primario: String,
    color_secundario: String,
    activo: bool,
}

#[derive(Deserialize)]
struct ServicioInput {
    nombre: String,
    precio_centavos: i64,
    color_primario: Option<String>,
    color_secundario: Option<String>,
    activo: Option<bool>,
}

#[derive(Serialize, FromRow)]
struct SuplementoRow {
    id_suplemento: i32,
    nombre: String,
    precio_centavos: i64,
    tipo: String,
    activo: bool,
}

#[derive(Deserialize)]
struct SuplementoInput {
    nombre: String,
    precio_centavos: i64,
    tipo: String,
    activo: Option<bool>,
}

fn validar_servicio(datos: &ServicioInput) -> Result<(), ApiError> {
    if datos.nombre.trim().is_empty() {
        return Err(ApiError::Validacion("El nombre es obligatorio".to_string()));
    }
    if datos.precio_centavos < 0 {
        return Err(ApiError::Validacion(
            "El precio no puede ser negativo".to_string(),
        ));
    }
    Ok(())
}

fn validar_suplemento(datos: &SuplementoInput) -> Result<(), ApiError> {
    if datos.nombre.trim().is_empty() {
        return Err(ApiError::Validacion("El nombre es obligatorio".to_string()));
    }
    if datos.precio_centavos < 0 {
        return Err(ApiError::Validacion(
            "El precio no puede ser negativo".to_string(),
        ));
    }
    if TipoSuplemento::parse(&datos.tipo).is_none() {
        return Err(ApiError::Validacion(
            "El tipo debe ser 'fijo' o 'porHora'".to_string(),
        ));
    }
    Ok(())
}

fn es_violacion_fk(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

// =====================================
// SERVICIOS
// =====================================

async fn listar_servicios(pool: web::Data<PgPool>, _auth: Auth) -> Result<HttpResponse, ApiError> {
    let servicios = sqlx::query_as::<_, ServicioRow>(
        r#"
        SELECT id_servicio, nombre, precio_centavos, color_primario, color_secundario, activo
        FROM servicios
        ORDER BY nombre
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(servicios))
}

async fn crear_servicio(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<ServicioInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    validar_servicio(&datos)?;

    let servicio = sqlx::query_as::<_, ServicioRow>(
        r#"
        INSERT INTO servicios (nombre, precio_centavos, color_primario, color_secundario, activo)
        VALUES ($1, $2, COALESCE($3, '#1d4ed8'), COALESCE($4, '#dbeafe'), $5)
        RETURNING id_servicio, nombre, precio_centavos, color_primario, color_secundario, activo
        "#,
    )
    .bind(datos.nombre.trim())
    .bind(datos.precio_centavos)
    .bind(&datos.color_primario)
    .bind(&datos.color_secundario)
    .bind(datos.activo.unwrap_or(true))
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(servicio))
}

async fn actualizar_servicio(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<ServicioInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    validar_servicio(&datos)?;
    let id = path.into_inner();

    let servicio = sqlx::query_as::<_, ServicioRow>(
        r#"
        UPDATE servicios
        SET nombre = $1, precio_centavos = $2,
            color_primario = COALESCE($3, color_primario),
            color_secundario = COALESCE($4, color_secundario),
            activo = $5
        WHERE id_servicio = $6
        RETURNING id_servicio, nombre, precio_centavos, color_primario, color_secundario, activo
        "#,
    )
    .bind(datos.nombre.trim())
    .bind(datos.precio_centavos)
    .bind(&datos.color_primario)
    .bind(&datos.color_secundario)
    .bind(datos.activo.unwrap_or(true))
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::NoEncontrado(format!("No existe el servicio {id}")))?;

    Ok(HttpResponse::Ok().json(servicio))
}

// Si el servicio tiene reservas asociadas no se borra, se desactiva.
async fn eliminar_servicio(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    let id = path.into_inner();

    let res = sqlx::query("DELETE FROM servicios WHERE id_servicio = $1")
        .bind(id)
        .execute(pool.get_ref())
        .await;

    match res {
        Ok(r) if r.rows_affected() > 0 => {
            Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true, "desactivado": false })))
        }
        Ok(_) => Err(ApiError::NoEncontrado(format!("No existe el servicio {id}"))),
        Err(e) if es_violacion_fk(&e) => {
            sqlx::query("UPDATE servicios SET activo = FALSE WHERE id_servicio = $1")
                .bind(id)
                .execute(pool.get_ref())
                .await?;
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "ok": true,
                "desactivado": true,
                "mensaje": "El servicio tiene reservas asociadas; se desactivó en su lugar"
            })))
        }
        Err(e) => Err(e.into()),
    }
}

// =====================================
// SUPLEMENTOS
// =====================================

async fn listar_suplementos(
    pool: web::Data<PgPool>,
    _auth: Auth,
) -> Result<HttpResponse, ApiError> {
    let suplementos = sqlx::query_as::<_, SuplementoRow>(
        r#"
        SELECT id_suplemento, nombre, precio_centavos, tipo, activo
        FROM suplementos
        ORDER BY nombre
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(suplementos))
}

async fn crear_suplemento(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<SuplementoInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    validar_suplemento(&datos)?;

    let suplemento = sqlx::query_as::<_, SuplementoRow>(
        r#"
        INSERT INTO suplementos (nombre, precio_centavos, tipo, activo)
        VALUES ($1, $2, $3, $4)
        RETURNING id_suplemento, nombre, precio_centavos, tipo, activo
        "#,
    )
    .bind(datos.nombre.trim())
    .bind(datos.precio_centavos)
    .bind(&datos.tipo)
    .bind(datos.activo.unwrap_or(true))
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(suplemento))
}

async fn actualizar_suplemento(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<SuplementoInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    validar_suplemento(&datos)?;
    let id = path.into_inner();

    let suplemento = sqlx::query_as::<_, SuplementoRow>(
        r#"
        UPDATE suplementos
        SET nombre = $1, precio_centavos = $2, tipo = $3, activo = $4
        WHERE id_suplemento = $5
        RETURNING id_suplemento, nombre, precio_centavos, tipo, activo
        "#,
    )
    .bind(datos.nombre.trim())
    .bind(datos.precio_centavos)
    .bind(&datos.tipo)
    .bind(datos.activo.unwrap_or(true))
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::NoEncontrado(format!("No existe el suplemento {id}")))?;

    Ok(HttpResponse::Ok().json(suplemento))
}

async fn eliminar_suplemento(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    let id = path.into_inner();

    let res = sqlx::query("DELETE FROM suplementos WHERE id_suplemento = $1")
        .bind(id)
        .execute(pool.get_ref())
        .await;

    match res {
        Ok(r) if r.rows_affected() > 0 => {
            Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true, "desactivado": false })))
        }
        Ok(_) => Err(ApiError::NoEncontrado(format!(
            "No existe el suplemento {id}"
        ))),
        Err(e) if es_violacion_fk(&e) => {
            sqlx::query("UPDATE suplementos SET activo = FALSE WHERE id_suplemento = $1")
                .bind(id)
                .execute(pool.get_ref())
                .await?;
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "ok": true,
                "desactivado": true,
                "mensaje": "El suplemento está en uso por reservas; se desactivó en su lugar"
            })))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/servicios", web::get().to(listar_servicios))
        .route("/servicios", web::post().to(crear_servicio))
        .route("/servicios/suplementos", web::get().to(listar_suplementos))
        .route("/servicios/suplementos", web::post().to(crear_suplemento))
        .route(
            "/servicios/suplementos/{id}",
            web::put().to(actualizar_suplemento),
        )
        .route(
            "/servicios/suplementos/{id}",
            web::delete().to(eliminar_suplemento),
        )
        .route("/servicios/{id}", web::put().to(actualizar_servicio))
        .route("/servicios/{id}", web::delete().to(eliminar_servicio));
}
