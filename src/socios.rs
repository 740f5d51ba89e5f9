//! Registro de socios del club.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::auth::{self, Auth};
use crate::error::ApiError;

#[derive(Serialize, FromRow)]
struct SocioRow {
    id_socio: i32,
    codigo: String,
    nombre: String,
    primer_apellido: String,
    segundo_apellido: Option<String>,
    correo: Option<String>,
    telefono: Option<String>,
    activo: bool,
}

#[derive(Deserialize)]
struct SocioInput {
    codigo: String,
    nombre: String,
    primer_apellido: String,
    segundo_apellido: Option<String>,
    correo: Option<String>,
    telefono: Option<String>,
    activo: Option<bool>,
}

#[derive(Deserialize)]
struct ListadoQuery {
    activos: Option<bool>,
    q: Option<String>,
}

fn validar(datos: &SocioInput) -> Result<(), ApiError> {
    if datos.codigo.trim().is_empty() {
        return Err(ApiError::Validacion("El código es obligatorio".to_string()));
    }
    if datos.nombre.trim().is_empty() || datos.primer_apellido.trim().is_empty() {
        return Err(ApiError::Validacion(
            "Nombre y primer apellido son obligatorios".to_string(),
        ));
    }
    Ok(())
}

// GET /socios?activos=true&q=texto
async fn listar(
    pool: web::Data<PgPool>,
    auth: Auth,
    q: web::Query<ListadoQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    let patron = q.q.as_ref().map(|t| format!("%{}%", t.trim()));

    let socios = sqlx::query_as::<_, SocioRow>(
        r#"
        SELECT id_socio, codigo, nombre, primer_apellido, segundo_apellido,
               correo, telefono, activo
        FROM socios
        WHERE ($1::boolean IS NULL OR activo = $1)
          AND ($2::text IS NULL OR codigo ILIKE $2 OR nombre ILIKE $2
               OR primer_apellido ILIKE $2 OR segundo_apellido ILIKE $2)
        ORDER BY primer_apellido, nombre
        "#,
    )
    .bind(q.activos)
    .bind(patron)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(socios))
}

async fn obtener(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id = path.into_inner();

    let socio = sqlx::query_as::<_, SocioRow>(
        r#"
        SELECT id_socio, codigo, nombre, primer_apellido, segundo_apellido,
               correo, telefono, activo
        FROM socios
        WHERE id_socio = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::NoEncontrado(format!("No existe el socio {id}")))?;

    Ok(HttpResponse::Ok().json(socio))
}

async fn crear(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<SocioInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::DIRECTIVA)?;
    validar(&datos)?;

    let socio = sqlx::query_as::<_, SocioRow>(
        r#"
        INSERT INTO socios (codigo, nombre, primer_apellido, segundo_apellido,
                            correo, telefono, activo)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id_socio, codigo, nombre, primer_apellido, segundo_apellido,
                  correo, telefono, activo
        "#,
    )
    .bind(datos.codigo.trim())
    .bind(datos.nombre.trim())
    .bind(datos.primer_apellido.trim())
    .bind(&datos.segundo_apellido)
    .bind(&datos.correo)
    .bind(&datos.telefono)
    .bind(datos.activo.unwrap_or(true))
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(socio))
}

async fn actualizar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<SocioInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::DIRECTIVA)?;
    validar(&datos)?;
    let id = path.into_inner();

    let socio = sqlx::query_as::<_, SocioRow>(
        r#"
        UPDATE socios
        SET codigo = $1, nombre = $2, primer_apellido = $3, segundo_apellido = $4,
            correo = $5, telefono = $6, activo = $7
        WHERE id_socio = $8
        RETURNING id_socio, codigo, nombre, primer_apellido, segundo_apellido,
                  correo, telefono, activo
        "#,
    )
    .bind(datos.codigo.trim())
    .bind(datos.nombre.trim())
    .bind(datos.primer_apellido.trim())
    .bind(&datos.segundo_apellido)
    .bind(&datos.correo)
    .bind(&datos.telefono)
    .bind(datos.activo.unwrap_or(true))
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::NoEncontrado(format!("No existe el socio {id}")))?;

    Ok(HttpResponse::Ok().json(socio))
}

async fn eliminar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    let id = path.into_inner();

    let res = sqlx::query("DELETE FROM socios WHERE id_socio = $1")
        .bind(id)
        .execute(pool.get_ref())
        .await?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NoEncontrado(format!("No existe el socio {id}")));
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/socios", web::get().to(listar))
        .route("/socios", web::post().to(crear))
        .route("/socios/{id}", web::get().to(obtener))
        .route("/socios/{id}", web::put().to(actualizar))
        .route("/socios/{id}", web::delete().to(eliminar));
}
