//! Invitaciones de socios, con cupo anual configurable.

use actix_web::{web, HttpResponse};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::auth::{self, Auth};
use crate::configuracion;
use crate::error::ApiError;

// Desplazamiento para que los locks de invitaciones no choquen con los
// de reservas (que usan servicio*1e8 + fecha).
const BASE_BLOQUEO_INVITACIONES: i64 = 9_000_000_000_000;

#[derive(Serialize, FromRow)]
struct InvitacionRow {
    id_invitacion: i32,
    id_socio: i32,
    socio_nombre: String,
    fecha: NaiveDate,
    cantidad: i32,
    observaciones: Option<String>,
}

#[derive(Deserialize)]
struct InvitacionInput {
    id_socio: i32,
    fecha: NaiveDate,
    cantidad: i32,
    observaciones: Option<String>,
}

#[derive(Deserialize)]
struct ResumenQuery {
    anio: Option<i32>,
}

#[derive(Serialize)]
struct Resumen {
    id_socio: i32,
    anio: i32,
    cupo: i64,
    usadas: i64,
    disponibles: i64,
}

// El alta nunca rebasa el cupo anual; llenar el cupo justo sí se permite.
fn excede_cupo(usadas: i64, cantidad: i64, cupo: i64) -> bool {
    usadas + cantidad > cupo
}

async fn cupo_anual(pool: &PgPool) -> Result<i64, ApiError> {
    let valor = configuracion::valor(pool, "cupo_invitaciones_anual").await?;
    Ok(valor.and_then(|v| v.parse().ok()).unwrap_or(20))
}

// GET /invitaciones
async fn listar(pool: web::Data<PgPool>, auth: Auth) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    let invitaciones = sqlx::query_as::<_, InvitacionRow>(
        r#"
        SELECT i.id_invitacion, i.id_socio,
               (s.nombre || ' ' || s.primer_apellido) AS socio_nombre,
               i.fecha, i.cantidad, i.observaciones
        FROM invitaciones i
        JOIN socios s ON s.id_socio = i.id_socio
        ORDER BY i.fecha DESC, i.id_invitacion DESC
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(invitaciones))
}

// GET /invitaciones/socio/{id} — historial (el cliente genera el PDF)
async fn historial_socio(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id_socio = path.into_inner();

    let invitaciones = sqlx::query_as::<_, InvitacionRow>(
        r#"
        SELECT i.id_invitacion, i.id_socio,
               (s.nombre || ' ' || s.primer_apellido) AS socio_nombre,
               i.fecha, i.cantidad, i.observaciones
        FROM invitaciones i
        JOIN socios s ON s.id_socio = i.id_socio
        WHERE i.id_socio = $1
        ORDER BY i.fecha DESC, i.id_invitacion DESC
        "#,
    )
    .bind(id_socio)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(invitaciones))
}

// GET /invitaciones/socio/{id}/resumen?anio=
async fn resumen_socio(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    q: web::Query<ResumenQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id_socio = path.into_inner();
    let anio = q.anio.unwrap_or_else(|| Local::now().year());

    let usadas = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COALESCE(SUM(cantidad), 0)::BIGINT
        FROM invitaciones
        WHERE id_socio = $1 AND date_part('year', fecha) = $2
        "#,
    )
    .bind(id_socio)
    .bind(f64::from(anio))
    .fetch_one(pool.get_ref())
    .await?;

    let cupo = cupo_anual(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(Resumen {
        id_socio,
        anio,
        cupo,
        usadas,
        disponibles: (cupo - usadas).max(0),
    }))
}

// POST /invitaciones — rechaza si agota el cupo anual del socio
async fn crear(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<InvitacionInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    if datos.cantidad < 1 {
        return Err(ApiError::Validacion(
            "La cantidad debe ser al menos 1".to_string(),
        ));
    }

    let cupo = cupo_anual(pool.get_ref()).await?;

    let mut tx = pool.begin().await?;

    // Serializa las altas del mismo socio para no rebasar el cupo en carrera.
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BASE_BLOQUEO_INVITACIONES + i64::from(datos.id_socio))
        .execute(&mut *tx)
        .await?;

    let activo = sqlx::query_scalar::<_, bool>("SELECT activo FROM socios WHERE id_socio = $1")
        .bind(datos.id_socio)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::Validacion(format!("No existe el socio {}", datos.id_socio)))?;
    if !activo {
        return Err(ApiError::Validacion(format!(
            "El socio {} está dado de baja",
            datos.id_socio
        )));
    }

    let usadas = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COALESCE(SUM(cantidad), 0)::BIGINT
        FROM invitaciones
        WHERE id_socio = $1 AND date_part('year', fecha) = date_part('year', $2::date)
        "#,
    )
    .bind(datos.id_socio)
    .bind(datos.fecha)
    .fetch_one(&mut *tx)
    .await?;

    if excede_cupo(usadas, i64::from(datos.cantidad), cupo) {
        return Err(ApiError::Validacion(format!(
            "Cupo anual de invitaciones agotado (disponibles: {})",
            (cupo - usadas).max(0)
        )));
    }

    let id_invitacion: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO invitaciones (id_socio, fecha, cantidad, observaciones)
        VALUES ($1, $2, $3, $4)
        RETURNING id_invitacion
        "#,
    )
    .bind(datos.id_socio)
    .bind(datos.fecha)
    .bind(datos.cantidad)
    .bind(&datos.observaciones)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "ok": true,
        "id_invitacion": id_invitacion,
        "disponibles": cupo - usadas - i64::from(datos.cantidad),
    })))
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/invitaciones", web::get().to(listar))
        .route("/invitaciones", web::post().to(crear))
        .route("/invitaciones/socio/{id}", web::get().to(historial_socio))
        .route(
            "/invitaciones/socio/{id}/resumen",
            web::get().to(resumen_socio),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1, 20, false)]
    #[case(19, 1, 20, false)] // deja el cupo justo lleno
    #[case(20, 1, 20, true)]
    #[case(18, 3, 20, true)]
    #[case(0, 20, 20, false)]
    fn el_cupo_anual_no_se_rebasa(
        #[case] usadas: i64,
        #[case] cantidad: i64,
        #[case] cupo: i64,
        #[case] excede: bool,
    ) {
        assert_eq!(excede_cupo(usadas, cantidad, cupo), excede);
    }
}
