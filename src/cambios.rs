//! Canjes de productos (ventas de mostrador contra el inventario).
//!
//! El alta descuenta stock dentro de una transacción: si algún producto
//! no alcanza, se revierte todo y se responde 400 nombrando el producto.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;

use crate::auth::{self, Auth};
use crate::dinero::centavos_a_str;
use crate::error::ApiError;

#[derive(Serialize, FromRow)]
struct CambioRow {
    id_cambio: i32,
    id_socio: i32,
    socio_nombre: String,
    fecha: DateTime<Utc>,
    total_centavos: i64,
    registrado_por: i32,
}

#[derive(Serialize, FromRow)]
struct DetalleRow {
    id_producto: i32,
    producto_nombre: String,
    cantidad: i32,
    precio_unitario_centavos: i64,
}

#[derive(Deserialize)]
struct ItemInput {
    id_producto: i32,
    cantidad: i32,
}

#[derive(Deserialize)]
struct CambioInput {
    id_socio: i32,
    items: Vec<ItemInput>,
}

#[derive(Deserialize)]
struct ReporteQuery {
    desde: Option<NaiveDate>,
    hasta: Option<NaiveDate>,
}

// El stock nunca queda negativo: solo se descuenta si alcanza.
fn stock_suficiente(stock: i32, cantidad: i64) -> bool {
    i64::from(stock) >= cantidad
}

// GET /cambios
async fn listar(pool: web::Data<PgPool>, auth: Auth) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    let cambios = sqlx::query_as::<_, CambioRow>(
        r#"
        SELECT c.id_cambio, c.id_socio,
               (s.nombre || ' ' || s.primer_apellido) AS socio_nombre,
               c.fecha, c.total_centavos, c.registrado_por
        FROM cambios c
        JOIN socios s ON s.id_socio = c.id_socio
        ORDER BY c.fecha DESC
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(cambios))
}

// GET /cambios/{id}
async fn obtener(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id = path.into_inner();

    let cambio = sqlx::query_as::<_, CambioRow>(
        r#"
        SELECT c.id_cambio, c.id_socio,
               (s.nombre || ' ' || s.primer_apellido) AS socio_nombre,
               c.fecha, c.total_centavos, c.registrado_por
        FROM cambios c
        JOIN socios s ON s.id_socio = c.id_socio
        WHERE c.id_cambio = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::NoEncontrado(format!("No existe el cambio {id}")))?;

    let detalle = sqlx::query_as::<_, DetalleRow>(
        r#"
        SELECT d.id_producto, p.nombre AS producto_nombre,
               d.cantidad, d.precio_unitario_centavos
        FROM cambio_detalle d
        JOIN productos p ON p.id_producto = d.id_producto
        WHERE d.id_cambio = $1
        ORDER BY p.nombre
        "#,
    )
    .bind(id)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "cambio": cambio,
        "detalle": detalle,
        "total": centavos_a_str(cambio.total_centavos),
    })))
}

// POST /cambios
async fn crear(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<CambioInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    if datos.items.is_empty() {
        return Err(ApiError::Validacion(
            "El cambio debe llevar al menos un producto".to_string(),
        ));
    }

    // Agrupa líneas repetidas del mismo producto
    let mut items: BTreeMap<i32, i64> = BTreeMap::new();
    for item in &datos.items {
        if item.cantidad < 1 {
            return Err(ApiError::Validacion(format!(
                "La cantidad del producto {} debe ser al menos 1",
                item.id_producto
            )));
        }
        *items.entry(item.id_producto).or_insert(0) += i64::from(item.cantidad);
    }

    let mut tx = pool.begin().await?;

    let socio_activo =
        sqlx::query_scalar::<_, bool>("SELECT activo FROM socios WHERE id_socio = $1")
            .bind(datos.id_socio)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::Validacion(format!("No existe el socio {}", datos.id_socio)))?;
    if !socio_activo {
        return Err(ApiError::Validacion(format!(
            "El socio {} está dado de baja",
            datos.id_socio
        )));
    }

    #[derive(FromRow)]
    struct ProductoBloqueado {
        nombre: String,
        precio_centavos: i64,
        stock: i32,
        activo: bool,
    }

    let mut total: i64 = 0;
    let mut lineas: Vec<(i32, i64, i64)> = Vec::new(); // (producto, cantidad, precio unitario)

    for (&id_producto, &cantidad) in &items {
        let producto = sqlx::query_as::<_, ProductoBloqueado>(
            r#"
            SELECT nombre, precio_centavos, stock, activo
            FROM productos
            WHERE id_producto = $1
            FOR UPDATE
            "#,
        )
        .bind(id_producto)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::Validacion(format!("No existe el producto {id_producto}")))?;

        if !producto.activo {
            return Err(ApiError::Validacion(format!(
                "El producto {} está inactivo",
                producto.nombre
            )));
        }
        if !stock_suficiente(producto.stock, cantidad) {
            return Err(ApiError::Validacion(format!(
                "Stock insuficiente para {} (disponible: {})",
                producto.nombre, producto.stock
            )));
        }

        sqlx::query("UPDATE productos SET stock = stock - $1 WHERE id_producto = $2")
            .bind(i32::try_from(cantidad).map_err(|_| {
                ApiError::Validacion(format!("Cantidad desorbitada para el producto {id_producto}"))
            })?)
            .bind(id_producto)
            .execute(&mut *tx)
            .await?;

        total += producto.precio_centavos * cantidad;
        lineas.push((id_producto, cantidad, producto.precio_centavos));
    }

    let id_cambio: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO cambios (id_socio, total_centavos, registrado_por)
        VALUES ($1, $2, $3)
        RETURNING id_cambio
        "#,
    )
    .bind(datos.id_socio)
    .bind(total)
    .bind(auth.id_usuario)
    .fetch_one(&mut *tx)
    .await?;

    for (id_producto, cantidad, precio_unitario) in &lineas {
        sqlx::query(
            r#"
            INSERT INTO cambio_detalle (id_cambio, id_producto, cantidad, precio_unitario_centavos)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id_cambio)
        .bind(id_producto)
        .bind(*cantidad as i32)
        .bind(precio_unitario)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(id_cambio, total_centavos = total, "cambio registrado");

    Ok(HttpResponse::Created().json(json!({
        "ok": true,
        "id_cambio": id_cambio,
        "total_centavos": total,
        "total": centavos_a_str(total),
    })))
}

// GET /cambios/reporte?desde=&hasta= — productos retirados en el periodo
async fn reporte(
    pool: web::Data<PgPool>,
    auth: Auth,
    q: web::Query<ReporteQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    #[derive(Serialize, FromRow)]
    struct FilaReporte {
        id_producto: i32,
        nombre: String,
        unidades: i64,
        total_centavos: i64,
    }

    let filas = sqlx::query_as::<_, FilaReporte>(
        r#"
        SELECT p.id_producto, p.nombre,
               SUM(d.cantidad)::BIGINT AS unidades,
               SUM(d.cantidad * d.precio_unitario_centavos)::BIGINT AS total_centavos
        FROM cambio_detalle d
        JOIN cambios c ON c.id_cambio = d.id_cambio
        JOIN productos p ON p.id_producto = d.id_producto
        WHERE ($1::date IS NULL OR c.fecha >= $1)
          AND ($2::date IS NULL OR c.fecha < $2 + INTERVAL '1 day')
        GROUP BY p.id_producto, p.nombre
        ORDER BY unidades DESC, p.nombre
        "#,
    )
    .bind(q.desde)
    .bind(q.hasta)
    .fetch_all(pool.get_ref())
    .await?;

    let total: i64 = filas.iter().map(|f| f.total_centavos).sum();

    Ok(HttpResponse::Ok().json(json!({
        "desde": q.desde,
        "hasta": q.hasta,
        "productos": filas,
        "total": centavos_a_str(total),
    })))
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/cambios", web::get().to(listar))
        .route("/cambios", web::post().to(crear))
        .route("/cambios/reporte", web::get().to(reporte))
        .route("/cambios/{id}", web::get().to(obtener));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(5, 4, true)]
    #[case(5, 5, true)] // justo el stock disponible
    #[case(5, 6, false)]
    #[case(0, 1, false)]
    fn descuento_solo_si_alcanza_el_stock(
        #[case] stock: i32,
        #[case] cantidad: i64,
        #[case] alcanza: bool,
    ) {
        assert_eq!(stock_suficiente(stock, cantidad), alcanza);
    }
}
