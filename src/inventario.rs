//! Inventario de consumibles (bar, limpieza, material deportivo).

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::auth::{self, Auth};
use crate::error::ApiError;

#[derive(Serialize, FromRow)]
struct ProductoRow {
    id_producto: i32,
    nombre: String,
    categoria: Option<String>,
    precio_centavos: i64,
    stock: i32,
    activo: bool,
}

#[derive(Deserialize)]
struct ProductoInput {
    nombre: String,
    categoria: Option<String>,
    precio_centavos: i64,
    stock: Option<i32>,
    activo: Option<bool>,
}

#[derive(Deserialize)]
struct AjusteStock {
    delta: i32,
}

#[derive(Deserialize)]
struct ListadoQuery {
    activos: Option<bool>,
    categoria: Option<String>,
}

fn validar(datos: &ProductoInput) -> Result<(), ApiError> {
    if datos.nombre.trim().is_empty() {
        return Err(ApiError::Validacion("El nombre es obligatorio".to_string()));
    }
    if datos.precio_centavos < 0 {
        return Err(ApiError::Validacion(
            "El precio no puede ser negativo".to_string(),
        ));
    }
    if datos.stock.unwrap_or(0) < 0 {
        return Err(ApiError::Validacion(
            "El stock no puede ser negativo".to_string(),
        ));
    }
    Ok(())
}

// GET /inventory?activos=true&categoria=
async fn listar(
    pool: web::Data<PgPool>,
    auth: Auth,
    q: web::Query<ListadoQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;

    let productos = sqlx::query_as::<_, ProductoRow>(
        r#"
        SELECT id_producto, nombre, categoria, precio_centavos, stock, activo
        FROM productos
        WHERE ($1::boolean IS NULL OR activo = $1)
          AND ($2::text IS NULL OR categoria = $2)
        ORDER BY nombre
        "#,
    )
    .bind(q.activos)
    .bind(&q.categoria)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(productos))
}

async fn crear(
    pool: web::Data<PgPool>,
    auth: Auth,
    datos: web::Json<ProductoInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    validar(&datos)?;

    let producto = sqlx::query_as::<_, ProductoRow>(
        r#"
        INSERT INTO productos (nombre, categoria, precio_centavos, stock, activo)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id_producto, nombre, categoria, precio_centavos, stock, activo
        "#,
    )
    .bind(datos.nombre.trim())
    .bind(&datos.categoria)
    .bind(datos.precio_centavos)
    .bind(datos.stock.unwrap_or(0))
    .bind(datos.activo.unwrap_or(true))
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Created().json(producto))
}

async fn actualizar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<ProductoInput>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    validar(&datos)?;
    let id = path.into_inner();

    let producto = sqlx::query_as::<_, ProductoRow>(
        r#"
        UPDATE productos
        SET nombre = $1, categoria = $2, precio_centavos = $3,
            stock = COALESCE($4, stock), activo = $5
        WHERE id_producto = $6
        RETURNING id_producto, nombre, categoria, precio_centavos, stock, activo
        "#,
    )
    .bind(datos.nombre.trim())
    .bind(&datos.categoria)
    .bind(datos.precio_centavos)
    .bind(datos.stock)
    .bind(datos.activo.unwrap_or(true))
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::NoEncontrado(format!("No existe el producto {id}")))?;

    Ok(HttpResponse::Ok().json(producto))
}

// PATCH /inventory/{id}/stock — ajuste relativo, nunca por debajo de cero
async fn ajustar_stock(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
    datos: web::Json<AjusteStock>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::PERSONAL)?;
    let id = path.into_inner();

    let producto = sqlx::query_as::<_, ProductoRow>(
        r#"
        UPDATE productos
        SET stock = stock + $1
        WHERE id_producto = $2 AND stock + $1 >= 0
        RETURNING id_producto, nombre, categoria, precio_centavos, stock, activo
        "#,
    )
    .bind(datos.delta)
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?;

    match producto {
        Some(p) => Ok(HttpResponse::Ok().json(p)),
        None => {
            let existe =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*)::BIGINT FROM productos WHERE id_producto = $1")
                    .bind(id)
                    .fetch_one(pool.get_ref())
                    .await?;
            if existe == 0 {
                Err(ApiError::NoEncontrado(format!("No existe el producto {id}")))
            } else {
                Err(ApiError::Validacion(
                    "Stock insuficiente para ese ajuste".to_string(),
                ))
            }
        }
    }
}

async fn eliminar(
    pool: web::Data<PgPool>,
    auth: Auth,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    auth.exigir_rol(auth::SOLO_ADMIN)?;
    let id = path.into_inner();

    // Con movimientos registrados el producto no se borra, se desactiva.
    let res = sqlx::query("DELETE FROM productos WHERE id_producto = $1")
        .bind(id)
        .execute(pool.get_ref())
        .await;

    match res {
        Ok(r) if r.rows_affected() > 0 => {
            Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true, "desactivado": false })))
        }
        Ok(_) => Err(ApiError::NoEncontrado(format!("No existe el producto {id}"))),
        Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23503") => {
            sqlx::query("UPDATE productos SET activo = FALSE WHERE id_producto = $1")
                .bind(id)
                .execute(pool.get_ref())
                .await?;
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "ok": true,
                "desactivado": true,
                "mensaje": "El producto tiene movimientos; se desactivó en su lugar"
            })))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn configurar(cfg: &mut web::ServiceConfig) {
    cfg.route("/inventory", web::get().to(listar))
        .route("/inventory", web::post().to(crear))
        .route("/inventory/{id}", web::put().to(actualizar))
        .route("/inventory/{id}", web::delete().to(eliminar))
        .route("/inventory/{id}/stock", web::patch().to(ajustar_stock));
}
